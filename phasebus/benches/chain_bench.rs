//! Benchmarks for chain building.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use phasebus::phase::{names, PhaseRegistry};
use phasebus::pipeline::{ChainBuilder, ChainCache};
use phasebus::stages::{NoOpStage, Stage};
use std::sync::Arc;

fn stages(count: usize) -> Vec<Arc<dyn Stage>> {
    (0..count)
        .map(|i| {
            let phase = names::OUTBOUND[i % names::OUTBOUND.len()];
            Arc::new(NoOpStage::new(format!("stage-{i}"), phase)) as Arc<dyn Stage>
        })
        .collect()
}

fn chain_benchmark(c: &mut Criterion) {
    let registry = Arc::new(PhaseRegistry::outbound());
    let stages = stages(50);

    c.bench_function("build_50", |b| {
        b.iter(|| ChainBuilder::build(black_box(&registry), black_box(&stages)))
    });

    let cache = ChainCache::new();
    c.bench_function("cached_50", |b| {
        b.iter(|| cache.get_or_build(black_box(&registry), black_box(&stages)))
    });
}

criterion_group!(benches, chain_benchmark);
criterion_main!(benches);
