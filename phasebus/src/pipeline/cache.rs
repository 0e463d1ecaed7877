//! Memoization of built chains.

use super::{Chain, ChainBuilder};
use crate::errors::BuildError;
use crate::phase::PhaseRegistry;
use crate::stages::Stage;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Identity of a stage list: registry instance plus stage ids and instances.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ChainKey {
    registry: usize,
    stages: Vec<(String, usize)>,
}

impl ChainKey {
    fn new(registry: &Arc<PhaseRegistry>, stages: &[Arc<dyn Stage>]) -> Self {
        Self {
            registry: Arc::as_ptr(registry) as usize,
            stages: stages
                .iter()
                .map(|s| (s.id().to_string(), Arc::as_ptr(s).cast::<()>() as usize))
                .collect(),
        }
    }
}

/// Thread-safe cache of chains keyed by the stage list they were built from.
///
/// The same registry and the same stage instances in the same order always
/// yield the same `Arc<Chain>`. Failed builds are not cached.
///
/// Entries are never evicted on their own, and each one keeps its stages
/// alive. Callers that build clients or endpoints from fresh stage instances
/// should [`remove`](Self::remove) their lists, or [`clear`](Self::clear) the
/// cache, when tearing them down.
#[derive(Debug, Default)]
pub struct ChainCache {
    chains: DashMap<ChainKey, Arc<Chain>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl ChainCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached chain for a stage list, building it on first use.
    ///
    /// # Errors
    ///
    /// Returns the build error if the chain cannot be built.
    pub fn get_or_build(
        &self,
        registry: &Arc<PhaseRegistry>,
        stages: &[Arc<dyn Stage>],
    ) -> Result<Arc<Chain>, BuildError> {
        let key = ChainKey::new(registry, stages);
        if let Some(chain) = self.chains.get(&key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(chain.clone());
        }

        let built = Arc::new(ChainBuilder::build(registry, stages)?);
        self.misses.fetch_add(1, Ordering::Relaxed);
        debug!(
            registry = registry.name(),
            stages = built.len(),
            "Built chain"
        );
        // A concurrent builder may have won; keep whichever landed first.
        Ok(self.chains.entry(key).or_insert(built).clone())
    }

    /// Drops the chain cached for a stage list. Returns true if one was cached.
    ///
    /// Chains already handed out stay usable.
    pub fn remove(&self, registry: &Arc<PhaseRegistry>, stages: &[Arc<dyn Stage>]) -> bool {
        self.chains
            .remove(&ChainKey::new(registry, stages))
            .is_some()
    }

    /// Returns the number of cached chains.
    #[must_use]
    pub fn len(&self) -> usize {
        self.chains.len()
    }

    /// Returns true if nothing is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.chains.is_empty()
    }

    /// Returns (hits, misses).
    #[must_use]
    pub fn stats(&self) -> (u64, u64) {
        (
            self.hits.load(Ordering::Relaxed),
            self.misses.load(Ordering::Relaxed),
        )
    }

    /// Drops every cached chain.
    pub fn clear(&self) {
        self.chains.clear();
    }
}
