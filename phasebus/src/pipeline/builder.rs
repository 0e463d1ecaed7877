//! Chain builder with validation.

use super::chain::{Chain, ChainEntry};
use crate::errors::BuildError;
use crate::phase::PhaseRegistry;
use crate::stages::Stage;
use std::cmp::Reverse;
use std::collections::{BTreeSet, BinaryHeap, HashMap, HashSet};
use std::sync::Arc;

/// Builder for creating validated chains.
#[derive(Debug, Clone)]
pub struct ChainBuilder {
    registry: Arc<PhaseRegistry>,
    stages: Vec<Arc<dyn Stage>>,
}

impl ChainBuilder {
    /// Creates a builder over a registry.
    #[must_use]
    pub fn new(registry: Arc<PhaseRegistry>) -> Self {
        Self {
            registry,
            stages: Vec::new(),
        }
    }

    /// Adds a stage.
    #[must_use]
    pub fn stage(mut self, stage: Arc<dyn Stage>) -> Self {
        self.stages.push(stage);
        self
    }

    /// Adds several stages in order.
    #[must_use]
    pub fn stages<I>(mut self, stages: I) -> Self
    where
        I: IntoIterator<Item = Arc<dyn Stage>>,
    {
        self.stages.extend(stages);
        self
    }

    /// Builds the chain.
    ///
    /// # Errors
    ///
    /// See [`ChainBuilder::build`].
    pub fn finish(self) -> Result<Chain, BuildError> {
        Self::build(&self.registry, &self.stages)
    }

    /// Orders stages into a chain.
    ///
    /// Stages are grouped by phase in registry order. Inside a phase they are
    /// ordered by their `runs_after` and `runs_before` constraints; among
    /// stages left unordered by constraints, registration order wins.
    /// Constraints naming a stage outside the phase are ignored.
    ///
    /// # Errors
    ///
    /// Returns `DuplicateStage`, `UnknownPhase`, `EmptyRegistry`, or
    /// `CyclicConstraint` when the constraints of a phase cannot be satisfied.
    pub fn build(
        registry: &Arc<PhaseRegistry>,
        stages: &[Arc<dyn Stage>],
    ) -> Result<Chain, BuildError> {
        if registry.is_empty() {
            return Err(BuildError::EmptyRegistry {
                registry: registry.name().to_string(),
            });
        }

        let mut seen = HashSet::with_capacity(stages.len());
        let mut buckets: Vec<Vec<&Arc<dyn Stage>>> = vec![Vec::new(); registry.len()];
        for stage in stages {
            if !seen.insert(stage.id()) {
                return Err(BuildError::DuplicateStage {
                    stage: stage.id().to_string(),
                });
            }
            let position =
                registry
                    .position(stage.phase())
                    .ok_or_else(|| BuildError::UnknownPhase {
                        stage: stage.id().to_string(),
                        phase: stage.phase().to_string(),
                    })?;
            buckets[position].push(stage);
        }

        let mut entries = Vec::with_capacity(stages.len());
        for (position, bucket) in buckets.iter().enumerate() {
            for index in order_phase(registry, position, bucket)? {
                entries.push(ChainEntry {
                    stage: bucket[index].clone(),
                    phase_position: position,
                });
            }
        }

        Ok(Chain::from_entries(registry.clone(), entries))
    }
}

/// Stable topological sort of one phase's stages, returning bucket indices.
fn order_phase(
    registry: &PhaseRegistry,
    position: usize,
    bucket: &[&Arc<dyn Stage>],
) -> Result<Vec<usize>, BuildError> {
    if bucket.len() < 2 {
        return Ok((0..bucket.len()).collect());
    }

    let local: HashMap<&str, usize> = bucket
        .iter()
        .enumerate()
        .map(|(i, s)| (s.id(), i))
        .collect();

    let mut successors: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); bucket.len()];
    for (i, stage) in bucket.iter().enumerate() {
        for after in stage.runs_after() {
            if let Some(&j) = local.get(after.as_str()) {
                successors[j].insert(i);
            }
        }
        for before in stage.runs_before() {
            if let Some(&j) = local.get(before.as_str()) {
                successors[i].insert(j);
            }
        }
    }

    let mut in_degree = vec![0usize; bucket.len()];
    for succ in &successors {
        for &j in succ {
            in_degree[j] += 1;
        }
    }

    let mut ready: BinaryHeap<Reverse<usize>> = in_degree
        .iter()
        .enumerate()
        .filter(|(_, d)| **d == 0)
        .map(|(i, _)| Reverse(i))
        .collect();
    let mut order = Vec::with_capacity(bucket.len());
    while let Some(Reverse(i)) = ready.pop() {
        order.push(i);
        for &j in &successors[i] {
            in_degree[j] -= 1;
            if in_degree[j] == 0 {
                ready.push(Reverse(j));
            }
        }
    }

    if order.len() == bucket.len() {
        return Ok(order);
    }

    let cycle = find_cycle(&successors, &in_degree);
    Err(BuildError::CyclicConstraint {
        phase: registry
            .get(position)
            .map(|p| p.name().to_string())
            .unwrap_or_default(),
        stages: cycle.iter().map(|&i| bucket[i].id().to_string()).collect(),
    })
}

/// Walks predecessors among unsorted nodes until one repeats.
///
/// Every node left with a positive in-degree has a predecessor that is also
/// unsorted, so the walk always closes a cycle.
fn find_cycle(successors: &[BTreeSet<usize>], in_degree: &[usize]) -> Vec<usize> {
    let remaining: Vec<usize> = (0..in_degree.len()).filter(|&i| in_degree[i] > 0).collect();
    let predecessor = |node: usize| {
        remaining
            .iter()
            .copied()
            .find(|&p| successors[p].contains(&node))
    };

    let Some(&start) = remaining.first() else {
        return Vec::new();
    };
    let mut path = vec![start];
    let mut current = start;
    while let Some(prev) = predecessor(current) {
        if let Some(at) = path.iter().position(|&n| n == prev) {
            let mut cycle: Vec<usize> = path[at..].to_vec();
            cycle.reverse();
            cycle.push(cycle[0]);
            return cycle;
        }
        path.push(prev);
        current = prev;
    }
    remaining
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::MessageContext;
    use crate::stages::{FnStage, NoOpStage, StageOutcome};
    use pretty_assertions::assert_eq;

    fn registry() -> Arc<PhaseRegistry> {
        Arc::new(PhaseRegistry::from_names("test", ["p1", "p2"]).unwrap())
    }

    fn stage(id: &str, phase: &str, after: &[&str], before: &[&str]) -> Arc<dyn Stage> {
        let mut s = FnStage::new(id, phase, |_: &mut MessageContext| StageOutcome::Continue);
        for a in after {
            s = s.after(*a);
        }
        for b in before {
            s = s.before(*b);
        }
        Arc::new(s)
    }

    #[test]
    fn test_orders_by_phase_then_registration() {
        let stages = vec![
            stage("late", "p2", &[], &[]),
            stage("x", "p1", &[], &[]),
            stage("y", "p1", &[], &[]),
        ];
        let chain = ChainBuilder::build(&registry(), &stages).unwrap();
        assert_eq!(chain.stage_ids(), vec!["x", "y", "late"]);
    }

    #[test]
    fn test_after_and_before_constraints() {
        let stages = vec![
            stage("A", "p1", &[], &[]),
            stage("B", "p1", &["A"], &[]),
            stage("C", "p1", &[], &["A"]),
        ];
        let chain = ChainBuilder::build(&registry(), &stages).unwrap();
        assert_eq!(chain.stage_ids(), vec!["C", "A", "B"]);
    }

    #[test]
    fn test_cross_phase_constraints_ignored() {
        let stages = vec![
            stage("a", "p1", &["z"], &[]),
            stage("z", "p2", &[], &["a"]),
            stage("b", "p1", &["missing"], &[]),
        ];
        let chain = ChainBuilder::build(&registry(), &stages).unwrap();
        assert_eq!(chain.stage_ids(), vec!["a", "b", "z"]);
    }

    #[test]
    fn test_cycle_detected() {
        let stages = vec![
            stage("a", "p1", &["b"], &[]),
            stage("b", "p1", &["a"], &[]),
            stage("c", "p1", &[], &[]),
        ];
        let err = ChainBuilder::build(&registry(), &stages).unwrap_err();
        match err {
            BuildError::CyclicConstraint { phase, stages } => {
                assert_eq!(phase, "p1");
                assert_eq!(stages.first(), stages.last());
                assert!(stages.contains(&"a".to_string()));
                assert!(stages.contains(&"b".to_string()));
                assert!(!stages.contains(&"c".to_string()));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_self_constraint_is_a_cycle() {
        let stages = vec![stage("a", "p1", &["a"], &[]), stage("b", "p1", &[], &[])];
        let err = ChainBuilder::build(&registry(), &stages).unwrap_err();
        assert!(matches!(err, BuildError::CyclicConstraint { .. }));
    }

    #[test]
    fn test_unknown_phase_and_duplicates() {
        let err = ChainBuilder::build(&registry(), &[stage("a", "nope", &[], &[])]).unwrap_err();
        assert!(matches!(err, BuildError::UnknownPhase { .. }));

        let err = ChainBuilder::new(registry())
            .stage(Arc::new(NoOpStage::new("a", "p1")))
            .stage(Arc::new(NoOpStage::new("a", "p2")))
            .finish()
            .unwrap_err();
        assert_eq!(
            err,
            BuildError::DuplicateStage {
                stage: "a".to_string()
            }
        );
    }

    #[test]
    fn test_empty_stage_list() {
        let chain = ChainBuilder::build(&registry(), &[]).unwrap();
        assert!(chain.is_empty());
    }

    #[test]
    fn test_phase_boundaries() {
        let stages = vec![stage("a", "p1", &[], &[]), stage("b", "p1", &[], &[]), stage("c", "p2", &[], &[])];
        let chain = ChainBuilder::build(&registry(), &stages).unwrap();
        assert_eq!(chain.phase_start(1), 2);
        assert_eq!(chain.phase_end(0), 2);
        assert_eq!(chain.phase_end(1), 3);
        assert_eq!(chain.index_of("c"), Some(2));
    }

    #[test]
    fn test_deterministic_across_builds() {
        let stages = vec![
            stage("d", "p1", &[], &[]),
            stage("c", "p1", &["d"], &[]),
            stage("b", "p1", &[], &["d"]),
            stage("a", "p1", &[], &[]),
        ];
        let first = ChainBuilder::build(&registry(), &stages).unwrap();
        let second = ChainBuilder::build(&registry(), &stages).unwrap();
        assert_eq!(first.stage_ids(), second.stage_ids());
        assert_eq!(first.stage_ids(), vec!["b", "d", "c", "a"]);
    }
}
