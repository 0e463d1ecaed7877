//! Immutable, ordered chains of stages.

use crate::phase::PhaseRegistry;
use crate::stages::Stage;
use std::fmt;
use std::sync::Arc;

#[derive(Clone)]
pub(crate) struct ChainEntry {
    pub(crate) stage: Arc<dyn Stage>,
    pub(crate) phase_position: usize,
}

/// A fully ordered sequence of stages over one phase registry.
///
/// Stages appear in ascending phase position; within a phase they respect every
/// ordering constraint between stages of that phase. Chains are immutable and
/// may be shared by any number of concurrent executions.
#[derive(Clone)]
pub struct Chain {
    registry: Arc<PhaseRegistry>,
    entries: Vec<ChainEntry>,
}

impl Chain {
    pub(crate) fn from_entries(registry: Arc<PhaseRegistry>, entries: Vec<ChainEntry>) -> Self {
        Self { registry, entries }
    }

    /// Creates a chain with no stages.
    #[must_use]
    pub fn empty(registry: Arc<PhaseRegistry>) -> Self {
        Self::from_entries(registry, Vec::new())
    }

    /// Returns the registry the chain was built over.
    #[must_use]
    pub fn registry(&self) -> &Arc<PhaseRegistry> {
        &self.registry
    }

    /// Returns the number of stages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the chain has no stages.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns the stage at an index.
    #[must_use]
    pub fn stage(&self, index: usize) -> Option<&Arc<dyn Stage>> {
        self.entries.get(index).map(|e| &e.stage)
    }

    /// Returns the stage ids in execution order.
    #[must_use]
    pub fn stage_ids(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.stage.id()).collect()
    }

    /// Returns the index of a stage by id.
    #[must_use]
    pub fn index_of(&self, id: &str) -> Option<usize> {
        self.entries.iter().position(|e| e.stage.id() == id)
    }

    /// Returns the index of the first stage at or after a phase position.
    #[must_use]
    pub fn phase_start(&self, position: usize) -> usize {
        self.entries
            .partition_point(|e| e.phase_position < position)
    }

    /// Returns the index one past the last stage at or before a phase position.
    #[must_use]
    pub fn phase_end(&self, position: usize) -> usize {
        self.entries
            .partition_point(|e| e.phase_position <= position)
    }
}

impl fmt::Debug for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Chain")
            .field("registry", &self.registry.name())
            .field("stages", &self.stage_ids())
            .finish()
    }
}
