//! Per-execution position within a chain.

use crate::errors::BuildError;
use crate::pipeline::Chain;
use crate::stages::Stage;
use std::fmt;
use std::sync::Arc;

/// A stage inserted while the chain was running.
struct Inserted {
    /// Base index the stage runs in front of.
    slot: usize,
    /// Phase position used to order insertions sharing a slot.
    rank: usize,
    stage: Arc<dyn Stage>,
}

/// Position of one execution within a shared [`Chain`].
///
/// The chain itself is never modified. Stages added during execution live in
/// an overlay owned by the cursor, so concurrent executions of the same chain
/// never observe each other's insertions.
#[derive(Default)]
pub struct Cursor {
    chain: Option<Arc<Chain>>,
    next: usize,
    overlay: Vec<Inserted>,
    current: Option<Arc<dyn Stage>>,
    inserted_by_current: usize,
    executed: usize,
}

impl Cursor {
    /// Creates a cursor at the start of a chain.
    #[must_use]
    pub fn new(chain: Arc<Chain>) -> Self {
        Self::starting_at(chain, 0)
    }

    /// Creates a cursor that starts at a base index of a chain.
    #[must_use]
    pub fn starting_at(chain: Arc<Chain>, index: usize) -> Self {
        let next = index.min(chain.len());
        Self {
            chain: Some(chain),
            next,
            ..Self::default()
        }
    }

    /// Moves to the next stage and returns it.
    pub(crate) fn advance(&mut self) -> Option<Arc<dyn Stage>> {
        let chain = self.chain.as_ref()?;
        let stage = if self.overlay.first().is_some_and(|e| e.slot <= self.next) {
            self.overlay.remove(0).stage
        } else {
            let stage = chain.stage(self.next)?.clone();
            self.next += 1;
            stage
        };
        self.current = Some(stage.clone());
        self.inserted_by_current = 0;
        self.executed += 1;
        Some(stage)
    }

    /// Inserts a stage to run immediately after the current one.
    ///
    /// Stages inserted this way by the same running stage keep their
    /// insertion order. Ordering constraints of the inserted stage are ignored.
    pub fn insert_next(&mut self, stage: Arc<dyn Stage>) {
        let at = self.inserted_by_current.min(self.overlay.len());
        self.overlay.insert(
            at,
            Inserted {
                slot: self.next,
                rank: 0,
                stage,
            },
        );
        self.inserted_by_current += 1;
    }

    /// Inserts a stage at the end of its phase in the remaining chain.
    ///
    /// If that phase has already been passed, the stage runs next after any
    /// stage queued with [`insert_next`](Self::insert_next).
    ///
    /// # Errors
    ///
    /// Returns `UnknownPhase` if the stage's phase is not in the chain's registry.
    pub fn insert(&mut self, stage: Arc<dyn Stage>) -> Result<(), BuildError> {
        let unknown = || BuildError::UnknownPhase {
            stage: stage.id().to_string(),
            phase: stage.phase().to_string(),
        };
        let chain = self.chain.as_ref().ok_or_else(unknown)?;
        let rank = chain.registry().position(stage.phase()).ok_or_else(unknown)?;
        let slot = chain.phase_end(rank).max(self.next);

        let at = self
            .overlay
            .partition_point(|e| (e.slot, e.rank) <= (slot, rank));
        self.overlay.insert(at, Inserted { slot, rank, stage });
        Ok(())
    }

    /// Re-runs the chain from an already executed base stage.
    ///
    /// Returns false, leaving the cursor unchanged, if no executed base stage
    /// has that id.
    pub fn rewind_to(&mut self, stage_id: &str) -> bool {
        let Some(chain) = self.chain.as_ref() else {
            return false;
        };
        match chain.index_of(stage_id) {
            Some(index) if index < self.next => {
                self.next = index;
                true
            }
            _ => false,
        }
    }

    /// Skips every remaining stage; the chain then completes normally.
    pub fn halt(&mut self) {
        if let Some(chain) = self.chain.as_ref() {
            self.next = chain.len();
        }
        self.overlay.clear();
    }

    /// Returns the stage currently running.
    #[must_use]
    pub fn current(&self) -> Option<&Arc<dyn Stage>> {
        self.current.as_ref()
    }

    /// Returns the id of the stage that would run next.
    #[must_use]
    pub fn peek_next_id(&self) -> Option<&str> {
        if let Some(entry) = self.overlay.first().filter(|e| e.slot <= self.next) {
            return Some(entry.stage.id());
        }
        self.chain.as_ref()?.stage(self.next).map(|s| s.id())
    }

    /// Returns how many stages have run on this cursor.
    #[must_use]
    pub fn executed(&self) -> usize {
        self.executed
    }

    /// Returns how many stages are left, including inserted ones.
    #[must_use]
    pub fn remaining(&self) -> usize {
        let base = self
            .chain
            .as_ref()
            .map_or(0, |c| c.len().saturating_sub(self.next));
        base + self.overlay.len()
    }

    /// Returns the chain being walked.
    #[must_use]
    pub fn chain(&self) -> Option<&Arc<Chain>> {
        self.chain.as_ref()
    }
}

impl fmt::Debug for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cursor")
            .field("next", &self.next)
            .field("inserted", &self.overlay.len())
            .field("current", &self.current.as_ref().map(|s| s.id().to_string()))
            .field("executed", &self.executed)
            .finish()
    }
}
