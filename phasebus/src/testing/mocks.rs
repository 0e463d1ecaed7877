//! Stages for exercising chains in tests.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

use crate::context::MessageContext;
use crate::errors::{Fault, FaultKind};
use crate::stages::{Resumer, Stage, StageOutcome};

/// A shared, ordered log of stage runs.
#[derive(Debug, Clone, Default)]
pub struct Journal {
    entries: Arc<Mutex<Vec<String>>>,
}

impl Journal {
    /// Creates an empty journal.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an entry.
    pub fn record(&self, entry: impl Into<String>) {
        self.entries.lock().push(entry.into());
    }

    /// Returns the entries so far.
    #[must_use]
    pub fn entries(&self) -> Vec<String> {
        self.entries.lock().clone()
    }

    /// Forgets every entry.
    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}

/// A stage that records its id in a [`Journal`] and continues.
#[derive(Debug)]
pub struct RecordingStage {
    id: String,
    phase: String,
    after: Vec<String>,
    before: Vec<String>,
    journal: Journal,
}

impl RecordingStage {
    /// Creates a recording stage.
    #[must_use]
    pub fn new(id: impl Into<String>, phase: impl Into<String>, journal: &Journal) -> Self {
        Self {
            id: id.into(),
            phase: phase.into(),
            after: Vec::new(),
            before: Vec::new(),
            journal: journal.clone(),
        }
    }

    /// Requires this stage to run after `id`.
    #[must_use]
    pub fn after(mut self, id: impl Into<String>) -> Self {
        self.after.push(id.into());
        self
    }

    /// Requires this stage to run before `id`.
    #[must_use]
    pub fn before(mut self, id: impl Into<String>) -> Self {
        self.before.push(id.into());
        self
    }
}

#[async_trait]
impl Stage for RecordingStage {
    fn id(&self) -> &str {
        &self.id
    }

    fn phase(&self) -> &str {
        &self.phase
    }

    fn runs_after(&self) -> &[String] {
        &self.after
    }

    fn runs_before(&self) -> &[String] {
        &self.before
    }

    async fn handle(&self, _ctx: &mut MessageContext) -> StageOutcome {
        self.journal.record(self.id.clone());
        StageOutcome::Continue
    }
}

/// A stage that always faults.
#[derive(Debug, Clone)]
pub struct FailingStage {
    id: String,
    phase: String,
    kind: FaultKind,
    message: String,
}

impl FailingStage {
    /// Creates a stage that faults with `kind`.
    #[must_use]
    pub fn new(id: impl Into<String>, phase: impl Into<String>, kind: FaultKind) -> Self {
        let id = id.into();
        Self {
            message: format!("{id} failed"),
            id,
            phase: phase.into(),
            kind,
        }
    }

    /// Sets the fault message.
    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }
}

#[async_trait]
impl Stage for FailingStage {
    fn id(&self) -> &str {
        &self.id
    }

    fn phase(&self) -> &str {
        &self.phase
    }

    async fn handle(&self, _ctx: &mut MessageContext) -> StageOutcome {
        StageOutcome::Fault(Fault::new(self.kind.clone(), self.message.clone()))
    }
}

/// A stage that sleeps before continuing.
#[derive(Debug, Clone)]
pub struct SlowStage {
    id: String,
    phase: String,
    delay: Duration,
}

impl SlowStage {
    /// Creates a stage that waits `delay`.
    #[must_use]
    pub fn new(id: impl Into<String>, phase: impl Into<String>, delay: Duration) -> Self {
        Self {
            id: id.into(),
            phase: phase.into(),
            delay,
        }
    }
}

#[async_trait]
impl Stage for SlowStage {
    fn id(&self) -> &str {
        &self.id
    }

    fn phase(&self) -> &str {
        &self.phase
    }

    async fn handle(&self, _ctx: &mut MessageContext) -> StageOutcome {
        tokio::time::sleep(self.delay).await;
        StageOutcome::Continue
    }
}

/// A stage that suspends and hands its [`Resumer`] to the test.
#[derive(Debug, Clone)]
pub struct SuspendingStage {
    id: String,
    phase: String,
    resumers: Arc<Mutex<Vec<Resumer>>>,
}

impl SuspendingStage {
    /// Creates a suspending stage.
    #[must_use]
    pub fn new(id: impl Into<String>, phase: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            phase: phase.into(),
            resumers: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Takes the oldest resumer not yet taken.
    #[must_use]
    pub fn take_resumer(&self) -> Option<Resumer> {
        let mut resumers = self.resumers.lock();
        if resumers.is_empty() {
            None
        } else {
            Some(resumers.remove(0))
        }
    }

    /// Returns how many suspensions are waiting to be taken.
    #[must_use]
    pub fn waiting(&self) -> usize {
        self.resumers.lock().len()
    }
}

#[async_trait]
impl Stage for SuspendingStage {
    fn id(&self) -> &str {
        &self.id
    }

    fn phase(&self) -> &str {
        &self.phase
    }

    async fn handle(&self, _ctx: &mut MessageContext) -> StageOutcome {
        let (outcome, resumer) = StageOutcome::suspend();
        self.resumers.lock().push(resumer);
        outcome
    }
}
