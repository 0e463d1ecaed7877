//! Stage trait and implementations.
//!
//! Stages are the units of work a chain is made of. Each stage is bound to a
//! phase and may ask to run after or before named stages of the same phase.

mod actions;
mod outcome;

pub use actions::{ActionCheckStage, FaultResponsePolicy};
pub use outcome::{Resume, Resumer, StageOutcome, Suspension};

use crate::context::MessageContext;
use async_trait::async_trait;
use std::fmt::Debug;

/// Trait for chain stages.
///
/// Stages are shared between chains and between concurrent executions of the
/// same chain, so they must not keep per-message state in `self`.
#[async_trait]
pub trait Stage: Send + Sync + Debug {
    /// Returns the stage id, unique within a chain.
    fn id(&self) -> &str;

    /// Returns the phase the stage belongs to.
    fn phase(&self) -> &str;

    /// Ids of stages in the same phase this stage must run after.
    fn runs_after(&self) -> &[String] {
        &[]
    }

    /// Ids of stages in the same phase this stage must run before.
    fn runs_before(&self) -> &[String] {
        &[]
    }

    /// Handles the message.
    ///
    /// # Arguments
    ///
    /// * `ctx` - The context of the running execution
    ///
    /// # Returns
    ///
    /// Whether to continue, fault, or suspend the chain.
    async fn handle(&self, ctx: &mut MessageContext) -> StageOutcome;
}

/// A stage backed by a synchronous closure.
pub struct FnStage<F>
where
    F: Fn(&mut MessageContext) -> StageOutcome + Send + Sync,
{
    id: String,
    phase: String,
    after: Vec<String>,
    before: Vec<String>,
    func: F,
}

impl<F> FnStage<F>
where
    F: Fn(&mut MessageContext) -> StageOutcome + Send + Sync,
{
    /// Creates a new function-based stage.
    pub fn new(id: impl Into<String>, phase: impl Into<String>, func: F) -> Self {
        Self {
            id: id.into(),
            phase: phase.into(),
            after: Vec::new(),
            before: Vec::new(),
            func,
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

impl<F> Debug for FnStage<F>
where
    F: Fn(&mut MessageContext) -> StageOutcome + Send + Sync,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnStage")
            .field("id", &self.id)
            .field("phase", &self.phase)
            .finish()
    }
}

#[async_trait]
impl<F> Stage for FnStage<F>
where
    F: Fn(&mut MessageContext) -> StageOutcome + Send + Sync,
{
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

    async fn handle(&self, ctx: &mut MessageContext) -> StageOutcome {
        (self.func)(ctx)
    }
}

/// A stage that does nothing.
#[derive(Debug, Clone)]
pub struct NoOpStage {
    id: String,
    phase: String,
}

impl NoOpStage {
    /// Creates a new no-op stage.
    #[must_use]
    pub fn new(id: impl Into<String>, phase: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            phase: phase.into(),
        }
    }
}

#[async_trait]
impl Stage for NoOpStage {
    fn id(&self) -> &str {
        &self.id
    }

    fn phase(&self) -> &str {
        &self.phase
    }

    async fn handle(&self, _ctx: &mut MessageContext) -> StageOutcome {
        StageOutcome::Continue
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{keys, Direction, Exchange, Message};
    use crate::errors::Fault;

    fn test_context() -> MessageContext {
        MessageContext::new(Direction::Outbound, Message::new("hi"), Exchange::client(false))
    }

    #[tokio::test]
    async fn test_fn_stage() {
        let stage = FnStage::new("tag", "setup", |ctx: &mut MessageContext| {
            ctx.insert(keys::OPERATION, "echo".to_string());
            StageOutcome::Continue
        })
        .after("first")
        .before("last");

        assert_eq!(stage.id(), "tag");
        assert_eq!(stage.phase(), "setup");
        assert_eq!(stage.runs_after(), ["first".to_string()]);
        assert_eq!(stage.runs_before(), ["last".to_string()]);

        let mut ctx = test_context();
        assert!(stage.handle(&mut ctx).await.is_continue());
        assert_eq!(ctx.get(keys::OPERATION).map(String::as_str), Some("echo"));
    }

    #[tokio::test]
    async fn test_fn_stage_fault() {
        let stage = FnStage::new("bad", "setup", |_ctx: &mut MessageContext| {
            StageOutcome::Fault(Fault::sender("rejected"))
        });
        let mut ctx = test_context();
        assert!(matches!(stage.handle(&mut ctx).await, StageOutcome::Fault(_)));
    }

    #[tokio::test]
    async fn test_noop_stage() {
        let stage = NoOpStage::new("noop", "send");
        assert_eq!(stage.id(), "noop");
        assert!(stage.runs_after().is_empty());

        let mut ctx = test_context();
        assert!(stage.handle(&mut ctx).await.is_continue());
    }
}
