//! Chain execution.
//!
//! The executor drives a [`MessageContext`] through a chain one stage at a
//! time. A faulting stage stops the chain and hands the context to the fault
//! chain, entered at the faulting phase. A suspending stage turns the run into
//! a [`Continuation`] that can be resumed later, on any task.

use super::Chain;
use crate::context::{Cursor, MessageContext};
use crate::errors::Fault;
use crate::events::{names, EventSink, NoOpEventSink};
use crate::stages::{Resume, StageOutcome, Suspension};
use serde_json::json;
use std::fmt;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

/// A main chain paired with the fault chain that handles its faults.
#[derive(Debug, Clone)]
pub struct ChainPlan {
    main: Arc<Chain>,
    on_fault: Arc<Chain>,
}

impl ChainPlan {
    /// Pairs a chain with its fault chain.
    #[must_use]
    pub fn new(main: Arc<Chain>, on_fault: Arc<Chain>) -> Self {
        Self { main, on_fault }
    }

    /// Returns the main chain.
    #[must_use]
    pub fn main(&self) -> &Arc<Chain> {
        &self.main
    }

    /// Returns the fault chain.
    #[must_use]
    pub fn on_fault(&self) -> &Arc<Chain> {
        &self.on_fault
    }
}

/// A chain run that ended in a fault, after the fault chain ran.
#[derive(Debug)]
pub struct FaultedChain {
    /// The fault raised by the main chain.
    pub fault: Fault,
    /// The context as left by the fault chain.
    pub context: MessageContext,
}

/// How a call to [`ChainExecutor::run`] ended.
#[derive(Debug)]
pub enum ChainOutcome {
    /// Every stage continued.
    Completed(MessageContext),
    /// A stage faulted; the fault chain has already run.
    Faulted(FaultedChain),
    /// A stage suspended; nothing after it has run.
    Suspended(Continuation),
}

impl ChainOutcome {
    /// Returns true for `Completed`.
    #[must_use]
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed(_))
    }

    /// Returns the fault for `Faulted`.
    #[must_use]
    pub fn fault(&self) -> Option<&Fault> {
        match self {
            Self::Faulted(faulted) => Some(&faulted.fault),
            _ => None,
        }
    }
}

/// A suspended chain run, resumable exactly once.
pub struct Continuation {
    plan: ChainPlan,
    context: MessageContext,
    suspension: Suspension,
    stage: String,
    phase: String,
}

impl Continuation {
    /// Returns the parked context.
    #[must_use]
    pub fn context(&self) -> &MessageContext {
        &self.context
    }

    /// Returns the id of the stage that suspended.
    #[must_use]
    pub fn stage(&self) -> &str {
        &self.stage
    }

    /// Waits for the resumer and continues the run.
    pub async fn resume(self, executor: &ChainExecutor) -> ChainOutcome {
        executor.resume(self).await
    }
}

impl fmt::Debug for Continuation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Continuation")
            .field("stage", &self.stage)
            .field("phase", &self.phase)
            .field("cursor", self.context.cursor())
            .finish_non_exhaustive()
    }
}

/// Runs chains.
#[derive(Clone)]
pub struct ChainExecutor {
    events: Arc<dyn EventSink>,
}

impl Default for ChainExecutor {
    fn default() -> Self {
        Self::new(Arc::new(NoOpEventSink))
    }
}

impl fmt::Debug for ChainExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChainExecutor").finish_non_exhaustive()
    }
}

impl ChainExecutor {
    /// Creates an executor that reports to `events`.
    #[must_use]
    pub fn new(events: Arc<dyn EventSink>) -> Self {
        Self { events }
    }

    /// Runs the main chain from its first stage.
    ///
    /// Returns when the chain completes, faults, or suspends.
    pub async fn run(&self, plan: &ChainPlan, mut ctx: MessageContext) -> ChainOutcome {
        ctx.set_cursor(Cursor::new(plan.main.clone()));
        self.drive(plan, ctx).await
    }

    /// Runs the main chain, waiting out every suspension inline.
    ///
    /// # Errors
    ///
    /// Returns the faulted run if any stage faulted.
    pub async fn run_to_end(
        &self,
        plan: &ChainPlan,
        ctx: MessageContext,
    ) -> Result<MessageContext, FaultedChain> {
        let mut outcome = self.run(plan, ctx).await;
        loop {
            match outcome {
                ChainOutcome::Completed(ctx) => return Ok(ctx),
                ChainOutcome::Faulted(faulted) => return Err(faulted),
                ChainOutcome::Suspended(continuation) => {
                    outcome = self.resume(continuation).await;
                }
            }
        }
    }

    /// Waits for a continuation's resumer and carries on from the next stage.
    pub async fn resume(&self, continuation: Continuation) -> ChainOutcome {
        let Continuation {
            plan,
            context,
            suspension,
            stage,
            phase,
        } = continuation;

        match suspension.wait().await {
            Resume::Continue => {
                self.events.try_emit(
                    names::CHAIN_RESUMED,
                    Some(json!({ "stage": stage, "exchange": context.exchange().id() })),
                );
                self.drive(&plan, context).await
            }
            Resume::Fault(fault) => {
                let fault = fault.raised_at(&stage, &phase);
                ChainOutcome::Faulted(self.run_fault_chain(&plan, context, fault).await)
            }
        }
    }

    /// Resumes a continuation on a new task and passes the outcome to `on_done`.
    pub fn park<F>(&self, continuation: Continuation, on_done: F) -> JoinHandle<()>
    where
        F: FnOnce(ChainOutcome) + Send + 'static,
    {
        let executor = self.clone();
        tokio::spawn(async move {
            let outcome = executor.resume(continuation).await;
            on_done(outcome);
        })
    }

    /// Runs the fault chain for a fault raised outside any stage, such as a
    /// transport failure. The fault's phase selects where the fault chain starts.
    pub async fn run_fault_chain(
        &self,
        plan: &ChainPlan,
        ctx: MessageContext,
        fault: Fault,
    ) -> FaultedChain {
        warn!(
            kind = %fault.kind,
            stage = fault.stage.as_deref().unwrap_or("-"),
            phase = fault.phase.as_deref().unwrap_or("-"),
            "Running fault chain: {}",
            fault.message
        );
        self.events.try_emit(
            names::STAGE_FAULTED,
            Some(json!({
                "exchange": ctx.exchange().id(),
                "fault": fault.to_dict(),
            })),
        );

        let chain = &plan.on_fault;
        let start = fault
            .phase
            .as_deref()
            .and_then(|p| chain.registry().position(p))
            .map_or(0, |position| chain.phase_start(position));

        let mut ctx = MessageContext::for_fault(ctx, fault.clone());
        ctx.set_cursor(Cursor::starting_at(chain.clone(), start));

        while let Some(stage) = ctx.cursor_mut().advance() {
            let secondary = match stage.handle(&mut ctx).await {
                StageOutcome::Continue => continue,
                StageOutcome::Fault(f) => f,
                StageOutcome::Suspend(suspension) => match suspension.wait().await {
                    Resume::Continue => continue,
                    Resume::Fault(f) => f,
                },
            };
            error!(
                stage = stage.id(),
                original = %fault,
                "Fault chain stage faulted, abandoning fault chain: {secondary}"
            );
            self.events.try_emit(
                names::FAULT_CHAIN_FAILED,
                Some(json!({ "stage": stage.id(), "fault": secondary.to_dict() })),
            );
            break;
        }

        FaultedChain {
            fault,
            context: ctx,
        }
    }

    async fn drive(&self, plan: &ChainPlan, mut ctx: MessageContext) -> ChainOutcome {
        while let Some(stage) = ctx.cursor_mut().advance() {
            match stage.handle(&mut ctx).await {
                StageOutcome::Continue => {}
                StageOutcome::Fault(fault) => {
                    let fault = fault.raised_at(stage.id(), stage.phase());
                    return ChainOutcome::Faulted(self.run_fault_chain(plan, ctx, fault).await);
                }
                StageOutcome::Suspend(suspension) => {
                    debug!(stage = stage.id(), "Chain suspended");
                    self.events.try_emit(
                        names::CHAIN_SUSPENDED,
                        Some(json!({ "stage": stage.id(), "exchange": ctx.exchange().id() })),
                    );
                    return ChainOutcome::Suspended(Continuation {
                        plan: plan.clone(),
                        context: ctx,
                        suspension,
                        stage: stage.id().to_string(),
                        phase: stage.phase().to_string(),
                    });
                }
            }
        }

        self.events.try_emit(
            names::CHAIN_COMPLETED,
            Some(json!({
                "exchange": ctx.exchange().id(),
                "direction": ctx.direction(),
                "stages": ctx.cursor().executed(),
            })),
        );
        ChainOutcome::Completed(ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{Direction, Exchange, Message};
    use crate::errors::FaultKind;
    use crate::events::CollectingEventSink;
    use crate::phase::PhaseRegistry;
    use crate::pipeline::ChainBuilder;
    use crate::stages::{FnStage, Resumer, Stage};
    use crate::testing::{FailingStage, Journal, RecordingStage};
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;

    fn registry() -> Arc<PhaseRegistry> {
        Arc::new(PhaseRegistry::from_names("test", ["p1", "p2", "p3"]).unwrap())
    }

    fn plan(main: Vec<Arc<dyn Stage>>, on_fault: Vec<Arc<dyn Stage>>) -> ChainPlan {
        let registry = registry();
        ChainPlan::new(
            Arc::new(ChainBuilder::build(&registry, &main).unwrap()),
            Arc::new(ChainBuilder::build(&registry, &on_fault).unwrap()),
        )
    }

    fn context() -> MessageContext {
        MessageContext::new(Direction::Outbound, Message::new("m"), Exchange::client(false))
    }

    #[tokio::test]
    async fn test_runs_in_chain_order() {
        let journal = Journal::new();
        let plan = plan(
            vec![
                Arc::new(RecordingStage::new("b", "p2", &journal)),
                Arc::new(RecordingStage::new("a", "p1", &journal)),
            ],
            vec![],
        );
        let outcome = ChainExecutor::default().run(&plan, context()).await;
        assert!(outcome.is_completed());
        assert_eq!(journal.entries(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_fault_stops_chain_and_enters_fault_chain_at_phase() {
        let journal = Journal::new();
        let plan = plan(
            vec![
                Arc::new(RecordingStage::new("a", "p1", &journal)),
                Arc::new(FailingStage::new("boom", "p2", FaultKind::Receiver)),
                Arc::new(RecordingStage::new("c", "p3", &journal)),
            ],
            vec![
                Arc::new(RecordingStage::new("f1", "p1", &journal)),
                Arc::new(RecordingStage::new("f2", "p2", &journal)),
                Arc::new(RecordingStage::new("f3", "p3", &journal)),
            ],
        );
        let outcome = ChainExecutor::default().run(&plan, context()).await;
        let ChainOutcome::Faulted(faulted) = outcome else {
            panic!("expected fault");
        };
        assert_eq!(faulted.fault.stage.as_deref(), Some("boom"));
        assert_eq!(faulted.fault.phase.as_deref(), Some("p2"));
        assert_eq!(faulted.context.direction(), Direction::Fault);
        assert_eq!(journal.entries(), vec!["a", "f2", "f3"]);
    }

    #[tokio::test]
    async fn test_fault_at_each_position_skips_the_rest() {
        let ids = ["s0", "s1", "s2", "s3"];
        for position in 0..=ids.len() {
            let journal = Journal::new();
            let mut main: Vec<Arc<dyn Stage>> = ids
                .iter()
                .map(|id| Arc::new(RecordingStage::new(*id, "p2", &journal)) as Arc<dyn Stage>)
                .collect();
            main.insert(
                position,
                Arc::new(FailingStage::new("boom", "p2", FaultKind::Receiver)),
            );
            let plan = plan(
                main,
                vec![Arc::new(RecordingStage::new("cleanup", "p2", &journal))],
            );

            let outcome = ChainExecutor::default().run(&plan, context()).await;
            assert_eq!(outcome.fault().and_then(|f| f.stage.clone()).as_deref(), Some("boom"));

            let mut expected: Vec<&str> = ids[..position].to_vec();
            expected.push("cleanup");
            assert_eq!(journal.entries(), expected, "fault at position {position}");
        }
    }

    #[tokio::test]
    async fn test_fault_in_fault_chain_stops_it() {
        let journal = Journal::new();
        let events = Arc::new(CollectingEventSink::new());
        let plan = plan(
            vec![Arc::new(FailingStage::new("boom", "p1", FaultKind::Sender))],
            vec![
                Arc::new(FailingStage::new("f1", "p1", FaultKind::Receiver)),
                Arc::new(RecordingStage::new("f2", "p2", &journal)),
            ],
        );
        let outcome = ChainExecutor::new(events.clone()).run(&plan, context()).await;
        assert_eq!(outcome.fault().map(|f| f.kind.clone()), Some(FaultKind::Sender));
        assert!(journal.entries().is_empty());
        assert_eq!(events.count(names::FAULT_CHAIN_FAILED), 1);
    }

    #[tokio::test]
    async fn test_suspend_and_resume_continues_after_stage() {
        let journal = Journal::new();
        let resumers: Arc<Mutex<Vec<Resumer>>> = Arc::new(Mutex::new(Vec::new()));
        let slot = resumers.clone();
        let suspender = FnStage::new("wait", "p2", move |_ctx: &mut MessageContext| {
            let (outcome, resumer) = StageOutcome::suspend();
            slot.lock().push(resumer);
            outcome
        });
        let plan = plan(
            vec![
                Arc::new(RecordingStage::new("a", "p1", &journal)),
                Arc::new(suspender),
                Arc::new(RecordingStage::new("c", "p3", &journal)),
            ],
            vec![],
        );

        let executor = ChainExecutor::default();
        let ChainOutcome::Suspended(continuation) = executor.run(&plan, context()).await else {
            panic!("expected suspension");
        };
        assert_eq!(continuation.stage(), "wait");
        assert_eq!(journal.entries(), vec!["a"]);

        let resumer = resumers.lock().pop().unwrap();
        std::thread::spawn(move || resumer.resume());

        let outcome = continuation.resume(&executor).await;
        assert!(outcome.is_completed());
        assert_eq!(journal.entries(), vec!["a", "c"]);
    }

    #[tokio::test]
    async fn test_resume_with_fault_runs_fault_chain() {
        let journal = Journal::new();
        let resumers: Arc<Mutex<Vec<Resumer>>> = Arc::new(Mutex::new(Vec::new()));
        let slot = resumers.clone();
        let suspender = FnStage::new("wait", "p1", move |_ctx: &mut MessageContext| {
            let (outcome, resumer) = StageOutcome::suspend();
            slot.lock().push(resumer);
            outcome
        });
        let plan = plan(
            vec![Arc::new(suspender), Arc::new(RecordingStage::new("c", "p3", &journal))],
            vec![Arc::new(RecordingStage::new("f", "p1", &journal))],
        );

        let executor = ChainExecutor::default();
        let ChainOutcome::Suspended(continuation) = executor.run(&plan, context()).await else {
            panic!("expected suspension");
        };
        let (tx, rx) = tokio::sync::oneshot::channel();
        executor.park(continuation, move |outcome| {
            let _ = tx.send(outcome.fault().cloned());
        });
        resumers.lock().pop().unwrap().fail(Fault::receiver("async failure"));

        let fault = rx.await.unwrap().unwrap();
        assert_eq!(fault.stage.as_deref(), Some("wait"));
        assert_eq!(journal.entries(), vec!["f"]);
    }

    #[tokio::test]
    async fn test_run_to_end_waits_through_suspensions() {
        let journal = Journal::new();
        let suspender = FnStage::new("wait", "p1", |_ctx: &mut MessageContext| {
            let (outcome, resumer) = StageOutcome::suspend();
            tokio::spawn(async move {
                tokio::task::yield_now().await;
                resumer.resume();
            });
            outcome
        });
        let plan = plan(
            vec![Arc::new(suspender), Arc::new(RecordingStage::new("c", "p2", &journal))],
            vec![],
        );
        let ctx = ChainExecutor::default().run_to_end(&plan, context()).await.unwrap();
        assert_eq!(ctx.cursor().executed(), 2);
        assert_eq!(journal.entries(), vec!["c"]);
    }

    #[tokio::test]
    async fn test_stage_inserted_mid_chain_runs_once() {
        let journal = Journal::new();
        let late = Arc::new(RecordingStage::new("late", "p3", &journal)) as Arc<dyn Stage>;
        let inserter = FnStage::new("inserter", "p1", move |ctx: &mut MessageContext| {
            match ctx.cursor_mut().insert(late.clone()) {
                Ok(()) => StageOutcome::Continue,
                Err(e) => StageOutcome::Fault(Fault::receiver(e.to_string())),
            }
        });
        let plan = plan(
            vec![Arc::new(inserter), Arc::new(RecordingStage::new("b", "p2", &journal))],
            vec![],
        );
        let executor = ChainExecutor::default();
        executor.run(&plan, context()).await;
        assert_eq!(journal.entries(), vec!["b", "late"]);

        // The shared chain is untouched by the previous run's insertion.
        assert_eq!(plan.main().stage_ids(), vec!["inserter", "b"]);
    }

    #[tokio::test]
    async fn test_transport_fault_enters_at_its_phase() {
        let journal = Journal::new();
        let plan = plan(
            vec![],
            vec![
                Arc::new(RecordingStage::new("f1", "p1", &journal)),
                Arc::new(RecordingStage::new("f3", "p3", &journal)),
            ],
        );
        let fault = Fault::receiver("wire").raised_at("transport", "p3");
        let faulted = ChainExecutor::default()
            .run_fault_chain(&plan, context(), fault)
            .await;
        assert_eq!(faulted.context.fault().and_then(|v| v.phase()), Some("p3"));
        assert_eq!(journal.entries(), vec!["f3"]);
    }
}
