//! Checks that an inbound message carries the security actions a service requires.

use super::{Stage, StageOutcome};
use crate::context::{keys, MessageContext};
use crate::errors::{Fault, FaultKind};
use crate::phase::names;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::warn;

/// How a requestor treats an inbound fault whose security actions do not match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultResponsePolicy {
    /// Fault responses must satisfy the same checks as normal responses.
    Strict,
    /// Fault responses carrying no security actions at all are accepted with a
    /// warning. Fault responses that carry actions are still checked.
    #[default]
    Lax,
}

/// Compares required actions against [`keys::RECEIVED_ACTIONS`].
///
/// Order does not matter, but every required action must appear as many times
/// as it is required and nothing else may appear.
#[derive(Debug, Clone)]
pub struct ActionCheckStage {
    id: String,
    phase: String,
    required: Vec<String>,
}

impl ActionCheckStage {
    /// Creates a check in the pre-protocol phase.
    #[must_use]
    pub fn new<I, S>(required: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            id: "action-check".to_string(),
            phase: names::PRE_PROTOCOL.to_string(),
            required: required.into_iter().map(Into::into).collect(),
        }
    }

    /// Overrides the stage id.
    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Overrides the phase.
    #[must_use]
    pub fn with_phase(mut self, phase: impl Into<String>) -> Self {
        self.phase = phase.into();
        self
    }

    fn matches(&self, received: &[String]) -> bool {
        if received.len() != self.required.len() {
            return false;
        }
        let mut counts: HashMap<&str, isize> = HashMap::new();
        for action in &self.required {
            *counts.entry(action.as_str()).or_default() += 1;
        }
        for action in received {
            *counts.entry(action.as_str()).or_default() -= 1;
        }
        counts.values().all(|c| *c == 0)
    }
}

#[async_trait]
impl Stage for ActionCheckStage {
    fn id(&self) -> &str {
        &self.id
    }

    fn phase(&self) -> &str {
        &self.phase
    }

    async fn handle(&self, ctx: &mut MessageContext) -> StageOutcome {
        let received = ctx.get(keys::RECEIVED_ACTIONS).cloned().unwrap_or_default();
        if self.matches(&received) {
            return StageOutcome::Continue;
        }

        let is_fault = ctx.get(keys::IS_FAULT).copied().unwrap_or(false);
        let policy = ctx
            .get(keys::FAULT_RESPONSE_POLICY)
            .copied()
            .unwrap_or_default();
        let unsecured_fault = is_fault && received.is_empty();
        if unsecured_fault && ctx.is_requestor() && policy == FaultResponsePolicy::Lax {
            warn!(
                stage = %self.id,
                required = ?self.required,
                received = ?received,
                "Accepting fault response without security actions"
            );
            return StageOutcome::Continue;
        }

        StageOutcome::Fault(Fault::new(
            FaultKind::Security,
            format!(
                "Security processing failed: required actions {:?}, received {:?}",
                self.required, received
            ),
        ))
    }
}
