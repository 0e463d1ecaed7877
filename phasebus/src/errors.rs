//! Error types for the phasebus engine.
//!
//! Build-time problems (`BuildError`) are reported once, while a pipeline is
//! assembled, and prevent any invocation from running. Runtime problems are
//! expressed as a [`Fault`], which is routed through the fault chain of the
//! exchange that raised it and never crosses exchange boundaries.

use crate::context::ExchangeState;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// The main error type for phasebus operations.
#[derive(Debug, Error)]
pub enum PhasebusError {
    /// A pipeline could not be assembled.
    #[error("{0}")]
    Build(#[from] BuildError),

    /// A message fault surfaced to the caller.
    #[error("{0}")]
    Fault(#[from] Fault),

    /// The transport collaborator failed.
    #[error("{0}")]
    Transport(#[from] TransportError),

    /// An exchange was driven through an illegal state transition.
    #[error("{0}")]
    ExchangeState(#[from] ExchangeStateError),

    /// A correlation table operation was refused.
    #[error("{0}")]
    Correlation(#[from] CorrelationError),

    /// Configuration could not be parsed.
    #[error("Configuration error: {0}")]
    Config(#[from] serde_json::Error),

    /// A component was assembled with inconsistent settings.
    #[error("Invalid setup: {0}")]
    InvalidSetup(String),
}

/// Metadata about a build error for better diagnostics.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ContractErrorInfo {
    /// Error code (e.g., "PHASEBUS-BUILD-CYCLE").
    pub code: String,
    /// Short summary of the error.
    pub summary: String,
    /// Hint for fixing the error.
    pub fix_hint: Option<String>,
    /// Additional context key-value pairs.
    #[serde(default)]
    pub context: HashMap<String, String>,
}

impl ContractErrorInfo {
    /// Creates a new contract error info.
    #[must_use]
    pub fn new(code: impl Into<String>, summary: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            summary: summary.into(),
            fix_hint: None,
            context: HashMap::new(),
        }
    }

    /// Sets the fix hint.
    #[must_use]
    pub fn with_fix_hint(mut self, hint: impl Into<String>) -> Self {
        self.fix_hint = Some(hint.into());
        self
    }

    /// Adds a single context entry.
    #[must_use]
    pub fn with_context_entry(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    /// Converts to a dictionary representation.
    #[must_use]
    pub fn to_dict(&self) -> HashMap<String, serde_json::Value> {
        let mut map = HashMap::new();
        map.insert("code".to_string(), serde_json::json!(self.code));
        map.insert("summary".to_string(), serde_json::json!(self.summary));
        if let Some(ref hint) = self.fix_hint {
            map.insert("fix_hint".to_string(), serde_json::json!(hint));
        }
        if !self.context.is_empty() {
            map.insert("context".to_string(), serde_json::json!(self.context));
        }
        map
    }
}

/// Errors raised while assembling phase registries and chains.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BuildError {
    /// Ordering constraints inside one phase form a cycle.
    #[error("Cyclic ordering constraint in phase '{phase}': {}", stages.join(" -> "))]
    CyclicConstraint {
        /// The phase containing the cycle.
        phase: String,
        /// The stages that could not be ordered.
        stages: Vec<String>,
    },

    /// A stage names a phase the registry does not know.
    #[error("Stage '{stage}' is bound to unknown phase '{phase}'")]
    UnknownPhase {
        /// The offending stage.
        stage: String,
        /// The phase it asked for.
        phase: String,
    },

    /// Two stages in one chain share an id.
    #[error("Stage '{stage}' is registered more than once")]
    DuplicateStage {
        /// The duplicated stage id.
        stage: String,
    },

    /// A phase name appears twice in a registry.
    #[error("Phase '{phase}' is declared more than once in registry '{registry}'")]
    DuplicatePhase {
        /// The registry being built.
        registry: String,
        /// The duplicated phase.
        phase: String,
    },

    /// A registry was finalized with no phases.
    #[error("Phase registry '{registry}' has no phases")]
    EmptyRegistry {
        /// The registry being built.
        registry: String,
    },
}

impl BuildError {
    /// Returns structured diagnostics for this error.
    #[must_use]
    pub fn error_info(&self) -> ContractErrorInfo {
        match self {
            Self::CyclicConstraint { phase, stages } => ContractErrorInfo::new(
                "PHASEBUS-BUILD-CYCLE",
                format!("Stages in phase '{phase}' cannot be ordered"),
            )
            .with_fix_hint("Remove one runs_after/runs_before constraint from the cycle.")
            .with_context_entry("phase", phase)
            .with_context_entry("stages", stages.join(",")),
            Self::UnknownPhase { stage, phase } => ContractErrorInfo::new(
                "PHASEBUS-BUILD-UNKNOWN_PHASE",
                format!("Phase '{phase}' is not registered"),
            )
            .with_fix_hint("Bind the stage to one of the registry's phases or add the phase.")
            .with_context_entry("stage", stage)
            .with_context_entry("phase", phase),
            Self::DuplicateStage { stage } => ContractErrorInfo::new(
                "PHASEBUS-BUILD-DUPLICATE_STAGE",
                format!("Stage id '{stage}' is not unique"),
            )
            .with_fix_hint("Give every stage in a chain a distinct id.")
            .with_context_entry("stage", stage),
            Self::DuplicatePhase { registry, phase } => ContractErrorInfo::new(
                "PHASEBUS-BUILD-DUPLICATE_PHASE",
                format!("Phase '{phase}' declared twice"),
            )
            .with_context_entry("registry", registry)
            .with_context_entry("phase", phase),
            Self::EmptyRegistry { registry } => ContractErrorInfo::new(
                "PHASEBUS-BUILD-EMPTY",
                "Cannot build a chain over an empty phase registry",
            )
            .with_fix_hint("Add at least one phase before finalizing the registry.")
            .with_context_entry("registry", registry),
        }
    }
}

/// Classification of a fault.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultKind {
    /// The message sender is at fault (malformed or unacceptable input).
    Sender,
    /// The receiver failed while processing a valid message.
    Receiver,
    /// A send or receive on the transport failed.
    Transport,
    /// A pending call's deadline passed before a response arrived.
    Timeout,
    /// The call was cancelled by the caller.
    Cancelled,
    /// A newer pending call took over this correlation key.
    DuplicateCorrelationKey,
    /// No handler is registered for the requested operation.
    UnknownOperation,
    /// A security check rejected the message.
    Security,
    /// A suspended stage was abandoned without being resumed.
    Abandoned,
}

impl fmt::Display for FaultKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Sender => "sender",
            Self::Receiver => "receiver",
            Self::Transport => "transport",
            Self::Timeout => "timeout",
            Self::Cancelled => "cancelled",
            Self::DuplicateCorrelationKey => "duplicate_correlation_key",
            Self::UnknownOperation => "unknown_operation",
            Self::Security => "security",
            Self::Abandoned => "abandoned",
        };
        f.write_str(name)
    }
}

/// A runtime fault raised by a stage, the transport or the correlator.
#[derive(Debug, Clone, Error)]
#[error("{kind} fault: {message}")]
pub struct Fault {
    /// The fault classification.
    pub kind: FaultKind,
    /// Human readable description.
    pub message: String,
    /// The underlying error, if any.
    #[source]
    pub cause: Option<Arc<dyn std::error::Error + Send + Sync + 'static>>,
    /// The stage that raised the fault.
    pub stage: Option<String>,
    /// The phase the raising stage belongs to.
    pub phase: Option<String>,
}

impl Fault {
    /// Creates a new fault.
    #[must_use]
    pub fn new(kind: FaultKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            cause: None,
            stage: None,
            phase: None,
        }
    }

    /// Creates a receiver-side processing fault.
    #[must_use]
    pub fn receiver(message: impl Into<String>) -> Self {
        Self::new(FaultKind::Receiver, message)
    }

    /// Creates a sender-side fault.
    #[must_use]
    pub fn sender(message: impl Into<String>) -> Self {
        Self::new(FaultKind::Sender, message)
    }

    /// Creates a timeout fault for a correlation key.
    #[must_use]
    pub fn timeout(key: impl fmt::Display) -> Self {
        Self::new(
            FaultKind::Timeout,
            format!("No response for correlation key '{key}' before the deadline"),
        )
    }

    /// Creates a cancellation fault.
    #[must_use]
    pub fn cancelled(reason: impl Into<String>) -> Self {
        Self::new(FaultKind::Cancelled, reason)
    }

    /// Wraps a transport error.
    #[must_use]
    pub fn transport(err: TransportError) -> Self {
        Self::new(FaultKind::Transport, err.to_string()).with_cause(err)
    }

    /// Attaches the underlying error.
    #[must_use]
    pub fn with_cause(mut self, cause: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.cause = Some(Arc::new(cause));
        self
    }

    /// Records where the fault was raised, keeping any location already set.
    #[must_use]
    pub fn raised_at(mut self, stage: &str, phase: &str) -> Self {
        if self.stage.is_none() {
            self.stage = Some(stage.to_string());
            self.phase = Some(phase.to_string());
        }
        self
    }

    /// Returns true if this is a timeout.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        self.kind == FaultKind::Timeout
    }

    /// Encodes the fault as a JSON response body.
    #[must_use]
    pub fn to_payload(&self) -> Bytes {
        let body = FaultBody {
            kind: self.kind.clone(),
            message: self.message.clone(),
        };
        serde_json::to_vec(&body).map_or_else(|_| Bytes::from(self.message.clone()), Bytes::from)
    }

    /// Decodes a fault response body. Bodies that are not encoded faults
    /// become receiver faults carrying the body text.
    #[must_use]
    pub fn from_payload(payload: &[u8]) -> Self {
        match serde_json::from_slice::<FaultBody>(payload) {
            Ok(body) => Self::new(body.kind, body.message),
            Err(_) => Self::receiver(String::from_utf8_lossy(payload)),
        }
    }

    /// Converts to a dictionary representation.
    #[must_use]
    pub fn to_dict(&self) -> HashMap<String, serde_json::Value> {
        let mut map = HashMap::new();
        map.insert("kind".to_string(), serde_json::json!(self.kind));
        map.insert("message".to_string(), serde_json::json!(self.message));
        if let Some(ref stage) = self.stage {
            map.insert("stage".to_string(), serde_json::json!(stage));
        }
        if let Some(ref phase) = self.phase {
            map.insert("phase".to_string(), serde_json::json!(phase));
        }
        if let Some(ref cause) = self.cause {
            map.insert("cause".to_string(), serde_json::json!(cause.to_string()));
        }
        map
    }
}

#[derive(Serialize, Deserialize)]
struct FaultBody {
    kind: FaultKind,
    message: String,
}

impl PartialEq for Fault {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind
            && self.message == other.message
            && self.stage == other.stage
            && self.phase == other.phase
    }
}

/// Errors reported by a transport collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// Nothing is listening at the destination.
    #[error("No listener at '{address}'")]
    Unreachable {
        /// The destination address.
        address: String,
    },

    /// The connection closed before a response was read.
    #[error("Connection closed before a response was received")]
    NoResponse,

    /// A listener could not be started.
    #[error("Cannot listen on '{address}': {reason}")]
    ListenFailed {
        /// The listen address.
        address: String,
        /// Why it failed.
        reason: String,
    },

    /// Any other I/O failure.
    #[error("Transport I/O error: {0}")]
    Io(String),
}

/// An illegal exchange state transition.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Exchange cannot move from {from} to {to}")]
pub struct ExchangeStateError {
    /// The state the exchange was in.
    pub from: ExchangeState,
    /// The requested state.
    pub to: ExchangeState,
}

impl From<ExchangeStateError> for Fault {
    fn from(err: ExchangeStateError) -> Self {
        Self::receiver(err.to_string()).with_cause(err)
    }
}

/// Errors from the pending call table.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CorrelationError {
    /// A pending call already holds this key and the policy refuses replacement.
    #[error("Correlation key '{key}' already has a pending call")]
    DuplicateKey {
        /// The contested key.
        key: String,
    },
}

/// Outcome of waiting on an asynchronous response handle.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum WaitError {
    /// The wait elapsed before the call finished; the call is still in flight.
    #[error("Response not ready yet")]
    NotReady,

    /// The handle was cancelled by the caller.
    #[error("Call was cancelled")]
    Cancelled,

    /// The call finished with a fault.
    #[error("{0}")]
    Fault(Fault),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cyclic_constraint_display() {
        let err = BuildError::CyclicConstraint {
            phase: "invoke".to_string(),
            stages: vec!["a".to_string(), "b".to_string()],
        };
        assert!(err.to_string().contains("a -> b"));
        assert_eq!(err.error_info().code, "PHASEBUS-BUILD-CYCLE");
    }

    #[test]
    fn test_error_info_to_dict() {
        let info = BuildError::UnknownPhase {
            stage: "wss".to_string(),
            phase: "nope".to_string(),
        }
        .error_info();

        let dict = info.to_dict();
        assert_eq!(dict.get("code").unwrap(), "PHASEBUS-BUILD-UNKNOWN_PHASE");
        assert!(dict.contains_key("fix_hint"));
    }

    #[test]
    fn test_fault_raised_at_keeps_first_location() {
        let fault = Fault::receiver("boom")
            .raised_at("first", "read")
            .raised_at("second", "send");
        assert_eq!(fault.stage.as_deref(), Some("first"));
        assert_eq!(fault.phase.as_deref(), Some("read"));
    }

    #[test]
    fn test_fault_with_cause() {
        let fault = Fault::transport(TransportError::NoResponse);
        assert_eq!(fault.kind, FaultKind::Transport);
        assert!(std::error::Error::source(&fault).is_some());
        assert!(fault.to_dict().contains_key("cause"));
    }

    #[test]
    fn test_fault_payload() {
        let fault = Fault::new(FaultKind::UnknownOperation, "no handler for 'x'");
        let decoded = Fault::from_payload(&fault.to_payload());
        assert_eq!(decoded, fault);

        let plain = Fault::from_payload(b"plain text");
        assert_eq!(plain.kind, FaultKind::Receiver);
        assert_eq!(plain.message, "plain text");
    }

    #[test]
    fn test_fault_kind_serialize() {
        let json = serde_json::to_string(&FaultKind::DuplicateCorrelationKey).unwrap();
        assert_eq!(json, r#""duplicate_correlation_key""#);
    }
}
