//! The exchange: one request and its response or fault.

use super::Message;
use crate::correlation::CorrelationKey;
use crate::errors::{ExchangeStateError, Fault};
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use uuid::Uuid;

/// Which side of the conversation an exchange represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// The side that sent the request.
    Client,
    /// The side that received the request.
    Server,
}

/// Lifecycle state of an exchange.
///
/// Client exchanges move `Created -> OutboundRunning -> Sent` and then either
/// to `OneWayDone`, or through `AwaitingResponse -> InboundRunning -> Complete`.
/// Server exchanges move `Created -> InboundRunning` and then either to
/// `OneWayDone`, or through `OutboundRunning -> Sent -> Complete`. Any
/// non-terminal state may move to `Faulted`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExchangeState {
    /// Nothing has run yet.
    Created,
    /// The outbound chain is running.
    OutboundRunning,
    /// The transport accepted the outbound message.
    Sent,
    /// Waiting for a response to arrive.
    AwaitingResponse,
    /// The inbound chain is running.
    InboundRunning,
    /// Finished with a response.
    Complete,
    /// Finished without a response.
    OneWayDone,
    /// Finished with a fault.
    Faulted,
}

impl ExchangeState {
    /// Returns true for states that admit no further transitions.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::OneWayDone | Self::Faulted)
    }

    fn allows(self, role: Role, to: Self) -> bool {
        use ExchangeState::{
            AwaitingResponse, Complete, Created, Faulted, InboundRunning, OneWayDone,
            OutboundRunning, Sent,
        };

        if to == Faulted {
            return !self.is_terminal();
        }
        match role {
            Role::Client => matches!(
                (self, to),
                (Created, OutboundRunning)
                    | (OutboundRunning, Sent)
                    | (Sent, AwaitingResponse | OneWayDone)
                    | (AwaitingResponse, InboundRunning)
                    | (InboundRunning, Complete)
            ),
            Role::Server => matches!(
                (self, to),
                (Created, InboundRunning)
                    | (InboundRunning, OutboundRunning | OneWayDone)
                    | (OutboundRunning, Sent)
                    | (Sent, Complete)
            ),
        }
    }
}

impl fmt::Display for ExchangeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Created => "created",
            Self::OutboundRunning => "outbound_running",
            Self::Sent => "sent",
            Self::AwaitingResponse => "awaiting_response",
            Self::InboundRunning => "inbound_running",
            Self::Complete => "complete",
            Self::OneWayDone => "one_way_done",
            Self::Faulted => "faulted",
        })
    }
}

#[derive(Debug)]
struct Slots {
    state: ExchangeState,
    request: Option<Message>,
    response: Option<Message>,
    fault: Option<Fault>,
}

#[derive(Debug)]
struct ExchangeInner {
    id: Uuid,
    role: Role,
    created_at: DateTime<Utc>,
    one_way: AtomicBool,
    correlation_key: RwLock<Option<CorrelationKey>>,
    slots: Mutex<Slots>,
}

/// Shared handle to an exchange.
///
/// Clones refer to the same exchange. An exchange holds at most one of a
/// response or a fault, and only terminal states are final.
#[derive(Debug, Clone)]
pub struct Exchange {
    inner: Arc<ExchangeInner>,
}

impl Exchange {
    /// Creates an exchange in the `Created` state.
    #[must_use]
    pub fn new(role: Role, one_way: bool) -> Self {
        Self {
            inner: Arc::new(ExchangeInner {
                id: Uuid::new_v4(),
                role,
                created_at: Utc::now(),
                one_way: AtomicBool::new(one_way),
                correlation_key: RwLock::new(None),
                slots: Mutex::new(Slots {
                    state: ExchangeState::Created,
                    request: None,
                    response: None,
                    fault: None,
                }),
            }),
        }
    }

    /// Creates a client-side exchange.
    #[must_use]
    pub fn client(one_way: bool) -> Self {
        Self::new(Role::Client, one_way)
    }

    /// Creates a server-side exchange. Whether it is one-way is decided later
    /// by the operation it resolves to.
    #[must_use]
    pub fn server() -> Self {
        Self::new(Role::Server, false)
    }

    /// Returns the exchange id.
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    /// Returns the role.
    #[must_use]
    pub fn role(&self) -> Role {
        self.inner.role
    }

    /// Returns when the exchange was created.
    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.inner.created_at
    }

    /// Returns true if no response is expected.
    #[must_use]
    pub fn is_one_way(&self) -> bool {
        self.inner.one_way.load(Ordering::Acquire)
    }

    /// Marks the exchange as one-way or not.
    pub fn set_one_way(&self, one_way: bool) {
        self.inner.one_way.store(one_way, Ordering::Release);
    }

    /// Returns the correlation key, if assigned.
    #[must_use]
    pub fn correlation_key(&self) -> Option<CorrelationKey> {
        self.inner.correlation_key.read().clone()
    }

    /// Assigns the correlation key.
    pub fn set_correlation_key(&self, key: CorrelationKey) {
        *self.inner.correlation_key.write() = Some(key);
    }

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> ExchangeState {
        self.inner.slots.lock().state
    }

    /// Moves to a new state.
    ///
    /// # Errors
    ///
    /// Returns an error if the transition is not allowed for this role.
    pub fn transition(&self, to: ExchangeState) -> Result<(), ExchangeStateError> {
        let mut slots = self.inner.slots.lock();
        if !slots.state.allows(self.inner.role, to) {
            return Err(ExchangeStateError {
                from: slots.state,
                to,
            });
        }
        slots.state = to;
        Ok(())
    }

    /// Finishes the exchange with a fault, discarding any response.
    ///
    /// Returns false if the exchange had already finished.
    pub fn fail(&self, fault: Fault) -> bool {
        let mut slots = self.inner.slots.lock();
        if slots.state.is_terminal() {
            return false;
        }
        slots.state = ExchangeState::Faulted;
        slots.response = None;
        slots.fault = Some(fault);
        true
    }

    /// Faults the exchange with `Cancelled` unless it has started processing
    /// its response or has already finished.
    ///
    /// Returns true if the exchange was cancelled.
    pub fn cancel(&self, reason: &str) -> bool {
        let mut slots = self.inner.slots.lock();
        if slots.state.is_terminal() || slots.state == ExchangeState::InboundRunning {
            return false;
        }
        slots.state = ExchangeState::Faulted;
        slots.response = None;
        slots.fault = Some(Fault::cancelled(reason));
        true
    }

    /// Stores the request message.
    pub fn set_request(&self, message: Message) {
        self.inner.slots.lock().request = Some(message);
    }

    /// Returns a copy of the request message.
    #[must_use]
    pub fn request(&self) -> Option<Message> {
        self.inner.slots.lock().request.clone()
    }

    /// Stores the response message.
    ///
    /// Returns false, leaving the exchange untouched, if it already holds a fault.
    pub fn set_response(&self, message: Message) -> bool {
        let mut slots = self.inner.slots.lock();
        if slots.fault.is_some() {
            return false;
        }
        slots.response = Some(message);
        true
    }

    /// Returns a copy of the response message.
    #[must_use]
    pub fn response(&self) -> Option<Message> {
        self.inner.slots.lock().response.clone()
    }

    /// Returns a copy of the fault.
    #[must_use]
    pub fn fault(&self) -> Option<Fault> {
        self.inner.slots.lock().fault.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::FaultKind;

    #[test]
    fn test_client_request_response_path() {
        let ex = Exchange::client(false);
        for state in [
            ExchangeState::OutboundRunning,
            ExchangeState::Sent,
            ExchangeState::AwaitingResponse,
            ExchangeState::InboundRunning,
            ExchangeState::Complete,
        ] {
            ex.transition(state).unwrap();
        }
        assert!(ex.state().is_terminal());
    }

    #[test]
    fn test_client_cannot_skip_sent() {
        let ex = Exchange::client(false);
        ex.transition(ExchangeState::OutboundRunning).unwrap();
        let err = ex.transition(ExchangeState::AwaitingResponse).unwrap_err();
        assert_eq!(err.from, ExchangeState::OutboundRunning);
        assert_eq!(err.to, ExchangeState::AwaitingResponse);
    }

    #[test]
    fn test_server_one_way_path() {
        let ex = Exchange::server();
        ex.transition(ExchangeState::InboundRunning).unwrap();
        ex.set_one_way(true);
        ex.transition(ExchangeState::OneWayDone).unwrap();
        assert!(ex.is_one_way());
        assert!(ex.transition(ExchangeState::Faulted).is_err());
    }

    #[test]
    fn test_fail_clears_response_and_is_final() {
        let ex = Exchange::client(false);
        ex.transition(ExchangeState::OutboundRunning).unwrap();
        assert!(ex.set_response(Message::new("early")));
        assert!(ex.fail(Fault::receiver("boom")));
        assert!(ex.response().is_none());
        assert!(!ex.set_response(Message::new("late")));
        assert!(!ex.fail(Fault::receiver("again")));
        assert_eq!(ex.fault().map(|f| f.message), Some("boom".to_string()));
    }

    #[test]
    fn test_cancel_refused_once_inbound_started() {
        let ex = Exchange::client(false);
        ex.transition(ExchangeState::OutboundRunning).unwrap();
        ex.transition(ExchangeState::Sent).unwrap();
        ex.transition(ExchangeState::AwaitingResponse).unwrap();
        ex.transition(ExchangeState::InboundRunning).unwrap();
        assert!(!ex.cancel("too late"));

        let other = Exchange::client(false);
        assert!(other.cancel("caller gave up"));
        assert_eq!(other.fault().map(|f| f.kind), Some(FaultKind::Cancelled));
    }

    #[test]
    fn test_clones_share_state() {
        let ex = Exchange::client(true);
        let copy = ex.clone();
        copy.set_correlation_key(CorrelationKey::new("k1"));
        assert_eq!(ex.correlation_key(), Some(CorrelationKey::new("k1")));
        assert_eq!(ex.id(), copy.id());
    }
}
