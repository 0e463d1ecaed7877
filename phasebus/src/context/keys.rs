//! Well-known message properties.
//!
//! Stages communicate through these keys. Application code is free to declare
//! its own keys; names prefixed with `phasebus.` are reserved.

use super::Key;
use crate::correlation::CorrelationKey;
use crate::stages::FaultResponsePolicy;
use bytes::Bytes;

/// Correlation key linking a request to its response.
pub const CORRELATION_KEY: Key<CorrelationKey> = Key::new("phasebus.correlation_key");

/// Address responses should be sent to (decoupled mode).
pub const REPLY_TO: Key<String> = Key::new("phasebus.reply_to");

/// Address the request is sent to.
pub const DESTINATION: Key<String> = Key::new("phasebus.destination");

/// Name of the operation a request targets.
pub const OPERATION: Key<String> = Key::new("phasebus.operation");

/// Set on inbound messages that carry a fault rather than a normal response.
pub const IS_FAULT: Key<bool> = Key::new("phasebus.is_fault");

/// Security actions found on an inbound message.
pub const RECEIVED_ACTIONS: Key<Vec<String>> = Key::new("phasebus.received_actions");

/// How inbound fault responses are treated by checks that would otherwise reject them.
pub const FAULT_RESPONSE_POLICY: Key<FaultResponsePolicy> =
    Key::new("phasebus.fault_response_policy");

/// Encoded response body produced by an operation.
pub const RESPONSE_BODY: Key<Bytes> = Key::new("phasebus.response_body");
