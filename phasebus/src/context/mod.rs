//! Messages, exchanges and the per-execution context stages operate on.
//!
//! This module provides:
//! - [`Message`]: a payload with typed [`Properties`]
//! - [`Exchange`]: the shared record of one request and its outcome
//! - [`MessageContext`]: what a running stage sees, including its [`Cursor`]

mod cursor;
mod exchange;
pub mod keys;
mod message;
mod message_context;
mod properties;

pub use cursor::Cursor;
pub use exchange::{Exchange, ExchangeState, Role};
pub use message::{Direction, Message};
pub use message_context::{FaultView, MessageContext};
pub use properties::{Key, Properties};
