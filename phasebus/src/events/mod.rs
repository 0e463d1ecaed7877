//! Lifecycle events.
//!
//! Components take an `Arc<dyn EventSink>` at construction and report what
//! happens to chains, pending calls and exchanges. Event names are listed in
//! [`names`].

mod sink;

pub use sink::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};

use std::sync::Arc;

/// Event names.
pub mod names {
    /// A chain ran every stage.
    pub const CHAIN_COMPLETED: &str = "chain.completed";
    /// A stage suspended its chain.
    pub const CHAIN_SUSPENDED: &str = "chain.suspended";
    /// A suspended chain was resumed.
    pub const CHAIN_RESUMED: &str = "chain.resumed";
    /// A stage faulted and the fault chain is about to run.
    pub const STAGE_FAULTED: &str = "stage.faulted";
    /// A fault chain stage faulted in turn.
    pub const FAULT_CHAIN_FAILED: &str = "fault_chain.failed";
    /// A pending call was registered.
    pub const CALL_REGISTERED: &str = "correlation.registered";
    /// A pending call received its response.
    pub const CALL_DELIVERED: &str = "correlation.delivered";
    /// A response arrived for an unknown or finished call.
    pub const CORRELATION_MISS: &str = "correlation.miss";
    /// A pending call's deadline passed.
    pub const CALL_EXPIRED: &str = "correlation.expired";
    /// A pending call was replaced by a newer one with the same key.
    pub const CALL_REPLACED: &str = "correlation.replaced";
    /// A request left through the transport.
    pub const EXCHANGE_SENT: &str = "exchange.sent";
    /// An exchange finished with a response or as one-way.
    pub const EXCHANGE_COMPLETED: &str = "exchange.completed";
    /// An exchange finished with a fault.
    pub const EXCHANGE_FAULTED: &str = "exchange.faulted";
}

/// Returns a sink that discards everything.
#[must_use]
pub fn noop_sink() -> Arc<dyn EventSink> {
    Arc::new(NoOpEventSink)
}
