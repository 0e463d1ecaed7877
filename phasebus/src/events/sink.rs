//! Event sink trait and implementations.

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use tracing::{debug, info, Level};

/// Receives lifecycle events from chains, the correlator and the invocation layer.
///
/// Sinks are handed to components explicitly; there is no process-wide sink.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Emits an event asynchronously.
    ///
    /// # Arguments
    ///
    /// * `name` - The event name (e.g., "chain.suspended")
    /// * `data` - Optional event data
    async fn emit(&self, name: &str, data: Option<Value>);

    /// Emits an event without waiting.
    ///
    /// Must never fail or block for long; errors are swallowed.
    fn try_emit(&self, name: &str, data: Option<Value>);
}

/// A sink that discards all events.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpEventSink;

#[async_trait]
impl EventSink for NoOpEventSink {
    async fn emit(&self, _name: &str, _data: Option<Value>) {}

    fn try_emit(&self, _name: &str, _data: Option<Value>) {}
}

/// A sink that writes events to the `tracing` subscriber.
#[derive(Debug, Clone)]
pub struct LoggingEventSink {
    level: Level,
}

impl Default for LoggingEventSink {
    fn default() -> Self {
        Self { level: Level::INFO }
    }
}

impl LoggingEventSink {
    /// Creates a sink that logs at `level`. Levels other than DEBUG log at INFO.
    #[must_use]
    pub fn new(level: Level) -> Self {
        Self { level }
    }

    /// Creates a debug-level sink.
    #[must_use]
    pub fn debug() -> Self {
        Self::new(Level::DEBUG)
    }

    fn log_event(&self, name: &str, data: Option<&Value>) {
        if self.level == Level::DEBUG {
            debug!(event = %name, data = ?data, "phasebus event");
        } else {
            info!(event = %name, data = ?data, "phasebus event");
        }
    }
}

#[async_trait]
impl EventSink for LoggingEventSink {
    async fn emit(&self, name: &str, data: Option<Value>) {
        self.log_event(name, data.as_ref());
    }

    fn try_emit(&self, name: &str, data: Option<Value>) {
        self.log_event(name, data.as_ref());
    }
}

/// A sink that keeps every event in memory, for tests and diagnostics.
#[derive(Debug, Default)]
pub struct CollectingEventSink {
    events: RwLock<Vec<(String, Option<Value>)>>,
}

impl CollectingEventSink {
    /// Creates an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns all collected events.
    #[must_use]
    pub fn events(&self) -> Vec<(String, Option<Value>)> {
        self.events.read().clone()
    }

    /// Returns the collected event names in order.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.events.read().iter().map(|(n, _)| n.clone()).collect()
    }

    /// Returns how many events with this exact name were collected.
    #[must_use]
    pub fn count(&self, name: &str) -> usize {
        self.events.read().iter().filter(|(n, _)| n == name).count()
    }

    /// Returns events whose name starts with `prefix`.
    #[must_use]
    pub fn events_with_prefix(&self, prefix: &str) -> Vec<(String, Option<Value>)> {
        self.events
            .read()
            .iter()
            .filter(|(n, _)| n.starts_with(prefix))
            .cloned()
            .collect()
    }

    /// Returns the number of collected events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    /// Returns true if nothing was collected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }

    /// Forgets all collected events.
    pub fn clear(&self) {
        self.events.write().clear();
    }
}

#[async_trait]
impl EventSink for CollectingEventSink {
    async fn emit(&self, name: &str, data: Option<Value>) {
        self.try_emit(name, data);
    }

    fn try_emit(&self, name: &str, data: Option<Value>) {
        self.events.write().push((name.to_string(), data));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_noop_and_logging_sinks() {
        NoOpEventSink.emit("x", None).await;
        NoOpEventSink.try_emit("x", Some(json!({"a": 1})));

        let sink = LoggingEventSink::debug();
        sink.emit("chain.completed", Some(json!({"stages": 3}))).await;
        sink.try_emit("chain.completed", None);
    }

    #[tokio::test]
    async fn test_collecting_sink() {
        let sink = CollectingEventSink::new();
        assert!(sink.is_empty());

        sink.emit("chain.suspended", None).await;
        sink.try_emit("chain.resumed", Some(json!({"stage": "s"})));
        sink.try_emit("correlation.miss", None);

        assert_eq!(sink.len(), 3);
        assert_eq!(sink.names()[1], "chain.resumed");
        assert_eq!(sink.events_with_prefix("chain.").len(), 2);
        assert_eq!(sink.count("correlation.miss"), 1);

        sink.clear();
        assert!(sink.is_empty());
    }
}
