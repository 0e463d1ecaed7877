//! Routes responses arriving at a decoupled endpoint to their pending calls.

use super::{CorrelationKeyExtractor, Correlator};
use crate::context::Message;
use crate::transport::InboundHandler;
use async_trait::async_trait;
use bytes::Bytes;
use std::fmt;
use std::sync::Arc;
use tracing::warn;

/// Inbound handler for a client's decoupled response address.
///
/// Each message is matched to a pending call by its correlation key. Messages
/// without a key, or with a key nobody is waiting for, are dropped.
pub struct DecoupledListener {
    correlator: Arc<Correlator>,
    extractor: Arc<dyn CorrelationKeyExtractor>,
}

impl DecoupledListener {
    /// Creates a listener over a correlator.
    #[must_use]
    pub fn new(correlator: Arc<Correlator>, extractor: Arc<dyn CorrelationKeyExtractor>) -> Self {
        Self {
            correlator,
            extractor,
        }
    }
}

impl fmt::Debug for DecoupledListener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecoupledListener")
            .field("correlator", &self.correlator)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl InboundHandler for DecoupledListener {
    async fn on_message(&self, payload: Bytes) -> Option<Bytes> {
        match self.extractor.extract(&payload) {
            Some(key) => {
                self.correlator.deliver(&key, Message::new(payload));
            }
            None => warn!(
                bytes = payload.len(),
                "Dropping decoupled message without a correlation key"
            ),
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::correlation::{CallerHandle, CorrelationKey};
    use std::time::{Duration, Instant};

    fn extractor() -> Arc<dyn CorrelationKeyExtractor> {
        Arc::new(|payload: &[u8]| {
            std::str::from_utf8(payload)
                .ok()
                .and_then(|s| s.split(':').next())
                .filter(|k| !k.is_empty())
                .map(CorrelationKey::from)
        })
    }

    #[tokio::test]
    async fn test_routes_by_key() {
        let correlator = Arc::new(Correlator::default());
        let (handle, waiter) = CallerHandle::pair();
        correlator
            .register(
                CorrelationKey::from("k1"),
                handle,
                Instant::now() + Duration::from_secs(5),
            )
            .unwrap();

        let listener = DecoupledListener::new(correlator.clone(), extractor());
        assert!(listener.on_message(Bytes::from_static(b"k1:hello")).await.is_none());
        assert_eq!(waiter.wait().await.unwrap().text(), "k1:hello");
    }

    #[tokio::test]
    async fn test_unmatched_and_keyless_are_dropped() {
        let correlator = Arc::new(Correlator::default());
        let listener = DecoupledListener::new(correlator.clone(), extractor());
        listener.on_message(Bytes::from_static(b"nobody:x")).await;
        listener.on_message(Bytes::from_static(b":x")).await;
        assert_eq!(correlator.misses(), 1);
    }
}
