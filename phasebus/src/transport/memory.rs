//! An in-process transport.

use super::{BackChannel, InboundHandler, Transport};
use crate::errors::TransportError;
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::debug;

/// Delivers messages to handlers registered in the same process.
///
/// Every send runs the destination handler on its own task, after an optional
/// fixed latency, and returns an open back channel with the handler's reply.
/// A handler that returns no reply closes the back channel with `NoResponse`.
#[derive(Default)]
pub struct InMemoryTransport {
    listeners: RwLock<HashMap<String, Arc<dyn InboundHandler>>>,
    latency: Option<Duration>,
    sent: AtomicUsize,
}

impl InMemoryTransport {
    /// Creates a transport with no latency.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Delays every delivery by `latency`.
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Stops listening on an address. Returns false if nothing was listening.
    pub fn unlisten(&self, address: &str) -> bool {
        self.listeners.write().remove(address).is_some()
    }

    /// Returns how many messages were accepted for delivery.
    #[must_use]
    pub fn sent_count(&self) -> usize {
        self.sent.load(Ordering::Relaxed)
    }
}

impl fmt::Debug for InMemoryTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut addresses: Vec<String> = self.listeners.read().keys().cloned().collect();
        addresses.sort();
        f.debug_struct("InMemoryTransport")
            .field("listeners", &addresses)
            .field("latency", &self.latency)
            .field("sent", &self.sent_count())
            .finish()
    }
}

#[async_trait]
impl Transport for InMemoryTransport {
    async fn send(&self, payload: Bytes, destination: &str) -> Result<BackChannel, TransportError> {
        let handler = self
            .listeners
            .read()
            .get(destination)
            .cloned()
            .ok_or_else(|| TransportError::Unreachable {
                address: destination.to_string(),
            })?;

        self.sent.fetch_add(1, Ordering::Relaxed);
        debug!(destination, bytes = payload.len(), "Delivering in-memory message");

        let latency = self.latency;
        let (tx, rx) = oneshot::channel();
        tokio::spawn(async move {
            if let Some(latency) = latency {
                tokio::time::sleep(latency).await;
            }
            let reply = handler.on_message(payload).await;
            let _ = tx.send(reply);
        });

        Ok(BackChannel::open(async move {
            match rx.await {
                Ok(Some(reply)) => Ok(reply),
                Ok(None) | Err(_) => Err(TransportError::NoResponse),
            }
        }))
    }

    async fn listen(
        &self,
        address: &str,
        handler: Arc<dyn InboundHandler>,
    ) -> Result<(), TransportError> {
        let mut listeners = self.listeners.write();
        if listeners.contains_key(address) {
            return Err(TransportError::ListenFailed {
                address: address.to_string(),
                reason: "address already in use".to_string(),
            });
        }
        listeners.insert(address.to_string(), handler);
        debug!(address, "Listening in memory");
        Ok(())
    }
}
