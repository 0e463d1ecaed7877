//! The transport seam.
//!
//! A transport moves opaque bytes to an address and, for request/response
//! traffic, hands back whatever the peer writes on the same connection.
//! Chains never see the transport; the invocation layer and the server
//! endpoint call it around chain runs.

mod memory;

pub use memory::InMemoryTransport;

use crate::errors::TransportError;
use async_trait::async_trait;
use bytes::Bytes;
use futures::future::BoxFuture;
use std::fmt;
use std::sync::Arc;

/// The reply side of a sent message.
pub enum BackChannel {
    /// The peer will not reply on this connection.
    Closed,
    /// Resolves with the peer's reply.
    Open(BoxFuture<'static, Result<Bytes, TransportError>>),
}

impl BackChannel {
    /// Wraps a reply future.
    pub fn open<F>(reply: F) -> Self
    where
        F: std::future::Future<Output = Result<Bytes, TransportError>> + Send + 'static,
    {
        Self::Open(Box::pin(reply))
    }

    /// Returns true for `Open`.
    #[must_use]
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Open(_))
    }
}

impl fmt::Debug for BackChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => f.write_str("BackChannel::Closed"),
            Self::Open(_) => f.write_str("BackChannel::Open(..)"),
        }
    }
}

/// Receives messages arriving at a listen address.
#[async_trait]
pub trait InboundHandler: Send + Sync {
    /// Handles one message. A returned payload is written back on the
    /// connection the message arrived on.
    async fn on_message(&self, payload: Bytes) -> Option<Bytes>;
}

/// Moves bytes between addresses.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Transport: Send + Sync {
    /// Sends a payload to `destination`.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload could not be handed to the peer.
    async fn send(&self, payload: Bytes, destination: &str) -> Result<BackChannel, TransportError>;

    /// Starts delivering messages that arrive at `address` to `handler`.
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be listened on.
    async fn listen(
        &self,
        address: &str,
        handler: Arc<dyn InboundHandler>,
    ) -> Result<(), TransportError>;
}
