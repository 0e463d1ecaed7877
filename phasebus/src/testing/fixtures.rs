//! A small JSON envelope codec for end-to-end tests and demos.
//!
//! The envelope carries addressing properties next to the body, so the
//! reader and writer stages can move them between the wire and the
//! message properties.

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::context::{keys, MessageContext};
use crate::correlation::{CorrelationKey, CorrelationKeyExtractor};
use crate::errors::Fault;
use crate::phase::names;
use crate::stages::{Stage, StageOutcome};

/// Wire form of a message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Target operation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation: Option<String>,
    /// Correlation key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation: Option<String>,
    /// Where responses go.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
    /// True when the body is a fault.
    #[serde(default)]
    pub fault: bool,
    /// Security actions applied by the sender.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub actions: Vec<String>,
    /// The message body.
    #[serde(default)]
    pub body: serde_json::Value,
}

impl Envelope {
    /// Encodes the envelope.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn encode(&self) -> Result<Bytes, serde_json::Error> {
        serde_json::to_vec(self).map(Bytes::from)
    }

    /// Decodes an envelope.
    ///
    /// # Errors
    ///
    /// Returns an error if the bytes are not an envelope.
    pub fn decode(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

/// Outbound stage that wraps the payload and addressing properties in an [`Envelope`].
#[derive(Debug, Clone)]
pub struct EnvelopeWriter {
    actions: Vec<String>,
}

impl EnvelopeWriter {
    /// Creates a writer in the write phase.
    #[must_use]
    pub fn new() -> Self {
        Self {
            actions: Vec::new(),
        }
    }

    /// Stamps these security actions on every envelope written.
    #[must_use]
    pub fn with_actions<I, S>(mut self, actions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.actions = actions.into_iter().map(Into::into).collect();
        self
    }
}

impl Default for EnvelopeWriter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Stage for EnvelopeWriter {
    fn id(&self) -> &str {
        "envelope-writer"
    }

    fn phase(&self) -> &str {
        names::WRITE
    }

    async fn handle(&self, ctx: &mut MessageContext) -> StageOutcome {
        let payload = ctx.message().payload();
        let body = serde_json::from_slice(payload)
            .unwrap_or_else(|_| serde_json::Value::String(ctx.message().text()));
        let envelope = Envelope {
            operation: ctx.get(keys::OPERATION).cloned(),
            correlation: ctx.get(keys::CORRELATION_KEY).map(ToString::to_string),
            reply_to: ctx.get(keys::REPLY_TO).cloned(),
            fault: ctx.get(keys::IS_FAULT).copied().unwrap_or(false),
            actions: self.actions.clone(),
            body,
        };
        match envelope.encode() {
            Ok(bytes) => {
                ctx.message_mut().set_payload(bytes);
                StageOutcome::Continue
            }
            Err(e) => StageOutcome::Fault(Fault::receiver("cannot encode envelope").with_cause(e)),
        }
    }
}

/// Inbound stage that unwraps an [`Envelope`] into payload and properties.
#[derive(Debug, Clone, Default)]
pub struct EnvelopeReader;

#[async_trait]
impl Stage for EnvelopeReader {
    fn id(&self) -> &str {
        "envelope-reader"
    }

    fn phase(&self) -> &str {
        names::READ
    }

    async fn handle(&self, ctx: &mut MessageContext) -> StageOutcome {
        let envelope = match Envelope::decode(ctx.message().payload()) {
            Ok(envelope) => envelope,
            Err(e) => {
                return StageOutcome::Fault(Fault::sender("malformed envelope").with_cause(e));
            }
        };
        let body = match serde_json::to_vec(&envelope.body) {
            Ok(body) => body,
            Err(e) => {
                return StageOutcome::Fault(Fault::sender("malformed body").with_cause(e));
            }
        };

        if let Some(operation) = envelope.operation {
            ctx.insert(keys::OPERATION, operation);
        }
        if let Some(key) = envelope.correlation {
            ctx.insert(keys::CORRELATION_KEY, CorrelationKey::new(key));
        }
        if let Some(reply_to) = envelope.reply_to {
            ctx.insert(keys::REPLY_TO, reply_to);
        }
        ctx.insert(keys::IS_FAULT, envelope.fault);
        ctx.insert(keys::RECEIVED_ACTIONS, envelope.actions);
        ctx.message_mut().set_payload(body);
        StageOutcome::Continue
    }
}

/// Extracts the correlation key from raw envelope bytes.
#[must_use]
pub fn envelope_key_extractor() -> Arc<dyn CorrelationKeyExtractor> {
    Arc::new(|payload: &[u8]| {
        Envelope::decode(payload)
            .ok()
            .and_then(|e| e.correlation)
            .map(CorrelationKey::new)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{Direction, Exchange, Message};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[tokio::test]
    async fn test_write_then_read_moves_properties() {
        let mut out = MessageContext::new(
            Direction::Outbound,
            Message::from_json(&json!({"text": "hi"})).unwrap(),
            Exchange::client(false),
        );
        out.insert(keys::OPERATION, "echo".to_string());
        out.insert(keys::CORRELATION_KEY, CorrelationKey::new("k-1"));
        out.insert(keys::REPLY_TO, "mem://client".to_string());
        assert!(EnvelopeWriter::new()
            .with_actions(["Timestamp"])
            .handle(&mut out)
            .await
            .is_continue());

        let raw = out.message().payload().clone();
        assert_eq!(
            envelope_key_extractor().extract(&raw),
            Some(CorrelationKey::new("k-1"))
        );

        let mut inbound = MessageContext::new(Direction::Inbound, Message::new(raw), Exchange::server());
        assert!(EnvelopeReader.handle(&mut inbound).await.is_continue());
        assert_eq!(inbound.get(keys::OPERATION).map(String::as_str), Some("echo"));
        assert_eq!(inbound.get(keys::REPLY_TO).map(String::as_str), Some("mem://client"));
        assert_eq!(inbound.get(keys::RECEIVED_ACTIONS), Some(&vec!["Timestamp".to_string()]));
        assert_eq!(inbound.get(keys::IS_FAULT), Some(&false));
        let body: serde_json::Value = inbound.message().json().unwrap();
        assert_eq!(body, json!({"text": "hi"}));
    }

    #[tokio::test]
    async fn test_reader_rejects_garbage() {
        let mut ctx = MessageContext::new(Direction::Inbound, Message::new("not json"), Exchange::server());
        assert!(matches!(
            EnvelopeReader.handle(&mut ctx).await,
            StageOutcome::Fault(f) if f.kind == crate::errors::FaultKind::Sender
        ));
        assert_eq!(envelope_key_extractor().extract(b"not json"), None);
    }
}
