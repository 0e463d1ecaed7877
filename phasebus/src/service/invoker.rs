//! The stage that dispatches a request to its operation.

use super::OperationRegistry;
use crate::context::{keys, MessageContext};
use crate::errors::{Fault, FaultKind};
use crate::phase::names;
use crate::stages::{Stage, StageOutcome};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

/// Runs the operation named by the `OPERATION` property in the invoke phase.
///
/// The request payload is handed to the operation as is; a response is stored
/// under `RESPONSE_BODY` for the response chain. One-way operations mark the
/// exchange one-way.
#[derive(Debug, Clone)]
pub struct InvokerStage {
    operations: Arc<OperationRegistry>,
}

impl InvokerStage {
    /// Creates an invoker over a registry.
    #[must_use]
    pub fn new(operations: Arc<OperationRegistry>) -> Self {
        Self { operations }
    }
}

#[async_trait]
impl Stage for InvokerStage {
    fn id(&self) -> &str {
        "invoker"
    }

    fn phase(&self) -> &str {
        names::INVOKE
    }

    async fn handle(&self, ctx: &mut MessageContext) -> StageOutcome {
        let Some(name) = ctx.get(keys::OPERATION).cloned() else {
            return StageOutcome::Fault(Fault::new(
                FaultKind::UnknownOperation,
                "Request names no operation",
            ));
        };
        let Some(operation) = self.operations.get(&name) else {
            return StageOutcome::Fault(Fault::new(
                FaultKind::UnknownOperation,
                format!("No operation named '{name}'"),
            ));
        };

        if operation.is_one_way() {
            ctx.exchange().set_one_way(true);
        }
        debug!(operation = %name, exchange = %ctx.exchange().id(), "Invoking operation");

        match operation.invoke(ctx.message().payload().clone()).await {
            Ok(Some(body)) => {
                ctx.insert(keys::RESPONSE_BODY, body);
                StageOutcome::Continue
            }
            Ok(None) => StageOutcome::Continue,
            Err(fault) => StageOutcome::Fault(fault),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{Direction, Exchange, Message};
    use bytes::Bytes;
    use pretty_assertions::assert_eq;

    fn invoker() -> InvokerStage {
        let mut ops = OperationRegistry::new();
        ops.register("echo", |v: serde_json::Value| async move { anyhow::Ok(v) })
            .register_one_way("log", |_: serde_json::Value| async move { anyhow::Ok(()) });
        InvokerStage::new(Arc::new(ops))
    }

    fn ctx(operation: Option<&str>, body: &'static str) -> MessageContext {
        let mut message = Message::new(body);
        if let Some(op) = operation {
            message.insert(keys::OPERATION, op.to_string());
        }
        MessageContext::new(Direction::Inbound, message, Exchange::server())
    }

    #[tokio::test]
    async fn test_response_body_stored() {
        let mut ctx = ctx(Some("echo"), r#"{"x":1}"#);
        assert!(invoker().handle(&mut ctx).await.is_continue());
        assert_eq!(
            ctx.get(keys::RESPONSE_BODY),
            Some(&Bytes::from_static(br#"{"x":1}"#))
        );
        assert!(!ctx.exchange().is_one_way());
    }

    #[tokio::test]
    async fn test_one_way_marks_exchange() {
        let mut ctx = ctx(Some("log"), "1");
        assert!(invoker().handle(&mut ctx).await.is_continue());
        assert!(ctx.exchange().is_one_way());
        assert!(ctx.get(keys::RESPONSE_BODY).is_none());
    }

    #[tokio::test]
    async fn test_unknown_or_missing_operation() {
        for operation in [Some("nope"), None] {
            let mut ctx = ctx(operation, "{}");
            match invoker().handle(&mut ctx).await {
                StageOutcome::Fault(fault) => assert_eq!(fault.kind, FaultKind::UnknownOperation),
                other => panic!("expected fault, got {other:?}"),
            }
        }
    }
}
