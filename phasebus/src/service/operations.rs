//! Named operations with typed JSON handlers.

use crate::errors::Fault;
use bytes::Bytes;
use futures::future::BoxFuture;
use futures::FutureExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

type Handler = Arc<dyn Fn(Bytes) -> BoxFuture<'static, Result<Option<Bytes>, Fault>> + Send + Sync>;

/// One registered operation.
#[derive(Clone)]
pub struct Operation {
    name: String,
    one_way: bool,
    handler: Handler,
}

impl Operation {
    /// Returns the operation name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns true if the operation produces no response.
    #[must_use]
    pub fn is_one_way(&self) -> bool {
        self.one_way
    }

    /// Runs the handler over an encoded request.
    ///
    /// Returns the encoded response, or `None` for one-way operations.
    ///
    /// # Errors
    ///
    /// Returns a `Sender` fault if the request does not decode, and a
    /// `Receiver` fault if the handler fails.
    pub async fn invoke(&self, payload: Bytes) -> Result<Option<Bytes>, Fault> {
        (self.handler)(payload).await
    }
}

impl fmt::Debug for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Operation")
            .field("name", &self.name)
            .field("one_way", &self.one_way)
            .finish_non_exhaustive()
    }
}

/// Maps operation names to handlers.
///
/// Handlers take a deserialized request and return `anyhow::Result`; errors
/// become faults at this boundary.
#[derive(Debug, Clone, Default)]
pub struct OperationRegistry {
    operations: HashMap<String, Operation>,
}

impl OperationRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a request/response operation, replacing any with the same name.
    pub fn register<Req, Resp, F, Fut>(&mut self, name: impl Into<String>, handler: F) -> &mut Self
    where
        Req: DeserializeOwned + Send + 'static,
        Resp: Serialize + Send + 'static,
        F: Fn(Req) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Resp>> + Send + 'static,
    {
        let handler = Arc::new(handler);
        self.insert(name.into(), false, move |payload| {
            let handler = handler.clone();
            async move {
                let request = decode::<Req>(&payload)?;
                let response = handler(request)
                    .await
                    .map_err(|err| Fault::receiver(format!("{err:#}")))?;
                let body = serde_json::to_vec(&response).map_err(|err| {
                    Fault::receiver("cannot encode operation response").with_cause(err)
                })?;
                Ok::<_, Fault>(Some(Bytes::from(body)))
            }
            .boxed()
        })
    }

    /// Registers a one-way operation, replacing any with the same name.
    pub fn register_one_way<Req, F, Fut>(&mut self, name: impl Into<String>, handler: F) -> &mut Self
    where
        Req: DeserializeOwned + Send + 'static,
        F: Fn(Req) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let handler = Arc::new(handler);
        self.insert(name.into(), true, move |payload| {
            let handler = handler.clone();
            async move {
                let request = decode::<Req>(&payload)?;
                handler(request)
                    .await
                    .map_err(|err| Fault::receiver(format!("{err:#}")))?;
                Ok::<_, Fault>(None)
            }
            .boxed()
        })
    }

    fn insert<H>(&mut self, name: String, one_way: bool, handler: H) -> &mut Self
    where
        H: Fn(Bytes) -> BoxFuture<'static, Result<Option<Bytes>, Fault>> + Send + Sync + 'static,
    {
        self.operations.insert(
            name.clone(),
            Operation {
                name,
                one_way,
                handler: Arc::new(handler),
            },
        );
        self
    }

    /// Looks up an operation.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Operation> {
        self.operations.get(name)
    }

    /// Returns true if `name` is registered.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.operations.contains_key(name)
    }

    /// Returns the registered names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.operations.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Returns the number of operations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.operations.len()
    }

    /// Returns true if nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }
}

fn decode<T: DeserializeOwned>(payload: &[u8]) -> Result<T, Fault> {
    serde_json::from_slice(payload)
        .map_err(|err| Fault::sender("request does not match the operation").with_cause(err))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::FaultKind;
    use crate::testing::assert_fault_kind;
    use pretty_assertions::assert_eq;
    use serde::Deserialize;

    #[derive(Deserialize)]
    struct Add {
        a: i64,
        b: i64,
    }

    fn registry() -> OperationRegistry {
        let mut ops = OperationRegistry::new();
        ops.register("add", |req: Add| async move { Ok::<_, anyhow::Error>(req.a + req.b) })
            .register("fail", |_: serde_json::Value| async move {
                Err::<(), _>(anyhow::anyhow!("backend down").context("fail"))
            })
            .register_one_way("notify", |_: serde_json::Value| async move { anyhow::Ok(()) });
        ops
    }

    #[tokio::test]
    async fn test_typed_handler() {
        let ops = registry();
        let add = ops.get("add").unwrap();
        assert!(!add.is_one_way());
        let out = add.invoke(Bytes::from_static(br#"{"a": 2, "b": 3}"#)).await.unwrap();
        assert_eq!(out, Some(Bytes::from_static(b"5")));
    }

    #[tokio::test]
    async fn test_bad_request_is_sender_fault() {
        let ops = registry();
        let result = ops.get("add").unwrap().invoke(Bytes::from_static(b"nope")).await;
        assert_fault_kind(&result, &FaultKind::Sender);
    }

    #[tokio::test]
    async fn test_handler_error_is_receiver_fault() {
        let ops = registry();
        let fault = ops
            .get("fail")
            .unwrap()
            .invoke(Bytes::from_static(b"{}"))
            .await
            .unwrap_err();
        assert_eq!(fault.kind, FaultKind::Receiver);
        assert_eq!(fault.message, "fail: backend down");
    }

    #[tokio::test]
    async fn test_one_way_returns_nothing() {
        let ops = registry();
        let notify = ops.get("notify").unwrap();
        assert!(notify.is_one_way());
        assert_eq!(notify.invoke(Bytes::from_static(b"1")).await.unwrap(), None);
        assert_eq!(ops.names(), vec!["add", "fail", "notify"]);
        assert!(!ops.contains("missing"));
    }
}
