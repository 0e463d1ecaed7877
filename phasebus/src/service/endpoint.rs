//! The responding side: receives requests, invokes operations, and replies.

use super::{InvokerStage, OperationRegistry};
use crate::bus::Bus;
use crate::context::{keys, Direction, Exchange, ExchangeState, Message, MessageContext};
use crate::errors::{BuildError, Fault, TransportError};
use crate::events::{names, EventSink};
use crate::pipeline::{ChainExecutor, ChainPlan, FaultedChain};
use crate::stages::Stage;
use crate::transport::{InboundHandler, Transport};
use async_trait::async_trait;
use bytes::Bytes;
use serde_json::json;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Assembles an [`Endpoint`].
pub struct EndpointBuilder<'a> {
    bus: &'a Bus,
    transport: Arc<dyn Transport>,
    operations: OperationRegistry,
    inbound: Vec<Arc<dyn Stage>>,
    inbound_fault: Vec<Arc<dyn Stage>>,
    outbound: Vec<Arc<dyn Stage>>,
    outbound_fault: Vec<Arc<dyn Stage>>,
}

impl<'a> EndpointBuilder<'a> {
    /// Starts a builder.
    #[must_use]
    pub fn new(bus: &'a Bus, transport: Arc<dyn Transport>) -> Self {
        Self {
            bus,
            transport,
            operations: OperationRegistry::new(),
            inbound: Vec::new(),
            inbound_fault: Vec::new(),
            outbound: Vec::new(),
            outbound_fault: Vec::new(),
        }
    }

    /// Sets the operations requests are dispatched to.
    #[must_use]
    pub fn operations(mut self, operations: OperationRegistry) -> Self {
        self.operations = operations;
        self
    }

    /// Adds a stage to the request chain.
    #[must_use]
    pub fn inbound(mut self, stage: Arc<dyn Stage>) -> Self {
        self.inbound.push(stage);
        self
    }

    /// Adds a stage to the request fault chain.
    #[must_use]
    pub fn inbound_fault(mut self, stage: Arc<dyn Stage>) -> Self {
        self.inbound_fault.push(stage);
        self
    }

    /// Adds a stage to the response chain.
    #[must_use]
    pub fn outbound(mut self, stage: Arc<dyn Stage>) -> Self {
        self.outbound.push(stage);
        self
    }

    /// Adds a stage to the response fault chain.
    ///
    /// This chain runs only when a stage of the response chain faults. An
    /// operation fault is answered through the response chain itself, with
    /// [`Direction::Fault`], and never reaches these stages.
    #[must_use]
    pub fn outbound_fault(mut self, stage: Arc<dyn Stage>) -> Self {
        self.outbound_fault.push(stage);
        self
    }

    /// Builds the chains. An [`InvokerStage`] is added to the request chain.
    ///
    /// # Errors
    ///
    /// Returns an error if a chain cannot be built.
    pub fn build(mut self) -> Result<Endpoint, BuildError> {
        let operations = Arc::new(self.operations);
        self.inbound.push(Arc::new(InvokerStage::new(operations.clone())));
        let inbound = self.bus.inbound_plan(&self.inbound, &self.inbound_fault)?;
        let outbound = self.bus.outbound_plan(&self.outbound, &self.outbound_fault)?;

        Ok(Endpoint {
            inner: Arc::new(EndpointInner {
                inbound,
                outbound,
                executor: self.bus.executor().clone(),
                transport: self.transport,
                events: self.bus.events().clone(),
                operations,
            }),
        })
    }
}

struct EndpointInner {
    inbound: ChainPlan,
    outbound: ChainPlan,
    executor: ChainExecutor,
    transport: Arc<dyn Transport>,
    events: Arc<dyn EventSink>,
    operations: Arc<OperationRegistry>,
}

/// Serves operations: each request runs the inbound chain, which ends in the
/// invoker, and the response runs the outbound chain.
///
/// Responses go back on the request's connection, or to the request's
/// reply-to address when it has one. One-way operations get no response, and
/// their faults are only logged.
#[derive(Clone)]
pub struct Endpoint {
    inner: Arc<EndpointInner>,
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("operations", &self.inner.operations.names())
            .finish_non_exhaustive()
    }
}

impl Endpoint {
    /// Starts building an endpoint.
    #[must_use]
    pub fn builder(bus: &Bus, transport: Arc<dyn Transport>) -> EndpointBuilder<'_> {
        EndpointBuilder::new(bus, transport)
    }

    /// Returns the operations served.
    #[must_use]
    pub fn operations(&self) -> &OperationRegistry {
        &self.inner.operations
    }

    /// Serves requests arriving at `address`.
    ///
    /// # Errors
    ///
    /// Returns an error if the transport cannot listen there.
    pub async fn listen(&self, address: &str) -> Result<(), TransportError> {
        self.inner
            .transport
            .listen(address, Arc::new(self.clone()))
            .await
    }

    /// Processes one request. Returns the payload to write on the request's
    /// connection, if any.
    pub async fn dispatch(&self, payload: Bytes) -> Option<Bytes> {
        let exchange = Exchange::server();
        if let Err(err) = exchange.transition(ExchangeState::InboundRunning) {
            error!(error = %err, "Cannot start server exchange");
            return None;
        }
        exchange.set_request(Message::new(payload.clone()));

        let ctx = MessageContext::new(Direction::Inbound, Message::new(payload), exchange.clone());
        match self.inner.executor.run_to_end(&self.inner.inbound, ctx).await {
            Ok(ctx) => {
                if exchange.is_one_way() {
                    if exchange.transition(ExchangeState::OneWayDone).is_ok() {
                        self.inner.events.try_emit(
                            names::EXCHANGE_COMPLETED,
                            Some(json!({ "exchange": exchange.id(), "one_way": true })),
                        );
                    }
                    return None;
                }
                let request = ctx.into_message();
                let body = request.get(keys::RESPONSE_BODY).cloned().unwrap_or_default();
                let response = addressed(Message::new(body), &request);
                self.respond(&exchange, response, &request, None).await
            }
            Err(FaultedChain { fault, context }) => {
                if exchange.is_one_way() {
                    warn!(
                        exchange = %exchange.id(),
                        kind = %fault.kind,
                        "One-way operation faulted, no response sent: {}",
                        fault.message
                    );
                    self.fail(&exchange, fault);
                    return None;
                }
                let request = context.into_message();
                let response = addressed(Message::new(fault.to_payload()), &request)
                    .with_property(keys::IS_FAULT, true);
                self.respond(&exchange, response, &request, Some(fault)).await
            }
        }
    }

    /// Runs the response chain and delivers the result.
    async fn respond(
        &self,
        exchange: &Exchange,
        response: Message,
        request: &Message,
        fault: Option<Fault>,
    ) -> Option<Bytes> {
        if let Err(err) = exchange.transition(ExchangeState::OutboundRunning) {
            error!(error = %err, "Cannot respond");
            return None;
        }
        let direction = if fault.is_some() {
            Direction::Fault
        } else {
            Direction::Outbound
        };

        let ctx = MessageContext::new(direction, response, exchange.clone());
        let response = match self.inner.executor.run_to_end(&self.inner.outbound, ctx).await {
            Ok(ctx) => ctx.into_message(),
            Err(FaultedChain { fault: secondary, .. }) => {
                error!(
                    exchange = %exchange.id(),
                    "Response chain faulted, no response sent: {secondary}"
                );
                self.fail(exchange, fault.unwrap_or(secondary));
                return None;
            }
        };
        let payload = response.payload().clone();

        let reply = match request.get(keys::REPLY_TO) {
            Some(reply_to) => {
                debug!(exchange = %exchange.id(), reply_to = %reply_to, "Sending decoupled response");
                if let Err(err) = self.inner.transport.send(payload, reply_to).await {
                    warn!(reply_to = %reply_to, error = %err, "Decoupled response not delivered");
                    self.fail(exchange, fault.unwrap_or_else(|| Fault::transport(err)));
                    return None;
                }
                None
            }
            None => Some(payload),
        };

        if exchange.transition(ExchangeState::Sent).is_err() {
            return reply;
        }
        match fault {
            Some(fault) => self.fail(exchange, fault),
            None => {
                exchange.set_response(response);
                if exchange.transition(ExchangeState::Complete).is_ok() {
                    self.inner.events.try_emit(
                        names::EXCHANGE_COMPLETED,
                        Some(json!({ "exchange": exchange.id(), "one_way": false })),
                    );
                }
            }
        }
        reply
    }

    fn fail(&self, exchange: &Exchange, fault: Fault) {
        let dict = fault.to_dict();
        if exchange.fail(fault) {
            self.inner.events.try_emit(
                names::EXCHANGE_FAULTED,
                Some(json!({ "exchange": exchange.id(), "fault": dict })),
            );
        }
    }
}

/// Copies the properties a response needs from its request.
fn addressed(mut response: Message, request: &Message) -> Message {
    if let Some(key) = request.get(keys::CORRELATION_KEY) {
        response.insert(keys::CORRELATION_KEY, key.clone());
    }
    if let Some(operation) = request.get(keys::OPERATION) {
        response.insert(keys::OPERATION, operation.clone());
    }
    response
}

#[async_trait]
impl InboundHandler for Endpoint {
    async fn on_message(&self, payload: Bytes) -> Option<Bytes> {
        self.dispatch(payload).await
    }
}
