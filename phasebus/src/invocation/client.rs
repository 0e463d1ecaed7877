//! The requesting side: runs the outbound chain, sends, and waits for the
//! response in one of three modes.

use super::{ClientConfig, ResponseHandle};
use crate::bus::Bus;
use crate::context::{keys, Direction, Exchange, ExchangeState, Message, MessageContext};
use crate::correlation::{
    CallerHandle, CorrelationKey, CorrelationKeyExtractor, Correlator, DecoupledListener,
    ResponseWaiter,
};
use crate::errors::{Fault, FaultKind, PhasebusError, TransportError};
use crate::events::{names, EventSink};
use crate::pipeline::{ChainExecutor, ChainPlan, FaultedChain};
use crate::stages::Stage;
use crate::transport::{BackChannel, Transport};
use serde_json::json;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Stage id used when a fault is raised by the transport rather than a stage.
const TRANSPORT_STAGE: &str = "transport";

/// Where the response to a sent request will come from.
enum ResponseSource {
    /// The transport's reply on the request connection.
    BackChannel(BackChannel),
    /// A pending call in the correlator.
    Decoupled {
        waiter: ResponseWaiter,
        deadline: Instant,
    },
    /// Nothing; the request was one-way.
    None,
}

/// Assembles a [`Client`].
pub struct ClientBuilder<'a> {
    bus: &'a Bus,
    transport: Arc<dyn Transport>,
    config: ClientConfig,
    outbound: Vec<Arc<dyn Stage>>,
    outbound_fault: Vec<Arc<dyn Stage>>,
    inbound: Vec<Arc<dyn Stage>>,
    inbound_fault: Vec<Arc<dyn Stage>>,
    correlator: Option<Arc<Correlator>>,
    extractor: Option<Arc<dyn CorrelationKeyExtractor>>,
}

impl<'a> ClientBuilder<'a> {
    /// Starts a builder.
    #[must_use]
    pub fn new(bus: &'a Bus, transport: Arc<dyn Transport>, config: ClientConfig) -> Self {
        Self {
            bus,
            transport,
            config,
            outbound: Vec::new(),
            outbound_fault: Vec::new(),
            inbound: Vec::new(),
            inbound_fault: Vec::new(),
            correlator: None,
            extractor: None,
        }
    }

    /// Adds a stage to the request chain.
    #[must_use]
    pub fn outbound(mut self, stage: Arc<dyn Stage>) -> Self {
        self.outbound.push(stage);
        self
    }

    /// Adds a stage to the request fault chain.
    #[must_use]
    pub fn outbound_fault(mut self, stage: Arc<dyn Stage>) -> Self {
        self.outbound_fault.push(stage);
        self
    }

    /// Adds a stage to the response chain.
    #[must_use]
    pub fn inbound(mut self, stage: Arc<dyn Stage>) -> Self {
        self.inbound.push(stage);
        self
    }

    /// Adds a stage to the response fault chain.
    #[must_use]
    pub fn inbound_fault(mut self, stage: Arc<dyn Stage>) -> Self {
        self.inbound_fault.push(stage);
        self
    }

    /// Shares an existing correlator instead of creating one.
    #[must_use]
    pub fn correlator(mut self, correlator: Arc<Correlator>) -> Self {
        self.correlator = Some(correlator);
        self
    }

    /// Sets how correlation keys are read from decoupled responses.
    #[must_use]
    pub fn key_extractor(mut self, extractor: Arc<dyn CorrelationKeyExtractor>) -> Self {
        self.extractor = Some(extractor);
        self
    }

    /// Builds the chains and, in decoupled mode, starts listening for responses.
    ///
    /// # Errors
    ///
    /// Returns an error if a chain cannot be built, if decoupled mode is
    /// configured without a key extractor, or if the response address cannot
    /// be listened on.
    pub async fn build(self) -> Result<Client, PhasebusError> {
        let outbound = self.bus.outbound_plan(&self.outbound, &self.outbound_fault)?;
        let inbound = self.bus.inbound_plan(&self.inbound, &self.inbound_fault)?;
        let events = self.bus.events().clone();
        let correlator = self.correlator.unwrap_or_else(|| {
            Arc::new(
                Correlator::new(self.config.duplicate_key_policy).with_event_sink(events.clone()),
            )
        });

        let mut reaper = None;
        if let Some(endpoint) = self.config.decoupled_endpoint.as_deref() {
            let extractor = self.extractor.ok_or_else(|| {
                PhasebusError::InvalidSetup(
                    "a decoupled endpoint needs a correlation key extractor".to_string(),
                )
            })?;
            let listener = DecoupledListener::new(correlator.clone(), extractor);
            self.transport.listen(endpoint, Arc::new(listener)).await?;
            reaper = Some(correlator.spawn_reaper(self.config.reap_interval()));
            debug!(endpoint, "Listening for decoupled responses");
        }

        Ok(Client {
            inner: Arc::new(ClientInner {
                outbound,
                inbound,
                executor: self.bus.executor().clone(),
                transport: self.transport,
                correlator,
                config: self.config,
                events,
                reaper,
            }),
        })
    }
}

struct ClientInner {
    outbound: ChainPlan,
    inbound: ChainPlan,
    executor: ChainExecutor,
    transport: Arc<dyn Transport>,
    correlator: Arc<Correlator>,
    config: ClientConfig,
    events: Arc<dyn EventSink>,
    reaper: Option<JoinHandle<()>>,
}

impl Drop for ClientInner {
    fn drop(&mut self) {
        if let Some(reaper) = self.reaper.take() {
            reaper.abort();
        }
    }
}

/// Sends requests through the outbound chain and processes responses through
/// the inbound chain.
///
/// Cheap to clone; clones share chains, transport and correlator.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("config", &self.inner.config)
            .field("correlator", &self.inner.correlator)
            .finish_non_exhaustive()
    }
}

impl Client {
    /// Starts building a client.
    #[must_use]
    pub fn builder(bus: &Bus, transport: Arc<dyn Transport>, config: ClientConfig) -> ClientBuilder<'_> {
        ClientBuilder::new(bus, transport, config)
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// Returns the correlator holding this client's pending calls.
    #[must_use]
    pub fn correlator(&self) -> &Arc<Correlator> {
        &self.inner.correlator
    }

    /// Sends a request and waits for the processed response.
    ///
    /// # Errors
    ///
    /// Returns the fault raised by either chain or the transport, `Timeout`
    /// if no response arrived in time, or the fault carried by a fault response.
    pub async fn invoke_sync(&self, request: Message) -> Result<Message, Fault> {
        let exchange = Exchange::client(false);
        let source = self.inner.send_request(&exchange, request).await?;
        exchange.transition(ExchangeState::AwaitingResponse)?;
        self.inner.receive(&exchange, source).await
    }

    /// Sends a request that expects no response.
    ///
    /// Returns once the transport has accepted the message.
    ///
    /// # Errors
    ///
    /// Returns the fault raised by the outbound chain or the transport.
    pub async fn invoke_one_way(&self, request: Message) -> Result<(), Fault> {
        let exchange = Exchange::client(true);
        self.inner.send_request(&exchange, request).await?;
        exchange.transition(ExchangeState::OneWayDone)?;
        self.inner.events.try_emit(
            names::EXCHANGE_COMPLETED,
            Some(json!({ "exchange": exchange.id(), "one_way": true })),
        );
        Ok(())
    }

    /// Sends a request and returns a handle that resolves with the response.
    ///
    /// The response is processed on a background task.
    ///
    /// # Errors
    ///
    /// Returns the fault raised by the outbound chain or the transport; no
    /// handle is created in that case.
    pub async fn invoke_async(&self, request: Message) -> Result<ResponseHandle, Fault> {
        let exchange = Exchange::client(false);
        let source = self.inner.send_request(&exchange, request).await?;
        exchange.transition(ExchangeState::AwaitingResponse)?;

        let (handle, completer) =
            ResponseHandle::new(exchange.clone(), self.inner.correlator.clone());
        let inner = self.inner.clone();
        tokio::spawn(async move {
            let outcome = inner.receive(&exchange, source).await;
            if !completer.complete(outcome) {
                debug!(exchange = %exchange.id(), "Discarding outcome of a cancelled call");
            }
        });
        Ok(handle)
    }
}

impl ClientInner {
    /// Runs the outbound chain and hands the result to the transport.
    async fn send_request(
        &self,
        exchange: &Exchange,
        request: Message,
    ) -> Result<ResponseSource, Fault> {
        exchange.transition(ExchangeState::OutboundRunning)?;
        let decoupled = !exchange.is_one_way() && self.config.is_decoupled();

        let mut ctx = MessageContext::new(Direction::Outbound, request, exchange.clone());
        let key = ctx
            .get(keys::CORRELATION_KEY)
            .cloned()
            .unwrap_or_else(CorrelationKey::generate);
        ctx.insert(keys::CORRELATION_KEY, key.clone());
        exchange.set_correlation_key(key.clone());
        if ctx.get(keys::DESTINATION).is_none() {
            ctx.insert(keys::DESTINATION, self.config.address.clone());
        }
        if decoupled {
            if let Some(endpoint) = self.config.decoupled_endpoint.clone() {
                ctx.insert(keys::REPLY_TO, endpoint);
            }
        }

        let ctx = match self.executor.run_to_end(&self.outbound, ctx).await {
            Ok(ctx) => ctx,
            Err(FaultedChain { fault, .. }) => return Err(self.finish_with_fault(exchange, fault)),
        };

        let destination = ctx
            .get(keys::DESTINATION)
            .cloned()
            .unwrap_or_else(|| self.config.address.clone());
        let payload = ctx.message().payload().clone();

        // Registered before sending so a fast response always finds its caller.
        let pending = if decoupled {
            let (handle, waiter) = CallerHandle::pair();
            let deadline = Instant::now() + self.config.receive_timeout();
            if let Err(err) = self.correlator.register(key.clone(), handle, deadline) {
                let fault = Fault::new(FaultKind::DuplicateCorrelationKey, err.to_string());
                return Err(self.finish_with_fault(exchange, fault));
            }
            Some((waiter, deadline))
        } else {
            None
        };

        match self.transport.send(payload, &destination).await {
            Ok(back_channel) => {
                exchange.transition(ExchangeState::Sent)?;
                exchange.set_request(ctx.into_message());
                self.events.try_emit(
                    names::EXCHANGE_SENT,
                    Some(json!({
                        "exchange": exchange.id(),
                        "destination": destination,
                        "key": key,
                    })),
                );
                Ok(match pending {
                    Some((waiter, deadline)) => ResponseSource::Decoupled { waiter, deadline },
                    None if exchange.is_one_way() => ResponseSource::None,
                    None => ResponseSource::BackChannel(back_channel),
                })
            }
            Err(err) => {
                if decoupled {
                    self.correlator.cancel(&key);
                }
                warn!(destination = %destination, error = %err, "Send failed");
                let send_phase = self
                    .outbound
                    .main()
                    .registry()
                    .phases()
                    .last()
                    .map(|p| p.name().to_string())
                    .unwrap_or_default();
                let fault = Fault::transport(err).raised_at(TRANSPORT_STAGE, &send_phase);
                let faulted = self
                    .executor
                    .run_fault_chain(&self.outbound, ctx, fault)
                    .await;
                Err(self.finish_with_fault(exchange, faulted.fault))
            }
        }
    }

    /// Waits for the response and runs the inbound chain over it.
    async fn receive(&self, exchange: &Exchange, source: ResponseSource) -> Result<Message, Fault> {
        let timeout = self.config.receive_timeout();
        let key = exchange.correlation_key();
        let key_text = key.as_ref().map(ToString::to_string).unwrap_or_default();

        let raw = match source {
            ResponseSource::Decoupled { waiter, deadline } => {
                let wait = waiter.wait();
                tokio::pin!(wait);
                match tokio::time::timeout_at(tokio::time::Instant::from_std(deadline), &mut wait)
                    .await
                {
                    Ok(outcome) => outcome,
                    Err(_) => {
                        // The reaper may lag; expiring here resolves our call.
                        let _ = self.correlator.expire(Instant::now());
                        wait.await
                    }
                }
            }
            ResponseSource::BackChannel(BackChannel::Open(reply)) => {
                match tokio::time::timeout(timeout, reply).await {
                    Ok(Ok(bytes)) => Ok(Message::new(bytes)),
                    Ok(Err(err)) => Err(self.transport_fault_inbound(exchange, err).await),
                    Err(_) => Err(Fault::timeout(&key_text)),
                }
            }
            ResponseSource::BackChannel(BackChannel::Closed) | ResponseSource::None => {
                Err(self
                    .transport_fault_inbound(exchange, TransportError::NoResponse)
                    .await)
            }
        };

        let mut message = match raw {
            Ok(message) => message,
            Err(fault) => return Err(self.finish_with_fault(exchange, fault)),
        };

        if exchange.transition(ExchangeState::InboundRunning).is_err() {
            return Err(exchange
                .fault()
                .unwrap_or_else(|| Fault::cancelled("Exchange finished before the response arrived")));
        }

        if let Some(key) = key {
            message.insert(keys::CORRELATION_KEY, key);
        }
        message.insert(keys::FAULT_RESPONSE_POLICY, self.config.fault_response_policy);
        let ctx = MessageContext::new(Direction::Inbound, message, exchange.clone());

        let ctx = match self.executor.run_to_end(&self.inbound, ctx).await {
            Ok(ctx) => ctx,
            Err(FaultedChain { fault, .. }) => return Err(self.finish_with_fault(exchange, fault)),
        };

        let response = ctx.into_message();
        if response.get(keys::IS_FAULT).copied().unwrap_or(false) {
            let fault = Fault::from_payload(response.payload());
            return Err(self.finish_with_fault(exchange, fault));
        }

        exchange.set_response(response.clone());
        exchange.transition(ExchangeState::Complete)?;
        self.events.try_emit(
            names::EXCHANGE_COMPLETED,
            Some(json!({ "exchange": exchange.id(), "one_way": false })),
        );
        Ok(response)
    }

    /// Runs the inbound fault chain for a transport failure on the response path.
    async fn transport_fault_inbound(&self, exchange: &Exchange, err: TransportError) -> Fault {
        let first_phase = self
            .inbound
            .on_fault()
            .registry()
            .get(0)
            .map(|p| p.name().to_string())
            .unwrap_or_default();
        let fault = Fault::transport(err).raised_at(TRANSPORT_STAGE, &first_phase);
        let ctx = MessageContext::new(Direction::Inbound, Message::empty(), exchange.clone());
        self.executor
            .run_fault_chain(&self.inbound, ctx, fault)
            .await
            .fault
    }

    fn finish_with_fault(&self, exchange: &Exchange, fault: Fault) -> Fault {
        if exchange.fail(fault.clone()) {
            self.events.try_emit(
                names::EXCHANGE_FAULTED,
                Some(json!({ "exchange": exchange.id(), "fault": fault.to_dict() })),
            );
            fault
        } else {
            // Already finished, typically by cancellation; report what it ended with.
            exchange.fault().unwrap_or(fault)
        }
    }
}
