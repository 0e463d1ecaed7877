//! # Phasebus
//!
//! A phase-ordered message pipeline engine.
//!
//! Messages travel through chains of stages. Each stage belongs to a named
//! phase, and a phase registry fixes the order of phases; within a phase,
//! stages order themselves with `runs_after`/`runs_before` constraints.
//! Phasebus provides:
//!
//! - **Chain building**: deterministic ordering, cycle detection, cached chains
//! - **Chain execution**: fault chains, suspension and resumption, mid-chain insertion
//! - **Invocation modes**: synchronous, one-way and asynchronous calls
//! - **Decoupled responses**: responses on a separate connection, matched by
//!   correlation key, with deadlines
//! - **Endpoints**: operation dispatch and fault responses on the server side
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use phasebus::prelude::*;
//!
//! let bus = Bus::new();
//! let transport = Arc::new(InMemoryTransport::new());
//!
//! let mut operations = OperationRegistry::new();
//! operations.register("greet", |name: String| async move { anyhow::Ok(format!("hi {name}")) });
//! Endpoint::builder(&bus, transport.clone())
//!     .operations(operations)
//!     .inbound(Arc::new(EnvelopeReader))
//!     .outbound(Arc::new(EnvelopeWriter::new()))
//!     .build()?
//!     .listen("mem://server")
//!     .await?;
//!
//! let client = Client::builder(&bus, transport, ClientConfig::new("mem://server"))
//!     .outbound(Arc::new(EnvelopeWriter::new()))
//!     .inbound(Arc::new(EnvelopeReader))
//!     .build()
//!     .await?;
//! let request = Message::from_json(&"ada")?.with_property(keys::OPERATION, "greet".into());
//! let response = client.invoke_sync(request).await?;
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod bus;
pub mod context;
pub mod correlation;
pub mod errors;
pub mod events;
pub mod invocation;
pub mod observability;
pub mod phase;
pub mod pipeline;
pub mod service;
pub mod stages;
pub mod testing;
pub mod transport;


pub use bus::{Bus, BusConfig};
pub use errors::{BuildError, Fault, FaultKind, PhasebusError};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::bus::{Bus, BusConfig};
    pub use crate::context::{
        keys, Direction, Exchange, ExchangeState, Key, Message, MessageContext, Role,
    };
    pub use crate::correlation::{CorrelationKey, Correlator, DuplicateKeyPolicy};
    pub use crate::errors::{
        BuildError, ContractErrorInfo, Fault, FaultKind, PhasebusError, TransportError, WaitError,
    };
    pub use crate::events::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};
    pub use crate::invocation::{Client, ClientConfig, ResponseHandle};
    pub use crate::phase::{names as phases, PhaseRegistry};
    pub use crate::pipeline::{ChainBuilder, ChainExecutor, ChainOutcome, ChainPlan};
    pub use crate::service::{Endpoint, OperationRegistry};
    pub use crate::stages::{
        ActionCheckStage, FaultResponsePolicy, FnStage, Stage, StageOutcome,
    };
    pub use crate::testing::{EnvelopeReader, EnvelopeWriter};
    pub use crate::transport::{InMemoryTransport, Transport};
}
