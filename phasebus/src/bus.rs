//! The bus: shared registries, chain cache and executor.

use crate::errors::{BuildError, PhasebusError};
use crate::events::{EventSink, NoOpEventSink};
use crate::phase::{names, PhaseRegistry};
use crate::pipeline::{ChainCache, ChainExecutor, ChainPlan};
use crate::stages::Stage;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Phase lists for the two registries a bus owns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// Inbound phase order.
    pub inbound_phases: Vec<String>,
    /// Outbound phase order.
    pub outbound_phases: Vec<String>,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            inbound_phases: names::INBOUND.iter().map(ToString::to_string).collect(),
            outbound_phases: names::OUTBOUND.iter().map(ToString::to_string).collect(),
        }
    }
}

impl BusConfig {
    /// Parses a JSON configuration. Missing fields take their defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the JSON is malformed.
    pub fn from_json_str(json: &str) -> Result<Self, PhasebusError> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Owns what clients and endpoints share: phase registries, the chain cache,
/// the executor and the event sink.
///
/// Everything here is immutable or internally synchronized, so one bus can
/// serve any number of concurrent clients and endpoints.
pub struct Bus {
    inbound: Arc<PhaseRegistry>,
    outbound: Arc<PhaseRegistry>,
    chains: ChainCache,
    executor: ChainExecutor,
    events: Arc<dyn EventSink>,
}

impl Default for Bus {
    fn default() -> Self {
        Self::with_registries(PhaseRegistry::inbound(), PhaseRegistry::outbound())
    }
}

impl fmt::Debug for Bus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bus")
            .field("inbound", &self.inbound.name())
            .field("outbound", &self.outbound.name())
            .field("cached_chains", &self.chains.len())
            .finish_non_exhaustive()
    }
}

impl Bus {
    /// Creates a bus with the standard phase registries.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a bus over explicit registries.
    #[must_use]
    pub fn with_registries(inbound: PhaseRegistry, outbound: PhaseRegistry) -> Self {
        let events: Arc<dyn EventSink> = Arc::new(NoOpEventSink);
        Self {
            inbound: Arc::new(inbound),
            outbound: Arc::new(outbound),
            chains: ChainCache::new(),
            executor: ChainExecutor::new(events.clone()),
            events,
        }
    }

    /// Creates a bus from configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if a phase list is empty or repeats a name.
    pub fn from_config(config: &BusConfig) -> Result<Self, BuildError> {
        Ok(Self::with_registries(
            PhaseRegistry::from_names("inbound", config.inbound_phases.iter().cloned())?,
            PhaseRegistry::from_names("outbound", config.outbound_phases.iter().cloned())?,
        ))
    }

    /// Reports events to `events`.
    #[must_use]
    pub fn with_event_sink(mut self, events: Arc<dyn EventSink>) -> Self {
        self.executor = ChainExecutor::new(events.clone());
        self.events = events;
        self
    }

    /// Returns the inbound registry.
    #[must_use]
    pub fn inbound_phases(&self) -> &Arc<PhaseRegistry> {
        &self.inbound
    }

    /// Returns the outbound registry.
    #[must_use]
    pub fn outbound_phases(&self) -> &Arc<PhaseRegistry> {
        &self.outbound
    }

    /// Returns the chain cache.
    #[must_use]
    pub fn chains(&self) -> &ChainCache {
        &self.chains
    }

    /// Returns the executor.
    #[must_use]
    pub fn executor(&self) -> &ChainExecutor {
        &self.executor
    }

    /// Returns the event sink.
    #[must_use]
    pub fn events(&self) -> &Arc<dyn EventSink> {
        &self.events
    }

    /// Builds, or fetches from the cache, an inbound plan.
    ///
    /// # Errors
    ///
    /// Returns the build error of either chain.
    pub fn inbound_plan(
        &self,
        stages: &[Arc<dyn Stage>],
        fault_stages: &[Arc<dyn Stage>],
    ) -> Result<ChainPlan, BuildError> {
        self.plan(&self.inbound, stages, fault_stages)
    }

    /// Builds, or fetches from the cache, an outbound plan.
    ///
    /// # Errors
    ///
    /// Returns the build error of either chain.
    pub fn outbound_plan(
        &self,
        stages: &[Arc<dyn Stage>],
        fault_stages: &[Arc<dyn Stage>],
    ) -> Result<ChainPlan, BuildError> {
        self.plan(&self.outbound, stages, fault_stages)
    }

    fn plan(
        &self,
        registry: &Arc<PhaseRegistry>,
        stages: &[Arc<dyn Stage>],
        fault_stages: &[Arc<dyn Stage>],
    ) -> Result<ChainPlan, BuildError> {
        Ok(ChainPlan::new(
            self.chains.get_or_build(registry, stages)?,
            self.chains.get_or_build(registry, fault_stages)?,
        ))
    }
}
