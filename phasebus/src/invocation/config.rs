//! Client configuration.

use crate::correlation::DuplicateKeyPolicy;
use crate::errors::PhasebusError;
use crate::stages::FaultResponsePolicy;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Settings for a [`Client`](super::Client).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Default destination for requests without a destination property.
    pub address: String,
    /// Address responses are sent to. When set, requests are decoupled: the
    /// response arrives on a separate connection and is matched by key.
    pub decoupled_endpoint: Option<String>,
    /// How long to wait for a response, in milliseconds.
    pub receive_timeout_ms: u64,
    /// How often expired pending calls are swept, in milliseconds.
    pub reap_interval_ms: u64,
    /// What to do when a correlation key is reused while still pending.
    pub duplicate_key_policy: DuplicateKeyPolicy,
    /// How inbound fault responses are checked.
    pub fault_response_policy: FaultResponsePolicy,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            address: String::new(),
            decoupled_endpoint: None,
            receive_timeout_ms: 30_000,
            reap_interval_ms: 1_000,
            duplicate_key_policy: DuplicateKeyPolicy::default(),
            fault_response_policy: FaultResponsePolicy::default(),
        }
    }
}

impl ClientConfig {
    /// Creates a configuration for a destination address.
    #[must_use]
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            ..Self::default()
        }
    }

    /// Parses a JSON configuration. Missing fields take their defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the JSON is malformed.
    pub fn from_json_str(json: &str) -> Result<Self, PhasebusError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Sets the decoupled response address.
    #[must_use]
    pub fn with_decoupled_endpoint(mut self, address: impl Into<String>) -> Self {
        self.decoupled_endpoint = Some(address.into());
        self
    }

    /// Sets the receive timeout.
    #[must_use]
    pub fn with_receive_timeout(mut self, timeout: Duration) -> Self {
        self.receive_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Sets the reaper interval.
    #[must_use]
    pub fn with_reap_interval(mut self, interval: Duration) -> Self {
        self.reap_interval_ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Sets the duplicate key policy.
    #[must_use]
    pub fn with_duplicate_key_policy(mut self, policy: DuplicateKeyPolicy) -> Self {
        self.duplicate_key_policy = policy;
        self
    }

    /// Sets the fault response policy.
    #[must_use]
    pub fn with_fault_response_policy(mut self, policy: FaultResponsePolicy) -> Self {
        self.fault_response_policy = policy;
        self
    }

    /// Returns the receive timeout.
    #[must_use]
    pub fn receive_timeout(&self) -> Duration {
        Duration::from_millis(self.receive_timeout_ms)
    }

    /// Returns the reaper interval.
    #[must_use]
    pub fn reap_interval(&self) -> Duration {
        Duration::from_millis(self.reap_interval_ms.max(1))
    }

    /// Returns true when responses arrive on a separate connection.
    #[must_use]
    pub fn is_decoupled(&self) -> bool {
        self.decoupled_endpoint.is_some()
    }
}
