//! Correlation keys and how they are found in raw messages.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Opaque value linking a request to its response.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationKey(String);

impl CorrelationKey {
    /// Wraps an existing key.
    #[must_use]
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Generates a fresh `urn:uuid:` key.
    #[must_use]
    pub fn generate() -> Self {
        Self(format!("urn:uuid:{}", Uuid::new_v4()))
    }

    /// Returns the key text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CorrelationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CorrelationKey {
    fn from(key: &str) -> Self {
        Self::new(key)
    }
}

impl From<String> for CorrelationKey {
    fn from(key: String) -> Self {
        Self(key)
    }
}

/// Reads the correlation key out of a raw inbound payload.
///
/// Used by listeners that receive responses before any chain has run.
pub trait CorrelationKeyExtractor: Send + Sync {
    /// Returns the key, or `None` if the payload carries none.
    fn extract(&self, payload: &[u8]) -> Option<CorrelationKey>;
}

impl<F> CorrelationKeyExtractor for F
where
    F: Fn(&[u8]) -> Option<CorrelationKey> + Send + Sync,
{
    fn extract(&self, payload: &[u8]) -> Option<CorrelationKey> {
        self(payload)
    }
}
