//! Messages and flow direction.

use super::{Key, Properties};
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Which way a message flows through a chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Leaving the local side.
    Outbound,
    /// Arriving at the local side.
    Inbound,
    /// Travelling through a fault chain.
    Fault,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Outbound => "outbound",
            Self::Inbound => "inbound",
            Self::Fault => "fault",
        })
    }
}

/// A payload plus the properties stages attach to it.
#[derive(Debug, Clone, Default)]
pub struct Message {
    payload: Bytes,
    properties: Properties,
}

impl Message {
    /// Creates a message with the given payload.
    #[must_use]
    pub fn new(payload: impl Into<Bytes>) -> Self {
        Self {
            payload: payload.into(),
            properties: Properties::new(),
        }
    }

    /// Creates a message with an empty payload.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Serializes a value as the JSON payload.
    ///
    /// # Errors
    ///
    /// Returns an error if the value cannot be serialized.
    pub fn from_json<T: Serialize>(value: &T) -> Result<Self, serde_json::Error> {
        Ok(Self::new(serde_json::to_vec(value)?))
    }

    /// Deserializes the payload as JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload is not valid JSON for `T`.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.payload)
    }

    /// Sets a property, builder style.
    #[must_use]
    pub fn with_property<T>(mut self, key: Key<T>, value: T) -> Self
    where
        T: Send + Sync + 'static,
    {
        self.properties.insert(key, value);
        self
    }

    /// Returns the payload.
    #[must_use]
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Replaces the payload.
    pub fn set_payload(&mut self, payload: impl Into<Bytes>) {
        self.payload = payload.into();
    }

    /// Returns the payload as UTF-8 text, replacing invalid sequences.
    #[must_use]
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }

    /// Returns the properties.
    #[must_use]
    pub fn properties(&self) -> &Properties {
        &self.properties
    }

    /// Returns the properties mutably.
    pub fn properties_mut(&mut self) -> &mut Properties {
        &mut self.properties
    }

    /// Reads a property.
    #[must_use]
    pub fn get<T>(&self, key: Key<T>) -> Option<&T>
    where
        T: Send + Sync + 'static,
    {
        self.properties.get(key)
    }

    /// Sets a property.
    pub fn insert<T>(&mut self, key: Key<T>, value: T)
    where
        T: Send + Sync + 'static,
    {
        self.properties.insert(key, value);
    }
}
