//! Phase registries.
//!
//! A phase registry is the total order shared by every chain built over it.
//! Registries are explicit values: build one at startup, wrap it in an `Arc`
//! and hand it to the chain builder.

pub mod names;
mod registry;

pub use registry::{Phase, PhaseRegistry, PhaseRegistryBuilder};
