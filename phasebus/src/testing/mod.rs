//! Testing utilities for phasebus chains and invocations.
//!
//! This module provides:
//! - Stages that record, fail, sleep or suspend
//! - A JSON envelope codec with reader and writer stages
//! - Assertions for faults and chain order

mod assertions;
mod fixtures;
mod mocks;

pub use assertions::{assert_chain_order, assert_fault_kind, assert_wait_fault};
pub use fixtures::{envelope_key_extractor, Envelope, EnvelopeReader, EnvelopeWriter};
pub use mocks::{FailingStage, Journal, RecordingStage, SlowStage, SuspendingStage};
