//! Chain building and execution.
//!
//! This module provides:
//! - [`ChainBuilder`]: orders stages by phase and constraints
//! - [`ChainCache`]: reuses built chains across invocations
//! - [`ChainExecutor`]: runs chains, including fault chains and suspensions

mod builder;
mod cache;
mod chain;
mod executor;

pub use builder::ChainBuilder;
pub use cache::ChainCache;
pub use chain::Chain;
pub use executor::{ChainExecutor, ChainOutcome, ChainPlan, Continuation, FaultedChain};
