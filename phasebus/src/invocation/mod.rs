//! Client-side invocation: synchronous, one-way and asynchronous calls over a
//! coupled or decoupled transport.

mod client;
mod config;
mod handle;

pub use client::{Client, ClientBuilder};
pub use config::ClientConfig;
pub use handle::ResponseHandle;
