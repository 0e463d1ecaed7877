//! Correlation of decoupled responses with the calls that await them.
//!
//! A client registers a pending call under the request's correlation key
//! before the request is sent. Whatever path the response takes, it ends up
//! in [`Correlator::deliver`], which resolves exactly the call holding that key.

mod correlator;
mod key;
mod listener;

pub use correlator::{
    CallerHandle, Correlator, DuplicateKeyPolicy, PendingCallInfo, ResponseWaiter,
};
pub use key::{CorrelationKey, CorrelationKeyExtractor};
pub use listener::DecoupledListener;
