//! Server side: operations, the invoker stage, and endpoints.

mod endpoint;
mod invoker;
mod operations;

pub use endpoint::{Endpoint, EndpointBuilder};
pub use invoker::InvokerStage;
pub use operations::{Operation, OperationRegistry};
