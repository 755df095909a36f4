pub mod errors;

pub use errors::{HandlerError, ServiceBusError, ServiceBusResult};
