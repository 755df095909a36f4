//! # Servicekit Library
//!
//! Building blocks for services that consume Azure Service Bus queues and
//! topic subscriptions. The core is a multi-worker [`consumer::Consumer`]
//! that receives bounded batches, dispatches each message to a handler and
//! settles it, with bounded graceful shutdown and fixed backoff on receive
//! errors.
//!
//! ## Modules
//!
//! - [`common`] - Error types shared across the crate
//! - [`config`] - Layered configuration (file, environment, `.env`)
//! - [`consumer`] - Multi-worker message consumer and handler trait
//! - [`logger`] - `fern` logger setup driven by [`config::LoggingConfig`]
//! - [`model`] - Message and send option types
//! - [`producer`] - Convenience sender bound to one queue or topic
//! - [`service_bus`] - Broker abstraction with Azure and in-memory backends
//! - [`taskpool`] - Worker pool with bounded shutdown
//! - [`utils`] - Retry helpers

pub mod common;
pub mod config;
pub mod consumer;
pub mod logger;
pub mod model;
pub mod producer;
pub mod service_bus;
pub mod taskpool;
pub mod utils;
