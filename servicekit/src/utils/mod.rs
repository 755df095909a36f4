//! # Utilities
//!
//! Helpers shared by the broker adapters and the demo service.
//!
//! - [`retry`] - exponential backoff for transient broker failures

pub mod retry;
