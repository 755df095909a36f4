//! Broker abstraction used by the consumer.
//!
//! [`ServiceBusClient`] sends messages and creates receivers. A
//! [`MessageReceiver`] pulls batches and acknowledges them by lock token.
//! Two implementations are provided: [`azure::AzureServiceBusClient`] backed by
//! `azservicebus`, and [`in_memory::InMemoryServiceBus`] with identical
//! semantics for tests and local development.

pub mod azure;
pub mod in_memory;

use crate::common::{ServiceBusError, ServiceBusResult};
use crate::model::{LockToken, Message, SendOptions};
use async_trait::async_trait;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

pub use azure::AzureServiceBusClient;
pub use in_memory::InMemoryServiceBus;

const SUBSCRIPTIONS_SEGMENT: &str = "subscriptions";

/// A queue, or a subscription of a topic.
///
/// Subscriptions use the Service Bus entity path convention
/// `<topic>/subscriptions/<subscription>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EntityPath {
    Queue(String),
    Subscription { topic: String, subscription: String },
}

impl EntityPath {
    pub fn queue(name: impl Into<String>) -> Self {
        EntityPath::Queue(name.into())
    }

    pub fn subscription(topic: impl Into<String>, subscription: impl Into<String>) -> Self {
        EntityPath::Subscription {
            topic: topic.into(),
            subscription: subscription.into(),
        }
    }
}

impl FromStr for EntityPath {
    type Err = ServiceBusError;

    fn from_str(path: &str) -> Result<Self, Self::Err> {
        let invalid = || ServiceBusError::InvalidQueueName(path.to_string());

        if path.is_empty() || path.chars().any(char::is_whitespace) {
            return Err(invalid());
        }

        let segments: Vec<&str> = path.split('/').collect();
        if segments.iter().any(|s| s.is_empty()) {
            return Err(invalid());
        }

        match segments.as_slice() {
            [queue] => Ok(EntityPath::queue(*queue)),
            [topic, SUBSCRIPTIONS_SEGMENT, subscription] => {
                Ok(EntityPath::subscription(*topic, *subscription))
            }
            _ => Err(invalid()),
        }
    }
}

impl fmt::Display for EntityPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityPath::Queue(name) => f.write_str(name),
            EntityPath::Subscription {
                topic,
                subscription,
            } => write!(f, "{topic}/{SUBSCRIPTIONS_SEGMENT}/{subscription}"),
        }
    }
}

/// A receiver bound to one queue or subscription.
///
/// Implementations must be safe to share between workers.
#[async_trait]
pub trait MessageReceiver: Send + Sync {
    /// Receives up to `max_messages`, waiting at most `timeout`.
    ///
    /// An elapsed timeout is reported either as an empty batch or as an error
    /// for which [`ServiceBusError::is_timeout_or_cancelled`] holds.
    async fn receive(&self, max_messages: u32, timeout: Duration) -> ServiceBusResult<Vec<Message>>;

    /// Permanently removes the message from the entity.
    async fn complete(&self, lock_token: &LockToken) -> ServiceBusResult<()>;

    /// Releases the lock so the message can be redelivered.
    async fn abandon(&self, lock_token: &LockToken) -> ServiceBusResult<()>;

    /// Releases receiver resources. Later calls fail with `ReceiverClosed`.
    async fn close(&self) -> ServiceBusResult<()>;
}

/// Sending side of the broker plus the receiver factory.
#[async_trait]
pub trait ServiceBusClient: Send + Sync {
    /// Sends one message, returning its id.
    async fn send(
        &self,
        queue_or_topic: &str,
        body: Vec<u8>,
        options: SendOptions,
    ) -> ServiceBusResult<String>;

    /// Sends several bodies sharing the same options.
    async fn send_batch(
        &self,
        queue_or_topic: &str,
        bodies: Vec<Vec<u8>>,
        options: SendOptions,
    ) -> ServiceBusResult<()>;

    /// Creates a receiver for a queue or `<topic>/subscriptions/<name>` path.
    async fn create_receiver(
        &self,
        queue_or_subscription: &str,
    ) -> ServiceBusResult<Box<dyn MessageReceiver>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use claims::{assert_err, assert_ok_eq};

    #[test]
    fn test_parse_queue_and_subscription() {
        assert_ok_eq!("orders".parse::<EntityPath>(), EntityPath::queue("orders"));
        assert_ok_eq!(
            "events/subscriptions/billing".parse::<EntityPath>(),
            EntityPath::subscription("events", "billing")
        );
    }

    #[test]
    fn test_parse_rejects_malformed_paths() {
        for path in [
            "",
            "has space",
            "events/",
            "/orders",
            "events//billing",
            "events/subs/billing",
            "a/subscriptions/b/c",
        ] {
            assert_err!(path.parse::<EntityPath>(), "{path} should be rejected");
        }
    }

    #[test]
    fn test_display_round_trips_through_parse() {
        let subscription = EntityPath::subscription("events", "billing");
        assert_eq!(subscription.to_string(), "events/subscriptions/billing");
        assert_ok_eq!(subscription.to_string().parse::<EntityPath>(), subscription);
        assert_eq!(EntityPath::queue("orders").to_string(), "orders");
    }
}
