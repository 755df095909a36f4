use crate::common::{ServiceBusError, ServiceBusResult};
use crate::model::SendOptions;
use crate::service_bus::{EntityPath, ServiceBusClient};
use serde::Serialize;
use std::sync::Arc;

pub const JSON_CONTENT_TYPE: &str = "application/json";
pub const TEXT_CONTENT_TYPE: &str = "text/plain";

/// Sends messages to one queue or topic through a shared [`ServiceBusClient`].
///
/// # Examples
///
/// ```no_run
/// use servicekit::producer::Producer;
/// use servicekit::service_bus::InMemoryServiceBus;
/// use std::sync::Arc;
///
/// async fn example() -> Result<(), Box<dyn std::error::Error>> {
///     let producer = Producer::new(Arc::new(InMemoryServiceBus::new()), "orders")?;
///
///     producer.send_text("Hello, world!").await?;
///     producer
///         .send_json(&serde_json::json!({ "order": 42 }))
///         .await?;
///     Ok(())
/// }
/// ```
#[derive(Clone)]
pub struct Producer {
    client: Arc<dyn ServiceBusClient>,
    target: String,
}

impl std::fmt::Debug for Producer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Producer")
            .field("target", &self.target)
            .finish_non_exhaustive()
    }
}

impl Producer {
    /// Binds a producer to `queue_or_topic`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidQueueName` for malformed names and for subscription
    /// paths, which cannot be sent to.
    pub fn new(
        client: Arc<dyn ServiceBusClient>,
        queue_or_topic: impl Into<String>,
    ) -> ServiceBusResult<Self> {
        let target = queue_or_topic.into();
        match target.parse::<EntityPath>()? {
            EntityPath::Queue(_) => Ok(Self { client, target }),
            EntityPath::Subscription { .. } => Err(ServiceBusError::InvalidQueueName(format!(
                "cannot send to subscription {target}, send to its topic instead"
            ))),
        }
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    /// Sends one message and returns its id.
    pub async fn send(&self, body: Vec<u8>, options: SendOptions) -> ServiceBusResult<String> {
        self.client.send(&self.target, body, options).await
    }

    /// Sends a UTF-8 text message.
    pub async fn send_text(&self, text: &str) -> ServiceBusResult<String> {
        let options = SendOptions::default().with_content_type(TEXT_CONTENT_TYPE);
        self.send(text.as_bytes().to_vec(), options).await
    }

    /// Serializes `data` as JSON and sends it with content type `application/json`.
    ///
    /// # Errors
    ///
    /// Returns `MessageSendFailed` if `data` cannot be serialized.
    pub async fn send_json<T: Serialize + ?Sized>(&self, data: &T) -> ServiceBusResult<String> {
        self.send_json_with(data, SendOptions::default()).await
    }

    /// Like [`send_json`](Self::send_json), keeping the properties and id in `options`.
    pub async fn send_json_with<T: Serialize + ?Sized>(
        &self,
        data: &T,
        options: SendOptions,
    ) -> ServiceBusResult<String> {
        let body = serde_json::to_vec(data).map_err(|e| {
            ServiceBusError::MessageSendFailed(format!("Failed to serialize message body: {e}"))
        })?;
        self.send(body, options.with_content_type(JSON_CONTENT_TYPE))
            .await
    }

    /// Sends every body in one batch sharing `options`.
    pub async fn send_batch(
        &self,
        bodies: Vec<Vec<u8>>,
        options: SendOptions,
    ) -> ServiceBusResult<()> {
        if bodies.is_empty() {
            return Ok(());
        }
        self.client.send_batch(&self.target, bodies, options).await
    }
}

/// Creates [`Producer`]s directly from a shared client.
pub trait ServiceBusClientProducerExt {
    fn producer_for(&self, queue_or_topic: &str) -> ServiceBusResult<Producer>;
}

impl ServiceBusClientProducerExt for Arc<dyn ServiceBusClient> {
    fn producer_for(&self, queue_or_topic: &str) -> ServiceBusResult<Producer> {
        Producer::new(self.clone(), queue_or_topic)
    }
}
