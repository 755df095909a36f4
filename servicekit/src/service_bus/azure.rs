use super::{EntityPath, MessageReceiver, ServiceBusClient};
use crate::common::{ServiceBusError, ServiceBusResult};
use crate::model::{LockToken, Message, SendOptions};
use crate::utils::retry::{RetryConfig, retry};
use async_trait::async_trait;
use azservicebus::core::BasicRetryPolicy;
use azservicebus::{
    ServiceBusClient as AzureClient, ServiceBusClientOptions, ServiceBusMessage,
    ServiceBusReceivedMessage, ServiceBusReceiver, ServiceBusReceiverOptions,
    ServiceBusSenderOptions,
};
use chrono::{DateTime, Utc};
use fe2o3_amqp_types::messaging::ApplicationProperties;
use fe2o3_amqp_types::primitives::SimpleValue;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use time::OffsetDateTime;
use tokio::sync::{Mutex, MutexGuard, RwLock};
use tokio_util::sync::CancellationToken;

type SdkClient = Arc<Mutex<AzureClient<BasicRetryPolicy>>>;

const LANE_SEPARATOR: char = ':';

/// [`ServiceBusClient`] backed by Azure Service Bus.
///
/// The underlying SDK client needs exclusive access to create senders and
/// receivers, so it is kept behind a mutex and can be shared across tasks.
///
/// # Examples
///
/// ```no_run
/// use servicekit::model::SendOptions;
/// use servicekit::service_bus::{AzureServiceBusClient, ServiceBusClient};
///
/// async fn example(connection_string: &str) -> Result<(), Box<dyn std::error::Error>> {
///     let client = AzureServiceBusClient::connect(connection_string).await?;
///     let options = SendOptions::default().with_content_type("text/plain");
///     let id = client.send("orders", b"hello".to_vec(), options).await?;
///     println!("sent {id}");
///     Ok(())
/// }
/// ```
#[derive(Clone)]
pub struct AzureServiceBusClient {
    client: SdkClient,
}

impl AzureServiceBusClient {
    /// Opens a connection from a namespace connection string.
    pub async fn connect(connection_string: &str) -> ServiceBusResult<Self> {
        let client: AzureClient<BasicRetryPolicy> = AzureClient::new_from_connection_string(
            connection_string,
            ServiceBusClientOptions::default(),
        )
        .await
        .map_err(|e| ServiceBusError::ConnectionFailed(e.to_string()))?;

        log::info!("Connected to Azure Service Bus");
        Ok(Self {
            client: Arc::new(Mutex::new(client)),
        })
    }

    /// Like [`connect`](Self::connect), retrying transient failures.
    pub async fn connect_with_retry(
        connection_string: &str,
        config: &RetryConfig,
        cancel: &CancellationToken,
    ) -> ServiceBusResult<Self> {
        retry(cancel, config, || Self::connect(connection_string)).await
    }

    fn build_message(body: Vec<u8>, options: &SendOptions) -> ServiceBusResult<(String, ServiceBusMessage)> {
        let message_id = options
            .message_id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        let mut message = ServiceBusMessage::new(body);
        message
            .set_message_id(&message_id)
            .map_err(|e| ServiceBusError::MessageSendFailed(format!("invalid message id: {e}")))?;

        if let Some(content_type) = &options.content_type {
            message.set_content_type(content_type.clone());
        }

        if !options.properties.is_empty() {
            *message.application_properties_mut() =
                Some(to_application_properties(&options.properties));
        }

        Ok((message_id, message))
    }

    fn build_batch(bodies: Vec<Vec<u8>>, options: &SendOptions) -> ServiceBusResult<Vec<ServiceBusMessage>> {
        let mut messages = Vec::with_capacity(bodies.len());
        for (index, body) in bodies.into_iter().enumerate() {
            // Only the first message may keep an explicit id.
            let mut per_message = options.clone();
            if index > 0 {
                per_message.message_id = None;
            }
            let (_, message) = Self::build_message(body, &per_message)?;
            messages.push(message);
        }
        Ok(messages)
    }

    async fn send_all(
        &self,
        queue_or_topic: &str,
        messages: Vec<ServiceBusMessage>,
    ) -> ServiceBusResult<()> {
        let mut sender = {
            let mut client = self.client.lock().await;
            client
                .create_sender(queue_or_topic, ServiceBusSenderOptions::default())
                .await
                .map_err(|e| {
                    ServiceBusError::ProducerCreationFailed(format!(
                        "Failed to create sender for {queue_or_topic}: {e}"
                    ))
                })?
        };

        let mut messages = messages;
        let result = if messages.len() == 1 {
            match messages.pop() {
                Some(message) => sender
                    .send_message(message)
                    .await
                    .map_err(|e| ServiceBusError::MessageSendFailed(e.to_string())),
                None => Ok(()),
            }
        } else {
            sender
                .send_messages(messages)
                .await
                .map_err(|e| ServiceBusError::MessageSendFailed(e.to_string()))
        };

        if let Err(e) = sender.dispose().await {
            log::warn!("Failed to dispose sender for {queue_or_topic}: {e}");
        }

        result
    }
}

#[async_trait]
impl ServiceBusClient for AzureServiceBusClient {
    async fn send(
        &self,
        queue_or_topic: &str,
        body: Vec<u8>,
        options: SendOptions,
    ) -> ServiceBusResult<String> {
        let (message_id, message) = Self::build_message(body, &options)?;
        self.send_all(queue_or_topic, vec![message]).await?;

        log::debug!("Sent message {message_id} to {queue_or_topic}");
        Ok(message_id)
    }

    async fn send_batch(
        &self,
        queue_or_topic: &str,
        bodies: Vec<Vec<u8>>,
        options: SendOptions,
    ) -> ServiceBusResult<()> {
        let messages = Self::build_batch(bodies, &options)?;
        if messages.is_empty() {
            return Ok(());
        }

        let count = messages.len();
        self.send_all(queue_or_topic, messages).await?;
        log::debug!("Sent batch of {count} messages to {queue_or_topic}");
        Ok(())
    }

    async fn create_receiver(
        &self,
        queue_or_subscription: &str,
    ) -> ServiceBusResult<Box<dyn MessageReceiver>> {
        let entity: EntityPath = queue_or_subscription.parse()?;
        let receiver = open_receiver(&self.client, &entity).await?;

        log::debug!("Created receiver for {entity}");
        Ok(Box::new(AzureReceiver::new(self.client.clone(), entity, receiver)))
    }
}

async fn open_receiver(client: &SdkClient, entity: &EntityPath) -> ServiceBusResult<ServiceBusReceiver> {
    let mut client = client.lock().await;
    let receiver = match entity {
        EntityPath::Queue(queue) => {
            client
                .create_receiver_for_queue(queue.clone(), ServiceBusReceiverOptions::default())
                .await
        }
        EntityPath::Subscription {
            topic,
            subscription,
        } => {
            client
                .create_receiver_for_subscription(
                    topic.clone(),
                    subscription.clone(),
                    ServiceBusReceiverOptions::default(),
                )
                .await
        }
    };

    receiver.map_err(|e| {
        ServiceBusError::ConsumerCreationFailed(format!(
            "Failed to create receiver for {entity}: {e}"
        ))
    })
}

/// One SDK receiver and the messages it has handed out.
///
/// A lane with unsettled messages is reserved for settling them, so
/// completes and abandons never queue behind another worker's receive.
struct Lane {
    id: usize,
    state: Mutex<LaneState>,
}

struct LaneState {
    receiver: Option<ServiceBusReceiver>,
    in_flight: HashMap<LockToken, ServiceBusReceivedMessage>,
}

impl Lane {
    fn new(id: usize, receiver: ServiceBusReceiver) -> Arc<Self> {
        Arc::new(Self {
            id,
            state: Mutex::new(LaneState {
                receiver: Some(receiver),
                in_flight: HashMap::new(),
            }),
        })
    }

    fn issue_token(&self) -> LockToken {
        LockToken::new(format!("{}{LANE_SEPARATOR}{}", self.id, uuid::Uuid::new_v4()))
    }
}

fn lane_of(lock_token: &LockToken) -> Option<usize> {
    let (lane, _) = lock_token.as_str().split_once(LANE_SEPARATOR)?;
    lane.parse().ok()
}

#[derive(Debug, Clone, Copy)]
enum Settlement {
    Complete,
    Abandon,
}

/// Receiver over a set of `azservicebus` peek-lock receivers.
///
/// The SDK receiver needs exclusive access for every call, so concurrent
/// receives each get their own lane. Lanes are opened on demand and settle
/// messages on the lane that received them; the lock token records which.
pub struct AzureReceiver {
    client: SdkClient,
    entity: EntityPath,
    lanes: RwLock<Vec<Arc<Lane>>>,
    closed: AtomicBool,
}

impl AzureReceiver {
    fn new(client: SdkClient, entity: EntityPath, receiver: ServiceBusReceiver) -> Self {
        Self {
            client,
            entity,
            lanes: RwLock::new(vec![Lane::new(0, receiver)]),
            closed: AtomicBool::new(false),
        }
    }

    async fn receive_on(
        &self,
        lane: &Lane,
        mut state: MutexGuard<'_, LaneState>,
        max_messages: u32,
        timeout: Duration,
    ) -> ServiceBusResult<Vec<Message>> {
        let Some(receiver) = state.receiver.as_mut() else {
            return Err(ServiceBusError::ReceiverClosed);
        };

        let received = receiver
            .receive_messages_with_max_wait_time(max_messages, timeout)
            .await
            .map_err(|e| ServiceBusError::MessageReceiveFailed(e.to_string()))?;

        // No await past this point; every delivered message is tracked.
        let mut messages = Vec::with_capacity(received.len());
        for native in received {
            let lock_token = lane.issue_token();
            messages.push(to_message(&native, lock_token.clone()));
            state.in_flight.insert(lock_token, native);
        }

        Ok(messages)
    }

    async fn lane_for(&self, lock_token: &LockToken) -> ServiceBusResult<Arc<Lane>> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ServiceBusError::ReceiverClosed);
        }

        let lost = || ServiceBusError::MessageLockLost(lock_token.to_string());
        let id = lane_of(lock_token).ok_or_else(lost)?;
        self.lanes.read().await.get(id).cloned().ok_or_else(lost)
    }

    async fn settle(&self, lock_token: &LockToken, settlement: Settlement) -> ServiceBusResult<()> {
        let lane = self.lane_for(lock_token).await?;
        let mut guard = lane.state.lock().await;
        let state = &mut *guard;

        let native = state
            .in_flight
            .remove(lock_token)
            .ok_or_else(|| ServiceBusError::MessageLockLost(lock_token.to_string()))?;
        let Some(receiver) = state.receiver.as_mut() else {
            return Err(ServiceBusError::ReceiverClosed);
        };

        match settlement {
            Settlement::Complete => receiver
                .complete_message(&native)
                .await
                .map_err(|e| ServiceBusError::MessageCompleteFailed(e.to_string())),
            Settlement::Abandon => receiver
                .abandon_message(&native, None)
                .await
                .map_err(|e| ServiceBusError::MessageAbandonFailed(e.to_string())),
        }
    }
}

#[async_trait]
impl MessageReceiver for AzureReceiver {
    async fn receive(&self, max_messages: u32, timeout: Duration) -> ServiceBusResult<Vec<Message>> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ServiceBusError::ReceiverClosed);
        }

        let lanes = self.lanes.read().await.clone();
        for lane in &lanes {
            if let Ok(state) = lane.state.try_lock() {
                if state.receiver.is_some() && state.in_flight.is_empty() {
                    return self.receive_on(lane, state, max_messages, timeout).await;
                }
            }
        }

        // Every lane is busy: open another, locked before other workers can see it.
        let lane;
        let state;
        {
            let mut lanes = self.lanes.write().await;
            if self.closed.load(Ordering::SeqCst) {
                return Err(ServiceBusError::ReceiverClosed);
            }

            let receiver = open_receiver(&self.client, &self.entity).await?;
            lane = Lane::new(lanes.len(), receiver);
            state = lane.state.lock().await;
            lanes.push(lane.clone());
        }
        log::debug!("Opened receiver lane {} for {}", lane.id, self.entity);

        self.receive_on(&lane, state, max_messages, timeout).await
    }

    async fn complete(&self, lock_token: &LockToken) -> ServiceBusResult<()> {
        self.settle(lock_token, Settlement::Complete).await
    }

    async fn abandon(&self, lock_token: &LockToken) -> ServiceBusResult<()> {
        self.settle(lock_token, Settlement::Abandon).await
    }

    async fn close(&self) -> ServiceBusResult<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let lanes = std::mem::take(&mut *self.lanes.write().await);
        let lane_count = lanes.len();
        let mut dropped = 0;
        let mut result = Ok(());

        for lane in lanes {
            let mut state = lane.state.lock().await;
            dropped += state.in_flight.len();
            state.in_flight.clear();
            if let Some(receiver) = state.receiver.take() {
                result = result.and(receiver.dispose().await.map_err(ServiceBusError::from));
            }
        }

        if dropped > 0 {
            log::warn!(
                "Closing receiver for {} with {dropped} unsettled messages, they return after lock expiry",
                self.entity
            );
        }
        log::debug!("Disposed {lane_count} receiver lanes for {}", self.entity);
        result
    }
}

fn to_message(native: &ServiceBusReceivedMessage, lock_token: LockToken) -> Message {
    let id = native
        .message_id()
        .map(|id| id.into_owned())
        .unwrap_or_else(|| "unknown".to_string());

    let body = match native.body() {
        Ok(body) => body.to_vec(),
        Err(e) => {
            log::warn!("Message {id} has no readable body: {e}");
            Vec::new()
        }
    };

    Message {
        id,
        body,
        lock_token,
        content_type: native.content_type().map(str::to_string),
        properties: native
            .application_properties()
            .map(from_application_properties)
            .unwrap_or_default(),
        enqueued_at: to_chrono(native.enqueued_time()),
        delivery_count: native.delivery_count().unwrap_or(1),
    }
}

/// Maps JSON properties onto AMQP simple values.
///
/// Arrays and objects have no AMQP simple counterpart and are sent as their
/// JSON text.
fn to_application_properties(properties: &HashMap<String, Value>) -> ApplicationProperties {
    let mut amqp = ApplicationProperties::default();
    for (key, value) in properties {
        let simple = match value {
            Value::Null => SimpleValue::Null,
            Value::Bool(b) => SimpleValue::Bool(*b),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    SimpleValue::from(i)
                } else if let Some(u) = n.as_u64() {
                    SimpleValue::from(u)
                } else {
                    SimpleValue::from(n.as_f64().unwrap_or_default())
                }
            }
            Value::String(s) => SimpleValue::from(s.as_str()),
            Value::Array(_) | Value::Object(_) => {
                log::debug!("Sending structured property {key} as JSON text");
                SimpleValue::String(value.to_string())
            }
        };
        amqp.insert(key.clone(), simple);
    }
    amqp
}

fn from_application_properties(amqp: &ApplicationProperties) -> HashMap<String, Value> {
    let mut properties = HashMap::with_capacity(amqp.len());
    for (key, simple) in amqp.iter() {
        let value = match simple {
            SimpleValue::Null => Value::Null,
            SimpleValue::Bool(b) => Value::from(*b),
            SimpleValue::Ubyte(v) => Value::from(*v),
            SimpleValue::Ushort(v) => Value::from(*v),
            SimpleValue::Uint(v) => Value::from(*v),
            SimpleValue::Ulong(v) => Value::from(*v),
            SimpleValue::Byte(v) => Value::from(*v),
            SimpleValue::Short(v) => Value::from(*v),
            SimpleValue::Int(v) => Value::from(*v),
            SimpleValue::Long(v) => Value::from(*v),
            SimpleValue::Float(v) => Value::from(v.0),
            SimpleValue::Double(v) => Value::from(v.0),
            SimpleValue::Char(c) => Value::from(c.to_string()),
            SimpleValue::Timestamp(ts) => Value::from(ts.milliseconds()),
            SimpleValue::Uuid(u) => Value::from(uuid::Uuid::from_bytes(*u.as_inner()).to_string()),
            SimpleValue::String(s) => Value::from(s.as_str()),
            SimpleValue::Symbol(s) => Value::from(s.0.as_str()),
            other => {
                log::debug!("Skipping property {key} with unsupported AMQP type {other:?}");
                continue;
            }
        };
        properties.insert(key.clone(), value);
    }
    properties
}

fn to_chrono(time: OffsetDateTime) -> DateTime<Utc> {
    let nanos = i64::try_from(time.unix_timestamp_nanos()).unwrap_or_default();
    DateTime::from_timestamp_nanos(nanos)
}
