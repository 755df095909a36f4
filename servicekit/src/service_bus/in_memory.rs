use super::{EntityPath, MessageReceiver, ServiceBusClient};
use crate::common::{ServiceBusError, ServiceBusResult};
use crate::model::{LockToken, Message, SendOptions};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;

/// In-memory broker with Service Bus peek-lock semantics.
///
/// Each entity (queue or `<topic>/subscriptions/<name>`) is an ordered
/// sequence guarded by one mutex. Received messages move to an in-flight
/// table keyed by lock token until they are completed, abandoned, or their
/// receiver is closed. Sending to a topic fans out to every subscription
/// registered with [`InMemoryServiceBus::create_subscription`].
///
/// Faults can be injected to exercise the consumer's error paths.
///
/// # Examples
///
/// ```no_run
/// use servicekit::model::SendOptions;
/// use servicekit::service_bus::{InMemoryServiceBus, ServiceBusClient};
/// use std::time::Duration;
///
/// async fn example() -> Result<(), Box<dyn std::error::Error>> {
///     let bus = InMemoryServiceBus::new();
///     bus.send("orders", b"hello".to_vec(), SendOptions::default()).await?;
///
///     let receiver = bus.create_receiver("orders").await?;
///     let messages = receiver.receive(10, Duration::from_secs(1)).await?;
///     receiver.complete(&messages[0].lock_token).await?;
///     Ok(())
/// }
/// ```
#[derive(Clone, Default)]
pub struct InMemoryServiceBus {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    state: Mutex<BrokerState>,
    faults: Mutex<Faults>,
    notify: Notify,
    next_receiver_id: AtomicUsize,
    receive_calls: AtomicUsize,
    active_receives: AtomicUsize,
    peak_receives: AtomicUsize,
}

#[derive(Default)]
struct BrokerState {
    entities: HashMap<String, VecDeque<Message>>,
    subscriptions: HashMap<String, Vec<String>>,
    in_flight: HashMap<LockToken, InFlight>,
    completed: Vec<String>,
    abandoned: Vec<String>,
    closed_receivers: usize,
}

struct InFlight {
    entity: String,
    receiver_id: usize,
    message: Message,
}

#[derive(Default)]
struct Faults {
    receive_error: Option<ServiceBusError>,
    receive_timeouts: usize,
    receive_latency: Option<Duration>,
    complete_error: Option<ServiceBusError>,
    abandon_error: Option<ServiceBusError>,
    rejected_entities: HashSet<String>,
}

impl InMemoryServiceBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a subscription; later sends to `topic` are copied into it.
    pub async fn create_subscription(&self, topic: &str, subscription: &str) {
        let path = EntityPath::subscription(topic, subscription).to_string();
        let mut state = self.inner.state.lock().await;
        let names = state.subscriptions.entry(topic.to_string()).or_default();
        if !names.contains(&path) {
            names.push(path.clone());
        }
        state.entities.entry(path).or_default();
    }

    /// Every receive fails with `error` until cleared with `None`.
    pub async fn set_receive_error(&self, error: Option<ServiceBusError>) {
        self.inner.faults.lock().await.receive_error = error;
    }

    /// The next `count` receives report a timeout without waiting.
    pub async fn fail_next_receives_with_timeout(&self, count: usize) {
        self.inner.faults.lock().await.receive_timeouts = count;
    }

    /// Delays every receive before it looks at the entity.
    pub async fn set_receive_latency(&self, latency: Option<Duration>) {
        self.inner.faults.lock().await.receive_latency = latency;
    }

    /// Every complete fails with `error`; the message stays locked.
    pub async fn set_complete_error(&self, error: Option<ServiceBusError>) {
        self.inner.faults.lock().await.complete_error = error;
    }

    /// Every abandon fails with `error`; the message stays locked.
    pub async fn set_abandon_error(&self, error: Option<ServiceBusError>) {
        self.inner.faults.lock().await.abandon_error = error;
    }

    /// Receiver creation for `entity` fails from now on.
    pub async fn reject_receivers_for(&self, entity: &str) {
        self.inner
            .faults
            .lock()
            .await
            .rejected_entities
            .insert(entity.to_string());
    }

    /// Ids of completed messages, in completion order.
    pub async fn completed_ids(&self) -> Vec<String> {
        self.inner.state.lock().await.completed.clone()
    }

    /// Ids of abandoned messages, in abandon order.
    pub async fn abandoned_ids(&self) -> Vec<String> {
        self.inner.state.lock().await.abandoned.clone()
    }

    /// Messages waiting in `entity`, not counting locked ones.
    pub async fn message_count(&self, entity: &str) -> usize {
        self.inner
            .state
            .lock()
            .await
            .entities
            .get(entity)
            .map_or(0, VecDeque::len)
    }

    /// Messages currently checked out by a receiver.
    pub async fn in_flight_count(&self) -> usize {
        self.inner.state.lock().await.in_flight.len()
    }

    pub async fn closed_receivers(&self) -> usize {
        self.inner.state.lock().await.closed_receivers
    }

    /// Total number of receive calls across all receivers.
    pub fn receive_calls(&self) -> usize {
        self.inner.receive_calls.load(Ordering::SeqCst)
    }

    /// Highest number of receive calls that were outstanding at the same time.
    pub fn peak_concurrent_receives(&self) -> usize {
        self.inner.peak_receives.load(Ordering::SeqCst)
    }

    async fn enqueue(&self, target: &str, message: Message) {
        let mut state = self.inner.state.lock().await;
        match state.subscriptions.get(target).cloned() {
            Some(paths) if !paths.is_empty() => {
                for path in paths {
                    state
                        .entities
                        .entry(path)
                        .or_default()
                        .push_back(message.clone());
                }
            }
            _ => state
                .entities
                .entry(target.to_string())
                .or_default()
                .push_back(message),
        }
        drop(state);
        self.inner.notify.notify_waiters();
    }
}

fn build_message(body: Vec<u8>, options: &SendOptions) -> Message {
    let id = options
        .message_id
        .clone()
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    Message {
        id,
        body,
        lock_token: LockToken::new(""),
        content_type: options.content_type.clone(),
        properties: options.properties.clone(),
        enqueued_at: Utc::now(),
        delivery_count: 0,
    }
}

fn validate_target(queue_or_topic: &str) -> ServiceBusResult<()> {
    match queue_or_topic.parse::<EntityPath>()? {
        EntityPath::Queue(_) => Ok(()),
        EntityPath::Subscription { .. } => Err(ServiceBusError::InvalidQueueName(format!(
            "cannot send to a subscription: {queue_or_topic}"
        ))),
    }
}

#[async_trait]
impl ServiceBusClient for InMemoryServiceBus {
    async fn send(
        &self,
        queue_or_topic: &str,
        body: Vec<u8>,
        options: SendOptions,
    ) -> ServiceBusResult<String> {
        validate_target(queue_or_topic)?;
        let message = build_message(body, &options);
        let id = message.id.clone();
        self.enqueue(queue_or_topic, message).await;
        log::debug!("Enqueued message {id} on {queue_or_topic}");
        Ok(id)
    }

    async fn send_batch(
        &self,
        queue_or_topic: &str,
        bodies: Vec<Vec<u8>>,
        options: SendOptions,
    ) -> ServiceBusResult<()> {
        validate_target(queue_or_topic)?;
        let count = bodies.len();
        for (index, body) in bodies.into_iter().enumerate() {
            // A shared explicit id would collide, so only the first message keeps it.
            let mut message = build_message(body, &options);
            if options.message_id.is_some() && index > 0 {
                message.id = uuid::Uuid::new_v4().to_string();
            }
            self.enqueue(queue_or_topic, message).await;
        }
        log::debug!("Enqueued batch of {count} messages on {queue_or_topic}");
        Ok(())
    }

    async fn create_receiver(
        &self,
        queue_or_subscription: &str,
    ) -> ServiceBusResult<Box<dyn MessageReceiver>> {
        let entity: EntityPath = queue_or_subscription.parse()?;
        let entity = entity.to_string();

        if self
            .inner
            .faults
            .lock()
            .await
            .rejected_entities
            .contains(&entity)
        {
            return Err(ServiceBusError::ConsumerCreationFailed(format!(
                "entity {entity} rejected receiver creation"
            )));
        }

        self.inner
            .state
            .lock()
            .await
            .entities
            .entry(entity.clone())
            .or_default();

        Ok(Box::new(InMemoryReceiver {
            id: self.inner.next_receiver_id.fetch_add(1, Ordering::SeqCst),
            entity,
            bus: self.clone(),
            closed: AtomicBool::new(false),
        }))
    }
}

/// Receiver handed out by [`InMemoryServiceBus`].
pub struct InMemoryReceiver {
    id: usize,
    entity: String,
    bus: InMemoryServiceBus,
    closed: AtomicBool,
}

/// Tracks outstanding receive calls for the peak statistic.
struct ReceiveGuard<'a> {
    inner: &'a Inner,
}

impl<'a> ReceiveGuard<'a> {
    fn enter(inner: &'a Inner) -> Self {
        inner.receive_calls.fetch_add(1, Ordering::SeqCst);
        let active = inner.active_receives.fetch_add(1, Ordering::SeqCst) + 1;
        inner.peak_receives.fetch_max(active, Ordering::SeqCst);
        Self { inner }
    }
}

impl Drop for ReceiveGuard<'_> {
    fn drop(&mut self) {
        self.inner.active_receives.fetch_sub(1, Ordering::SeqCst);
    }
}

impl InMemoryReceiver {
    fn ensure_open(&self) -> ServiceBusResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            Err(ServiceBusError::ReceiverClosed)
        } else {
            Ok(())
        }
    }

    async fn injected_receive_fault(&self) -> ServiceBusResult<Option<Duration>> {
        let mut faults = self.bus.inner.faults.lock().await;
        if let Some(error) = &faults.receive_error {
            return Err(error.clone());
        }
        if faults.receive_timeouts > 0 {
            faults.receive_timeouts -= 1;
            return Err(ServiceBusError::OperationTimeout(format!(
                "receive on {} timed out",
                self.entity
            )));
        }
        Ok(faults.receive_latency)
    }

    async fn take_batch(&self, max_messages: u32) -> Vec<Message> {
        let mut state = self.bus.inner.state.lock().await;
        let BrokerState {
            entities,
            in_flight,
            ..
        } = &mut *state;

        let Some(queue) = entities.get_mut(&self.entity) else {
            return Vec::new();
        };

        let count = queue.len().min(max_messages as usize);
        let mut batch = Vec::with_capacity(count);
        for mut message in queue.drain(..count) {
            message.lock_token = LockToken::generate();
            message.delivery_count += 1;
            in_flight.insert(
                message.lock_token.clone(),
                InFlight {
                    entity: self.entity.clone(),
                    receiver_id: self.id,
                    message: message.clone(),
                },
            );
            batch.push(message);
        }
        batch
    }

    /// Removes the in-flight entry if this receiver owns `lock_token`.
    async fn release(
        &self,
        lock_token: &LockToken,
        fault: Option<ServiceBusError>,
    ) -> ServiceBusResult<InFlight> {
        self.ensure_open()?;
        if let Some(error) = fault {
            return Err(error);
        }

        let mut state = self.bus.inner.state.lock().await;
        match state.in_flight.get(lock_token) {
            Some(entry) if entry.receiver_id == self.id => {}
            _ => return Err(ServiceBusError::MessageLockLost(lock_token.to_string())),
        }
        state
            .in_flight
            .remove(lock_token)
            .ok_or_else(|| ServiceBusError::MessageLockLost(lock_token.to_string()))
    }
}

#[async_trait]
impl MessageReceiver for InMemoryReceiver {
    async fn receive(&self, max_messages: u32, timeout: Duration) -> ServiceBusResult<Vec<Message>> {
        self.ensure_open()?;
        let _guard = ReceiveGuard::enter(&self.bus.inner);

        if let Some(latency) = self.injected_receive_fault().await? {
            tokio::time::sleep(latency).await;
        }

        let deadline = Instant::now() + timeout;
        loop {
            // Register for wakeups before looking at the entity so a send in
            // between is not missed.
            let notified = self.bus.inner.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            self.ensure_open()?;
            let batch = self.take_batch(max_messages).await;
            if !batch.is_empty() {
                return Ok(batch);
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(Vec::new());
            }
        }
    }

    async fn complete(&self, lock_token: &LockToken) -> ServiceBusResult<()> {
        let fault = self.bus.inner.faults.lock().await.complete_error.clone();
        let entry = self.release(lock_token, fault).await?;

        self.bus
            .inner
            .state
            .lock()
            .await
            .completed
            .push(entry.message.id);
        Ok(())
    }

    async fn abandon(&self, lock_token: &LockToken) -> ServiceBusResult<()> {
        let fault = self.bus.inner.faults.lock().await.abandon_error.clone();
        let entry = self.release(lock_token, fault).await?;

        let mut state = self.bus.inner.state.lock().await;
        state.abandoned.push(entry.message.id.clone());
        state
            .entities
            .entry(entry.entity)
            .or_default()
            .push_front(entry.message);
        drop(state);

        self.bus.inner.notify.notify_waiters();
        Ok(())
    }

    async fn close(&self) -> ServiceBusResult<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let mut state = self.bus.inner.state.lock().await;
        let owned: Vec<LockToken> = state
            .in_flight
            .iter()
            .filter(|(_, entry)| entry.receiver_id == self.id)
            .map(|(token, _)| token.clone())
            .collect();

        // Locks held by a closed receiver lapse and the messages become visible again.
        for token in owned {
            if let Some(entry) = state.in_flight.remove(&token) {
                state
                    .entities
                    .entry(entry.entity)
                    .or_default()
                    .push_front(entry.message);
            }
        }
        state.closed_receivers += 1;
        drop(state);

        self.bus.inner.notify.notify_waiters();
        log::debug!("Closed in-memory receiver {} for {}", self.id, self.entity);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use claims::{assert_err, assert_matches, assert_ok};
    use serde_json::Value;

    const SHORT: Duration = Duration::from_millis(50);

    #[tokio::test]
    async fn test_receive_respects_batch_size_and_order() {
        let bus = InMemoryServiceBus::new();
        for i in 0..5 {
            let options = SendOptions::default().with_message_id(format!("m{i}"));
            assert_ok!(bus.send("orders", vec![i], options).await);
        }

        let receiver = bus.create_receiver("orders").await.unwrap();
        let first = receiver.receive(3, SHORT).await.unwrap();
        let ids: Vec<_> = first.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["m0", "m1", "m2"]);
        assert_eq!(bus.message_count("orders").await, 2);
        assert_eq!(bus.in_flight_count().await, 3);
    }

    #[tokio::test]
    async fn test_empty_receive_waits_for_timeout() {
        let bus = InMemoryServiceBus::new();
        let receiver = bus.create_receiver("orders").await.unwrap();

        let start = Instant::now();
        let messages = receiver.receive(10, SHORT).await.unwrap();
        assert!(messages.is_empty());
        assert!(start.elapsed() >= SHORT);
    }

    #[tokio::test]
    async fn test_receive_wakes_up_on_send() {
        let bus = InMemoryServiceBus::new();
        let receiver = bus.create_receiver("orders").await.unwrap();

        let sender = bus.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            sender
                .send("orders", b"late".to_vec(), SendOptions::default())
                .await
                .unwrap();
        });

        let messages = receiver.receive(10, Duration::from_secs(5)).await.unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].body, b"late".to_vec());
    }

    #[tokio::test]
    async fn test_complete_removes_and_token_is_single_use() {
        let bus = InMemoryServiceBus::new();
        bus.send("orders", b"a".to_vec(), SendOptions::default().with_message_id("a"))
            .await
            .unwrap();
        let receiver = bus.create_receiver("orders").await.unwrap();
        let message = receiver.receive(1, SHORT).await.unwrap().remove(0);

        assert_ok!(receiver.complete(&message.lock_token).await);
        assert_matches!(
            receiver.complete(&message.lock_token).await,
            Err(ServiceBusError::MessageLockLost(_))
        );
        assert_matches!(
            receiver.abandon(&message.lock_token).await,
            Err(ServiceBusError::MessageLockLost(_))
        );
        assert_eq!(bus.completed_ids().await, vec!["a".to_string()]);
        assert_eq!(bus.message_count("orders").await, 0);
    }

    #[tokio::test]
    async fn test_abandon_redelivers_with_new_token() {
        let bus = InMemoryServiceBus::new();
        bus.send("orders", b"a".to_vec(), SendOptions::default().with_message_id("a"))
            .await
            .unwrap();
        let receiver = bus.create_receiver("orders").await.unwrap();

        let first = receiver.receive(1, SHORT).await.unwrap().remove(0);
        assert_eq!(first.delivery_count, 1);
        assert_ok!(receiver.abandon(&first.lock_token).await);

        let second = receiver.receive(1, SHORT).await.unwrap().remove(0);
        assert_eq!(second.id, "a");
        assert_eq!(second.delivery_count, 2);
        assert_ne!(second.lock_token, first.lock_token);
        assert_eq!(bus.abandoned_ids().await, vec!["a".to_string()]);
    }

    #[tokio::test]
    async fn test_lock_token_is_bound_to_its_receiver() {
        let bus = InMemoryServiceBus::new();
        bus.send("orders", b"a".to_vec(), SendOptions::default())
            .await
            .unwrap();
        let owner = bus.create_receiver("orders").await.unwrap();
        let other = bus.create_receiver("orders").await.unwrap();

        let message = owner.receive(1, SHORT).await.unwrap().remove(0);
        assert_matches!(
            other.complete(&message.lock_token).await,
            Err(ServiceBusError::MessageLockLost(_))
        );
        assert_ok!(owner.complete(&message.lock_token).await);
    }

    #[tokio::test]
    async fn test_close_releases_locks_and_rejects_calls() {
        let bus = InMemoryServiceBus::new();
        bus.send("orders", b"a".to_vec(), SendOptions::default())
            .await
            .unwrap();
        let receiver = bus.create_receiver("orders").await.unwrap();
        let message = receiver.receive(1, SHORT).await.unwrap().remove(0);

        assert_ok!(receiver.close().await);
        assert_ok!(receiver.close().await);
        assert_eq!(bus.closed_receivers().await, 1);
        assert_eq!(bus.message_count("orders").await, 1);
        assert_eq!(
            receiver.receive(1, SHORT).await,
            Err(ServiceBusError::ReceiverClosed)
        );
        assert_eq!(
            receiver.complete(&message.lock_token).await,
            Err(ServiceBusError::ReceiverClosed)
        );
    }

    #[tokio::test]
    async fn test_topic_fans_out_to_subscriptions() {
        let bus = InMemoryServiceBus::new();
        bus.create_subscription("events", "billing").await;
        bus.create_subscription("events", "audit").await;

        let options = SendOptions::default()
            .with_content_type("application/json")
            .with_property("k", "v");
        bus.send("events", b"{}".to_vec(), options).await.unwrap();

        for path in ["events/subscriptions/billing", "events/subscriptions/audit"] {
            let receiver = bus.create_receiver(path).await.unwrap();
            let message = receiver.receive(1, SHORT).await.unwrap().remove(0);
            assert_eq!(message.content_type.as_deref(), Some("application/json"));
            assert_eq!(message.properties.get("k"), Some(&Value::from("v")));
        }
    }

    #[tokio::test]
    async fn test_injected_faults() {
        let bus = InMemoryServiceBus::new();
        let receiver = bus.create_receiver("orders").await.unwrap();

        bus.fail_next_receives_with_timeout(1).await;
        let timeout = receiver.receive(1, SHORT).await.unwrap_err();
        assert!(timeout.is_timeout_or_cancelled());

        bus.set_receive_error(Some(ServiceBusError::ConnectionFailed("down".into())))
            .await;
        assert_eq!(
            receiver.receive(1, SHORT).await,
            Err(ServiceBusError::ConnectionFailed("down".into()))
        );
        bus.set_receive_error(None).await;
        assert_ok!(receiver.receive(1, SHORT).await);

        bus.reject_receivers_for("payments").await;
        assert_matches!(
            bus.create_receiver("payments").await.err(),
            Some(ServiceBusError::ConsumerCreationFailed(_))
        );
    }

    #[tokio::test]
    async fn test_rejects_invalid_entities() {
        let bus = InMemoryServiceBus::new();
        assert_err!(bus.create_receiver("").await.map(|_| ()));
        assert_err!(
            bus.send("events/subscriptions/x", Vec::new(), SendOptions::default())
                .await
        );
    }

    #[tokio::test]
    async fn test_send_batch_assigns_distinct_ids() {
        let bus = InMemoryServiceBus::new();
        bus.send_batch(
            "orders",
            vec![b"1".to_vec(), b"2".to_vec()],
            SendOptions::default().with_message_id("fixed"),
        )
        .await
        .unwrap();

        let receiver = bus.create_receiver("orders").await.unwrap();
        let messages = receiver.receive(10, SHORT).await.unwrap();
        assert_eq!(messages.len(), 2);
        assert_ne!(messages[0].id, messages[1].id);
    }
}
