//! Multi-worker message consumer.
//!
//! A [`Consumer`] runs `max_concurrent` independent workers against one shared
//! receiver. Each worker receives a batch, hands every message to the
//! [`MessageHandler`] in order, completes it on success and abandons it on
//! failure. Receive errors are logged and retried after a fixed backoff; they
//! never stop a worker.
//!
//! ```text
//! Created --start--> Running --stop--> Stopping --drained/timeout--> Stopped
//! ```
//!
//! `Stopped` is terminal. Build a new consumer to resume consumption.

mod config;
mod handler;
mod worker;

pub use self::config::{
    ConsumerConfig, DEFAULT_LOG_TARGET, DEFAULT_MAX_CONCURRENT, DEFAULT_MAX_MESSAGES,
    DEFAULT_RECEIVE_ERROR_BACKOFF, DEFAULT_RECEIVE_TIMEOUT, DEFAULT_SHUTDOWN_TIMEOUT,
};
pub use handler::{MessageContext, MessageHandler};

use crate::common::{ServiceBusError, ServiceBusResult};
use crate::service_bus::{MessageReceiver, ServiceBusClient};
use crate::taskpool::WorkerPool;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use worker::Worker;

/// Lifecycle state of a [`Consumer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConsumerState {
    Created = 0,
    Running = 1,
    Stopping = 2,
    Stopped = 3,
}

impl ConsumerState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => ConsumerState::Created,
            1 => ConsumerState::Running,
            2 => ConsumerState::Stopping,
            _ => ConsumerState::Stopped,
        }
    }
}

/// Receives messages from one queue or subscription and dispatches them to a handler.
///
/// # Examples
///
/// ```no_run
/// use servicekit::common::HandlerError;
/// use servicekit::consumer::{Consumer, ConsumerConfig, MessageContext};
/// use servicekit::service_bus::InMemoryServiceBus;
/// use std::time::Duration;
/// use tokio_util::sync::CancellationToken;
///
/// async fn example() -> Result<(), Box<dyn std::error::Error>> {
///     let bus = InMemoryServiceBus::new();
///     let config = ConsumerConfig::new("orders").with_max_concurrent(2);
///
///     let consumer = Consumer::new(&bus, config, |ctx: MessageContext| async move {
///         println!("processing {}", ctx.message.id);
///         Ok::<(), HandlerError>(())
///     })
///     .await?;
///
///     consumer.start(CancellationToken::new()).await?;
///     // ...
///     consumer.stop(Some(Duration::from_secs(10))).await?;
///     Ok(())
/// }
/// ```
pub struct Consumer {
    config: Arc<ConsumerConfig>,
    receiver: Arc<dyn MessageReceiver>,
    handler: Arc<dyn MessageHandler>,
    state: AtomicU8,
    pool: Mutex<Option<WorkerPool>>,
}

impl Consumer {
    /// Creates a receiver for the configured entity and binds a consumer to it.
    ///
    /// # Errors
    ///
    /// Returns `ConsumerCreationFailed` (or `InvalidQueueName`) when the
    /// receiver cannot be created.
    pub async fn new<H>(
        client: &dyn ServiceBusClient,
        config: ConsumerConfig,
        handler: H,
    ) -> ServiceBusResult<Self>
    where
        H: MessageHandler + 'static,
    {
        let config = config.normalized();
        let receiver = client
            .create_receiver(&config.queue_or_subscription)
            .await
            .map_err(|e| match e {
                ServiceBusError::ConsumerCreationFailed(_) | ServiceBusError::InvalidQueueName(_) => e,
                other => ServiceBusError::ConsumerCreationFailed(format!(
                    "Failed to create receiver for {}: {}",
                    config.queue_or_subscription, other
                )),
            })?;

        Ok(Self::with_receiver(Arc::from(receiver), config, handler))
    }

    /// Binds a consumer to an existing receiver.
    pub fn with_receiver<H>(
        receiver: Arc<dyn MessageReceiver>,
        config: ConsumerConfig,
        handler: H,
    ) -> Self
    where
        H: MessageHandler + 'static,
    {
        Self {
            config: Arc::new(config.normalized()),
            receiver,
            handler: Arc::new(handler),
            state: AtomicU8::new(ConsumerState::Created as u8),
            pool: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &ConsumerConfig {
        &self.config
    }

    pub fn state(&self) -> ConsumerState {
        ConsumerState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Number of workers that have not exited yet.
    pub async fn active_workers(&self) -> usize {
        self.pool
            .lock()
            .await
            .as_ref()
            .map_or(0, WorkerPool::active_workers)
    }

    fn transition(&self, from: ConsumerState, to: ConsumerState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// Spawns the worker pool and returns immediately.
    ///
    /// Cancelling `cancel` makes every worker exit at its next loop check and
    /// interrupts receives in progress.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` unless the consumer is in `Created`.
    pub async fn start(&self, cancel: CancellationToken) -> ServiceBusResult<()> {
        let mut pool_slot = self.pool.lock().await;
        if !self.transition(ConsumerState::Created, ConsumerState::Running) {
            return Err(ServiceBusError::InvalidState(format!(
                "cannot start a consumer in state {:?}",
                self.state()
            )));
        }

        let target = self.config.log_target.as_str();
        log::info!(
            target: target,
            "Starting Service Bus consumer for {} with {} workers",
            self.config.queue_or_subscription,
            self.config.max_concurrent
        );

        let mut pool = WorkerPool::new(cancel.child_token());
        for id in 0..self.config.max_concurrent {
            let worker = Worker {
                id,
                config: self.config.clone(),
                receiver: self.receiver.clone(),
                handler: self.handler.clone(),
                scope: pool.stop_token(),
                caller: cancel.clone(),
            };
            pool.spawn(worker.run());
        }

        *pool_slot = Some(pool);
        Ok(())
    }

    /// Stops the workers and closes the receiver.
    ///
    /// Waits for workers to drain for at most the configured shutdown timeout,
    /// or `deadline` when that is shorter. On timeout a warning is logged and
    /// the receiver is closed anyway. Stopping a stopped consumer is a no-op.
    ///
    /// # Errors
    ///
    /// Returns the error reported by the receiver while closing.
    pub async fn stop(&self, deadline: Option<Duration>) -> ServiceBusResult<()> {
        let target = self.config.log_target.as_str();

        if !self.transition(ConsumerState::Running, ConsumerState::Stopping)
            && !self.transition(ConsumerState::Created, ConsumerState::Stopping)
        {
            log::debug!(target: target, "Consumer already {:?}, ignoring stop", self.state());
            return Ok(());
        }

        log::info!(
            target: target,
            "Stopping Service Bus consumer for {}",
            self.config.queue_or_subscription
        );

        let wait = deadline.map_or(self.config.shutdown_timeout, |d| {
            d.min(self.config.shutdown_timeout)
        });

        let pool = self.pool.lock().await.take();
        if let Some(mut pool) = pool {
            if pool.shutdown(wait).await {
                log::info!(target: target, "All workers stopped");
            } else {
                log::warn!(
                    target: target,
                    "Timeout waiting for workers to stop after {:?}, {} still running",
                    wait,
                    pool.active_workers()
                );
            }
        }

        let closed = self.receiver.close().await;
        self.state
            .store(ConsumerState::Stopped as u8, Ordering::SeqCst);

        match closed {
            Ok(()) => {
                log::info!(target: target, "Consumer stopped");
                Ok(())
            }
            Err(e) => {
                log::error!(target: target, "Failed to close receiver: {e}");
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::HandlerError;
    use crate::service_bus::InMemoryServiceBus;
    use claims::{assert_matches, assert_ok};

    fn noop_config() -> ConsumerConfig {
        ConsumerConfig::new("orders")
            .with_receive_timeout(Duration::from_millis(20))
            .with_receive_error_backoff(Duration::from_millis(20))
    }

    async fn noop_consumer(bus: &InMemoryServiceBus) -> Consumer {
        Consumer::new(bus, noop_config(), |_ctx: MessageContext| async {
            Ok::<(), HandlerError>(())
        })
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_state_transitions() {
        let bus = InMemoryServiceBus::new();
        let consumer = noop_consumer(&bus).await;
        assert_eq!(consumer.state(), ConsumerState::Created);

        assert_ok!(consumer.start(CancellationToken::new()).await);
        assert_eq!(consumer.state(), ConsumerState::Running);

        assert_ok!(consumer.stop(None).await);
        assert_eq!(consumer.state(), ConsumerState::Stopped);
        assert_eq!(bus.closed_receivers().await, 1);
    }

    #[tokio::test]
    async fn test_start_twice_is_rejected() {
        let bus = InMemoryServiceBus::new();
        let consumer = noop_consumer(&bus).await;

        assert_ok!(consumer.start(CancellationToken::new()).await);
        assert_matches!(
            consumer.start(CancellationToken::new()).await,
            Err(ServiceBusError::InvalidState(_))
        );
        assert_ok!(consumer.stop(None).await);
    }

    #[tokio::test]
    async fn test_stopped_consumer_cannot_restart() {
        let bus = InMemoryServiceBus::new();
        let consumer = noop_consumer(&bus).await;

        assert_ok!(consumer.start(CancellationToken::new()).await);
        assert_ok!(consumer.stop(None).await);
        assert_ok!(consumer.stop(None).await);
        assert_eq!(bus.closed_receivers().await, 1);
        assert_matches!(
            consumer.start(CancellationToken::new()).await,
            Err(ServiceBusError::InvalidState(_))
        );
    }

    #[tokio::test]
    async fn test_stop_without_start_closes_receiver() {
        let bus = InMemoryServiceBus::new();
        let consumer = noop_consumer(&bus).await;

        assert_ok!(consumer.stop(None).await);
        assert_eq!(consumer.state(), ConsumerState::Stopped);
        assert_eq!(bus.closed_receivers().await, 1);
    }

    #[tokio::test]
    async fn test_zero_config_values_are_normalized() {
        let bus = InMemoryServiceBus::new();
        let config = ConsumerConfig::new("orders")
            .with_max_concurrent(0)
            .with_max_messages(0);
        let consumer = Consumer::new(&bus, config, |_ctx: MessageContext| async {
            Ok::<(), HandlerError>(())
        })
        .await
        .unwrap();

        assert_eq!(consumer.config().max_concurrent, 1);
        assert_eq!(consumer.config().max_messages, 10);
    }

    #[tokio::test]
    async fn test_construction_failure_is_returned() {
        let bus = InMemoryServiceBus::new();
        bus.reject_receivers_for("orders").await;

        let result = Consumer::new(&bus, noop_config(), |_ctx: MessageContext| async {
            Ok::<(), HandlerError>(())
        })
        .await;
        assert_matches!(result.err(), Some(ServiceBusError::ConsumerCreationFailed(_)));

        let invalid = Consumer::new(&bus, ConsumerConfig::new(""), |_ctx: MessageContext| async {
            Ok::<(), HandlerError>(())
        })
        .await;
        assert_matches!(invalid.err(), Some(ServiceBusError::InvalidQueueName(_)));
    }
}
