//! Shared helpers for consumer integration tests.
#![allow(dead_code)]

use servicekit::consumer::ConsumerConfig;
use servicekit::model::SendOptions;
use servicekit::service_bus::{InMemoryServiceBus, ServiceBusClient};
use std::future::Future;
use std::time::Duration;

/// Consumer settings with short timeouts so tests finish quickly.
pub fn fast_config(entity: &str) -> ConsumerConfig {
    ConsumerConfig::new(entity)
        .with_receive_timeout(Duration::from_millis(100))
        .with_receive_error_backoff(Duration::from_millis(50))
        .with_shutdown_timeout(Duration::from_secs(2))
}

/// Sends one message per id, in order.
pub async fn send_ids(bus: &InMemoryServiceBus, entity: &str, ids: &[&str]) {
    for id in ids {
        bus.send(
            entity,
            format!("body of {id}").into_bytes(),
            SendOptions::default().with_message_id(*id),
        )
        .await
        .unwrap();
    }
}

/// Polls `condition` every 10ms until it holds or `timeout` elapses.
pub async fn wait_until<F, Fut>(timeout: Duration, condition: F) -> bool
where
    F: Fn() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

pub fn count_of(ids: &[String], id: &str) -> usize {
    ids.iter().filter(|candidate| candidate.as_str() == id).count()
}
