use crate::consumer::{
    ConsumerConfig, DEFAULT_MAX_CONCURRENT, DEFAULT_MAX_MESSAGES, DEFAULT_RECEIVE_ERROR_BACKOFF,
    DEFAULT_RECEIVE_TIMEOUT, DEFAULT_SHUTDOWN_TIMEOUT,
};
use crate::utils::retry::RetryConfig;
use serde::Deserialize;
use std::time::Duration;

pub const DEFAULT_QUEUE: &str = "default-queue";

/// Service Bus connection and consumer settings
#[derive(Debug, Deserialize, Default, Clone)]
pub struct ServicebusConfig {
    connection_string: Option<String>,
    queue: Option<String>,
    topic: Option<String>,
    subscription: Option<String>,
    concurrency: Option<i64>,
    max_messages: Option<i64>,
    receive_timeout_secs: Option<u64>,
    shutdown_timeout_secs: Option<u64>,
    receive_error_backoff_ms: Option<u64>,
}

fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

impl ServicebusConfig {
    /// Namespace connection string, if configured
    pub fn connection_string(&self) -> Option<&str> {
        non_blank(&self.connection_string)
    }

    pub fn queue(&self) -> &str {
        non_blank(&self.queue).unwrap_or(DEFAULT_QUEUE)
    }

    pub fn topic(&self) -> Option<&str> {
        non_blank(&self.topic)
    }

    pub fn subscription(&self) -> Option<&str> {
        non_blank(&self.subscription)
    }

    /// Entity to consume: `topic/subscriptions/subscription` when both are
    /// set, the queue otherwise.
    pub fn entity(&self) -> String {
        match (self.topic(), self.subscription()) {
            (Some(topic), Some(subscription)) => {
                format!("{topic}/subscriptions/{subscription}")
            }
            _ => self.queue().to_string(),
        }
    }

    /// Queue or topic that producers send to.
    pub fn send_target(&self) -> &str {
        self.topic().unwrap_or_else(|| self.queue())
    }

    /// Worker count; zero or negative values fall back to the default.
    pub fn concurrency(&self) -> usize {
        match self.concurrency {
            Some(n) if n > 0 => usize::try_from(n).unwrap_or(usize::MAX),
            _ => DEFAULT_MAX_CONCURRENT,
        }
    }

    /// Receive batch size; zero or negative values fall back to the default.
    pub fn max_messages(&self) -> u32 {
        match self.max_messages {
            Some(n) if n > 0 => u32::try_from(n).unwrap_or(u32::MAX),
            _ => DEFAULT_MAX_MESSAGES,
        }
    }

    pub fn receive_timeout_secs(&self) -> u64 {
        self.receive_timeout_secs
            .unwrap_or(DEFAULT_RECEIVE_TIMEOUT.as_secs())
    }

    pub fn shutdown_timeout_secs(&self) -> u64 {
        self.shutdown_timeout_secs
            .unwrap_or(DEFAULT_SHUTDOWN_TIMEOUT.as_secs())
    }

    pub fn receive_error_backoff_ms(&self) -> u64 {
        self.receive_error_backoff_ms
            .unwrap_or(DEFAULT_RECEIVE_ERROR_BACKOFF.as_millis() as u64)
    }

    /// Builds the consumer settings for [`entity`](Self::entity).
    pub fn consumer_config(&self) -> ConsumerConfig {
        ConsumerConfig::new(self.entity())
            .with_max_concurrent(self.concurrency())
            .with_max_messages(self.max_messages())
            .with_receive_timeout(Duration::from_secs(self.receive_timeout_secs()))
            .with_shutdown_timeout(Duration::from_secs(self.shutdown_timeout_secs()))
            .with_receive_error_backoff(Duration::from_millis(self.receive_error_backoff_ms()))
            .normalized()
    }
}

/// Retry settings for connecting to the broker
#[derive(Debug, Deserialize, Default, Clone)]
pub struct RetrySettings {
    max_attempts: Option<u32>,
    initial_delay_ms: Option<u64>,
    max_delay_ms: Option<u64>,
    multiplier: Option<f64>,
}

impl RetrySettings {
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts.unwrap_or(3)
    }

    pub fn initial_delay_ms(&self) -> u64 {
        self.initial_delay_ms.unwrap_or(100)
    }

    pub fn max_delay_ms(&self) -> u64 {
        self.max_delay_ms.unwrap_or(5000)
    }

    pub fn multiplier(&self) -> f64 {
        self.multiplier.unwrap_or(2.0)
    }

    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.max_attempts(),
            initial_delay: Duration::from_millis(self.initial_delay_ms()),
            max_delay: Duration::from_millis(self.max_delay_ms()),
            multiplier: self.multiplier(),
        }
    }
}
