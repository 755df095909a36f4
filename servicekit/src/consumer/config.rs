use std::time::Duration;

pub const DEFAULT_MAX_CONCURRENT: usize = 1;
pub const DEFAULT_MAX_MESSAGES: u32 = 10;
pub const DEFAULT_RECEIVE_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_RECEIVE_ERROR_BACKOFF: Duration = Duration::from_secs(1);
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_LOG_TARGET: &str = "servicekit::consumer";

/// Immutable configuration for one [`Consumer`](super::Consumer).
///
/// Zero values are replaced by the defaults when the consumer is built, so a
/// partially filled config is always usable.
///
/// # Examples
///
/// ```no_run
/// use servicekit::consumer::ConsumerConfig;
/// use std::time::Duration;
///
/// let config = ConsumerConfig::new("orders")
///     .with_max_concurrent(4)
///     .with_max_messages(20)
///     .with_receive_timeout(Duration::from_secs(2));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct ConsumerConfig {
    /// Queue name or `<topic>/subscriptions/<subscription>`
    pub queue_or_subscription: String,
    /// Number of independent worker loops
    pub max_concurrent: usize,
    /// Upper bound for one receive call
    pub max_messages: u32,
    /// How long one receive call may wait for messages
    pub receive_timeout: Duration,
    /// Pause after a failed receive before polling again
    pub receive_error_backoff: Duration,
    /// Upper bound for draining workers on stop
    pub shutdown_timeout: Duration,
    /// `log` target every consumer record is emitted under
    pub log_target: String,
}

impl ConsumerConfig {
    pub fn new(queue_or_subscription: impl Into<String>) -> Self {
        Self {
            queue_or_subscription: queue_or_subscription.into(),
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            max_messages: DEFAULT_MAX_MESSAGES,
            receive_timeout: DEFAULT_RECEIVE_TIMEOUT,
            receive_error_backoff: DEFAULT_RECEIVE_ERROR_BACKOFF,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            log_target: DEFAULT_LOG_TARGET.to_string(),
        }
    }

    pub fn with_max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.max_concurrent = max_concurrent;
        self
    }

    pub fn with_max_messages(mut self, max_messages: u32) -> Self {
        self.max_messages = max_messages;
        self
    }

    pub fn with_receive_timeout(mut self, receive_timeout: Duration) -> Self {
        self.receive_timeout = receive_timeout;
        self
    }

    pub fn with_receive_error_backoff(mut self, backoff: Duration) -> Self {
        self.receive_error_backoff = backoff;
        self
    }

    pub fn with_shutdown_timeout(mut self, shutdown_timeout: Duration) -> Self {
        self.shutdown_timeout = shutdown_timeout;
        self
    }

    pub fn with_log_target(mut self, log_target: impl Into<String>) -> Self {
        self.log_target = log_target.into();
        self
    }

    /// Replaces zero or empty values with the defaults.
    pub fn normalized(mut self) -> Self {
        if self.max_concurrent == 0 {
            self.max_concurrent = DEFAULT_MAX_CONCURRENT;
        }
        if self.max_messages == 0 {
            self.max_messages = DEFAULT_MAX_MESSAGES;
        }
        if self.receive_timeout.is_zero() {
            self.receive_timeout = DEFAULT_RECEIVE_TIMEOUT;
        }
        if self.receive_error_backoff.is_zero() {
            self.receive_error_backoff = DEFAULT_RECEIVE_ERROR_BACKOFF;
        }
        if self.shutdown_timeout.is_zero() {
            self.shutdown_timeout = DEFAULT_SHUTDOWN_TIMEOUT;
        }
        if self.log_target.trim().is_empty() {
            self.log_target = DEFAULT_LOG_TARGET.to_string();
        }
        self
    }
}
