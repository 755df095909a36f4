//! Exponential backoff retry for fallible async operations.

use crate::common::{ServiceBusError, ServiceBusResult};
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Retry behaviour for [`retry`].
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Total number of attempts, including the first one
    pub max_attempts: u32,
    /// Delay after the first failed attempt
    pub initial_delay: Duration,
    /// Upper bound for any single delay
    pub max_delay: Duration,
    /// Growth factor applied per attempt
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Delay to wait after the zero-based `attempt` failed.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.max(1.0).powi(attempt.min(i32::MAX as u32) as i32);
        let delay = self.initial_delay.as_secs_f64() * factor;
        let capped = delay.min(self.max_delay.as_secs_f64());
        Duration::from_secs_f64(capped.max(0.0))
    }
}

/// Runs `operation` until it succeeds, fails permanently or attempts run out.
///
/// Errors that are not [retryable](ServiceBusError::is_retryable) are returned
/// immediately. Cancellation is observed before each attempt and during the
/// backoff sleep.
///
/// # Examples
///
/// ```no_run
/// use servicekit::utils::retry::{retry, RetryConfig};
/// use tokio_util::sync::CancellationToken;
///
/// async fn example() {
///     let cancel = CancellationToken::new();
///     let result = retry(&cancel, &RetryConfig::default(), || async {
///         Ok::<_, servicekit::common::ServiceBusError>(42)
///     })
///     .await;
///     assert_eq!(result.unwrap(), 42);
/// }
/// ```
pub async fn retry<T, F, Fut>(
    cancel: &CancellationToken,
    config: &RetryConfig,
    mut operation: F,
) -> ServiceBusResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ServiceBusResult<T>>,
{
    let max_attempts = config.max_attempts.max(1);
    let mut last_error = None;

    for attempt in 0..max_attempts {
        if cancel.is_cancelled() {
            return Err(ServiceBusError::Cancelled("retry cancelled".to_string()));
        }

        match operation().await {
            Ok(value) => return Ok(value),
            Err(e) if !e.is_retryable() => return Err(e),
            Err(e) => {
                log::warn!("Attempt {} of {} failed: {}", attempt + 1, max_attempts, e);
                last_error = Some(e);
            }
        }

        if attempt + 1 < max_attempts {
            tokio::select! {
                () = cancel.cancelled() => {
                    return Err(ServiceBusError::Cancelled("retry cancelled".to_string()));
                }
                () = tokio::time::sleep(config.delay_for_attempt(attempt)) => {}
            }
        }
    }

    Err(ServiceBusError::RetryExhausted {
        attempts: max_attempts,
        last_error: last_error.map(|e| e.to_string()).unwrap_or_default(),
    })
}
