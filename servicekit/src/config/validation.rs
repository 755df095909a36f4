/// Configuration validation errors
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigValidationError {
    #[error("Invalid servicebus.concurrency: {configured} (limit: {limit})")]
    Concurrency { configured: usize, limit: usize },
    #[error("Invalid servicebus.max_messages: {configured} (limit: {limit})")]
    MaxMessages { configured: u32, limit: u32 },
    #[error("Invalid servicebus.receive_timeout_secs: {configured} (min: 1, max: {limit})")]
    ReceiveTimeout { configured: u64, limit: u64 },
    #[error("Invalid servicebus.shutdown_timeout_secs: {configured} (min: 1, max: {limit})")]
    ShutdownTimeout { configured: u64, limit: u64 },
    #[error("Invalid servicebus.receive_error_backoff_ms: {configured} (limit: {limit})")]
    ReceiveErrorBackoff { configured: u64, limit: u64 },
    #[error("servicebus.topic and servicebus.subscription must be set together")]
    IncompleteSubscription,
    #[error("Invalid logging.level: {configured}")]
    LogLevel { configured: String },
    #[error("Invalid retry.max_attempts: {configured} (min: 1, max: {limit})")]
    RetryAttempts { configured: u32, limit: u32 },
    #[error("Invalid retry.multiplier: {configured} (must be at least 1.0)")]
    RetryMultiplier { configured: f64 },
    #[error("retry.initial_delay_ms ({initial}) exceeds retry.max_delay_ms ({max})")]
    RetryDelays { initial: u64, max: u64 },
}

impl ConfigValidationError {
    /// Hint shown next to the error when the service refuses to start.
    pub fn user_message(&self) -> String {
        match self {
            ConfigValidationError::Concurrency { configured, limit } => format!(
                "Too many workers: {configured}. Set servicebus.concurrency to {limit} or less."
            ),
            ConfigValidationError::MaxMessages { configured, limit } => format!(
                "Receive batch too large: {configured}. Azure Service Bus returns at most {limit} messages per call."
            ),
            ConfigValidationError::IncompleteSubscription => {
                "Set both servicebus.topic and servicebus.subscription to consume a subscription, or neither to consume servicebus.queue.".to_string()
            }
            ConfigValidationError::LogLevel { configured } => format!(
                "Unknown log level '{configured}'. Use one of: trace, debug, info, warn, error."
            ),
            other => other.to_string(),
        }
    }
}

/// Errors returned while loading configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Configuration loading failed: {0}")]
    Load(#[from] config::ConfigError),
    #[error("Configuration validation failed:\n{}", format_errors(.0))]
    Validation(Vec<ConfigValidationError>),
}

fn format_errors(errors: &[ConfigValidationError]) -> String {
    errors
        .iter()
        .map(|e| format!("- {}", e.user_message()))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_lists_every_problem() {
        let error = ConfigError::Validation(vec![
            ConfigValidationError::Concurrency {
                configured: 1000,
                limit: 256,
            },
            ConfigValidationError::LogLevel {
                configured: "loud".to_string(),
            },
        ]);

        let text = error.to_string();
        assert!(text.starts_with("Configuration validation failed:"));
        assert!(text.contains("Too many workers: 1000"));
        assert!(text.contains("Unknown log level 'loud'"));
    }

    #[test]
    fn test_user_message_falls_back_to_display() {
        let error = ConfigValidationError::RetryDelays {
            initial: 9000,
            max: 100,
        };
        assert_eq!(error.user_message(), error.to_string());
    }
}
