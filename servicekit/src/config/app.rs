use super::LoggingConfig;
use super::limits::{
    AZURE_SERVICE_BUS_MAX_BATCH_SIZE, LOG_LEVELS, MAX_CONCURRENCY, MAX_OPERATION_TIMEOUT_SECS,
    MAX_RECEIVE_ERROR_BACKOFF_MS, MAX_RETRY_ATTEMPTS,
};
use super::servicebus::{RetrySettings, ServicebusConfig};
use super::validation::ConfigValidationError;
use serde::Deserialize;

/// Service identity
#[derive(Debug, Deserialize, Default, Clone)]
pub struct AppInfoConfig {
    name: Option<String>,
    version: Option<String>,
    environment: Option<String>,
}

impl AppInfoConfig {
    pub fn name(&self) -> &str {
        self.name.as_deref().unwrap_or("servicekit")
    }

    pub fn version(&self) -> &str {
        self.version.as_deref().unwrap_or("1.0.0")
    }

    /// Deployment environment, e.g. `dev`, `staging` or `prod`
    pub fn environment(&self) -> &str {
        self.environment.as_deref().unwrap_or("dev")
    }
}

/// Root configuration
#[derive(Debug, Deserialize, Default, Clone)]
pub struct AppConfig {
    #[serde(default)]
    app: AppInfoConfig,
    #[serde(default)]
    servicebus: ServicebusConfig,
    #[serde(default)]
    logging: LoggingConfig,
    #[serde(default)]
    retry: RetrySettings,
}

impl AppConfig {
    pub fn app(&self) -> &AppInfoConfig {
        &self.app
    }

    pub fn servicebus(&self) -> &ServicebusConfig {
        &self.servicebus
    }

    pub fn logging(&self) -> &LoggingConfig {
        &self.logging
    }

    pub fn retry(&self) -> &RetrySettings {
        &self.retry
    }

    /// Checks every setting against its limits and reports all violations.
    pub fn validate(&self) -> Result<(), Vec<ConfigValidationError>> {
        let mut errors = Vec::new();
        let servicebus = &self.servicebus;

        if servicebus.concurrency() > MAX_CONCURRENCY {
            errors.push(ConfigValidationError::Concurrency {
                configured: servicebus.concurrency(),
                limit: MAX_CONCURRENCY,
            });
        }

        if servicebus.max_messages() > AZURE_SERVICE_BUS_MAX_BATCH_SIZE {
            errors.push(ConfigValidationError::MaxMessages {
                configured: servicebus.max_messages(),
                limit: AZURE_SERVICE_BUS_MAX_BATCH_SIZE,
            });
        }

        let receive_timeout = servicebus.receive_timeout_secs();
        if receive_timeout == 0 || receive_timeout > MAX_OPERATION_TIMEOUT_SECS {
            errors.push(ConfigValidationError::ReceiveTimeout {
                configured: receive_timeout,
                limit: MAX_OPERATION_TIMEOUT_SECS,
            });
        }

        let shutdown_timeout = servicebus.shutdown_timeout_secs();
        if shutdown_timeout == 0 || shutdown_timeout > MAX_OPERATION_TIMEOUT_SECS {
            errors.push(ConfigValidationError::ShutdownTimeout {
                configured: shutdown_timeout,
                limit: MAX_OPERATION_TIMEOUT_SECS,
            });
        }

        if servicebus.receive_error_backoff_ms() > MAX_RECEIVE_ERROR_BACKOFF_MS {
            errors.push(ConfigValidationError::ReceiveErrorBackoff {
                configured: servicebus.receive_error_backoff_ms(),
                limit: MAX_RECEIVE_ERROR_BACKOFF_MS,
            });
        }

        if servicebus.topic().is_some() != servicebus.subscription().is_some() {
            errors.push(ConfigValidationError::IncompleteSubscription);
        }

        let level = self.logging.level().to_lowercase();
        if !LOG_LEVELS.contains(&level.as_str()) {
            errors.push(ConfigValidationError::LogLevel {
                configured: self.logging.level().to_string(),
            });
        }

        let attempts = self.retry.max_attempts();
        if attempts == 0 || attempts > MAX_RETRY_ATTEMPTS {
            errors.push(ConfigValidationError::RetryAttempts {
                configured: attempts,
                limit: MAX_RETRY_ATTEMPTS,
            });
        }

        if self.retry.multiplier().is_nan() || self.retry.multiplier() < 1.0 {
            errors.push(ConfigValidationError::RetryMultiplier {
                configured: self.retry.multiplier(),
            });
        }

        if self.retry.initial_delay_ms() > self.retry.max_delay_ms() {
            errors.push(ConfigValidationError::RetryDelays {
                initial: self.retry.initial_delay_ms(),
                max: self.retry.max_delay_ms(),
            });
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
