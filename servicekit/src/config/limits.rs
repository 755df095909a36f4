/// Hard limits enforced by [`AppConfig::validate`](super::AppConfig::validate)

/// Azure Service Bus returns at most this many messages per receive call
pub const AZURE_SERVICE_BUS_MAX_BATCH_SIZE: u32 = 2048;

/// Maximum number of workers per consumer
pub const MAX_CONCURRENCY: usize = 256;

/// Maximum reasonable timeout for operations (10 minutes)
pub const MAX_OPERATION_TIMEOUT_SECS: u64 = 600;

/// Maximum backoff after a failed receive (5 minutes)
pub const MAX_RECEIVE_ERROR_BACKOFF_MS: u64 = 300_000;

/// Maximum number of attempts for a retried operation
pub const MAX_RETRY_ATTEMPTS: u32 = 20;

/// Log levels accepted by the logger
pub const LOG_LEVELS: [&str; 6] = ["trace", "debug", "info", "warn", "error", "off"];
