use std::fmt;

/// Error returned by a [`MessageHandler`](crate::consumer::MessageHandler).
///
/// Any error type can be boxed into it. A handler error drives the abandon path.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Errors produced by broker clients, receivers and the consumer lifecycle.
///
/// Steady-state errors (receive, complete, abandon) are absorbed and logged by
/// the consumer workers. Only construction and lifecycle errors reach callers.
#[derive(Debug, Clone, PartialEq)]
pub enum ServiceBusError {
    /// Connection related errors
    ConnectionFailed(String),

    /// Receiver/sender creation errors
    ConsumerCreationFailed(String),
    ProducerCreationFailed(String),

    /// Message operation errors
    MessageReceiveFailed(String),
    MessageSendFailed(String),
    MessageCompleteFailed(String),
    MessageAbandonFailed(String),
    /// The lock token is unknown, expired or was already used
    MessageLockLost(String),

    /// Entity errors
    InvalidQueueName(String),

    /// Configuration errors
    ConfigurationError(String),

    /// Timeout and cancellation, both expected during polling
    OperationTimeout(String),
    Cancelled(String),

    /// Lifecycle errors
    InvalidState(String),
    ReceiverClosed,

    /// Retry helper gave up
    RetryExhausted { attempts: u32, last_error: String },

    /// Generic errors
    InternalError(String),
}

impl fmt::Display for ServiceBusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceBusError::ConnectionFailed(msg) => write!(f, "Connection failed: {msg}"),

            ServiceBusError::ConsumerCreationFailed(msg) => {
                write!(f, "Consumer creation failed: {msg}")
            }
            ServiceBusError::ProducerCreationFailed(msg) => {
                write!(f, "Producer creation failed: {msg}")
            }

            ServiceBusError::MessageReceiveFailed(msg) => {
                write!(f, "Message receive failed: {msg}")
            }
            ServiceBusError::MessageSendFailed(msg) => write!(f, "Message send failed: {msg}"),
            ServiceBusError::MessageCompleteFailed(msg) => {
                write!(f, "Message complete failed: {msg}")
            }
            ServiceBusError::MessageAbandonFailed(msg) => {
                write!(f, "Message abandon failed: {msg}")
            }
            ServiceBusError::MessageLockLost(token) => {
                write!(f, "Message lock lost or unknown: {token}")
            }

            ServiceBusError::InvalidQueueName(queue) => write!(f, "Invalid queue name: {queue}"),

            ServiceBusError::ConfigurationError(msg) => write!(f, "Configuration error: {msg}"),

            ServiceBusError::OperationTimeout(msg) => write!(f, "Operation timeout: {msg}"),
            ServiceBusError::Cancelled(msg) => write!(f, "Operation cancelled: {msg}"),

            ServiceBusError::InvalidState(msg) => write!(f, "Invalid state: {msg}"),
            ServiceBusError::ReceiverClosed => write!(f, "Receiver already closed"),

            ServiceBusError::RetryExhausted {
                attempts,
                last_error,
            } => write!(
                f,
                "Max attempts ({attempts}) reached, last error: {last_error}"
            ),

            ServiceBusError::InternalError(msg) => write!(f, "Internal error: {msg}"),
        }
    }
}

impl std::error::Error for ServiceBusError {}

impl ServiceBusError {
    /// Timeouts and cancellations are a normal empty poll for the consumer.
    pub fn is_timeout_or_cancelled(&self) -> bool {
        matches!(
            self,
            ServiceBusError::OperationTimeout(_) | ServiceBusError::Cancelled(_)
        )
    }

    /// Whether repeating the same call may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ServiceBusError::ConnectionFailed(_)
                | ServiceBusError::MessageReceiveFailed(_)
                | ServiceBusError::MessageSendFailed(_)
                | ServiceBusError::OperationTimeout(_)
                | ServiceBusError::InternalError(_)
        )
    }
}

impl From<azure_core::Error> for ServiceBusError {
    fn from(err: azure_core::Error) -> Self {
        ServiceBusError::InternalError(err.to_string())
    }
}

// Result type alias for convenience
pub type ServiceBusResult<T> = Result<T, ServiceBusError>;
