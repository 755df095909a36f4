use crate::common::HandlerError;
use crate::model::Message;
use async_trait::async_trait;
use std::future::Future;
use tokio_util::sync::CancellationToken;

const CORRELATION_ID_PROPERTY: &str = "correlation_id";

/// Request-scoped context handed to a [`MessageHandler`].
///
/// Carries the message together with typed metadata about where it was
/// received, and the worker's cancellation scope. The scope is cancelled when
/// the consumer stops or the caller's token is cancelled.
#[derive(Debug, Clone)]
pub struct MessageContext {
    pub message: Message,
    pub worker_id: usize,
    pub entity: String,
    pub correlation_id: String,
    cancellation: CancellationToken,
}

impl MessageContext {
    pub fn new(
        message: Message,
        worker_id: usize,
        entity: impl Into<String>,
        cancellation: CancellationToken,
    ) -> Self {
        let correlation_id = message
            .property_str(CORRELATION_ID_PROPERTY)
            .map(str::to_string)
            .unwrap_or_else(|| message.id.clone());

        Self {
            message,
            worker_id,
            entity: entity.into(),
            correlation_id,
            cancellation,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Completes once the worker's scope is cancelled.
    pub async fn cancelled(&self) {
        self.cancellation.cancelled().await
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancellation
    }
}

/// User code invoked once per received message.
///
/// `Ok(())` completes the message, an error abandons it for redelivery.
/// Panics are not caught by the consumer.
///
/// Any `Fn(MessageContext) -> impl Future<Output = Result<(), HandlerError>>`
/// is a handler:
///
/// ```no_run
/// use servicekit::consumer::MessageContext;
/// use servicekit::common::HandlerError;
///
/// let handler = |ctx: MessageContext| async move {
///     println!("got {}", ctx.message.id);
///     Ok::<(), HandlerError>(())
/// };
/// ```
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, ctx: MessageContext) -> Result<(), HandlerError>;
}

#[async_trait]
impl<F, Fut> MessageHandler for F
where
    F: Fn(MessageContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    async fn handle(&self, ctx: MessageContext) -> Result<(), HandlerError> {
        (self)(ctx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::LockToken;
    use serde_json::Value;
    use std::collections::HashMap;

    #[test]
    fn test_correlation_id_defaults_to_message_id() {
        let message = Message::new("m1", Vec::new(), LockToken::new("t"));
        let ctx = MessageContext::new(message, 0, "orders", CancellationToken::new());
        assert_eq!(ctx.correlation_id, "m1");
    }

    #[test]
    fn test_correlation_id_from_property() {
        let mut properties = HashMap::new();
        properties.insert("correlation_id".to_string(), Value::from("req-7"));
        let message = Message::new("m1", Vec::new(), LockToken::new("t")).with_properties(properties);

        let ctx = MessageContext::new(message, 2, "orders", CancellationToken::new());
        assert_eq!(ctx.correlation_id, "req-7");
        assert_eq!(ctx.worker_id, 2);
    }

    #[tokio::test]
    async fn test_closure_is_a_handler() {
        let handler = |ctx: MessageContext| async move {
            if ctx.message.id == "bad" {
                Err::<(), HandlerError>("rejected".into())
            } else {
                Ok(())
            }
        };

        let token = CancellationToken::new();
        let ok = MessageContext::new(
            Message::new("good", Vec::new(), LockToken::new("t1")),
            0,
            "orders",
            token.clone(),
        );
        let bad = MessageContext::new(
            Message::new("bad", Vec::new(), LockToken::new("t2")),
            0,
            "orders",
            token.clone(),
        );

        assert!(handler.handle(ok).await.is_ok());
        assert_eq!(handler.handle(bad).await.unwrap_err().to_string(), "rejected");
    }

    #[test]
    fn test_context_observes_cancellation() {
        let token = CancellationToken::new();
        let ctx = MessageContext::new(
            Message::new("m1", Vec::new(), LockToken::new("t")),
            0,
            "orders",
            token.child_token(),
        );
        assert!(!ctx.is_cancelled());
        token.cancel();
        assert!(ctx.is_cancelled());
    }
}
