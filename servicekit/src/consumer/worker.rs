use super::config::ConsumerConfig;
use super::handler::{MessageContext, MessageHandler};
use crate::common::ServiceBusError;
use crate::model::Message;
use crate::service_bus::MessageReceiver;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// One independent polling loop.
///
/// `scope` is cancelled when the consumer stops or when `caller` is cancelled.
/// Receives are only interrupted by the caller's token; a stop is observed at
/// the top of the next iteration.
pub(crate) struct Worker {
    pub(crate) id: usize,
    pub(crate) config: Arc<ConsumerConfig>,
    pub(crate) receiver: Arc<dyn MessageReceiver>,
    pub(crate) handler: Arc<dyn MessageHandler>,
    pub(crate) scope: CancellationToken,
    pub(crate) caller: CancellationToken,
}

impl Worker {
    fn target(&self) -> &str {
        &self.config.log_target
    }

    pub(crate) async fn run(self) {
        log::info!(target: self.target(), "Worker {} started", self.id);

        loop {
            if self.caller.is_cancelled() {
                log::info!(target: self.target(), "Worker {} stopping (context cancelled)", self.id);
                return;
            }
            if self.scope.is_cancelled() {
                log::info!(target: self.target(), "Worker {} stopping", self.id);
                return;
            }

            let received = tokio::select! {
                () = self.caller.cancelled() => {
                    Err(ServiceBusError::Cancelled("caller cancelled receive".to_string()))
                }
                result = self
                    .receiver
                    .receive(self.config.max_messages, self.config.receive_timeout) => result,
            };

            match received {
                Ok(messages) => {
                    // Serial within the batch, in the order the broker returned them.
                    for message in messages {
                        self.dispatch(message).await;
                    }
                }
                Err(e) if e.is_timeout_or_cancelled() => {
                    log::trace!(target: self.target(), "Worker {} empty poll: {}", self.id, e);
                }
                Err(e) => {
                    log::error!(
                        target: self.target(),
                        "Worker {} failed to receive messages from {}: {}",
                        self.id,
                        self.config.queue_or_subscription,
                        e
                    );
                    self.back_off().await;
                }
            }
        }
    }

    async fn back_off(&self) {
        tokio::select! {
            () = self.scope.cancelled() => {}
            () = tokio::time::sleep(self.config.receive_error_backoff) => {}
        }
    }

    /// Runs the handler and settles the message exactly once.
    async fn dispatch(&self, message: Message) {
        let lock_token = message.lock_token.clone();
        let message_id = message.id.clone();
        let ctx = MessageContext::new(
            message,
            self.id,
            self.config.queue_or_subscription.clone(),
            self.scope.clone(),
        );

        match self.handler.handle(ctx).await {
            Ok(()) => match self.receiver.complete(&lock_token).await {
                Ok(()) => {
                    log::debug!(
                        target: self.target(),
                        "Worker {} processed message {} successfully",
                        self.id,
                        message_id
                    );
                }
                Err(e) => {
                    log::error!(
                        target: self.target(),
                        "Worker {} failed to complete message {}: {}",
                        self.id,
                        message_id,
                        e
                    );
                }
            },
            Err(e) => {
                log::error!(
                    target: self.target(),
                    "Worker {} handler failed for message {}: {}",
                    self.id,
                    message_id,
                    e
                );
                if let Err(abandon_err) = self.receiver.abandon(&lock_token).await {
                    log::error!(
                        target: self.target(),
                        "Worker {} failed to abandon message {}: {}",
                        self.id,
                        message_id,
                        abandon_err
                    );
                }
            }
        }
    }
}
