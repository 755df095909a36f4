use crate::stats::ConsumerStats;
use servicekit::common::HandlerError;
use servicekit::consumer::MessageContext;
use servicekit::producer::JSON_CONTENT_TYPE;
use std::sync::Arc;

/// Logs each message. JSON messages that fail to parse are rejected so the
/// broker redelivers them.
pub async fn log_message(ctx: MessageContext, stats: Arc<ConsumerStats>) -> Result<(), HandlerError> {
    let message = &ctx.message;

    if message.content_type.as_deref() == Some(JSON_CONTENT_TYPE) {
        match message.body_as_json::<serde_json::Value>() {
            Ok(body) => {
                log::info!(
                    "Worker {} received message {} (delivery {}, correlation {}): {}",
                    ctx.worker_id,
                    message.id,
                    message.delivery_count,
                    ctx.correlation_id,
                    body
                );
            }
            Err(e) => {
                stats.record_failed();
                return Err(format!("message {} is not valid JSON: {e}", message.id).into());
            }
        }
    } else {
        log::info!(
            "Worker {} received message {} (delivery {}, {} bytes): {}",
            ctx.worker_id,
            message.id,
            message.delivery_count,
            message.body.len(),
            message.body_text()
        );
    }

    stats.record_processed();
    Ok(())
}
