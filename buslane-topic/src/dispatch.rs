use std::future::Future;
use std::panic::AssertUnwindSafe;

use async_trait::async_trait;
use buslane_common::{Message, QueueEnvelope};
use futures::FutureExt;

/// Application callback run once per delivered message. An `Err` (or a panic)
/// abandons the message for redelivery; `Ok` completes it.
///
/// Implemented for any async closure taking a `QueueEnvelope`, so plain
/// functions work without a wrapper type.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn handle(&self, envelope: QueueEnvelope) -> anyhow::Result<()>;
}

#[async_trait]
impl<F, Fut> Handler for F
where
    F: Fn(QueueEnvelope) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    async fn handle(&self, envelope: QueueEnvelope) -> anyhow::Result<()> {
        (self)(envelope).await
    }
}

/// What one dispatch produced: handler success or failure, paired with the
/// broker handle settlement needs.
pub(crate) struct DispatchOutcome {
    pub success: bool,
    pub message: Message,
}

/// Decodes and runs the handler for one message. A decode failure is a
/// handler failure, and handler panics are contained here; nothing escapes
/// this boundary except the outcome.
pub(crate) async fn run_handler(
    handler: &dyn Handler,
    topic: &str,
    subscription: &str,
    message: Message,
) -> DispatchOutcome {
    let labels = [
        ("topic", topic.to_owned()),
        ("subscription", subscription.to_owned()),
    ];
    let start = tokio::time::Instant::now();

    let success = match QueueEnvelope::from_bytes(&message.body) {
        Ok(envelope) => match AssertUnwindSafe(handler.handle(envelope)).catch_unwind().await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                tracing::warn!(message_id = %message.message_id, error = %e, "handler failed");
                false
            }
            Err(_) => {
                tracing::error!(message_id = %message.message_id, "handler panicked");
                false
            }
        },
        Err(e) => {
            tracing::warn!(
                message_id = %message.message_id,
                error = %e,
                "message body failed to decode"
            );
            false
        }
    };

    metrics::histogram!("bus_message_processing_duration_seconds", &labels)
        .record(start.elapsed().as_secs_f64());
    DispatchOutcome { success, message }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    use bytes::Bytes;
    use chrono::Utc;
    use uuid::Uuid;

    use super::*;

    fn message_with_body(body: &'static [u8]) -> Message {
        Message {
            body: Bytes::from_static(body),
            message_id: "msg-1".to_owned(),
            delivery_count: 1,
            locked_until: Utc::now(),
            lock_token: Uuid::now_v7(),
        }
    }

    #[tokio::test]
    async fn test_successful_handler() {
        let handler = |envelope: QueueEnvelope| async move {
            assert_eq!(envelope.message, "hello");
            Ok(())
        };
        let message = message_with_body(b"{\"message\":\"hello\"}");
        let outcome = run_handler(&handler, "orders", "workers", message).await;
        assert!(outcome.success);
        assert_eq!(outcome.message.message_id, "msg-1");
    }

    #[tokio::test]
    async fn test_handler_error_is_failure() {
        let handler = |_: QueueEnvelope| async move { anyhow::bail!("application rejected it") };
        let outcome = run_handler(&handler, "orders", "workers", message_with_body(b"{}")).await;
        assert!(!outcome.success);
    }

    #[tokio::test]
    async fn test_handler_panic_is_contained() {
        fn boom() -> anyhow::Result<()> {
            panic!("handler blew up")
        }
        let handler = |_: QueueEnvelope| async move { boom() };
        let outcome = run_handler(&handler, "orders", "workers", message_with_body(b"{}")).await;
        assert!(!outcome.success);
    }

    #[tokio::test]
    async fn test_undecodable_body_skips_handler() {
        let invoked = Arc::new(AtomicBool::new(false));
        let seen = invoked.clone();
        let handler = move |_: QueueEnvelope| {
            let seen = seen.clone();
            async move {
                seen.store(true, Ordering::SeqCst);
                Ok(())
            }
        };

        let outcome =
            run_handler(&handler, "orders", "workers", message_with_body(b"not json")).await;
        assert!(!outcome.success);
        assert!(!invoked.load(Ordering::SeqCst));
    }
}
