use crate::consumer::EngineContext;
use crate::dispatch::DispatchOutcome;

/// Applies one dispatch outcome: stop lease renewal, settle at the broker,
/// drop the in-flight record, release the slot. Broker failures here are
/// logged and counted, never raised; the broker's own redelivery is the
/// safety net. Runs exactly once per dispatched message.
pub(crate) async fn settle(ctx: &EngineContext, outcome: DispatchOutcome) {
    let DispatchOutcome { success, message } = outcome;

    // No renewal may land once the settle call is in flight.
    ctx.renewals.cancel(message.lock_token).await;

    let labels = ctx.labels();
    if success {
        match ctx.gateway.complete(&message).await {
            Ok(()) => {
                metrics::counter!("bus_messages_completed_total", &labels).increment(1);
                tracing::debug!(message_id = %message.message_id, "message completed");
            }
            Err(e) => {
                metrics::counter!("bus_settlement_failures_total", &labels).increment(1);
                tracing::warn!(
                    message_id = %message.message_id,
                    error = %e,
                    "failed to complete message, leaving it to the broker"
                );
            }
        }
    } else {
        match ctx.gateway.abandon(&message).await {
            Ok(()) => {
                metrics::counter!("bus_messages_abandoned_total", &labels).increment(1);
                tracing::debug!(message_id = %message.message_id, "message abandoned");
            }
            Err(e) => {
                metrics::counter!("bus_settlement_failures_total", &labels).increment(1);
                tracing::warn!(
                    message_id = %message.message_id,
                    error = %e,
                    "failed to abandon message, leaving it to the broker"
                );
            }
        }
    }

    ctx.slots.finish(&message.message_id);
    ctx.slots.release(1);
}
