use std::sync::Arc;

use buslane_common::{BrokerGateway, BusError, Message};
use futures::FutureExt;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::config::ConsumerSettings;
use crate::dispatch::{self, Handler};
use crate::renewal::RenewalService;
use crate::settle;
use crate::slots::SlotTracker;

/// Everything one consumption loop shares with its dispatch and settlement
/// tasks.
pub(crate) struct EngineContext {
    pub gateway: Arc<dyn BrokerGateway>,
    pub handler: Arc<dyn Handler>,
    pub slots: SlotTracker,
    pub renewals: RenewalService,
    pub topic: String,
    pub subscription: String,
    pub settings: ConsumerSettings,
}

impl EngineContext {
    pub fn new(
        gateway: Arc<dyn BrokerGateway>,
        handler: Arc<dyn Handler>,
        topic: &str,
        subscription: &str,
        settings: ConsumerSettings,
    ) -> Self {
        let cap = settings.max_concurrent_messages.max(1);
        EngineContext {
            slots: SlotTracker::new(cap),
            renewals: RenewalService::new(
                gateway.clone(),
                topic,
                subscription,
                settings.renewal_interval,
                settings.max_renewal_duration,
            ),
            gateway,
            handler,
            topic: topic.to_owned(),
            subscription: subscription.to_owned(),
            settings,
        }
    }

    pub fn labels(&self) -> [(&'static str, String); 2] {
        [
            ("topic", self.topic.clone()),
            ("subscription", self.subscription.clone()),
        ]
    }
}

/// Drives one subscription until `stop` is cancelled or the broker rejects
/// the subscription itself. Per iteration: reserve slots, receive up to that
/// many messages, hand each to a dispatch task. In-flight dispatches are
/// always drained before returning.
pub(crate) async fn run(ctx: Arc<EngineContext>, stop: CancellationToken) -> Result<(), BusError> {
    tracing::info!(
        topic = %ctx.topic,
        subscription = %ctx.subscription,
        cap = ctx.slots.capacity(),
        "consumer started"
    );

    let mut dispatches: JoinSet<()> = JoinSet::new();
    let result = loop {
        reap_finished(&mut dispatches);
        report_saturation(&ctx);

        if stop.is_cancelled() {
            break Ok(());
        }

        let granted = ctx.slots.try_acquire(ctx.slots.capacity());
        if granted == 0 {
            // Saturated; look again after the idle interval.
            tokio::select! {
                _ = stop.cancelled() => break Ok(()),
                _ = tokio::time::sleep(ctx.settings.idle_poll) => continue,
            }
        }

        let received = tokio::select! {
            _ = stop.cancelled() => {
                ctx.slots.release(granted);
                break Ok(());
            }
            received = ctx.gateway.receive(
                &ctx.topic,
                &ctx.subscription,
                granted,
                ctx.settings.receive_wait,
            ) => received,
        };

        match received {
            Ok(messages) => {
                if messages.len() < granted {
                    ctx.slots.release(granted - messages.len());
                }
                for message in messages {
                    start_dispatch(&ctx, &mut dispatches, message);
                }
            }
            Err(e) if e.is_setup_failure() => {
                ctx.slots.release(granted);
                tracing::error!(
                    topic = %ctx.topic,
                    subscription = %ctx.subscription,
                    error = %e,
                    "receive rejected, stopping consumer"
                );
                break Err(e);
            }
            Err(e) => {
                ctx.slots.release(granted);
                metrics::counter!("bus_receive_errors_total", &ctx.labels()).increment(1);
                tracing::error!(
                    topic = %ctx.topic,
                    subscription = %ctx.subscription,
                    error = %e,
                    "receive failed"
                );
                tokio::select! {
                    _ = stop.cancelled() => break Ok(()),
                    _ = tokio::time::sleep(ctx.settings.idle_poll) => {}
                }
            }
        }
    };

    // Everything already dispatched settles before we report the loop done.
    while let Some(joined) = dispatches.join_next().await {
        if let Err(e) = joined {
            tracing::error!("dispatch task failed: {:?}", e);
        }
    }
    ctx.renewals.shutdown().await;
    report_saturation(&ctx);

    tracing::info!(
        topic = %ctx.topic,
        subscription = %ctx.subscription,
        "consumer stopped"
    );
    result
}

fn start_dispatch(ctx: &Arc<EngineContext>, dispatches: &mut JoinSet<()>, message: Message) {
    metrics::counter!("bus_messages_received_total", &ctx.labels()).increment(1);
    tracing::debug!(
        message_id = %message.message_id,
        delivery = message.delivery_count,
        locked_until = %message.locked_until,
        "message received"
    );

    if !ctx.slots.begin(&message) {
        // Redelivery of an id still settling. The newer handle is dropped
        // unsettled; its lease lapses and the broker redelivers.
        ctx.slots.release(1);
        return;
    }
    ctx.renewals.register(&message);

    let ctx = Arc::clone(ctx);
    dispatches.spawn(async move {
        let outcome =
            dispatch::run_handler(ctx.handler.as_ref(), &ctx.topic, &ctx.subscription, message)
                .await;
        settle::settle(&ctx, outcome).await;
    });
}

/// Collects dispatch tasks that already finished without blocking the loop.
/// Settlement did the accounting; this only surfaces panics.
fn reap_finished(dispatches: &mut JoinSet<()>) {
    while let Some(Some(joined)) = dispatches.join_next().now_or_never() {
        if let Err(e) = joined {
            tracing::error!("dispatch task failed: {:?}", e);
        }
    }
}

fn report_saturation(ctx: &EngineContext) {
    metrics::gauge!("bus_consumer_saturation_percent", &ctx.labels())
        .set(ctx.slots.in_use() as f64 / ctx.slots.capacity() as f64);
}
