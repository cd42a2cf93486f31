use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use buslane_common::{BrokerGateway, Message};
use chrono::Utc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Runs one background task per in-flight message, renewing its lease until
/// settlement cancels it, the lease is observed lost, or the renewal ceiling
/// elapses. Failures are logged and counted, never raised into processing.
pub(crate) struct RenewalService {
    gateway: Arc<dyn BrokerGateway>,
    topic: String,
    subscription: String,
    interval: Duration,
    max_duration: Duration,
    tasks: Mutex<HashMap<Uuid, RenewalTask>>,
}

struct RenewalTask {
    stop: CancellationToken,
    handle: JoinHandle<()>,
}

impl RenewalService {
    pub fn new(
        gateway: Arc<dyn BrokerGateway>,
        topic: &str,
        subscription: &str,
        interval: Duration,
        max_duration: Duration,
    ) -> Self {
        RenewalService {
            gateway,
            topic: topic.to_owned(),
            subscription: subscription.to_owned(),
            interval,
            max_duration,
            tasks: Mutex::new(HashMap::new()),
        }
    }

    /// Starts renewing the lease on `message`, keyed by its lock token.
    pub fn register(&self, message: &Message) {
        let stop = CancellationToken::new();
        let handle = tokio::spawn(renew_until_stopped(
            self.gateway.clone(),
            self.topic.clone(),
            self.subscription.clone(),
            message.clone(),
            self.interval,
            self.max_duration,
            stop.clone(),
        ));
        let mut tasks = self.tasks.lock().unwrap();
        tasks.insert(message.lock_token, RenewalTask { stop, handle });
    }

    /// Stops the renewal task for `lock_token` and waits for it to finish, so
    /// no renewal call can land after settlement proceeds.
    pub async fn cancel(&self, lock_token: Uuid) {
        let task = { self.tasks.lock().unwrap().remove(&lock_token) };
        if let Some(task) = task {
            task.stop.cancel();
            if task.handle.await.is_err() {
                tracing::warn!(%lock_token, "lease renewal task ended abnormally");
            }
        }
    }

    /// Cancels whatever renewal tasks remain. The consumption loop calls this
    /// after draining dispatches, where the map is normally already empty.
    pub async fn shutdown(&self) {
        let tasks: Vec<RenewalTask> = {
            let mut map = self.tasks.lock().unwrap();
            map.drain().map(|(_, task)| task).collect()
        };
        for task in tasks {
            task.stop.cancel();
            if task.handle.await.is_err() {
                tracing::warn!("lease renewal task ended abnormally");
            }
        }
    }

    #[cfg(test)]
    pub fn tracked(&self) -> usize {
        self.tasks.lock().unwrap().len()
    }
}

async fn renew_until_stopped(
    gateway: Arc<dyn BrokerGateway>,
    topic: String,
    subscription: String,
    mut message: Message,
    interval: Duration,
    max_duration: Duration,
    stop: CancellationToken,
) {
    let labels = [("topic", topic), ("subscription", subscription)];
    let started = tokio::time::Instant::now();
    let mut ticker = tokio::time::interval(interval);
    // The first tick completes immediately; the first renewal should happen
    // one full interval after receipt.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = stop.cancelled() => break,
            _ = ticker.tick() => {}
        }

        if started.elapsed() >= max_duration {
            tracing::warn!(
                message_id = %message.message_id,
                "renewal ceiling reached, lease will be left to lapse"
            );
            break;
        }
        if message.locked_until <= Utc::now() {
            tracing::warn!(
                message_id = %message.message_id,
                locked_until = %message.locked_until,
                "lease already expired, stopping renewal"
            );
            break;
        }

        match gateway.renew_lease(&message).await {
            Ok(locked_until) => {
                message.locked_until = locked_until;
                metrics::counter!("bus_lease_renewals_total", &labels).increment(1);
                tracing::debug!(
                    message_id = %message.message_id,
                    locked_until = %locked_until,
                    "lease renewed"
                );
            }
            Err(e) if e.is_setup_failure() => {
                metrics::counter!("bus_lease_renewal_failures_total", &labels).increment(1);
                tracing::warn!(
                    message_id = %message.message_id,
                    error = %e,
                    "lease renewal rejected, stopping renewal"
                );
                break;
            }
            Err(e) => {
                metrics::counter!("bus_lease_renewal_failures_total", &labels).increment(1);
                tracing::warn!(message_id = %message.message_id, error = %e, "lease renewal failed");
            }
        }
    }
}
