use std::sync::Arc;

use buslane_common::{BrokerGateway, BusError, LocalBroker, QueueEnvelope};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::{ConsumerSettings, CoreConfig, Provider};
use crate::consumer::{self, EngineContext};
use crate::dispatch::Handler;

/// Handle to one named topic: publish envelopes to it, or consume one of its
/// subscriptions with a bounded handler pool. Cloning is cheap; clones share
/// the gateway.
#[derive(Clone)]
pub struct TopicClient {
    gateway: Arc<dyn BrokerGateway>,
    topic: String,
    settings: ConsumerSettings,
}

impl TopicClient {
    pub fn new(gateway: Arc<dyn BrokerGateway>, topic: &str, settings: ConsumerSettings) -> Self {
        TopicClient {
            gateway,
            topic: topic.to_owned(),
            settings,
        }
    }

    /// Wires a client from environment configuration. The `local` provider
    /// shares the process-wide in-memory broker; a hosted broker has no
    /// built-in transport and must be injected through [`TopicClient::new`].
    pub fn from_config(config: &CoreConfig, topic: &str) -> Result<Self, BusError> {
        match config.provider {
            Provider::Local => Ok(Self::new(
                LocalBroker::global(),
                topic,
                config.consumer_settings(),
            )),
            Provider::Hosted => Err(BusError::Unprocessable(
                "hosted provider requires an injected gateway, none is configured".to_owned(),
            )),
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Encodes and sends one envelope to the topic. Transport failures
    /// surface directly; there is no retry at this layer.
    pub async fn publish(&self, envelope: &QueueEnvelope) -> Result<(), BusError> {
        let body = envelope.to_bytes()?;
        self.gateway.send(&self.topic, body).await?;
        tracing::debug!(
            topic = %self.topic,
            message_id = %envelope.message_id,
            "message published"
        );
        Ok(())
    }

    /// Consumes `subscription` on the caller's task. Returns only on a
    /// setup-class failure (unknown subscription, bad credentials);
    /// per-message failures are settled internally and never surface.
    pub async fn subscribe(
        &self,
        subscription: &str,
        handler: impl Handler + 'static,
    ) -> Result<(), BusError> {
        let ctx = self.engine_context(subscription, Arc::new(handler));
        consumer::run(ctx, CancellationToken::new()).await
    }

    /// Starts consuming `subscription` in the background. The returned handle
    /// stops the loop cooperatively and reports its result.
    pub fn start_subscriber(
        &self,
        subscription: &str,
        handler: impl Handler + 'static,
    ) -> Subscription {
        let ctx = self.engine_context(subscription, Arc::new(handler));
        let stop = CancellationToken::new();
        let handle = tokio::spawn(consumer::run(ctx, stop.clone()));
        Subscription { stop, handle }
    }

    fn engine_context(&self, subscription: &str, handler: Arc<dyn Handler>) -> Arc<EngineContext> {
        Arc::new(EngineContext::new(
            self.gateway.clone(),
            handler,
            &self.topic,
            subscription,
            self.settings.clone(),
        ))
    }
}

/// A running background consumer, as returned by
/// [`TopicClient::start_subscriber`].
pub struct Subscription {
    stop: CancellationToken,
    handle: JoinHandle<Result<(), BusError>>,
}

impl Subscription {
    /// Signals the consumer to stop without waiting for it.
    pub fn stop(&self) {
        self.stop.cancel();
    }

    /// True once the consumer loop has exited, stopped or failed.
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Stops the consumer, waits for in-flight messages to settle, and
    /// returns the loop result.
    pub async fn unsubscribe(self) -> Result<(), BusError> {
        self.stop.cancel();
        match self.handle.await {
            Ok(result) => result,
            Err(e) => Err(BusError::Internal(format!("consumer task failed: {}", e))),
        }
    }
}
