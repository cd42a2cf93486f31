use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::BusError;

/// A message leased from a subscription. The lock token identifies the lease
/// for renewal and settlement; the broker-assigned `message_id` is distinct
/// from any id carried inside the body.
#[derive(Debug, Clone)]
pub struct Message {
    pub body: Bytes,
    pub message_id: String,
    pub delivery_count: u32,
    pub locked_until: DateTime<Utc>,
    pub lock_token: Uuid,
}

/// Boundary to a broker backend. Implementations are shared across consumer
/// tasks, so everything here takes `&self`.
#[async_trait]
pub trait BrokerGateway: Send + Sync {
    /// Pulls up to `max_count` messages from a subscription, waiting at most
    /// `max_wait` before returning whatever arrived (possibly nothing). Each
    /// returned message holds a live lease.
    async fn receive(
        &self,
        topic: &str,
        subscription: &str,
        max_count: usize,
        max_wait: Duration,
    ) -> Result<Vec<Message>, BusError>;

    /// Extends the lease on a message and returns the new expiry.
    async fn renew_lease(&self, message: &Message) -> Result<DateTime<Utc>, BusError>;

    /// Settles a message as done; the broker drops it from the subscription.
    async fn complete(&self, message: &Message) -> Result<(), BusError>;

    /// Releases the lease so the broker redelivers the message later.
    async fn abandon(&self, message: &Message) -> Result<(), BusError>;

    /// Publishes a raw body to a topic, fanning out to its subscriptions.
    async fn send(&self, topic: &str, body: Bytes) -> Result<(), BusError>;
}
