use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use tokio::sync::Notify;
use uuid::Uuid;

use crate::error::BusError;
use crate::gateway::{BrokerGateway, Message};

const POLL_SLICE: Duration = Duration::from_millis(50);
const DEFAULT_LEASE: Duration = Duration::from_secs(60);

static GLOBAL: Lazy<Arc<LocalBroker>> = Lazy::new(|| Arc::new(LocalBroker::new()));

struct Lease {
    token: Uuid,
    expires_at: DateTime<Utc>,
}

struct QueuedMessage {
    body: Bytes,
    message_id: String,
    delivery_count: u32,
    lock: Option<Lease>,
}

#[derive(Default)]
struct TopicState {
    subscriptions: HashMap<String, VecDeque<QueuedMessage>>,
}

#[derive(Default)]
struct BrokerState {
    topics: HashMap<String, TopicState>,
}

/// In-memory broker used when no hosted backend is configured. Topics and
/// subscriptions live in process memory; messages are leased with the same
/// lock-token semantics a hosted broker exposes, so the consumption engine
/// runs unchanged against it.
pub struct LocalBroker {
    state: Mutex<BrokerState>,
    arrivals: Notify,
    lease: chrono::Duration,
}

impl Default for LocalBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalBroker {
    pub fn new() -> Self {
        Self::with_lease(DEFAULT_LEASE)
    }

    /// Builds a broker whose leases expire after `lease`. Short leases make
    /// lock-lost paths testable without waiting out the production default.
    pub fn with_lease(lease: Duration) -> Self {
        LocalBroker {
            state: Mutex::new(BrokerState::default()),
            arrivals: Notify::new(),
            lease: chrono::Duration::from_std(lease).expect("lease duration out of range"),
        }
    }

    /// The process-wide broker instance. Producers and consumers created from
    /// config share this one so messages published in-process are visible to
    /// in-process subscriptions.
    pub fn global() -> Arc<LocalBroker> {
        GLOBAL.clone()
    }

    pub fn add_subscription(&self, topic: &str, subscription: &str) {
        let mut state = self.state.lock().unwrap();
        state
            .topics
            .entry(topic.to_owned())
            .or_default()
            .subscriptions
            .entry(subscription.to_owned())
            .or_default();
    }

    /// Messages still held by a subscription, leased or not.
    pub fn depth(&self, topic: &str, subscription: &str) -> usize {
        let state = self.state.lock().unwrap();
        state
            .topics
            .get(topic)
            .and_then(|t| t.subscriptions.get(subscription))
            .map_or(0, VecDeque::len)
    }

    fn try_lock_batch(
        &self,
        topic: &str,
        subscription: &str,
        max_count: usize,
    ) -> Result<Vec<Message>, BusError> {
        let mut state = self.state.lock().unwrap();
        let now = Utc::now();
        let topic_state = state
            .topics
            .get_mut(topic)
            .ok_or_else(|| BusError::NotFound(format!("topic {} does not exist", topic)))?;
        let queue = topic_state.subscriptions.get_mut(subscription).ok_or_else(|| {
            BusError::NotFound(format!(
                "subscription {} does not exist on topic {}",
                subscription, topic
            ))
        })?;

        let mut batch = Vec::new();
        for queued in queue.iter_mut() {
            if batch.len() >= max_count {
                break;
            }
            if queued
                .lock
                .as_ref()
                .map_or(false, |lease| lease.expires_at > now)
            {
                continue;
            }
            queued.delivery_count += 1;
            let token = Uuid::now_v7();
            let expires_at = now + self.lease;
            queued.lock = Some(Lease { token, expires_at });
            batch.push(Message {
                body: queued.body.clone(),
                message_id: queued.message_id.clone(),
                delivery_count: queued.delivery_count,
                locked_until: expires_at,
                lock_token: token,
            });
        }
        Ok(batch)
    }

    fn find_by_token(state: &BrokerState, token: Uuid) -> Option<(String, String, usize)> {
        for (topic, topic_state) in &state.topics {
            for (subscription, queue) in &topic_state.subscriptions {
                for (index, queued) in queue.iter().enumerate() {
                    if queued
                        .lock
                        .as_ref()
                        .map_or(false, |lease| lease.token == token)
                    {
                        return Some((topic.clone(), subscription.clone(), index));
                    }
                }
            }
        }
        None
    }
}

fn lock_lost() -> BusError {
    BusError::BadRequest("message lock lost".to_owned())
}

#[async_trait]
impl BrokerGateway for LocalBroker {
    async fn receive(
        &self,
        topic: &str,
        subscription: &str,
        max_count: usize,
        max_wait: Duration,
    ) -> Result<Vec<Message>, BusError> {
        let deadline = Instant::now() + max_wait;
        loop {
            let batch = self.try_lock_batch(topic, subscription, max_count)?;
            if !batch.is_empty() {
                return Ok(batch);
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(Vec::new());
            }
            // Waking on arrivals keeps latency low; the slice cap bounds how
            // long a notify raced with the state check can stall us.
            let wait = deadline.saturating_duration_since(now).min(POLL_SLICE);
            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                _ = self.arrivals.notified() => {}
            }
        }
    }

    async fn renew_lease(&self, message: &Message) -> Result<DateTime<Utc>, BusError> {
        let mut state = self.state.lock().unwrap();
        let now = Utc::now();
        let Some((topic, subscription, index)) = Self::find_by_token(&state, message.lock_token)
        else {
            return Err(lock_lost());
        };
        let queued = state
            .topics
            .get_mut(&topic)
            .and_then(|t| t.subscriptions.get_mut(&subscription))
            .and_then(|q| q.get_mut(index))
            .ok_or_else(lock_lost)?;
        let valid = queued
            .lock
            .as_ref()
            .map_or(false, |lease| lease.expires_at > now);
        if !valid {
            queued.lock = None;
            return Err(lock_lost());
        }
        let expires_at = now + self.lease;
        queued.lock = Some(Lease {
            token: message.lock_token,
            expires_at,
        });
        Ok(expires_at)
    }

    async fn complete(&self, message: &Message) -> Result<(), BusError> {
        let mut state = self.state.lock().unwrap();
        let now = Utc::now();
        let Some((topic, subscription, index)) = Self::find_by_token(&state, message.lock_token)
        else {
            return Err(lock_lost());
        };
        let queue = state
            .topics
            .get_mut(&topic)
            .and_then(|t| t.subscriptions.get_mut(&subscription))
            .ok_or_else(lock_lost)?;
        let valid = queue
            .get(index)
            .and_then(|q| q.lock.as_ref())
            .map_or(false, |lease| lease.expires_at > now);
        if !valid {
            return Err(lock_lost());
        }
        queue.remove(index);
        Ok(())
    }

    async fn abandon(&self, message: &Message) -> Result<(), BusError> {
        {
            let mut state = self.state.lock().unwrap();
            let now = Utc::now();
            let Some((topic, subscription, index)) =
                Self::find_by_token(&state, message.lock_token)
            else {
                return Err(lock_lost());
            };
            let queued = state
                .topics
                .get_mut(&topic)
                .and_then(|t| t.subscriptions.get_mut(&subscription))
                .and_then(|q| q.get_mut(index))
                .ok_or_else(lock_lost)?;
            let valid = queued
                .lock
                .as_ref()
                .map_or(false, |lease| lease.expires_at > now);
            if !valid {
                queued.lock = None;
                return Err(lock_lost());
            }
            queued.lock = None;
        }
        self.arrivals.notify_waiters();
        Ok(())
    }

    async fn send(&self, topic: &str, body: Bytes) -> Result<(), BusError> {
        {
            let mut state = self.state.lock().unwrap();
            let topic_state = state.topics.entry(topic.to_owned()).or_default();
            if topic_state.subscriptions.is_empty() {
                tracing::debug!(topic, "no subscriptions on topic, message dropped");
            }
            let message_id = Uuid::now_v7().to_string();
            for queue in topic_state.subscriptions.values_mut() {
                queue.push_back(QueuedMessage {
                    body: body.clone(),
                    message_id: message_id.clone(),
                    delivery_count: 0,
                    lock: None,
                });
            }
        }
        self.arrivals.notify_waiters();
        Ok(())
    }
}
