use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Mutex;

use buslane_common::Message;

/// Concurrency accounting for one consumption loop. The in-use slot count and
/// the in-flight message table share a single lock because both are touched
/// from the receive loop and from settlement tasks; the lock is never held
/// across an await.
pub(crate) struct SlotTracker {
    cap: usize,
    inner: Mutex<SlotState>,
}

#[derive(Default)]
struct SlotState {
    in_use: usize,
    in_flight: HashMap<String, Message>,
}

impl SlotTracker {
    pub fn new(cap: usize) -> Self {
        SlotTracker {
            cap,
            inner: Mutex::new(SlotState::default()),
        }
    }

    pub fn capacity(&self) -> usize {
        self.cap
    }

    pub fn in_use(&self) -> usize {
        self.inner.lock().unwrap().in_use
    }

    /// Reserves up to `want` slots without blocking; returns how many were
    /// granted. Zero means the loop is saturated.
    pub fn try_acquire(&self, want: usize) -> usize {
        let mut state = self.inner.lock().unwrap();
        let granted = want.min(self.cap - state.in_use);
        state.in_use += granted;
        granted
    }

    /// Returns `count` slots to the pool.
    pub fn release(&self, count: usize) {
        let mut state = self.inner.lock().unwrap();
        debug_assert!(count <= state.in_use);
        state.in_use = state.in_use.saturating_sub(count);
    }

    /// Records a message as in flight. Returns false when its id is already
    /// tracked: the broker redelivered while the first delivery still holds
    /// its slot, and the newer handle must not be dispatched again.
    pub fn begin(&self, message: &Message) -> bool {
        let mut state = self.inner.lock().unwrap();
        match state.in_flight.entry(message.message_id.clone()) {
            Entry::Occupied(tracked) => {
                let tracked = tracked.get();
                tracing::warn!(
                    message_id = %message.message_id,
                    tracked_delivery = tracked.delivery_count,
                    tracked_locked_until = %tracked.locked_until,
                    delivery = message.delivery_count,
                    locked_until = %message.locked_until,
                    "message redelivered while still in flight"
                );
                false
            }
            Entry::Vacant(slot) => {
                slot.insert(message.clone());
                true
            }
        }
    }

    /// Drops the in-flight record at settlement.
    pub fn finish(&self, message_id: &str) {
        let mut state = self.inner.lock().unwrap();
        if state.in_flight.remove(message_id).is_none() {
            tracing::debug!(message_id, "settled message was not tracked as in flight");
        }
    }
}
