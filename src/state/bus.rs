use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::debug;

/// Per-subscriber queue depth. Events beyond it are dropped for that subscriber.
pub const SUBSCRIBER_CAPACITY: usize = 25;

/// Envelope fanned out to every subscriber.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BusEvent {
    /// Public snapshot of a court after a mutation.
    StateUpdate { kort_id: String, data: Value },
    /// Operator-facing notification (UNO toggled, court added, ...).
    Admin { event: String, data: Value },
}

/// Receiving end handed out by [`BroadcastBus::listen`].
pub struct BusSubscription {
    pub id: u64,
    pub receiver: mpsc::Receiver<BusEvent>,
}

/// Fan-out hub with bounded, drop-on-full subscriber queues.
///
/// Publishing never waits, so it is safe to call while holding the court lock.
pub struct BroadcastBus {
    listeners: DashMap<u64, mpsc::Sender<BusEvent>>,
    next_id: AtomicU64,
    capacity: usize,
}

impl Default for BroadcastBus {
    fn default() -> Self {
        Self::new(SUBSCRIBER_CAPACITY)
    }
}

impl BroadcastBus {
    pub fn new(capacity: usize) -> Self {
        Self {
            listeners: DashMap::new(),
            next_id: AtomicU64::new(1),
            capacity: capacity.max(1),
        }
    }

    /// Register a subscriber that receives every later event.
    pub fn listen(&self) -> BusSubscription {
        let (tx, receiver) = mpsc::channel(self.capacity);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.listeners.insert(id, tx);
        BusSubscription { id, receiver }
    }

    /// Forget a subscriber.
    pub fn discard(&self, id: u64) {
        self.listeners.remove(&id);
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    /// Deliver `event` to every subscriber without blocking.
    pub fn broadcast(&self, event: BusEvent) {
        let targets: Vec<(u64, mpsc::Sender<BusEvent>)> = self
            .listeners
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect();

        for (id, tx) in targets {
            match tx.try_send(event.clone()) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    debug!(subscriber = id, "subscriber queue full, event dropped");
                }
                Err(TrySendError::Closed(_)) => {
                    self.listeners.remove(&id);
                }
            }
        }
    }

    /// Publish an admin notification.
    pub fn admin(&self, event: &str, data: Value) {
        self.broadcast(BusEvent::Admin {
            event: event.to_string(),
            data,
        });
    }
}
