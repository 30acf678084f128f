//! Per-court outbound command queue: coalescing by command id, retry backoff and an
//! attempt budget.

use std::{collections::HashMap, time::Duration};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use serde_with::{DurationSeconds, serde_as};
use tokio::{sync::Mutex, time::Instant};
use uuid::Uuid;

/// Attempts before a command is dropped.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Outbound command waiting to be delivered to a court's overlay.
#[derive(Debug, Clone)]
pub struct QueuedCommand {
    pub command: String,
    pub payload: Option<Map<String, Value>>,
    pub command_id: String,
    pub attempts: u32,
    pub max_attempts: u32,
    pub next_attempt: Instant,
}

/// Per-court FIFO of pending commands keyed by `command_id`.
///
/// Enqueueing an id that is already pending overwrites it in place, so repeated edits of
/// the same logical field coalesce.
#[derive(Debug, Default)]
pub struct CommandQueue {
    courts: Mutex<HashMap<String, IndexMap<String, QueuedCommand>>>,
    max_attempts: u32,
}

impl CommandQueue {
    /// Create an empty queue with the given attempt budget.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            courts: Mutex::new(HashMap::new()),
            max_attempts: max_attempts.max(1),
        }
    }

    /// Insert or overwrite a command. Returns `false` when `kort_id` or `command` is empty.
    pub async fn enqueue(
        &self,
        kort_id: &str,
        command: &str,
        payload: Option<Map<String, Value>>,
        command_id: Option<String>,
        now: Instant,
    ) -> bool {
        if kort_id.trim().is_empty() || command.trim().is_empty() {
            return false;
        }

        let command_id = command_id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let entry = QueuedCommand {
            command: command.to_string(),
            payload,
            command_id: command_id.clone(),
            attempts: 0,
            max_attempts: self.max_attempts,
            next_attempt: now,
        };

        let mut guard = self.courts.lock().await;
        guard
            .entry(kort_id.to_string())
            .or_default()
            .insert(command_id, entry);
        true
    }

    /// Remove and return the first entry that is due.
    pub async fn dequeue(&self, kort_id: &str, now: Instant) -> Option<QueuedCommand> {
        let mut guard = self.courts.lock().await;
        let entries = guard.get_mut(kort_id)?;
        let index = entries
            .values()
            .position(|entry| entry.next_attempt <= now)?;
        entries.shift_remove_index(index).map(|(_, entry)| entry)
    }

    /// Whether any entry for the court is due.
    pub async fn has_ready(&self, kort_id: &str, now: Instant) -> bool {
        let guard = self.courts.lock().await;
        guard
            .get(kort_id)
            .is_some_and(|entries| entries.values().any(|entry| entry.next_attempt <= now))
    }

    /// Count a failed delivery and schedule a retry after `backoff`.
    ///
    /// Returns `false` when the entry has used up its attempts and was dropped. A retried
    /// entry goes back to the head of the queue unless a newer command with the same id
    /// was enqueued meanwhile, in which case the newer one wins.
    pub async fn requeue(
        &self,
        kort_id: &str,
        mut entry: QueuedCommand,
        backoff: Duration,
        now: Instant,
    ) -> bool {
        entry.attempts += 1;
        if entry.attempts >= entry.max_attempts {
            return false;
        }
        entry.next_attempt = now + backoff;

        let mut guard = self.courts.lock().await;
        let entries = guard.entry(kort_id.to_string()).or_default();
        if !entries.contains_key(&entry.command_id) {
            entries.shift_insert(0, entry.command_id.clone(), entry);
        }
        true
    }

    /// Copy of a court's pending entries in delivery order.
    pub async fn pending(&self, kort_id: &str) -> Vec<QueuedCommand> {
        let guard = self.courts.lock().await;
        guard
            .get(kort_id)
            .map(|entries| entries.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Drop every pending entry of a court, returning how many were dropped.
    pub async fn clear(&self, kort_id: &str) -> usize {
        let mut guard = self.courts.lock().await;
        guard.remove(kort_id).map_or(0, |entries| entries.len())
    }

    /// Pending entries for a court.
    pub async fn len(&self, kort_id: &str) -> usize {
        let guard = self.courts.lock().await;
        guard.get(kort_id).map_or(0, IndexMap::len)
    }

    /// Whether the court has nothing pending.
    pub async fn is_empty(&self, kort_id: &str) -> bool {
        self.len(kort_id).await == 0
    }
}

/// Retry delays for failed command deliveries.
#[serde_as]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffPolicy {
    /// First retry delay; doubles with each attempt.
    #[serde_as(as = "DurationSeconds<u64>")]
    pub base: Duration,
    /// Floor after an HTTP 429.
    #[serde_as(as = "DurationSeconds<u64>")]
    pub rate_limited: Duration,
    /// Floor after an HTTP 5xx.
    #[serde_as(as = "DurationSeconds<u64>")]
    pub server_error: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(5),
            rate_limited: Duration::from_secs(60),
            server_error: Duration::from_secs(15),
        }
    }
}

impl BackoffPolicy {
    /// Delay before retrying an entry that has failed `attempts` times so far.
    pub fn delay(&self, attempts: u32, status: u16, retry_after: Option<Duration>) -> Duration {
        let exponent = attempts.min(6);
        let mut delay = self.base.saturating_mul(1 << exponent);
        if status == 429 {
            delay = delay.max(self.rate_limited);
        } else if (500..600).contains(&status) {
            delay = delay.max(self.server_error);
        }
        match retry_after {
            Some(hint) => delay.max(hint),
            None => delay,
        }
    }
}
