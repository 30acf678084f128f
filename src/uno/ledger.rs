//! Per-court hourly request accounting and the global activity staircase.

use std::{
    collections::{HashMap, HashSet, VecDeque},
    time::Duration,
};

use serde::Serialize;
use tokio::{sync::Mutex, time::Instant};
use utoipa::ToSchema;

/// Length of the rolling usage window.
pub const USAGE_WINDOW: Duration = Duration::from_secs(3600);

/// Pacing decision derived from a court's hourly usage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum UsageMode {
    /// Below the slowdown threshold.
    Normal,
    /// Above the threshold: the worker runs one cycle out of `slowdown_factor`.
    Slowdown,
    /// At or above the hourly limit: queries are skipped.
    Limit,
}

/// Hourly limit knobs for a court.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HourlyLimits {
    /// Maximum attempted calls per rolling hour.
    pub limit: u32,
    /// Fraction of `limit` at which slowdown starts.
    pub threshold: f64,
}

/// Observed usage for one court.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, ToSchema)]
pub struct UsageStatus {
    pub mode: UsageMode,
    pub count: usize,
    pub limit: u32,
    pub ratio: f64,
}

/// Classify a request count against the configured limits.
pub fn classify(count: usize, limits: HourlyLimits) -> UsageStatus {
    let ratio = if limits.limit == 0 {
        0.0
    } else {
        count as f64 / f64::from(limits.limit)
    };
    let mode = if limits.limit == 0 {
        UsageMode::Normal
    } else if count >= limits.limit as usize {
        UsageMode::Limit
    } else if ratio >= limits.threshold {
        UsageMode::Slowdown
    } else {
        UsageMode::Normal
    };
    UsageStatus {
        mode,
        count,
        limit: limits.limit,
        ratio,
    }
}

#[derive(Debug, Default)]
struct LedgerState {
    windows: HashMap<String, VecDeque<Instant>>,
    tripped: HashSet<String>,
}

fn prune(window: &mut VecDeque<Instant>, now: Instant) {
    while let Some(front) = window.front() {
        if now.saturating_duration_since(*front) >= USAGE_WINDOW {
            window.pop_front();
        } else {
            break;
        }
    }
}

/// Outcome of recording a request.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RecordOutcome {
    /// Usage after the request was appended.
    pub status: UsageStatus,
    /// True exactly once per excursion into [`UsageMode::Limit`].
    pub limit_reached: bool,
}

/// Rolling one-hour counter of attempted remote calls, per court.
#[derive(Debug, Default)]
pub struct HourlyLedger {
    state: Mutex<LedgerState>,
}

impl HourlyLedger {
    /// Create an empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an attempted call for `kort_id` and report the resulting usage.
    pub async fn record(&self, kort_id: &str, now: Instant, limits: HourlyLimits) -> RecordOutcome {
        let mut guard = self.state.lock().await;
        let window = guard.windows.entry(kort_id.to_string()).or_default();
        prune(window, now);
        window.push_back(now);
        let status = classify(window.len(), limits);

        let limit_reached = if status.mode == UsageMode::Limit {
            guard.tripped.insert(kort_id.to_string())
        } else {
            guard.tripped.remove(kort_id);
            false
        };

        RecordOutcome {
            status,
            limit_reached,
        }
    }

    /// Number of calls recorded for `kort_id` in the last hour.
    pub async fn count(&self, kort_id: &str, now: Instant) -> usize {
        let mut guard = self.state.lock().await;
        match guard.windows.get_mut(kort_id) {
            Some(window) => {
                prune(window, now);
                window.len()
            }
            None => 0,
        }
    }

    /// Current pacing status for `kort_id`.
    pub async fn status(&self, kort_id: &str, now: Instant, limits: HourlyLimits) -> UsageStatus {
        let count = self.count(kort_id, now).await;
        let status = classify(count, limits);
        if status.mode != UsageMode::Limit {
            self.state.lock().await.tripped.remove(kort_id);
        }
        status
    }

    /// Drop all accounting for a removed court.
    pub async fn forget(&self, kort_id: &str) {
        let mut guard = self.state.lock().await;
        guard.windows.remove(kort_id);
        guard.tripped.remove(kort_id);
    }

    /// Courts that currently have recorded usage.
    pub async fn courts(&self) -> Vec<String> {
        let guard = self.state.lock().await;
        guard.windows.keys().cloned().collect()
    }
}

/// Idle thresholds and interval multipliers of the activity staircase.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ActivityConfig {
    /// Idle durations at which stages 1, 2 and 3 begin.
    pub thresholds: [Duration; 3],
    /// Interval multiplier for stages 0 through 3.
    pub multipliers: [f64; 4],
}

/// Reading of the staircase at one instant.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ActivityReading {
    pub stage: u8,
    pub multiplier: f64,
    pub idle: Duration,
    /// True when the stage differs from the previous reading.
    pub changed: bool,
}

#[derive(Debug)]
struct ActivityState {
    last_change: Instant,
    stage: u8,
}

/// Global timer of the last observed state change across all courts.
#[derive(Debug)]
pub struct ActivityTracker {
    state: Mutex<ActivityState>,
}

impl ActivityTracker {
    /// Start the tracker as if a change was observed at `now`.
    pub fn new(now: Instant) -> Self {
        Self {
            state: Mutex::new(ActivityState {
                last_change: now,
                stage: 0,
            }),
        }
    }

    /// Record a state change.
    pub async fn touch(&self, now: Instant) {
        let mut guard = self.state.lock().await;
        if now > guard.last_change {
            guard.last_change = now;
        }
    }

    /// Compute the current stage and multiplier.
    pub async fn observe(&self, now: Instant, config: &ActivityConfig) -> ActivityReading {
        let mut guard = self.state.lock().await;
        let idle = now.saturating_duration_since(guard.last_change);
        let stage = config
            .thresholds
            .iter()
            .filter(|threshold| idle >= **threshold)
            .count() as u8;
        let changed = stage != guard.stage;
        guard.stage = stage;
        ActivityReading {
            stage,
            multiplier: config.multipliers[usize::from(stage)],
            idle,
            changed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LIMITS: HourlyLimits = HourlyLimits {
        limit: 5,
        threshold: 0.8,
    };

    fn minutes(value: u64) -> Duration {
        Duration::from_secs(value * 60)
    }

    #[tokio::test]
    async fn modes_follow_threshold_and_limit() {
        let ledger = HourlyLedger::new();
        let now = Instant::now();
        for _ in 0..3 {
            assert_eq!(
                ledger.record("1", now, LIMITS).await.status.mode,
                UsageMode::Normal
            );
        }
        let fourth = ledger.record("1", now, LIMITS).await;
        assert_eq!(fourth.status.mode, UsageMode::Slowdown);
        assert!(!fourth.limit_reached);

        let fifth = ledger.record("1", now, LIMITS).await;
        assert_eq!(fifth.status.mode, UsageMode::Limit);
        assert!(fifth.limit_reached);

        let sixth = ledger.record("1", now, LIMITS).await;
        assert!(!sixth.limit_reached, "limit side effect fires once");
    }

    #[tokio::test]
    async fn entries_expire_after_an_hour() {
        let ledger = HourlyLedger::new();
        let start = Instant::now();
        ledger.record("1", start, LIMITS).await;
        ledger.record("1", start + minutes(30), LIMITS).await;

        assert_eq!(ledger.count("1", start + minutes(59)).await, 2);
        assert_eq!(ledger.count("1", start + minutes(60)).await, 1);
        assert_eq!(ledger.count("1", start + minutes(90)).await, 0);
    }

    #[tokio::test]
    async fn courts_are_counted_independently() {
        let ledger = HourlyLedger::new();
        let now = Instant::now();
        ledger.record("1", now, LIMITS).await;
        ledger.record("2", now, LIMITS).await;
        ledger.record("2", now, LIMITS).await;
        assert_eq!(ledger.count("1", now).await, 1);
        assert_eq!(ledger.count("2", now).await, 2);
        ledger.forget("2").await;
        assert_eq!(ledger.count("2", now).await, 0);
    }

    #[tokio::test]
    async fn limit_rearms_after_window_drains() {
        let ledger = HourlyLedger::new();
        let start = Instant::now();
        for _ in 0..5 {
            ledger.record("1", start, LIMITS).await;
        }
        let later = start + minutes(61);
        assert_eq!(ledger.status("1", later, LIMITS).await.mode, UsageMode::Normal);
        for _ in 0..4 {
            ledger.record("1", later, LIMITS).await;
        }
        assert!(ledger.record("1", later, LIMITS).await.limit_reached);
    }

    #[tokio::test]
    async fn staircase_stages_by_idle_minutes() {
        let config = ActivityConfig {
            thresholds: [minutes(30), minutes(60), minutes(90)],
            multipliers: [1.0, 2.0, 4.0, 360.0],
        };
        let start = Instant::now();
        let tracker = ActivityTracker::new(start);

        let reading = tracker.observe(start + minutes(29), &config).await;
        assert_eq!((reading.stage, reading.multiplier), (0, 1.0));

        let reading = tracker.observe(start + minutes(30), &config).await;
        assert_eq!((reading.stage, reading.multiplier), (1, 2.0));
        assert!(reading.changed);

        let reading = tracker.observe(start + minutes(95), &config).await;
        assert_eq!((reading.stage, reading.multiplier), (3, 360.0));

        tracker.touch(start + minutes(96)).await;
        let reading = tracker.observe(start + minutes(97), &config).await;
        assert_eq!(reading.stage, 0);
        assert!(reading.changed);
    }
}
