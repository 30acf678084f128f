//! Priority-queue driven poller issuing overlay queries at mode-dependent cadences.

use std::{
    cmp::{Ordering, Reverse},
    collections::BinaryHeap,
    future::Future,
    time::Duration,
};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use serde_with::{DurationSeconds, serde_as};
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::client::{OverlayApi, RemoteResponse};
use crate::{
    clock::{Clock, StopSignal},
    state::court::Side,
};

/// Which query set the scheduler is cycling through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchedulerMode {
    Normal,
    /// Tie-break is visible on the overlay.
    Tie,
}

/// Precondition family a query belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gate {
    Always,
    Points,
    CurrentGames,
    Sets,
    Names,
}

/// One periodic query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuerySpec {
    pub mode: SchedulerMode,
    pub command: &'static str,
    pub side: Option<Side>,
    pub interval: Duration,
    pub gate: Gate,
    pub repeat: bool,
    /// Truthy results move the scheduler to tie mode, falsy ones back to normal.
    pub switches_mode: bool,
}

impl QuerySpec {
    fn new(
        mode: SchedulerMode,
        command: &'static str,
        side: Option<Side>,
        interval: Duration,
        gate: Gate,
    ) -> Self {
        Self {
            mode,
            command,
            side,
            interval,
            gate,
            repeat: true,
            switches_mode: false,
        }
    }

    fn switching(mut self) -> Self {
        self.switches_mode = true;
        self
    }
}

/// Base cadences of every query, in seconds in the configuration file.
#[serde_as]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollIntervals {
    #[serde_as(as = "DurationSeconds<u64>")]
    pub points: Duration,
    #[serde_as(as = "DurationSeconds<u64>")]
    pub current_games: Duration,
    #[serde_as(as = "DurationSeconds<u64>")]
    pub sets: Duration,
    #[serde_as(as = "DurationSeconds<u64>")]
    pub names: Duration,
    #[serde_as(as = "DurationSeconds<u64>")]
    pub tie_visibility_normal: Duration,
    #[serde_as(as = "DurationSeconds<u64>")]
    pub tie_visibility_tie: Duration,
    #[serde_as(as = "DurationSeconds<u64>")]
    pub tie_points: Duration,
    /// Points re-poll spacing before the first point of a match.
    #[serde_as(as = "DurationSeconds<u64>")]
    pub await_first_point: Duration,
    /// Points re-poll spacing during a match.
    #[serde_as(as = "DurationSeconds<u64>")]
    pub in_match_points: Duration,
    #[serde_as(as = "DurationSeconds<u64>")]
    pub await_names_names: Duration,
    #[serde_as(as = "DurationSeconds<u64>")]
    pub await_first_point_names: Duration,
}

impl Default for PollIntervals {
    fn default() -> Self {
        Self {
            points: Duration::from_secs(10),
            current_games: Duration::from_secs(10),
            sets: Duration::from_secs(10),
            names: Duration::from_secs(30),
            tie_visibility_normal: Duration::from_secs(180),
            tie_visibility_tie: Duration::from_secs(60),
            tie_points: Duration::from_secs(10),
            await_first_point: Duration::from_secs(12),
            in_match_points: Duration::from_secs(10),
            await_names_names: Duration::from_secs(5),
            await_first_point_names: Duration::from_secs(20),
        }
    }
}

/// Full query set for a mode.
pub fn mode_specs(mode: SchedulerMode, intervals: &PollIntervals) -> Vec<QuerySpec> {
    use SchedulerMode::{Normal, Tie};
    match mode {
        Normal => vec![
            QuerySpec::new(Normal, "GetPointsPlayerA", Some(Side::A), intervals.points, Gate::Points),
            QuerySpec::new(Normal, "GetPointsPlayerB", Some(Side::B), intervals.points, Gate::Points),
            QuerySpec::new(
                Normal,
                "GetCurrentSetPlayerA",
                Some(Side::A),
                intervals.current_games,
                Gate::CurrentGames,
            ),
            QuerySpec::new(
                Normal,
                "GetCurrentSetPlayerB",
                Some(Side::B),
                intervals.current_games,
                Gate::CurrentGames,
            ),
            QuerySpec::new(Normal, "GetSet1PlayerA", Some(Side::A), intervals.sets, Gate::Sets),
            QuerySpec::new(Normal, "GetSet1PlayerB", Some(Side::B), intervals.sets, Gate::Sets),
            QuerySpec::new(Normal, "GetSet2PlayerA", Some(Side::A), intervals.sets, Gate::Sets),
            QuerySpec::new(Normal, "GetSet2PlayerB", Some(Side::B), intervals.sets, Gate::Sets),
            QuerySpec::new(
                Normal,
                "GetTieBreakVisibility",
                None,
                intervals.tie_visibility_normal,
                Gate::Always,
            )
            .switching(),
            QuerySpec::new(Normal, "GetNamePlayerA", Some(Side::A), intervals.names, Gate::Names),
            QuerySpec::new(Normal, "GetNamePlayerB", Some(Side::B), intervals.names, Gate::Names),
        ],
        Tie => vec![
            QuerySpec::new(Tie, "GetTieBreakPlayerA", Some(Side::A), intervals.tie_points, Gate::Always),
            QuerySpec::new(Tie, "GetTieBreakPlayerB", Some(Side::B), intervals.tie_points, Gate::Always),
            QuerySpec::new(
                Tie,
                "GetTieBreakVisibility",
                None,
                intervals.tie_visibility_tie,
                Gate::Always,
            )
            .switching(),
        ],
    }
}

/// Failure raised by a scheduler hook; logged and otherwise ignored.
#[derive(Debug, Error)]
#[error("{hook} hook failed for `{command}`: {message}")]
pub struct HookError {
    pub hook: &'static str,
    pub command: &'static str,
    pub message: String,
}

/// Callbacks the scheduler consults around each query.
pub trait QueryHooks: Send {
    /// Whether the query may run now.
    fn precondition(&mut self, spec: &QuerySpec, now: Instant) -> Result<bool, HookError>;
    /// Last gate before the remote call, typically the token bucket.
    fn admit(&mut self, now: Instant) -> impl Future<Output = bool> + Send;
    /// Called with the query value on success.
    fn on_result(
        &mut self,
        spec: &QuerySpec,
        value: &Value,
        now: Instant,
    ) -> impl Future<Output = Result<(), HookError>> + Send;
    /// Override of the spec's own interval.
    fn interval_hint(&self, spec: &QuerySpec) -> Option<Duration>;
}

/// Why a due query did not reach the remote.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Precondition,
    RateLimited,
}

/// Result of one [`QueryScheduler::run_once`] call.
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    /// Nothing scheduled.
    Empty,
    /// Head of the heap is still in the future after the bounded wait.
    NotDue,
    /// The stop signal fired while waiting.
    Stopped,
    Skipped {
        spec: QuerySpec,
        reason: SkipReason,
    },
    Executed {
        spec: QuerySpec,
        response: RemoteResponse,
        /// Instant the query was rescheduled from; gates derived from this poll use it too.
        at: Instant,
    },
}

#[derive(Debug)]
struct Scheduled {
    due: Instant,
    order: u64,
    spec: QuerySpec,
}

impl PartialEq for Scheduled {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Scheduled {}

impl PartialOrd for Scheduled {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Scheduled {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.due, self.order).cmp(&(other.due, other.order))
    }
}

/// Interpret a query result as a boolean.
pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(flag) => *flag,
        Value::Number(number) => number.as_f64().is_some_and(|n| n != 0.0),
        Value::String(text) => !matches!(
            text.trim().to_ascii_lowercase().as_str(),
            "" | "false" | "0" | "no" | "off" | "null"
        ),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

/// Min-heap of `(due, order, spec)` for one court.
#[derive(Debug)]
pub struct QueryScheduler {
    mode: SchedulerMode,
    heap: BinaryHeap<Reverse<Scheduled>>,
    next_order: u64,
    multiplier: f64,
    intervals: PollIntervals,
}

impl QueryScheduler {
    /// Create a scheduler in normal mode with every query due at `now`.
    pub fn new(intervals: PollIntervals, now: Instant) -> Self {
        let mut scheduler = Self {
            mode: SchedulerMode::Normal,
            heap: BinaryHeap::new(),
            next_order: 0,
            multiplier: 1.0,
            intervals,
        };
        scheduler.seed(SchedulerMode::Normal, now);
        scheduler
    }

    pub fn mode(&self) -> SchedulerMode {
        self.mode
    }

    pub fn multiplier(&self) -> f64 {
        self.multiplier
    }

    /// Number of scheduled queries.
    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Due time of the earliest query.
    pub fn next_due(&self) -> Option<Instant> {
        self.heap.peek().map(|Reverse(entry)| entry.due)
    }

    /// Commands currently scheduled, earliest first.
    pub fn scheduled_commands(&self) -> Vec<&'static str> {
        let mut entries: Vec<&Scheduled> = self.heap.iter().map(|Reverse(entry)| entry).collect();
        entries.sort();
        entries.into_iter().map(|entry| entry.spec.command).collect()
    }

    /// Scale every future interval; a lower multiplier re-seeds the current mode at `now`.
    pub fn set_multiplier(&mut self, multiplier: f64, now: Instant) {
        let multiplier = if multiplier.is_finite() && multiplier > 0.0 {
            multiplier
        } else {
            1.0
        };
        if (multiplier - self.multiplier).abs() < f64::EPSILON {
            return;
        }
        let decreased = multiplier < self.multiplier;
        self.multiplier = multiplier;
        if decreased {
            self.seed(self.mode, now);
        }
    }

    /// Replace the base intervals and re-seed the current mode.
    pub fn set_intervals(&mut self, intervals: PollIntervals, now: Instant) {
        if intervals != self.intervals {
            self.intervals = intervals;
            self.seed(self.mode, now);
        }
    }

    /// Clear the heap and schedule every query of `mode` at `now`.
    pub fn switch_mode(&mut self, mode: SchedulerMode, now: Instant) {
        info!(from = ?self.mode, to = ?mode, "scheduler mode switch");
        self.mode = mode;
        self.seed(mode, now);
    }

    fn seed(&mut self, mode: SchedulerMode, now: Instant) {
        self.heap.clear();
        for spec in mode_specs(mode, &self.intervals) {
            self.push(spec, now);
        }
    }

    fn push(&mut self, spec: QuerySpec, due: Instant) {
        let order = self.next_order;
        self.next_order += 1;
        self.heap.push(Reverse(Scheduled { due, order, spec }));
    }

    fn reschedule(&mut self, spec: QuerySpec, now: Instant, hint: Option<Duration>) {
        if !spec.repeat || spec.mode != self.mode {
            return;
        }
        let base = hint.unwrap_or(spec.interval);
        self.push(spec, now + base.mul_f64(self.multiplier));
    }

    /// Run at most one query.
    ///
    /// Waits for the earliest query but never longer than `max_wait`, so the caller can
    /// service other work while long intervals elapse.
    pub async fn run_once<H: QueryHooks>(
        &mut self,
        clock: &dyn Clock,
        stop: &mut StopSignal,
        api: &dyn OverlayApi,
        overlay_id: &str,
        hooks: &mut H,
        max_wait: Duration,
    ) -> RunOutcome {
        let Some(due) = self.next_due() else {
            return RunOutcome::Empty;
        };

        let now = clock.now();
        if due > now {
            let wait = (due - now).min(max_wait);
            if !stop.sleep(clock, wait).await {
                return RunOutcome::Stopped;
            }
            if clock.now() < due {
                return RunOutcome::NotDue;
            }
        }

        let Some(Reverse(entry)) = self.heap.pop() else {
            return RunOutcome::Empty;
        };
        let spec = entry.spec;
        let now = clock.now();

        let allowed = hooks.precondition(&spec, now).unwrap_or_else(|err| {
            warn!(command = spec.command, error = %err, "query precondition failed");
            false
        });
        if !allowed {
            self.reschedule(spec, now, hooks.interval_hint(&spec));
            return RunOutcome::Skipped {
                spec,
                reason: SkipReason::Precondition,
            };
        }

        if !hooks.admit(now).await {
            debug!(command = spec.command, "query skipped by token bucket");
            self.push(spec, now);
            return RunOutcome::Skipped {
                spec,
                reason: SkipReason::RateLimited,
            };
        }

        let response = api.execute(overlay_id, spec.command, None).await;
        let now = clock.now();

        if let Some(value) = response.query_value() {
            if let Err(err) = hooks.on_result(&spec, &value, now).await {
                warn!(command = spec.command, error = %err, "query result handler failed");
            }
            if spec.switches_mode {
                let target = if truthy(&value) {
                    SchedulerMode::Tie
                } else {
                    SchedulerMode::Normal
                };
                if target != self.mode {
                    self.switch_mode(target, now);
                    return RunOutcome::Executed { spec, response, at: now };
                }
            }
        }

        self.reschedule(spec, now, hooks.interval_hint(&spec));
        RunOutcome::Executed { spec, response, at: now }
    }
}
