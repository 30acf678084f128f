//! One cooperative task per court: drains its command queue and runs its polling schedule.

use std::{sync::Arc, time::Duration};

use serde_json::{Map, Value};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::{
    UnoConfig, WorkerHandle,
    ledger::UsageMode,
    scheduler::{HookError, QueryHooks, QueryScheduler, QuerySpec, RunOutcome, SkipReason},
    smart_poll::SmartPoll,
    token_bucket::TokenBucket,
};
use crate::{
    clock::StopSignal,
    state::{SharedState, court::CourtState},
};

/// Local command that mirrors a query's result (`GetPointsPlayerA` -> `SetPointsPlayerA`).
pub fn reflected_command(query: &str) -> Option<String> {
    query.strip_prefix("Get").map(|rest| format!("Set{rest}"))
}

/// Split a queued payload into the command value and its extra fields.
fn split_payload(payload: Option<&Map<String, Value>>) -> (Value, Map<String, Value>) {
    let mut extras = payload.cloned().unwrap_or_default();
    let value = extras.remove("value").unwrap_or(Value::Null);
    (value, extras)
}

/// Scheduler hooks backed by the court's smart-poll controller and token bucket.
struct CourtHooks<'a> {
    state: &'a SharedState,
    kort_id: &'a str,
    smart: &'a mut SmartPoll,
    bucket: &'a TokenBucket,
}

impl QueryHooks for CourtHooks<'_> {
    fn precondition(&mut self, spec: &QuerySpec, now: Instant) -> Result<bool, HookError> {
        Ok(self.smart.allows(spec, now))
    }

    async fn admit(&mut self, now: Instant) -> bool {
        self.bucket.take(now).await
    }

    async fn on_result(&mut self, spec: &QuerySpec, value: &Value, _now: Instant) -> Result<(), HookError> {
        let Some(command) = reflected_command(spec.command) else {
            return Ok(());
        };
        self.state
            .apply_command(self.kort_id, &command, value, &Map::new())
            .await
            .map(|_| ())
            .map_err(|err| HookError {
                hook: "on_result",
                command: spec.command,
                message: err.to_string(),
            })
    }

    fn interval_hint(&self, spec: &QuerySpec) -> Option<Duration> {
        self.smart.interval_hint(spec)
    }
}

/// Polling loop of one court.
pub struct CourtWorker {
    state: SharedState,
    kort_id: String,
    overlay_id: String,
    scheduler: QueryScheduler,
    smart: SmartPoll,
    bucket: Arc<TokenBucket>,
    stop: StopSignal,
    cycle: u32,
    last_mode: UsageMode,
}

impl CourtWorker {
    pub async fn new(state: SharedState, kort_id: String, overlay_id: String, stop: StopSignal) -> Self {
        let now = state.clock().now();
        let config = state.uno().config().await;
        let court = state.scores().state(&kort_id).await.unwrap_or_default();
        let bucket = state.uno().bucket(&kort_id, now).await;
        Self {
            scheduler: QueryScheduler::new(config.intervals, now),
            smart: SmartPoll::new(&court, config.intervals),
            state,
            kort_id,
            overlay_id,
            bucket,
            stop,
            cycle: 0,
            last_mode: UsageMode::Normal,
        }
    }

    /// Run until stopped.
    pub async fn run(mut self) {
        info!(kort_id = %self.kort_id, overlay_id = %self.overlay_id, "court worker started");
        while !self.stop.is_stopped() {
            if !self.tick().await {
                break;
            }
        }
        info!(kort_id = %self.kort_id, "court worker stopped");
    }

    async fn pause(&mut self, duration: Duration) -> bool {
        let clock = self.state.clock().clone();
        self.stop.sleep(clock.as_ref(), duration).await
    }

    /// One drain cycle. Returns `false` once the stop signal fired.
    pub async fn tick(&mut self) -> bool {
        let state = self.state.clone();
        let clock = state.clock().clone();
        let uno = state.uno();
        let config = uno.config().await;
        let now = clock.now();

        let reading = uno.activity(now).await;
        if (reading.multiplier - self.scheduler.multiplier()).abs() > f64::EPSILON {
            info!(
                kort_id = %self.kort_id,
                stage = reading.stage,
                multiplier = reading.multiplier,
                "activity multiplier changed"
            );
            self.scheduler.set_multiplier(reading.multiplier, now);
        }

        if !uno.is_enabled() {
            return self.pause(config.disabled_sleep).await;
        }

        let usage = uno.usage(&self.kort_id, now).await;
        if usage.mode != self.last_mode {
            info!(
                kort_id = %self.kort_id,
                from = ?self.last_mode,
                to = ?usage.mode,
                count = usage.count,
                limit = usage.limit,
                "hourly usage mode changed"
            );
            self.last_mode = usage.mode;
        }
        match usage.mode {
            UsageMode::Limit => return self.pause(config.slowdown_sleep).await,
            UsageMode::Slowdown => {
                self.cycle = (self.cycle + 1) % config.slowdown_factor.max(1);
                if self.cycle != 0 {
                    return self.pause(config.slowdown_sleep).await;
                }
            }
            UsageMode::Normal => self.cycle = 0,
        }

        if let Some(court) = state.scores().state(&self.kort_id).await {
            self.sync_smart_poll(&court, now);
        }

        if let Some(keep_going) = self.drain_one(&config).await {
            return keep_going;
        }

        self.poll_once(&config).await
    }

    fn sync_smart_poll(&mut self, court: &CourtState, now: Instant) {
        if let Some(change) = self.smart.sync_from_state(court, now) {
            info!(
                kort_id = %self.kort_id,
                from = ?change.from,
                to = ?change.to,
                "smart poll mode changed"
            );
        }
    }

    /// Deliver the first ready queued command. `None` when nothing was ready.
    async fn drain_one(&mut self, config: &UnoConfig) -> Option<bool> {
        let state = self.state.clone();
        let clock = state.clock().clone();
        let uno = state.uno();
        let now = clock.now();
        if !uno.queue().has_ready(&self.kort_id, now).await {
            return None;
        }
        if !self.bucket.take(now).await {
            return Some(self.pause(config.token_wait).await);
        }
        let entry = uno.queue().dequeue(&self.kort_id, now).await?;

        let response = uno
            .api()
            .execute(&self.overlay_id, &entry.command, entry.payload.as_ref())
            .await;
        let now = clock.now();
        let recorded = uno
            .record_request(&self.kort_id, &entry.command, &response, now)
            .await;

        if response.command_succeeded() {
            debug!(
                kort_id = %self.kort_id,
                command = %entry.command,
                command_id = %entry.command_id,
                "queued command delivered"
            );
            let (value, extras) = split_payload(entry.payload.as_ref());
            if let Err(err) = state
                .apply_command(&self.kort_id, &entry.command, &value, &extras)
                .await
            {
                debug!(kort_id = %self.kort_id, command = %entry.command, error = %err, "delivered command not mirrored locally");
            }
        } else {
            let delay = config
                .backoff
                .delay(entry.attempts, response.status, response.retry_after());
            let command = entry.command.clone();
            let command_id = entry.command_id.clone();
            let attempts = entry.attempts + 1;
            if uno.queue().requeue(&self.kort_id, entry, delay, now).await {
                warn!(
                    kort_id = %self.kort_id,
                    %command,
                    %command_id,
                    status = response.status,
                    attempts,
                    retry_in_ms = delay.as_millis() as u64,
                    "command delivery failed, retrying"
                );
            } else {
                error!(
                    kort_id = %self.kort_id,
                    %command,
                    %command_id,
                    status = response.status,
                    attempts,
                    "command dropped after max attempts"
                );
            }
        }

        if recorded.limit_reached {
            self.trip_hourly_limit().await;
        }
        Some(!self.stop.is_stopped())
    }

    /// Run at most one scheduled query.
    async fn poll_once(&mut self, config: &UnoConfig) -> bool {
        let clock = self.state.clock().clone();
        let state = self.state.clone();
        let outcome = {
            let Self {
                scheduler,
                smart,
                bucket,
                stop,
                kort_id,
                overlay_id,
                ..
            } = self;
            let mut hooks = CourtHooks {
                state: &state,
                kort_id,
                smart,
                bucket,
            };
            scheduler
                .run_once(
                    clock.as_ref(),
                    stop,
                    state.uno().api().as_ref(),
                    overlay_id,
                    &mut hooks,
                    config.max_query_wait,
                )
                .await
        };

        match outcome {
            RunOutcome::Stopped => false,
            RunOutcome::Executed { spec, response, at } => {
                let recorded = state
                    .uno()
                    .record_request(&self.kort_id, spec.command, &response, clock.now())
                    .await;
                self.smart.after_poll(&spec, at, response.is_success());
                if recorded.limit_reached {
                    self.trip_hourly_limit().await;
                }
                !self.stop.is_stopped()
            }
            RunOutcome::Skipped {
                reason: SkipReason::RateLimited,
                ..
            } => self.pause(config.token_wait).await,
            RunOutcome::Skipped {
                reason: SkipReason::Precondition,
                ..
            }
            | RunOutcome::NotDue => !self.stop.is_stopped(),
            RunOutcome::Empty => self.pause(config.max_query_wait).await,
        }
    }

    async fn trip_hourly_limit(&self) {
        let reason = format!("kort {} reached UNO hourly limit", self.kort_id);
        warn!(kort_id = %self.kort_id, %reason, "disabling UNO requests");
        self.state.disable_uno_requests(Some(reason)).await;
    }
}

/// Start a worker for a court and return its handle.
pub async fn spawn(state: SharedState, kort_id: String, overlay_id: String) -> WorkerHandle {
    let (stop_tx, stop) = StopSignal::channel();
    let worker = CourtWorker::new(state, kort_id, overlay_id, stop).await;
    let task = tokio::spawn(worker.run());
    WorkerHandle { stop: stop_tx, task }
}

/// Start workers for every court with an overlay when requests are enabled; stop them all
/// otherwise.
pub async fn sync_workers(state: &SharedState) {
    let uno = state.uno();
    if !uno.is_enabled() {
        let stopped = uno.stop_all_workers();
        if stopped > 0 {
            info!(stopped, "court workers stopped");
        }
        return;
    }

    for (kort_id, overlay_id) in state.overlay_courts() {
        if uno.has_worker(&kort_id) {
            continue;
        }
        let handle = spawn(state.clone(), kort_id.clone(), overlay_id).await;
        uno.register_worker(&kort_id, handle);
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn queries_mirror_into_setters() {
        assert_eq!(reflected_command("GetPointsPlayerA").as_deref(), Some("SetPointsPlayerA"));
        assert_eq!(
            reflected_command("GetTieBreakVisibility").as_deref(),
            Some("SetTieBreakVisibility")
        );
        assert_eq!(reflected_command("ShowOverlay"), None);
    }

    #[test]
    fn payload_value_is_split_from_extras() {
        let payload = json!({"value": "https://flags/es.svg", "fieldId": "Player A Flag"});
        let (value, extras) = split_payload(payload.as_object());
        assert_eq!(value, json!("https://flags/es.svg"));
        assert_eq!(extras.get("fieldId"), Some(&json!("Player A Flag")));
        assert!(!extras.contains_key("value"));

        let (value, extras) = split_payload(None);
        assert_eq!(value, Value::Null);
        assert!(extras.is_empty());
    }
}
