//! Outbound side of the core: everything that talks to the remote overlay service.
//!
//! [`UnoRuntime`] owns the global enable flag, per-court rate accounting, the command
//! queue and the registry of running court workers.

pub mod client;
pub mod ledger;
pub mod queue;
pub mod rate_headers;
pub mod scheduler;
pub mod smart_poll;
pub mod token_bucket;
pub mod worker;

use std::{collections::BTreeMap, sync::Arc, time::Duration};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_with::{DurationMilliSeconds, DurationSeconds, serde_as};
use tokio::{
    sync::{Mutex, RwLock, watch},
    task::JoinHandle,
    time::Instant,
};
use tracing::{info, warn};
use utoipa::ToSchema;

use self::{
    client::{OverlayClientConfig, RemoteResponse, SharedOverlayApi},
    ledger::{ActivityConfig, ActivityReading, ActivityTracker, HourlyLedger, HourlyLimits, RecordOutcome, UsageStatus},
    queue::{BackoffPolicy, CommandQueue, DEFAULT_MAX_ATTEMPTS},
    rate_headers::{CapturedRateLimit, RateHeaderStore},
    scheduler::PollIntervals,
    token_bucket::{BucketLimits, TokenBucket},
};
use crate::dto::admin::UnoConfigPatch;

/// Default overlay control endpoint.
pub const DEFAULT_BASE_URL: &str = "https://app.overlays.uno/apiv2/controlapps";

/// Tunables of the outbound side, loaded from configuration and patchable at runtime.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UnoConfig {
    pub base_url: String,
    #[serde(skip_serializing)]
    pub bearer: Option<String>,
    /// Initial state of the global kill switch.
    pub requests_enabled: bool,
    pub rpm: u32,
    pub burst: u32,
    pub hourly_limit: u32,
    pub hourly_threshold: f64,
    pub slowdown_factor: u32,
    #[serde_as(as = "DurationSeconds<u64>")]
    pub slowdown_sleep: Duration,
    /// Idle minutes at which activity stages 1, 2 and 3 start.
    pub activity_thresholds_minutes: [u64; 3],
    pub activity_multipliers: [f64; 4],
    #[serde_as(as = "DurationSeconds<u64>")]
    pub request_timeout: Duration,
    pub max_attempts: u32,
    pub backoff: BackoffPolicy,
    pub intervals: PollIntervals,
    /// Pause between checks while requests are disabled.
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub disabled_sleep: Duration,
    /// Pause after the token bucket refused a request.
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub token_wait: Duration,
    /// Longest wait for a scheduled query before the queue is checked again.
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub max_query_wait: Duration,
}

impl Default for UnoConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.into(),
            bearer: None,
            requests_enabled: true,
            rpm: 55,
            burst: 8,
            hourly_limit: 1000,
            hourly_threshold: 0.8,
            slowdown_factor: 2,
            slowdown_sleep: Duration::from_secs(5),
            activity_thresholds_minutes: [30, 60, 90],
            activity_multipliers: [1.0, 2.0, 4.0, 360.0],
            request_timeout: Duration::from_secs(5),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff: BackoffPolicy::default(),
            intervals: PollIntervals::default(),
            disabled_sleep: Duration::from_secs(5),
            token_wait: Duration::from_millis(500),
            max_query_wait: Duration::from_secs(1),
        }
    }
}

impl UnoConfig {
    pub fn bucket_limits(&self) -> BucketLimits {
        BucketLimits {
            rpm: self.rpm,
            burst: self.burst,
        }
    }

    pub fn hourly_limits(&self) -> HourlyLimits {
        HourlyLimits {
            limit: self.hourly_limit,
            threshold: self.hourly_threshold,
        }
    }

    pub fn activity(&self) -> ActivityConfig {
        ActivityConfig {
            thresholds: self
                .activity_thresholds_minutes
                .map(|minutes| Duration::from_secs(minutes * 60)),
            multipliers: self.activity_multipliers,
        }
    }

    pub fn client(&self) -> OverlayClientConfig {
        OverlayClientConfig {
            base_url: self.base_url.clone(),
            bearer: self.bearer.clone(),
            timeout: self.request_timeout,
        }
    }

    /// Overwrite the knobs present in `patch`.
    pub fn apply_patch(&mut self, patch: &UnoConfigPatch) {
        if let Some(rpm) = patch.rpm {
            self.rpm = rpm;
        }
        if let Some(burst) = patch.burst {
            self.burst = burst;
        }
        if let Some(limit) = patch.hourly_limit {
            self.hourly_limit = limit;
        }
        if let Some(threshold) = patch.hourly_threshold {
            self.hourly_threshold = threshold;
        }
        if let Some(factor) = patch.slowdown_factor {
            self.slowdown_factor = factor;
        }
        if let Some(seconds) = patch.slowdown_sleep_seconds {
            self.slowdown_sleep = Duration::from_secs(seconds);
        }
        if let Some(multipliers) = patch.activity_multipliers {
            self.activity_multipliers = multipliers;
        }
    }
}

/// Per-court line of [`UnoStatus`].
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct CourtUsage {
    pub usage: UsageStatus,
    pub rate_limit: Option<CapturedRateLimit>,
    pub queued: usize,
    pub worker_running: bool,
}

/// Aggregated view of the outbound side for operators.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct UnoStatus {
    pub enabled: bool,
    pub disabled_reason: Option<String>,
    pub activity_stage: u8,
    pub activity_multiplier: f64,
    pub courts: BTreeMap<String, CourtUsage>,
}

/// Running court worker.
pub struct WorkerHandle {
    pub stop: watch::Sender<bool>,
    pub task: JoinHandle<()>,
}

pub struct UnoRuntime {
    config: RwLock<UnoConfig>,
    enabled: watch::Sender<bool>,
    disabled_reason: Mutex<Option<String>>,
    ledger: HourlyLedger,
    activity: ActivityTracker,
    queue: CommandQueue,
    rate_headers: RateHeaderStore,
    buckets: DashMap<String, Arc<TokenBucket>>,
    workers: DashMap<String, WorkerHandle>,
    api: SharedOverlayApi,
}

impl UnoRuntime {
    pub fn new(config: UnoConfig, api: SharedOverlayApi, now: Instant) -> Self {
        let (enabled, _rx) = watch::channel(config.requests_enabled);
        Self {
            queue: CommandQueue::new(config.max_attempts),
            config: RwLock::new(config),
            enabled,
            disabled_reason: Mutex::new(None),
            ledger: HourlyLedger::new(),
            activity: ActivityTracker::new(now),
            rate_headers: RateHeaderStore::new(),
            buckets: DashMap::new(),
            workers: DashMap::new(),
            api,
        }
    }

    /// Copy of the current configuration.
    pub async fn config(&self) -> UnoConfig {
        self.config.read().await.clone()
    }

    pub fn api(&self) -> &SharedOverlayApi {
        &self.api
    }

    pub fn queue(&self) -> &CommandQueue {
        &self.queue
    }

    pub fn ledger(&self) -> &HourlyLedger {
        &self.ledger
    }

    pub fn is_enabled(&self) -> bool {
        *self.enabled.borrow()
    }

    /// Subscribe to the global enable flag.
    pub fn enabled_watcher(&self) -> watch::Receiver<bool> {
        self.enabled.subscribe()
    }

    pub async fn disabled_reason(&self) -> Option<String> {
        self.disabled_reason.lock().await.clone()
    }

    /// Flip the kill switch. Returns whether the flag changed.
    pub async fn set_enabled(&self, enabled: bool, reason: Option<String>) -> bool {
        let mut guard = self.disabled_reason.lock().await;
        *guard = if enabled { None } else { reason };
        self.enabled.send_if_modified(|current| {
            let changed = *current != enabled;
            *current = enabled;
            changed
        })
    }

    /// Token bucket of a court, created on first use.
    pub async fn bucket(&self, kort_id: &str, now: Instant) -> Arc<TokenBucket> {
        if let Some(bucket) = self.buckets.get(kort_id) {
            return bucket.clone();
        }
        let limits = self.config.read().await.bucket_limits();
        self.buckets
            .entry(kort_id.to_string())
            .or_insert_with(|| Arc::new(TokenBucket::new(limits, now)))
            .clone()
    }

    /// Count one attempted remote call and keep its rate-limit header.
    pub async fn record_request(
        &self,
        kort_id: &str,
        command: &str,
        response: &RemoteResponse,
        now: Instant,
    ) -> RecordOutcome {
        let limits = self.config.read().await.hourly_limits();
        let outcome = self.ledger.record(kort_id, now, limits).await;
        if let Some(captured) = &response.rate_limit {
            self.rate_headers.store(kort_id, captured.clone()).await;
        }
        if response.status == 429 {
            warn!(
                kort_id,
                command,
                rate_limit = ?response.rate_limit,
                "overlay answered 429"
            );
        }
        outcome
    }

    /// Hourly usage of a court.
    pub async fn usage(&self, kort_id: &str, now: Instant) -> UsageStatus {
        let limits = self.config.read().await.hourly_limits();
        self.ledger.status(kort_id, now, limits).await
    }

    /// Note a state change for the activity staircase.
    pub async fn touch_activity(&self, now: Instant) {
        self.activity.touch(now).await;
    }

    pub async fn activity(&self, now: Instant) -> ActivityReading {
        let config = self.config.read().await.activity();
        self.activity.observe(now, &config).await
    }

    /// Apply a runtime patch and reconfigure every bucket in place.
    pub async fn update_config(&self, patch: &UnoConfigPatch, now: Instant) -> UnoConfig {
        let updated = {
            let mut guard = self.config.write().await;
            guard.apply_patch(patch);
            guard.clone()
        };
        let buckets: Vec<Arc<TokenBucket>> = self.buckets.iter().map(|entry| entry.value().clone()).collect();
        for bucket in buckets {
            bucket.reconfigure(updated.bucket_limits(), now).await;
        }
        info!(?patch, "UNO configuration updated");
        updated
    }

    /// Drop every trace of a court.
    pub async fn forget_court(&self, kort_id: &str) {
        self.ledger.forget(kort_id).await;
        self.rate_headers.forget(kort_id).await;
        self.queue.clear(kort_id).await;
        self.buckets.remove(kort_id);
    }

    pub fn has_worker(&self, kort_id: &str) -> bool {
        self.workers
            .get(kort_id)
            .is_some_and(|handle| !handle.task.is_finished())
    }

    pub fn register_worker(&self, kort_id: &str, handle: WorkerHandle) {
        if let Some(previous) = self.workers.insert(kort_id.to_string(), handle) {
            let _ = previous.stop.send(true);
        }
    }

    /// Signal a court's worker to stop. Returns whether one was registered.
    pub fn stop_worker(&self, kort_id: &str) -> bool {
        match self.workers.remove(kort_id) {
            Some((_, handle)) => {
                let _ = handle.stop.send(true);
                true
            }
            None => false,
        }
    }

    /// Signal every worker to stop.
    pub fn stop_all_workers(&self) -> usize {
        let ids: Vec<String> = self.workers.iter().map(|entry| entry.key().clone()).collect();
        ids.iter().filter(|id| self.stop_worker(id)).count()
    }

    pub fn worker_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.workers.iter().map(|entry| entry.key().clone()).collect();
        ids.sort();
        ids
    }

    /// Status for the given courts.
    pub async fn status(&self, kort_ids: &[String], now: Instant) -> UnoStatus {
        let reading = self.activity(now).await;
        let mut courts = BTreeMap::new();
        for kort_id in kort_ids {
            courts.insert(
                kort_id.clone(),
                CourtUsage {
                    usage: self.usage(kort_id, now).await,
                    rate_limit: self.rate_headers.get(kort_id).await,
                    queued: self.queue.len(kort_id).await,
                    worker_running: self.has_worker(kort_id),
                },
            );
        }
        UnoStatus {
            enabled: self.is_enabled(),
            disabled_reason: self.disabled_reason().await,
            activity_stage: reading.stage,
            activity_multiplier: reading.multiplier,
            courts,
        }
    }
}

#[cfg(test)]
mod tests {
    use futures::future::BoxFuture;
    use serde_json::{Map, Value};

    use super::*;
    use crate::uno::{client::OverlayApi, ledger::UsageMode};

    struct Silent;

    impl OverlayApi for Silent {
        fn execute(
            &self,
            _overlay_id: &str,
            _command: &str,
            _payload: Option<&Map<String, Value>>,
        ) -> BoxFuture<'static, RemoteResponse> {
            Box::pin(async { RemoteResponse::transport_failure() })
        }
    }

    fn runtime(config: UnoConfig) -> UnoRuntime {
        UnoRuntime::new(config, Arc::new(Silent), Instant::now())
    }

    #[test]
    fn config_file_uses_seconds() {
        let config: UnoConfig = serde_json::from_str(
            r#"{"rpm": 30, "slowdown_sleep": 7, "intervals": {"names": 45}}"#,
        )
        .unwrap();
        assert_eq!(config.rpm, 30);
        assert_eq!(config.burst, 8);
        assert_eq!(config.slowdown_sleep, Duration::from_secs(7));
        assert_eq!(config.intervals.names, Duration::from_secs(45));
        assert_eq!(config.intervals.points, Duration::from_secs(10));
        assert_eq!(config.activity().thresholds[2], Duration::from_secs(90 * 60));
    }

    #[tokio::test]
    async fn kill_switch_keeps_reason_only_while_disabled() {
        let uno = runtime(UnoConfig::default());
        assert!(uno.is_enabled());
        assert!(uno.set_enabled(false, Some("kort 1 reached UNO hourly limit".into())).await);
        assert!(!uno.set_enabled(false, None).await);
        assert!(uno.set_enabled(true, Some("ignored".into())).await);
        assert_eq!(uno.disabled_reason().await, None);
    }

    #[tokio::test]
    async fn records_usage_and_headers() {
        let uno = runtime(UnoConfig {
            hourly_limit: 2,
            ..Default::default()
        });
        let now = Instant::now();
        let response = RemoteResponse {
            status: 429,
            body: None,
            rate_limit: Some(CapturedRateLimit {
                header: "ratelimit".into(),
                value: rate_headers::RateLimitValue::Raw("0".into()),
            }),
        };
        uno.record_request("1", "GetPointsPlayerA", &response, now).await;
        let outcome = uno.record_request("1", "GetPointsPlayerB", &response, now).await;
        assert!(outcome.limit_reached);
        assert_eq!(uno.usage("1", now).await.mode, UsageMode::Limit);

        let status = uno.status(&["1".to_string()], now).await;
        assert_eq!(status.courts["1"].usage.count, 2);
        assert!(status.courts["1"].rate_limit.is_some());

        uno.forget_court("1").await;
        assert_eq!(uno.usage("1", now).await.count, 0);
    }

    #[tokio::test]
    async fn patch_reconfigures_existing_buckets() {
        let uno = runtime(UnoConfig {
            burst: 1,
            ..Default::default()
        });
        let now = Instant::now();
        let bucket = uno.bucket("1", now).await;
        assert!(bucket.take(now).await);
        assert!(!bucket.take(now).await);

        let patch = UnoConfigPatch {
            rpm: Some(600),
            burst: Some(5),
            ..Default::default()
        };
        let updated = uno.update_config(&patch, now).await;
        assert_eq!(updated.rpm, 600);
        assert!(bucket.take(now + Duration::from_secs(1)).await);
    }
}
