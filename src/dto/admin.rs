//! DTO definitions used by the admin REST API and documentation layer.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use utoipa::ToSchema;
use validator::Validate;

use crate::{
    dao::models::HistoryEntity,
    dto::validation::{validate_kort_id, validate_multipliers},
    uno::UnoConfig,
};

/// Partial update of the outbound tuning knobs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema, Validate)]
pub struct UnoConfigPatch {
    #[validate(range(min = 1, max = 6000))]
    pub rpm: Option<u32>,
    #[validate(range(min = 1, max = 1000))]
    pub burst: Option<u32>,
    #[validate(range(min = 1))]
    pub hourly_limit: Option<u32>,
    /// Fraction of the hourly limit at which slowdown starts.
    #[validate(range(min = 0.0, max = 1.0))]
    pub hourly_threshold: Option<f64>,
    #[validate(range(min = 1, max = 100))]
    pub slowdown_factor: Option<u32>,
    #[validate(range(max = 3600))]
    pub slowdown_sleep_seconds: Option<u64>,
    #[validate(custom(function = "validate_multipliers"))]
    pub activity_multipliers: Option<[f64; 4]>,
}

/// Current outbound tuning as exposed to operators.
#[derive(Debug, Serialize, ToSchema)]
pub struct UnoConfigResponse {
    pub base_url: String,
    pub rpm: u32,
    pub burst: u32,
    pub hourly_limit: u32,
    pub hourly_threshold: f64,
    pub slowdown_factor: u32,
    pub slowdown_sleep_seconds: u64,
    pub activity_thresholds_minutes: [u64; 3],
    pub activity_multipliers: [f64; 4],
    pub request_timeout_seconds: u64,
    pub max_attempts: u32,
}

impl From<UnoConfig> for UnoConfigResponse {
    fn from(config: UnoConfig) -> Self {
        Self {
            base_url: config.base_url,
            rpm: config.rpm,
            burst: config.burst,
            hourly_limit: config.hourly_limit,
            hourly_threshold: config.hourly_threshold,
            slowdown_factor: config.slowdown_factor,
            slowdown_sleep_seconds: config.slowdown_sleep.as_secs(),
            activity_thresholds_minutes: config.activity_thresholds_minutes,
            activity_multipliers: config.activity_multipliers,
            request_timeout_seconds: config.request_timeout.as_secs(),
            max_attempts: config.max_attempts,
        }
    }
}

/// Request to register a court (or replace its configuration).
#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct AddCourtRequest {
    #[validate(custom(function = "validate_kort_id"))]
    pub kort_id: String,
    /// Overlay driven for this court; omit for a local-only court.
    #[serde(default)]
    pub overlay_id: Option<String>,
    #[serde(default)]
    pub pin: Option<String>,
}

/// Minimal projection of a court for administrators.
#[derive(Debug, Serialize, ToSchema)]
pub struct CourtSummary {
    pub kort_id: String,
    pub overlay_id: Option<String>,
    pub has_pin: bool,
    pub worker_running: bool,
    pub queued: usize,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CourtsResponse {
    pub courts: Vec<CourtSummary>,
}

/// Command queued for delivery to a court's overlay.
#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct EnqueueCommandRequest {
    #[validate(length(min = 1, max = 64))]
    pub command: String,
    #[serde(default)]
    #[schema(value_type = Object)]
    pub value: Option<Value>,
    /// Extra body fields sent alongside `value` (e.g. `fieldId`).
    #[serde(default)]
    #[schema(value_type = Object)]
    pub extras: Map<String, Value>,
    /// Replaces a pending command carrying the same id.
    #[serde(default)]
    #[validate(length(min = 1, max = 128))]
    pub command_id: Option<String>,
}

impl EnqueueCommandRequest {
    /// Body fields handed to the overlay with the command.
    pub fn payload(&self) -> Option<Map<String, Value>> {
        if self.value.is_none() && self.extras.is_empty() {
            return None;
        }
        let mut payload = self.extras.clone();
        if let Some(value) = &self.value {
            payload.insert("value".into(), value.clone());
        }
        Some(payload)
    }
}

/// Command applied directly to a court's local state.
#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct ApplyCommandRequest {
    #[validate(length(min = 1, max = 64))]
    pub command: String,
    #[serde(default)]
    #[schema(value_type = Object)]
    pub value: Value,
    #[serde(default)]
    #[schema(value_type = Object)]
    pub extras: Map<String, Value>,
}

/// Result of a local command.
#[derive(Debug, Serialize, ToSchema)]
pub struct CommandResponse {
    pub ok: bool,
    pub changed: bool,
    /// Present when the command completed a match.
    pub finished: Option<HistoryEntity>,
}

/// Request to flip the outbound kill switch.
#[derive(Debug, Deserialize, ToSchema)]
pub struct UnoRequestsToggle {
    pub enabled: bool,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct UnoRequestsResponse {
    pub enabled: bool,
    pub reason: Option<String>,
}

/// Generic action acknowledgement used by admin endpoints.
#[derive(Debug, Serialize, ToSchema)]
pub struct ActionResponse {
    pub ok: bool,
    pub message: String,
}

impl ActionResponse {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            ok: true,
            message: message.into(),
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ClearQueueResponse {
    pub ok: bool,
    pub dropped: usize,
}

/// Match history, newest first.
#[derive(Debug, Serialize, ToSchema)]
pub struct HistoryResponse {
    pub entries: Vec<HistoryEntity>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct DeletedHistoryResponse {
    pub ok: bool,
    pub deleted: Option<HistoryEntity>,
}
