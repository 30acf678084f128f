use serde::Serialize;
use utoipa::ToSchema;

/// Body of `GET /healthcheck`.
#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    /// "ok", or "degraded" while no court store is installed.
    pub status: &'static str,
    pub uno_requests_enabled: bool,
    /// Registered courts.
    pub courts: usize,
    /// Courts with a running polling worker.
    pub workers: usize,
}
