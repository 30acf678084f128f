use tracing::warn;

use crate::{dto::health::HealthResponse, state::SharedState};

/// Ping the court store and summarize the core's state.
pub async fn health_status(state: &SharedState) -> HealthResponse {
    match state.court_store().await {
        Some(store) => {
            if let Err(err) = store.health_check().await {
                warn!(error = %err, "court store health check failed");
            }
        }
        None => warn!("no court store installed (degraded mode)"),
    }

    HealthResponse {
        status: if state.is_degraded() { "degraded" } else { "ok" },
        uno_requests_enabled: state.uno().is_enabled(),
        courts: state.courts().len(),
        workers: state.uno().worker_ids().len(),
    }
}
