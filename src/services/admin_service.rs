//! Business logic powering the admin REST routes: court registry, outbound queue and
//! kill switch, runtime tuning and match history.

use std::sync::Arc;

use serde_json::Value;
use tracing::info;

use crate::{
    dao::court_store::CourtStore,
    dto::admin::{
        AddCourtRequest, ApplyCommandRequest, ClearQueueResponse, CommandResponse, CourtSummary,
        CourtsResponse, DeletedHistoryResponse, EnqueueCommandRequest, HistoryResponse,
        UnoConfigPatch, UnoConfigResponse, UnoRequestsResponse, UnoRequestsToggle,
    },
    error::ServiceError,
    state::{CourtConfig, SharedState},
    uno::UnoStatus,
};

async fn require_court_store(state: &SharedState) -> Result<Arc<dyn CourtStore>, ServiceError> {
    state.court_store().await.ok_or(ServiceError::Degraded)
}

fn require_court(state: &SharedState, kort_id: &str) -> Result<CourtConfig, ServiceError> {
    state
        .court(kort_id)
        .ok_or_else(|| ServiceError::NotFound(format!("court `{kort_id}`")))
}

pub async fn list_courts(state: &SharedState) -> CourtsResponse {
    let mut courts = Vec::new();
    for (kort_id, config) in state.courts() {
        courts.push(CourtSummary {
            queued: state.uno().queue().len(&kort_id).await,
            worker_running: state.uno().has_worker(&kort_id),
            has_pin: config.pin.is_some(),
            overlay_id: config.overlay_id,
            kort_id,
        });
    }
    CourtsResponse { courts }
}

pub async fn add_court(state: &SharedState, request: AddCourtRequest) -> Result<CourtsResponse, ServiceError> {
    let overlay_id = request
        .overlay_id
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty());
    state
        .add_court(
            &request.kort_id,
            CourtConfig {
                overlay_id,
                pin: request.pin.filter(|pin| !pin.is_empty()),
            },
        )
        .await?;
    Ok(list_courts(state).await)
}

pub async fn remove_court(state: &SharedState, kort_id: &str) -> Result<CourtsResponse, ServiceError> {
    state.remove_court(kort_id).await?;
    Ok(list_courts(state).await)
}

/// Queue a command for the court's overlay.
pub async fn enqueue_command(
    state: &SharedState,
    kort_id: &str,
    request: EnqueueCommandRequest,
) -> Result<usize, ServiceError> {
    let court = require_court(state, kort_id)?;
    if court.overlay_id.is_none() {
        return Err(ServiceError::InvalidInput(format!(
            "court `{kort_id}` has no overlay"
        )));
    }
    let payload = request.payload();
    state
        .enqueue_court(kort_id, &request.command, payload, request.command_id)
        .await?;
    Ok(state.uno().queue().len(kort_id).await)
}

pub async fn clear_queue(state: &SharedState, kort_id: &str) -> Result<ClearQueueResponse, ServiceError> {
    require_court(state, kort_id)?;
    let dropped = state.clear_queue(kort_id).await;
    Ok(ClearQueueResponse { ok: true, dropped })
}

/// Apply a command to the court's local state only.
pub async fn apply_command(
    state: &SharedState,
    kort_id: &str,
    request: ApplyCommandRequest,
) -> Result<CommandResponse, ServiceError> {
    let outcome = state
        .apply_command(kort_id, &request.command, &request.value, &request.extras)
        .await?;
    Ok(CommandResponse {
        ok: true,
        changed: outcome.changed,
        finished: outcome.finished,
    })
}

pub async fn uno_requests(state: &SharedState) -> UnoRequestsResponse {
    UnoRequestsResponse {
        enabled: state.uno().is_enabled(),
        reason: state.uno().disabled_reason().await,
    }
}

pub async fn set_uno_requests(state: &SharedState, request: UnoRequestsToggle) -> UnoRequestsResponse {
    let reason = request
        .reason
        .filter(|reason| !reason.trim().is_empty())
        .or_else(|| (!request.enabled).then(|| "disabled by operator".to_string()));
    state.set_uno_requests_enabled(request.enabled, reason).await;
    uno_requests(state).await
}

pub async fn uno_config(state: &SharedState) -> UnoConfigResponse {
    state.uno().config().await.into()
}

pub async fn update_uno_config(state: &SharedState, patch: UnoConfigPatch) -> UnoConfigResponse {
    state.update_uno_config(&patch).await.into()
}

pub async fn uno_status(state: &SharedState) -> UnoStatus {
    let kort_ids: Vec<String> = state.courts().into_keys().collect();
    state.uno().status(&kort_ids, state.clock().now()).await
}

pub async fn list_history(state: &SharedState) -> Result<HistoryResponse, ServiceError> {
    let store = require_court_store(state).await?;
    let entries = store.list_history().await?;
    Ok(HistoryResponse { entries })
}

pub async fn delete_latest_history(state: &SharedState) -> Result<DeletedHistoryResponse, ServiceError> {
    let store = require_court_store(state).await?;
    let deleted = store.delete_latest_history().await?;
    if let Some(entry) = &deleted {
        info!(kort_id = %entry.kort_id, entry_id = %entry.id, "latest history entry deleted");
        state.bus().admin(
            "history_deleted",
            serde_json::to_value(entry).unwrap_or(Value::Null),
        );
    }
    Ok(DeletedHistoryResponse { ok: true, deleted })
}
