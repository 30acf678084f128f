use axum::{
    Json, Router,
    extract::{Path, State},
    routing::{delete, get, post},
};
use validator::Validate;

use crate::{
    dto::admin::{
        ActionResponse, AddCourtRequest, ApplyCommandRequest, ClearQueueResponse, CommandResponse,
        CourtsResponse, DeletedHistoryResponse, EnqueueCommandRequest, HistoryResponse,
        UnoConfigPatch, UnoConfigResponse, UnoRequestsResponse, UnoRequestsToggle,
    },
    error::AppError,
    services::admin_service,
    state::SharedState,
    uno::UnoStatus,
};

/// Operator endpoints for courts, overlay requests and match history.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/api/admin/courts", get(list_courts).post(add_court))
        .route("/api/admin/courts/{kort_id}", delete(remove_court))
        .route(
            "/api/admin/courts/{kort_id}/queue",
            post(enqueue_command).delete(clear_queue),
        )
        .route("/api/admin/courts/{kort_id}/command", post(apply_command))
        .route(
            "/api/admin/uno/requests",
            get(get_uno_requests).post(set_uno_requests),
        )
        .route(
            "/api/admin/uno/config",
            get(get_uno_config).patch(patch_uno_config),
        )
        .route("/api/admin/uno/status", get(uno_status))
        .route("/api/admin/history", get(list_history))
        .route("/api/admin/history/latest", delete(delete_latest_history))
}

#[utoipa::path(
    get,
    path = "/api/admin/courts",
    tag = "admin",
    responses((status = 200, description = "Registered courts", body = CourtsResponse))
)]
pub async fn list_courts(State(state): State<SharedState>) -> Json<CourtsResponse> {
    Json(admin_service::list_courts(&state).await)
}

#[utoipa::path(
    post,
    path = "/api/admin/courts",
    tag = "admin",
    request_body = AddCourtRequest,
    responses((status = 200, description = "Court registered", body = CourtsResponse))
)]
/// Register a court, or replace its overlay and PIN.
pub async fn add_court(
    State(state): State<SharedState>,
    Json(payload): Json<AddCourtRequest>,
) -> Result<Json<CourtsResponse>, AppError> {
    payload.validate()?;
    Ok(Json(admin_service::add_court(&state, payload).await?))
}

#[utoipa::path(
    delete,
    path = "/api/admin/courts/{kort_id}",
    tag = "admin",
    params(("kort_id" = String, Path, description = "Court identifier")),
    responses(
        (status = 200, description = "Court removed", body = CourtsResponse),
        (status = 404, description = "Unknown court")
    )
)]
pub async fn remove_court(
    State(state): State<SharedState>,
    Path(kort_id): Path<String>,
) -> Result<Json<CourtsResponse>, AppError> {
    Ok(Json(admin_service::remove_court(&state, &kort_id).await?))
}

#[utoipa::path(
    post,
    path = "/api/admin/courts/{kort_id}/queue",
    tag = "admin",
    params(("kort_id" = String, Path, description = "Court identifier")),
    request_body = EnqueueCommandRequest,
    responses((status = 200, description = "Command queued", body = ActionResponse))
)]
/// Queue a command for delivery to the court's overlay.
pub async fn enqueue_command(
    State(state): State<SharedState>,
    Path(kort_id): Path<String>,
    Json(payload): Json<EnqueueCommandRequest>,
) -> Result<Json<ActionResponse>, AppError> {
    payload.validate()?;
    let queued = admin_service::enqueue_command(&state, &kort_id, payload).await?;
    Ok(Json(ActionResponse::ok(format!("{queued} command(s) pending"))))
}

#[utoipa::path(
    delete,
    path = "/api/admin/courts/{kort_id}/queue",
    tag = "admin",
    params(("kort_id" = String, Path, description = "Court identifier")),
    responses((status = 200, description = "Queue cleared", body = ClearQueueResponse))
)]
pub async fn clear_queue(
    State(state): State<SharedState>,
    Path(kort_id): Path<String>,
) -> Result<Json<ClearQueueResponse>, AppError> {
    Ok(Json(admin_service::clear_queue(&state, &kort_id).await?))
}

#[utoipa::path(
    post,
    path = "/api/admin/courts/{kort_id}/command",
    tag = "admin",
    params(("kort_id" = String, Path, description = "Court identifier")),
    request_body = ApplyCommandRequest,
    responses((status = 200, description = "Command applied locally", body = CommandResponse))
)]
/// Apply a command to the court's local state without contacting the overlay.
pub async fn apply_command(
    State(state): State<SharedState>,
    Path(kort_id): Path<String>,
    Json(payload): Json<ApplyCommandRequest>,
) -> Result<Json<CommandResponse>, AppError> {
    payload.validate()?;
    Ok(Json(admin_service::apply_command(&state, &kort_id, payload).await?))
}

#[utoipa::path(
    get,
    path = "/api/admin/uno/requests",
    tag = "admin",
    responses((status = 200, description = "Overlay requests flag", body = UnoRequestsResponse))
)]
pub async fn get_uno_requests(State(state): State<SharedState>) -> Json<UnoRequestsResponse> {
    Json(admin_service::uno_requests(&state).await)
}

#[utoipa::path(
    post,
    path = "/api/admin/uno/requests",
    tag = "admin",
    request_body = UnoRequestsToggle,
    responses((status = 200, description = "Overlay requests flag updated", body = UnoRequestsResponse))
)]
/// Enable or disable every outbound overlay request.
pub async fn set_uno_requests(
    State(state): State<SharedState>,
    Json(payload): Json<UnoRequestsToggle>,
) -> Json<UnoRequestsResponse> {
    Json(admin_service::set_uno_requests(&state, payload).await)
}

#[utoipa::path(
    get,
    path = "/api/admin/uno/config",
    tag = "admin",
    responses((status = 200, description = "Outbound tuning", body = UnoConfigResponse))
)]
pub async fn get_uno_config(State(state): State<SharedState>) -> Json<UnoConfigResponse> {
    Json(admin_service::uno_config(&state).await)
}

#[utoipa::path(
    patch,
    path = "/api/admin/uno/config",
    tag = "admin",
    request_body = UnoConfigPatch,
    responses((status = 200, description = "Outbound tuning updated", body = UnoConfigResponse))
)]
pub async fn patch_uno_config(
    State(state): State<SharedState>,
    Json(payload): Json<UnoConfigPatch>,
) -> Result<Json<UnoConfigResponse>, AppError> {
    payload.validate()?;
    Ok(Json(admin_service::update_uno_config(&state, payload).await))
}

#[utoipa::path(
    get,
    path = "/api/admin/uno/status",
    tag = "admin",
    responses((status = 200, description = "Hourly usage and captured rate-limit headers", body = UnoStatus))
)]
pub async fn uno_status(State(state): State<SharedState>) -> Json<UnoStatus> {
    Json(admin_service::uno_status(&state).await)
}

#[utoipa::path(
    get,
    path = "/api/admin/history",
    tag = "admin",
    responses(
        (status = 200, description = "Finished matches, newest first", body = HistoryResponse),
        (status = 503, description = "No storage backend")
    )
)]
pub async fn list_history(State(state): State<SharedState>) -> Result<Json<HistoryResponse>, AppError> {
    Ok(Json(admin_service::list_history(&state).await?))
}

#[utoipa::path(
    delete,
    path = "/api/admin/history/latest",
    tag = "admin",
    responses(
        (status = 200, description = "Latest entry removed", body = DeletedHistoryResponse),
        (status = 503, description = "No storage backend")
    )
)]
pub async fn delete_latest_history(
    State(state): State<SharedState>,
) -> Result<Json<DeletedHistoryResponse>, AppError> {
    Ok(Json(admin_service::delete_latest_history(&state).await?))
}
