use axum::{
    Json, Router,
    extract::State,
    routing::{get, post},
};
use validator::Validate;

use crate::{
    dto::{
        events::{EventRequest, EventResponse},
        public::SnapshotResponse,
    },
    error::AppError,
    services::{court_service, public_service},
    state::SharedState,
};

/// Public endpoints: court snapshots and umpire events.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/api/snapshot", get(snapshot))
        .route("/api/events", post(post_event))
}

#[utoipa::path(
    get,
    path = "/api/snapshot",
    tag = "public",
    responses((status = 200, description = "Snapshot of every court", body = SnapshotResponse))
)]
/// Return the public snapshot of every court.
pub async fn snapshot(State(state): State<SharedState>) -> Json<SnapshotResponse> {
    Json(public_service::snapshot(&state).await)
}

#[utoipa::path(
    post,
    path = "/api/events",
    tag = "public",
    request_body = EventRequest,
    responses(
        (status = 200, description = "Event applied", body = EventResponse),
        (status = 401, description = "Court PIN mismatch"),
        (status = 404, description = "Unknown court")
    )
)]
/// Apply an umpire event to a court.
pub async fn post_event(
    State(state): State<SharedState>,
    Json(payload): Json<EventRequest>,
) -> Result<Json<EventResponse>, AppError> {
    payload.validate()?;
    let response = court_service::handle_event(&state, payload).await?;
    Ok(Json(response))
}
