use std::convert::Infallible;

use axum::{Router, extract::State, response::sse::Sse, routing::get};
use futures::Stream;
use tracing::info;

use crate::{services::sse_service, state::SharedState};

#[utoipa::path(
    get,
    path = "/api/stream",
    tag = "sse",
    responses((status = 200, description = "Court updates stream", content_type = "text/event-stream", body = String))
)]
/// Stream one snapshot per court, then every court update and admin event.
pub async fn stream(
    State(state): State<SharedState>,
) -> Sse<impl Stream<Item = Result<axum::response::sse::Event, Infallible>>> {
    let (subscription, initial) = sse_service::subscribe(&state).await;
    info!(subscriber = subscription.id, courts = initial.len(), "new SSE connection");
    sse_service::to_sse_stream(state, subscription, initial)
}

/// Configure the SSE endpoint.
pub fn router() -> Router<SharedState> {
    Router::<SharedState>::new().route("/api/stream", get(stream))
}
