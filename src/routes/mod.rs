use axum::Router;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::{services::documentation::ApiDoc, state::SharedState};

pub mod admin;
pub mod health;
pub mod public;
pub mod sse;

/// Full HTTP surface: health, public, stream and admin routes plus the Swagger UI at `/docs`.
pub fn router(state: SharedState) -> Router<()> {
    let swagger: Router<SharedState> = SwaggerUi::new("/docs")
        .url("/api-doc/openapi.json", ApiDoc::openapi())
        .into();

    health::router()
        .merge(public::router())
        .merge(sse::router())
        .merge(admin::router())
        .merge(swagger)
        .with_state(state)
}
