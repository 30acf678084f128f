use utoipa::OpenApi;

#[derive(OpenApi)]
/// Aggregated OpenAPI specification for Courtside Back.
#[openapi(
    paths(
        crate::routes::health::healthcheck,
        crate::routes::public::snapshot,
        crate::routes::public::post_event,
        crate::routes::sse::stream,
        crate::routes::admin::list_courts,
        crate::routes::admin::add_court,
        crate::routes::admin::remove_court,
        crate::routes::admin::enqueue_command,
        crate::routes::admin::clear_queue,
        crate::routes::admin::apply_command,
        crate::routes::admin::get_uno_requests,
        crate::routes::admin::set_uno_requests,
        crate::routes::admin::get_uno_config,
        crate::routes::admin::patch_uno_config,
        crate::routes::admin::uno_status,
        crate::routes::admin::list_history,
        crate::routes::admin::delete_latest_history,
    ),
    components(
        schemas(
            crate::dto::health::HealthResponse,
            crate::dto::public::SnapshotResponse,
            crate::dto::events::EventRequest,
            crate::dto::events::EventResponse,
            crate::dto::admin::UnoConfigPatch,
            crate::dto::admin::UnoConfigResponse,
            crate::dto::admin::CourtsResponse,
            crate::dto::admin::CommandResponse,
            crate::dao::models::HistoryEntity,
            crate::state::court::CourtState,
            crate::uno::UnoStatus,
        )
    ),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "public", description = "Court snapshots and umpire events"),
        (name = "sse", description = "Server-sent events stream"),
        (name = "admin", description = "Courts, overlay requests and match history"),
    )
)]
pub struct ApiDoc;
