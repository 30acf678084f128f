/// Admin service for courts, outbound queue, tuning and history.
pub mod admin_service;
/// Umpire event handling.
pub mod court_service;
/// OpenAPI documentation generation.
pub mod documentation;
/// Health check service.
pub mod health_service;
/// Background persistence writer.
pub mod persistence;
/// Surname to flag lookups.
pub mod player_directory;
/// Public service for read-only court information.
pub mod public_service;
/// Server-Sent Events message generation.
pub mod sse_events;
/// Server-Sent Events streaming service.
pub mod sse_service;
/// Storage connection supervisor and warm restart.
pub mod storage_supervisor;
