//! Shared fixtures for unit tests.

use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::{Map, Value};

use crate::{
    clock::ManualClock,
    services::player_directory::StaticPlayerDirectory,
    state::{CoreOptions, store::DiscardSink},
    uno::{
        UnoConfig,
        client::{OverlayApi, RemoteResponse},
    },
};

/// Overlay that is never reachable.
pub struct OfflineOverlay;

impl OverlayApi for OfflineOverlay {
    fn execute(
        &self,
        _overlay_id: &str,
        _command: &str,
        _payload: Option<&Map<String, Value>>,
    ) -> BoxFuture<'static, RemoteResponse> {
        Box::pin(async { RemoteResponse::transport_failure() })
    }
}

/// Core wiring on a manual clock with outbound requests disabled, so no worker is spawned.
pub fn core_options() -> CoreOptions {
    CoreOptions {
        clock: ManualClock::new(),
        uno: UnoConfig {
            requests_enabled: false,
            ..Default::default()
        },
        api: Arc::new(OfflineOverlay),
        sink: Arc::new(DiscardSink),
        directory: Arc::new(StaticPlayerDirectory::default()),
    }
}
