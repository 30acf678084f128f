//! Courtside Back binary entrypoint wiring the court core, overlay workers, storage and HTTP layers.

use std::{net::SocketAddr, sync::Arc};

use anyhow::Context;
use axum::Router;
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use courtside_back::{
    clock::SystemClock,
    config::{AppConfig, CouchSettings},
    dao::{
        court_store::{CourtStore, memory::MemoryCourtStore},
        storage::StorageError,
    },
    routes,
    services::{
        persistence::{self, PersistenceWriter},
        player_directory::StaticPlayerDirectory,
        storage_supervisor,
    },
    state::{AppState, CoreOptions, SharedState},
    uno::client::OverlayClient,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = AppConfig::load();
    if config.uno.bearer.is_none() {
        warn!("UNO_AUTH_BEARER not set; overlay requests will be rejected upstream");
    }

    let api = OverlayClient::new(config.uno.client()).context("building overlay client")?;
    let (writer, queue) = PersistenceWriter::channel();
    let app_state = AppState::new(CoreOptions {
        clock: SystemClock::shared(),
        uno: config.uno.clone(),
        api: Arc::new(api),
        sink: Arc::new(writer),
        directory: Arc::new(StaticPlayerDirectory::new(config.players.clone())),
    });

    tokio::spawn(persistence::run(app_state.clone(), queue));

    for (kort_id, court) in &config.courts {
        app_state
            .add_court(kort_id, court.clone())
            .await
            .with_context(|| format!("registering court `{kort_id}`"))?;
    }

    spawn_storage_supervisor(app_state.clone(), config.couch.clone());

    // Build the HTTP router once the shared state is ready.
    let app = build_router(app_state.clone());

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    info!(%addr, courts = config.courts.len(), "starting server");

    let listener = TcpListener::bind(addr).await.context("binding server")?;
    let service = app.into_make_service();
    axum::serve(listener, service)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving axum")?;

    let stopped = app_state.uno().stop_all_workers();
    info!(stopped, "court workers stopped; shutting down");
    Ok(())
}

/// Connect the configured court store in the background, falling back to the in-memory one.
fn spawn_storage_supervisor(state: SharedState, couch: Option<CouchSettings>) {
    match couch {
        #[cfg(feature = "couch-store")]
        Some(settings) => {
            use courtside_back::dao::court_store::couchdb::{CouchConfig, CouchCourtStore};

            let couch_config = CouchConfig::from(settings);
            info!(url = %couch_config.database_url(), "using CouchDB court store");
            tokio::spawn(storage_supervisor::run(state, move || {
                let config = couch_config.clone();
                async move {
                    let store = CouchCourtStore::connect(config).await?;
                    Ok::<_, StorageError>(Arc::new(store) as Arc<dyn CourtStore>)
                }
            }));
        }
        #[cfg(not(feature = "couch-store"))]
        Some(_) => {
            warn!("CouchDB configured but the couch-store feature is disabled; using memory store");
            spawn_memory_store(state);
        }
        None => {
            info!("no persistence backend configured; using memory store");
            spawn_memory_store(state);
        }
    }
}

fn spawn_memory_store(state: SharedState) {
    let store: Arc<dyn CourtStore> = Arc::new(MemoryCourtStore::default());
    tokio::spawn(storage_supervisor::run(state, move || {
        let store = store.clone();
        async move { Ok::<_, StorageError>(store) }
    }));
}

/// Build the top-level router and attach cross-cutting middleware layers.
fn build_router(state: SharedState) -> Router<()> {
    routes::router(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Configure tracing subscribers so logs include spans by default.
fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,tower_http=debug".into());
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Wait for Ctrl+C or SIGTERM and shut the server down gracefully.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut term = signal(SignalKind::terminate()).expect("install SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {},
            _ = term.recv() => {},
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
