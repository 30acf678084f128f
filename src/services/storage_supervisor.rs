use std::{future::Future, sync::Arc, time::Duration};

use tokio::time::sleep;
use tracing::{info, warn};

use crate::{
    dao::{court_store::CourtStore, storage::StorageError},
    state::{SharedState, court::CourtState},
};

const INITIAL_DELAY: Duration = Duration::from_millis(1_000);
const MAX_DELAY: Duration = Duration::from_secs(10);
const HEALTH_POLL_INTERVAL: Duration = Duration::from_secs(5);
const MAX_RECONNECT_ATTEMPTS: u32 = 3;

/// Load persisted snapshots into the registered courts. Returns how many were restored.
pub async fn restore_snapshots(state: &SharedState, store: &dyn CourtStore) -> Result<usize, StorageError> {
    let snapshots = store.load_snapshots().await?;
    let mut restored = 0;
    for (kort_id, snapshot) in snapshots {
        let court = match serde_json::from_value::<CourtState>(snapshot) {
            Ok(court) => court,
            Err(err) => {
                warn!(kort_id, error = %err, "ignoring unreadable court snapshot");
                continue;
            }
        };
        if state.scores().restore(&kort_id, court).await {
            restored += 1;
        } else {
            info!(kort_id, "snapshot for unknown court skipped");
        }
    }
    Ok(restored)
}

/// Reconnect to the storage backend and keep the shared state in degraded mode when it is unavailable.
///
/// Snapshots are restored once, right after the first successful connection.
pub async fn run<F, Fut>(state: SharedState, mut connect: F)
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<Arc<dyn CourtStore>, StorageError>> + Send,
{
    let mut delay = INITIAL_DELAY;
    let mut restored = false;

    loop {
        match connect().await {
            Ok(store) => {
                if !restored {
                    match restore_snapshots(&state, store.as_ref()).await {
                        Ok(count) => {
                            info!(count, "court snapshots restored");
                            restored = true;
                        }
                        Err(err) => warn!(error = %err, "failed to load court snapshots"),
                    }
                }
                state.install_court_store(store.clone()).await;
                info!("storage connection established; leaving degraded mode");
                delay = INITIAL_DELAY;

                loop {
                    match store.health_check().await {
                        Ok(()) => {
                            if state.set_degraded(false) {
                                info!("storage healthy again; leaving degraded mode");
                            }
                            sleep(HEALTH_POLL_INTERVAL).await;
                        }
                        Err(err) if !err.is_transient() => {
                            warn!(error = %err, "storage health check returned unreadable data");
                            sleep(HEALTH_POLL_INTERVAL).await;
                        }
                        Err(err) => {
                            warn!(error = %err, "storage health check failed");
                            if reconnect(&state, store.as_ref()).await {
                                state.set_degraded(false);
                                sleep(HEALTH_POLL_INTERVAL).await;
                                continue;
                            }
                            warn!("exhausted storage reconnect attempts; staying in degraded mode");
                            state.clear_court_store().await;
                            break;
                        }
                    }
                }

                sleep(delay).await;
                delay = (delay * 2).min(MAX_DELAY);
            }
            Err(err) => {
                warn!(error = %err, "storage connection attempt failed");
                sleep(delay).await;
                delay = (delay * 2).min(MAX_DELAY);
            }
        }
    }
}

async fn reconnect(state: &SharedState, store: &dyn CourtStore) -> bool {
    let mut reconnect_delay = INITIAL_DELAY;
    for attempt in 0..MAX_RECONNECT_ATTEMPTS {
        match store.try_reconnect().await {
            Ok(()) => {
                info!(attempt, "storage reconnection succeeded after health check failure");
                return true;
            }
            Err(err) => {
                if attempt == 0 {
                    warn!(
                        attempt, error = %err,
                        "storage reconnect first attempt failed; entering degraded mode"
                    );
                    state.set_degraded(true);
                } else {
                    warn!(attempt, error = %err, "storage reconnect attempt failed");
                }
                sleep(reconnect_delay).await;
                reconnect_delay = (reconnect_delay * 2).min(MAX_DELAY);
            }
        }
    }
    false
}
