pub mod bus;
pub mod commands;
pub mod court;
pub mod match_flow;
pub mod store;

use std::{collections::BTreeMap, sync::Arc};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tokio::sync::{RwLock, watch};
use tracing::{info, warn};
use utoipa::ToSchema;

use crate::{
    clock::SharedClock,
    dao::court_store::CourtStore,
    dto::admin::UnoConfigPatch,
    error::ServiceError,
    services::player_directory::PlayerDirectory,
    uno::{UnoConfig, UnoRuntime, client::SharedOverlayApi, worker},
};

use self::{
    bus::BroadcastBus,
    commands::{CommandError, FlagUpdate, flag_field},
    store::{CommandOutcome, ScoreStore, StateSink},
};

pub type SharedState = Arc<AppState>;

/// Static settings of a court.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct CourtConfig {
    /// Overlay polled and driven for this court; courts without one are local only.
    pub overlay_id: Option<String>,
    /// PIN required from umpire clients; absent means open.
    #[serde(skip_serializing)]
    pub pin: Option<String>,
}

/// Collaborators wired into [`AppState::new`].
pub struct CoreOptions {
    pub clock: SharedClock,
    pub uno: UnoConfig,
    pub api: SharedOverlayApi,
    pub sink: Arc<dyn StateSink>,
    pub directory: Arc<dyn PlayerDirectory>,
}

/// Queue id of the flag push for a side, so repeated name changes coalesce.
fn flag_command_id(update: &FlagUpdate) -> String {
    format!("flag:player_{}_flag", update.side.letter().to_ascii_lowercase())
}

/// Central application state shared by workers and HTTP handlers.
pub struct AppState {
    clock: SharedClock,
    courts: DashMap<String, CourtConfig>,
    scores: ScoreStore,
    bus: Arc<BroadcastBus>,
    uno: UnoRuntime,
    court_store: RwLock<Option<Arc<dyn CourtStore>>>,
    degraded: watch::Sender<bool>,
}

impl AppState {
    /// Build the shared state. It starts in degraded mode until a storage backend is installed.
    pub fn new(options: CoreOptions) -> SharedState {
        let CoreOptions {
            clock,
            uno,
            api,
            sink,
            directory,
        } = options;
        let bus = Arc::new(BroadcastBus::default());
        let (degraded_tx, _rx) = watch::channel(true);
        let now = clock.now();
        Arc::new(Self {
            scores: ScoreStore::new(clock.clone(), bus.clone(), sink, directory),
            uno: UnoRuntime::new(uno, api, now),
            clock,
            courts: DashMap::new(),
            bus,
            court_store: RwLock::new(None),
            degraded: degraded_tx,
        })
    }

    pub fn clock(&self) -> &SharedClock {
        &self.clock
    }

    pub fn scores(&self) -> &ScoreStore {
        &self.scores
    }

    pub fn bus(&self) -> &BroadcastBus {
        &self.bus
    }

    pub fn uno(&self) -> &UnoRuntime {
        &self.uno
    }

    /// Configuration of one court.
    pub fn court(&self, kort_id: &str) -> Option<CourtConfig> {
        self.courts.get(kort_id).map(|entry| entry.value().clone())
    }

    /// Every registered court, ordered by id.
    pub fn courts(&self) -> BTreeMap<String, CourtConfig> {
        self.courts
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    /// Courts mapped to an overlay, as `(kort_id, overlay_id)`.
    pub fn overlay_courts(&self) -> Vec<(String, String)> {
        let mut courts: Vec<(String, String)> = self
            .courts
            .iter()
            .filter_map(|entry| {
                entry
                    .value()
                    .overlay_id
                    .clone()
                    .filter(|id| !id.trim().is_empty())
                    .map(|overlay| (entry.key().clone(), overlay))
            })
            .collect();
        courts.sort();
        courts
    }

    /// Register or replace a court, then start its worker when applicable.
    pub async fn add_court(self: &Arc<Self>, kort_id: &str, config: CourtConfig) -> Result<(), ServiceError> {
        let kort_id = kort_id.trim();
        if kort_id.is_empty() {
            return Err(ServiceError::InvalidInput("court id must not be empty".into()));
        }
        let previous = self.courts.insert(kort_id.to_string(), config.clone());
        if previous.is_some_and(|previous| previous.overlay_id != config.overlay_id) {
            self.uno.stop_worker(kort_id);
        }
        self.scores.ensure(kort_id).await;
        info!(kort_id, overlay_id = ?config.overlay_id, "court registered");
        self.bus.admin("court_added", json!({ "kort_id": kort_id, "overlay_id": config.overlay_id }));
        worker::sync_workers(self).await;
        Ok(())
    }

    /// Stop a court's worker and forget its state, queue and usage.
    pub async fn remove_court(&self, kort_id: &str) -> Result<(), ServiceError> {
        if self.courts.remove(kort_id).is_none() {
            return Err(ServiceError::NotFound(format!("court `{kort_id}`")));
        }
        self.uno.stop_worker(kort_id);
        self.uno.forget_court(kort_id).await;
        self.scores.remove(kort_id).await;
        info!(kort_id, "court removed");
        self.bus.admin("court_removed", json!({ "kort_id": kort_id }));
        Ok(())
    }

    /// Queue a command for delivery to a court's overlay.
    pub async fn enqueue_court(
        &self,
        kort_id: &str,
        command: &str,
        payload: Option<Map<String, Value>>,
        command_id: Option<String>,
    ) -> Result<(), ServiceError> {
        if !self.courts.contains_key(kort_id) {
            return Err(ServiceError::NotFound(format!("court `{kort_id}`")));
        }
        let now = self.clock.now();
        if self
            .uno
            .queue()
            .enqueue(kort_id, command, payload, command_id, now)
            .await
        {
            Ok(())
        } else {
            Err(ServiceError::InvalidInput("command must not be empty".into()))
        }
    }

    /// Drop everything pending for a court. Returns how many commands were dropped.
    pub async fn clear_queue(&self, kort_id: &str) -> usize {
        let dropped = self.uno.queue().clear(kort_id).await;
        if dropped > 0 {
            info!(kort_id, dropped, "command queue cleared");
        }
        dropped
    }

    /// Turn outbound requests on or off, starting or stopping court workers accordingly.
    pub async fn set_uno_requests_enabled(self: &Arc<Self>, enabled: bool, reason: Option<String>) {
        if !enabled {
            self.disable_uno_requests(reason).await;
            return;
        }
        if self.uno.set_enabled(true, None).await {
            info!("UNO requests enabled");
            self.bus.admin("uno_requests", json!({ "enabled": true, "reason": null }));
        }
        worker::sync_workers(self).await;
    }

    /// Turn outbound requests off and stop every worker.
    pub async fn disable_uno_requests(&self, reason: Option<String>) {
        if self.uno.set_enabled(false, reason.clone()).await {
            warn!(reason = ?reason, "UNO requests disabled");
            self.bus.admin("uno_requests", json!({ "enabled": false, "reason": reason }));
        }
        let stopped = self.uno.stop_all_workers();
        if stopped > 0 {
            info!(stopped, "court workers stopped");
        }
    }

    /// Patch outbound tuning at runtime.
    pub async fn update_uno_config(&self, patch: &UnoConfigPatch) -> UnoConfig {
        let updated = self.uno.update_config(patch, self.clock.now()).await;
        self.bus.admin("uno_config", json!({ "rpm": updated.rpm, "burst": updated.burst, "hourly_limit": updated.hourly_limit }));
        updated
    }

    /// Apply a command to a court's state.
    ///
    /// A change feeds the activity staircase; a flag discovered through a name change is
    /// queued for the court's overlay.
    pub async fn apply_command(
        &self,
        kort_id: &str,
        command: &str,
        value: &Value,
        extras: &Map<String, Value>,
    ) -> Result<CommandOutcome, CommandError> {
        let outcome = self.scores.apply_command(kort_id, command, value, extras).await?;
        self.after_mutation(kort_id, std::slice::from_ref(&outcome)).await;
        Ok(outcome)
    }

    /// Apply a group of commands that must land together, such as one umpire event.
    ///
    /// A rejected command leaves the court untouched.
    pub async fn apply_batch(
        &self,
        kort_id: &str,
        commands: &[(String, Value)],
    ) -> Result<Vec<CommandOutcome>, CommandError> {
        let outcomes = self.scores.apply_batch(kort_id, commands, &Map::new()).await?;
        self.after_mutation(kort_id, &outcomes).await;
        Ok(outcomes)
    }

    async fn after_mutation(&self, kort_id: &str, outcomes: &[CommandOutcome]) {
        if !outcomes.iter().any(|outcome| outcome.changed) {
            return;
        }
        self.uno.touch_activity(self.clock.now()).await;

        let has_overlay = self.court(kort_id).is_some_and(|court| court.overlay_id.is_some());
        if !has_overlay {
            return;
        }
        for update in outcomes.iter().filter_map(|outcome| outcome.flag_update.as_ref()) {
            let flag = update.flag.flag_url.clone().or_else(|| update.flag.flag_code.clone());
            let mut payload = Map::new();
            payload.insert("fieldId".into(), Value::String(flag_field(update.side).into()));
            payload.insert("value".into(), flag.map_or(Value::Null, Value::String));
            let queued = self
                .uno
                .queue()
                .enqueue(
                    kort_id,
                    "SetCustomizationField",
                    Some(payload),
                    Some(flag_command_id(update)),
                    self.clock.now(),
                )
                .await;
            if !queued {
                warn!(kort_id, "flag update could not be queued");
            }
        }
    }

    /// Obtain a handle to the current court store, if one is installed.
    pub async fn court_store(&self) -> Option<Arc<dyn CourtStore>> {
        let guard = self.court_store.read().await;
        guard.as_ref().cloned()
    }

    /// Install a court store and leave degraded mode.
    pub async fn install_court_store(&self, store: Arc<dyn CourtStore>) {
        {
            let mut guard = self.court_store.write().await;
            *guard = Some(store);
        }
        self.set_degraded(false);
    }

    /// Remove the current court store and enter degraded mode.
    pub async fn clear_court_store(&self) {
        {
            let mut guard = self.court_store.write().await;
            guard.take();
        }
        self.set_degraded(true);
    }

    /// Current degraded flag.
    pub fn is_degraded(&self) -> bool {
        *self.degraded.borrow()
    }

    /// Enter or leave degraded mode. Returns whether the flag changed.
    pub fn set_degraded(&self, value: bool) -> bool {
        let changed = self.degraded.send_if_modified(|current| {
            let changed = *current != value;
            *current = value;
            changed
        });
        if changed {
            self.bus.admin("storage", json!({ "degraded": value }));
        }
        changed
    }
}
