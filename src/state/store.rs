//! Court state store: the single writer of [`CourtState`].

use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
};

use serde_json::{Map, Value};
use time::{OffsetDateTime, format_description::well_known::Rfc3339};
use tokio::sync::Mutex;
use tracing::{error, warn};

use super::{
    bus::{BroadcastBus, BusEvent},
    commands::{Command, CommandContext, CommandError, FlagUpdate},
    court::CourtState,
    match_flow,
};
use crate::{
    clock::{SharedClock, iso_timestamp},
    dao::models::HistoryEntity,
    services::player_directory::PlayerDirectory,
};

/// Receiver of snapshots and finished matches produced by mutations.
///
/// Called while the court lock is held, so implementations must not block.
pub trait StateSink: Send + Sync {
    fn persist_snapshot(&self, kort_id: &str, snapshot: &Value);
    fn append_history(&self, entry: HistoryEntity);
}

/// Sink that discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct DiscardSink;

impl StateSink for DiscardSink {
    fn persist_snapshot(&self, _kort_id: &str, _snapshot: &Value) {}
    fn append_history(&self, _entry: HistoryEntity) {}
}

/// Result of [`ScoreStore::apply_command`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommandOutcome {
    pub changed: bool,
    pub flag_update: Option<FlagUpdate>,
    /// Set when the command completed a match.
    pub finished: Option<HistoryEntity>,
}

/// `updated` never moves backwards, even if the wall clock does.
fn monotonic_stamp(previous: Option<&str>, candidate: String) -> String {
    let parse = |raw: &str| OffsetDateTime::parse(raw, &Rfc3339).ok();
    match (previous, previous.and_then(parse), parse(&candidate)) {
        (Some(previous), Some(before), Some(after)) if before > after => previous.to_string(),
        _ => candidate,
    }
}

pub struct ScoreStore {
    courts: Mutex<HashMap<String, CourtState>>,
    clock: SharedClock,
    bus: Arc<BroadcastBus>,
    sink: Arc<dyn StateSink>,
    directory: Arc<dyn PlayerDirectory>,
}

impl ScoreStore {
    pub fn new(
        clock: SharedClock,
        bus: Arc<BroadcastBus>,
        sink: Arc<dyn StateSink>,
        directory: Arc<dyn PlayerDirectory>,
    ) -> Self {
        Self {
            courts: Mutex::new(HashMap::new()),
            clock,
            bus,
            sink,
            directory,
        }
    }

    /// Create an empty state for `kort_id` unless one exists.
    pub async fn ensure(&self, kort_id: &str) {
        let mut courts = self.courts.lock().await;
        courts.entry(kort_id.to_string()).or_default();
    }

    /// Forget a court. Returns whether it existed.
    pub async fn remove(&self, kort_id: &str) -> bool {
        self.courts.lock().await.remove(kort_id).is_some()
    }

    pub async fn contains(&self, kort_id: &str) -> bool {
        self.courts.lock().await.contains_key(kort_id)
    }

    /// Known court ids in ascending order.
    pub async fn kort_ids(&self) -> Vec<String> {
        let courts = self.courts.lock().await;
        let mut ids: Vec<String> = courts.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Replace a known court's state with a persisted snapshot. The timer comes back paused.
    pub async fn restore(&self, kort_id: &str, state: CourtState) -> bool {
        let mut courts = self.courts.lock().await;
        match courts.get_mut(kort_id) {
            Some(slot) => {
                *slot = state.restored();
                true
            }
            None => false,
        }
    }

    /// Copy of a court's state with the clock refreshed.
    pub async fn state(&self, kort_id: &str) -> Option<CourtState> {
        let now = self.clock.now();
        let courts = self.courts.lock().await;
        courts.get(kort_id).map(|state| {
            let mut copy = state.clone();
            copy.match_time.refresh(now);
            copy
        })
    }

    /// Public JSON view of one court.
    pub async fn snapshot_public(&self, kort_id: &str) -> Option<Value> {
        let state = self.state(kort_id).await?;
        to_public(kort_id, &state)
    }

    /// Public JSON view of every court, taken under one lock.
    pub async fn snapshot_all_public(&self) -> BTreeMap<String, Value> {
        let now = self.clock.now();
        let courts = self.courts.lock().await;
        courts
            .iter()
            .filter_map(|(kort_id, state)| {
                let mut copy = state.clone();
                copy.match_time.refresh(now);
                to_public(kort_id, &copy).map(|value| (kort_id.clone(), value))
            })
            .collect()
    }

    /// Apply one command to a court.
    ///
    /// Rejections leave the state untouched. A change runs the match-flow rules, stamps
    /// `updated`, hands the snapshot to the sink and publishes it before the lock is released.
    pub async fn apply_command(
        &self,
        kort_id: &str,
        command: &str,
        value: &Value,
        extras: &Map<String, Value>,
    ) -> Result<CommandOutcome, CommandError> {
        let mut courts = self.courts.lock().await;
        let state = courts
            .get_mut(kort_id)
            .ok_or_else(|| CommandError::UnknownCourt(kort_id.to_string()))?;

        let mut working = state.clone();
        let outcome = self.step(&mut working, kort_id, command, value, extras)?;
        if outcome.changed {
            *state = working;
            self.publish(kort_id, state, outcome.finished.as_slice());
        }
        Ok(outcome)
    }

    /// Apply several commands as one unit.
    ///
    /// Either every command is accepted and the final state is published once, or the first
    /// rejection is returned and the court is left as it was.
    pub async fn apply_batch(
        &self,
        kort_id: &str,
        commands: &[(String, Value)],
        extras: &Map<String, Value>,
    ) -> Result<Vec<CommandOutcome>, CommandError> {
        let mut courts = self.courts.lock().await;
        let state = courts
            .get_mut(kort_id)
            .ok_or_else(|| CommandError::UnknownCourt(kort_id.to_string()))?;

        let mut working = state.clone();
        let mut outcomes = Vec::with_capacity(commands.len());
        for (command, value) in commands {
            outcomes.push(self.step(&mut working, kort_id, command, value, extras)?);
        }

        if outcomes.iter().any(|outcome| outcome.changed) {
            *state = working;
            let finished: Vec<HistoryEntity> = outcomes
                .iter()
                .filter_map(|outcome| outcome.finished.clone())
                .collect();
            self.publish(kort_id, state, &finished);
        }
        Ok(outcomes)
    }

    /// Mutate `state` with one command and run the match-flow rules. Publishes nothing.
    fn step(
        &self,
        state: &mut CourtState,
        kort_id: &str,
        command: &str,
        value: &Value,
        extras: &Map<String, Value>,
    ) -> Result<CommandOutcome, CommandError> {
        let Some(parsed) = Command::parse(command) else {
            warn!(kort_id, command, "unknown command rejected");
            return Err(CommandError::UnknownCommand(command.to_string()));
        };

        let now = self.clock.now();
        let wall = iso_timestamp(self.clock.wall());
        let before = state.clone();
        let ctx = CommandContext {
            now,
            wall: &wall,
            extras,
            directory: self.directory.as_ref(),
        };

        let flag_update = parsed.apply(state, value, &ctx).inspect_err(|err| {
            warn!(kort_id, command, error = %err, "command rejected");
        })?;

        if *state == before {
            return Ok(CommandOutcome::default());
        }

        let finished = match_flow::run(state, kort_id, now, &wall);
        state.updated = Some(monotonic_stamp(before.updated.as_deref(), wall));
        Ok(CommandOutcome {
            changed: true,
            flag_update,
            finished,
        })
    }

    /// Hand the committed state to the sink and the bus. Called with the court lock held.
    fn publish(&self, kort_id: &str, state: &CourtState, finished: &[HistoryEntity]) {
        if let Some(snapshot) = to_public(kort_id, state) {
            self.sink.persist_snapshot(kort_id, &snapshot);
            self.bus.broadcast(BusEvent::StateUpdate {
                kort_id: kort_id.to_string(),
                data: snapshot,
            });
        }
        for entry in finished {
            self.sink.append_history(entry.clone());
            if let Ok(data) = serde_json::to_value(entry) {
                self.bus.admin("match_finished", data);
            }
        }
    }
}

fn to_public(kort_id: &str, state: &CourtState) -> Option<Value> {
    serde_json::to_value(state)
        .inspect_err(|err| error!(kort_id, error = %err, "failed to serialize court state"))
        .ok()
}

#[cfg(test)]
mod tests {
    use std::{sync::Mutex as StdMutex, time::Duration};

    use serde_json::json;

    use super::*;
    use crate::{
        clock::ManualClock,
        services::player_directory::StaticPlayerDirectory,
    };

    #[derive(Default)]
    struct RecordingSink {
        snapshots: StdMutex<Vec<String>>,
        history: StdMutex<Vec<HistoryEntity>>,
    }

    impl StateSink for RecordingSink {
        fn persist_snapshot(&self, kort_id: &str, _snapshot: &Value) {
            self.snapshots.lock().unwrap().push(kort_id.to_string());
        }

        fn append_history(&self, entry: HistoryEntity) {
            self.history.lock().unwrap().push(entry);
        }
    }

    fn store(clock: Arc<ManualClock>, sink: Arc<RecordingSink>) -> (ScoreStore, Arc<BroadcastBus>) {
        let bus = Arc::new(BroadcastBus::default());
        let store = ScoreStore::new(
            clock,
            bus.clone(),
            sink,
            Arc::new(StaticPlayerDirectory::default()),
        );
        (store, bus)
    }

    #[tokio::test]
    async fn unknown_court_and_command_are_rejected() {
        let (store, _bus) = store(ManualClock::new(), Arc::default());
        let extras = Map::new();
        assert_eq!(
            store.apply_command("9", "ResetPoints", &Value::Null, &extras).await,
            Err(CommandError::UnknownCourt("9".into()))
        );
        store.ensure("9").await;
        assert_eq!(
            store.apply_command("9", "GetPointsPlayerA", &Value::Null, &extras).await,
            Err(CommandError::UnknownCommand("GetPointsPlayerA".into()))
        );
    }

    #[tokio::test]
    async fn change_is_persisted_and_broadcast() {
        let clock = ManualClock::new();
        let sink = Arc::new(RecordingSink::default());
        let (store, bus) = store(clock.clone(), sink.clone());
        let mut subscription = bus.listen();
        store.ensure("1").await;

        let extras = Map::new();
        let outcome = store
            .apply_command("1", "SetPointsPlayerA", &json!("15"), &extras)
            .await
            .unwrap();
        assert!(outcome.changed);

        let again = store
            .apply_command("1", "SetPointsPlayerA", &json!("15"), &extras)
            .await
            .unwrap();
        assert!(!again.changed);

        assert_eq!(sink.snapshots.lock().unwrap().len(), 1);
        match subscription.receiver.recv().await {
            Some(BusEvent::StateUpdate { kort_id, data }) => {
                assert_eq!(kort_id, "1");
                assert_eq!(data["players"]["A"]["points"], "15");
                assert!(data["updated"].is_string());
            }
            other => panic!("unexpected event {other:?}"),
        }
        assert!(subscription.receiver.try_recv().is_err());
    }

    #[tokio::test]
    async fn rejected_value_leaves_state_untouched() {
        let (store, _bus) = store(ManualClock::new(), Arc::default());
        store.ensure("1").await;
        let before = store.state("1").await.unwrap();
        let result = store
            .apply_command("1", "SetSet2PlayerB", &json!("many"), &Map::new())
            .await;
        assert!(matches!(result, Err(CommandError::InvalidValue { .. })));
        assert_eq!(store.state("1").await.unwrap(), before);
    }

    #[tokio::test]
    async fn timer_runs_on_the_injected_clock() {
        let clock = ManualClock::new();
        let (store, _bus) = store(clock.clone(), Arc::default());
        store.ensure("1").await;
        store
            .apply_command("1", "IncreaseCurrentSetPlayerB", &Value::Null, &Map::new())
            .await
            .unwrap();

        clock.advance(Duration::from_secs(90));
        let snapshot = store.snapshot_public("1").await.unwrap();
        assert_eq!(snapshot["match_time"]["seconds"], 90);
        assert_eq!(snapshot["match_status"]["active"], true);
    }

    #[tokio::test]
    async fn batch_is_all_or_nothing() {
        let sink = Arc::new(RecordingSink::default());
        let (store, bus) = store(ManualClock::new(), sink.clone());
        let mut subscription = bus.listen();
        store.ensure("1").await;
        let before = store.state("1").await.unwrap();
        let extras = Map::new();

        let rejected = vec![
            ("SetPointsPlayerA".to_string(), json!("15")),
            ("SetPointsPlayerB".to_string(), json!("20")),
        ];
        assert!(matches!(
            store.apply_batch("1", &rejected, &extras).await,
            Err(CommandError::InvalidValue { .. })
        ));
        assert_eq!(store.state("1").await.unwrap(), before);
        assert!(sink.snapshots.lock().unwrap().is_empty());

        let accepted = vec![
            ("SetPointsPlayerA".to_string(), json!("30")),
            ("SetPointsPlayerB".to_string(), json!("15")),
        ];
        let outcomes = store.apply_batch("1", &accepted, &extras).await.unwrap();
        assert!(outcomes.iter().all(|outcome| outcome.changed));
        assert_eq!(sink.snapshots.lock().unwrap().len(), 1);
        match subscription.receiver.try_recv() {
            Ok(BusEvent::StateUpdate { data, .. }) => {
                assert_eq!(data["players"]["A"]["points"], "30");
                assert_eq!(data["players"]["B"]["points"], "15");
            }
            other => panic!("unexpected event {other:?}"),
        }
        assert!(subscription.receiver.try_recv().is_err());
    }

    #[test]
    fn stamp_never_goes_backwards() {
        assert_eq!(
            monotonic_stamp(Some("2024-06-01T10:00:05Z"), "2024-06-01T10:00:00Z".into()),
            "2024-06-01T10:00:05Z"
        );
        assert_eq!(
            monotonic_stamp(Some("2024-06-01T10:00:05Z"), "2024-06-01T10:00:07Z".into()),
            "2024-06-01T10:00:07Z"
        );
        assert_eq!(monotonic_stamp(None, "x".into()), "x");
    }

    #[tokio::test]
    async fn finished_match_goes_to_history() {
        let sink = Arc::new(RecordingSink::default());
        let (store, _bus) = store(ManualClock::new(), sink.clone());
        store.ensure("3").await;
        let extras = Map::new();
        for (command, value) in [
            ("SetSet1PlayerA", json!(4)),
            ("SetSet1PlayerB", json!(1)),
            ("SetSet2PlayerA", json!(3)),
            ("SetSet2PlayerB", json!(1)),
        ] {
            store.apply_command("3", command, &value, &extras).await.unwrap();
        }
        let outcome = store
            .apply_command("3", "SetSet2PlayerA", &json!(4), &extras)
            .await
            .unwrap();
        assert!(outcome.finished.is_some());
        assert_eq!(sink.history.lock().unwrap().len(), 1);
        assert_eq!(store.state("3").await.unwrap().players.a.set1, 0);
    }
}
