use std::sync::{
    Arc, Mutex,
    atomic::{AtomicUsize, Ordering},
};

use courtside_back::{
    clock::{ManualClock, StopSignal},
    dao::models::HistoryEntity,
    services::player_directory::StaticPlayerDirectory,
    state::{
        AppState, CoreOptions, CourtConfig, SharedState,
        bus::BusEvent,
        match_flow,
        store::{DiscardSink, StateSink},
    },
    uno::{
        UnoConfig,
        client::{OverlayApi, RemoteResponse},
        ledger::UsageMode,
        worker::CourtWorker,
    },
};
use futures::future::BoxFuture;
use serde_json::{Map, Value, json};

/// Overlay that answers every call with an empty JSON object and counts them.
#[derive(Default)]
struct CountingOverlay {
    calls: AtomicUsize,
}

impl OverlayApi for CountingOverlay {
    fn execute(
        &self,
        _overlay_id: &str,
        _command: &str,
        _payload: Option<&Map<String, Value>>,
    ) -> BoxFuture<'static, RemoteResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Box::pin(async {
            RemoteResponse {
                status: 200,
                body: Some(json!({})),
                rate_limit: None,
            }
        })
    }
}

#[derive(Default)]
struct HistorySink {
    history: Mutex<Vec<HistoryEntity>>,
}

impl StateSink for HistorySink {
    fn persist_snapshot(&self, _kort_id: &str, _snapshot: &Value) {}

    fn append_history(&self, entry: HistoryEntity) {
        self.history.lock().unwrap().push(entry);
    }
}

fn options(uno: UnoConfig, api: Arc<dyn OverlayApi>, sink: Arc<dyn StateSink>) -> CoreOptions {
    CoreOptions {
        clock: ManualClock::new(),
        uno,
        api,
        sink,
        directory: Arc::new(StaticPlayerDirectory::default()),
    }
}

async fn local_court(kort_id: &str, sink: Arc<dyn StateSink>) -> SharedState {
    let uno = UnoConfig {
        requests_enabled: false,
        ..Default::default()
    };
    let state = AppState::new(options(uno, Arc::new(CountingOverlay::default()), sink));
    state.add_court(kort_id, CourtConfig::default()).await.unwrap();
    state
}

async fn apply(state: &SharedState, kort_id: &str, command: &str, value: Value) {
    state
        .apply_command(kort_id, command, &value, &Map::new())
        .await
        .unwrap_or_else(|err| panic!("{command} rejected: {err}"));
}

#[tokio::test]
async fn start_of_match() {
    let state = local_court("1", Arc::new(DiscardSink)).await;
    apply(&state, "1", "SetNamePlayerA", json!("Rafael Nadal")).await;
    apply(&state, "1", "SetNamePlayerB", json!("Novak Djokovic")).await;
    apply(&state, "1", "IncreaseCurrentSetPlayerA", Value::Null).await;

    let court = state.scores().state("1").await.unwrap();
    assert_eq!(court.players.a.surname, "Nadal");
    assert_eq!(court.players.a.full_name.as_deref(), Some("Rafael Nadal"));
    assert_eq!(court.players.b.surname, "Djokovic");
    assert_eq!(court.players.a.current_games, 1);
    assert!(court.match_status.active);
    assert!(court.match_time.running);
    assert_eq!(court.current_set, Some(1));
    assert!(court.updated.is_some());
}

#[tokio::test]
async fn advantage_stays_advantage() {
    let state = local_court("2", Arc::new(DiscardSink)).await;
    apply(&state, "2", "SetPointsPlayerA", json!("40")).await;
    apply(&state, "2", "SetPointsPlayerB", json!("40")).await;

    apply(&state, "2", "IncreasePointsPlayerA", Value::Null).await;
    let court = state.scores().state("2").await.unwrap();
    assert_eq!(court.players.a.points, "ADV");
    assert_eq!(court.players.b.points, "40");

    let outcome = state
        .apply_command("2", "IncreasePointsPlayerA", &Value::Null, &Map::new())
        .await
        .unwrap();
    assert!(!outcome.changed);
    assert_eq!(state.scores().state("2").await.unwrap().players.a.points, "ADV");
}

#[tokio::test]
async fn short_set_completion_resets_points() {
    let state = local_court("3", Arc::new(DiscardSink)).await;
    apply(&state, "3", "SetSet1PlayerA", json!(3)).await;
    apply(&state, "3", "SetSet1PlayerB", json!(2)).await;
    apply(&state, "3", "SetPointsPlayerA", json!("30")).await;
    let before = state.scores().state("3").await.unwrap().current_set;

    apply(&state, "3", "SetSet1PlayerA", json!(4)).await;
    let court = state.scores().state("3").await.unwrap();
    assert_eq!(court.players.a.points, "0");
    assert_eq!(court.players.b.points, "0");
    assert_eq!(match_flow::set_wins(&court), [1, 0]);
    assert!(court.current_set >= before);
}

#[tokio::test]
async fn hidden_tie_break_is_locked() {
    let state = local_court("4", Arc::new(DiscardSink)).await;
    apply(&state, "4", "SetTieBreakVisibility", json!(true)).await;
    apply(&state, "4", "IncreaseTieBreakPlayerA", Value::Null).await;
    apply(&state, "4", "IncreaseTieBreakPlayerA", Value::Null).await;
    assert_eq!(state.scores().state("4").await.unwrap().tie.a, 2);

    apply(&state, "4", "SetTieBreakVisibility", json!(false)).await;
    let tie = state.scores().state("4").await.unwrap().tie;
    assert_eq!((tie.a, tie.b, tie.visible, tie.locked), (0, 0, Some(false), true));

    apply(&state, "4", "IncreaseTieBreakPlayerA", Value::Null).await;
    assert_eq!(state.scores().state("4").await.unwrap().tie.a, 0);
}

#[tokio::test]
async fn super_tie_break_finishes_the_match() {
    let sink = Arc::new(HistorySink::default());
    let state = local_court("5", sink.clone()).await;
    let mut subscription = state.bus().listen();

    apply(&state, "5", "SetNamePlayerA", json!("Rafael Nadal")).await;
    apply(&state, "5", "SetNamePlayerB", json!("Novak Djokovic")).await;
    apply(&state, "5", "SetSet1PlayerA", json!(4)).await;
    apply(&state, "5", "SetSet1PlayerB", json!(2)).await;
    apply(&state, "5", "SetSet2PlayerA", json!(1)).await;
    apply(&state, "5", "SetSet2PlayerB", json!(4)).await;
    apply(&state, "5", "SetTieBreakVisibility", json!(true)).await;
    apply(&state, "5", "SetTieBreakPlayerA", json!(9)).await;
    apply(&state, "5", "SetTieBreakPlayerB", json!(8)).await;
    assert!(sink.history.lock().unwrap().is_empty());

    let outcome = state
        .apply_command("5", "IncreaseTieBreakPlayerA", &Value::Null, &Map::new())
        .await
        .unwrap();
    let entry = outcome.finished.expect("match should be finished");
    assert_eq!(entry.kort_id, "5");
    assert_eq!(entry.player_a, "Nadal");
    assert_eq!(entry.player_b, "Djokovic");
    assert_eq!(entry.winner.as_deref(), Some("A"));
    let scores: Vec<(u8, u32, u32)> = entry
        .sets
        .iter()
        .map(|set| (set.set, set.games_a, set.games_b))
        .collect();
    assert_eq!(&scores[..2], &[(1, 4, 2), (2, 1, 4)]);
    let decider = entry.sets.iter().find(|set| set.set == 3).unwrap();
    assert_eq!((decider.tie_a, decider.tie_b), (Some(10), Some(8)));
    assert_eq!(sink.history.lock().unwrap().len(), 1);

    let court = state.scores().state("5").await.unwrap();
    assert!(!court.match_time.running);
    assert!(!court.match_status.active);
    assert_eq!(court.players.a.surname, "-");
    assert_eq!(court.players.b.surname, "-");
    assert_eq!((court.players.a.set1, court.players.b.set2), (0, 0));
    assert!(court.tie.locked && court.tie.is_zero());

    let mut saw_finish = false;
    while let Ok(event) = subscription.receiver.try_recv() {
        if let BusEvent::Admin { event, .. } = event {
            saw_finish |= event == "match_finished";
        }
    }
    assert!(saw_finish);
}

#[tokio::test]
async fn regular_tie_break_finishes_the_match() {
    let sink = Arc::new(HistorySink::default());
    let state = local_court("7", sink.clone()).await;

    apply(&state, "7", "SetNamePlayerA", json!("Iga Swiatek")).await;
    apply(&state, "7", "SetNamePlayerB", json!("Coco Gauff")).await;
    apply(&state, "7", "SetSet1PlayerA", json!(3)).await;
    apply(&state, "7", "SetSet1PlayerB", json!(3)).await;
    apply(&state, "7", "SetTieBreakVisibility", json!(true)).await;
    apply(&state, "7", "SetTieBreakPlayerA", json!(6)).await;
    apply(&state, "7", "SetTieBreakPlayerB", json!(5)).await;
    assert!(sink.history.lock().unwrap().is_empty());

    let outcome = state
        .apply_command("7", "IncreaseTieBreakPlayerA", &Value::Null, &Map::new())
        .await
        .unwrap();
    let entry = outcome.finished.expect("tie-break at 7-5 ends the match");
    assert_eq!(entry.winner.as_deref(), Some("A"));
    assert_eq!(entry.player_a, "Swiatek");
    let first = entry.sets.iter().find(|set| set.set == 1).unwrap();
    assert_eq!((first.games_a, first.games_b), (3, 3));
    assert_eq!((first.tie_a, first.tie_b), (Some(7), Some(5)));
    assert_eq!(sink.history.lock().unwrap().len(), 1);

    let court = state.scores().state("7").await.unwrap();
    assert!(!court.match_status.active);
    assert_eq!((court.players.a.set1, court.players.b.set1), (0, 0));
    assert!(court.tie.locked && court.tie.is_zero());
}

#[tokio::test]
async fn subscribers_see_each_court_in_mutation_order() {
    let state = local_court("8", Arc::new(DiscardSink)).await;
    state.add_court("9", CourtConfig::default()).await.unwrap();
    let mut first = state.bus().listen();
    let mut second = state.bus().listen();

    let steps = [
        ("8", "SetPointsPlayerA", "15"),
        ("9", "SetPointsPlayerA", "15"),
        ("8", "SetPointsPlayerA", "30"),
        ("8", "SetPointsPlayerB", "15"),
        ("9", "SetPointsPlayerB", "40"),
        ("8", "SetPointsPlayerA", "40"),
    ];
    for (kort_id, command, points) in steps {
        apply(&state, kort_id, command, json!(points)).await;
    }

    for subscription in [&mut first, &mut second] {
        let mut seen = Vec::new();
        while let Ok(event) = subscription.receiver.try_recv() {
            if let BusEvent::StateUpdate { kort_id, data } = event {
                let players = &data["players"];
                seen.push(format!(
                    "{kort_id}:{}-{}",
                    players["A"]["points"].as_str().unwrap(),
                    players["B"]["points"].as_str().unwrap()
                ));
            }
        }
        assert_eq!(seen, ["8:15-0", "9:15-0", "8:30-0", "8:30-15", "9:15-40", "8:40-15"]);
    }
}

#[tokio::test]
async fn hourly_limit_breach_disables_requests() {
    let api = Arc::new(CountingOverlay::default());
    let uno = UnoConfig {
        requests_enabled: false,
        hourly_limit: 5,
        hourly_threshold: 0.8,
        slowdown_factor: 3,
        ..Default::default()
    };
    let state = AppState::new(options(uno, api.clone(), Arc::new(DiscardSink)));
    state
        .add_court(
            "6",
            CourtConfig {
                overlay_id: Some("ov-6".into()),
                pin: None,
            },
        )
        .await
        .unwrap();
    // Enabled on the runtime directly so no background worker competes with this one.
    assert!(state.uno().set_enabled(true, None).await);

    let ok = RemoteResponse {
        status: 200,
        body: Some(json!({})),
        rate_limit: None,
    };
    for _ in 0..4 {
        let now = state.clock().now();
        let outcome = state.uno().record_request("6", "GetNamePlayerA", &ok, now).await;
        assert!(!outcome.limit_reached);
    }
    let usage = state.uno().usage("6", state.clock().now()).await;
    assert_eq!(usage.mode, UsageMode::Slowdown);

    let (_stop_tx, stop) = StopSignal::channel();
    let mut worker = CourtWorker::new(state.clone(), "6".into(), "ov-6".into(), stop).await;
    assert!(worker.tick().await);
    assert!(worker.tick().await);
    assert_eq!(api.calls.load(Ordering::SeqCst), 0, "two of every three cycles are skipped");

    let mut ticks = 0;
    while state.uno().is_enabled() && ticks < 60 {
        worker.tick().await;
        ticks += 1;
    }
    assert!(!state.uno().is_enabled());
    assert_eq!(api.calls.load(Ordering::SeqCst), 1);
    let usage = state.uno().usage("6", state.clock().now()).await;
    assert_eq!(usage.mode, UsageMode::Limit);
    let reason = state.uno().disabled_reason().await.unwrap();
    assert!(reason.contains('6'), "reason `{reason}` names the court");
}
