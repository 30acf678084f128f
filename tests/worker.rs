use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use courtside_back::{
    clock::{Clock, ManualClock, SharedClock, StopSignal},
    services::player_directory::StaticPlayerDirectory,
    state::{AppState, CoreOptions, CourtConfig, SharedState, store::DiscardSink},
    uno::{
        UnoConfig,
        client::{OverlayApi, OverlayClient, OverlayClientConfig, RemoteResponse, SharedOverlayApi},
        worker::CourtWorker,
    },
};
use futures::future::BoxFuture;
use mockito::Matcher;
use serde_json::{Map, Value, json};
use time::OffsetDateTime;
use tokio::{sync::watch, time::Instant};

const KORT: &str = "1";
const OVERLAY: &str = "ov-1";

async fn court(clock: SharedClock, api: SharedOverlayApi, uno: UnoConfig) -> SharedState {
    let state = AppState::new(CoreOptions {
        clock,
        uno: UnoConfig {
            requests_enabled: false,
            ..uno
        },
        api,
        sink: Arc::new(DiscardSink),
        directory: Arc::new(StaticPlayerDirectory::default()),
    });
    state
        .add_court(
            KORT,
            CourtConfig {
                overlay_id: Some(OVERLAY.into()),
                pin: None,
            },
        )
        .await
        .unwrap();
    // Enabled on the runtime directly so no background worker competes with the one under test.
    state.uno().set_enabled(true, None).await;
    state
}

async fn worker(state: &SharedState) -> (watch::Sender<bool>, CourtWorker) {
    let (stop_tx, stop) = StopSignal::channel();
    let worker = CourtWorker::new(state.clone(), KORT.into(), OVERLAY.into(), stop).await;
    (stop_tx, worker)
}

fn overlay_client(server: &mockito::Server) -> SharedOverlayApi {
    Arc::new(
        OverlayClient::new(OverlayClientConfig {
            base_url: server.url(),
            bearer: Some("secret".into()),
            timeout: Duration::from_secs(5),
        })
        .unwrap(),
    )
}

fn value(value: Value) -> Option<Map<String, Value>> {
    let mut payload = Map::new();
    payload.insert("value".into(), value);
    Some(payload)
}

fn command(name: &str) -> Matcher {
    Matcher::PartialJson(json!({ "command": name }))
}

#[tokio::test]
async fn delivered_command_is_mirrored_locally() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("PUT", "/ov-1/api")
        .match_header("authorization", "Bearer secret")
        .match_body(Matcher::Json(json!({"command": "SetPointsPlayerA", "value": "30"})))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"ok": true}"#)
        .expect(1)
        .create_async()
        .await;

    let clock = ManualClock::new();
    let state = court(clock.clone(), overlay_client(&server), UnoConfig::default()).await;
    state
        .enqueue_court(KORT, "SetPointsPlayerA", value(json!("30")), None)
        .await
        .unwrap();

    let (_stop, mut worker) = worker(&state).await;
    assert!(worker.tick().await);

    mock.assert_async().await;
    assert!(state.uno().queue().is_empty(KORT).await);
    assert_eq!(state.scores().state(KORT).await.unwrap().players.a.points, "30");
}

#[tokio::test]
async fn failed_delivery_is_retried_from_the_head_after_backoff() {
    let mut server = mockito::Server::new_async().await;
    let failing = server
        .mock("PUT", "/ov-1/api")
        .match_body(command("SetPointsPlayerA"))
        .with_status(503)
        .expect(1)
        .create_async()
        .await;
    let serve = server
        .mock("PUT", "/ov-1/api")
        .match_body(command("SetServe"))
        .with_status(200)
        .with_body(r#"{"ok": true}"#)
        .expect(1)
        .create_async()
        .await;

    let clock = ManualClock::new();
    let state = court(clock.clone(), overlay_client(&server), UnoConfig::default()).await;
    let queue = state.uno().queue();
    state
        .enqueue_court(KORT, "SetPointsPlayerA", value(json!("15")), Some("points".into()))
        .await
        .unwrap();
    state
        .enqueue_court(KORT, "SetServe", value(json!("A")), Some("serve".into()))
        .await
        .unwrap();

    let (_stop, mut worker) = worker(&state).await;
    let start = clock.now();
    assert!(worker.tick().await);
    failing.assert_async().await;

    let pending = queue.pending(KORT).await;
    assert_eq!(pending[0].command_id, "points");
    assert_eq!(pending[0].attempts, 1);
    assert_eq!(pending[0].next_attempt, start + Duration::from_secs(15));
    assert_eq!(pending[1].command_id, "serve");

    assert!(worker.tick().await);
    serve.assert_async().await;
    let pending = queue.pending(KORT).await;
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].command_id, "points");
    assert!(!queue.has_ready(KORT, start + Duration::from_secs(14)).await);
    assert!(queue.has_ready(KORT, start + Duration::from_secs(15)).await);
}

#[tokio::test]
async fn command_is_dropped_after_max_attempts() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("PUT", "/ov-1/api")
        .match_body(command("ShowOverlay"))
        .with_status(500)
        .expect(2)
        .create_async()
        .await;

    let clock = ManualClock::new();
    let uno = UnoConfig {
        max_attempts: 2,
        ..Default::default()
    };
    let state = court(clock.clone(), overlay_client(&server), uno).await;
    state.enqueue_court(KORT, "ShowOverlay", None, None).await.unwrap();

    let (_stop, mut worker) = worker(&state).await;
    assert!(worker.tick().await);
    assert_eq!(state.uno().queue().len(KORT).await, 1);

    clock.advance(Duration::from_secs(16));
    assert!(worker.tick().await);

    mock.assert_async().await;
    assert!(state.uno().queue().is_empty(KORT).await);
}

#[tokio::test]
async fn rate_limited_delivery_waits_for_retry_after() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("PUT", "/ov-1/api")
        .match_body(command("HideOverlay"))
        .with_status(429)
        .with_header("content-type", "application/json")
        .with_body(r#"{"retry_after": 90}"#)
        .expect(1)
        .create_async()
        .await;

    let clock = ManualClock::new();
    let state = court(clock.clone(), overlay_client(&server), UnoConfig::default()).await;
    state.enqueue_court(KORT, "HideOverlay", None, None).await.unwrap();

    let (_stop, mut worker) = worker(&state).await;
    let start = clock.now();
    assert!(worker.tick().await);
    mock.assert_async().await;

    let pending = state.uno().queue().pending(KORT).await;
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].attempts, 1);
    assert_eq!(pending[0].next_attempt, start + Duration::from_secs(90));
    assert_eq!(state.uno().ledger().count(KORT, clock.now()).await, 1);
}

/// Clock whose every reading moves time forward by one microsecond.
struct TickingClock {
    inner: Arc<ManualClock>,
}

impl Clock for TickingClock {
    fn now(&self) -> Instant {
        self.inner.advance(Duration::from_micros(1));
        self.inner.now()
    }

    fn wall(&self) -> OffsetDateTime {
        self.inner.wall()
    }

    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()> {
        self.inner.sleep(duration)
    }
}

/// Overlay answering queries from a fixed table and logging when each was asked.
struct ScoreboardOverlay {
    clock: Arc<ManualClock>,
    calls: Mutex<Vec<(String, Duration)>>,
}

impl OverlayApi for ScoreboardOverlay {
    fn execute(
        &self,
        _overlay_id: &str,
        command: &str,
        _payload: Option<&Map<String, Value>>,
    ) -> BoxFuture<'static, RemoteResponse> {
        self.calls
            .lock()
            .unwrap()
            .push((command.to_string(), self.clock.elapsed()));
        let payload = match command {
            "GetPointsPlayerA" | "GetPointsPlayerB" => json!("0"),
            "GetTieBreakVisibility" => json!(false),
            _ => Value::Null,
        };
        Box::pin(async move {
            RemoteResponse {
                status: 200,
                body: Some(json!({ "payload": payload })),
                rate_limit: None,
            }
        })
    }
}

#[tokio::test]
async fn in_match_points_are_polled_every_interval() {
    let manual = ManualClock::new();
    let clock: SharedClock = Arc::new(TickingClock {
        inner: manual.clone(),
    });
    let overlay = Arc::new(ScoreboardOverlay {
        clock: manual.clone(),
        calls: Mutex::new(Vec::new()),
    });
    let uno = UnoConfig {
        rpm: 600,
        burst: 20,
        ..Default::default()
    };
    let state = court(clock, overlay.clone(), uno).await;
    for (command, value) in [
        ("SetNamePlayerA", json!("Rafael Nadal")),
        ("SetNamePlayerB", json!("Novak Djokovic")),
        ("IncreaseCurrentSetPlayerA", Value::Null),
    ] {
        state.apply_command(KORT, command, &value, &Map::new()).await.unwrap();
    }
    assert!(state.scores().state(KORT).await.unwrap().match_status.active);

    let (_stop, mut worker) = worker(&state).await;
    let origin = manual.elapsed();
    let mut ticks = 0;
    while manual.elapsed() - origin < Duration::from_secs(300) && ticks < 100_000 {
        assert!(worker.tick().await);
        ticks += 1;
    }

    let polls: Vec<Duration> = overlay
        .calls
        .lock()
        .unwrap()
        .iter()
        .filter(|(command, _)| command == "GetPointsPlayerA")
        .map(|(_, at)| *at)
        .collect();
    assert!(polls.len() >= 29, "only {} point polls in 300s", polls.len());
    for gap in polls.windows(2).map(|pair| pair[1] - pair[0]) {
        assert!(
            gap >= Duration::from_secs(10) && gap < Duration::from_millis(10_500),
            "point polls {gap:?} apart"
        );
    }
}
