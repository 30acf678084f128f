use std::{convert::Infallible, time::Duration};

use axum::response::sse::{Event, KeepAlive, Sse};
use futures::Stream;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::info;

use crate::{
    dto::sse::ServerEvent,
    services::sse_events,
    state::{SharedState, bus::BusSubscription},
};

/// Idle interval after which a `: heartbeat` comment is sent.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

fn to_event(payload: ServerEvent) -> Event {
    let mut event = Event::default().data(payload.data);
    if let Some(name) = payload.event {
        event = event.event(name);
    }
    event
}

/// Subscribe to the bus and collect one `court_update` per court.
///
/// The subscription is taken before the snapshots so no mutation falls between the two.
pub async fn subscribe(state: &SharedState) -> (BusSubscription, Vec<ServerEvent>) {
    let subscription = state.bus().listen();
    let initial = state
        .scores()
        .snapshot_all_public()
        .await
        .iter()
        .filter_map(|(kort_id, snapshot)| sse_events::court_update(kort_id, snapshot))
        .collect();
    (subscription, initial)
}

/// Convert a bus subscription into an SSE response, forwarding events and
/// discarding the subscriber once the client disconnects.
pub fn to_sse_stream(
    state: SharedState,
    subscription: BusSubscription,
    initial: Vec<ServerEvent>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    // small bounded channel between forwarder and response
    let (tx, rx) = mpsc::channel::<Result<Event, Infallible>>(8);
    let BusSubscription { id, mut receiver } = subscription;

    tokio::spawn(async move {
        for payload in initial {
            if tx.send(Ok(to_event(payload))).await.is_err() {
                state.bus().discard(id);
                return;
            }
        }

        loop {
            tokio::select! {
                _ = tx.closed() => break,
                received = receiver.recv() => {
                    let Some(bus_event) = received else { break };
                    let Some(payload) = sse_events::from_bus(&bus_event) else { continue };
                    if tx.send(Ok(to_event(payload))).await.is_err() {
                        break;
                    }
                }
            }
        }

        state.bus().discard(id);
        info!(subscriber = id, "SSE stream disconnected");
    });

    // response stream reads from mpsc; when client disconnects axum drops this stream
    let stream = ReceiverStream::new(rx);
    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(HEARTBEAT_INTERVAL)
            .text("heartbeat"),
    )
}
