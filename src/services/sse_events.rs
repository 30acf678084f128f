use serde::Serialize;
use serde_json::Value;
use tracing::warn;

use crate::{dto::sse::ServerEvent, state::bus::BusEvent};

const EVENT_COURT_UPDATE: &str = "court_update";
const EVENT_ADMIN: &str = "admin";

#[derive(Serialize)]
struct AdminPayload<'a> {
    event: &'a str,
    data: &'a Value,
}

/// `court_update` event: the public snapshot with `court_id` added.
pub fn court_update(kort_id: &str, snapshot: &Value) -> Option<ServerEvent> {
    let mut data = snapshot.clone();
    match data.as_object_mut() {
        Some(object) => {
            object.insert("court_id".into(), Value::String(kort_id.to_string()));
        }
        None => {
            warn!(kort_id, "court snapshot is not an object; event skipped");
            return None;
        }
    }
    to_event(EVENT_COURT_UPDATE, &data)
}

/// Map a bus envelope to the event sent to stream clients.
pub fn from_bus(event: &BusEvent) -> Option<ServerEvent> {
    match event {
        BusEvent::StateUpdate { kort_id, data } => court_update(kort_id, data),
        BusEvent::Admin { event, data } => to_event(EVENT_ADMIN, &AdminPayload { event, data }),
    }
}

fn to_event<T: Serialize>(name: &str, payload: &T) -> Option<ServerEvent> {
    ServerEvent::json(Some(name.to_string()), payload)
        .inspect_err(|err| warn!(event = name, error = %err, "failed to serialise SSE payload"))
        .ok()
}
