//! Umpire events: PIN check and translation into court commands.

use serde_json::{Value, json};
use tracing::{debug, info};

use crate::{
    dto::events::{EventRequest, EventResponse, EventType},
    error::ServiceError,
    state::{SharedState, court::Side},
};

fn side_command(prefix: &str, side: Side) -> String {
    format!("{prefix}Player{}", side.letter())
}

/// Commands carried by an umpire event, in application order.
pub fn translate(request: &EventRequest) -> Vec<(String, Value)> {
    let score = request.score.clone().unwrap_or_default();
    let mut commands = Vec::new();
    match request.event_type {
        EventType::MatchStart => {
            for (side, name) in [(Side::A, &request.player1), (Side::B, &request.player2)] {
                if let Some(name) = name.as_deref().map(str::trim).filter(|name| !name.is_empty()) {
                    commands.push((side_command("SetName", side), json!(name)));
                }
            }
            commands.push(("PlayMatchTime".to_string(), Value::Null));
        }
        EventType::Point => {
            if let Some(points) = score.points {
                commands.push((side_command("SetPoints", Side::A), json!(points.player1)));
                commands.push((side_command("SetPoints", Side::B), json!(points.player2)));
            }
        }
        EventType::Game => {
            if let Some(games) = score.games {
                commands.push((side_command("SetCurrentSet", Side::A), json!(games.player1)));
                commands.push((side_command("SetCurrentSet", Side::B), json!(games.player2)));
            }
        }
        EventType::Set => {
            for (index, games) in score.sets.iter().take(3).enumerate() {
                let set = index + 1;
                commands.push((side_command(&format!("SetSet{set}"), Side::A), json!(games.player1)));
                commands.push((side_command(&format!("SetSet{set}"), Side::B), json!(games.player2)));
            }
        }
        EventType::MatchEnd => commands.push(("PauseMatchTime".to_string(), Value::Null)),
        EventType::ServeChange => {
            if let Some(serve) = score.serve {
                commands.push(("SetServe".to_string(), json!(serve)));
            }
        }
        EventType::SideChange => {}
    }
    commands
}

/// Verify the court PIN and apply the event to the court's state.
pub async fn handle_event(state: &SharedState, request: EventRequest) -> Result<EventResponse, ServiceError> {
    let court = state
        .court(&request.court_id)
        .ok_or_else(|| ServiceError::NotFound(format!("court `{}`", request.court_id)))?;
    if let Some(expected) = court.pin.as_deref()
        && request.pin.as_deref() != Some(expected)
    {
        return Err(ServiceError::Unauthorized("invalid court pin".into()));
    }

    let commands = translate(&request);
    if commands.is_empty() {
        info!(kort_id = %request.court_id, event = ?request.event_type, "umpire event without state change");
        return Ok(EventResponse {
            ok: true,
            changed: false,
        });
    }

    let outcomes = state.apply_batch(&request.court_id, &commands).await?;
    let changed = outcomes.iter().any(|outcome| outcome.changed);
    debug!(kort_id = %request.court_id, event = ?request.event_type, changed, "umpire event applied");
    Ok(EventResponse { ok: true, changed })
}
