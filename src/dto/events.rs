//! Payloads posted by umpire clients.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::Validate;

use crate::dto::validation::validate_kort_id;

/// Kind of umpire event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    MatchStart,
    Point,
    Game,
    Set,
    MatchEnd,
    ServeChange,
    SideChange,
}

/// Points of both players, as displayed (`"0"`, `"15"`, ..., `"ADV"`).
#[derive(Debug, Clone, Deserialize, Serialize, ToSchema)]
pub struct PointsScore {
    pub player1: String,
    pub player2: String,
}

/// Games of both players in one set.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, ToSchema)]
pub struct GamesScore {
    pub player1: u32,
    pub player2: u32,
}

#[derive(Debug, Clone, Default, Deserialize, ToSchema, Validate)]
pub struct EventScore {
    #[serde(default)]
    pub points: Option<PointsScore>,
    /// Games of the set in progress.
    #[serde(default)]
    pub games: Option<GamesScore>,
    /// Games of sets 1 to 3, in order.
    #[serde(default)]
    #[validate(length(max = 3))]
    pub sets: Vec<GamesScore>,
    /// `"A"` or `"B"`.
    #[serde(default)]
    pub serve: Option<String>,
}

/// Court-scoped event from an umpire client.
#[derive(Debug, Clone, Deserialize, ToSchema, Validate)]
pub struct EventRequest {
    #[validate(custom(function = "validate_kort_id"))]
    pub court_id: String,
    #[serde(default)]
    pub pin: Option<String>,
    pub event_type: EventType,
    #[serde(default)]
    #[validate(length(max = 120))]
    pub player1: Option<String>,
    #[serde(default)]
    #[validate(length(max = 120))]
    pub player2: Option<String>,
    #[serde(default)]
    #[validate(nested)]
    pub score: Option<EventScore>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct EventResponse {
    pub ok: bool,
    /// Whether the event changed the court state.
    pub changed: bool,
}
