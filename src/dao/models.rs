use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// Finished match written to the history journal.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
pub struct HistoryEntity {
    /// Stable identifier of the entry.
    pub id: Uuid,
    /// Court the match was played on.
    pub kort_id: String,
    /// Surname of player A at completion.
    pub player_a: String,
    /// Surname of player B at completion.
    pub player_b: String,
    /// Per-set games, including tie-break points captured for that set.
    pub sets: Vec<SetScoreEntity>,
    /// `"A"` or `"B"`.
    pub winner: Option<String>,
    /// Match clock at completion.
    pub duration_seconds: u64,
    pub category: Option<String>,
    pub phase: Option<String>,
    /// RFC 3339 start of the match clock.
    pub started_at: Option<String>,
    /// RFC 3339 completion time.
    pub finished_at: String,
}

/// Games of one set.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
pub struct SetScoreEntity {
    /// Set number, starting at 1.
    pub set: u8,
    pub games_a: u32,
    pub games_b: u32,
    /// Tie-break points of player A, when the set had one.
    pub tie_a: Option<u32>,
    /// Tie-break points of player B, when the set had one.
    pub tie_b: Option<u32>,
}

/// Serialized court state stored for warm restarts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SnapshotEntity {
    pub kort_id: String,
    pub state: serde_json::Value,
}
