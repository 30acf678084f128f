//! Per-court scoreboard state mirrored from the overlay.

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use utoipa::ToSchema;

/// Regular-game point ladder; `ADV` is the ceiling.
pub const POINT_SEQUENCE: [&str; 5] = ["0", "15", "30", "40", "ADV"];

/// Placeholder surname of an empty player slot.
pub const EMPTY_SURNAME: &str = "-";

/// One of the two players of a court.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
pub enum Side {
    A,
    B,
}

impl Side {
    /// Both sides, A first.
    pub const BOTH: [Side; 2] = [Side::A, Side::B];

    /// Array slot for per-side bookkeeping.
    pub fn index(self) -> usize {
        match self {
            Side::A => 0,
            Side::B => 1,
        }
    }

    pub fn other(self) -> Side {
        match self {
            Side::A => Side::B,
            Side::B => Side::A,
        }
    }

    /// Suffix used in command names (`SetPointsPlayerA`).
    pub fn letter(self) -> &'static str {
        match self {
            Side::A => "A",
            Side::B => "B",
        }
    }
}

/// Scoreboard line of one player.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(default)]
pub struct PlayerState {
    pub full_name: Option<String>,
    pub surname: String,
    pub points: String,
    pub current_games: u32,
    pub set1: u32,
    pub set2: u32,
    pub set3: u32,
    pub flag_url: Option<String>,
    pub flag_code: Option<String>,
}

impl Default for PlayerState {
    fn default() -> Self {
        Self {
            full_name: None,
            surname: EMPTY_SURNAME.into(),
            points: POINT_SEQUENCE[0].into(),
            current_games: 0,
            set1: 0,
            set2: 0,
            set3: 0,
            flag_url: None,
            flag_code: None,
        }
    }
}

impl PlayerState {
    /// Games of set 1..=3.
    pub fn set_games(&self, set: u8) -> u32 {
        match set {
            1 => self.set1,
            2 => self.set2,
            3 => self.set3,
            _ => 0,
        }
    }

    /// Mutable games of set 1..=3.
    pub fn set_games_mut(&mut self, set: u8) -> Option<&mut u32> {
        match set {
            1 => Some(&mut self.set1),
            2 => Some(&mut self.set2),
            3 => Some(&mut self.set3),
            _ => None,
        }
    }

    /// Whether a real name is present.
    pub fn has_name(&self) -> bool {
        self.full_name
            .as_deref()
            .is_some_and(|name| !name.trim().is_empty() && name.trim() != EMPTY_SURNAME)
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, ToSchema)]
#[serde(default)]
pub struct Players {
    #[serde(rename = "A")]
    pub a: PlayerState,
    #[serde(rename = "B")]
    pub b: PlayerState,
}

impl Players {
    pub fn get(&self, side: Side) -> &PlayerState {
        match side {
            Side::A => &self.a,
            Side::B => &self.b,
        }
    }

    pub fn get_mut(&mut self, side: Side) -> &mut PlayerState {
        match side {
            Side::A => &mut self.a,
            Side::B => &mut self.b,
        }
    }

    /// Put both players back to `"0"`.
    pub fn reset_points(&mut self) {
        self.a.points = POINT_SEQUENCE[0].into();
        self.b.points = POINT_SEQUENCE[0].into();
    }
}

/// Tie-break counter. While `locked`, only zero values are accepted.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, ToSchema)]
#[serde(default)]
pub struct TieBreak {
    pub visible: Option<bool>,
    #[serde(rename = "A")]
    pub a: u32,
    #[serde(rename = "B")]
    pub b: u32,
    pub locked: bool,
}

impl TieBreak {
    pub fn get(&self, side: Side) -> u32 {
        match side {
            Side::A => self.a,
            Side::B => self.b,
        }
    }

    pub fn get_mut(&mut self, side: Side) -> &mut u32 {
        match side {
            Side::A => &mut self.a,
            Side::B => &mut self.b,
        }
    }

    pub fn is_zero(&self) -> bool {
        self.a == 0 && self.b == 0
    }
}

/// Match clock. While running, `seconds = offset_seconds + (now - resume)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(default)]
pub struct MatchTime {
    pub seconds: u64,
    pub running: bool,
    pub started_ts: Option<String>,
    pub finished_ts: Option<String>,
    pub resume_ts: Option<String>,
    pub offset_seconds: u64,
    pub auto_resume: bool,
    #[serde(skip)]
    pub resume_at: Option<Instant>,
}

impl Default for MatchTime {
    fn default() -> Self {
        Self {
            seconds: 0,
            running: false,
            started_ts: None,
            finished_ts: None,
            resume_ts: None,
            offset_seconds: 0,
            auto_resume: true,
            resume_at: None,
        }
    }
}

impl MatchTime {
    /// Seconds on the clock at `now`.
    pub fn elapsed_at(&self, now: Instant) -> u64 {
        match (self.running, self.resume_at) {
            (true, Some(resume_at)) => {
                self.offset_seconds + now.saturating_duration_since(resume_at).as_secs()
            }
            _ => self.offset_seconds,
        }
    }

    /// Recompute `seconds` for `now`.
    pub fn refresh(&mut self, now: Instant) {
        self.seconds = self.elapsed_at(now);
    }

    /// Start or resume the clock.
    pub fn resume(&mut self, now: Instant, wall: &str) {
        if self.running {
            return;
        }
        self.running = true;
        self.resume_at = Some(now);
        self.resume_ts = Some(wall.to_string());
        if self.started_ts.is_none() {
            self.started_ts = Some(wall.to_string());
        }
    }

    /// Stop the clock, folding the running span into `offset_seconds`.
    pub fn pause(&mut self, now: Instant) {
        if !self.running {
            return;
        }
        self.offset_seconds = self.elapsed_at(now);
        self.seconds = self.offset_seconds;
        self.running = false;
        self.resume_at = None;
        self.resume_ts = None;
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, ToSchema)]
#[serde(default)]
pub struct MatchStatus {
    pub active: bool,
    /// Timestamp of the last finished match on this court.
    pub last_completed: Option<String>,
}

/// Category and phase copied into history entries.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, ToSchema)]
#[serde(default)]
pub struct MatchMeta {
    pub category: Option<String>,
    pub phase: Option<String>,
}

/// Tie-break score captured for a set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct TieLogEntry {
    pub set: u8,
    #[serde(rename = "A")]
    pub a: u32,
    #[serde(rename = "B")]
    pub b: u32,
}

/// Authoritative state of one court.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, ToSchema)]
#[serde(default)]
pub struct CourtState {
    pub players: Players,
    pub current_set: Option<u8>,
    pub serve: Option<Side>,
    pub tie: TieBreak,
    pub match_time: MatchTime,
    pub match_status: MatchStatus,
    pub overlay_visible: Option<bool>,
    pub mode: Option<String>,
    pub meta: MatchMeta,
    pub tie_log: Vec<TieLogEntry>,
    /// RFC 3339 time of the last change.
    pub updated: Option<String>,
}

impl CourtState {
    /// Record a tie-break score for `set`, replacing an earlier capture of the same set.
    pub fn log_tie(&mut self, set: u8, a: u32, b: u32) {
        let entry = TieLogEntry { set, a, b };
        match self.tie_log.iter_mut().find(|logged| logged.set == set) {
            Some(logged) => *logged = entry,
            None => self.tie_log.push(entry),
        }
    }

    /// Tie-break captured for `set`.
    pub fn tie_for_set(&self, set: u8) -> Option<TieLogEntry> {
        self.tie_log.iter().copied().find(|logged| logged.set == set)
    }

    /// Clear players, scores, timer and meta after a finished match.
    ///
    /// The tie-break is left locked; overlay visibility, mode and the last completion
    /// timestamp survive.
    pub fn reset_for_next_match(&mut self) {
        self.players = Players::default();
        self.current_set = None;
        self.serve = None;
        self.tie = TieBreak {
            visible: None,
            a: 0,
            b: 0,
            locked: true,
        };
        self.match_time = MatchTime::default();
        self.match_status.active = false;
        self.meta = MatchMeta::default();
        self.tie_log.clear();
    }

    /// Copy of the state for a restart: the timer comes back paused.
    pub fn restored(mut self) -> Self {
        if self.match_time.running {
            self.match_time.offset_seconds = self.match_time.seconds;
        }
        self.match_time.running = false;
        self.match_time.resume_ts = None;
        self.match_time.resume_at = None;
        self.match_time.seconds = self.match_time.offset_seconds;
        self
    }
}
