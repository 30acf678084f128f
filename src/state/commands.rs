//! Closed command vocabulary applied to a [`CourtState`].
//!
//! Command names are parsed once through [`COMMANDS`] into a [`Command`] value whose
//! [`Command::apply`] is the only code that edits score fields.

use serde_json::{Map, Value};
use thiserror::Error;
use tokio::time::Instant;
use tracing::info;

use super::court::{CourtState, MatchTime, POINT_SEQUENCE, Side};
use crate::services::player_directory::{PlayerDirectory, PlayerFlag};

/// Rejections raised while applying a command. State is left untouched.
#[derive(Debug, Error, PartialEq)]
pub enum CommandError {
    #[error("unknown court `{0}`")]
    UnknownCourt(String),
    #[error("unknown command `{0}`")]
    UnknownCommand(String),
    #[error("invalid value for `{command}`: {reason}")]
    InvalidValue {
        command: &'static str,
        reason: String,
    },
}

/// Customization field ids understood by `SetCustomizationField`.
pub const PLAYER_A_FLAG_FIELD: &str = "Player A Flag";
pub const PLAYER_B_FLAG_FIELD: &str = "Player B Flag";

/// Flag field id of a side.
pub fn flag_field(side: Side) -> &'static str {
    match side {
        Side::A => PLAYER_A_FLAG_FIELD,
        Side::B => PLAYER_B_FLAG_FIELD,
    }
}

/// A player's flag changed as a side effect of a name change.
#[derive(Debug, Clone, PartialEq)]
pub struct FlagUpdate {
    pub side: Side,
    pub flag: PlayerFlag,
}

/// Inputs besides the command value.
pub struct CommandContext<'a> {
    pub now: Instant,
    /// Wall-clock timestamp written into timer fields.
    pub wall: &'a str,
    /// Extra request fields such as `flagUrl`, `flagCode` or `fieldId`.
    pub extras: &'a Map<String, Value>,
    pub directory: &'a dyn PlayerDirectory,
}

/// Every accepted command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    SetName(Side),
    SetPoints(Side),
    IncreasePoints(Side),
    DecreasePoints(Side),
    ResetPoints,
    SetCurrentGames(Side),
    IncreaseCurrentGames(Side),
    DecreaseCurrentGames(Side),
    SetSetGames { set: u8, side: Side },
    SetCurrentSet,
    IncreaseSet,
    DecreaseSet,
    SetTieBreak(Side),
    IncreaseTieBreak(Side),
    DecreaseTieBreak(Side),
    ResetTieBreak,
    SetTieBreakVisibility,
    ShowTieBreak,
    HideTieBreak,
    ToggleTieBreak,
    SetServe,
    SetMode,
    ShowOverlay,
    HideOverlay,
    ToggleOverlay,
    SetOverlayVisibility,
    SetCustomizationField,
    SetMatchTime,
    ResetMatchTime,
    PlayMatchTime,
    PauseMatchTime,
    SetCategory,
    SetPhase,
}

/// Name to command dispatch table.
pub const COMMANDS: &[(&str, Command)] = &[
    ("SetNamePlayerA", Command::SetName(Side::A)),
    ("SetNamePlayerB", Command::SetName(Side::B)),
    ("SetPointsPlayerA", Command::SetPoints(Side::A)),
    ("SetPointsPlayerB", Command::SetPoints(Side::B)),
    ("IncreasePointsPlayerA", Command::IncreasePoints(Side::A)),
    ("IncreasePointsPlayerB", Command::IncreasePoints(Side::B)),
    ("DecreasePointsPlayerA", Command::DecreasePoints(Side::A)),
    ("DecreasePointsPlayerB", Command::DecreasePoints(Side::B)),
    ("ResetPoints", Command::ResetPoints),
    ("SetCurrentSetPlayerA", Command::SetCurrentGames(Side::A)),
    ("SetCurrentSetPlayerB", Command::SetCurrentGames(Side::B)),
    ("IncreaseCurrentSetPlayerA", Command::IncreaseCurrentGames(Side::A)),
    ("IncreaseCurrentSetPlayerB", Command::IncreaseCurrentGames(Side::B)),
    ("DecreaseCurrentSetPlayerA", Command::DecreaseCurrentGames(Side::A)),
    ("DecreaseCurrentSetPlayerB", Command::DecreaseCurrentGames(Side::B)),
    ("SetSet1PlayerA", Command::SetSetGames { set: 1, side: Side::A }),
    ("SetSet1PlayerB", Command::SetSetGames { set: 1, side: Side::B }),
    ("SetSet2PlayerA", Command::SetSetGames { set: 2, side: Side::A }),
    ("SetSet2PlayerB", Command::SetSetGames { set: 2, side: Side::B }),
    ("SetSet3PlayerA", Command::SetSetGames { set: 3, side: Side::A }),
    ("SetSet3PlayerB", Command::SetSetGames { set: 3, side: Side::B }),
    ("SetCurrentSet", Command::SetCurrentSet),
    ("SetSet", Command::SetCurrentSet),
    ("IncreaseSet", Command::IncreaseSet),
    ("DecreaseSet", Command::DecreaseSet),
    ("SetTieBreakPlayerA", Command::SetTieBreak(Side::A)),
    ("SetTieBreakPlayerB", Command::SetTieBreak(Side::B)),
    ("IncreaseTieBreakPlayerA", Command::IncreaseTieBreak(Side::A)),
    ("IncreaseTieBreakPlayerB", Command::IncreaseTieBreak(Side::B)),
    ("DecreaseTieBreakPlayerA", Command::DecreaseTieBreak(Side::A)),
    ("DecreaseTieBreakPlayerB", Command::DecreaseTieBreak(Side::B)),
    ("ResetTieBreak", Command::ResetTieBreak),
    ("SetTieBreakVisibility", Command::SetTieBreakVisibility),
    ("ShowTieBreak", Command::ShowTieBreak),
    ("HideTieBreak", Command::HideTieBreak),
    ("ToggleTieBreak", Command::ToggleTieBreak),
    ("SetServe", Command::SetServe),
    ("SetMode", Command::SetMode),
    ("ShowOverlay", Command::ShowOverlay),
    ("HideOverlay", Command::HideOverlay),
    ("ToggleOverlay", Command::ToggleOverlay),
    ("SetOverlayVisibility", Command::SetOverlayVisibility),
    ("SetCustomizationField", Command::SetCustomizationField),
    ("SetMatchTime", Command::SetMatchTime),
    ("ResetMatchTime", Command::ResetMatchTime),
    ("PlayMatchTime", Command::PlayMatchTime),
    ("PauseMatchTime", Command::PauseMatchTime),
    ("SetMatchCategory", Command::SetCategory),
    ("SetCategory", Command::SetCategory),
    ("SetMatchPhase", Command::SetPhase),
    ("SetPhase", Command::SetPhase),
];

fn number(value: &Value) -> Option<u32> {
    match value {
        Value::Number(number) => number
            .as_u64()
            .or_else(|| {
                number
                    .as_f64()
                    .filter(|n| *n >= 0.0 && n.fract() == 0.0)
                    .map(|n| n as u64)
            })
            .and_then(|n| u32::try_from(n).ok()),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    }
}

fn boolean(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(flag) => Some(*flag),
        Value::Number(number) => number.as_f64().map(|n| n != 0.0),
        Value::String(text) => match text.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" | "on" | "visible" | "show" => Some(true),
            "false" | "0" | "no" | "off" | "hidden" | "hide" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

fn text(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => {
            let trimmed = text.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        }
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}

fn extra_text(extras: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| extras.get(*key).and_then(text))
}

fn points_value(value: &Value) -> Option<&'static str> {
    let raw = text(value)?.to_ascii_uppercase();
    let normalized = match raw.as_str() {
        "A" | "AD" | "ADV" => "ADV",
        other => other,
    };
    POINT_SEQUENCE
        .iter()
        .copied()
        .find(|point| *point == normalized)
}

fn step_points(current: &str, up: bool) -> &'static str {
    let index = POINT_SEQUENCE
        .iter()
        .position(|point| *point == current)
        .unwrap_or(0);
    let next = if up {
        (index + 1).min(POINT_SEQUENCE.len() - 1)
    } else {
        index.saturating_sub(1)
    };
    POINT_SEQUENCE[next]
}

fn set_games(state: &mut CourtState, side: Side, games: u32) {
    let player = state.players.get_mut(side);
    if player.current_games != games {
        player.current_games = games;
        state.players.reset_points();
    }
}

/// Apply tie-break visibility. Hiding a tie-break logs a non-zero score for the current
/// set, clears it and locks it until it is shown again. Showing an already visible
/// tie-break keeps the lock.
fn set_tie_visibility(state: &mut CourtState, visible: bool) {
    if visible {
        if state.tie.visible == Some(true) {
            return;
        }
        state.tie.visible = Some(true);
        state.tie.locked = false;
        return;
    }

    let was_shown = state.tie.visible == Some(true);
    if !state.tie.is_zero() {
        let set = state.current_set.unwrap_or(1);
        state.log_tie(set, state.tie.a, state.tie.b);
    }
    if was_shown || !state.tie.is_zero() {
        state.players.reset_points();
    }
    state.tie.a = 0;
    state.tie.b = 0;
    state.tie.locked = true;
    state.tie.visible = Some(false);
}

impl Command {
    /// Look a command up by its exact name.
    pub fn parse(name: &str) -> Option<Self> {
        COMMANDS
            .iter()
            .find(|(candidate, _)| *candidate == name)
            .map(|(_, command)| *command)
    }

    /// Canonical name of the command.
    pub fn name(self) -> &'static str {
        COMMANDS
            .iter()
            .find(|(_, command)| *command == self)
            .map(|(name, _)| *name)
            .unwrap_or("Unknown")
    }

    fn invalid(self, reason: impl Into<String>) -> CommandError {
        CommandError::InvalidValue {
            command: self.name(),
            reason: reason.into(),
        }
    }

    fn require_number(self, value: &Value) -> Result<u32, CommandError> {
        number(value).ok_or_else(|| self.invalid(format!("expected a non-negative integer, got {value}")))
    }

    fn require_bool(self, value: &Value) -> Result<bool, CommandError> {
        boolean(value).ok_or_else(|| self.invalid(format!("expected a boolean, got {value}")))
    }

    /// Mutate `state`. Returns the flag change caused by a name update, if any.
    pub fn apply(
        self,
        state: &mut CourtState,
        value: &Value,
        ctx: &CommandContext<'_>,
    ) -> Result<Option<FlagUpdate>, CommandError> {
        match self {
            Command::SetName(side) => return Ok(self.apply_name(state, side, value, ctx)),
            Command::SetPoints(side) => {
                let points = points_value(value)
                    .ok_or_else(|| self.invalid(format!("`{value}` is not a point value")))?;
                state.players.get_mut(side).points = points.into();
            }
            Command::IncreasePoints(side) | Command::DecreasePoints(side) => {
                let up = matches!(self, Command::IncreasePoints(_));
                let player = state.players.get_mut(side);
                player.points = step_points(&player.points, up).into();
            }
            Command::ResetPoints => state.players.reset_points(),
            Command::SetCurrentGames(side) => {
                let games = self.require_number(value)?;
                set_games(state, side, games);
            }
            Command::IncreaseCurrentGames(side) => {
                let games = state.players.get(side).current_games.saturating_add(1);
                set_games(state, side, games);
            }
            Command::DecreaseCurrentGames(side) => {
                let games = state.players.get(side).current_games.saturating_sub(1);
                set_games(state, side, games);
            }
            Command::SetSetGames { set, side } => {
                let games = self.require_number(value)?;
                let slot = state
                    .players
                    .get_mut(side)
                    .set_games_mut(set)
                    .ok_or_else(|| self.invalid(format!("no set {set}")))?;
                if *slot != games {
                    *slot = games;
                    state.players.reset_points();
                }
            }
            Command::SetCurrentSet => {
                state.current_set = match value {
                    Value::Null => None,
                    other => {
                        let set = self.require_number(other)?;
                        if !(1..=3).contains(&set) {
                            return Err(self.invalid(format!("set {set} is out of range")));
                        }
                        Some(set as u8)
                    }
                };
            }
            Command::IncreaseSet => {
                state.current_set = Some(state.current_set.map_or(1, |set| (set + 1).min(3)));
            }
            Command::DecreaseSet => {
                state.current_set = state.current_set.map(|set| set.saturating_sub(1).max(1));
            }
            Command::SetTieBreak(side) => {
                let points = self.require_number(value)?;
                if !state.tie.locked || points == 0 {
                    *state.tie.get_mut(side) = points;
                }
            }
            Command::IncreaseTieBreak(side) => {
                if !state.tie.locked {
                    let slot = state.tie.get_mut(side);
                    *slot = slot.saturating_add(1);
                }
            }
            Command::DecreaseTieBreak(side) => {
                let slot = state.tie.get_mut(side);
                *slot = slot.saturating_sub(1);
            }
            Command::ResetTieBreak => {
                state.tie.a = 0;
                state.tie.b = 0;
            }
            Command::SetTieBreakVisibility => {
                let visible = self.require_bool(value)?;
                set_tie_visibility(state, visible);
            }
            Command::ShowTieBreak => set_tie_visibility(state, true),
            Command::HideTieBreak => set_tie_visibility(state, false),
            Command::ToggleTieBreak => {
                let visible = state.tie.visible != Some(true);
                set_tie_visibility(state, visible);
            }
            Command::SetServe => {
                state.serve = match text(value).map(|raw| raw.to_ascii_uppercase()) {
                    None => None,
                    Some(raw) if raw == "A" => Some(Side::A),
                    Some(raw) if raw == "B" => Some(Side::B),
                    Some(raw) => return Err(self.invalid(format!("`{raw}` is not A or B"))),
                };
            }
            Command::SetMode => state.mode = text(value),
            Command::ShowOverlay => state.overlay_visible = Some(true),
            Command::HideOverlay => state.overlay_visible = Some(false),
            Command::ToggleOverlay => {
                state.overlay_visible = Some(state.overlay_visible != Some(true));
            }
            Command::SetOverlayVisibility => {
                state.overlay_visible = Some(self.require_bool(value)?);
            }
            Command::SetCustomizationField => self.apply_customization(state, value, ctx),
            Command::SetMatchTime => {
                let seconds = u64::from(self.require_number(value)?);
                let time = &mut state.match_time;
                time.offset_seconds = seconds;
                time.seconds = seconds;
                if time.running {
                    time.resume_at = Some(ctx.now);
                    time.resume_ts = Some(ctx.wall.to_string());
                }
            }
            Command::ResetMatchTime => state.match_time = MatchTime::default(),
            Command::PlayMatchTime => {
                state.match_time.resume(ctx.now, ctx.wall);
                state.match_time.auto_resume = true;
            }
            Command::PauseMatchTime => {
                state.match_time.pause(ctx.now);
                state.match_time.auto_resume = false;
            }
            Command::SetCategory => state.meta.category = text(value),
            Command::SetPhase => state.meta.phase = text(value),
        }
        Ok(None)
    }

    fn apply_name(
        self,
        state: &mut CourtState,
        side: Side,
        value: &Value,
        ctx: &CommandContext<'_>,
    ) -> Option<FlagUpdate> {
        let player = state.players.get_mut(side);
        let before = PlayerFlag {
            flag_url: player.flag_url.clone(),
            flag_code: player.flag_code.clone(),
        };

        match text(value) {
            Some(name) => {
                player.surname = name
                    .split_whitespace()
                    .last()
                    .unwrap_or(super::court::EMPTY_SURNAME)
                    .to_string();
                player.full_name = Some(name);
            }
            None => {
                player.full_name = None;
                player.surname = super::court::EMPTY_SURNAME.into();
            }
        }

        let caller = PlayerFlag {
            flag_url: extra_text(ctx.extras, &["flagUrl", "flag_url"]),
            flag_code: extra_text(ctx.extras, &["flagCode", "flag_code"]),
        };
        if !caller.is_empty() {
            if caller.flag_url.is_some() {
                player.flag_url = caller.flag_url;
            }
            if caller.flag_code.is_some() {
                player.flag_code = caller.flag_code;
            }
        } else if player.has_name()
            && let Some(found) = ctx.directory.lookup(&player.surname)
        {
            player.flag_url = found.flag_url;
            player.flag_code = found.flag_code;
        }

        let after = PlayerFlag {
            flag_url: player.flag_url.clone(),
            flag_code: player.flag_code.clone(),
        };
        (after != before && !after.is_empty()).then_some(FlagUpdate { side, flag: after })
    }

    fn apply_customization(self, state: &mut CourtState, value: &Value, ctx: &CommandContext<'_>) {
        let Some(field) = extra_text(ctx.extras, &["fieldId", "field_id"]) else {
            info!("customization field without fieldId ignored");
            return;
        };
        let content = text(value);
        let flag_side = [Side::A, Side::B]
            .into_iter()
            .find(|side| field.eq_ignore_ascii_case(flag_field(*side)));

        if let Some(side) = flag_side {
            let player = state.players.get_mut(side);
            match content {
                Some(flag) if flag.starts_with("http") => player.flag_url = Some(flag),
                Some(flag) => player.flag_code = Some(flag),
                None => {
                    player.flag_url = None;
                    player.flag_code = None;
                }
            }
        } else if field.eq_ignore_ascii_case("Category") {
            state.meta.category = content;
        } else if field.eq_ignore_ascii_case("Phase") {
            state.meta.phase = content;
        } else {
            info!(%field, "unhandled customization field ignored");
        }
    }
}
