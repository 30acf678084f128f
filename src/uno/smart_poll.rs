//! Per-court state machine deciding which scheduled queries are worth a remote call.
//!
//! Between matches only names are polled; once names appear, points are polled until the
//! first point is played; during a match games and sets are only re-read after a
//! decisive point or a game change.

use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;
use utoipa::ToSchema;

use super::scheduler::{Gate, PollIntervals, QuerySpec};
use crate::state::court::{CourtState, Side};

/// Polling phase of a court.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum PollMode {
    InMatch,
    AwaitNames,
    AwaitFirstPoint,
}

const NO_POINTS: [&str; 4] = ["", "-", "0", "0-0"];

fn points_started(points: &str) -> bool {
    !NO_POINTS.contains(&points.trim())
}

fn is_decisive(points: &str) -> bool {
    matches!(points, "40" | "ADV")
}

fn meaningful_name(state: &CourtState, side: Side) -> Option<String> {
    let player = state.players.get(side);
    player
        .has_name()
        .then(|| player.full_name.clone().unwrap_or_default().trim().to_string())
}

/// Mode transition reported by [`SmartPoll::sync_from_state`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModeChange {
    pub from: PollMode,
    pub to: PollMode,
}

/// Smart precondition controller for one court.
#[derive(Debug, Clone)]
pub struct SmartPoll {
    mode: PollMode,
    intervals: PollIntervals,
    next_point: [Option<Instant>; 2],
    next_name: [Option<Instant>; 2],
    pending_games: [bool; 2],
    pending_sets: [bool; 2],
    name_snapshot: [Option<String>; 2],
    last_points: [String; 2],
    last_games: [u32; 2],
    last_active: bool,
}

impl SmartPoll {
    /// Derive the starting mode from the court's current state.
    pub fn new(state: &CourtState, intervals: PollIntervals) -> Self {
        let names = [
            meaningful_name(state, Side::A),
            meaningful_name(state, Side::B),
        ];
        let mode = if state.match_status.active {
            PollMode::InMatch
        } else if names.iter().all(Option::is_some) {
            PollMode::AwaitFirstPoint
        } else {
            PollMode::AwaitNames
        };
        Self {
            mode,
            intervals,
            next_point: [None; 2],
            next_name: [None; 2],
            pending_games: [false; 2],
            pending_sets: [false; 2],
            name_snapshot: names,
            last_points: [
                state.players.a.points.clone(),
                state.players.b.points.clone(),
            ],
            last_games: [state.players.a.current_games, state.players.b.current_games],
            last_active: state.match_status.active,
        }
    }

    pub fn mode(&self) -> PollMode {
        self.mode
    }

    pub fn set_intervals(&mut self, intervals: PollIntervals) {
        self.intervals = intervals;
    }

    /// Whether a games or sets re-poll is pending for `side`.
    pub fn pending(&self, gate: Gate, side: Side) -> bool {
        match gate {
            Gate::CurrentGames => self.pending_games[side.index()],
            Gate::Sets => self.pending_sets[side.index()],
            _ => false,
        }
    }

    /// Observe the court's state, raise re-poll flags and move between modes.
    ///
    /// A match ends for polling purposes when `active` drops from true to false.
    pub fn sync_from_state(&mut self, state: &CourtState, _now: Instant) -> Option<ModeChange> {
        self.observe_scores(state);

        let from = self.mode;
        let dropped = self.last_active && !state.match_status.active;
        self.last_active = state.match_status.active;
        match self.mode {
            PollMode::InMatch if dropped => {
                self.name_snapshot = [
                    meaningful_name(state, Side::A),
                    meaningful_name(state, Side::B),
                ];
                self.next_point = [None; 2];
                self.next_name = [None; 2];
                self.pending_games = [false; 2];
                self.pending_sets = [false; 2];
                self.mode = PollMode::AwaitNames;
            }
            PollMode::AwaitNames => {
                let changed = Side::BOTH.iter().any(|side| {
                    meaningful_name(state, *side)
                        .is_some_and(|name| self.name_snapshot[side.index()].as_deref() != Some(&name))
                });
                if changed {
                    self.mode = if state.match_status.active {
                        PollMode::InMatch
                    } else {
                        PollMode::AwaitFirstPoint
                    };
                }
            }
            PollMode::AwaitFirstPoint => {
                let started = points_started(&state.players.a.points)
                    || points_started(&state.players.b.points);
                if started || state.match_status.active {
                    self.mode = PollMode::InMatch;
                }
            }
            PollMode::InMatch => {}
        }

        (from != self.mode).then_some(ModeChange {
            from,
            to: self.mode,
        })
    }

    fn observe_scores(&mut self, state: &CourtState) {
        for side in Side::BOTH {
            let player = state.players.get(side);
            let slot = side.index();

            if player.points != self.last_points[slot] {
                if is_decisive(&player.points) {
                    self.pending_games = [true; 2];
                }
                self.last_points[slot] = player.points.clone();
            }

            if player.current_games != self.last_games[slot] {
                if player.current_games >= 3 {
                    self.pending_sets = [true; 2];
                }
                self.last_games[slot] = player.current_games;
            }
        }
    }

    /// Precondition for a scheduled query.
    pub fn allows(&self, spec: &QuerySpec, now: Instant) -> bool {
        let Some(side) = spec.side else {
            return true;
        };
        let slot = side.index();
        match spec.gate {
            Gate::Always => true,
            Gate::Points => {
                self.mode != PollMode::AwaitNames
                    && self.next_point[slot].is_none_or(|allowed| now >= allowed)
            }
            Gate::CurrentGames => self.mode == PollMode::InMatch && self.pending_games[slot],
            Gate::Sets => self.mode == PollMode::InMatch && self.pending_sets[slot],
            Gate::Names => {
                self.mode != PollMode::InMatch
                    && self.next_name[slot].is_none_or(|allowed| now >= allowed)
            }
        }
    }

    fn point_interval(&self) -> Duration {
        match self.mode {
            PollMode::AwaitFirstPoint => self.intervals.await_first_point,
            _ => self.intervals.in_match_points,
        }
    }

    fn name_interval(&self) -> Duration {
        match self.mode {
            PollMode::AwaitNames => self.intervals.await_names_names,
            _ => self.intervals.await_first_point_names,
        }
    }

    /// Mode-dependent cadence for points and names queries.
    pub fn interval_hint(&self, spec: &QuerySpec) -> Option<Duration> {
        match spec.gate {
            Gate::Points if self.mode != PollMode::AwaitNames => Some(self.point_interval()),
            Gate::Names if self.mode != PollMode::InMatch => Some(self.name_interval()),
            _ => None,
        }
    }

    /// Update timers and flags after a query reached the remote.
    pub fn after_poll(&mut self, spec: &QuerySpec, now: Instant, success: bool) {
        let Some(side) = spec.side else {
            return;
        };
        let slot = side.index();
        match spec.gate {
            Gate::Points if success => self.next_point[slot] = Some(now + self.point_interval()),
            Gate::Names if success => self.next_name[slot] = Some(now + self.name_interval()),
            Gate::CurrentGames => self.pending_games[slot] = false,
            Gate::Sets => self.pending_sets[slot] = false,
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::uno::scheduler::{SchedulerMode, mode_specs};

    fn spec(command: &str) -> QuerySpec {
        mode_specs(SchedulerMode::Normal, &PollIntervals::default())
            .into_iter()
            .find(|spec| spec.command == command)
            .unwrap()
    }

    fn named(a: &str, b: &str) -> CourtState {
        let mut state = CourtState::default();
        state.players.a.full_name = Some(a.into());
        state.players.b.full_name = Some(b.into());
        state
    }

    #[test]
    fn initial_mode_follows_state() {
        let empty = CourtState::default();
        assert_eq!(
            SmartPoll::new(&empty, PollIntervals::default()).mode(),
            PollMode::AwaitNames
        );

        let ready = named("Rafael Nadal", "Novak Djokovic");
        assert_eq!(
            SmartPoll::new(&ready, PollIntervals::default()).mode(),
            PollMode::AwaitFirstPoint
        );

        let mut live = ready.clone();
        live.match_status.active = true;
        assert_eq!(
            SmartPoll::new(&live, PollIntervals::default()).mode(),
            PollMode::InMatch
        );
    }

    #[test]
    fn full_cycle_between_matches() {
        let now = Instant::now();
        let mut state = CourtState::default();
        let mut smart = SmartPoll::new(&state, PollIntervals::default());
        assert!(!smart.allows(&spec("GetPointsPlayerA"), now));
        assert!(smart.allows(&spec("GetNamePlayerA"), now));

        state.players.a.full_name = Some("Iga Swiatek".into());
        let change = smart.sync_from_state(&state, now).unwrap();
        assert_eq!(change.to, PollMode::AwaitFirstPoint);
        assert!(smart.allows(&spec("GetPointsPlayerA"), now));

        state.players.b.points = "15".into();
        assert_eq!(
            smart.sync_from_state(&state, now).unwrap().to,
            PollMode::InMatch
        );
        assert!(smart.sync_from_state(&state, now).is_none());
        assert!(!smart.allows(&spec("GetNamePlayerA"), now));

        state.match_status.active = true;
        assert!(smart.sync_from_state(&state, now).is_none());
        state.match_status.active = false;
        assert_eq!(
            smart.sync_from_state(&state, now).unwrap().to,
            PollMode::AwaitNames
        );

        // Same names again do not count as a new match.
        assert!(smart.sync_from_state(&state, now).is_none());
        state.players.a.full_name = Some("Coco Gauff".into());
        assert_eq!(
            smart.sync_from_state(&state, now).unwrap().to,
            PollMode::AwaitFirstPoint
        );
    }

    #[test]
    fn point_polls_are_spaced_per_mode() {
        let now = Instant::now();
        let state = named("A B", "C D");
        let mut smart = SmartPoll::new(&state, PollIntervals::default());
        let points = spec("GetPointsPlayerA");

        smart.after_poll(&points, now, true);
        assert!(!smart.allows(&points, now + Duration::from_secs(11)));
        assert!(smart.allows(&points, now + Duration::from_secs(12)));
        assert_eq!(smart.interval_hint(&points), Some(Duration::from_secs(12)));

        let failed = now + Duration::from_secs(12);
        smart.after_poll(&points, failed, false);
        assert!(smart.allows(&points, failed));
    }

    #[test]
    fn decisive_point_arms_games_poll() {
        let now = Instant::now();
        let mut state = named("A B", "C D");
        state.match_status.active = true;
        let mut smart = SmartPoll::new(&state, PollIntervals::default());
        let games_a = spec("GetCurrentSetPlayerA");
        let games_b = spec("GetCurrentSetPlayerB");
        assert!(!smart.allows(&games_a, now));

        state.players.a.points = "30".into();
        smart.sync_from_state(&state, now);
        assert!(!smart.allows(&games_a, now));

        state.players.a.points = "40".into();
        smart.sync_from_state(&state, now);
        assert!(smart.allows(&games_a, now));
        assert!(smart.allows(&games_b, now));

        smart.after_poll(&games_a, now, false);
        assert!(!smart.allows(&games_a, now));
        assert!(smart.allows(&games_b, now));
    }

    #[test]
    fn third_game_arms_set_poll() {
        let now = Instant::now();
        let mut state = named("A B", "C D");
        state.match_status.active = true;
        let mut smart = SmartPoll::new(&state, PollIntervals::default());
        let set1 = spec("GetSet1PlayerB");

        state.players.a.current_games = 2;
        smart.sync_from_state(&state, now);
        assert!(!smart.allows(&set1, now));

        state.players.a.current_games = 3;
        smart.sync_from_state(&state, now);
        assert!(smart.allows(&set1, now));
        smart.after_poll(&set1, now, true);
        assert!(!smart.allows(&set1, now));
    }

    #[test]
    fn name_interval_depends_on_mode() {
        let state = CourtState::default();
        let smart = SmartPoll::new(&state, PollIntervals::default());
        assert_eq!(
            smart.interval_hint(&spec("GetNamePlayerB")),
            Some(Duration::from_secs(5))
        );
        let ready = named("A B", "C D");
        let smart = SmartPoll::new(&ready, PollIntervals::default());
        assert_eq!(
            smart.interval_hint(&spec("GetNamePlayerB")),
            Some(Duration::from_secs(20))
        );
    }
}
