//! Rules run after every mutating command: match start, timer upkeep, current-set
//! indicator and match completion.

use tokio::time::Instant;
use tracing::info;
use uuid::Uuid;

use super::court::{CourtState, Side};
use crate::dao::models::{HistoryEntity, SetScoreEntity};

/// Games needed to take a short set.
pub const SHORT_SET_GAMES: u32 = 4;
/// Points needed to take a regular tie-break.
pub const TIE_BREAK_POINTS: u32 = 7;
/// Points needed to take the deciding super tie-break.
pub const SUPER_TIE_BREAK_POINTS: u32 = 10;
/// Sets needed to win the match.
pub const SETS_TO_WIN: u32 = 2;

/// Winner of a short set, if any.
pub fn set_winner(games_a: u32, games_b: u32) -> Option<Side> {
    if games_a >= SHORT_SET_GAMES && games_a > games_b {
        Some(Side::A)
    } else if games_b >= SHORT_SET_GAMES && games_b > games_a {
        Some(Side::B)
    } else {
        None
    }
}

/// Sets won by each side over the first two sets, indexed by [`Side::index`].
pub fn set_wins(state: &CourtState) -> [u32; 2] {
    let mut wins = [0; 2];
    for set in 1..=2 {
        let games_a = state.players.a.set_games(set);
        let games_b = state.players.b.set_games(set);
        if let Some(side) = set_winner(games_a, games_b) {
            wins[side.index()] += 1;
        }
    }
    wins
}

fn tie_winner(a: u32, b: u32, target: u32) -> Option<Side> {
    if a.max(b) < target || a.abs_diff(b) < 2 {
        return None;
    }
    Some(if a > b { Side::A } else { Side::B })
}

/// Run every rule in order. Returns the history entry of a match that just finished.
pub fn run(state: &mut CourtState, kort_id: &str, now: Instant, wall: &str) -> Option<HistoryEntity> {
    maybe_start_match(state, now, wall);
    update_match_timer(state, now, wall);
    maybe_update_current_set_indicator(state);
    finalize_match_if_needed(state, kort_id, now, wall)
}

/// Mark the match active once games appear on the board or the clock runs.
pub fn maybe_start_match(state: &mut CourtState, now: Instant, wall: &str) {
    if state.match_status.active {
        return;
    }
    let players = &state.players;
    let set1_started = players.a.set1 > 0 || players.b.set1 > 0;
    let first_set_games = matches!(state.current_set, None | Some(1))
        && (players.a.current_games > 0 || players.b.current_games > 0);
    if !(set1_started || first_set_games || state.match_time.running) {
        return;
    }

    state.match_status.active = true;
    state.match_time.resume(now, wall);
    if state.current_set.is_none() {
        state.current_set = Some(1);
    }
}

/// Refresh the displayed seconds and resume an automatically paused clock.
pub fn update_match_timer(state: &mut CourtState, now: Instant, wall: &str) {
    let time = &mut state.match_time;
    if state.match_status.active && !time.running && time.auto_resume && time.started_ts.is_some() {
        time.resume(now, wall);
    }
    time.refresh(now);
}

/// Move the current-set indicator forward as sets complete.
pub fn maybe_update_current_set_indicator(state: &mut CourtState) {
    let [wins_a, wins_b] = set_wins(state);
    if wins_a == 1 && wins_b == 1 {
        state.current_set = Some(3);
        return;
    }
    if wins_a >= SETS_TO_WIN || wins_b >= SETS_TO_WIN {
        if state.current_set.is_some_and(|set| set > 2) {
            state.current_set = Some(2);
        }
        return;
    }
    let next = (wins_a + wins_b + 1).min(3) as u8;
    if let Some(current) = state.current_set
        && next > current
    {
        state.current_set = Some(next);
    }
}

/// Close the match when a side holds two sets or a tie-break is over.
///
/// With one set each the tie-break is the deciding super tie-break (first to 10); otherwise a
/// regular tie-break (first to 7) ends the match. Both need a two-point margin.
pub fn finalize_match_if_needed(
    state: &mut CourtState,
    kort_id: &str,
    now: Instant,
    wall: &str,
) -> Option<HistoryEntity> {
    if !state.match_status.active {
        return None;
    }

    let wins = set_wins(state);
    let winner = if let Some(side) = Side::BOTH.into_iter().find(|side| wins[side.index()] >= SETS_TO_WIN) {
        side
    } else if wins == [1, 1] {
        let side = tie_winner(state.tie.a, state.tie.b, SUPER_TIE_BREAK_POINTS)?;
        state.log_tie(3, state.tie.a, state.tie.b);
        side
    } else {
        let side = tie_winner(state.tie.a, state.tie.b, TIE_BREAK_POINTS)?;
        let set = state.current_set.unwrap_or(1);
        state.log_tie(set, state.tie.a, state.tie.b);
        info!(kort_id, set, winner = side.letter(), "tie-break decided the match");
        side
    };

    state.match_time.pause(now);
    state.match_time.finished_ts = Some(wall.to_string());

    let sets = (1..=3u8)
        .filter_map(|set| {
            let games_a = state.players.a.set_games(set);
            let games_b = state.players.b.set_games(set);
            let tie = state.tie_for_set(set);
            (games_a + games_b > 0 || tie.is_some()).then_some(SetScoreEntity {
                set,
                games_a,
                games_b,
                tie_a: tie.map(|t| t.a),
                tie_b: tie.map(|t| t.b),
            })
        })
        .collect();

    let entry = HistoryEntity {
        id: Uuid::new_v4(),
        kort_id: kort_id.to_string(),
        player_a: state.players.a.surname.clone(),
        player_b: state.players.b.surname.clone(),
        sets,
        winner: Some(winner.letter().to_string()),
        duration_seconds: state.match_time.seconds,
        category: state.meta.category.clone(),
        phase: state.meta.phase.clone(),
        started_at: state.match_time.started_ts.clone(),
        finished_at: wall.to_string(),
    };
    info!(
        kort_id,
        winner = winner.letter(),
        duration_seconds = entry.duration_seconds,
        "match finished"
    );

    state.match_status.last_completed = Some(wall.to_string());
    state.reset_for_next_match();
    Some(entry)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    const WALL: &str = "2024-06-01T10:00:00Z";

    fn in_play() -> CourtState {
        let mut state = CourtState::default();
        state.players.a.surname = "Nadal".into();
        state.players.b.surname = "Djokovic".into();
        state.match_status.active = true;
        state.current_set = Some(1);
        state
    }

    #[test]
    fn short_set_needs_four_and_a_lead() {
        assert_eq!(set_winner(4, 3), Some(Side::A));
        assert_eq!(set_winner(3, 4), Some(Side::B));
        assert_eq!(set_winner(4, 4), None);
        assert_eq!(set_winner(3, 1), None);
    }

    #[test]
    fn first_game_starts_the_match() {
        let now = Instant::now();
        let mut state = CourtState::default();
        state.players.a.current_games = 1;
        assert!(run(&mut state, "1", now, WALL).is_none());
        assert!(state.match_status.active);
        assert!(state.match_time.running);
        assert_eq!(state.match_time.started_ts.as_deref(), Some(WALL));
        assert_eq!(state.current_set, Some(1));
    }

    #[test]
    fn games_in_later_set_do_not_start() {
        let mut state = CourtState {
            current_set: Some(2),
            ..Default::default()
        };
        state.players.b.current_games = 2;
        maybe_start_match(&mut state, Instant::now(), WALL);
        assert!(!state.match_status.active);
    }

    #[test]
    fn running_clock_starts_the_match() {
        let now = Instant::now();
        let mut state = CourtState::default();
        state.match_time.resume(now, WALL);
        maybe_start_match(&mut state, now, WALL);
        assert!(state.match_status.active);
        assert_eq!(state.current_set, Some(1));

        state.players.a.set1 = 2;
        let started = state.match_time.started_ts.clone();
        maybe_start_match(&mut state, now + Duration::from_secs(60), "2024-06-01T10:01:00Z");
        assert_eq!(state.match_time.started_ts, started, "an active match is not restarted");
    }

    #[test]
    fn auto_resume_respects_manual_pause() {
        let now = Instant::now();
        let mut state = in_play();
        state.match_time.resume(now, WALL);
        state.match_time.pause(now + Duration::from_secs(20));

        update_match_timer(&mut state, now + Duration::from_secs(30), WALL);
        assert!(state.match_time.running);
        assert_eq!(state.match_time.seconds, 20);

        state.match_time.pause(now + Duration::from_secs(40));
        state.match_time.auto_resume = false;
        update_match_timer(&mut state, now + Duration::from_secs(50), WALL);
        assert!(!state.match_time.running);
    }

    #[test]
    fn indicator_moves_forward_and_downshifts() {
        let mut state = in_play();
        state.players.a.set1 = 4;
        state.players.b.set1 = 2;
        maybe_update_current_set_indicator(&mut state);
        assert_eq!(state.current_set, Some(2));

        state.players.b.set2 = 4;
        maybe_update_current_set_indicator(&mut state);
        assert_eq!(state.current_set, Some(3));

        state.players.b.set2 = 0;
        state.players.a.set2 = 4;
        maybe_update_current_set_indicator(&mut state);
        assert_eq!(state.current_set, Some(2));
    }

    #[test]
    fn two_sets_finish_the_match() {
        let now = Instant::now();
        let mut state = in_play();
        state.players.a.set1 = 4;
        state.players.b.set1 = 1;
        state.players.a.set2 = 4;
        state.players.b.set2 = 3;
        state.meta.category = Some("U18".into());

        let entry = finalize_match_if_needed(&mut state, "2", now, WALL).unwrap();
        assert_eq!(entry.winner.as_deref(), Some("A"));
        assert_eq!(entry.player_a, "Nadal");
        assert_eq!(entry.sets.len(), 2);
        assert_eq!(entry.category.as_deref(), Some("U18"));
        assert_eq!(state.players.a.surname, "-");
        assert!(state.tie.locked);
        assert_eq!(state.match_status.last_completed.as_deref(), Some(WALL));
    }

    #[test]
    fn super_tie_break_needs_margin_of_two() {
        let now = Instant::now();
        let mut state = in_play();
        state.players.a.set1 = 4;
        state.players.b.set1 = 2;
        state.players.a.set2 = 1;
        state.players.b.set2 = 4;
        state.tie.a = 10;
        state.tie.b = 9;
        assert!(finalize_match_if_needed(&mut state, "1", now, WALL).is_none());

        state.tie.a = 12;
        let entry = finalize_match_if_needed(&mut state, "1", now, WALL).unwrap();
        let decider = entry.sets.iter().find(|set| set.set == 3).unwrap();
        assert_eq!((decider.tie_a, decider.tie_b), (Some(12), Some(9)));
    }

    #[test]
    fn regular_tie_break_finishes_the_match() {
        let now = Instant::now();
        let mut state = in_play();
        state.players.a.set1 = 3;
        state.players.b.set1 = 3;
        state.tie.visible = Some(true);
        state.tie.a = 6;
        state.tie.b = 5;
        assert!(finalize_match_if_needed(&mut state, "1", now, WALL).is_none());
        assert!(state.match_status.active);

        state.tie.a = 5;
        state.tie.b = 7;
        let entry = finalize_match_if_needed(&mut state, "1", now, WALL).unwrap();
        assert_eq!(entry.winner.as_deref(), Some("B"));
        let first = entry.sets.iter().find(|set| set.set == 1).unwrap();
        assert_eq!((first.games_a, first.games_b), (3, 3), "games are reported as received");
        assert_eq!((first.tie_a, first.tie_b), (Some(5), Some(7)));
        assert!(!state.match_status.active);
        assert!(state.tie.locked && state.tie.is_zero());
    }

    #[test]
    fn inactive_court_never_finishes() {
        let mut state = CourtState::default();
        state.players.a.set1 = 4;
        state.players.a.set2 = 4;
        assert!(finalize_match_if_needed(&mut state, "1", Instant::now(), WALL).is_none());
    }
}
