use crate::types::*;
use std::collections::HashSet;

/// Did `viewer` win the round summarised in `state.last_result`?
///
/// `None` when there is no result yet, the result has no accuser, or the
/// viewer is not on the roster.
pub fn is_winner(state: &GameState, viewer: &str) -> Option<bool> {
    let result = state.last_result.as_ref()?;
    let guesser_role = result.guesser_role?;
    let correct = result.was_correct?;
    let me = state.player(viewer)?;

    let is_guesser = result.guesser_id.as_deref() == Some(viewer);
    let same_side = is_guesser || (guesser_role != Role::ToneDeaf && me.role == guesser_role);

    Some(if correct { same_side } else { !same_side })
}

/// Local win/loss counter fed from replicated snapshots.
///
/// Each finished game is counted once no matter how many times its final
/// snapshot is re-delivered.
#[derive(Debug, Default, Clone)]
pub struct OutcomeTracker {
    pub wins: u32,
    pub losses: u32,
    counted: HashSet<String>,
}

impl OutcomeTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the viewer's outcome if `state` is a game end not seen before.
    /// Returns the outcome that was recorded.
    pub fn observe(&mut self, state: &GameState, viewer: &str) -> Option<bool> {
        if state.phase != GamePhase::GameOver {
            return None;
        }
        let last_round = state.history.last()?;
        let key = format!("{}:{}", state.room_code, last_round.id);
        if self.counted.contains(&key) {
            return None;
        }

        let won = is_winner(state, viewer)?;
        self.counted.insert(key);
        if won {
            self.wins += 1;
        } else {
            self.losses += 1;
        }
        tracing::debug!("Recorded {} for {}", if won { "win" } else { "loss" }, viewer);
        Some(won)
    }
}
