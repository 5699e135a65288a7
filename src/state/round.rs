use super::{Effect, GameState};
use crate::error::IntentError;
use crate::types::*;
use rand::Rng;
use std::collections::HashMap;

impl GameState {
    /// Close the round: append history, reveal everyone and show the result
    pub(crate) fn finish_round(&mut self, result: GameResult) -> Effect {
        let entry = RoundHistory {
            id: ulid::Ulid::new().to_string(),
            topic: self
                .scenarios
                .as_ref()
                .map(|s| s.topic.clone())
                .unwrap_or_default(),
            winner: result.winner,
            timestamp: chrono::Utc::now().to_rfc3339(),
        };
        tracing::info!(
            "Round {} over: {} ({})",
            self.current_round,
            entry.winner,
            result.reason
        );

        self.history.push(entry.clone());
        self.last_result = Some(result);
        self.revealed_players = self.players.iter().map(|p| p.id.clone()).collect();
        for p in self.players.iter_mut() {
            p.has_voted = false;
            p.is_ready = false;
        }
        self.guesser_id = None;
        self.pending_accusation = None;
        self.enter(GamePhase::Result);

        Effect::RoundFinished { entry }
    }

    /// Attach flavor awards to the result they were generated for.
    /// Returns false if the session has moved past that round.
    pub fn attach_awards(&mut self, history_id: &str, awards: HashMap<PlayerId, Award>) -> bool {
        let current = self.history.last().map(|h| h.id.as_str());
        if current != Some(history_id)
            || !matches!(self.phase, GamePhase::Result | GamePhase::GameOver)
        {
            return false;
        }
        match self.last_result.as_mut() {
            Some(result) => {
                result.awards = Some(awards);
                true
            }
            None => false,
        }
    }

    /// The configured end condition has been met. In points mode a player
    /// who reached the target and then left still ends the game.
    pub fn game_finished(&self) -> bool {
        match self.config.mode {
            GameMode::Rounds => self.current_round >= self.total_rounds,
            GameMode::Points => self
                .scores
                .values()
                .any(|score| *score >= self.config.target_score),
        }
    }

    /// Host control from RESULT: next round, or the end of the game
    pub fn next_round<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Result<Vec<Effect>, IntentError> {
        if self.phase != GamePhase::Result {
            return Err(IntentError::WrongPhase("NEXT_ROUND", self.phase));
        }

        if self.game_finished() {
            self.enter(GamePhase::GameOver);
            tracing::info!("Game over after {} rounds", self.current_round);
            return Ok(Vec::new());
        }

        if self.players.len() < MIN_PLAYERS {
            self.back_to_lobby();
            self.notification = Some(format!(
                "Need at least {} players for another round.",
                MIN_PLAYERS
            ));
            return Ok(Vec::new());
        }

        Ok(vec![self.begin_generation(rng)])
    }

    pub(super) fn back_to_lobby(&mut self) {
        for p in self.players.iter_mut() {
            p.role = Role::Pending;
            p.is_ready = false;
            p.has_viewed = false;
            p.has_voted = false;
        }
        self.revealed_players.clear();
        self.countdown = None;
        self.guesser_id = None;
        self.pending_accusation = None;
        self.shootout = false;
        self.enter(GamePhase::Lobby);
    }

    /// Back to a fresh lobby. Scores return to baseline; history is kept.
    pub fn reset(&mut self) {
        let baseline = self.policy().baseline();
        for score in self.scores.values_mut() {
            *score = baseline;
        }
        self.back_to_lobby();
        self.scenarios = None;
        self.last_result = None;
        self.current_round = 0;
        tracing::info!("Game reset");
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;

    fn finished_round(config: GameConfig) -> GameState {
        let mut state = playing(
            &[("p1", Role::ScenarioA), ("p2", Role::ScenarioA), ("p3", Role::ScenarioB)],
            config,
        );
        state.finish_round(GameResult {
            winner: Winner::Team(Role::ScenarioA),
            reason: "test".into(),
            guesser_id: Some("p1".into()),
            guesser_name: Some("Host".into()),
            guesser_role: Some(Role::ScenarioA),
            was_correct: Some(true),
            awards: None,
        });
        state
    }

    #[test]
    fn test_finish_round_records_history() {
        let state = finished_round(GameConfig::default());
        assert_eq!(state.phase, GamePhase::Result);
        assert_eq!(state.history.len(), 1);
        assert_eq!(state.history[0].topic, "Karaoke night");
        assert_eq!(state.revealed_players.len(), 3);
        assert!(state.players.iter().all(|p| !p.has_voted));
    }

    #[test]
    fn test_awards_attach_only_to_their_round() {
        let mut state = finished_round(GameConfig::default());
        let mut awards = HashMap::new();
        awards.insert("p1".to_string(), Award::participation());

        assert!(!state.attach_awards("some-other-round", awards.clone()));
        let id = state.history[0].id.clone();
        assert!(state.attach_awards(&id, awards));
        assert!(state.last_result.as_ref().unwrap().awards.is_some());
    }

    #[test]
    fn test_next_round_or_game_over_in_rounds_mode() {
        let mut state = finished_round(GameConfig {
            total_rounds: 2,
            ..GameConfig::default()
        });
        let effects = state.next_round(&mut rng()).unwrap();
        assert_eq!(state.phase, GamePhase::Generating);
        assert!(matches!(effects.as_slice(), [Effect::GenerateScenarios { .. }]));

        state.complete_generation(Ok(scenarios()), &mut rng());
        assert_eq!(state.current_round, 2);
        state.enter(GamePhase::Result);
        assert!(state.next_round(&mut rng()).unwrap().is_empty());
        assert_eq!(state.phase, GamePhase::GameOver);
    }

    #[test]
    fn test_points_mode_ends_at_target() {
        let mut state = finished_round(GameConfig {
            mode: GameMode::Points,
            target_score: 20,
            ..GameConfig::default()
        });
        assert!(!state.game_finished());
        state.scores.insert("p3".into(), 20);
        assert!(state.game_finished());
        state.next_round(&mut rng()).unwrap();
        assert_eq!(state.phase, GamePhase::GameOver);
    }

    #[test]
    fn test_departed_player_at_target_ends_points_game() {
        let mut state = finished_round(GameConfig {
            mode: GameMode::Points,
            target_score: 20,
            ..GameConfig::default()
        });
        state.scores.insert("p3".into(), 21);
        state.remove_player("p3", &mut rng()).unwrap();
        assert!(state.player("p3").is_none());

        assert!(state.game_finished());
        state.next_round(&mut rng()).unwrap();
        assert_eq!(state.phase, GamePhase::GameOver);
    }

    #[test]
    fn test_next_round_only_from_result() {
        let mut state = lobby(3, GameConfig::default());
        assert_eq!(
            state.next_round(&mut rng()),
            Err(IntentError::WrongPhase("NEXT_ROUND", GamePhase::Lobby))
        );
    }

    #[test]
    fn test_reset_restores_baseline_and_lobby() {
        let mut state = finished_round(GameConfig::default());
        state.scores.insert("p1".into(), 42);
        state.scores.insert("gone".into(), 3);
        state.enter(GamePhase::GameOver);

        state.reset();
        assert_eq!(state.phase, GamePhase::Lobby);
        assert_eq!(state.current_round, 0);
        assert!(state.last_result.is_none());
        assert!(state.scores.values().all(|s| *s == 10));
        assert!(state
            .players
            .iter()
            .all(|p| p.role == Role::Pending && !p.is_ready));
        assert_eq!(state.history.len(), 1);
    }
}
