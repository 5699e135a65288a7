use super::{Effect, GameState};
use crate::error::IntentError;
use crate::types::*;
use rand::Rng;

/// Result of a join request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinOutcome {
    /// New participant added to the roster
    Joined,
    /// Id already on the roster; the connection was re-attached
    Resumed,
}

/// Maximum characters kept from a display name or topic
const MAX_TEXT_CHARS: usize = 80;

fn clean(text: &str) -> String {
    text.trim().chars().take(MAX_TEXT_CHARS).collect()
}

impl GameState {
    /// Add a participant, or recognise a returning one by id
    pub fn add_player(&mut self, id: PlayerId, name: String) -> Result<JoinOutcome, IntentError> {
        if id.trim().is_empty() {
            return Err(IntentError::Empty("player id"));
        }
        if self.player(&id).is_some() {
            tracing::info!("Player {} resumed", id);
            return Ok(JoinOutcome::Resumed);
        }
        if self.phase != GamePhase::Lobby {
            return Err(IntentError::RoomClosed);
        }

        let name = match clean(&name) {
            n if n.is_empty() => {
                petname::petname(2, " ").unwrap_or_else(|| "Mystery Singer".to_string())
            }
            n => n,
        };

        let baseline = self.policy().baseline();
        self.scores.entry(id.clone()).or_insert(baseline);
        tracing::info!("Player {} joined as '{}'", id, name);
        self.players.push(Player::new(id, name, false));
        Ok(JoinOutcome::Joined)
    }

    /// Flip the ready flag. In the lobby this needs a topic suggestion; during
    /// the reveal it acknowledges that the player has seen their role.
    pub fn toggle_ready<R: Rng + ?Sized>(
        &mut self,
        actor: &PlayerId,
        rng: &mut R,
    ) -> Result<Vec<Effect>, IntentError> {
        let phase = self.phase;
        let player = self
            .player_mut(actor)
            .ok_or_else(|| IntentError::UnknownPlayer(actor.clone()))?;

        match phase {
            GamePhase::Lobby => {
                if !player.is_ready && player.topic_suggestion.trim().is_empty() {
                    return Err(IntentError::MissingTopic);
                }
                player.is_ready = !player.is_ready;
            }
            GamePhase::Reveal => {
                player.is_ready = !player.is_ready;
                player.has_viewed = true;
            }
            other => return Err(IntentError::WrongPhase("TOGGLE_READY", other)),
        }

        Ok(self.drive_stuck(rng))
    }

    /// Store a topic suggestion for the next generated round
    pub fn submit_topic(&mut self, actor: &PlayerId, topic: String) -> Result<(), IntentError> {
        if !matches!(self.phase, GamePhase::Lobby | GamePhase::Result) {
            return Err(IntentError::WrongPhase("SUBMIT_TOPIC", self.phase));
        }
        let in_lobby = self.phase == GamePhase::Lobby;
        let player = self
            .player_mut(actor)
            .ok_or_else(|| IntentError::UnknownPlayer(actor.clone()))?;

        player.topic_suggestion = clean(&topic);
        if in_lobby && player.topic_suggestion.is_empty() {
            // Readiness depends on having a suggestion
            player.is_ready = false;
        }
        Ok(())
    }

    /// Host override: start without waiting for everyone to be ready
    pub fn start_game<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Result<Effect, IntentError> {
        if self.phase != GamePhase::Lobby {
            return Err(IntentError::WrongPhase("START_GAME", self.phase));
        }
        if self.players.len() < MIN_PLAYERS {
            return Err(IntentError::NotEnoughPlayers {
                needed: MIN_PLAYERS,
                have: self.players.len(),
            });
        }
        Ok(self.begin_generation(rng))
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use crate::protocol::NetworkMessage;

    #[test]
    fn test_join_and_resume() {
        let mut state = lobby(1, GameConfig::default());
        assert_eq!(
            state.add_player("p2".into(), "  Bea  ".into()),
            Ok(JoinOutcome::Joined)
        );
        assert_eq!(state.player("p2").unwrap().name, "Bea");
        assert_eq!(state.score("p2"), 10);

        assert_eq!(
            state.add_player("p2".into(), "Someone else".into()),
            Ok(JoinOutcome::Resumed)
        );
        assert_eq!(state.players.len(), 2);
        assert_eq!(state.player("p2").unwrap().name, "Bea");
    }

    #[test]
    fn test_blank_name_gets_generated() {
        let mut state = lobby(1, GameConfig::default());
        state.add_player("p2".into(), "   ".into()).unwrap();
        assert!(!state.player("p2").unwrap().name.is_empty());
    }

    #[test]
    fn test_mid_game_join_refused_but_resume_allowed() {
        let mut state = playing(
            &[("p1", Role::ScenarioA), ("p2", Role::ScenarioB), ("p3", Role::ScenarioA)],
            GameConfig::default(),
        );
        assert_eq!(
            state.add_player("p9".into(), "Late".into()),
            Err(IntentError::RoomClosed)
        );
        assert_eq!(
            state.add_player("p2".into(), "Again".into()),
            Ok(JoinOutcome::Resumed)
        );
    }

    #[test]
    fn test_ready_requires_topic() {
        let mut state = lobby(3, GameConfig::default());
        state.player_mut("p2").unwrap().topic_suggestion.clear();
        assert_eq!(
            state.toggle_ready(&"p2".to_string(), &mut rng()),
            Err(IntentError::MissingTopic)
        );

        state.submit_topic(&"p2".to_string(), "Space travel".into()).unwrap();
        state.toggle_ready(&"p2".to_string(), &mut rng()).unwrap();
        assert!(state.player("p2").unwrap().is_ready);

        // Clearing the topic drops readiness
        state.submit_topic(&"p2".to_string(), "   ".into()).unwrap();
        assert!(!state.player("p2").unwrap().is_ready);
    }

    #[test]
    fn test_all_ready_with_three_starts_generation() {
        let mut state = lobby(3, GameConfig::default());
        let mut rng = rng();
        assert!(state.toggle_ready(&"p1".to_string(), &mut rng).unwrap().is_empty());
        assert!(state.toggle_ready(&"p2".to_string(), &mut rng).unwrap().is_empty());
        let effects = state.toggle_ready(&"p3".to_string(), &mut rng).unwrap();

        assert_eq!(state.phase, GamePhase::Generating);
        match effects.as_slice() {
            [Effect::GenerateScenarios { topic_hint: Some(hint) }] => {
                assert!(hint.starts_with("topic from p"));
            }
            other => panic!("unexpected effects {:?}", other),
        }
    }

    #[test]
    fn test_two_ready_players_wait_in_lobby() {
        let mut state = lobby(2, GameConfig::default());
        let mut rng = rng();
        state.toggle_ready(&"p1".to_string(), &mut rng).unwrap();
        let effects = state.toggle_ready(&"p2".to_string(), &mut rng).unwrap();
        assert!(effects.is_empty());
        assert_eq!(state.phase, GamePhase::Lobby);
    }

    #[test]
    fn test_force_start_needs_three() {
        let mut state = lobby(2, GameConfig::default());
        assert_eq!(
            state.apply_intent(&"p1".to_string(), NetworkMessage::StartGame {}, &mut rng()),
            Err(IntentError::NotEnoughPlayers { needed: 3, have: 2 })
        );

        state.add_player("p3".into(), "C".into()).unwrap();
        let effects = state
            .apply_intent(&"p1".to_string(), NetworkMessage::StartGame {}, &mut rng())
            .unwrap();
        assert_eq!(effects.len(), 1);
        assert_eq!(state.phase, GamePhase::Generating);
    }

    #[test]
    fn test_ready_outside_lobby_or_reveal_rejected() {
        let mut state = playing(
            &[("p1", Role::ScenarioA), ("p2", Role::ScenarioB), ("p3", Role::ScenarioA)],
            GameConfig::default(),
        );
        assert_eq!(
            state.toggle_ready(&"p2".to_string(), &mut rng()),
            Err(IntentError::WrongPhase("TOGGLE_READY", GamePhase::Playing))
        );
    }
}
