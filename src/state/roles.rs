use super::{Effect, GameState};
use crate::types::*;
use rand::seq::{IndexedRandom, SliceRandom};
use rand::Rng;

/// Highest tone-deaf count allowed for `player_count` players.
///
/// Small lobbies get at most one outsider; otherwise at least two players must
/// be left for the scenario teams.
pub fn tone_deaf_cap(player_count: usize, max_tone_deaf: u32) -> usize {
    let max = max_tone_deaf as usize;
    if player_count <= 3 {
        max.min(1).min(player_count)
    } else {
        max.min(player_count - 2)
    }
}

impl GameState {
    /// Enter GENERATING and ask for scenarios, biased by one uniformly chosen
    /// non-empty topic suggestion
    pub(crate) fn begin_generation<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Effect {
        let suggestions: Vec<&str> = self
            .players
            .iter()
            .map(|p| p.topic_suggestion.trim())
            .filter(|t| !t.is_empty())
            .collect();
        let topic_hint = suggestions.choose(rng).map(|t| t.to_string());

        self.enter(GamePhase::Generating);
        tracing::info!(
            "Generating scenarios for round {} (hint: {:?})",
            self.current_round + 1,
            topic_hint
        );
        Effect::GenerateScenarios { topic_hint }
    }

    /// Fold the generator's answer back in. Returns false when the state has
    /// moved on and the result was dropped.
    pub fn complete_generation<R: Rng + ?Sized>(
        &mut self,
        result: Result<Scenarios, String>,
        rng: &mut R,
    ) -> bool {
        if self.phase != GamePhase::Generating {
            tracing::warn!("Dropping scenarios that arrived during {:?}", self.phase);
            return false;
        }

        match result {
            Ok(_) if self.players.len() < MIN_PLAYERS => {
                tracing::warn!(
                    "Only {} players left while generating, back to the lobby",
                    self.players.len()
                );
                self.back_to_lobby();
                self.notification = Some(format!(
                    "Need at least {} players to start a round.",
                    MIN_PLAYERS
                ));
            }
            Ok(scenarios) => {
                let baseline = self.policy().baseline();
                for p in &self.players {
                    self.scores.entry(p.id.clone()).or_insert(baseline);
                }

                self.scenarios = Some(scenarios);
                self.current_round += 1;
                self.assign_roles(rng);

                self.revealed_players.clear();
                self.countdown = None;
                self.last_result = None;
                self.guesser_id = None;
                self.pending_accusation = None;
                self.shootout = false;
                for p in self.players.iter_mut() {
                    p.is_ready = false;
                    p.has_viewed = false;
                }
                self.enter(GamePhase::Reveal);
                tracing::info!("Round {} revealed", self.current_round);
            }
            Err(e) => {
                tracing::error!("Scenario generation failed: {}", e);
                for p in self.players.iter_mut() {
                    p.is_ready = false;
                }
                self.enter(GamePhase::Lobby);
                self.error = Some(format!("Could not write this round's scenarios: {}", e));
            }
        }
        true
    }

    /// Shuffle everyone and deal TONE_DEAF first, then split the rest into
    /// SCENARIO_A (first half, rounded down) and SCENARIO_B
    pub(crate) fn assign_roles<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        let count = self.players.len();
        let cap = tone_deaf_cap(count, self.max_tone_deaf);
        let tone_deaf = rng.random_range(0..=cap);

        let mut order: Vec<usize> = (0..count).collect();
        order.shuffle(rng);

        let (outsiders, rest) = order.split_at(tone_deaf);
        let (team_a, team_b) = rest.split_at(rest.len() / 2);

        for &i in outsiders {
            self.players[i].role = Role::ToneDeaf;
        }
        for &i in team_a {
            self.players[i].role = Role::ScenarioA;
        }
        for &i in team_b {
            self.players[i].role = Role::ScenarioB;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use rand::{rngs::StdRng, SeedableRng};

    fn count(state: &GameState, role: Role) -> usize {
        state.players.iter().filter(|p| p.role == role).count()
    }

    #[test]
    fn test_cap_rules() {
        assert_eq!(tone_deaf_cap(3, 2), 1);
        assert_eq!(tone_deaf_cap(3, 0), 0);
        assert_eq!(tone_deaf_cap(4, 2), 2);
        assert_eq!(tone_deaf_cap(4, 1), 1);
        assert_eq!(tone_deaf_cap(8, 2), 2);
    }

    #[test]
    fn test_role_assignment_counts() {
        for players in 3..=8 {
            for max in 0..=2u32 {
                for seed in 0..25u64 {
                    let mut state = lobby(
                        players,
                        GameConfig {
                            max_tone_deaf: max,
                            ..GameConfig::default()
                        },
                    );
                    state.assign_roles(&mut StdRng::seed_from_u64(seed));

                    let deaf = count(&state, Role::ToneDeaf);
                    let a = count(&state, Role::ScenarioA);
                    let b = count(&state, Role::ScenarioB);

                    assert!(deaf <= tone_deaf_cap(players, max));
                    assert!(deaf <= max as usize);
                    assert_eq!(deaf + a + b, players);
                    assert_eq!(count(&state, Role::Pending), 0);
                    // A gets the rounded-down half
                    assert!(b >= a && b - a <= 1, "a={} b={}", a, b);
                }
            }
        }
    }

    #[test]
    fn test_role_assignment_eventually_uses_full_cap() {
        let mut seen = std::collections::HashSet::new();
        for seed in 0..200u64 {
            let mut state = lobby(
                6,
                GameConfig {
                    max_tone_deaf: 2,
                    ..GameConfig::default()
                },
            );
            state.assign_roles(&mut StdRng::seed_from_u64(seed));
            seen.insert(count(&state, Role::ToneDeaf));
        }
        assert_eq!(seen, [0, 1, 2].into_iter().collect());
    }

    #[test]
    fn test_generation_success_enters_reveal() {
        let mut state = lobby(4, GameConfig::default());
        state.last_result = None;
        state.player_mut("p2").unwrap().is_ready = true;
        state.enter(GamePhase::Generating);

        assert!(state.complete_generation(Ok(scenarios()), &mut rng()));
        assert_eq!(state.phase, GamePhase::Reveal);
        assert_eq!(state.current_round, 1);
        assert_eq!(state.scenarios, Some(scenarios()));
        assert!(state.players.iter().all(|p| !p.is_ready && p.role != Role::Pending));
        assert!(state.guesser_id.is_none());
        assert!(state.revealed_players.is_empty());
    }

    #[test]
    fn test_generation_failure_returns_to_lobby() {
        let mut state = lobby(4, GameConfig::default());
        for p in state.players.iter_mut() {
            p.is_ready = true;
        }
        state.enter(GamePhase::Generating);

        assert!(state.complete_generation(Err("model returned junk".into()), &mut rng()));
        assert_eq!(state.phase, GamePhase::Lobby);
        assert_eq!(state.current_round, 0);
        assert!(state.error.as_deref().unwrap().contains("model returned junk"));
        assert!(state.players.iter().all(|p| !p.is_ready));
    }

    #[test]
    fn test_generation_with_too_few_players_returns_to_lobby() {
        let mut state = lobby(3, GameConfig::default());
        state.enter(GamePhase::Generating);
        state.remove_player("p3", &mut rng()).unwrap();
        assert_eq!(state.phase, GamePhase::Generating);

        assert!(state.complete_generation(Ok(scenarios()), &mut rng()));
        assert_eq!(state.phase, GamePhase::Lobby);
        assert_eq!(state.current_round, 0);
        assert!(state.scenarios.is_none());
        assert!(state.players.iter().all(|p| p.role == Role::Pending));
        assert!(state.notification.as_deref().unwrap().contains("at least 3"));
    }

    #[test]
    fn test_late_generation_result_dropped() {
        let mut state = lobby(4, GameConfig::default());
        assert!(!state.complete_generation(Ok(scenarios()), &mut rng()));
        assert_eq!(state.phase, GamePhase::Lobby);
        assert!(state.scenarios.is_none());
    }
}
