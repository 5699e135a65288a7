use super::{Accusation, Effect, GameState};
use crate::error::IntentError;
use crate::protocol::GuessMap;
use crate::types::*;

impl GameState {
    /// Open an accusation. Only one can run at a time.
    pub fn start_guess(&mut self, actor: &PlayerId) -> Result<(), IntentError> {
        if matches!(self.phase, GamePhase::Guessing | GamePhase::OutsiderGuess) {
            return Err(IntentError::AccusationInProgress);
        }
        if !self.phase.is_discussion() {
            return Err(IntentError::WrongPhase("START_GUESS", self.phase));
        }
        if !self.shootout {
            if let Some(cost) = self.policy().guess_cost() {
                let score = self.score(actor);
                if score < cost {
                    return Err(IntentError::InsufficientPoints {
                        player: actor.clone(),
                        cost,
                        score,
                    });
                }
            }
        }

        self.enter(GamePhase::Guessing);
        self.guesser_id = Some(actor.clone());
        tracing::info!("{} started an accusation", actor);
        Ok(())
    }

    /// Abandon the accusation with no scoring effect
    pub fn cancel_guess(&mut self, actor: &PlayerId) -> Result<(), IntentError> {
        if self.phase != GamePhase::Guessing {
            return Err(IntentError::WrongPhase("CANCEL_GUESS", self.phase));
        }
        if self.guesser_id.as_ref() != Some(actor) && !self.is_host(actor) {
            return Err(IntentError::NotGuesser);
        }
        self.abort_guess();
        Ok(())
    }

    pub(crate) fn abort_guess(&mut self) {
        let phase = self.discussion_phase();
        self.enter(phase);
        self.guesser_id = None;
    }

    /// Resolve the guesser's role map against the actual roles
    pub fn submit_guess(
        &mut self,
        actor: &PlayerId,
        guesses: &GuessMap,
    ) -> Result<Vec<Effect>, IntentError> {
        if self.phase != GamePhase::Guessing {
            return Err(IntentError::WrongPhase("SUBMIT_GUESS", self.phase));
        }
        if self.guesser_id.as_ref() != Some(actor) {
            return Err(IntentError::NotGuesser);
        }

        for p in self.players.iter().filter(|p| &p.id != actor) {
            match guesses.get(&p.id) {
                None => return Err(IntentError::IncompleteGuess(p.id.clone())),
                Some(Role::Pending) => return Err(IntentError::PendingGuess(p.id.clone())),
                Some(_) => {}
            }
        }

        let guesser = self
            .player(actor)
            .cloned()
            .ok_or_else(|| IntentError::UnknownPlayer(actor.clone()))?;

        if fully_correct(&self.players, actor, guesses) {
            let caught = self
                .players
                .iter()
                .find(|p| {
                    &p.id != actor
                        && p.role == Role::ToneDeaf
                        && guesses.get(&p.id) == Some(&Role::ToneDeaf)
                })
                .map(|p| p.id.clone());

            if let Some(outsider_id) = caught {
                tracing::info!(
                    "{} caught outsider {}; outsider gets a last guess",
                    actor,
                    outsider_id
                );
                self.enter(GamePhase::OutsiderGuess);
                self.pending_accusation = Some(PendingAccusation {
                    guesser_id: guesser.id.clone(),
                    guesser_name: guesser.name.clone(),
                    guesser_role: guesser.role,
                    outsider_id,
                    topic_guess: None,
                });
                return Ok(Vec::new());
            }

            let deltas = self.policy().correct(&Accusation {
                guesser_id: actor,
                guesser_role: guesser.role,
                players: &self.players,
            });
            self.apply_deltas(&deltas);

            let effect = self.finish_round(GameResult {
                winner: Winner::Team(guesser.role),
                reason: format!("{} named every role correctly", guesser.name),
                guesser_id: Some(guesser.id.clone()),
                guesser_name: Some(guesser.name.clone()),
                guesser_role: Some(guesser.role),
                was_correct: Some(true),
                awards: None,
            });
            return Ok(vec![effect]);
        }

        let deltas = self.policy().wrong(
            &Accusation {
                guesser_id: actor,
                guesser_role: guesser.role,
                players: &self.players,
            },
            self.shootout,
        );
        self.apply_deltas(&deltas);

        if !self.shootout && self.everyone_below_cost() {
            tracing::info!("Everyone is below the guess cost, entering shootout");
            self.shootout = true;
        }
        self.abort_guess();
        self.notification = Some(format!("{} got it wrong. The song goes on.", guesser.name));
        Ok(Vec::new())
    }

    /// Show one player's real role to everyone
    pub fn reveal_guess(&mut self, actor: &PlayerId, target: &PlayerId) -> Result<(), IntentError> {
        if !matches!(
            self.phase,
            GamePhase::Guessing | GamePhase::OutsiderGuess | GamePhase::Result
        ) {
            return Err(IntentError::WrongPhase("REVEAL_GUESS", self.phase));
        }
        let accuser = self
            .pending_accusation
            .as_ref()
            .map(|p| &p.guesser_id)
            .or(self.guesser_id.as_ref());
        if accuser != Some(actor) && !self.is_host(actor) {
            return Err(IntentError::NotGuesser);
        }
        if self.player(target).is_none() {
            return Err(IntentError::UnknownPlayer(target.clone()));
        }
        if !self.revealed_players.contains(target) {
            self.revealed_players.push(target.clone());
        }
        Ok(())
    }

    /// The accused outsider's shot at naming the topic
    pub fn submit_outsider_guess(
        &mut self,
        actor: &PlayerId,
        guess: String,
    ) -> Result<Effect, IntentError> {
        if self.phase != GamePhase::OutsiderGuess {
            return Err(IntentError::WrongPhase("SUBMIT_OUTSIDER_GUESS", self.phase));
        }
        let topic = self
            .scenarios
            .as_ref()
            .map(|s| s.topic.clone())
            .unwrap_or_default();
        let pending = self
            .pending_accusation
            .as_mut()
            .ok_or(IntentError::WrongPhase("SUBMIT_OUTSIDER_GUESS", GamePhase::OutsiderGuess))?;

        if &pending.outsider_id != actor {
            return Err(IntentError::NotAccused);
        }
        if pending.topic_guess.is_some() {
            return Err(IntentError::AlreadyGuessed);
        }
        let guess = guess.trim().to_string();
        if guess.is_empty() {
            return Err(IntentError::Empty("topic guess"));
        }

        pending.topic_guess = Some(guess.clone());
        Ok(Effect::VerifyTopic { topic, guess })
    }

    /// Settle the outsider gambit. A verification error counts as no match.
    pub fn complete_verification(&mut self, result: Result<bool, String>) -> Option<Effect> {
        if self.phase != GamePhase::OutsiderGuess {
            tracing::warn!("Dropping topic verification during {:?}", self.phase);
            return None;
        }
        let matched = match result {
            Ok(matched) => matched,
            Err(e) => {
                tracing::warn!("Topic verification failed, treating as no match: {}", e);
                self.error = Some("Could not check the topic guess; counted as a miss.".to_string());
                false
            }
        };
        self.settle_outsider(matched)
    }

    /// Resolve the parked accusation in favour of the outsider (`matched`) or the accuser
    pub(crate) fn settle_outsider(&mut self, matched: bool) -> Option<Effect> {
        let pending = self.pending_accusation.take()?;
        let error = self.error.take();
        let outsider_name = self
            .player(&pending.outsider_id)
            .map(|p| p.name.clone())
            .unwrap_or_else(|| "The outsider".to_string());
        let acc = Accusation {
            guesser_id: &pending.guesser_id,
            guesser_role: pending.guesser_role,
            players: &self.players,
        };

        let result = if matched {
            let deltas = self.policy().outsider_steal(&acc, &pending.outsider_id);
            self.apply_deltas(&deltas);
            GameResult {
                winner: Winner::Team(Role::ToneDeaf),
                reason: format!("{} was caught but named the topic", outsider_name),
                guesser_id: Some(pending.guesser_id.clone()),
                guesser_name: Some(pending.guesser_name.clone()),
                guesser_role: Some(pending.guesser_role),
                was_correct: Some(false),
                awards: None,
            }
        } else {
            let deltas = self.policy().outsider_caught(&acc, &pending.outsider_id);
            self.apply_deltas(&deltas);
            GameResult {
                winner: Winner::Team(pending.guesser_role),
                reason: format!(
                    "{} caught {}, who missed the topic",
                    pending.guesser_name, outsider_name
                ),
                guesser_id: Some(pending.guesser_id.clone()),
                guesser_name: Some(pending.guesser_name.clone()),
                guesser_role: Some(pending.guesser_role),
                was_correct: Some(true),
                awards: None,
            }
        };

        let effect = self.finish_round(result);
        self.error = error;
        Some(effect)
    }
}

/// Every player other than the guesser was assigned exactly their real role
pub(crate) fn fully_correct(players: &[Player], guesser: &str, guesses: &GuessMap) -> bool {
    players
        .iter()
        .filter(|p| p.id != guesser)
        .all(|p| guesses.get(&p.id) == Some(&p.role))
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use crate::protocol::NetworkMessage;

    fn table() -> GameState {
        playing(
            &[
                ("p1", Role::ScenarioA),
                ("p2", Role::ScenarioA),
                ("p3", Role::ScenarioB),
                ("p4", Role::ToneDeaf),
            ],
            GameConfig::default(),
        )
    }

    fn guess(entries: &[(&str, Role)]) -> GuessMap {
        entries.iter().map(|(id, r)| (id.to_string(), *r)).collect()
    }

    fn id(s: &str) -> PlayerId {
        s.to_string()
    }

    #[test]
    fn test_fully_correct_detection() {
        let state = table();
        let exact = guess(&[
            ("p1", Role::ScenarioA),
            ("p2", Role::ScenarioA),
            ("p3", Role::ScenarioB),
            ("p4", Role::ToneDeaf),
        ]);
        assert!(fully_correct(&state.players, "p1", &exact));

        for (target, wrong) in [
            ("p2", Role::ScenarioB),
            ("p3", Role::ToneDeaf),
            ("p4", Role::ScenarioA),
        ] {
            let mut off = exact.clone();
            off.insert(target.to_string(), wrong);
            assert!(!fully_correct(&state.players, "p1", &off));
        }
    }

    #[test]
    fn test_second_accusation_blocked() {
        let mut state = table();
        state.start_guess(&id("p1")).unwrap();
        assert_eq!(state.phase, GamePhase::Guessing);
        assert_eq!(state.start_guess(&id("p2")), Err(IntentError::AccusationInProgress));
        assert_eq!(state.guesser_id, Some(id("p1")));
    }

    #[test]
    fn test_guess_cost_enforced_outside_shootout() {
        let mut state = table();
        state.scores.insert(id("p2"), 2);
        assert!(matches!(
            state.start_guess(&id("p2")),
            Err(IntentError::InsufficientPoints { cost: 3, score: 2, .. })
        ));

        state.shootout = true;
        state.enter(GamePhase::Shootout);
        assert!(state.start_guess(&id("p2")).is_ok());
    }

    #[test]
    fn test_cancel_only_while_guessing() {
        let mut state = table();
        assert!(state.cancel_guess(&id("p1")).is_err());

        state.start_guess(&id("p2")).unwrap();
        assert_eq!(state.cancel_guess(&id("p3")), Err(IntentError::NotGuesser));
        let before = state.scores.clone();
        state.cancel_guess(&id("p2")).unwrap();
        assert_eq!(state.phase, GamePhase::Playing);
        assert_eq!(state.guesser_id, None);
        assert_eq!(state.scores, before);
    }

    #[test]
    fn test_incomplete_guess_ignored() {
        let mut state = table();
        state.start_guess(&id("p1")).unwrap();
        let before = state.clone();
        let result = state.submit_guess(&id("p1"), &guess(&[("p2", Role::ScenarioA)]));
        assert!(matches!(result, Err(IntentError::IncompleteGuess(_))));
        assert_eq!(state, before);
    }

    #[test]
    fn test_correct_guess_without_outsider_resolves_round() {
        let mut state = playing(
            &[
                ("p1", Role::ScenarioA),
                ("p2", Role::ScenarioA),
                ("p3", Role::ScenarioB),
                ("p4", Role::ScenarioB),
            ],
            GameConfig::default(),
        );
        state.start_guess(&id("p1")).unwrap();
        let effects = state
            .submit_guess(
                &id("p1"),
                &guess(&[
                    ("p2", Role::ScenarioA),
                    ("p3", Role::ScenarioB),
                    ("p4", Role::ScenarioB),
                ]),
            )
            .unwrap();

        assert_eq!(state.phase, GamePhase::Result);
        assert_eq!(state.score("p1"), 15);
        assert_eq!(state.score("p2"), 11);
        assert_eq!(state.score("p3"), 10);
        assert_eq!(state.history.len(), 1);
        assert_eq!(state.revealed_players.len(), 4);
        let result = state.last_result.as_ref().unwrap();
        assert_eq!(result.winner, Winner::Team(Role::ScenarioA));
        assert_eq!(result.was_correct, Some(true));
        assert!(matches!(effects.as_slice(), [Effect::RoundFinished { .. }]));
    }

    #[test]
    fn test_correct_guess_with_outsider_routes_to_gambit() {
        let mut state = table();
        state.start_guess(&id("p1")).unwrap();
        let effects = state
            .submit_guess(
                &id("p1"),
                &guess(&[
                    ("p2", Role::ScenarioA),
                    ("p3", Role::ScenarioB),
                    ("p4", Role::ToneDeaf),
                ]),
            )
            .unwrap();

        assert!(effects.is_empty());
        assert_eq!(state.phase, GamePhase::OutsiderGuess);
        let pending = state.pending_accusation.as_ref().unwrap();
        assert_eq!(pending.outsider_id, "p4");
        assert_eq!(pending.guesser_id, "p1");
        // No scoring before the outsider has guessed
        assert_eq!(state.score("p1"), 10);
    }

    #[test]
    fn test_outsider_steals_on_match() {
        let mut state = table();
        state.start_guess(&id("p1")).unwrap();
        state
            .submit_guess(
                &id("p1"),
                &guess(&[
                    ("p2", Role::ScenarioA),
                    ("p3", Role::ScenarioB),
                    ("p4", Role::ToneDeaf),
                ]),
            )
            .unwrap();

        assert_eq!(
            state.submit_outsider_guess(&id("p2"), "karaoke".into()),
            Err(IntentError::NotAccused)
        );
        let effect = state
            .submit_outsider_guess(&id("p4"), "  karaoke  ".into())
            .unwrap();
        assert_eq!(
            effect,
            Effect::VerifyTopic {
                topic: "Karaoke night".into(),
                guess: "karaoke".into()
            }
        );
        assert_eq!(
            state.submit_outsider_guess(&id("p4"), "again".into()),
            Err(IntentError::AlreadyGuessed)
        );

        let effect = state.complete_verification(Ok(true));
        assert!(matches!(effect, Some(Effect::RoundFinished { .. })));
        assert_eq!(state.phase, GamePhase::Result);
        assert_eq!(state.score("p4"), 18);
        assert_eq!(state.score("p1"), 10);
        let result = state.last_result.as_ref().unwrap();
        assert_eq!(result.winner, Winner::Team(Role::ToneDeaf));
        assert_eq!(result.was_correct, Some(false));
    }

    #[test]
    fn test_outsider_miss_or_verification_error_rewards_accuser() {
        let mut state = table();
        state.start_guess(&id("p1")).unwrap();
        state
            .submit_guess(
                &id("p1"),
                &guess(&[
                    ("p2", Role::ScenarioA),
                    ("p3", Role::ScenarioB),
                    ("p4", Role::ToneDeaf),
                ]),
            )
            .unwrap();
        state.submit_outsider_guess(&id("p4"), "cooking".into()).unwrap();

        state.complete_verification(Err("timeout".into()));
        assert_eq!(state.phase, GamePhase::Result);
        assert!(state.error.is_some());
        assert_eq!(state.score("p1"), 13);
        assert_eq!(state.score("p2"), 11);
        assert_eq!(state.score("p4"), 7);
        assert_eq!(state.last_result.as_ref().unwrap().was_correct, Some(true));
    }

    #[test]
    fn test_correct_guess_naming_no_outsider_when_none_exists() {
        // Nobody is tone deaf, so a perfect accusation scores immediately
        let mut state = playing(
            &[("p1", Role::ScenarioA), ("p2", Role::ScenarioB), ("p3", Role::ScenarioB)],
            GameConfig::default(),
        );
        state.start_guess(&id("p2")).unwrap();
        state
            .submit_guess(&id("p2"), &guess(&[("p1", Role::ScenarioA), ("p3", Role::ScenarioB)]))
            .unwrap();
        assert_eq!(state.phase, GamePhase::Result);
        assert_eq!(state.score("p2"), 15);
        assert_eq!(state.score("p3"), 11);
    }

    #[test]
    fn test_wrong_guess_scores_and_returns_to_playing() {
        let mut state = table();
        state.start_guess(&id("p1")).unwrap();
        state
            .submit_guess(
                &id("p1"),
                &guess(&[
                    ("p2", Role::ScenarioB),
                    ("p3", Role::ScenarioA),
                    ("p4", Role::ToneDeaf),
                ]),
            )
            .unwrap();

        assert_eq!(state.phase, GamePhase::Playing);
        assert_eq!(state.guesser_id, None);
        assert_eq!(state.score("p1"), 7);
        assert_eq!(state.score("p2"), 9);
        assert_eq!(state.score("p3"), 11);
        assert_eq!(state.score("p4"), 11);
        assert!(state.notification.is_some());
        assert!(state.history.is_empty());
    }

    #[test]
    fn test_wrong_guess_enters_shootout_when_everyone_is_broke() {
        let mut state = table();
        for id in ["p1", "p2", "p3", "p4"] {
            state.scores.insert(id.to_string(), 3);
        }
        state.scores.insert(id("p3"), 1);
        state.scores.insert(id("p4"), 1);

        state.start_guess(&id("p1")).unwrap();
        state
            .submit_guess(
                &id("p1"),
                &guess(&[
                    ("p2", Role::ToneDeaf),
                    ("p3", Role::ScenarioA),
                    ("p4", Role::ScenarioB),
                ]),
            )
            .unwrap();
        // p1: 0, p2: 2, p3: 2, p4: 2 -> all below 3
        assert!(state.shootout);
        assert_eq!(state.phase, GamePhase::Shootout);

        // Guessing from shootout costs nothing and comes back to shootout
        state.start_guess(&id("p1")).unwrap();
        state
            .submit_guess(
                &id("p1"),
                &guess(&[
                    ("p2", Role::ToneDeaf),
                    ("p3", Role::ScenarioA),
                    ("p4", Role::ScenarioB),
                ]),
            )
            .unwrap();
        assert_eq!(state.score("p1"), 0);
        assert_eq!(state.phase, GamePhase::Shootout);
    }

    #[test]
    fn test_reveal_guess_is_idempotent() {
        let mut state = table();
        state.start_guess(&id("p1")).unwrap();
        state.reveal_guess(&id("p1"), &id("p3")).unwrap();
        state.reveal_guess(&id("p1"), &id("p3")).unwrap();
        assert_eq!(state.revealed_players, vec![id("p3")]);
        assert_eq!(state.reveal_guess(&id("p2"), &id("p4")), Err(IntentError::NotGuesser));

        let result = state.apply_intent(
            &id("p1"),
            NetworkMessage::RevealGuess {
                target_id: id("nobody"),
            },
            &mut rng(),
        );
        assert_eq!(result, Err(IntentError::UnknownPlayer(id("nobody"))));
    }
}
