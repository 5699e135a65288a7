//! Host-authoritative game state machine.
//!
//! Every transition is a plain method on [`GameState`] that validates an intent
//! and mutates the state in place. Nothing here touches the network or awaits
//! anything: work that needs an external collaborator is returned as an
//! [`Effect`] for the host session to run, and its result is folded back in
//! through the matching `complete_*` method.

mod guard;
mod guess;
mod lobby;
mod outcome;
mod roles;
mod round;
mod score;

pub use guard::elect_successor;
pub use lobby::JoinOutcome;
pub use outcome::{is_winner, OutcomeTracker};
pub use roles::tone_deaf_cap;
pub use score::{Accusation, FixedScoring, Payouts, PointsScoring, ScoreDeltas, ScoringPolicy};

use crate::error::IntentError;
use crate::protocol::NetworkMessage;
use crate::room::RoomCode;
use crate::types::*;
use rand::Rng;
use std::collections::HashMap;

/// Work the host must run outside the state machine.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Ask the content generator for this round's scenarios
    GenerateScenarios { topic_hint: Option<String> },
    /// Check the accused outsider's topic guess
    VerifyTopic { topic: String, guess: String },
    /// A round resolved: persist it and fetch flavor awards
    RoundFinished { entry: RoundHistory },
}

impl GameState {
    /// Fresh lobby owned by `host`
    pub fn new(room_code: RoomCode, config: GameConfig, host: Player) -> Self {
        let baseline = config.scoring.policy().baseline();
        let mut scores = HashMap::new();
        scores.insert(host.id.clone(), baseline);

        Self {
            seq: 0,
            epoch: 0,
            phase: GamePhase::Lobby,
            players: vec![host],
            scenarios: None,
            room_code,
            revealed_players: Vec::new(),
            countdown: None,
            history: Vec::new(),
            last_result: None,
            guesser_id: None,
            pending_accusation: None,
            shootout: false,
            current_round: 0,
            total_rounds: config.total_rounds,
            max_tone_deaf: config.max_tone_deaf.min(MAX_TONE_DEAF_LIMIT),
            scores,
            config,
            error: None,
            notification: None,
        }
    }

    /// Ordering key for snapshots: later epochs win, then later sequence numbers
    pub fn version(&self) -> (u32, u64) {
        (self.epoch, self.seq)
    }

    pub fn player(&self, id: &str) -> Option<&Player> {
        self.players.iter().find(|p| p.id == id)
    }

    pub(crate) fn player_mut(&mut self, id: &str) -> Option<&mut Player> {
        self.players.iter_mut().find(|p| p.id == id)
    }

    pub fn host_id(&self) -> Option<&PlayerId> {
        self.players.iter().find(|p| p.is_host).map(|p| &p.id)
    }

    pub fn is_host(&self, id: &str) -> bool {
        self.player(id).map(|p| p.is_host).unwrap_or(false)
    }

    pub fn score(&self, id: &str) -> i32 {
        self.scores.get(id).copied().unwrap_or(0)
    }

    pub fn policy(&self) -> &'static dyn ScoringPolicy {
        self.config.scoring.policy()
    }

    /// Everyone present has flagged ready
    pub fn all_ready(&self) -> bool {
        !self.players.is_empty() && self.players.iter().all(|p| p.is_ready)
    }

    /// Every present player is below the guess cost, so accusations go free
    pub fn everyone_below_cost(&self) -> bool {
        match self.policy().guess_cost() {
            Some(cost) => {
                !self.players.is_empty() && self.players.iter().all(|p| self.score(&p.id) < cost)
            }
            None => false,
        }
    }

    /// Open discussion phase for the current round
    pub fn discussion_phase(&self) -> GamePhase {
        if self.shootout {
            GamePhase::Shootout
        } else {
            GamePhase::Playing
        }
    }

    /// Move to `phase`, clearing user-facing messages from the previous step
    pub(crate) fn enter(&mut self, phase: GamePhase) {
        tracing::debug!("Phase {:?} -> {:?}", self.phase, phase);
        self.phase = phase;
        self.error = None;
        self.notification = None;
    }

    /// Validate and execute one intent issued by `actor`.
    ///
    /// On `Ok` the state has changed and must be broadcast; on `Err` it is
    /// untouched.
    pub fn apply_intent<R: Rng + ?Sized>(
        &mut self,
        actor: &PlayerId,
        intent: NetworkMessage,
        rng: &mut R,
    ) -> Result<Vec<Effect>, IntentError> {
        if self.player(actor).is_none() {
            return Err(IntentError::UnknownPlayer(actor.clone()));
        }
        if intent.is_host_only() && !self.is_host(actor) {
            return Err(IntentError::NotHost(intent.kind()));
        }

        match intent {
            NetworkMessage::JoinRequest { .. }
            | NetworkMessage::StateUpdate { .. }
            | NetworkMessage::SessionClosed { .. } => {
                Err(IntentError::NotAnIntent(intent.kind()))
            }
            NetworkMessage::ToggleReady { player_id } => {
                ensure_self(actor, &player_id)?;
                self.toggle_ready(actor, rng)
            }
            NetworkMessage::SubmitTopic { player_id, topic } => {
                ensure_self(actor, &player_id)?;
                self.submit_topic(actor, topic).map(|_| Vec::new())
            }
            NetworkMessage::StartGuess { player_id } => {
                ensure_self(actor, &player_id)?;
                self.start_guess(actor).map(|_| Vec::new())
            }
            NetworkMessage::CancelGuess {} => self.cancel_guess(actor).map(|_| Vec::new()),
            NetworkMessage::SubmitGuess {
                guesses,
                guesser_id,
            } => {
                ensure_self(actor, &guesser_id)?;
                self.submit_guess(actor, &guesses)
            }
            NetworkMessage::RevealGuess { target_id } => {
                self.reveal_guess(actor, &target_id).map(|_| Vec::new())
            }
            NetworkMessage::SubmitOutsiderGuess { player_id, guess } => {
                ensure_self(actor, &player_id)?;
                self.submit_outsider_guess(actor, guess).map(|effect| vec![effect])
            }
            NetworkMessage::ResetGame {} => {
                self.reset();
                Ok(Vec::new())
            }
            NetworkMessage::StartGame {} => self.start_game(rng).map(|effect| vec![effect]),
            NetworkMessage::NextRound {} => self.next_round(rng),
            NetworkMessage::KickPlayer { player_id } => {
                if self.is_host(&player_id) {
                    return Err(IntentError::CannotKickHost);
                }
                self.remove_player(&player_id, rng)
                    .ok_or(IntentError::UnknownPlayer(player_id))
            }
        }
    }
}

fn ensure_self(actor: &PlayerId, claimed: &PlayerId) -> Result<(), IntentError> {
    if actor == claimed {
        Ok(())
    } else {
        Err(IntentError::Impersonation {
            bound: actor.clone(),
            claimed: claimed.clone(),
        })
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use rand::{rngs::StdRng, SeedableRng};

    pub fn rng() -> StdRng {
        StdRng::seed_from_u64(42)
    }

    pub fn scenarios() -> Scenarios {
        Scenarios {
            scenario_a: "You are at a karaoke bar singing a power ballad".to_string(),
            scenario_b: "You are at a karaoke bar singing a sea shanty".to_string(),
            topic: "Karaoke night".to_string(),
        }
    }

    /// Lobby with host `p1` and guests `p2..=pN`, everyone with a topic
    pub fn lobby(players: usize, config: GameConfig) -> GameState {
        let host = Player::new("p1".to_string(), "Host".to_string(), true);
        let mut state = GameState::new("AB23".parse().unwrap(), config, host);
        for i in 2..=players {
            state
                .add_player(format!("p{}", i), format!("Player {}", i))
                .unwrap();
        }
        for p in state.players.iter_mut() {
            p.topic_suggestion = format!("topic from {}", p.id);
        }
        state
    }

    /// Running round with the given roles, sitting in PLAYING
    pub fn playing(roles: &[(&str, Role)], config: GameConfig) -> GameState {
        let mut state = lobby(roles.len(), config);
        state.enter(GamePhase::Generating);
        state.complete_generation(Ok(scenarios()), &mut rng());
        for (id, role) in roles {
            state.player_mut(id).unwrap().role = *role;
        }
        state.enter(GamePhase::Playing);
        state
    }
}
