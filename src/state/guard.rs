use super::{Effect, GameState};
use crate::error::IntentError;
use crate::types::*;
use rand::Rng;

/// Pick the peer that takes over after `departed` (the old host) is gone.
///
/// Every mirror runs the same rule on the same snapshot, so they all agree
/// without talking to each other: the lowest remaining player id wins.
pub fn elect_successor(state: &GameState, departed: &str) -> Option<PlayerId> {
    state
        .players
        .iter()
        .filter(|p| p.id != departed && !p.is_host)
        .map(|p| &p.id)
        .min()
        .cloned()
}

impl GameState {
    /// Drop a participant whose connection went away. Returns `None` if the
    /// id is not on the roster.
    ///
    /// The score entry stays so the table keeps their history.
    pub fn remove_player<R: Rng + ?Sized>(
        &mut self,
        id: &str,
        rng: &mut R,
    ) -> Option<Vec<Effect>> {
        let index = self.players.iter().position(|p| p.id == id)?;
        let player = self.players.remove(index);
        self.revealed_players.retain(|p| p != id);
        tracing::info!("Player {} ({}) left during {:?}", player.id, player.name, self.phase);

        let mut effects = Vec::new();
        match self.phase {
            GamePhase::Guessing if self.guesser_id.as_deref() == Some(id) => {
                self.abort_guess();
                self.notification = Some(format!(
                    "{} left in the middle of an accusation.",
                    player.name
                ));
            }
            GamePhase::OutsiderGuess => {
                let outsider_left = self
                    .pending_accusation
                    .as_ref()
                    .map(|p| p.outsider_id == id)
                    .unwrap_or(false);
                if outsider_left {
                    // No guess is coming; the accuser takes the round
                    effects.extend(self.settle_outsider(false));
                }
            }
            _ => {}
        }

        effects.extend(self.drive_stuck(rng));
        Some(effects)
    }

    /// Re-run any transition whose trigger already happened but did not fire.
    ///
    /// Safe to call after every change: it does nothing unless the state is
    /// sitting in a condition that should already have moved it on.
    pub fn drive_stuck<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Vec<Effect> {
        match self.phase {
            GamePhase::Lobby if self.players.len() >= MIN_PLAYERS && self.all_ready() => {
                vec![self.begin_generation(rng)]
            }
            GamePhase::Reveal if self.all_ready() => {
                self.advance_reveal();
                Vec::new()
            }
            GamePhase::Guessing => {
                let guesser_present = self
                    .guesser_id
                    .as_ref()
                    .map(|g| self.player(g).is_some())
                    .unwrap_or(false);
                if !guesser_present {
                    self.abort_guess();
                }
                Vec::new()
            }
            _ => Vec::new(),
        }
    }

    /// Everyone has seen their role: clear the flags and open discussion
    fn advance_reveal(&mut self) {
        for p in self.players.iter_mut() {
            p.is_ready = false;
        }
        self.shootout = self.everyone_below_cost();
        let next = self.discussion_phase();
        tracing::info!("All roles viewed, moving to {:?}", next);
        self.enter(next);
    }

    /// Background work the current phase is waiting on.
    ///
    /// A host that inherits a session (or restarts its jobs) calls this to
    /// resume generation or topic verification that the old host had started.
    pub fn pending_work<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<Effect> {
        use rand::seq::IndexedRandom;

        match self.phase {
            GamePhase::Generating => {
                let suggestions: Vec<&str> = self
                    .players
                    .iter()
                    .map(|p| p.topic_suggestion.trim())
                    .filter(|t| !t.is_empty())
                    .collect();
                Some(Effect::GenerateScenarios {
                    topic_hint: suggestions.choose(rng).map(|t| t.to_string()),
                })
            }
            GamePhase::OutsiderGuess => {
                let guess = self.pending_accusation.as_ref()?.topic_guess.clone()?;
                let topic = self.scenarios.as_ref()?.topic.clone();
                Some(Effect::VerifyTopic { topic, guess })
            }
            _ => None,
        }
    }

    /// Hand the session to `new_host` after the old host disappeared.
    ///
    /// The old host is removed like any other departed player, the epoch is
    /// bumped so every mirror prefers the new host's snapshots, and any stalled
    /// transition is re-driven.
    pub fn promote<R: Rng + ?Sized>(
        &mut self,
        new_host: &str,
        rng: &mut R,
    ) -> Result<Vec<Effect>, IntentError> {
        if self.player(new_host).is_none() {
            return Err(IntentError::UnknownPlayer(new_host.to_string()));
        }

        let mut effects = Vec::new();
        let old_hosts: Vec<PlayerId> = self
            .players
            .iter()
            .filter(|p| p.is_host && p.id != new_host)
            .map(|p| p.id.clone())
            .collect();
        for old in &old_hosts {
            if let Some(more) = self.remove_player(old, rng) {
                effects.extend(more);
            }
        }

        let name = match self.player_mut(new_host) {
            Some(player) => {
                player.is_host = true;
                player.name.clone()
            }
            None => return Err(IntentError::UnknownPlayer(new_host.to_string())),
        };
        self.epoch += 1;
        tracing::info!("{} took over as host (epoch {})", new_host, self.epoch);

        let notice = format!("{} is now hosting.", name);
        self.notification = Some(match self.notification.take() {
            Some(previous) => format!("{} {}", previous, notice),
            None => notice,
        });

        effects.extend(self.drive_stuck(rng));
        Ok(effects)
    }
}
