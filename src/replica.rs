//! Local mirror of the replicated game state.

use crate::error::StaleStateError;
use crate::types::{GameState, SessionRole};

/// What happened to an inbound snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// The mirror now holds the snapshot
    Applied,
    /// This peer is the host; its own copy is the source of truth
    IgnoredByHost,
}

/// A peer's copy of the game state.
///
/// Clients replace the whole mirror on every accepted snapshot and never
/// mutate it otherwise. Snapshots are ordered by `(epoch, seq)`; anything not
/// strictly newer than what is already applied is discarded, so duplicates are
/// no-ops and reordered deliveries never roll the mirror back.
#[derive(Debug, Clone)]
pub struct Replica {
    role: SessionRole,
    state: Option<GameState>,
}

impl Replica {
    pub fn new(role: SessionRole) -> Self {
        Self { role, state: None }
    }

    /// Mirror seeded with a known state, e.g. a client promoted to host
    pub fn with_state(role: SessionRole, state: GameState) -> Self {
        Self {
            role,
            state: Some(state),
        }
    }

    pub fn role(&self) -> SessionRole {
        self.role
    }

    pub fn state(&self) -> Option<&GameState> {
        self.state.as_ref()
    }

    pub fn into_state(self) -> Option<GameState> {
        self.state
    }

    /// Version of the applied snapshot, `None` before the first one
    pub fn version(&self) -> Option<(u32, u64)> {
        self.state.as_ref().map(GameState::version)
    }

    /// Apply a `STATE_UPDATE` snapshot
    pub fn apply(&mut self, incoming: GameState) -> Result<ApplyOutcome, StaleStateError> {
        if self.role == SessionRole::Host {
            tracing::debug!("Host ignoring inbound snapshot {:?}", incoming.version());
            return Ok(ApplyOutcome::IgnoredByHost);
        }

        if let Some(current) = self.version() {
            if incoming.version() <= current {
                return Err(StaleStateError {
                    incoming: incoming.version(),
                    current,
                });
            }
        }

        self.state = Some(incoming);
        Ok(ApplyOutcome::Applied)
    }
}
