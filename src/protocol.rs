use crate::types::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One role guess per accused player.
pub type GuessMap = HashMap<PlayerId, Role>;

/// The only unit ever sent over the transport. Serialized as
/// `{"type": "SUBMIT_GUESS", "payload": {...}}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(
    tag = "type",
    content = "payload",
    rename_all = "SCREAMING_SNAKE_CASE",
    rename_all_fields = "camelCase"
)]
pub enum NetworkMessage {
    /// Client -> host, once, right after the connection opens
    JoinRequest { name: String, player_id: PlayerId },
    /// Host -> all, full snapshot after every mutation
    StateUpdate { state: Box<GameState> },
    /// Host -> one client, just before the host closes that connection
    SessionClosed { reason: String },
    ToggleReady { player_id: PlayerId },
    SubmitTopic { player_id: PlayerId, topic: String },
    StartGuess { player_id: PlayerId },
    CancelGuess {},
    SubmitGuess { guesses: GuessMap, guesser_id: PlayerId },
    RevealGuess { target_id: PlayerId },
    /// Accused outsider's last-chance guess at the exact topic
    SubmitOutsiderGuess { player_id: PlayerId, guess: String },
    ResetGame {},
    // Host-only controls
    StartGame {},
    NextRound {},
    KickPlayer { player_id: PlayerId },
}

impl NetworkMessage {
    pub fn state_update(state: &GameState) -> Self {
        NetworkMessage::StateUpdate {
            state: Box::new(state.clone()),
        }
    }

    /// Whether only the host player may issue this intent
    pub fn is_host_only(&self) -> bool {
        matches!(
            self,
            NetworkMessage::ResetGame {}
                | NetworkMessage::StartGame {}
                | NetworkMessage::NextRound {}
                | NetworkMessage::KickPlayer { .. }
        )
    }

    /// Short name for logs
    pub fn kind(&self) -> &'static str {
        match self {
            NetworkMessage::JoinRequest { .. } => "JOIN_REQUEST",
            NetworkMessage::StateUpdate { .. } => "STATE_UPDATE",
            NetworkMessage::SessionClosed { .. } => "SESSION_CLOSED",
            NetworkMessage::ToggleReady { .. } => "TOGGLE_READY",
            NetworkMessage::SubmitTopic { .. } => "SUBMIT_TOPIC",
            NetworkMessage::StartGuess { .. } => "START_GUESS",
            NetworkMessage::CancelGuess {} => "CANCEL_GUESS",
            NetworkMessage::SubmitGuess { .. } => "SUBMIT_GUESS",
            NetworkMessage::RevealGuess { .. } => "REVEAL_GUESS",
            NetworkMessage::SubmitOutsiderGuess { .. } => "SUBMIT_OUTSIDER_GUESS",
            NetworkMessage::ResetGame {} => "RESET_GAME",
            NetworkMessage::StartGame {} => "START_GAME",
            NetworkMessage::NextRound {} => "NEXT_ROUND",
            NetworkMessage::KickPlayer { .. } => "KICK_PLAYER",
        }
    }
}
