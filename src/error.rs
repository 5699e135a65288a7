//! Failure taxonomy shared by the host and client sides.

use crate::llm::LlmError;
use crate::transport::TransportError;
use crate::types::{GamePhase, PlayerId};

/// An intent the host refuses to execute. The intent is dropped, never fatal.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IntentError {
    #[error("{0} is not valid during {1:?}")]
    WrongPhase(&'static str, GamePhase),

    #[error("unknown player {0}")]
    UnknownPlayer(PlayerId),

    #[error("connection is bound to {bound}, intent names {claimed}")]
    Impersonation { bound: PlayerId, claimed: PlayerId },

    #[error("connection has not joined yet")]
    NotJoined,

    #[error("only the host can {0}")]
    NotHost(&'static str),

    #[error("submit a topic suggestion before getting ready")]
    MissingTopic,

    #[error("need at least {needed} players, have {have}")]
    NotEnoughPlayers { needed: usize, have: usize },

    #[error("an accusation is already in progress")]
    AccusationInProgress,

    #[error("{player} needs {cost} points to accuse, has {score}")]
    InsufficientPoints {
        player: PlayerId,
        cost: i32,
        score: i32,
    },

    #[error("only the active guesser can do that")]
    NotGuesser,

    #[error("guess is missing a role for {0}")]
    IncompleteGuess(PlayerId),

    #[error("guess for {0} must be a real role")]
    PendingGuess(PlayerId),

    #[error("only the accused outsider can name the topic")]
    NotAccused,

    #[error("topic guess already submitted")]
    AlreadyGuessed,

    #[error("{0} must not be empty")]
    Empty(&'static str),

    #[error("room is closed to new players mid-game")]
    RoomClosed,

    #[error("the host cannot remove themselves")]
    CannotKickHost,

    #[error("{0} is not an intent")]
    NotAnIntent(&'static str),
}

/// Inbound snapshot that does not move the mirror forward.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("stale snapshot {incoming:?} <= applied {current:?}")]
pub struct StaleStateError {
    pub incoming: (u32, u64),
    pub current: (u32, u64),
}

/// Umbrella over everything a session can run into.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("connection error: {0}")]
    Connection(#[from] TransportError),

    #[error("content generation failed: {0}")]
    Generation(#[source] LlmError),

    #[error("topic verification failed: {0}")]
    Verification(#[source] LlmError),

    #[error("invalid intent: {0}")]
    Validation(#[from] IntentError),

    #[error(transparent)]
    StaleState(#[from] StaleStateError),
}
