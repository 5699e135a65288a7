use crate::room::RoomCode;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Stable participant id. Survives reconnects; never a transport connection id.
pub type PlayerId = String;
/// Transient id of one transport connection.
pub type ConnectionId = String;
pub type HistoryId = String;

/// Smallest lobby the host will start a round with.
pub const MIN_PLAYERS: usize = 3;
/// Upper bound for the configurable number of tone-deaf players.
pub const MAX_TONE_DEAF_LIMIT: u32 = 2;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GamePhase {
    Lobby,
    Generating,
    Reveal,
    Playing,
    Shootout,
    Guessing,
    OutsiderGuess,
    Result,
    GameOver,
}

impl GamePhase {
    /// Phases in which the discussion is open and an accusation may start.
    pub fn is_discussion(&self) -> bool {
        matches!(self, GamePhase::Playing | GamePhase::Shootout)
    }

    /// Phases that belong to a running round.
    pub fn in_round(&self) -> bool {
        matches!(
            self,
            GamePhase::Reveal
                | GamePhase::Playing
                | GamePhase::Shootout
                | GamePhase::Guessing
                | GamePhase::OutsiderGuess
        )
    }
}

/// Secret role a player holds for one round.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    #[default]
    Pending,
    ScenarioA,
    ScenarioB,
    ToneDeaf,
}

impl Role {
    pub fn label(&self) -> &'static str {
        match self {
            Role::Pending => "Pending",
            Role::ScenarioA => "Team A",
            Role::ScenarioB => "Team B",
            Role::ToneDeaf => "Tone Deaf",
        }
    }
}

/// Whether this process owns the authoritative state or mirrors it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionRole {
    Host,
    Client,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Player {
    pub id: PlayerId,
    pub name: String,
    pub role: Role,
    pub is_host: bool,
    pub is_ready: bool,
    pub has_viewed: bool,
    pub topic_suggestion: String,
    pub has_voted: bool,
}

impl Player {
    pub fn new(id: PlayerId, name: String, is_host: bool) -> Self {
        Self {
            id,
            name,
            role: Role::Pending,
            is_host,
            is_ready: false,
            has_viewed: false,
            topic_suggestion: String::new(),
            has_voted: false,
        }
    }
}

/// Scenario texts for one round. Immutable once generated.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Scenarios {
    pub scenario_a: String,
    pub scenario_b: String,
    pub topic: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Award {
    pub title: String,
    pub description: String,
    pub emoji: String,
}

impl Award {
    /// Given to anyone the award generator could not be matched to.
    pub fn participation() -> Self {
        Self {
            title: "Showed Up".to_string(),
            description: "Was there, sang along, hit at least one note.".to_string(),
            emoji: "🎤".to_string(),
        }
    }
}

/// Which side took a round.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", content = "role", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Winner {
    /// The accuser and everyone sharing the accuser's role.
    Team(Role),
    /// Everyone who did not share the accuser's role.
    EveryoneBut(Role),
}

impl fmt::Display for Winner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Winner::Team(Role::ToneDeaf) => write!(f, "The Tone Deaf"),
            Winner::Team(role) => write!(f, "{}", role.label()),
            Winner::EveryoneBut(role) => write!(f, "Everyone but {}", role.label()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RoundHistory {
    pub id: HistoryId,
    pub topic: String,
    pub winner: Winner,
    pub timestamp: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GameResult {
    pub winner: Winner,
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guesser_id: Option<PlayerId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guesser_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guesser_role: Option<Role>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub was_correct: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub awards: Option<HashMap<PlayerId, Award>>,
}

/// Accusation that hit every role and caught an outsider, parked until the
/// outsider has had a go at naming the topic.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PendingAccusation {
    pub guesser_id: PlayerId,
    pub guesser_name: String,
    pub guesser_role: Role,
    pub outsider_id: PlayerId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic_guess: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GameMode {
    /// Fixed number of rounds.
    Rounds,
    /// First player to the target score.
    Points,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScoringScheme {
    /// Small numbers with a guess cost, shootout and outsider gambit.
    Points,
    /// Flat +200/+100/-100/+50 scheme without a guess cost.
    Fixed,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GameConfig {
    pub mode: GameMode,
    pub scoring: ScoringScheme,
    pub total_rounds: u32,
    pub target_score: i32,
    pub max_tone_deaf: u32,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            mode: GameMode::Rounds,
            scoring: ScoringScheme::Points,
            total_rounds: 5,
            target_score: 25,
            max_tone_deaf: 1,
        }
    }
}

impl GameConfig {
    /// Load game settings from environment variables, falling back to defaults
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let mode = match env_trimmed("GAME_MODE").as_deref() {
            Some("points") | Some("POINTS") => GameMode::Points,
            Some("rounds") | Some("ROUNDS") | None => GameMode::Rounds,
            Some(other) => {
                tracing::warn!("Unknown GAME_MODE '{}', using rounds", other);
                GameMode::Rounds
            }
        };

        let scoring = match env_trimmed("SCORING").as_deref() {
            Some("fixed") | Some("FIXED") => ScoringScheme::Fixed,
            Some("points") | Some("POINTS") | None => ScoringScheme::Points,
            Some(other) => {
                tracing::warn!("Unknown SCORING '{}', using points", other);
                ScoringScheme::Points
            }
        };

        Self {
            mode,
            scoring,
            total_rounds: env_trimmed("TOTAL_ROUNDS")
                .and_then(|s| s.parse().ok())
                .filter(|n| *n > 0)
                .unwrap_or(defaults.total_rounds),
            target_score: env_trimmed("TARGET_SCORE")
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.target_score),
            max_tone_deaf: env_trimmed("MAX_TONE_DEAF")
                .and_then(|s| s.parse::<u32>().ok())
                .map(|n| n.min(MAX_TONE_DEAF_LIMIT))
                .unwrap_or(defaults.max_tone_deaf),
        }
    }
}

/// Read an env var, treating blank values as unset
pub(crate) fn env_trimmed(key: &str) -> Option<String> {
    std::env::var(key).ok().and_then(|value| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    })
}

/// The replicated aggregate. Exactly one writable copy lives in the host.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GameState {
    /// Bumped once per committed mutation.
    pub seq: u64,
    /// Bumped whenever a new host takes over the session.
    pub epoch: u32,
    pub phase: GamePhase,
    pub players: Vec<Player>,
    pub scenarios: Option<Scenarios>,
    pub room_code: RoomCode,
    pub revealed_players: Vec<PlayerId>,
    pub countdown: Option<u32>,
    pub history: Vec<RoundHistory>,
    pub last_result: Option<GameResult>,
    pub guesser_id: Option<PlayerId>,
    pub pending_accusation: Option<PendingAccusation>,
    pub shootout: bool,
    pub current_round: u32,
    pub total_rounds: u32,
    pub max_tone_deaf: u32,
    pub scores: HashMap<PlayerId, i32>,
    pub config: GameConfig,
    pub error: Option<String>,
    pub notification: Option<String>,
}
