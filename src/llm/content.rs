//! Round content: scenarios, flavor awards and topic checks.

use super::{GenerateRequest, LlmError, LlmManager, LlmResult};
use crate::types::{Award, Player, PlayerId, Scenarios};
use async_trait::async_trait;
use rand::seq::IndexedRandom;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

/// External content the host needs while running rounds.
///
/// Every call may fail; the state machine decides what a failure means.
#[async_trait]
pub trait ContentGenerator: Send + Sync {
    /// Two near-identical scenarios sharing one hidden topic
    async fn generate_scenarios(&self, topic_hint: Option<&str>) -> LlmResult<Scenarios>;

    /// One flavor award per player, keyed by player id
    async fn generate_awards(
        &self,
        players: &[Player],
        scenarios: &Scenarios,
        winner: &str,
    ) -> LlmResult<HashMap<PlayerId, Award>>;

    /// Does `guess` name the same topic as `topic`? Meaning counts, not spelling.
    async fn verify_topic_guess(&self, topic: &str, guess: &str) -> LlmResult<bool>;
}

const SCENARIO_SYSTEM_PROMPT: &str = r#"You write prompts for a party singing game.
Produce two short scenarios (one sentence each) that share one hidden topic but differ in a
way that makes people sing or act differently. Also name the topic in two to four words.
Reply with JSON only: {"scenarioA": "...", "scenarioB": "...", "topic": "..."}"#;

const AWARDS_SYSTEM_PROMPT: &str = r#"You hand out silly end-of-round awards at a party game.
Give every listed player exactly one award. Reply with a JSON array only, one object per player,
in the same order as the list: [{"playerId": "...", "title": "...", "description": "...", "emoji": "..."}]"#;

const VERIFY_SYSTEM_PROMPT: &str = r#"You judge a guessing game. Decide whether the guess names the
same topic as the answer. Synonyms, paraphrases and minor misspellings count as a match; a related
but different topic does not. Reply with JSON only: {"match": true} or {"match": false}"#;

/// Content generator backed by the configured LLM providers
pub struct LlmContent {
    manager: LlmManager,
    timeout: Duration,
    max_tokens: u32,
}

impl LlmContent {
    pub fn new(manager: LlmManager, timeout: Duration, max_tokens: u32) -> Self {
        Self {
            manager,
            timeout,
            max_tokens,
        }
    }

    async fn ask(&self, system: &str, prompt: String) -> LlmResult<String> {
        let response = self
            .manager
            .generate(GenerateRequest {
                system: system.to_string(),
                prompt,
                max_tokens: Some(self.max_tokens),
                timeout: self.timeout,
                model_override: None,
            })
            .await?;
        Ok(response.text)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawScenarios {
    scenario_a: String,
    scenario_b: String,
    topic: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawAward {
    #[serde(default)]
    player_id: Option<String>,
    title: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    emoji: String,
}

#[derive(Debug, Deserialize)]
struct RawVerdict {
    #[serde(rename = "match")]
    matched: bool,
}

#[async_trait]
impl ContentGenerator for LlmContent {
    async fn generate_scenarios(&self, topic_hint: Option<&str>) -> LlmResult<Scenarios> {
        let prompt = match topic_hint {
            Some(hint) => format!("Base the topic loosely on this player suggestion: {}", hint),
            None => "Pick any topic that a mixed group of friends would enjoy.".to_string(),
        };
        let text = self.ask(SCENARIO_SYSTEM_PROMPT, prompt).await?;
        parse_scenarios(&text)
    }

    async fn generate_awards(
        &self,
        players: &[Player],
        scenarios: &Scenarios,
        winner: &str,
    ) -> LlmResult<HashMap<PlayerId, Award>> {
        let roster = players
            .iter()
            .enumerate()
            .map(|(i, p)| {
                format!(
                    "{}. playerId={} name={} role={}",
                    i + 1,
                    p.id,
                    p.name,
                    p.role.label()
                )
            })
            .collect::<Vec<_>>()
            .join("\n");
        let prompt = format!(
            "Topic: {}\nScenario A: {}\nScenario B: {}\nWinner: {}\nPlayers:\n{}",
            scenarios.topic, scenarios.scenario_a, scenarios.scenario_b, winner, roster
        );

        let text = self.ask(AWARDS_SYSTEM_PROMPT, prompt).await?;
        let raw: Vec<RawAward> = serde_json::from_str(extract_json(&text))
            .map_err(|e| LlmError::ParseError(format!("awards: {}", e)))?;
        Ok(map_awards(players, raw))
    }

    async fn verify_topic_guess(&self, topic: &str, guess: &str) -> LlmResult<bool> {
        if normalize(topic) == normalize(guess) {
            return Ok(true);
        }
        let prompt = format!("Answer: {}\nGuess: {}", topic, guess);
        let text = self.ask(VERIFY_SYSTEM_PROMPT, prompt).await?;
        parse_verdict(&text)
    }
}

/// Cut the JSON value out of a reply that may be wrapped in prose or a code fence
fn extract_json(text: &str) -> &str {
    let start = text.find(|c| c == '{' || c == '[');
    let end = text.rfind(|c| c == '}' || c == ']');
    match (start, end) {
        (Some(start), Some(end)) if end > start => &text[start..=end],
        _ => text.trim(),
    }
}

fn parse_scenarios(text: &str) -> LlmResult<Scenarios> {
    let raw: RawScenarios = serde_json::from_str(extract_json(text))
        .map_err(|e| LlmError::ParseError(format!("scenarios: {}", e)))?;

    let scenarios = Scenarios {
        scenario_a: raw.scenario_a.trim().to_string(),
        scenario_b: raw.scenario_b.trim().to_string(),
        topic: raw.topic.trim().to_string(),
    };
    if scenarios.scenario_a.is_empty() || scenarios.scenario_b.is_empty() || scenarios.topic.is_empty()
    {
        return Err(LlmError::ParseError("scenarios: empty field".to_string()));
    }
    Ok(scenarios)
}

fn parse_verdict(text: &str) -> LlmResult<bool> {
    if let Ok(verdict) = serde_json::from_str::<RawVerdict>(extract_json(text)) {
        return Ok(verdict.matched);
    }
    match normalize(text).as_str() {
        "yes" | "true" | "match" => Ok(true),
        "no" | "false" | "no match" => Ok(false),
        _ => Err(LlmError::ParseError(format!("verdict: {}", text))),
    }
}

/// Match awards to players by id first, then by list position. Anyone left
/// over gets the participation award.
fn map_awards(players: &[Player], raw: Vec<RawAward>) -> HashMap<PlayerId, Award> {
    let mut by_id = HashMap::new();
    let mut unmatched = Vec::new();

    for (index, award) in raw.into_iter().enumerate() {
        let RawAward {
            player_id,
            title,
            description,
            emoji,
        } = award;
        if title.trim().is_empty() {
            continue;
        }
        let award = Award {
            title: title.trim().to_string(),
            description: description.trim().to_string(),
            emoji: if emoji.trim().is_empty() {
                "🏅".to_string()
            } else {
                emoji.trim().to_string()
            },
        };
        match player_id {
            Some(id) if players.iter().any(|p| p.id == id) && !by_id.contains_key(&id) => {
                by_id.insert(id, award);
            }
            _ => unmatched.push((index, award)),
        }
    }

    for (index, award) in unmatched {
        if let Some(player) = players.get(index) {
            by_id.entry(player.id.clone()).or_insert(award);
        }
    }

    for player in players {
        by_id
            .entry(player.id.clone())
            .or_insert_with(Award::participation);
    }
    by_id
}

/// Lowercase, keep letters and digits, collapse whitespace
fn normalize(text: &str) -> String {
    text.to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Built-in content used when no LLM is configured
#[derive(Debug, Clone, Default)]
pub struct OfflineDeck;

const DECK: &[(&str, &str, &str)] = &[
    (
        "You are serenading your crush at a karaoke bar.",
        "You are singing at your best friend's karaoke birthday.",
        "Karaoke night",
    ),
    (
        "You are a pirate celebrating a huge treasure haul.",
        "You are a pirate mourning a sunken ship.",
        "Pirate shanties",
    ),
    (
        "You are the opening act at a stadium concert.",
        "You are busking in a rainy subway station.",
        "Live music",
    ),
    (
        "You are singing a lullaby to a baby dragon.",
        "You are singing a lullaby to a grumpy grandparent.",
        "Lullabies",
    ),
    (
        "You are cheering on your team in a cup final.",
        "You are singing the anthem before a cup final.",
        "Football chants",
    ),
];

impl OfflineDeck {
    pub fn new() -> Self {
        Self
    }
}

/// Pick a deck entry from a suggestion without ever reusing the suggestion
/// itself. Suggestions are public in the snapshot; the topic must not be.
fn deck_entry_for(hint: &str) -> Option<&'static (&'static str, &'static str, &'static str)> {
    if DECK.is_empty() {
        return None;
    }
    let key = normalize(hint);
    let start = key
        .bytes()
        .fold(0usize, |acc, b| acc.wrapping_mul(31).wrapping_add(b as usize))
        % DECK.len();
    (0..DECK.len())
        .map(|offset| &DECK[(start + offset) % DECK.len()])
        .find(|(_, _, topic)| normalize(topic) != key)
}

#[async_trait]
impl ContentGenerator for OfflineDeck {
    async fn generate_scenarios(&self, topic_hint: Option<&str>) -> LlmResult<Scenarios> {
        let entry = match topic_hint.map(str::trim).filter(|h| !h.is_empty()) {
            Some(hint) => deck_entry_for(hint),
            None => DECK.choose(&mut rand::rng()),
        };
        let (a, b, topic) =
            entry.ok_or_else(|| LlmError::ConfigError("offline deck is empty".to_string()))?;
        Ok(Scenarios {
            scenario_a: a.to_string(),
            scenario_b: b.to_string(),
            topic: topic.to_string(),
        })
    }

    async fn generate_awards(
        &self,
        players: &[Player],
        _scenarios: &Scenarios,
        _winner: &str,
    ) -> LlmResult<HashMap<PlayerId, Award>> {
        Ok(map_awards(players, Vec::new()))
    }

    async fn verify_topic_guess(&self, topic: &str, guess: &str) -> LlmResult<bool> {
        Ok(normalize(topic) == normalize(guess))
    }
}
