//! Room codes, peer addresses and join links.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Safe character set for room codes (no I, 1, O or 0)
pub const CODE_CHARS: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
pub const CODE_LENGTH: usize = 4;

/// Query parameter carrying the room code in a join link
pub const CODE_PARAM: &str = "code";

/// A 4-character shareable room code, stored uppercase.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RoomCode(String);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RoomCodeError {
    #[error("room code must be {CODE_LENGTH} characters, got {0}")]
    Length(usize),

    #[error("room code contains invalid character '{0}'")]
    InvalidChar(char),
}

impl RoomCode {
    /// Draw a fresh random code
    pub fn generate<R: Rng + ?Sized>(rng: &mut R) -> Self {
        let code = (0..CODE_LENGTH)
            .map(|_| CODE_CHARS[rng.random_range(0..CODE_CHARS.len())] as char)
            .collect();
        Self(code)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Deterministic discovery address for this room under an app namespace,
    /// so a joiner can compute the host's address from the code alone.
    pub fn peer_address(&self, namespace: &str) -> String {
        format!("{}-{}", namespace, self.0)
    }

    /// Build a shareable join link: `base?code=XXXX`.
    /// Returns `None` when `base` is not an absolute URL.
    pub fn join_url(&self, base: &str) -> Option<String> {
        let mut url = reqwest::Url::parse(base).ok()?;
        url.query_pairs_mut().append_pair(CODE_PARAM, &self.0);
        Some(url.to_string())
    }
}

/// Extract a room code from a join link, for pre-filling the join form.
/// Never joins by itself.
pub fn code_from_url(url: &str) -> Option<RoomCode> {
    let parsed = reqwest::Url::parse(url).ok()?;
    let code = parsed
        .query_pairs()
        .find(|(key, _)| key == CODE_PARAM)
        .map(|(_, value)| value.into_owned())?;
    code.parse().ok()
}

impl FromStr for RoomCode {
    type Err = RoomCodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_ascii_uppercase();
        let len = upper.chars().count();
        if len != CODE_LENGTH {
            return Err(RoomCodeError::Length(len));
        }
        if let Some(bad) = upper
            .chars()
            .find(|c| !c.is_ascii() || !CODE_CHARS.contains(&(*c as u8)))
        {
            return Err(RoomCodeError::InvalidChar(bad));
        }
        Ok(Self(upper))
    }
}

impl TryFrom<String> for RoomCode {
    type Error = RoomCodeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<RoomCode> for String {
    fn from(code: RoomCode) -> Self {
        code.0
    }
}

impl fmt::Display for RoomCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
