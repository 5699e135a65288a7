//! Durable history and award records.
//!
//! The session only appends and queries; both stores are append-only. Write
//! failures are logged by the caller and never block the game.

use crate::types::{Award, PlayerId, RoundHistory};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("storage I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("storage data is corrupt: {0}")]
    Serde(#[from] serde_json::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// One award given to one user
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StatsRecord {
    pub user_id: PlayerId,
    pub award: Award,
    /// What the award was for, usually the round topic
    pub context: String,
    pub timestamp: String,
}

/// Global round history
#[async_trait]
pub trait HistoryStore: Send + Sync {
    async fn save(&self, entry: &RoundHistory) -> StoreResult<()>;

    /// Most recent entries first
    async fn query_recent(&self, limit: usize) -> StoreResult<Vec<RoundHistory>>;
}

/// Per-user award log
#[async_trait]
pub trait StatsStore: Send + Sync {
    async fn save_award(&self, user_id: &str, award: &Award, context: &str) -> StoreResult<()>;

    async fn query_all(&self, user_id: &str) -> StoreResult<Vec<StatsRecord>>;
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
struct Records {
    #[serde(default)]
    history: Vec<RoundHistory>,
    #[serde(default)]
    stats: Vec<StatsRecord>,
}

impl Records {
    fn recent(&self, limit: usize) -> Vec<RoundHistory> {
        self.history.iter().rev().take(limit).cloned().collect()
    }

    fn awards_for(&self, user_id: &str) -> Vec<StatsRecord> {
        self.stats
            .iter()
            .filter(|r| r.user_id == user_id)
            .cloned()
            .collect()
    }

    fn record_award(&mut self, user_id: &str, award: &Award, context: &str) {
        self.stats.push(StatsRecord {
            user_id: user_id.to_string(),
            award: award.clone(),
            context: context.to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        });
    }
}

/// Process-local store; forgets everything on exit
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: Mutex<Records>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl HistoryStore for MemoryStore {
    async fn save(&self, entry: &RoundHistory) -> StoreResult<()> {
        self.records.lock().await.history.push(entry.clone());
        Ok(())
    }

    async fn query_recent(&self, limit: usize) -> StoreResult<Vec<RoundHistory>> {
        Ok(self.records.lock().await.recent(limit))
    }
}

#[async_trait]
impl StatsStore for MemoryStore {
    async fn save_award(&self, user_id: &str, award: &Award, context: &str) -> StoreResult<()> {
        self.records.lock().await.record_award(user_id, award, context);
        Ok(())
    }

    async fn query_all(&self, user_id: &str) -> StoreResult<Vec<StatsRecord>> {
        Ok(self.records.lock().await.awards_for(user_id))
    }
}

/// Single JSON document on disk, rewritten on every append
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    records: Mutex<Records>,
}

impl JsonFileStore {
    /// Open `path`, starting empty if it does not exist yet
    pub async fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref().to_path_buf();
        let records = match tokio::fs::read_to_string(&path).await {
            Ok(json) => serde_json::from_str(&json)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Records::default(),
            Err(e) => return Err(e.into()),
        };
        tracing::info!(
            "Opened history store {} ({} rounds)",
            path.display(),
            records.history.len()
        );
        Ok(Self {
            path,
            records: Mutex::new(records),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn persist(&self, records: &Records) -> StoreResult<()> {
        let json = serde_json::to_string_pretty(records)?;
        // Write-then-rename so a crash never leaves a half-written file
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl HistoryStore for JsonFileStore {
    async fn save(&self, entry: &RoundHistory) -> StoreResult<()> {
        let mut records = self.records.lock().await;
        records.history.push(entry.clone());
        self.persist(&records).await
    }

    async fn query_recent(&self, limit: usize) -> StoreResult<Vec<RoundHistory>> {
        Ok(self.records.lock().await.recent(limit))
    }
}

#[async_trait]
impl StatsStore for JsonFileStore {
    async fn save_award(&self, user_id: &str, award: &Award, context: &str) -> StoreResult<()> {
        let mut records = self.records.lock().await;
        records.record_award(user_id, award, context);
        self.persist(&records).await
    }

    async fn query_all(&self, user_id: &str) -> StoreResult<Vec<StatsRecord>> {
        Ok(self.records.lock().await.awards_for(user_id))
    }
}
