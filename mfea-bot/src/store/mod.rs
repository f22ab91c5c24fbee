//! State Store: priority-ordered, independently-optional persistence tiers.
//!
//! Reads stop at the first tier holding a well-formed record. Writes and
//! history appends fan out to every tier; a tier failure is logged and reported
//! but never blocks the other tiers or fails the call.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use serde::Serialize;
use thiserror::Error;
use tokio::task::JoinHandle;

use crate::types::{PersistedState, SnapshotRecord};

pub mod config_store;
pub mod file;
pub mod kv;
pub mod memory;

pub use config_store::ConfigStoreTier;
pub use file::FileTier;
pub use kv::KvTier;
pub use memory::MemoryTier;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("unexpected status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("unable to access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("serialization failed: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("{0}")]
    Unavailable(String),
}

/// One persistence backend.
///
/// `read_last` returns the raw stored payload; the store decides whether it is
/// a well-formed [`PersistedState`].
#[async_trait]
pub trait StateTier: Send + Sync {
    fn name(&self) -> &str;

    async fn read_last(&self) -> Result<Option<String>, StoreError>;

    async fn write_last(&self, state: &PersistedState) -> Result<(), StoreError>;

    /// Tiers without history support keep the default no-op.
    async fn append_snapshot(&self, _record: &SnapshotRecord) -> Result<(), StoreError> {
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct TierOutcome {
    pub tier: String,
    pub error: Option<String>,
}

/// Per-tier result of one `write_last`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct WriteReport {
    pub outcomes: Vec<TierOutcome>,
}

impl WriteReport {
    pub fn attempted(&self) -> usize {
        self.outcomes.len()
    }

    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.error.is_none()).count()
    }

    pub fn failures(&self) -> impl Iterator<Item = &TierOutcome> {
        self.outcomes.iter().filter(|o| o.error.is_some())
    }
}

#[derive(Clone, Default)]
pub struct StateStore {
    tiers: Vec<Arc<dyn StateTier>>,
}

impl std::fmt::Debug for StateStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateStore")
            .field("tiers", &self.tiers.iter().map(|t| t.name()).collect::<Vec<_>>())
            .finish()
    }
}

impl StateStore {
    /// Tiers are queried in the given order; put the local file last.
    pub fn new(tiers: Vec<Arc<dyn StateTier>>) -> Self {
        Self { tiers }
    }

    pub fn with_tier(mut self, tier: Arc<dyn StateTier>) -> Self {
        self.tiers.push(tier);
        self
    }

    pub fn tier_names(&self) -> Vec<&str> {
        self.tiers.iter().map(|t| t.name()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.tiers.is_empty()
    }

    pub async fn read_last(&self) -> Option<String> {
        for tier in &self.tiers {
            match tier.read_last().await {
                Ok(Some(raw)) => match PersistedState::decode(&raw) {
                    Some(allocation) => {
                        tracing::debug!(tier = tier.name(), %allocation, "state read");
                        return Some(allocation);
                    }
                    None => {
                        tracing::warn!(tier = tier.name(), payload = %raw, "ignoring malformed state record");
                    }
                },
                Ok(None) => {
                    tracing::debug!(tier = tier.name(), "state tier miss");
                }
                Err(e) => {
                    tracing::warn!(tier = tier.name(), error = %e, "state tier read failed");
                }
            }
        }
        None
    }

    pub async fn write_last(&self, allocation: &str) -> WriteReport {
        let state = PersistedState::new(allocation);
        let writes = self.tiers.iter().map(|tier| {
            let state = &state;
            async move {
                let error = match tier.write_last(state).await {
                    Ok(()) => {
                        tracing::info!(tier = tier.name(), allocation = %state.allocation, "state written");
                        None
                    }
                    Err(e) => {
                        tracing::error!(tier = tier.name(), error = %e, "state tier write failed");
                        Some(e.to_string())
                    }
                };
                TierOutcome {
                    tier: tier.name().to_string(),
                    error,
                }
            }
        });
        WriteReport {
            outcomes: join_all(writes).await,
        }
    }

    /// Fire-and-forget history append. The handle may be dropped; failures are
    /// logged inside the task.
    pub fn append_snapshot(&self, allocation: &str, timestamp: DateTime<Utc>) -> JoinHandle<()> {
        let record = SnapshotRecord {
            allocation: allocation.to_string(),
            timestamp,
        };
        let tiers = self.tiers.clone();
        tokio::spawn(async move {
            for tier in tiers {
                if let Err(e) = tier.append_snapshot(&record).await {
                    tracing::warn!(tier = tier.name(), error = %e, "snapshot append failed");
                }
            }
        })
    }
}
