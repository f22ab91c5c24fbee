use async_trait::async_trait;
use parking_lot::Mutex;

use crate::store::{StateTier, StoreError};
use crate::types::{PersistedState, SnapshotRecord};

/// In-process tier for dry runs and tests. Lives as long as the process.
#[derive(Debug, Default)]
pub struct MemoryTier {
    name: String,
    raw: Mutex<Option<String>>,
    writes: Mutex<usize>,
    history: Mutex<Vec<SnapshotRecord>>,
}

impl MemoryTier {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn seeded(name: impl Into<String>, allocation: &str) -> Self {
        let tier = Self::new(name);
        tier.set_raw(&format!(
            r#"{{"allocation":{}}}"#,
            serde_json::Value::String(allocation.to_string())
        ));
        tier
    }

    /// Overwrite the stored payload without counting a write.
    pub fn set_raw(&self, raw: &str) {
        *self.raw.lock() = Some(raw.to_string());
    }

    pub fn current(&self) -> Option<String> {
        self.raw.lock().as_deref().and_then(PersistedState::decode)
    }

    pub fn write_count(&self) -> usize {
        *self.writes.lock()
    }

    pub fn history(&self) -> Vec<SnapshotRecord> {
        self.history.lock().clone()
    }
}

#[async_trait]
impl StateTier for MemoryTier {
    fn name(&self) -> &str {
        &self.name
    }

    async fn read_last(&self) -> Result<Option<String>, StoreError> {
        Ok(self.raw.lock().clone())
    }

    async fn write_last(&self, state: &PersistedState) -> Result<(), StoreError> {
        let encoded = state.encode()?;
        *self.raw.lock() = Some(encoded);
        *self.writes.lock() += 1;
        Ok(())
    }

    async fn append_snapshot(&self, record: &SnapshotRecord) -> Result<(), StoreError> {
        self.history.lock().push(record.clone());
        Ok(())
    }
}
