use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;

use crate::store::{StateTier, StoreError};
use crate::types::{PersistedState, SnapshotRecord};

/// Per-process sequence that keeps concurrent writers off each other's temp file.
static TEMP_SEQ: AtomicU64 = AtomicU64::new(0);

/// Local JSON file. Ground truth for same-host continuity.
///
/// The state file is replaced atomically (write temp file, then rename) so a
/// crash mid-write leaves the previous record intact. Every write gets its own
/// temp file, so overlapping invocations never rename each other's partial
/// bytes into place. History is JSON lines.
#[derive(Clone, Debug)]
pub struct FileTier {
    path: PathBuf,
    history_path: Option<PathBuf>,
}

impl FileTier {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            history_path: None,
        }
    }

    pub fn with_history(mut self, path: impl Into<PathBuf>) -> Self {
        self.history_path = Some(path.into());
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "state".into());
        let seq = TEMP_SEQ.fetch_add(1, Ordering::Relaxed);
        name.push(format!(".{}.{seq}.tmp", std::process::id()));
        self.path.with_file_name(name)
    }
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> StoreError + '_ {
    move |source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    }
}

async fn ensure_parent(path: &Path) -> Result<(), StoreError> {
    match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => {
            tokio::fs::create_dir_all(dir).await.map_err(io_err(dir))
        }
        _ => Ok(()),
    }
}

#[async_trait]
impl StateTier for FileTier {
    fn name(&self) -> &str {
        "file"
    }

    async fn read_last(&self) -> Result<Option<String>, StoreError> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => Ok(Some(raw)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(io_err(&self.path)(e)),
        }
    }

    async fn write_last(&self, state: &PersistedState) -> Result<(), StoreError> {
        let encoded = state.encode()?;
        ensure_parent(&self.path).await?;
        let tmp = self.temp_path();
        if let Err(e) = tokio::fs::write(&tmp, encoded.as_bytes()).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(io_err(&tmp)(e));
        }
        if let Err(e) = tokio::fs::rename(&tmp, &self.path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(io_err(&self.path)(e));
        }
        Ok(())
    }

    async fn append_snapshot(&self, record: &SnapshotRecord) -> Result<(), StoreError> {
        let Some(path) = &self.history_path else {
            return Ok(());
        };
        let mut line = serde_json::to_string(record)?;
        line.push('\n');
        ensure_parent(path).await?;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
            .map_err(io_err(path))?;
        file.write_all(line.as_bytes()).await.map_err(io_err(path))?;
        file.flush().await.map_err(io_err(path))
    }
}
