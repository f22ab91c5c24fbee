use std::path::PathBuf;

use async_trait::async_trait;

use crate::notify::{dedup_ordered, NotifyError, SubscriberRegistry};
use crate::types::SubscriberId;

/// Fixed list, usually from configuration.
#[derive(Clone, Debug, Default)]
pub struct StaticRegistry {
    ids: Vec<SubscriberId>,
}

impl StaticRegistry {
    pub fn new(ids: impl IntoIterator<Item = SubscriberId>) -> Self {
        Self {
            ids: dedup_ordered(ids),
        }
    }
}

#[async_trait]
impl SubscriberRegistry for StaticRegistry {
    async fn subscribers(&self) -> Result<Vec<SubscriberId>, NotifyError> {
        Ok(self.ids.clone())
    }
}

/// JSON array of ids maintained by the chat integration's subscribe/unsubscribe
/// handlers. A missing file means nobody has subscribed yet.
#[derive(Clone, Debug)]
pub struct FileRegistry {
    path: PathBuf,
}

impl FileRegistry {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl SubscriberRegistry for FileRegistry {
    async fn subscribers(&self) -> Result<Vec<SubscriberId>, NotifyError> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(NotifyError::Io {
                    path: self.path.display().to_string(),
                    source,
                })
            }
        };
        let ids: Vec<SubscriberId> = serde_json::from_str(&raw)?;
        Ok(dedup_ordered(ids))
    }
}
