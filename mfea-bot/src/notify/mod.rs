//! Notification dispatch and subscriber lookup.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::SubscriberId;

pub mod message;
pub mod registry;
pub mod webhook;

pub use message::{Button, StatusMessage};
pub use registry::{FileRegistry, StaticRegistry};
pub use webhook::{LogNotifier, WebhookNotifier};

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("platform rejected message with status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("unable to read subscriber registry {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed payload: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("{0}")]
    Unavailable(String),
}

/// Platform-assigned id of a sent message.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(pub String);

#[async_trait]
pub trait NotificationSink: Send + Sync {
    /// Returns the message id when the platform reports one.
    async fn send(&self, message: &StatusMessage) -> Result<Option<MessageId>, NotifyError>;

    async fn edit(&self, id: &MessageId, message: &StatusMessage) -> Result<(), NotifyError>;
}

#[async_trait]
pub trait SubscriberRegistry: Send + Sync {
    /// Ordered, duplicate-free subscriber ids.
    async fn subscribers(&self) -> Result<Vec<SubscriberId>, NotifyError>;
}

/// Collapse duplicates keeping the first occurrence.
pub fn dedup_ordered(ids: impl IntoIterator<Item = SubscriberId>) -> Vec<SubscriberId> {
    let mut seen = std::collections::HashSet::new();
    ids.into_iter().filter(|id| seen.insert(id.clone())).collect()
}
