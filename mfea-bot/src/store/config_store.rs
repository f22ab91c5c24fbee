use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::json;
use url::Url;

use crate::store::kv::check_status;
use crate::store::{StateTier, StoreError};
use crate::types::PersistedState;

/// Durable config-store tier: slow to write, globally readable.
///
/// Reads hit `GET {read_url}/item/{key}` (404 is a miss); writes send an
/// upsert batch to `PATCH {write_url}`. No history support.
#[derive(Clone, Debug)]
pub struct ConfigStoreTier {
    client: Client,
    read_url: Url,
    read_token: String,
    write_url: Url,
    write_token: String,
    key: String,
}

impl ConfigStoreTier {
    pub fn new(
        client: Client,
        read_url: Url,
        read_token: impl Into<String>,
        write_url: Url,
        write_token: impl Into<String>,
        key: impl Into<String>,
    ) -> Self {
        Self {
            client,
            read_url,
            read_token: read_token.into(),
            write_url,
            write_token: write_token.into(),
            key: key.into(),
        }
    }

    fn item_url(&self) -> Result<Url, StoreError> {
        let mut url = self.read_url.clone();
        url.path_segments_mut()
            .map_err(|_| {
                StoreError::Unavailable(format!("config store url {} cannot take a path", self.read_url))
            })?
            .pop_if_empty()
            .push("item")
            .push(&self.key);
        Ok(url)
    }
}

#[async_trait]
impl StateTier for ConfigStoreTier {
    fn name(&self) -> &str {
        "config-store"
    }

    async fn read_last(&self) -> Result<Option<String>, StoreError> {
        let resp = self
            .client
            .get(self.item_url()?)
            .bearer_auth(&self.read_token)
            .send()
            .await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let value: serde_json::Value = check_status(resp).await?.json().await?;
        if value.is_null() {
            return Ok(None);
        }
        Ok(Some(value.to_string()))
    }

    async fn write_last(&self, state: &PersistedState) -> Result<(), StoreError> {
        let body = json!({
            "items": [{
                "operation": "upsert",
                "key": self.key,
                "value": state,
            }]
        });
        let resp = self
            .client
            .patch(self.write_url.clone())
            .bearer_auth(&self.write_token)
            .json(&body)
            .send()
            .await?;
        check_status(resp).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;
    use pretty_assertions::assert_eq;

    fn tier(server: &mockito::ServerGuard) -> ConfigStoreTier {
        let base = server.url();
        ConfigStoreTier::new(
            Client::new(),
            Url::parse(&format!("{base}/ecfg_test")).unwrap(),
            "read-token",
            Url::parse(&format!("{base}/v1/edge-config/ecfg_test/items")).unwrap(),
            "write-token",
            "mfea",
        )
    }

    #[tokio::test]
    async fn reads_item_value() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("GET", "/ecfg_test/item/mfea")
            .match_header("authorization", "Bearer read-token")
            .with_status(200)
            .with_body(r#"{"allocation":"100% 2x-leveraged equity"}"#)
            .create_async()
            .await;

        let raw = tier(&server).read_last().await.unwrap().unwrap();
        assert_eq!(PersistedState::decode(&raw).as_deref(), Some("100% 2x-leveraged equity"));
    }

    #[tokio::test]
    async fn missing_item_is_a_miss() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("GET", "/ecfg_test/item/mfea")
            .with_status(404)
            .create_async()
            .await;
        assert_eq!(tier(&server).read_last().await.unwrap(), None);
    }

    #[tokio::test]
    async fn write_sends_upsert_batch() {
        let mut server = mockito::Server::new_async().await;
        let m = server
            .mock("PATCH", "/v1/edge-config/ecfg_test/items")
            .match_header("authorization", "Bearer write-token")
            .match_body(Matcher::Json(json!({
                "items": [{
                    "operation": "upsert",
                    "key": "mfea",
                    "value": {"allocation": "100% unleveraged equity"},
                }]
            })))
            .with_status(200)
            .with_body(r#"{"status":"ok"}"#)
            .create_async()
            .await;

        tier(&server)
            .write_last(&PersistedState::new("100% unleveraged equity"))
            .await
            .unwrap();
        m.assert_async().await;
    }
}
