use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::Deserialize;
use url::Url;

use crate::store::{StateTier, StoreError};
use crate::types::{PersistedState, SnapshotRecord};

/// Fast remote key-value tier speaking a Redis-over-REST dialect:
/// `GET /get/{key}` -> `{"result": "<payload>"|null}`, `POST /set/{key}` and
/// `POST /lpush/{key}` with the payload as request body.
#[derive(Clone, Debug)]
pub struct KvTier {
    client: Client,
    base: Url,
    token: String,
    key: String,
    history_key: Option<String>,
}

#[derive(Debug, Deserialize)]
struct KvReply {
    result: Option<String>,
}

impl KvTier {
    pub fn new(client: Client, base: Url, token: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            client,
            base,
            token: token.into(),
            key: key.into(),
            history_key: None,
        }
    }

    pub fn with_history_key(mut self, key: impl Into<String>) -> Self {
        self.history_key = Some(key.into());
        self
    }

    fn endpoint(&self, command: &str, key: &str) -> Result<Url, StoreError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| StoreError::Unavailable(format!("kv url {} cannot take a path", self.base)))?
            .pop_if_empty()
            .push(command)
            .push(key);
        Ok(url)
    }

    async fn command(&self, command: &str, key: &str, body: String) -> Result<(), StoreError> {
        let resp = self
            .client
            .post(self.endpoint(command, key)?)
            .bearer_auth(&self.token)
            .body(body)
            .send()
            .await?;
        check_status(resp).await.map(|_| ())
    }
}

pub(crate) async fn check_status(resp: Response) -> Result<Response, StoreError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(StoreError::Status {
        status: status.as_u16(),
        body,
    })
}

#[async_trait]
impl StateTier for KvTier {
    fn name(&self) -> &str {
        "kv"
    }

    async fn read_last(&self) -> Result<Option<String>, StoreError> {
        let resp = self
            .client
            .get(self.endpoint("get", &self.key)?)
            .bearer_auth(&self.token)
            .send()
            .await?;
        let reply: KvReply = check_status(resp).await?.json().await?;
        Ok(reply.result)
    }

    async fn write_last(&self, state: &PersistedState) -> Result<(), StoreError> {
        self.command("set", &self.key, state.encode()?).await
    }

    async fn append_snapshot(&self, record: &SnapshotRecord) -> Result<(), StoreError> {
        let Some(history_key) = &self.history_key else {
            return Ok(());
        };
        self.command("lpush", history_key, serde_json::to_string(record)?)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;
    use pretty_assertions::assert_eq;

    fn tier(server: &mockito::ServerGuard) -> KvTier {
        KvTier::new(
            Client::new(),
            Url::parse(&server.url()).unwrap(),
            "secret",
            "mfea-allocation",
        )
    }

    #[tokio::test]
    async fn reads_result_payload() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/get/mfea-allocation")
            .match_header("authorization", "Bearer secret")
            .with_status(200)
            .with_body(r#"{"result":"{\"allocation\":\"100% unleveraged equity\"}"}"#)
            .create_async()
            .await;

        let raw = tier(&server).read_last().await.unwrap().unwrap();
        assert_eq!(PersistedState::decode(&raw).as_deref(), Some("100% unleveraged equity"));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn null_result_is_a_miss() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("GET", "/get/mfea-allocation")
            .with_status(200)
            .with_body(r#"{"result":null}"#)
            .create_async()
            .await;
        assert_eq!(tier(&server).read_last().await.unwrap(), None);
    }

    #[tokio::test]
    async fn writes_and_appends_history() {
        let mut server = mockito::Server::new_async().await;
        let set = server
            .mock("POST", "/set/mfea-allocation")
            .match_body(r#"{"allocation":"100% 3x-leveraged equity"}"#)
            .with_status(200)
            .with_body(r#"{"result":"OK"}"#)
            .create_async()
            .await;
        let push = server
            .mock("POST", "/lpush/mfea-history")
            .match_body(Matcher::PartialJsonString(
                r#"{"allocation":"100% 3x-leveraged equity"}"#.to_string(),
            ))
            .with_status(200)
            .with_body(r#"{"result":1}"#)
            .create_async()
            .await;

        let tier = tier(&server).with_history_key("mfea-history");
        tier.write_last(&PersistedState::new("100% 3x-leveraged equity"))
            .await
            .unwrap();
        tier.append_snapshot(&SnapshotRecord {
            allocation: "100% 3x-leveraged equity".into(),
            timestamp: chrono::Utc::now(),
        })
        .await
        .unwrap();

        set.assert_async().await;
        push.assert_async().await;
    }

    #[tokio::test]
    async fn server_error_surfaces_as_status() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("POST", "/set/mfea-allocation")
            .with_status(503)
            .with_body("maintenance")
            .create_async()
            .await;
        let err = tier(&server)
            .write_last(&PersistedState::new("100% unleveraged equity"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Status { status: 503, .. }));
    }
}
