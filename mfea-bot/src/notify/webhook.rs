use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use url::Url;

use crate::notify::{MessageId, NotificationSink, NotifyError, StatusMessage};

/// Chat webhook (Discord-compatible): `POST {url}?wait=true` to send,
/// `PATCH {url}/messages/{id}` to edit.
#[derive(Clone, Debug)]
pub struct WebhookNotifier {
    client: Client,
    url: Url,
}

impl WebhookNotifier {
    pub fn new(client: Client, url: Url) -> Self {
        Self { client, url }
    }

    fn send_url(&self) -> Url {
        let mut url = self.url.clone();
        url.query_pairs_mut().append_pair("wait", "true");
        url
    }

    fn edit_url(&self, id: &MessageId) -> Result<Url, NotifyError> {
        let mut url = self.url.clone();
        url.path_segments_mut()
            .map_err(|_| NotifyError::Unavailable(format!("webhook url {} cannot take a path", self.url)))?
            .pop_if_empty()
            .push("messages")
            .push(&id.0);
        Ok(url)
    }
}

/// Wire payload: text, explicit mention allow-list, one row of buttons.
pub fn payload(message: &StatusMessage) -> Value {
    let users: Vec<&str> = message.mentions.iter().map(|id| id.0.as_str()).collect();
    let buttons: Vec<Value> = message
        .buttons
        .iter()
        .map(|b| json!({"type": 2, "style": 2, "label": b.label, "custom_id": b.custom_id}))
        .collect();
    let components = if buttons.is_empty() {
        json!([])
    } else {
        json!([{"type": 1, "components": buttons}])
    };
    json!({
        "content": message.content(),
        "allowed_mentions": {"parse": [], "users": users},
        "components": components,
    })
}

async fn ensure_success(resp: reqwest::Response) -> Result<String, NotifyError> {
    let status = resp.status();
    let body = resp.text().await?;
    if !status.is_success() {
        return Err(NotifyError::Status {
            status: status.as_u16(),
            body,
        });
    }
    Ok(body)
}

#[async_trait]
impl NotificationSink for WebhookNotifier {
    async fn send(&self, message: &StatusMessage) -> Result<Option<MessageId>, NotifyError> {
        let resp = self
            .client
            .post(self.send_url())
            .json(&payload(message))
            .send()
            .await?;
        let body = ensure_success(resp).await?;
        if body.trim().is_empty() {
            return Ok(None);
        }
        // Accepted either way; without an id the message just never gets edited.
        match serde_json::from_str::<Value>(&body) {
            Ok(value) => Ok(value
                .get("id")
                .and_then(|id| id.as_str())
                .map(|id| MessageId(id.to_string()))),
            Err(e) => {
                tracing::warn!(error = %e, "webhook accepted message but reply is not json");
                Ok(None)
            }
        }
    }

    async fn edit(&self, id: &MessageId, message: &StatusMessage) -> Result<(), NotifyError> {
        let resp = self
            .client
            .patch(self.edit_url(id)?)
            .json(&payload(message))
            .send()
            .await?;
        ensure_success(resp).await.map(|_| ())
    }
}

/// Dry-run sink: writes the message to the log and never returns an id.
#[derive(Clone, Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl NotificationSink for LogNotifier {
    async fn send(&self, message: &StatusMessage) -> Result<Option<MessageId>, NotifyError> {
        tracing::info!(mentions = message.mentions.len(), content = %message.content(), "notification (dry run)");
        Ok(None)
    }

    async fn edit(&self, id: &MessageId, message: &StatusMessage) -> Result<(), NotifyError> {
        tracing::info!(id = %id.0, content = %message.content(), "notification edit (dry run)");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::Button;
    use crate::types::SubscriberId;
    use mockito::Matcher;
    use pretty_assertions::assert_eq;

    fn message() -> StatusMessage {
        StatusMessage {
            status: "**MFEA**\nAllocation unchanged: 100% unleveraged equity".into(),
            mentions: vec![SubscriberId("42".into())],
            notified: None,
            buttons: Button::subscription_controls(),
        }
    }

    fn notifier(server: &mockito::ServerGuard) -> WebhookNotifier {
        let url = Url::parse(&format!("{}/api/webhooks/1/token", server.url())).unwrap();
        WebhookNotifier::new(Client::new(), url)
    }

    #[test]
    fn payload_allows_only_listed_mentions() {
        let p = payload(&message());
        assert_eq!(p["allowed_mentions"]["users"], json!(["42"]));
        assert_eq!(p["allowed_mentions"]["parse"], json!([]));
        assert_eq!(p["components"][0]["components"][1]["custom_id"], json!("mfea_unsubscribe"));
        assert!(p["content"].as_str().unwrap().ends_with("<@42>"));
    }

    #[tokio::test]
    async fn send_returns_platform_message_id() {
        let mut server = mockito::Server::new_async().await;
        let m = server
            .mock("POST", "/api/webhooks/1/token")
            .match_query(Matcher::UrlEncoded("wait".into(), "true".into()))
            .match_body(Matcher::PartialJson(json!({"allowed_mentions": {"users": ["42"]}})))
            .with_status(200)
            .with_body(r#"{"id":"998877","channel_id":"1"}"#)
            .create_async()
            .await;

        let id = notifier(&server).send(&message()).await.unwrap();
        assert_eq!(id, Some(MessageId("998877".into())));
        m.assert_async().await;
    }

    #[tokio::test]
    async fn edit_patches_message_by_id() {
        let mut server = mockito::Server::new_async().await;
        let m = server
            .mock("PATCH", "/api/webhooks/1/token/messages/998877")
            .match_body(Matcher::PartialJson(json!({"allowed_mentions": {"users": []}})))
            .with_status(200)
            .with_body(r#"{"id":"998877"}"#)
            .create_async()
            .await;

        notifier(&server)
            .edit(&MessageId("998877".into()), &message().summarized())
            .await
            .unwrap();
        m.assert_async().await;
    }

    #[tokio::test]
    async fn accepted_send_with_plain_reply_has_no_id() {
        let mut server = mockito::Server::new_async().await;
        let m = server
            .mock("POST", "/api/webhooks/1/token")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body("ok")
            .create_async()
            .await;

        let id = notifier(&server).send(&message()).await.unwrap();
        assert_eq!(id, None);
        m.assert_async().await;
    }

    #[tokio::test]
    async fn rejected_send_is_a_status_error() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("POST", "/api/webhooks/1/token")
            .match_query(Matcher::Any)
            .with_status(429)
            .with_body(r#"{"retry_after": 1.5}"#)
            .create_async()
            .await;

        let err = notifier(&server).send(&message()).await.unwrap_err();
        assert!(matches!(err, NotifyError::Status { status: 429, .. }));
    }
}
