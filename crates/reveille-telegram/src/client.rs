//! Minimal Telegram Bot API client.

use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::error::TelegramError;

/// An incoming update from `getUpdates`.
#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    pub update_id: i64,
    #[serde(default)]
    pub message: Option<Message>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    pub chat: Chat,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Chat {
    pub id: i64,
}

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    #[serde(default)]
    result: Option<T>,
    #[serde(default)]
    description: Option<String>,
}

/// Bot API wrapper scoped to one chat.
pub struct TelegramClient {
    http: reqwest::Client,
    base_url: String,
    chat_id: String,
}

impl TelegramClient {
    pub fn new(bot_token: &str, chat_id: &str) -> Self {
        Self::with_base_url(format!("https://api.telegram.org/bot{bot_token}"), chat_id)
    }

    /// Point the client at a different API root (used by tests).
    pub fn with_base_url(base_url: impl Into<String>, chat_id: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            chat_id: chat_id.to_string(),
        }
    }

    pub fn chat_id(&self) -> &str {
        &self.chat_id
    }

    /// Send an HTML-formatted message to the configured chat.
    pub async fn send_message(&self, text: &str) -> Result<(), TelegramError> {
        let response = self
            .http
            .post(format!("{}/sendMessage", self.base_url))
            .json(&json!({
                "chat_id": self.chat_id,
                "text": text,
                "parse_mode": "HTML",
            }))
            .send()
            .await?;

        let body: ApiResponse<serde_json::Value> = response.json().await?;
        if !body.ok {
            return Err(TelegramError::Api(
                body.description.unwrap_or_else(|| "unknown error".to_string()),
            ));
        }
        Ok(())
    }

    /// Long-poll for updates past `offset`.
    pub async fn get_updates(
        &self,
        offset: Option<i64>,
        timeout_secs: u64,
    ) -> Result<Vec<Update>, TelegramError> {
        let mut payload = json!({ "timeout": timeout_secs });
        if let Some(offset) = offset {
            payload["offset"] = json!(offset);
        }

        let response = self
            .http
            .post(format!("{}/getUpdates", self.base_url))
            .json(&payload)
            .send()
            .await?;

        let body: ApiResponse<Vec<Update>> = response.json().await?;
        if !body.ok {
            return Err(TelegramError::Api(
                body.description.unwrap_or_else(|| "unknown error".to_string()),
            ));
        }

        let updates = body.result.unwrap_or_default();
        if !updates.is_empty() {
            debug!(count = updates.len(), "received Telegram updates");
        }
        Ok(updates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn send_message_posts_to_configured_chat() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/sendMessage"))
            .and(body_partial_json(json!({
                "chat_id": "42",
                "text": "hello",
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "ok": true,
                "result": {"message_id": 1},
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = TelegramClient::with_base_url(server.uri(), "42");
        client.send_message("hello").await.unwrap();
    }

    #[tokio::test]
    async fn api_level_errors_are_surfaced() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/sendMessage"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "ok": false,
                "description": "chat not found",
            })))
            .mount(&server)
            .await;

        let client = TelegramClient::with_base_url(server.uri(), "42");
        let err = client.send_message("hello").await.unwrap_err();
        assert!(matches!(err, TelegramError::Api(ref d) if d == "chat not found"));
    }

    #[tokio::test]
    async fn get_updates_parses_messages() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/getUpdates"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "ok": true,
                "result": [
                    {
                        "update_id": 7,
                        "message": {"chat": {"id": 42}, "text": "/schedule"},
                    },
                    {
                        "update_id": 8,
                        "message": {"chat": {"id": 42}},
                    },
                ],
            })))
            .mount(&server)
            .await;

        let client = TelegramClient::with_base_url(server.uri(), "42");
        let updates = client.get_updates(Some(7), 0).await.unwrap();
        assert_eq!(updates.len(), 2);
        assert_eq!(updates[0].update_id, 7);
        assert_eq!(updates[0].message.as_ref().unwrap().text.as_deref(), Some("/schedule"));
        assert_eq!(updates[1].message.as_ref().unwrap().text, None);
    }
}
