use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::commands::Notifier;

const TELEGRAM_API_BASE: &str = "https://api.telegram.org";

/// One entry from the Bot API `getUpdates` result; identifiers are assigned
/// by Telegram and increase monotonically.
#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    pub update_id: i64,
    #[serde(default)]
    pub message: Option<Message>,
}

#[derive(Debug, Clone, Deserialize)]
#[allow(dead_code)]
pub struct Message {
    pub message_id: i64,
    #[serde(default)]
    pub from: Option<User>,
    pub chat: Chat,
    #[serde(default)]
    pub date: i64,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[allow(dead_code)]
pub struct User {
    pub id: i64,
    #[serde(default)]
    pub username: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Chat {
    pub id: i64,
}

#[derive(Debug, Deserialize)]
struct UpdatesResponse {
    ok: bool,
    #[serde(default)]
    result: Vec<Update>,
}

/// Thin Bot API client bound to one bot token and one chat.
#[derive(Debug, Clone)]
pub struct TelegramClient {
    client: reqwest::Client,
    base_url: String,
    token: String,
    chat_id: String,
}

impl TelegramClient {
    pub fn new(token: &str, chat_id: &str) -> Self {
        Self::with_base_url(TELEGRAM_API_BASE, token, chat_id)
    }

    /// Point the client at another API host; tests use this with a mock server.
    pub fn with_base_url(base_url: &str, token: &str, chat_id: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
            chat_id: chat_id.to_string(),
        }
    }

    /// Fetch all updates with identifier >= `offset`, in API order.
    pub async fn get_updates(&self, offset: i64) -> Result<Vec<Update>> {
        let url = format!("{}/bot{}/getUpdates", self.base_url, self.token);

        let response = self
            .client
            .get(&url)
            .query(&[("offset", offset)])
            .send()
            .await
            .context("Failed to fetch Telegram updates")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Telegram getUpdates error ({}): {}", status, body);
        }

        let updates: UpdatesResponse = response
            .json()
            .await
            .context("Failed to decode Telegram updates")?;
        if !updates.ok {
            anyhow::bail!("Telegram getUpdates returned ok=false");
        }

        debug!(
            "Fetched {} update(s) from offset {}",
            updates.result.len(),
            offset
        );
        Ok(updates.result)
    }

    /// Push one Markdown-formatted message to the configured chat. Delivery
    /// failures are logged and the message is dropped, never retried.
    pub async fn send_message(&self, text: &str) {
        let url = format!("{}/bot{}/sendMessage", self.base_url, self.token);
        let params = [
            ("chat_id", self.chat_id.as_str()),
            ("text", text),
            ("parse_mode", "Markdown"),
        ];

        match self.client.post(&url).form(&params).send().await {
            Ok(response) if !response.status().is_success() => {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                warn!("Telegram rejected message ({}): {}", status, body);
            }
            Ok(_) => {}
            Err(e) => warn!("Failed to send Telegram message: {}", e),
        }
    }
}

#[async_trait]
impl Notifier for TelegramClient {
    async fn notify(&self, text: &str) {
        self.send_message(text).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;
    use serde_json::json;

    #[tokio::test]
    async fn get_updates_sends_offset_and_decodes_envelope() {
        let body = json!({
            "ok": true,
            "result": [
                {
                    "update_id": 8,
                    "message": {
                        "message_id": 1,
                        "from": {"id": 42, "username": "op"},
                        "chat": {"id": 123},
                        "date": 1700000000,
                        "text": "!status"
                    }
                },
                {"update_id": 9}
            ]
        });
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/botTOKEN/getUpdates")
            .match_query(Matcher::UrlEncoded("offset".into(), "8".into()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(body.to_string())
            .create_async()
            .await;

        let client = TelegramClient::with_base_url(&server.url(), "TOKEN", "123");
        let updates = client.get_updates(8).await.unwrap();

        mock.assert_async().await;
        assert_eq!(updates.len(), 2);
        assert_eq!(updates[0].update_id, 8);
        let message = updates[0].message.as_ref().unwrap();
        assert_eq!(message.chat.id, 123);
        assert_eq!(message.text.as_deref(), Some("!status"));
        assert_eq!(
            message.from.as_ref().unwrap().username.as_deref(),
            Some("op")
        );
        assert!(updates[1].message.is_none());
    }

    #[tokio::test]
    async fn get_updates_fails_on_not_ok_envelope() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/botTOKEN/getUpdates")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(json!({"ok": false, "result": []}).to_string())
            .create_async()
            .await;

        let client = TelegramClient::with_base_url(&server.url(), "TOKEN", "123");
        let err = client.get_updates(1).await.unwrap_err();

        assert!(err.to_string().contains("ok=false"));
    }

    #[tokio::test]
    async fn get_updates_fails_on_http_error() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/botTOKEN/getUpdates")
            .match_query(Matcher::Any)
            .with_status(502)
            .with_body("bad gateway")
            .create_async()
            .await;

        let client = TelegramClient::with_base_url(&server.url(), "TOKEN", "123");
        assert!(client.get_updates(1).await.is_err());
    }

    #[tokio::test]
    async fn send_message_posts_the_form() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/botTOKEN/sendMessage")
            .match_body(Matcher::AllOf(vec![
                Matcher::UrlEncoded("chat_id".into(), "123".into()),
                Matcher::UrlEncoded("text".into(), "hello".into()),
                Matcher::UrlEncoded("parse_mode".into(), "Markdown".into()),
            ]))
            .with_status(200)
            .with_body(json!({"ok": true}).to_string())
            .create_async()
            .await;

        let client = TelegramClient::with_base_url(&server.url(), "TOKEN", "123");
        client.send_message("hello").await;

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn send_message_swallows_delivery_failures() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/botTOKEN/sendMessage")
            .with_status(400)
            .with_body(json!({"ok": false, "description": "Bad Request"}).to_string())
            .create_async()
            .await;

        let client = TelegramClient::with_base_url(&server.url(), "TOKEN", "123");
        // Logged and dropped; must not panic or propagate.
        client.send_message("hello").await;
    }
}
