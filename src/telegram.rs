use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::TelegramConfig;

/// Client-side timeout on the update long poll. All other Bot API calls
/// run without a timeout.
const UPDATE_POLL_TIMEOUT: Duration = Duration::from_secs(10);

/// One entry from `getUpdates`. The `update_id` is monotonically
/// increasing and drives the relay's watermark.
#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    pub update_id: i64,
    pub message: Option<Message>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    pub text: Option<String>,
    pub chat: Chat,
    pub from: Option<User>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Chat {
    pub id: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct User {
    pub first_name: String,
}

#[derive(Debug, Deserialize)]
struct UpdatesEnvelope {
    ok: bool,
    #[serde(default)]
    result: Vec<Update>,
}

#[derive(Debug, Serialize)]
struct SendMessageParams<'a> {
    chat_id: i64,
    text: &'a str,
    parse_mode: &'a str,
}

/// The slice of the chat platform the relay depends on. Kept as a trait so
/// the loop can run against fakes in tests.
#[async_trait]
pub trait ChatApi: Send + Sync {
    /// Fetch updates with identifiers strictly greater than `offset - 1`.
    async fn get_updates(&self, offset: i64) -> Result<Vec<Update>>;

    async fn send_text(&self, chat_id: i64, text: &str) -> Result<()>;

    async fn send_photo(&self, chat_id: i64, caption: &str, photo: Vec<u8>) -> Result<()>;
}

/// Typed client for the consumed slice of the Telegram Bot API:
/// `getUpdates`, `sendMessage`, `sendPhoto`.
pub struct TelegramClient {
    client: reqwest::Client,
    base_url: String,
}

impl TelegramClient {
    pub fn new(config: &TelegramConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: format!("{}/bot{}", config.api_base, config.bot_token),
        }
    }

    async fn check_status(response: reqwest::Response, method: &str) -> Result<reqwest::Response> {
        let status = response.status();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            anyhow::bail!("Telegram {} error ({}): {}", method, status, error_body);
        }
        Ok(response)
    }
}

#[async_trait]
impl ChatApi for TelegramClient {
    async fn get_updates(&self, offset: i64) -> Result<Vec<Update>> {
        let url = format!("{}/getUpdates", self.base_url);

        debug!("Polling updates with offset {}", offset);

        let response = self
            .client
            .get(&url)
            .query(&[("offset", offset)])
            .timeout(UPDATE_POLL_TIMEOUT)
            .send()
            .await
            .context("Failed to fetch updates from Telegram")?;

        let response = Self::check_status(response, "getUpdates").await?;

        let envelope: UpdatesEnvelope = response
            .json()
            .await
            .context("Failed to parse getUpdates response")?;

        if !envelope.ok {
            anyhow::bail!("Telegram getUpdates returned ok=false");
        }

        Ok(envelope.result)
    }

    async fn send_text(&self, chat_id: i64, text: &str) -> Result<()> {
        let url = format!("{}/sendMessage", self.base_url);
        let params = SendMessageParams {
            chat_id,
            text,
            parse_mode: "Markdown",
        };

        let response = self
            .client
            .post(&url)
            .json(&params)
            .send()
            .await
            .context("Failed to send Telegram message")?;

        Self::check_status(response, "sendMessage").await?;
        Ok(())
    }

    async fn send_photo(&self, chat_id: i64, caption: &str, photo: Vec<u8>) -> Result<()> {
        let url = format!("{}/sendPhoto", self.base_url);
        let form = reqwest::multipart::Form::new()
            .text("chat_id", chat_id.to_string())
            .text("caption", caption.to_string())
            .text("parse_mode", "Markdown")
            .part(
                "photo",
                reqwest::multipart::Part::bytes(photo).file_name("photo.jpg"),
            );

        let response = self
            .client
            .post(&url)
            .multipart(form)
            .send()
            .await
            .context("Failed to send Telegram photo")?;

        Self::check_status(response, "sendPhoto").await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    fn client_for(server: &mockito::Server) -> TelegramClient {
        TelegramClient::new(&TelegramConfig {
            bot_token: "TEST".to_string(),
            api_base: server.url(),
        })
    }

    #[tokio::test]
    async fn test_get_updates_parses_batch() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/botTEST/getUpdates")
            .match_query(Matcher::UrlEncoded("offset".into(), "1".into()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"ok":true,"result":[
                    {"update_id":10,"message":{"message_id":1,"text":"/start abc",
                     "chat":{"id":77},"from":{"first_name":"Renato"}}},
                    {"update_id":11,"message":{"message_id":2,
                     "chat":{"id":78},"from":{"first_name":"Ana"}}}
                ]}"#,
            )
            .create_async()
            .await;

        let updates = client_for(&server).get_updates(1).await.unwrap();

        assert_eq!(updates.len(), 2);
        assert_eq!(updates[0].update_id, 10);
        assert_eq!(
            updates[0].message.as_ref().unwrap().text.as_deref(),
            Some("/start abc")
        );
        assert_eq!(updates[1].update_id, 11);
        assert!(updates[1].message.as_ref().unwrap().text.is_none());
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_get_updates_rejects_not_ok_envelope() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/botTEST/getUpdates")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(r#"{"ok":false,"result":[]}"#)
            .create_async()
            .await;

        assert!(client_for(&server).get_updates(1).await.is_err());
    }

    #[tokio::test]
    async fn test_send_text_posts_markdown_payload() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/botTEST/sendMessage")
            .match_body(Matcher::Json(serde_json::json!({
                "chat_id": 77,
                "text": "hello",
                "parse_mode": "Markdown"
            })))
            .with_status(200)
            .with_body(r#"{"ok":true}"#)
            .create_async()
            .await;

        client_for(&server).send_text(77, "hello").await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_send_text_surfaces_api_error() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/botTEST/sendMessage")
            .with_status(400)
            .with_body(r#"{"ok":false,"description":"Bad Request"}"#)
            .create_async()
            .await;

        let err = client_for(&server).send_text(77, "hello").await.unwrap_err();
        assert!(err.to_string().contains("sendMessage"));
    }

    #[tokio::test]
    async fn test_send_photo_uses_multipart() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/botTEST/sendPhoto")
            .match_header(
                "content-type",
                Matcher::Regex("multipart/form-data.*".to_string()),
            )
            .with_status(200)
            .with_body(r#"{"ok":true}"#)
            .create_async()
            .await;

        client_for(&server)
            .send_photo(77, "caption", vec![0xFF, 0xD8])
            .await
            .unwrap();
        mock.assert_async().await;
    }
}
