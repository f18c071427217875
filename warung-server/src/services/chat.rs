//! Chat channel (Telegram Bot API)
//!
//! Outbound messaging to buyers and the operator. All order
//! notifications flow through the [`ChatChannel`] trait so the
//! reconciliation logic never touches HTTP directly.

use std::path::Path;

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("Chat API rejected request: {0}")]
    Api(String),

    #[error("Failed to read photo file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Chat request failed: {0}")]
    Http(#[from] reqwest::Error),
}

/// Outbound messaging seam. Returns the platform message id so
/// callers can delete payment prompts after settlement.
#[async_trait]
pub trait ChatChannel: Send + Sync {
    async fn send_message(&self, chat_id: i64, text: &str) -> Result<i64, ChatError>;

    async fn send_photo(
        &self,
        chat_id: i64,
        photo: &Path,
        caption: &str,
    ) -> Result<i64, ChatError>;

    async fn delete_message(&self, chat_id: i64, message_id: i64) -> Result<(), ChatError>;
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    result: Option<ApiMessage>,
}

#[derive(Debug, Deserialize)]
struct ApiMessage {
    #[serde(default)]
    message_id: i64,
}

/// Telegram Bot API implementation.
pub struct TelegramChat {
    client: reqwest::Client,
    api_base: String,
    bot_token: String,
}

impl TelegramChat {
    pub fn new(api_base: impl Into<String>, bot_token: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_base: api_base.into(),
            bot_token: bot_token.into(),
        }
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.api_base, self.bot_token, method)
    }

    fn unwrap_message(response: ApiResponse) -> Result<i64, ChatError> {
        if !response.ok {
            return Err(ChatError::Api(
                response.description.unwrap_or_else(|| "unknown".to_string()),
            ));
        }
        Ok(response.result.map(|m| m.message_id).unwrap_or(0))
    }
}

#[async_trait]
impl ChatChannel for TelegramChat {
    async fn send_message(&self, chat_id: i64, text: &str) -> Result<i64, ChatError> {
        debug!(chat_id, len = text.len(), "Sending chat message");
        let response: ApiResponse = self
            .client
            .post(self.method_url("sendMessage"))
            .json(&serde_json::json!({
                "chat_id": chat_id,
                "text": text,
            }))
            .send()
            .await?
            .json()
            .await?;
        Self::unwrap_message(response)
    }

    async fn send_photo(
        &self,
        chat_id: i64,
        photo: &Path,
        caption: &str,
    ) -> Result<i64, ChatError> {
        debug!(chat_id, path = %photo.display(), "Sending chat photo");
        let bytes = tokio::fs::read(photo).await?;
        let part = reqwest::multipart::Part::bytes(bytes)
            .file_name("payment.jpg")
            .mime_str("image/jpeg")?;
        let form = reqwest::multipart::Form::new()
            .text("chat_id", chat_id.to_string())
            .text("caption", caption.to_string())
            .part("photo", part);

        let response: ApiResponse = self
            .client
            .post(self.method_url("sendPhoto"))
            .multipart(form)
            .send()
            .await?
            .json()
            .await?;
        Self::unwrap_message(response)
    }

    async fn delete_message(&self, chat_id: i64, message_id: i64) -> Result<(), ChatError> {
        let response: ApiResponse = self
            .client
            .post(self.method_url("deleteMessage"))
            .json(&serde_json::json!({
                "chat_id": chat_id,
                "message_id": message_id,
            }))
            .send()
            .await?
            .json()
            .await?;
        if !response.ok {
            return Err(ChatError::Api(
                response.description.unwrap_or_else(|| "unknown".to_string()),
            ));
        }
        Ok(())
    }
}
