//! # DeskBot Telegram
//!
//! Thin Telegram Bot API client implementing the [`ChatApi`] seam.
//! Honors `retry_after` hints and surfaces the "message is not modified"
//! rejection as a dedicated error so the engine can react to it.

use async_trait::async_trait;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};

use deskbot_core::traits::{ChatApi, SendOptions};
use deskbot_core::{DeskBotError, Result};

const API_BASE: &str = "https://api.telegram.org";
const MAX_ATTEMPTS: u32 = 3;
const NETWORK_RETRY_DELAY: std::time::Duration = std::time::Duration::from_secs(1);

pub struct TelegramClient {
    token: String,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
    error_code: Option<i64>,
    parameters: Option<ResponseParameters>,
}

#[derive(Debug, Deserialize)]
struct ResponseParameters {
    retry_after: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct Message {
    message_id: i64,
}

impl TelegramClient {
    pub fn new(bot_token: &str) -> Self {
        Self { token: bot_token.to_string(), client: reqwest::Client::new() }
    }

    fn api_url(&self, method: &str) -> String {
        format!("{API_BASE}/bot{}/{method}", self.token)
    }

    /// Call a Bot API method, retrying on network failures and flood-wait
    /// hints up to [`MAX_ATTEMPTS`] times.
    async fn call<T: DeserializeOwned>(&self, method: &str, payload: &Value) -> Result<T> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let response = self.client.post(self.api_url(method)).json(payload).send().await;
            let response = match response {
                Ok(r) => r,
                Err(e) if attempt < MAX_ATTEMPTS => {
                    tracing::warn!("Telegram {method} attempt {attempt} failed: {e}, retrying");
                    tokio::time::sleep(NETWORK_RETRY_DELAY).await;
                    continue;
                }
                Err(e) => return Err(DeskBotError::Telegram(format!("{method} failed: {e}"))),
            };

            let body: ApiResponse<T> = response
                .json()
                .await
                .map_err(|e| DeskBotError::Telegram(format!("{method} returned bad JSON: {e}")))?;

            if body.ok {
                return body.result.ok_or_else(|| {
                    DeskBotError::Telegram(format!("{method} returned ok without a result"))
                });
            }

            let description = body.description.unwrap_or_else(|| "unknown error".into());
            if is_not_modified(&description) {
                return Err(DeskBotError::EditNotModified);
            }
            if body.error_code == Some(429) && attempt < MAX_ATTEMPTS {
                let wait = body
                    .parameters
                    .and_then(|p| p.retry_after)
                    .unwrap_or(1);
                tracing::warn!("Telegram {method} flood-limited, waiting {wait}s");
                tokio::time::sleep(std::time::Duration::from_secs(wait)).await;
                continue;
            }
            return Err(DeskBotError::Telegram(format!("{method} failed: {description}")));
        }
    }
}

/// Detect Telegram's content-unchanged edit rejection.
fn is_not_modified(description: &str) -> bool {
    description.to_lowercase().contains("message is not modified")
}

/// Chats are referred to by numeric id or @username; Telegram wants the
/// numeric form as a number.
fn chat_id_value(chat_id: &str) -> Value {
    match chat_id.parse::<i64>() {
        Ok(n) => json!(n),
        Err(_) => json!(chat_id),
    }
}

/// Inline keyboard with the single "accept" action for an issue.
pub fn accept_keyboard(issue_id: &str) -> Value {
    json!({
        "inline_keyboard": [[
            { "text": "✅ Accept", "callback_data": format!("accept|{issue_id}") }
        ]]
    })
}

#[async_trait]
impl ChatApi for TelegramClient {
    async fn send_message(&self, chat_id: &str, text: &str, opts: SendOptions) -> Result<i64> {
        let mut payload = json!({
            "chat_id": chat_id_value(chat_id),
            "text": text,
            "parse_mode": "HTML",
            "disable_web_page_preview": opts.disable_web_page_preview,
        });
        if let Some(reply_to) = opts.reply_to_message_id {
            payload["reply_to_message_id"] = json!(reply_to);
        }
        if let Some(markup) = opts.reply_markup {
            payload["reply_markup"] = markup;
        }
        let message: Message = self.call("sendMessage", &payload).await?;
        Ok(message.message_id)
    }

    async fn edit_message_text(&self, chat_id: &str, message_id: i64, text: &str) -> Result<()> {
        let payload = json!({
            "chat_id": chat_id_value(chat_id),
            "message_id": message_id,
            "text": text,
            "parse_mode": "HTML",
            "disable_web_page_preview": true,
        });
        let _: Value = self.call("editMessageText", &payload).await?;
        Ok(())
    }

    async fn edit_reply_markup(
        &self,
        chat_id: &str,
        message_id: i64,
        markup: Option<Value>,
    ) -> Result<()> {
        let payload = json!({
            "chat_id": chat_id_value(chat_id),
            "message_id": message_id,
            // An empty object removes the keyboard.
            "reply_markup": markup.unwrap_or_else(|| json!({})),
        });
        let _: Value = self.call("editMessageReplyMarkup", &payload).await?;
        Ok(())
    }

    async fn delete_message(&self, chat_id: &str, message_id: i64) -> Result<()> {
        let payload = json!({
            "chat_id": chat_id_value(chat_id),
            "message_id": message_id,
        });
        let _: bool = self.call("deleteMessage", &payload).await?;
        Ok(())
    }

    async fn answer_callback(&self, callback_id: &str, text: &str, show_alert: bool) -> Result<()> {
        let payload = json!({
            "callback_query_id": callback_id,
            "text": text,
            "show_alert": show_alert,
        });
        let _: Value = self.call("answerCallbackQuery", &payload).await?;
        Ok(())
    }
}
