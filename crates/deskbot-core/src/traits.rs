//! Collaborator seams.
//!
//! The engine talks to Telegram and the issue tracker exclusively through
//! these traits so tests can substitute in-memory fakes.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::IssueDetails;

/// Options for sending a chat message.
#[derive(Debug, Clone, Default)]
pub struct SendOptions {
    /// Message to reply to, if any.
    pub reply_to_message_id: Option<i64>,
    /// Inline keyboard markup (Telegram `reply_markup` JSON).
    pub reply_markup: Option<serde_json::Value>,
    pub disable_web_page_preview: bool,
}

/// Chat-platform operations the engine needs.
#[async_trait]
pub trait ChatApi: Send + Sync {
    /// Send a message and return its message id.
    async fn send_message(&self, chat_id: &str, text: &str, opts: SendOptions) -> Result<i64>;

    /// Edit message text. Maps the platform's "content unchanged" rejection
    /// to [`DeskBotError::EditNotModified`](crate::error::DeskBotError).
    async fn edit_message_text(&self, chat_id: &str, message_id: i64, text: &str) -> Result<()>;

    /// Replace or remove the inline keyboard of a message.
    async fn edit_reply_markup(
        &self,
        chat_id: &str,
        message_id: i64,
        markup: Option<serde_json::Value>,
    ) -> Result<()>;

    /// Delete a message.
    async fn delete_message(&self, chat_id: &str, message_id: i64) -> Result<()>;

    /// Answer a callback query (button press).
    async fn answer_callback(&self, callback_id: &str, text: &str, show_alert: bool) -> Result<()>;
}

/// Issue-tracker operations the engine needs.
#[async_trait]
pub trait TrackerApi: Send + Sync {
    /// Fetch current issue fields. `Ok(None)` means the issue does not exist
    /// or the tracker returned an unusable body.
    async fn fetch_issue_details(&self, issue_id: &str) -> Result<Option<IssueDetails>>;

    /// Assign an issue to a tracker user. Returns `false` when the tracker
    /// refuses the assignment.
    async fn assign_issue(&self, issue_id: &str, login: &str) -> Result<bool>;
}
