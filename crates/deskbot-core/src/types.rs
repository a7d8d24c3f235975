//! Shared data types.

use serde::{Deserialize, Serialize};

/// Issue fields as fetched from the tracker REST API.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IssueDetails {
    pub summary: String,
    pub description: Option<String>,
    pub author: Option<String>,
    pub status: Option<String>,
    pub assignee: Option<String>,
}

/// Inbound issue-change event from the tracker.
///
/// All fields are optional: the tracker sends only the fields that changed,
/// plus whatever its workflow script includes.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct IssueEvent {
    #[serde(default, rename = "idReadable")]
    pub id_readable: Option<String>,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub assignee: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    /// Names of the fields the tracker reports as changed.
    #[serde(default)]
    pub changes: Vec<String>,
}

impl IssueEvent {
    /// Readable issue id, preferring the human-facing key.
    pub fn issue_id(&self) -> Option<&str> {
        non_empty(self.id_readable.as_deref()).or_else(|| non_empty(self.id.as_deref()))
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// Linkage row between an issue and its Telegram message.
#[derive(Debug, Clone, PartialEq)]
pub struct IssueMessageRecord {
    pub issue_id: String,
    pub chat_id: String,
    pub message_id: i64,
    /// ISO-8601 UTC timestamp of the last refresh.
    pub updated_at: String,
    pub archived: bool,
}

/// One pending or sent reminder row.
#[derive(Debug, Clone, PartialEq)]
pub struct IssueAlertRecord {
    pub issue_id: String,
    pub alert_index: u32,
    pub chat_id: String,
    pub message_id: i64,
    /// ISO-8601 UTC timestamp after which the reminder is due.
    pub send_after: String,
}
