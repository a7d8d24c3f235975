//! In-memory collaborator fakes and test fixtures.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicI64, AtomicU32, Ordering};

use async_trait::async_trait;

use deskbot_core::config::{AlertStep, AlertsConfig};
use deskbot_core::traits::{ChatApi, SendOptions, TrackerApi};
use deskbot_core::types::IssueDetails;
use deskbot_core::{DeskBotError, Result};
use deskbot_store::SqliteStore;

pub(crate) fn temp_store(name: &str) -> std::sync::Arc<SqliteStore> {
    let path = std::env::temp_dir().join(format!(
        "deskbot-engine-{name}-{}.db",
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos()
    ));
    let _ = std::fs::remove_file(&path);
    std::sync::Arc::new(SqliteStore::open(&path).unwrap())
}

pub(crate) fn test_alerts_config() -> AlertsConfig {
    AlertsConfig {
        enabled: true,
        target_status: "New".into(),
        poll_seconds: 60,
        suffix_default: String::new(),
        suffix_positions: vec![2, 3],
        steps: vec![
            AlertStep { index: 1, minutes: 60, message: "First reminder".into() },
            AlertStep { index: 2, minutes: 180, message: "Second reminder".into() },
            AlertStep { index: 3, minutes: 1440, message: "Third reminder".into() },
        ],
    }
}

#[derive(Debug, Clone)]
pub(crate) struct SentMessage {
    pub chat_id: String,
    pub text: String,
    pub reply_to: Option<i64>,
    pub has_markup: bool,
    pub preview_disabled: bool,
}

#[derive(Debug, Clone)]
pub(crate) struct EditCall {
    pub chat_id: String,
    pub message_id: i64,
    pub text: String,
}

/// Scriptable [`ChatApi`] double recording every call.
pub(crate) struct FakeChat {
    pub sent: Mutex<Vec<SentMessage>>,
    pub edits: Mutex<Vec<EditCall>>,
    /// (chat_id, message_id, markup present)
    pub markup_edits: Mutex<Vec<(String, i64, bool)>>,
    /// (chat_id, message_id)
    pub deleted: Mutex<Vec<(String, i64)>>,
    /// (callback_id, text, show_alert)
    pub callbacks: Mutex<Vec<(String, String, bool)>>,
    send_errors: Mutex<VecDeque<DeskBotError>>,
    edit_errors: Mutex<VecDeque<DeskBotError>>,
    next_message_id: AtomicI64,
}

impl FakeChat {
    pub fn new() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            edits: Mutex::new(Vec::new()),
            markup_edits: Mutex::new(Vec::new()),
            deleted: Mutex::new(Vec::new()),
            callbacks: Mutex::new(Vec::new()),
            send_errors: Mutex::new(VecDeque::new()),
            edit_errors: Mutex::new(VecDeque::new()),
            next_message_id: AtomicI64::new(100),
        }
    }

    pub fn fail_next_send(&self, err: DeskBotError) {
        self.send_errors.lock().unwrap().push_back(err);
    }

    pub fn fail_next_edit(&self, err: DeskBotError) {
        self.edit_errors.lock().unwrap().push_back(err);
    }

    pub fn edit_count(&self) -> usize {
        self.edits.lock().unwrap().len()
    }
}

#[async_trait]
impl ChatApi for FakeChat {
    async fn send_message(&self, chat_id: &str, text: &str, opts: SendOptions) -> Result<i64> {
        if let Some(err) = self.send_errors.lock().unwrap().pop_front() {
            return Err(err);
        }
        self.sent.lock().unwrap().push(SentMessage {
            chat_id: chat_id.to_string(),
            text: text.to_string(),
            reply_to: opts.reply_to_message_id,
            has_markup: opts.reply_markup.is_some(),
            preview_disabled: opts.disable_web_page_preview,
        });
        Ok(self.next_message_id.fetch_add(1, Ordering::SeqCst))
    }

    async fn edit_message_text(&self, chat_id: &str, message_id: i64, text: &str) -> Result<()> {
        self.edits.lock().unwrap().push(EditCall {
            chat_id: chat_id.to_string(),
            message_id,
            text: text.to_string(),
        });
        if let Some(err) = self.edit_errors.lock().unwrap().pop_front() {
            return Err(err);
        }
        Ok(())
    }

    async fn edit_reply_markup(
        &self,
        chat_id: &str,
        message_id: i64,
        markup: Option<serde_json::Value>,
    ) -> Result<()> {
        self.markup_edits
            .lock()
            .unwrap()
            .push((chat_id.to_string(), message_id, markup.is_some()));
        Ok(())
    }

    async fn delete_message(&self, chat_id: &str, message_id: i64) -> Result<()> {
        self.deleted.lock().unwrap().push((chat_id.to_string(), message_id));
        Ok(())
    }

    async fn answer_callback(&self, callback_id: &str, text: &str, show_alert: bool) -> Result<()> {
        self.callbacks
            .lock()
            .unwrap()
            .push((callback_id.to_string(), text.to_string(), show_alert));
        Ok(())
    }
}

/// Scriptable [`TrackerApi`] double. Detail responses are consumed in FIFO
/// order; when the script runs out, the tracker reports the issue missing.
pub(crate) struct FakeTracker {
    details: Mutex<VecDeque<Option<IssueDetails>>>,
    assign_results: Mutex<VecDeque<bool>>,
    pub assigned: Mutex<Vec<(String, String)>>,
    pub fetch_calls: AtomicU32,
}

impl FakeTracker {
    pub fn new() -> Self {
        Self {
            details: Mutex::new(VecDeque::new()),
            assign_results: Mutex::new(VecDeque::new()),
            assigned: Mutex::new(Vec::new()),
            fetch_calls: AtomicU32::new(0),
        }
    }

    pub fn push_details(&self, details: Option<IssueDetails>) {
        self.details.lock().unwrap().push_back(details);
    }

    pub fn push_assign_result(&self, ok: bool) {
        self.assign_results.lock().unwrap().push_back(ok);
    }

    pub fn fetch_count(&self) -> u32 {
        self.fetch_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TrackerApi for FakeTracker {
    async fn fetch_issue_details(&self, _issue_id: &str) -> Result<Option<IssueDetails>> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.details.lock().unwrap().pop_front().unwrap_or(None))
    }

    async fn assign_issue(&self, issue_id: &str, login: &str) -> Result<bool> {
        self.assigned
            .lock()
            .unwrap()
            .push((issue_id.to_string(), login.to_string()));
        Ok(self.assign_results.lock().unwrap().pop_front().unwrap_or(true))
    }
}

pub(crate) fn sample_details() -> IssueDetails {
    IssueDetails {
        summary: "Printer jam".into(),
        description: Some("3rd floor, room 312".into()),
        author: Some("Olena K.".into()),
        status: Some("New".into()),
        assignee: None,
    }
}
