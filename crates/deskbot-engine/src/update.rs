//! Keeps the linked Telegram message in sync with issue state.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};

use deskbot_core::render::{IssueView, build_issue_url, format_issue_message, strip_html};
use deskbot_core::traits::{ChatApi, TrackerApi};
use deskbot_core::types::{IssueDetails, IssueEvent, IssueMessageRecord};
use deskbot_core::{DeskBotError, Result};
use deskbot_store::IssueStore;

use crate::alerts::AlertScheduler;

/// Telegram refuses edits on messages older than this.
const EDIT_WINDOW_HOURS: i64 = 48;
/// Pause before the recovery re-fetch, letting the tracker settle.
const RECOVERY_DELAY: std::time::Duration = std::time::Duration::from_millis(300);

/// Result of handling one update event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpdateOutcome {
    /// Whether the issue has a linked message at all.
    pub tracked: bool,
}

pub struct MessageUpdateEngine {
    store: Arc<dyn IssueStore>,
    chat: Arc<dyn ChatApi>,
    tracker: Arc<dyn TrackerApi>,
    scheduler: AlertScheduler,
    tracker_base_url: String,
    target_status: String,
    description_max_len: usize,
}

/// Issue fields after merging the event payload with fetched details.
/// Payload values win.
#[derive(Debug, Default)]
struct ResolvedFields {
    summary: Option<String>,
    description: Option<String>,
    author: Option<String>,
    status: Option<String>,
    assignee: Option<String>,
}

impl ResolvedFields {
    fn from_event(event: &IssueEvent) -> Self {
        Self {
            summary: clean(event.summary.as_deref()),
            description: clean(event.description.as_deref()),
            author: clean(event.author.as_deref()),
            status: clean(event.status.as_deref()),
            assignee: clean(event.assignee.as_deref()),
        }
    }

    fn from_details(details: &IssueDetails) -> Self {
        Self {
            summary: clean(Some(&details.summary)),
            description: clean(details.description.as_deref()),
            author: clean(details.author.as_deref()),
            status: clean(details.status.as_deref()),
            assignee: clean(details.assignee.as_deref()),
        }
    }

    fn is_complete(&self) -> bool {
        self.summary.is_some()
            && self.description.is_some()
            && self.author.is_some()
            && self.status.is_some()
            && self.assignee.is_some()
    }

    fn fill_from(&mut self, details: &IssueDetails) {
        let fetched = Self::from_details(details);
        self.summary = self.summary.take().or(fetched.summary);
        self.description = self.description.take().or(fetched.description);
        self.author = self.author.take().or(fetched.author);
        self.status = self.status.take().or(fetched.status);
        self.assignee = self.assignee.take().or(fetched.assignee);
    }
}

fn clean(value: Option<&str>) -> Option<String> {
    value.map(str::trim).filter(|v| !v.is_empty()).map(String::from)
}

/// True when the linked message is too old for Telegram to edit. Unparsable
/// timestamps count as fresh so an edit is still attempted.
fn edit_window_expired(updated_at: &str, now: DateTime<Utc>) -> bool {
    match DateTime::parse_from_rfc3339(updated_at) {
        Ok(ts) => {
            now.signed_duration_since(ts.with_timezone(&Utc)) > Duration::hours(EDIT_WINDOW_HOURS)
        }
        Err(_) => false,
    }
}

impl MessageUpdateEngine {
    pub fn new(
        store: Arc<dyn IssueStore>,
        chat: Arc<dyn ChatApi>,
        tracker: Arc<dyn TrackerApi>,
        scheduler: AlertScheduler,
        tracker_base_url: String,
        target_status: String,
        description_max_len: usize,
    ) -> Self {
        Self {
            store,
            chat,
            tracker,
            scheduler,
            tracker_base_url,
            target_status,
            description_max_len,
        }
    }

    /// Handle one issue-change event.
    ///
    /// Unlinked issues are reported as `tracked: false` rather than failing:
    /// the tracker notifies about every issue, linked or not.
    pub async fn update_linked_message(&self, event: &IssueEvent) -> Result<UpdateOutcome> {
        let Some(issue_id) = event.issue_id() else {
            tracing::debug!("Update event without an issue id, ignoring");
            return Ok(UpdateOutcome { tracked: false });
        };
        let changed = if event.changes.is_empty() {
            "unknown fields".to_string()
        } else {
            event.changes.join(", ")
        };
        tracing::info!("Handling update for {issue_id} (changed: {changed})");

        let mut fields = ResolvedFields::from_event(event);
        if !fields.is_complete() {
            match self.tracker.fetch_issue_details(issue_id).await {
                Ok(Some(details)) => fields.fill_from(&details),
                Ok(None) => tracing::debug!("No details available for {issue_id}"),
                Err(e) => tracing::warn!("Detail fetch for {issue_id} failed: {e}"),
            }
        }

        // A status change away from the target disarms pending reminders.
        self.scheduler.cancel_alerts(issue_id, fields.status.as_deref()).await?;

        let Some(record) = self.store.fetch_issue_message(issue_id).await? else {
            tracing::info!("No linked message for {issue_id}, nothing to update");
            return Ok(UpdateOutcome { tracked: false });
        };

        if edit_window_expired(&record.updated_at, Utc::now()) {
            tracing::info!(
                "Linked message for {issue_id} is older than {EDIT_WINDOW_HOURS}h, skipping edit"
            );
            return Ok(UpdateOutcome { tracked: true });
        }

        let url = clean(event.url.as_deref())
            .unwrap_or_else(|| build_issue_url(&self.tracker_base_url, issue_id));
        let text = self.render_text(issue_id, &fields, &url);

        let edited = match self
            .chat
            .edit_message_text(&record.chat_id, record.message_id, &text)
            .await
        {
            Ok(()) => true,
            Err(DeskBotError::EditNotModified) => {
                self.recover_from_conflict(issue_id, &record, &url, &text).await?
            }
            Err(e) => return Err(e),
        };

        if edited {
            self.store
                .upsert_issue_message(issue_id, &record.chat_id, record.message_id)
                .await?;
        }
        Ok(UpdateOutcome { tracked: true })
    }

    /// One bounded recovery pass after a content-unchanged conflict: wait,
    /// re-fetch, recompute, and retry the edit at most once. Returns whether
    /// an edit was actually applied.
    async fn recover_from_conflict(
        &self,
        issue_id: &str,
        record: &IssueMessageRecord,
        url: &str,
        attempted_text: &str,
    ) -> Result<bool> {
        tracing::info!("Telegram reports no change for {issue_id}, verifying against the tracker");
        tokio::time::sleep(RECOVERY_DELAY).await;

        let refreshed = match self.tracker.fetch_issue_details(issue_id).await {
            Ok(details) => details,
            Err(e) => {
                tracing::warn!("Recovery fetch for {issue_id} failed: {e}");
                None
            }
        };
        let Some(refreshed) = refreshed else {
            // Nothing to compare against; the message is as good as current.
            return Ok(false);
        };

        let fields = ResolvedFields::from_details(&refreshed);
        let refreshed_text = self.render_text(issue_id, &fields, url);
        if refreshed_text == attempted_text {
            tracing::info!("Message for {issue_id} already matches the tracker");
            return Ok(false);
        }

        match self
            .chat
            .edit_message_text(&record.chat_id, record.message_id, &refreshed_text)
            .await
        {
            Ok(()) => {
                tracing::info!("Updated {issue_id} on the recovery attempt");
                Ok(true)
            }
            Err(DeskBotError::EditNotModified) => {
                tracing::info!("Second no-op conflict for {issue_id}, leaving the message as is");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    fn render_text(&self, issue_id: &str, fields: &ResolvedFields, url: &str) -> String {
        let description = strip_html(fields.description.as_deref().unwrap_or(""));
        let view = IssueView {
            issue_id,
            summary: fields.summary.as_deref().unwrap_or(""),
            description: &description,
            url,
            author: fields.author.as_deref(),
            status: fields.status.as_deref(),
            assignee: fields.assignee.as_deref(),
        };
        format_issue_message(&view, &self.target_status, self.description_max_len)
    }
}
