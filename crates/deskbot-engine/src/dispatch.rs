//! The wiring point: one context object owning the store, both
//! collaborators, and the lifecycle components.

use std::sync::Arc;

use deskbot_core::DeskBotConfig;
use deskbot_core::Result;
use deskbot_core::messages::{Msg, render};
use deskbot_core::render::{IssueView, build_issue_url, format_issue_message, strip_html};
use deskbot_core::traits::{ChatApi, SendOptions, TrackerApi};
use deskbot_core::types::IssueEvent;
use deskbot_store::IssueStore;

use crate::alerts::{AlertScheduler, AlertWorker};
use crate::archiver::ArchiveWorker;
use crate::dedup::{DedupGuard, DedupKey};
use crate::update::{MessageUpdateEngine, UpdateOutcome};

/// Status label shown right after an accept when the tracker has not
/// reported the new one yet.
const ACCEPTED_STATUS_FALLBACK: &str = "In Progress";

/// Everything the bot needs at runtime, built once at startup.
pub struct BotContext {
    store: Arc<dyn IssueStore>,
    chat: Arc<dyn ChatApi>,
    tracker: Arc<dyn TrackerApi>,
    dedup: DedupGuard,
    scheduler: AlertScheduler,
    updater: MessageUpdateEngine,
    config: DeskBotConfig,
}

impl BotContext {
    pub fn new(
        store: Arc<dyn IssueStore>,
        chat: Arc<dyn ChatApi>,
        tracker: Arc<dyn TrackerApi>,
        config: DeskBotConfig,
    ) -> Self {
        let scheduler = AlertScheduler::new(store.clone(), config.alerts.clone());
        let updater = MessageUpdateEngine::new(
            store.clone(),
            chat.clone(),
            tracker.clone(),
            scheduler.clone(),
            config.tracker.base_url.clone(),
            config.alerts.target_status.clone(),
            config.render.description_max_len,
        );
        Self { store, chat, tracker, dedup: DedupGuard::new(), scheduler, updater, config }
    }

    /// Post the first notification for an issue: send the message (with an
    /// optional inline action), link it, and arm the reminder sequence.
    pub async fn announce_issue(
        &self,
        event: &IssueEvent,
        reply_markup: Option<serde_json::Value>,
    ) -> Result<Option<i64>> {
        let Some(issue_id) = event.issue_id() else {
            tracing::debug!("Announce event without an issue id, ignoring");
            return Ok(None);
        };
        let url = event
            .url
            .as_deref()
            .map(str::trim)
            .filter(|u| !u.is_empty())
            .map(String::from)
            .unwrap_or_else(|| build_issue_url(&self.config.tracker.base_url, issue_id));
        let description = strip_html(event.description.as_deref().unwrap_or(""));
        let view = IssueView {
            issue_id,
            summary: event.summary.as_deref().unwrap_or(""),
            description: &description,
            url: &url,
            author: event.author.as_deref(),
            status: event.status.as_deref(),
            assignee: event.assignee.as_deref(),
        };
        let text = format_issue_message(
            &view,
            &self.config.alerts.target_status,
            self.config.render.description_max_len,
        );

        let chat_id = self.config.telegram.chat_id.clone();
        // First notifications keep the link preview, unlike reminders.
        let opts = SendOptions { reply_markup, ..Default::default() };
        let message_id = self.chat.send_message(&chat_id, &text, opts).await?;
        self.store.upsert_issue_message(issue_id, &chat_id, message_id).await?;
        self.scheduler
            .schedule_alerts(issue_id, event.status.as_deref(), &chat_id, message_id)
            .await?;
        tracing::info!("Announced {issue_id} as message {message_id}");
        Ok(Some(message_id))
    }

    /// Record (or refresh) the issue ↔ message linkage.
    pub async fn register_issue_message(
        &self,
        issue_id: &str,
        chat_id: &str,
        message_id: i64,
    ) -> Result<()> {
        self.store.upsert_issue_message(issue_id, chat_id, message_id).await
    }

    /// Sync the linked message with an issue-change event.
    pub async fn update_linked_message(&self, event: &IssueEvent) -> Result<UpdateOutcome> {
        self.updater.update_linked_message(event).await
    }

    pub async fn schedule_alerts(
        &self,
        issue_id: &str,
        status: Option<&str>,
        chat_id: &str,
        message_id: i64,
    ) -> Result<()> {
        self.scheduler.schedule_alerts(issue_id, status, chat_id, message_id).await
    }

    pub async fn cancel_alerts(&self, issue_id: &str, status: Option<&str>) -> Result<()> {
        self.scheduler.cancel_alerts(issue_id, status).await
    }

    /// Store or clear the runtime reminder suffix.
    pub async fn update_alert_suffix(&self, value: &str) -> Result<()> {
        self.scheduler.update_alert_suffix(value).await
    }

    /// Handle an "accept" button press: dedup, assign, acknowledge, and
    /// refresh the message. A duplicate press is acknowledged without
    /// touching the tracker again.
    pub async fn handle_accept(
        &self,
        callback_id: &str,
        chat_id: &str,
        message_id: i64,
        issue_id: &str,
        login: &str,
    ) -> Result<()> {
        let key = DedupKey {
            chat_id: chat_id.to_string(),
            message_id,
            issue_id: issue_id.to_string(),
        };
        if !self.dedup.register_attempt(key) {
            tracing::info!("Ignoring duplicate accept for {issue_id} (message {message_id})");
            return self
                .chat
                .answer_callback(callback_id, render(Msg::CallbackAccepted), false)
                .await;
        }

        let assigned = self.tracker.assign_issue(issue_id, login).await?;
        if !assigned {
            tracing::warn!("Tracker refused to assign {issue_id} to {login}");
            return self
                .chat
                .answer_callback(callback_id, render(Msg::CallbackAssignFailed), true)
                .await;
        }

        self.chat
            .answer_callback(callback_id, render(Msg::CallbackAccepted), false)
            .await?;
        self.refresh_after_accept(chat_id, message_id, issue_id, login).await;
        if let Err(e) = self.chat.edit_reply_markup(chat_id, message_id, None).await {
            tracing::debug!("Failed to remove the keyboard on {message_id}: {e}");
        }
        tracing::info!("Issue {issue_id} assigned to {login} via accept");
        Ok(())
    }

    /// Best-effort rewrite of the message right after an assignment. The
    /// tracker may lag behind the accept, so the presser and an interim
    /// status fill any gaps.
    async fn refresh_after_accept(
        &self,
        chat_id: &str,
        message_id: i64,
        issue_id: &str,
        login: &str,
    ) {
        let details = match self.tracker.fetch_issue_details(issue_id).await {
            Ok(details) => details,
            Err(e) => {
                tracing::warn!("Post-accept detail fetch for {issue_id} failed: {e}");
                None
            }
        };
        let details = details.unwrap_or_default();
        let description = strip_html(details.description.as_deref().unwrap_or(""));
        let url = build_issue_url(&self.config.tracker.base_url, issue_id);
        let assignee = details.assignee.clone().unwrap_or_else(|| login.to_string());
        let status = details.status.clone().unwrap_or_else(|| ACCEPTED_STATUS_FALLBACK.into());
        let view = IssueView {
            issue_id,
            summary: &details.summary,
            description: &description,
            url: &url,
            author: details.author.as_deref(),
            status: Some(&status),
            assignee: Some(&assignee),
        };
        let text = format_issue_message(
            &view,
            &self.config.alerts.target_status,
            self.config.render.description_max_len,
        );
        if let Err(e) = self.chat.edit_message_text(chat_id, message_id, &text).await {
            tracing::debug!("Post-accept message refresh for {issue_id} failed: {e}");
        }
    }

    /// Reminder delivery worker, if the feature is configured.
    pub fn build_alert_worker(&self) -> Option<AlertWorker> {
        if !self.scheduler.enabled() {
            tracing::info!("Status reminders disabled, delivery worker not built");
            return None;
        }
        Some(AlertWorker::new(self.store.clone(), self.chat.clone(), self.config.alerts.clone()))
    }

    pub fn build_archive_worker(&self) -> ArchiveWorker {
        ArchiveWorker::new(
            self.store.clone(),
            self.chat.clone(),
            self.tracker.clone(),
            self.config.archive.clone(),
            self.config.tracker.base_url.clone(),
            self.config.alerts.target_status.clone(),
            self.config.render.description_max_len,
        )
    }
}
