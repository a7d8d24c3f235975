//! Status reminder scheduling and delivery.
//!
//! While an issue sits in the target status, a configured escalation
//! sequence of reminders is armed. Leaving the status cancels whatever has
//! not been sent yet; a background worker delivers the rest.

use std::sync::Arc;

use chrono::{Duration, Utc};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use deskbot_core::Result;
use deskbot_core::config::AlertsConfig;
use deskbot_core::render::escape_html;
use deskbot_core::traits::{ChatApi, SendOptions};
use deskbot_core::types::IssueAlertRecord;
use deskbot_store::IssueStore;

/// Rows fetched per delivery tick.
pub const BATCH_LIMIT: u32 = 20;
/// Delivery polling never runs more often than this.
const POLL_FLOOR_SECS: u64 = 30;
/// Settings key holding the runtime suffix override.
pub const ALERT_SUFFIX_KEY: &str = "alert_suffix";

/// Arms and disarms reminder sequences.
#[derive(Clone)]
pub struct AlertScheduler {
    store: Arc<dyn IssueStore>,
    config: AlertsConfig,
}

impl AlertScheduler {
    pub fn new(store: Arc<dyn IssueStore>, config: AlertsConfig) -> Self {
        Self { store, config }
    }

    /// The feature is active only when enabled and at least one step exists.
    pub fn enabled(&self) -> bool {
        self.config.enabled && !self.config.steps.is_empty()
    }

    fn is_target_status(&self, status: &str) -> bool {
        status.trim().to_lowercase() == self.config.target_status.trim().to_lowercase()
    }

    /// Arm the full reminder sequence for an issue that entered the target
    /// status. Replaces any previous sequence for the issue atomically.
    pub async fn schedule_alerts(
        &self,
        issue_id: &str,
        status: Option<&str>,
        chat_id: &str,
        message_id: i64,
    ) -> Result<()> {
        if !self.enabled() || issue_id.trim().is_empty() {
            return Ok(());
        }
        let Some(status) = status else { return Ok(()) };
        if !self.is_target_status(status) {
            return Ok(());
        }

        let now = Utc::now();
        let steps: Vec<(u32, chrono::DateTime<Utc>)> = self
            .config
            .steps
            .iter()
            .map(|step| (step.index, now + Duration::minutes(step.minutes)))
            .collect();
        self.store
            .upsert_issue_alerts(issue_id, chat_id, message_id, &steps)
            .await?;
        tracing::info!("Armed {} reminder(s) for {issue_id}", steps.len());
        Ok(())
    }

    /// Disarm pending reminders once the issue leaves the target status.
    /// With no status at hand this is a no-op: the sequence stays armed
    /// rather than being cancelled on a guess.
    pub async fn cancel_alerts(&self, issue_id: &str, status: Option<&str>) -> Result<()> {
        if !self.enabled() || issue_id.trim().is_empty() {
            return Ok(());
        }
        let Some(status) = status else { return Ok(()) };
        if self.is_target_status(status) {
            return Ok(());
        }
        self.store.clear_issue_alerts(issue_id).await?;
        tracing::debug!("Disarmed reminders for {issue_id} (status '{status}')");
        Ok(())
    }

    /// Store or clear the runtime suffix override. Blank input clears it.
    pub async fn update_alert_suffix(&self, value: &str) -> Result<()> {
        let value = value.trim();
        if value.is_empty() {
            self.store.delete_setting(ALERT_SUFFIX_KEY).await
        } else {
            self.store.set_setting(ALERT_SUFFIX_KEY, value).await
        }
    }
}

/// Background reminder delivery.
pub struct AlertWorker {
    inner: Arc<WorkerInner>,
    shutdown: watch::Sender<bool>,
    handle: Option<JoinHandle<()>>,
}

struct WorkerInner {
    store: Arc<dyn IssueStore>,
    chat: Arc<dyn ChatApi>,
    config: AlertsConfig,
    poll: std::time::Duration,
}

impl AlertWorker {
    pub fn new(
        store: Arc<dyn IssueStore>,
        chat: Arc<dyn ChatApi>,
        config: AlertsConfig,
    ) -> Self {
        let poll = std::time::Duration::from_secs(config.poll_seconds.max(POLL_FLOOR_SECS));
        let (shutdown, _) = watch::channel(false);
        Self {
            inner: Arc::new(WorkerInner { store, chat, config, poll }),
            shutdown,
            handle: None,
        }
    }

    /// Spawn the delivery loop. Calling again while running does nothing;
    /// a stopped worker can be started again.
    pub fn start(&mut self) {
        if self.handle.is_some() {
            return;
        }
        let _ = self.shutdown.send(false);
        let inner = self.inner.clone();
        let mut stop_rx = self.shutdown.subscribe();
        self.handle = Some(tokio::spawn(async move {
            tracing::info!("⏰ Reminder worker started (poll every {}s)", inner.poll.as_secs());
            loop {
                if let Err(e) = inner.tick().await {
                    tracing::warn!("Reminder tick failed: {e}");
                }
                tokio::select! {
                    _ = tokio::time::sleep(inner.poll) => {}
                    _ = stop_rx.changed() => {}
                }
                if *stop_rx.borrow() {
                    break;
                }
            }
            tracing::info!("Reminder worker stopped");
        }));
    }

    /// Signal the loop to exit and wait for it.
    pub async fn stop(&mut self) {
        let _ = self.shutdown.send(true);
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }

    /// One delivery pass.
    pub async fn tick(&self) -> Result<()> {
        self.inner.tick().await
    }

    #[cfg(test)]
    pub(crate) fn poll_interval(&self) -> std::time::Duration {
        self.inner.poll
    }

    #[cfg(test)]
    pub(crate) fn is_stop_requested(&self) -> bool {
        *self.shutdown.borrow()
    }

    #[cfg(test)]
    pub(crate) async fn compose_for_test(&self, index: u32) -> Option<String> {
        self.inner.compose_alert_message(index).await
    }
}

impl WorkerInner {
    async fn tick(&self) -> Result<()> {
        let due = self.store.fetch_due_issue_alerts(BATCH_LIMIT, Utc::now()).await?;
        for record in due {
            self.deliver(&record).await;
        }
        Ok(())
    }

    /// Deliver one reminder. Send failures leave the row pending so the next
    /// tick retries it; only a confirmed send (or a dead template) marks it.
    async fn deliver(&self, record: &IssueAlertRecord) {
        let Some(text) = self.compose_alert_message(record.alert_index).await else {
            tracing::warn!(
                "No template for reminder step {} of {}, marking sent",
                record.alert_index,
                record.issue_id
            );
            if let Err(e) = self
                .store
                .mark_issue_alert_sent(&record.issue_id, record.alert_index)
                .await
            {
                tracing::warn!("Failed to mark dead reminder for {}: {e}", record.issue_id);
            }
            return;
        };

        let text = sanitize_alert_text(&text);
        let opts = SendOptions {
            reply_to_message_id: Some(record.message_id),
            disable_web_page_preview: true,
            ..Default::default()
        };
        match self.chat.send_message(&record.chat_id, &text, opts).await {
            Ok(_) => {
                tracing::info!(
                    "Sent reminder step {} for {}",
                    record.alert_index,
                    record.issue_id
                );
                if let Err(e) = self
                    .store
                    .mark_issue_alert_sent(&record.issue_id, record.alert_index)
                    .await
                {
                    tracing::warn!("Failed to mark reminder sent for {}: {e}", record.issue_id);
                }
            }
            Err(e) => {
                tracing::warn!(
                    "Failed to send reminder step {} for {}: {e}",
                    record.alert_index,
                    record.issue_id
                );
            }
        }
    }

    /// Template for a step, with the suffix appended on configured
    /// positions. `None` when the step has no template at all.
    async fn compose_alert_message(&self, index: u32) -> Option<String> {
        let base = self.config.step_message(index)?;
        if !self.config.suffix_positions.contains(&index) {
            return Some(base.to_string());
        }
        let suffix = match self.store.get_setting(ALERT_SUFFIX_KEY).await {
            Ok(Some(value)) => value,
            Ok(None) => self.config.suffix_default.clone(),
            Err(e) => {
                tracing::debug!("Falling back to the static reminder suffix: {e}");
                self.config.suffix_default.clone()
            }
        };
        let suffix = suffix.trim();
        let suffix = suffix.strip_prefix("<br><br>").unwrap_or(suffix).trim();
        if suffix.is_empty() {
            return Some(base.to_string());
        }
        Some(format!("{base}<br><br>{}", escape_html(suffix)))
    }
}

/// Templates use `<br>` line breaks; Telegram wants real newlines.
fn sanitize_alert_text(text: &str) -> String {
    text.replace("<br/>", "\n").replace("<br>", "\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeChat, temp_store, test_alerts_config};
    use deskbot_core::DeskBotError;

    fn scheduler(store: Arc<dyn IssueStore>, config: AlertsConfig) -> AlertScheduler {
        AlertScheduler::new(store, config)
    }

    #[tokio::test]
    async fn schedules_one_row_per_step_with_increasing_delays() {
        let store = temp_store("arm");
        let sched = scheduler(store.clone(), test_alerts_config());

        sched.schedule_alerts("DESK-1", Some("New"), "-100", 42).await.unwrap();

        let far = Utc::now() + Duration::days(2);
        let rows = store.fetch_due_issue_alerts(BATCH_LIMIT, far).await.unwrap();
        assert_eq!(rows.len(), 3);
        let mut prev = String::new();
        for row in &rows {
            assert!(row.send_after > prev, "send_after must strictly increase");
            prev = row.send_after.clone();
        }
    }

    #[tokio::test]
    async fn schedule_requires_target_status_case_insensitively() {
        let store = temp_store("target");
        let sched = scheduler(store.clone(), test_alerts_config());

        sched.schedule_alerts("DESK-1", Some("  nEw "), "-100", 42).await.unwrap();
        sched.schedule_alerts("DESK-2", Some("In Progress"), "-100", 43).await.unwrap();
        sched.schedule_alerts("DESK-3", None, "-100", 44).await.unwrap();

        let far = Utc::now() + Duration::days(2);
        let rows = store.fetch_due_issue_alerts(BATCH_LIMIT, far).await.unwrap();
        assert!(rows.iter().all(|r| r.issue_id == "DESK-1"));
        assert_eq!(rows.len(), 3);
    }

    #[tokio::test]
    async fn disabled_or_empty_steps_schedule_nothing() {
        let store = temp_store("disabled");
        let mut config = test_alerts_config();
        config.enabled = false;
        scheduler(store.clone(), config)
            .schedule_alerts("DESK-1", Some("New"), "-100", 42)
            .await
            .unwrap();

        let mut config = test_alerts_config();
        config.steps.clear();
        scheduler(store.clone(), config)
            .schedule_alerts("DESK-2", Some("New"), "-100", 43)
            .await
            .unwrap();

        let far = Utc::now() + Duration::days(2);
        assert!(store.fetch_due_issue_alerts(BATCH_LIMIT, far).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn cancel_on_an_unscheduled_issue_is_a_quiet_no_op() {
        let store = temp_store("cancel-none");
        let sched = scheduler(store.clone(), test_alerts_config());
        sched.schedule_alerts("DESK-1", Some("New"), "-100", 42).await.unwrap();

        // No rows exist for this issue; nothing fails and nothing else moves.
        sched.cancel_alerts("DESK-NONE", Some("In Progress")).await.unwrap();

        let far = Utc::now() + Duration::days(2);
        let rows = store.fetch_due_issue_alerts(BATCH_LIMIT, far).await.unwrap();
        assert_eq!(rows.len(), 3);
        assert!(rows.iter().all(|r| r.issue_id == "DESK-1"));
    }

    #[tokio::test]
    async fn cancel_clears_only_on_a_known_non_target_status() {
        let store = temp_store("cancel");
        let sched = scheduler(store.clone(), test_alerts_config());
        let far = Utc::now() + Duration::days(2);

        sched.schedule_alerts("DESK-1", Some("New"), "-100", 42).await.unwrap();

        // Unknown status: keep the sequence armed.
        sched.cancel_alerts("DESK-1", None).await.unwrap();
        assert_eq!(store.fetch_due_issue_alerts(BATCH_LIMIT, far).await.unwrap().len(), 3);

        // Still in the target status: keep it armed too.
        sched.cancel_alerts("DESK-1", Some("new")).await.unwrap();
        assert_eq!(store.fetch_due_issue_alerts(BATCH_LIMIT, far).await.unwrap().len(), 3);

        sched.cancel_alerts("DESK-1", Some("In Progress")).await.unwrap();
        assert!(store.fetch_due_issue_alerts(BATCH_LIMIT, far).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn full_lifecycle_send_then_cancel() {
        let store = temp_store("lifecycle");
        let sched = scheduler(store.clone(), test_alerts_config());
        sched.schedule_alerts("DESK-1", Some("New"), "-100", 42).await.unwrap();

        // Just past the first step's delay: exactly one reminder is due.
        let after_first = Utc::now() + Duration::minutes(61);
        let due = store.fetch_due_issue_alerts(BATCH_LIMIT, after_first).await.unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].alert_index, 1);
        store.mark_issue_alert_sent("DESK-1", 1).await.unwrap();

        // The issue moves on before step 2 fires.
        sched.cancel_alerts("DESK-1", Some("In Progress")).await.unwrap();
        let after_second = Utc::now() + Duration::minutes(181);
        assert!(store.fetch_due_issue_alerts(BATCH_LIMIT, after_second).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn worker_sends_due_reminder_as_reply_and_marks_it() {
        let store = temp_store("deliver");
        let chat = Arc::new(FakeChat::new());
        let past = Utc::now() - Duration::minutes(5);
        store.upsert_issue_alerts("DESK-1", "-100", 42, &[(1, past)]).await.unwrap();

        let worker = AlertWorker::new(store.clone(), chat.clone(), test_alerts_config());
        worker.tick().await.unwrap();

        let sent = chat.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].chat_id, "-100");
        assert_eq!(sent[0].reply_to, Some(42));
        assert!(sent[0].text.contains("First reminder"));
        assert!(sent[0].preview_disabled);
        drop(sent);

        assert!(store.fetch_due_issue_alerts(BATCH_LIMIT, Utc::now()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn send_failure_leaves_the_row_pending() {
        let store = temp_store("sendfail");
        let chat = Arc::new(FakeChat::new());
        chat.fail_next_send(DeskBotError::Telegram("boom".into()));
        let past = Utc::now() - Duration::minutes(5);
        store.upsert_issue_alerts("DESK-1", "-100", 42, &[(1, past)]).await.unwrap();

        let worker = AlertWorker::new(store.clone(), chat.clone(), test_alerts_config());
        worker.tick().await.unwrap();
        assert_eq!(store.fetch_due_issue_alerts(BATCH_LIMIT, Utc::now()).await.unwrap().len(), 1);

        // Next tick succeeds and marks the row.
        worker.tick().await.unwrap();
        assert!(store.fetch_due_issue_alerts(BATCH_LIMIT, Utc::now()).await.unwrap().is_empty());
        assert_eq!(chat.sent.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn missing_template_is_marked_sent_without_sending() {
        let store = temp_store("notemplate");
        let chat = Arc::new(FakeChat::new());
        let past = Utc::now() - Duration::minutes(5);
        store.upsert_issue_alerts("DESK-1", "-100", 42, &[(9, past)]).await.unwrap();

        let worker = AlertWorker::new(store.clone(), chat.clone(), test_alerts_config());
        worker.tick().await.unwrap();

        assert!(chat.sent.lock().unwrap().is_empty());
        assert!(store.fetch_due_issue_alerts(BATCH_LIMIT, Utc::now()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn suffix_applies_only_to_configured_positions() {
        let store = temp_store("suffix-pos");
        let chat = Arc::new(FakeChat::new());
        let mut config = test_alerts_config();
        config.suffix_default = "call the helpdesk".into();
        let worker = AlertWorker::new(store, chat, config);

        assert_eq!(worker.compose_for_test(1).await.unwrap(), "First reminder");
        assert_eq!(
            worker.compose_for_test(2).await.unwrap(),
            "Second reminder<br><br>call the helpdesk"
        );
    }

    #[tokio::test]
    async fn stored_suffix_overrides_the_default_and_is_escaped() {
        let store = temp_store("suffix-store");
        let chat = Arc::new(FakeChat::new());
        let mut config = test_alerts_config();
        config.suffix_default = "static".into();
        store.set_setting(ALERT_SUFFIX_KEY, "<br><br>ping <admin>").await.unwrap();
        let worker = AlertWorker::new(store, chat, config);

        // The leading break markup is stripped, the rest HTML-escaped.
        assert_eq!(
            worker.compose_for_test(2).await.unwrap(),
            "Second reminder<br><br>ping &lt;admin&gt;"
        );
    }

    #[tokio::test]
    async fn update_alert_suffix_blank_clears_override() {
        let store = temp_store("suffix-clear");
        let sched = scheduler(store.clone(), test_alerts_config());
        sched.update_alert_suffix("new text").await.unwrap();
        assert_eq!(store.get_setting(ALERT_SUFFIX_KEY).await.unwrap().as_deref(), Some("new text"));
        sched.update_alert_suffix("   ").await.unwrap();
        assert!(store.get_setting(ALERT_SUFFIX_KEY).await.unwrap().is_none());
    }

    #[test]
    fn sanitize_converts_break_markup() {
        assert_eq!(sanitize_alert_text("a<br>b<br/>c"), "a\nb\nc");
    }

    #[tokio::test]
    async fn poll_interval_has_a_floor() {
        let store = temp_store("floor");
        let chat = Arc::new(FakeChat::new());
        let mut config = test_alerts_config();
        config.poll_seconds = 5;
        let worker = AlertWorker::new(store, chat, config);
        assert_eq!(worker.poll_interval().as_secs(), POLL_FLOOR_SECS);
    }

    #[tokio::test]
    async fn worker_start_and_stop() {
        let store = temp_store("startstop");
        let chat = Arc::new(FakeChat::new());
        let mut worker = AlertWorker::new(store, chat, test_alerts_config());
        worker.start();
        worker.start(); // second start is a no-op
        worker.stop().await;
        worker.stop().await; // stop is idempotent
    }

    #[tokio::test]
    async fn worker_can_be_restarted_after_stop() {
        let store = temp_store("restart");
        let chat = Arc::new(FakeChat::new());
        let mut worker = AlertWorker::new(store, chat, test_alerts_config());
        worker.start();
        worker.stop().await;
        assert!(worker.is_stop_requested());

        // A fresh start clears the shutdown flag so the loop keeps running.
        worker.start();
        assert!(!worker.is_stop_requested());
        worker.stop().await;
    }
}
