//! Archives Telegram messages for issues nobody touched in a long time.

use std::sync::Arc;

use chrono::{Duration, Utc};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use deskbot_core::Result;
use deskbot_core::config::ArchiveConfig;
use deskbot_core::messages::{Msg, render};
use deskbot_core::render::{IssueView, build_issue_url, format_issue_message, strip_html};
use deskbot_core::traits::{ChatApi, TrackerApi};
use deskbot_core::types::IssueMessageRecord;
use deskbot_store::IssueStore;

/// Periodically rewrites stale linked messages with the archived status
/// label and flags them so they are never edited again.
pub struct ArchiveWorker {
    inner: Arc<ArchiverInner>,
    shutdown: watch::Sender<bool>,
    handle: Option<JoinHandle<()>>,
}

struct ArchiverInner {
    store: Arc<dyn IssueStore>,
    chat: Arc<dyn ChatApi>,
    tracker: Arc<dyn TrackerApi>,
    idle_threshold: Duration,
    interval: std::time::Duration,
    tracker_base_url: String,
    target_status: String,
    description_max_len: usize,
}

impl ArchiveWorker {
    pub fn new(
        store: Arc<dyn IssueStore>,
        chat: Arc<dyn ChatApi>,
        tracker: Arc<dyn TrackerApi>,
        config: ArchiveConfig,
        tracker_base_url: String,
        target_status: String,
        description_max_len: usize,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            inner: Arc::new(ArchiverInner {
                store,
                chat,
                tracker,
                idle_threshold: Duration::seconds(config.idle_threshold_seconds as i64),
                interval: std::time::Duration::from_secs(config.scan_interval_seconds.max(1)),
                tracker_base_url,
                target_status,
                description_max_len,
            }),
            shutdown,
            handle: None,
        }
    }

    /// Spawn the scan loop. Calling again while running does nothing;
    /// a stopped worker can be started again.
    pub fn start(&mut self) {
        if self.handle.is_some() {
            return;
        }
        let _ = self.shutdown.send(false);
        let inner = self.inner.clone();
        let mut stop_rx = self.shutdown.subscribe();
        self.handle = Some(tokio::spawn(async move {
            tracing::info!(
                "🗄️ Archive worker started (scan every {}s)",
                inner.interval.as_secs()
            );
            loop {
                if let Err(e) = inner.tick().await {
                    tracing::warn!("Archive scan failed: {e}");
                }
                tokio::select! {
                    _ = tokio::time::sleep(inner.interval) => {}
                    _ = stop_rx.changed() => {}
                }
                if *stop_rx.borrow() {
                    break;
                }
            }
            tracing::info!("Archive worker stopped");
        }));
    }

    /// Signal the loop to exit and wait for it.
    pub async fn stop(&mut self) {
        let _ = self.shutdown.send(true);
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }

    /// One scan pass.
    pub async fn tick(&self) -> Result<()> {
        self.inner.tick().await
    }

    #[cfg(test)]
    pub(crate) fn is_stop_requested(&self) -> bool {
        *self.shutdown.borrow()
    }
}

impl ArchiverInner {
    async fn tick(&self) -> Result<()> {
        let cutoff = Utc::now() - self.idle_threshold;
        let stale = self.store.fetch_stale_issue_messages(cutoff).await?;
        if !stale.is_empty() {
            tracing::debug!("Archiving {} stale message(s)", stale.len());
        }
        for record in stale {
            self.archive_one(&record).await;
        }
        Ok(())
    }

    /// Archive a single row. Any failure leaves the row untouched so the
    /// next scan retries it.
    async fn archive_one(&self, record: &IssueMessageRecord) {
        let details = match self.tracker.fetch_issue_details(&record.issue_id).await {
            Ok(Some(details)) => details,
            Ok(None) => {
                tracing::warn!("No details for stale issue {}, keeping it", record.issue_id);
                return;
            }
            Err(e) => {
                tracing::warn!("Detail fetch for stale issue {} failed: {e}", record.issue_id);
                return;
            }
        };

        let description = strip_html(details.description.as_deref().unwrap_or(""));
        let url = build_issue_url(&self.tracker_base_url, &record.issue_id);
        let view = IssueView {
            issue_id: &record.issue_id,
            summary: &details.summary,
            description: &description,
            url: &url,
            author: details.author.as_deref(),
            status: Some(render(Msg::StatusArchived)),
            assignee: details.assignee.as_deref(),
        };
        let text = format_issue_message(&view, &self.target_status, self.description_max_len);

        if let Err(e) = self
            .chat
            .edit_message_text(&record.chat_id, record.message_id, &text)
            .await
        {
            tracing::warn!("Failed to archive message for {}: {e}", record.issue_id);
            return;
        }
        match self.store.mark_issue_archived(&record.issue_id).await {
            Ok(()) => tracing::info!("Archived message for idle issue {}", record.issue_id),
            Err(e) => tracing::warn!("Failed to flag {} as archived: {e}", record.issue_id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeChat, FakeTracker, sample_details, temp_store};

    fn worker(
        store: Arc<dyn IssueStore>,
        chat: Arc<FakeChat>,
        tracker: Arc<FakeTracker>,
    ) -> ArchiveWorker {
        // Zero idle threshold: everything already written counts as stale.
        let config = ArchiveConfig { scan_interval_seconds: 3600, idle_threshold_seconds: 0 };
        ArchiveWorker::new(
            store,
            chat,
            tracker,
            config,
            "https://yt.example.com".into(),
            "New".into(),
            500,
        )
    }

    #[tokio::test]
    async fn archives_stale_message_and_flags_the_row() {
        let store = temp_store("archive");
        store.upsert_issue_message("DESK-1", "-100", 42).await.unwrap();
        let chat = Arc::new(FakeChat::new());
        let tracker = Arc::new(FakeTracker::new());
        tracker.push_details(Some(sample_details()));

        worker(store.clone(), chat.clone(), tracker).tick().await.unwrap();

        let edits = chat.edits.lock().unwrap();
        assert_eq!(edits.len(), 1);
        assert!(edits[0].text.starts_with("⚪"));
        assert!(edits[0].text.contains(render(Msg::StatusArchived)));
        drop(edits);

        let record = store.fetch_issue_message("DESK-1").await.unwrap().unwrap();
        assert!(record.archived);

        // Archived rows are invisible to later scans.
        let cutoff = Utc::now() + Duration::hours(1);
        assert!(store.fetch_stale_issue_messages(cutoff).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn missing_details_leave_the_row_for_the_next_scan() {
        let store = temp_store("archive-nodetails");
        store.upsert_issue_message("DESK-1", "-100", 42).await.unwrap();
        let chat = Arc::new(FakeChat::new());
        let tracker = Arc::new(FakeTracker::new());

        worker(store.clone(), chat.clone(), tracker).tick().await.unwrap();

        assert_eq!(chat.edit_count(), 0);
        assert!(!store.fetch_issue_message("DESK-1").await.unwrap().unwrap().archived);
    }

    #[tokio::test]
    async fn edit_failure_leaves_the_row_for_the_next_scan() {
        let store = temp_store("archive-editfail");
        store.upsert_issue_message("DESK-1", "-100", 42).await.unwrap();
        let chat = Arc::new(FakeChat::new());
        chat.fail_next_edit(deskbot_core::DeskBotError::Telegram("boom".into()));
        let tracker = Arc::new(FakeTracker::new());
        tracker.push_details(Some(sample_details()));
        tracker.push_details(Some(sample_details()));

        let worker = worker(store.clone(), chat.clone(), tracker);
        worker.tick().await.unwrap();
        assert!(!store.fetch_issue_message("DESK-1").await.unwrap().unwrap().archived);

        // The retry on the next scan succeeds.
        worker.tick().await.unwrap();
        assert!(store.fetch_issue_message("DESK-1").await.unwrap().unwrap().archived);
    }

    #[tokio::test]
    async fn fresh_rows_are_not_archived() {
        let store = temp_store("archive-fresh");
        store.upsert_issue_message("DESK-1", "-100", 42).await.unwrap();
        let chat = Arc::new(FakeChat::new());
        let tracker = Arc::new(FakeTracker::new());
        let config = ArchiveConfig { scan_interval_seconds: 3600, idle_threshold_seconds: 86_400 };
        let worker = ArchiveWorker::new(
            store.clone(),
            chat.clone(),
            tracker,
            config,
            "https://yt.example.com".into(),
            "New".into(),
            500,
        );

        worker.tick().await.unwrap();
        assert_eq!(chat.edit_count(), 0);
        assert!(!store.fetch_issue_message("DESK-1").await.unwrap().unwrap().archived);
    }

    #[tokio::test]
    async fn worker_start_and_stop() {
        let store = temp_store("archive-startstop");
        let chat = Arc::new(FakeChat::new());
        let tracker = Arc::new(FakeTracker::new());
        let mut worker = worker(store, chat, tracker);
        worker.start();
        worker.stop().await;
    }

    #[tokio::test]
    async fn worker_can_be_restarted_after_stop() {
        let store = temp_store("archive-restart");
        let chat = Arc::new(FakeChat::new());
        let tracker = Arc::new(FakeTracker::new());
        let mut worker = worker(store, chat, tracker);
        worker.start();
        worker.stop().await;
        assert!(worker.is_stop_requested());

        // A fresh start clears the shutdown flag so the loop keeps running.
        worker.start();
        assert!(!worker.is_stop_requested());
        worker.stop().await;
    }
}
