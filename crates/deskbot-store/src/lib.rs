//! # DeskBot Store
//!
//! Durable storage behind the [`IssueStore`] trait: SQLite for single-host
//! deployments, Postgres when the database lives elsewhere.

pub mod postgres;
pub mod sqlite;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use deskbot_core::config::StorageConfig;
use deskbot_core::types::{IssueAlertRecord, IssueMessageRecord};
use deskbot_core::{DeskBotError, Result};

pub use postgres::PostgresStore;
pub use sqlite::SqliteStore;

/// Backend-agnostic store contract.
///
/// Timestamps are ISO-8601 UTC text in both directions. Every failure
/// surfaces as [`DeskBotError::Storage`].
#[async_trait]
pub trait IssueStore: Send + Sync {
    /// Insert or refresh the issue ↔ message linkage. Always resets the
    /// archived flag and bumps `updated_at`.
    async fn upsert_issue_message(
        &self,
        issue_id: &str,
        chat_id: &str,
        message_id: i64,
    ) -> Result<()>;

    async fn fetch_issue_message(&self, issue_id: &str) -> Result<Option<IssueMessageRecord>>;

    /// Non-archived rows whose `updated_at` is at or before `cutoff`.
    async fn fetch_stale_issue_messages(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<IssueMessageRecord>>;

    async fn mark_issue_archived(&self, issue_id: &str) -> Result<()>;

    /// Replace the reminder batch for an issue: delete existing rows, then
    /// insert one row per `(alert_index, send_after)` pair, atomically.
    /// An empty batch is equivalent to [`IssueStore::clear_issue_alerts`].
    async fn upsert_issue_alerts(
        &self,
        issue_id: &str,
        chat_id: &str,
        message_id: i64,
        steps: &[(u32, DateTime<Utc>)],
    ) -> Result<()>;

    async fn clear_issue_alerts(&self, issue_id: &str) -> Result<()>;

    /// Unsent reminders with `send_after <= upper_bound`, ascending, capped
    /// at `limit` rows.
    async fn fetch_due_issue_alerts(
        &self,
        limit: u32,
        upper_bound: DateTime<Utc>,
    ) -> Result<Vec<IssueAlertRecord>>;

    async fn mark_issue_alert_sent(&self, issue_id: &str, alert_index: u32) -> Result<()>;

    async fn get_setting(&self, key: &str) -> Result<Option<String>>;
    async fn set_setting(&self, key: &str, value: &str) -> Result<()>;
    async fn delete_setting(&self, key: &str) -> Result<()>;
}

/// Fixed-width ISO-8601 text so stored timestamps compare chronologically.
pub(crate) fn format_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(chrono::SecondsFormat::Micros, false)
}

/// Open the store selected by config.
pub async fn open_store(config: &StorageConfig) -> Result<Arc<dyn IssueStore>> {
    match config.backend.as_str() {
        "sqlite" => {
            let store = SqliteStore::open(&config.resolved_path())?;
            Ok(Arc::new(store))
        }
        "postgres" => {
            let store = PostgresStore::connect(&config.url).await?;
            Ok(Arc::new(store))
        }
        other => Err(DeskBotError::Config(format!("Unknown storage backend '{other}'"))),
    }
}
