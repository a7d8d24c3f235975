//! SQLite store backend.

use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};

use deskbot_core::types::{IssueAlertRecord, IssueMessageRecord};
use deskbot_core::{DeskBotError, Result};

use crate::{IssueStore, format_ts};

/// Single-file SQLite backend. The connection is serialized behind a mutex,
/// which is plenty for this workload.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

fn storage_err(e: impl std::fmt::Display) -> DeskBotError {
    DeskBotError::Storage(e.to_string())
}

impl SqliteStore {
    /// Open (creating if necessary) the database at `path` and migrate.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path).map_err(storage_err)?;
        conn.pragma_update(None, "journal_mode", "WAL").map_err(storage_err)?;
        Self::migrate(&conn)?;
        tracing::debug!("SQLite store ready at {}", path.display());
        Ok(Self { conn: Mutex::new(conn) })
    }

    fn migrate(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS issue_messages (
                issue_id    TEXT PRIMARY KEY,
                chat_id     TEXT NOT NULL,
                message_id  INTEGER NOT NULL,
                updated_at  TEXT NOT NULL,
                archived    INTEGER NOT NULL DEFAULT 0
            );

            CREATE TABLE IF NOT EXISTS issue_alerts (
                issue_id    TEXT NOT NULL,
                alert_index INTEGER NOT NULL,
                chat_id     TEXT NOT NULL,
                message_id  INTEGER NOT NULL,
                send_after  TEXT NOT NULL,
                sent_at     TEXT,
                PRIMARY KEY (issue_id, alert_index)
            );
            CREATE INDEX IF NOT EXISTS idx_issue_alerts_due ON issue_alerts (send_after);

            CREATE TABLE IF NOT EXISTS settings (
                key        TEXT PRIMARY KEY,
                value      TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            "#,
        )
        .map_err(storage_err)?;

        // Pre-archiver databases lack the archived column. The ALTER fails
        // harmlessly once the column exists.
        conn.execute(
            "ALTER TABLE issue_messages ADD COLUMN archived INTEGER NOT NULL DEFAULT 0",
            [],
        )
        .ok();
        Ok(())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| DeskBotError::Storage("connection mutex poisoned".into()))
    }
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<IssueMessageRecord> {
    Ok(IssueMessageRecord {
        issue_id: row.get(0)?,
        chat_id: row.get(1)?,
        message_id: row.get(2)?,
        updated_at: row.get(3)?,
        archived: row.get::<_, i64>(4)? != 0,
    })
}

fn row_to_alert(row: &rusqlite::Row<'_>) -> rusqlite::Result<IssueAlertRecord> {
    Ok(IssueAlertRecord {
        issue_id: row.get(0)?,
        alert_index: row.get(1)?,
        chat_id: row.get(2)?,
        message_id: row.get(3)?,
        send_after: row.get(4)?,
    })
}

#[async_trait]
impl IssueStore for SqliteStore {
    async fn upsert_issue_message(
        &self,
        issue_id: &str,
        chat_id: &str,
        message_id: i64,
    ) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO issue_messages (issue_id, chat_id, message_id, updated_at, archived)
             VALUES (?1, ?2, ?3, ?4, 0)
             ON CONFLICT(issue_id) DO UPDATE SET
                 chat_id = excluded.chat_id,
                 message_id = excluded.message_id,
                 updated_at = excluded.updated_at,
                 archived = 0",
            params![issue_id, chat_id, message_id, format_ts(Utc::now())],
        )
        .map_err(storage_err)?;
        Ok(())
    }

    async fn fetch_issue_message(&self, issue_id: &str) -> Result<Option<IssueMessageRecord>> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT issue_id, chat_id, message_id, updated_at, archived
             FROM issue_messages WHERE issue_id = ?1",
            params![issue_id],
            row_to_message,
        )
        .optional()
        .map_err(storage_err)
    }

    async fn fetch_stale_issue_messages(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<IssueMessageRecord>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT issue_id, chat_id, message_id, updated_at, archived
                 FROM issue_messages
                 WHERE archived = 0 AND updated_at <= ?1
                 ORDER BY updated_at ASC",
            )
            .map_err(storage_err)?;
        let rows = stmt
            .query_map(params![format_ts(cutoff)], row_to_message)
            .map_err(storage_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(storage_err)
    }

    async fn mark_issue_archived(&self, issue_id: &str) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE issue_messages SET archived = 1, updated_at = ?2 WHERE issue_id = ?1",
            params![issue_id, format_ts(Utc::now())],
        )
        .map_err(storage_err)?;
        Ok(())
    }

    async fn upsert_issue_alerts(
        &self,
        issue_id: &str,
        chat_id: &str,
        message_id: i64,
        steps: &[(u32, DateTime<Utc>)],
    ) -> Result<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(storage_err)?;
        tx.execute("DELETE FROM issue_alerts WHERE issue_id = ?1", params![issue_id])
            .map_err(storage_err)?;
        for (alert_index, send_after) in steps {
            tx.execute(
                "INSERT INTO issue_alerts (issue_id, alert_index, chat_id, message_id, send_after)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![issue_id, alert_index, chat_id, message_id, format_ts(*send_after)],
            )
            .map_err(storage_err)?;
        }
        tx.commit().map_err(storage_err)?;
        Ok(())
    }

    async fn clear_issue_alerts(&self, issue_id: &str) -> Result<()> {
        let conn = self.lock()?;
        conn.execute("DELETE FROM issue_alerts WHERE issue_id = ?1", params![issue_id])
            .map_err(storage_err)?;
        Ok(())
    }

    async fn fetch_due_issue_alerts(
        &self,
        limit: u32,
        upper_bound: DateTime<Utc>,
    ) -> Result<Vec<IssueAlertRecord>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT issue_id, alert_index, chat_id, message_id, send_after
                 FROM issue_alerts
                 WHERE sent_at IS NULL AND send_after <= ?1
                 ORDER BY send_after ASC
                 LIMIT ?2",
            )
            .map_err(storage_err)?;
        let rows = stmt
            .query_map(params![format_ts(upper_bound), limit], row_to_alert)
            .map_err(storage_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(storage_err)
    }

    async fn mark_issue_alert_sent(&self, issue_id: &str, alert_index: u32) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE issue_alerts SET sent_at = ?3 WHERE issue_id = ?1 AND alert_index = ?2",
            params![issue_id, alert_index, format_ts(Utc::now())],
        )
        .map_err(storage_err)?;
        Ok(())
    }

    async fn get_setting(&self, key: &str) -> Result<Option<String>> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT value FROM settings WHERE key = ?1",
            params![key],
            |row| row.get(0),
        )
        .optional()
        .map_err(storage_err)
    }

    async fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO settings (key, value, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            params![key, value, format_ts(Utc::now())],
        )
        .map_err(storage_err)?;
        Ok(())
    }

    async fn delete_setting(&self, key: &str) -> Result<()> {
        let conn = self.lock()?;
        conn.execute("DELETE FROM settings WHERE key = ?1", params![key])
            .map_err(storage_err)?;
        Ok(())
    }
}
