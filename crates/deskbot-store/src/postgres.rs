//! Postgres store backend.
//!
//! Same contract and table layout as the SQLite backend, for deployments
//! where the database lives on another host.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;

use deskbot_core::types::{IssueAlertRecord, IssueMessageRecord};
use deskbot_core::{DeskBotError, Result};

use crate::{IssueStore, format_ts};

pub struct PostgresStore {
    pool: PgPool,
}

fn storage_err(e: sqlx::Error) -> DeskBotError {
    DeskBotError::Storage(e.to_string())
}

impl PostgresStore {
    /// Connect to `url` and migrate.
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(url)
            .await
            .map_err(storage_err)?;
        let store = Self { pool };
        store.migrate().await?;
        tracing::debug!("Postgres store ready");
        Ok(store)
    }

    async fn migrate(&self) -> Result<()> {
        let statements = [
            "CREATE TABLE IF NOT EXISTS issue_messages (
                issue_id    TEXT PRIMARY KEY,
                chat_id     TEXT NOT NULL,
                message_id  BIGINT NOT NULL,
                updated_at  TEXT NOT NULL,
                archived    BOOLEAN NOT NULL DEFAULT FALSE
            )",
            "CREATE TABLE IF NOT EXISTS issue_alerts (
                issue_id    TEXT NOT NULL,
                alert_index INTEGER NOT NULL,
                chat_id     TEXT NOT NULL,
                message_id  BIGINT NOT NULL,
                send_after  TEXT NOT NULL,
                sent_at     TEXT,
                PRIMARY KEY (issue_id, alert_index)
            )",
            "CREATE INDEX IF NOT EXISTS idx_issue_alerts_due ON issue_alerts (send_after)",
            "CREATE TABLE IF NOT EXISTS settings (
                key        TEXT PRIMARY KEY,
                value      TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
            "ALTER TABLE issue_messages ADD COLUMN IF NOT EXISTS archived BOOLEAN NOT NULL DEFAULT FALSE",
        ];
        for sql in statements {
            sqlx::query(sql).execute(&self.pool).await.map_err(storage_err)?;
        }
        Ok(())
    }
}

fn row_to_message(row: &PgRow) -> std::result::Result<IssueMessageRecord, sqlx::Error> {
    Ok(IssueMessageRecord {
        issue_id: row.try_get("issue_id")?,
        chat_id: row.try_get("chat_id")?,
        message_id: row.try_get("message_id")?,
        updated_at: row.try_get("updated_at")?,
        archived: row.try_get("archived")?,
    })
}

fn row_to_alert(row: &PgRow) -> std::result::Result<IssueAlertRecord, sqlx::Error> {
    let alert_index: i32 = row.try_get("alert_index")?;
    Ok(IssueAlertRecord {
        issue_id: row.try_get("issue_id")?,
        alert_index: alert_index as u32,
        chat_id: row.try_get("chat_id")?,
        message_id: row.try_get("message_id")?,
        send_after: row.try_get("send_after")?,
    })
}

#[async_trait]
impl IssueStore for PostgresStore {
    async fn upsert_issue_message(
        &self,
        issue_id: &str,
        chat_id: &str,
        message_id: i64,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO issue_messages (issue_id, chat_id, message_id, updated_at, archived)
             VALUES ($1, $2, $3, $4, FALSE)
             ON CONFLICT (issue_id) DO UPDATE SET
                 chat_id = EXCLUDED.chat_id,
                 message_id = EXCLUDED.message_id,
                 updated_at = EXCLUDED.updated_at,
                 archived = FALSE",
        )
        .bind(issue_id)
        .bind(chat_id)
        .bind(message_id)
        .bind(format_ts(Utc::now()))
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;
        Ok(())
    }

    async fn fetch_issue_message(&self, issue_id: &str) -> Result<Option<IssueMessageRecord>> {
        let row = sqlx::query(
            "SELECT issue_id, chat_id, message_id, updated_at, archived
             FROM issue_messages WHERE issue_id = $1",
        )
        .bind(issue_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_err)?;
        row.as_ref().map(row_to_message).transpose().map_err(storage_err)
    }

    async fn fetch_stale_issue_messages(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<IssueMessageRecord>> {
        let rows = sqlx::query(
            "SELECT issue_id, chat_id, message_id, updated_at, archived
             FROM issue_messages
             WHERE archived = FALSE AND updated_at <= $1
             ORDER BY updated_at ASC",
        )
        .bind(format_ts(cutoff))
        .fetch_all(&self.pool)
        .await
        .map_err(storage_err)?;
        rows.iter().map(row_to_message).collect::<std::result::Result<_, _>>().map_err(storage_err)
    }

    async fn mark_issue_archived(&self, issue_id: &str) -> Result<()> {
        sqlx::query("UPDATE issue_messages SET archived = TRUE, updated_at = $2 WHERE issue_id = $1")
            .bind(issue_id)
            .bind(format_ts(Utc::now()))
            .execute(&self.pool)
            .await
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
        let mut tx = self.pool.begin().await.map_err(storage_err)?;
        sqlx::query("DELETE FROM issue_alerts WHERE issue_id = $1")
            .bind(issue_id)
            .execute(&mut *tx)
            .await
            .map_err(storage_err)?;
        for (alert_index, send_after) in steps {
            sqlx::query(
                "INSERT INTO issue_alerts (issue_id, alert_index, chat_id, message_id, send_after)
                 VALUES ($1, $2, $3, $4, $5)",
            )
            .bind(issue_id)
            .bind(*alert_index as i32)
            .bind(chat_id)
            .bind(message_id)
            .bind(format_ts(*send_after))
            .execute(&mut *tx)
            .await
            .map_err(storage_err)?;
        }
        tx.commit().await.map_err(storage_err)?;
        Ok(())
    }

    async fn clear_issue_alerts(&self, issue_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM issue_alerts WHERE issue_id = $1")
            .bind(issue_id)
            .execute(&self.pool)
            .await
            .map_err(storage_err)?;
        Ok(())
    }

    async fn fetch_due_issue_alerts(
        &self,
        limit: u32,
        upper_bound: DateTime<Utc>,
    ) -> Result<Vec<IssueAlertRecord>> {
        let rows = sqlx::query(
            "SELECT issue_id, alert_index, chat_id, message_id, send_after
             FROM issue_alerts
             WHERE sent_at IS NULL AND send_after <= $1
             ORDER BY send_after ASC
             LIMIT $2",
        )
        .bind(format_ts(upper_bound))
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(storage_err)?;
        rows.iter().map(row_to_alert).collect::<std::result::Result<_, _>>().map_err(storage_err)
    }

    async fn mark_issue_alert_sent(&self, issue_id: &str, alert_index: u32) -> Result<()> {
        sqlx::query(
            "UPDATE issue_alerts SET sent_at = $3 WHERE issue_id = $1 AND alert_index = $2",
        )
        .bind(issue_id)
        .bind(alert_index as i32)
        .bind(format_ts(Utc::now()))
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;
        Ok(())
    }

    async fn get_setting(&self, key: &str) -> Result<Option<String>> {
        let row = sqlx::query("SELECT value FROM settings WHERE key = $1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_err)?;
        row.map(|r| r.try_get("value")).transpose().map_err(storage_err)
    }

    async fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO settings (key, value, updated_at) VALUES ($1, $2, $3)
             ON CONFLICT (key) DO UPDATE SET value = EXCLUDED.value, updated_at = EXCLUDED.updated_at",
        )
        .bind(key)
        .bind(value)
        .bind(format_ts(Utc::now()))
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;
        Ok(())
    }

    async fn delete_setting(&self, key: &str) -> Result<()> {
        sqlx::query("DELETE FROM settings WHERE key = $1")
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(storage_err)?;
        Ok(())
    }
}
