//! Scan lifecycle records
//!
//! A scan row is opened when a walk starts and closed when it ends on
//! any path. Rows still open at startup mark runs the process did not
//! survive; they are reported and cleared on boot.

use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct ScanRecord {
    pub scan_id: String,
    pub channel_id: i64,
    pub chat_title: String,
    pub label: String,
    pub total_messages: i64,
    pub processed: i64,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

/// Repository for scan lifecycle rows
pub struct ScanRepository {
    pool: SqlitePool,
}

impl ScanRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open a new scan row and return its generated ID.
    pub async fn start(
        &self,
        channel_id: i64,
        chat_title: &str,
        label: &str,
        total_messages: i64,
    ) -> Result<String> {
        let scan_id = Uuid::new_v4().to_string();
        sqlx::query(
            r#"
            INSERT INTO scans (scan_id, channel_id, chat_title, label, total_messages, processed, started_at)
            VALUES (?1, ?2, ?3, ?4, ?5, 0, datetime('now'))
            "#,
        )
        .bind(&scan_id)
        .bind(channel_id)
        .bind(chat_title)
        .bind(label)
        .bind(total_messages)
        .execute(&self.pool)
        .await?;
        Ok(scan_id)
    }

    /// Advance the processed counter. The MAX guard keeps the counter
    /// monotonic even if progress writes land out of order.
    pub async fn update_progress(&self, scan_id: &str, processed: i64) -> Result<()> {
        sqlx::query("UPDATE scans SET processed = MAX(processed, ?2) WHERE scan_id = ?1")
            .bind(scan_id)
            .bind(processed)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Close a scan row. Must run on every exit path, success or not.
    pub async fn end(&self, scan_id: &str) -> Result<()> {
        sqlx::query("UPDATE scans SET ended_at = datetime('now') WHERE scan_id = ?1")
            .bind(scan_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Scans that were never closed: evidence of a crashed or killed run.
    pub async fn interrupted(&self) -> Result<Vec<ScanRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT scan_id, channel_id, chat_title, label, total_messages, processed,
                   started_at, ended_at
            FROM scans WHERE ended_at IS NULL
            ORDER BY started_at
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::record_from_row).collect()
    }

    /// Remove all scan rows. Used after the interrupted-scan report.
    pub async fn clear_all(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM scans").execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    /// Fetch one scan row.
    pub async fn get(&self, scan_id: &str) -> Result<Option<ScanRecord>> {
        let row = sqlx::query(
            r#"
            SELECT scan_id, channel_id, chat_title, label, total_messages, processed,
                   started_at, ended_at
            FROM scans WHERE scan_id = ?1
            "#,
        )
        .bind(scan_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::record_from_row).transpose()
    }

    fn record_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<ScanRecord> {
        let started: String = row.try_get("started_at")?;
        let ended: Option<String> = row.try_get("ended_at")?;
        Ok(ScanRecord {
            scan_id: row.try_get("scan_id")?,
            channel_id: row.try_get("channel_id")?,
            chat_title: row.try_get("chat_title")?,
            label: row.try_get("label")?,
            total_messages: row.try_get("total_messages")?,
            processed: row.try_get("processed")?,
            started_at: parse_sqlite_datetime(&started)?,
            ended_at: ended.as_deref().map(parse_sqlite_datetime).transpose()?,
        })
    }
}

fn parse_sqlite_datetime(s: &str) -> Result<DateTime<Utc>> {
    let naive = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")?;
    Ok(DateTime::from_naive_utc_and_offset(naive, Utc))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_sqlite_datetime() {
        let dt = parse_sqlite_datetime("2024-06-01 12:30:45").unwrap();
        assert_eq!(dt.to_rfc3339(), "2024-06-01T12:30:45+00:00");
    }
}
