//! Cache of already-processed message IDs per channel
//!
//! Lets an interrupted walk resume without refetching history it has
//! already seen.

use std::collections::HashSet;

use anyhow::Result;
use sqlx::{Row, SqlitePool};

/// Repository for cached message IDs
pub struct MessageCacheRepository {
    pool: SqlitePool,
}

impl MessageCacheRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// All message IDs already processed for a channel.
    pub async fn get_cached_ids(&self, channel_id: i64) -> Result<HashSet<i64>> {
        let rows =
            sqlx::query("SELECT message_id FROM cached_message_ids WHERE channel_id = ?1")
                .bind(channel_id)
                .fetch_all(&self.pool)
                .await?;

        rows.iter()
            .map(|r| r.try_get::<i64, _>("message_id").map_err(Into::into))
            .collect()
    }

    /// Mark a batch of message IDs as processed. Re-inserting a known ID
    /// is a no-op.
    pub async fn add_ids(&self, channel_id: i64, ids: &[i64]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;
        for id in ids {
            sqlx::query(
                "INSERT OR IGNORE INTO cached_message_ids (channel_id, message_id) VALUES (?1, ?2)",
            )
            .bind(channel_id)
            .bind(id)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Drop the cache for a channel, forcing the next walk to start over.
    pub async fn clear(&self, channel_id: i64) -> Result<u64> {
        let result = sqlx::query("DELETE FROM cached_message_ids WHERE channel_id = ?1")
            .bind(channel_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// Number of cached IDs for a channel.
    pub async fn count(&self, channel_id: i64) -> Result<i64> {
        let row =
            sqlx::query("SELECT COUNT(*) AS n FROM cached_message_ids WHERE channel_id = ?1")
                .bind(channel_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(row.try_get("n")?)
    }
}
