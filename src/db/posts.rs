//! Index post records: which catalog message holds which title
//!
//! Keyed by `"{channel_id}:{title}"` so the same title tracked in two
//! channels keeps independent posts.

use anyhow::Result;
use sqlx::{Row, SqlitePool};

#[derive(Debug, Clone)]
pub struct IndexPostRecord {
    pub id: String,
    pub channel_id: i64,
    pub title: String,
    /// Message ID of the published post, if one exists yet.
    pub message_id: Option<i64>,
}

/// Repository for index posts
pub struct IndexPostRepository {
    pool: SqlitePool,
}

impl IndexPostRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn make_id(channel_id: i64, title: &str) -> String {
        format!("{}:{}", channel_id, title)
    }

    /// Fetch the post record for a title, creating an unpublished one if
    /// none exists.
    pub async fn get_or_create(&self, channel_id: i64, title: &str) -> Result<IndexPostRecord> {
        let id = Self::make_id(channel_id, title);

        sqlx::query(
            r#"
            INSERT INTO index_posts (id, channel_id, title, message_id, updated_at)
            VALUES (?1, ?2, ?3, NULL, datetime('now'))
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(&id)
        .bind(channel_id)
        .bind(title)
        .execute(&self.pool)
        .await?;

        let row = sqlx::query(
            "SELECT id, channel_id, title, message_id FROM index_posts WHERE id = ?1",
        )
        .bind(&id)
        .fetch_one(&self.pool)
        .await?;

        Ok(IndexPostRecord {
            id: row.try_get("id")?,
            channel_id: row.try_get("channel_id")?,
            title: row.try_get("title")?,
            message_id: row.try_get("message_id")?,
        })
    }

    /// Record the published message ID for a post.
    pub async fn set_message_id(&self, id: &str, message_id: i64) -> Result<()> {
        sqlx::query(
            "UPDATE index_posts SET message_id = ?2, updated_at = datetime('now') WHERE id = ?1",
        )
        .bind(id)
        .bind(message_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
