//! Database connection and operations

pub mod aggregates;
pub mod message_cache;
pub mod posts;
pub mod scans;

use anyhow::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::str::FromStr;

pub use aggregates::{AggregateRepository, QualityCell, SeasonAggregate, TitleAggregate, TitleDoc, VersionRecord};
pub use message_cache::MessageCacheRepository;
pub use posts::{IndexPostRecord, IndexPostRepository};
pub use scans::{ScanRecord, ScanRepository};

/// Database wrapper providing connection pool access
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Create a new database wrapper from an existing pool
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Get the maximum connection pool size from environment or default
    fn get_max_connections() -> u32 {
        std::env::var("DATABASE_MAX_CONNECTIONS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(5)
    }

    /// Create a new database connection pool and ensure the schema exists
    pub async fn connect(url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
        // An in-memory database exists per connection, so the pool must
        // not open a second one.
        let max_connections = if url.contains(":memory:") {
            1
        } else {
            Self::get_max_connections()
        };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;

        let db = Self { pool };
        db.init_schema().await?;
        Ok(db)
    }

    /// Create a new database connection pool with retry logic
    /// Retries every `retry_interval` until successful
    pub async fn connect_with_retry(url: &str, retry_interval: std::time::Duration) -> Self {
        loop {
            match Self::connect(url).await {
                Ok(db) => return db,
                Err(e) => {
                    eprintln!(
                        "Database connection failed: {}. Retrying in {} seconds...",
                        e,
                        retry_interval.as_secs()
                    );
                    tokio::time::sleep(retry_interval).await;
                }
            }
        }
    }

    /// Get the connection pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Get a message cache repository
    pub fn message_cache(&self) -> MessageCacheRepository {
        MessageCacheRepository::new(self.pool.clone())
    }

    /// Get a title aggregate repository
    pub fn aggregates(&self) -> AggregateRepository {
        AggregateRepository::new(self.pool.clone())
    }

    /// Get an index post repository
    pub fn posts(&self) -> IndexPostRepository {
        IndexPostRepository::new(self.pool.clone())
    }

    /// Get a scan lifecycle repository
    pub fn scans(&self) -> ScanRepository {
        ScanRepository::new(self.pool.clone())
    }

    /// Create all tables if they do not exist yet
    pub async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS cached_message_ids (
                channel_id INTEGER NOT NULL,
                message_id INTEGER NOT NULL,
                PRIMARY KEY (channel_id, message_id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS title_aggregates (
                title TEXT PRIMARY KEY,
                kind TEXT NOT NULL,
                doc TEXT NOT NULL,
                total_size INTEGER NOT NULL DEFAULT 0,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS index_posts (
                id TEXT PRIMARY KEY,
                channel_id INTEGER NOT NULL,
                title TEXT NOT NULL,
                message_id INTEGER,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS scans (
                scan_id TEXT PRIMARY KEY,
                channel_id INTEGER NOT NULL,
                chat_title TEXT NOT NULL,
                label TEXT NOT NULL,
                total_messages INTEGER NOT NULL,
                processed INTEGER NOT NULL DEFAULT 0,
                started_at TEXT NOT NULL,
                ended_at TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
