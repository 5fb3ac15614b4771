//! Application configuration management

use std::env;
use std::time::Duration;

use anyhow::{Context, Result};

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Database path or URL (SQLite, e.g. `sqlite:mediadex.db` or `sqlite::memory:`)
    pub database_url: String,

    /// Base URL of the MTProto HTTP bridge the gateway client talks to
    pub gateway_url: String,

    /// Bearer token for the gateway bridge, if it requires one
    pub gateway_token: Option<String>,

    /// Channel that receives the rendered index posts
    pub index_channel_id: i64,

    /// Directory for encoder-miner report files
    pub reports_dir: String,

    /// Optional JSON file mapping title -> season -> expected episode count
    pub episode_counts_path: Option<String>,

    /// Pause between history windows (rate-limit courtesy)
    pub window_pause: Duration,

    /// Longer pause after a failed window fetch
    pub error_pause: Duration,

    /// Consecutive window failures tolerated before a scan aborts
    pub max_window_failures: u32,

    /// Scan-progress rows are written once per this many processed messages
    pub progress_batch: u64,

    /// Miner flushes an incremental report every this many processed files
    pub miner_report_batch: u64,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let database_url = env::var("DATABASE_PATH")
            .or_else(|_| env::var("DATABASE_URL"))
            .unwrap_or_else(|_| "sqlite:mediadex.db".to_string());

        let gateway_url = env::var("GATEWAY_URL").context("GATEWAY_URL is required")?;

        let index_channel_id = env::var("INDEX_CHANNEL_ID")
            .context("INDEX_CHANNEL_ID is required")?
            .parse()
            .context("Invalid INDEX_CHANNEL_ID")?;

        Ok(Self {
            database_url,
            gateway_url,
            gateway_token: env::var("GATEWAY_TOKEN").ok(),
            index_channel_id,
            reports_dir: env::var("REPORTS_DIR").unwrap_or_else(|_| "./reports".to_string()),
            episode_counts_path: env::var("EPISODE_COUNTS_PATH").ok(),
            window_pause: Duration::from_millis(
                env::var("WINDOW_PAUSE_MS")
                    .unwrap_or_else(|_| "2000".to_string())
                    .parse()
                    .unwrap_or(2000),
            ),
            error_pause: Duration::from_millis(
                env::var("ERROR_PAUSE_MS")
                    .unwrap_or_else(|_| "10000".to_string())
                    .parse()
                    .unwrap_or(10_000),
            ),
            max_window_failures: env::var("MAX_WINDOW_FAILURES")
                .unwrap_or_else(|_| "5".to_string())
                .parse()
                .unwrap_or(5),
            progress_batch: env::var("PROGRESS_BATCH")
                .unwrap_or_else(|_| "100".to_string())
                .parse()
                .unwrap_or(100),
            miner_report_batch: env::var("MINER_REPORT_BATCH")
                .unwrap_or_else(|_| "2000".to_string())
                .parse()
                .unwrap_or(2000),
        })
    }
}
