//! Windowed channel-history walk
//!
//! Walks a channel's history from the newest message downwards in fixed
//! ID windows, skipping messages cached by earlier runs. A window's IDs
//! are only cached once the consumer asks for the next batch, so a crash
//! mid-batch never skips unprocessed messages on resume.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tracing::{debug, info, warn};

use crate::db::MessageCacheRepository;
use crate::services::rate_limiter::{retry_fetch, RetryConfig};
use crate::services::telegram::{ChannelMessage, HistoryClient};

/// How many message IDs one window covers.
pub const WINDOW_SIZE: i64 = 100;

#[derive(Debug, Clone)]
pub struct StreamerConfig {
    /// Pause between history windows.
    pub window_pause: Duration,
    /// Pause after a failed window before moving on.
    pub error_pause: Duration,
    /// Consecutive window failures that abort the walk.
    pub max_window_failures: u32,
}

impl Default for StreamerConfig {
    fn default() -> Self {
        Self {
            window_pause: Duration::from_millis(2000),
            error_pause: Duration::from_millis(10_000),
            max_window_failures: 5,
        }
    }
}

enum Cursor {
    /// First call has not primed the walk yet.
    Unstarted,
    /// Next window ends at this message ID.
    At(i64),
    Exhausted,
}

/// Pull-based streamer over a channel's media history.
pub struct HistoryStreamer {
    client: Arc<dyn HistoryClient>,
    cache: MessageCacheRepository,
    channel_id: i64,
    force: bool,
    config: StreamerConfig,
    retry: RetryConfig,
    cursor: Cursor,
    /// When false the walk ignores the resume cache entirely.
    persist: bool,
    cached: HashSet<i64>,
    /// IDs from the last yielded window, cached on the next pull.
    pending_cache: Vec<i64>,
    consecutive_failures: u32,
    skipped_non_media: u64,
}

impl HistoryStreamer {
    pub fn new(
        client: Arc<dyn HistoryClient>,
        cache: MessageCacheRepository,
        channel_id: i64,
        force: bool,
        config: StreamerConfig,
    ) -> Self {
        Self {
            client,
            cache,
            channel_id,
            force,
            config,
            retry: RetryConfig::default(),
            cursor: Cursor::Unstarted,
            persist: true,
            cached: HashSet::new(),
            pending_cache: Vec::new(),
            consecutive_failures: 0,
            skipped_non_media: 0,
        }
    }

    /// Messages fetched so far that carried no named file payload.
    pub fn skipped_non_media(&self) -> u64 {
        self.skipped_non_media
    }

    /// A walk that neither reads nor writes the resume cache. Used for
    /// diagnostics passes that must see every message.
    pub fn uncached(
        client: Arc<dyn HistoryClient>,
        cache: MessageCacheRepository,
        channel_id: i64,
        config: StreamerConfig,
    ) -> Self {
        let mut streamer = Self::new(client, cache, channel_id, false, config);
        streamer.persist = false;
        streamer
    }

    /// Prime the walk: clear or load the resume cache and find the top
    /// of the channel's history.
    async fn start(&mut self) -> Result<()> {
        if self.force && self.persist {
            let dropped = self
                .cache
                .clear(self.channel_id)
                .await
                .context("Failed to clear message cache")?;
            info!(
                channel_id = self.channel_id,
                dropped = dropped,
                "Forced rescan, message cache cleared"
            );
        }
        if self.persist {
            self.cached = self
                .cache
                .get_cached_ids(self.channel_id)
                .await
                .context("Failed to load message cache")?;
        }

        let client = Arc::clone(&self.client);
        let channel_id = self.channel_id;
        let latest = retry_fetch(
            || {
                let client = Arc::clone(&client);
                async move { client.latest_message_id(channel_id).await }
            },
            &self.retry,
            "latest_message_id",
        )
        .await
        .context("Failed to find top of channel history")?;

        info!(
            channel_id = self.channel_id,
            latest_id = latest,
            cached = self.cached.len(),
            "Starting history walk"
        );
        self.cursor = if latest > 0 {
            Cursor::At(latest)
        } else {
            Cursor::Exhausted
        };
        Ok(())
    }

    /// Commit the previously yielded window's IDs to the resume cache.
    async fn commit_pending(&mut self) -> Result<()> {
        if !self.persist || self.pending_cache.is_empty() {
            return Ok(());
        }
        let ids = std::mem::take(&mut self.pending_cache);
        self.cache
            .add_ids(self.channel_id, &ids)
            .await
            .context("Failed to cache processed message IDs")?;
        Ok(())
    }

    /// Fetch the next window of media messages.
    ///
    /// Returns `Ok(None)` once the walk reaches the bottom of history.
    /// Windows the resume cache fully covers are skipped without a
    /// network call.
    pub async fn next_batch(&mut self) -> Result<Option<Vec<ChannelMessage>>> {
        if matches!(self.cursor, Cursor::Unstarted) {
            self.start().await?;
        }
        self.commit_pending().await?;

        loop {
            let top = match self.cursor {
                Cursor::At(top) => top,
                _ => return Ok(None),
            };
            let bottom = (top - WINDOW_SIZE + 1).max(1);
            self.cursor = if bottom > 1 {
                Cursor::At(bottom - 1)
            } else {
                Cursor::Exhausted
            };

            let ids: Vec<i64> = (bottom..=top)
                .rev()
                .filter(|id| !self.cached.contains(id))
                .collect();
            if ids.is_empty() {
                debug!(
                    channel_id = self.channel_id,
                    top = top,
                    "Window fully cached, skipping"
                );
                continue;
            }

            let client = Arc::clone(&self.client);
            let channel_id = self.channel_id;
            let window_ids = ids.clone();
            let fetched = retry_fetch(
                || {
                    let client = Arc::clone(&client);
                    let ids = window_ids.clone();
                    async move { client.fetch_messages(channel_id, &ids).await }
                },
                &self.retry,
                "fetch_messages",
            )
            .await;

            let messages = match fetched {
                Ok(messages) => messages,
                Err(e) => {
                    self.consecutive_failures += 1;
                    warn!(
                        channel_id = self.channel_id,
                        top = top,
                        failures = self.consecutive_failures,
                        error = %e,
                        "History window failed"
                    );
                    if self.consecutive_failures >= self.config.max_window_failures {
                        bail!(
                            "Aborting walk of channel {} after {} consecutive window failures: {}",
                            self.channel_id,
                            self.consecutive_failures,
                            e
                        );
                    }
                    tokio::time::sleep(self.config.error_pause).await;
                    continue;
                }
            };
            self.consecutive_failures = 0;

            // Cache every fetched ID, media or not; a non-media message
            // stays non-media on the next run too.
            self.pending_cache = ids;
            self.cached.extend(self.pending_cache.iter().copied());

            let fetched_count = messages.len();
            let batch: Vec<ChannelMessage> =
                messages.into_iter().filter(|m| m.has_payload()).collect();
            self.skipped_non_media += (fetched_count - batch.len()) as u64;

            tokio::time::sleep(self.config.window_pause).await;
            if batch.is_empty() {
                self.commit_pending().await?;
                continue;
            }
            return Ok(Some(batch));
        }
    }

    /// Flush the final window's cache entries after the last batch was
    /// fully processed.
    pub async fn finish(&mut self) -> Result<()> {
        self.commit_pending().await
    }
}
