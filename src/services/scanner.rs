//! Channel scan orchestration
//!
//! Drives the full pipeline: walk history, parse filenames, merge
//! aggregates, then publish or edit one index post per touched title.
//! Scan lifecycle rows are closed on every exit path so an open row at
//! startup always means a crashed run.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::db::Database;
use crate::services::encoder_miner::MinerReport;
use crate::services::filename_parser::{parse_media_info, MediaKind};
use crate::services::history::{HistoryStreamer, StreamerConfig};
use crate::services::post_renderer::{
    format_bytes, format_movie_post, format_series_post, EpisodeCounts,
};
use crate::services::rate_limiter::{retry_fetch, RetryConfig};
use crate::services::registry::ScanRegistry;
use crate::services::telegram::{FetchError, HistoryClient, PostPublisher};

/// Outcome of one channel scan.
#[derive(Debug, Clone)]
pub struct ScanSummary {
    pub channel_id: i64,
    pub chat_title: String,
    pub total_messages: u64,
    pub media_files: u64,
    pub parsed: u64,
    pub unparsable: u64,
    /// Fetched messages carrying no named file payload.
    pub skipped: u64,
    pub titles_updated: usize,
    pub total_bytes: i64,
    pub cancelled: bool,
}

impl ScanSummary {
    pub fn report(&self) -> String {
        format!(
            "{}: {} media files, {} parsed, {} unparsable, {} skipped, {} titles updated ({}){}",
            self.chat_title,
            self.media_files,
            self.parsed,
            self.unparsable,
            self.skipped,
            self.titles_updated,
            format_bytes(self.total_bytes),
            if self.cancelled { " [cancelled]" } else { "" }
        )
    }
}

/// Outcome of an encoder-mining pass.
#[derive(Debug, Clone)]
pub struct MineSummary {
    pub channel_id: i64,
    pub processed_files: u64,
    pub candidates: usize,
}

pub struct ScanService {
    db: Database,
    client: Arc<dyn HistoryClient>,
    publisher: Arc<dyn PostPublisher>,
    registry: ScanRegistry,
    index_channel_id: i64,
    reports_dir: String,
    progress_batch: u64,
    miner_report_batch: u64,
    streamer_config: StreamerConfig,
    retry: RetryConfig,
    episode_counts: HashMap<String, EpisodeCounts>,
}

impl ScanService {
    pub fn new(
        db: Database,
        client: Arc<dyn HistoryClient>,
        publisher: Arc<dyn PostPublisher>,
        config: &Config,
    ) -> Result<Self> {
        let episode_counts = match &config.episode_counts_path {
            Some(path) => load_episode_counts(Path::new(path))
                .with_context(|| format!("Failed to load episode counts from {path}"))?,
            None => HashMap::new(),
        };
        if !episode_counts.is_empty() {
            info!(titles = episode_counts.len(), "Loaded expected episode counts");
        }

        Ok(Self {
            db,
            client,
            publisher,
            registry: ScanRegistry::new(),
            index_channel_id: config.index_channel_id,
            reports_dir: config.reports_dir.clone(),
            progress_batch: config.progress_batch.max(1),
            miner_report_batch: config.miner_report_batch,
            streamer_config: StreamerConfig {
                window_pause: config.window_pause,
                error_pause: config.error_pause,
                max_window_failures: config.max_window_failures,
            },
            retry: RetryConfig::default(),
            episode_counts,
        })
    }

    pub fn registry(&self) -> &ScanRegistry {
        &self.registry
    }

    /// Scan one channel and publish index posts for every touched title.
    pub async fn scan_channel(&self, channel_id: i64, force: bool) -> Result<ScanSummary> {
        let token = self
            .registry
            .register(channel_id)
            .ok_or_else(|| anyhow!("A scan is already running for channel {channel_id}"))?;

        let result = self.run_scan(channel_id, force, token).await;
        self.registry.unregister(channel_id);
        result
    }

    /// Scan several channels back to back. One failed channel does not
    /// stop the rest.
    pub async fn scan_channels(&self, channel_ids: &[i64], force: bool) -> Vec<ScanSummary> {
        let mut summaries = Vec::new();
        for &channel_id in channel_ids {
            match self.scan_channel(channel_id, force).await {
                Ok(summary) => {
                    info!(channel_id = channel_id, summary = %summary.report(), "Channel scan finished");
                    summaries.push(summary);
                }
                Err(e) => {
                    warn!(channel_id = channel_id, error = %e, "Channel scan failed, continuing with next");
                }
            }
        }
        summaries
    }

    async fn run_scan(
        &self,
        channel_id: i64,
        force: bool,
        token: CancellationToken,
    ) -> Result<ScanSummary> {
        let chat_title = self
            .call_with_retry("chat_title", || self.client.chat_title(channel_id))
            .await
            .context("Failed to resolve channel")?;
        let total_messages = self
            .call_with_retry("count_messages", || self.client.count_messages(channel_id))
            .await
            .context("Failed to count channel messages")?;

        info!(
            channel_id = channel_id,
            chat_title = %chat_title,
            total_messages = total_messages,
            force = force,
            "Starting channel scan"
        );

        let scans = self.db.scans();
        let scan_id = scans
            .start(channel_id, &chat_title, "index", total_messages as i64)
            .await
            .context("Failed to open scan record")?;

        let walked = self.walk_and_merge(channel_id, force, &scan_id, &token).await;

        // Close the lifecycle row before propagating any walk error.
        if let Err(e) = scans.end(&scan_id).await {
            warn!(scan_id = %scan_id, error = %e, "Failed to close scan record");
        }
        let walked = walked?;

        let mut titles_updated = 0;
        for title in &walked.touched_titles {
            match self.publish_title(title).await {
                Ok(()) => titles_updated += 1,
                Err(e) => warn!(title = %title, error = %e, "Failed to publish index post"),
            }
        }

        let summary = ScanSummary {
            channel_id,
            chat_title,
            total_messages,
            media_files: walked.media_files,
            parsed: walked.parsed,
            unparsable: walked.unparsable,
            skipped: walked.skipped,
            titles_updated,
            total_bytes: walked.total_bytes,
            cancelled: walked.cancelled,
        };
        info!(channel_id = channel_id, summary = %summary.report(), "Scan complete");
        Ok(summary)
    }

    async fn walk_and_merge(
        &self,
        channel_id: i64,
        force: bool,
        scan_id: &str,
        token: &CancellationToken,
    ) -> Result<WalkOutcome> {
        let mut streamer = HistoryStreamer::new(
            Arc::clone(&self.client),
            self.db.message_cache(),
            channel_id,
            force,
            self.streamer_config.clone(),
        );
        let aggregates = self.db.aggregates();
        let scans = self.db.scans();

        let mut outcome = WalkOutcome::default();
        let mut processed: u64 = 0;
        let mut last_progress: u64 = 0;

        loop {
            // Check before pulling: a pull commits the previous window to
            // the resume cache, which must only happen once it is merged.
            if token.is_cancelled() {
                info!(channel_id = channel_id, "Scan cancelled");
                outcome.cancelled = true;
                break;
            }
            let Some(batch) = streamer.next_batch().await? else {
                break;
            };

            for message in &batch {
                processed += 1;
                let Some(media) = &message.media else { continue };
                outcome.media_files += 1;

                match parse_media_info(&media.file_name, message.caption.as_deref()) {
                    Some(item) => {
                        let item = item.with_source(media.file_size, message.id);
                        aggregates
                            .merge(&item)
                            .await
                            .with_context(|| format!("Failed to merge '{}'", item.title))?;
                        outcome.touched_titles.insert(item.title);
                        outcome.parsed += 1;
                        outcome.total_bytes += media.file_size;
                    }
                    None => {
                        debug!(
                            message_id = message.id,
                            file_name = %media.file_name,
                            "Filename not recognized, skipping"
                        );
                        outcome.unparsable += 1;
                    }
                }
            }

            if processed - last_progress >= self.progress_batch {
                scans.update_progress(scan_id, processed as i64).await?;
                last_progress = processed;
            }
        }
        streamer.finish().await?;
        scans.update_progress(scan_id, processed as i64).await?;
        outcome.skipped = streamer.skipped_non_media();
        Ok(outcome)
    }

    /// Render a title's current aggregate and push it to the index
    /// channel, editing in place when a post already exists.
    async fn publish_title(&self, title: &str) -> Result<()> {
        let Some(aggregate) = self.db.aggregates().get(title).await? else {
            return Ok(());
        };
        let expected = self.episode_counts.get(title);
        let text = match aggregate.kind {
            MediaKind::Series => format_series_post(title, &aggregate.doc, expected),
            MediaKind::Movie => format_movie_post(title, &aggregate.doc),
        };

        let posts = self.db.posts();
        let record = posts.get_or_create(self.index_channel_id, title).await?;

        match record.message_id {
            Some(message_id) => {
                let edit = self
                    .call_with_retry("edit_post", || {
                        self.publisher.edit_post(self.index_channel_id, message_id, &text)
                    })
                    .await;
                match edit {
                    Ok(()) => {}
                    Err(FetchError::Permanent(e)) => {
                        // The tracked post is gone or unreachable; start over
                        // with a fresh one rather than losing the title.
                        warn!(title = %title, error = %e, "Editing index post failed, publishing fresh post");
                        let new_id = self
                            .call_with_retry("send_post", || {
                                self.publisher.send_post(self.index_channel_id, &text)
                            })
                            .await?;
                        posts.set_message_id(&record.id, new_id).await?;
                    }
                    Err(e) => return Err(e.into()),
                }
            }
            None => {
                let message_id = self
                    .call_with_retry("send_post", || {
                        self.publisher.send_post(self.index_channel_id, &text)
                    })
                    .await?;
                posts.set_message_id(&record.id, message_id).await?;
            }
        }
        Ok(())
    }

    /// Walk a channel without touching the resume cache and report
    /// candidate encoder tags.
    pub async fn mine_channel(&self, channel_id: i64) -> Result<MineSummary> {
        let token = self
            .registry
            .register(channel_id)
            .ok_or_else(|| anyhow!("A scan is already running for channel {channel_id}"))?;
        let result = self.run_mine(channel_id, token).await;
        self.registry.unregister(channel_id);
        result
    }

    async fn run_mine(&self, channel_id: i64, token: CancellationToken) -> Result<MineSummary> {
        let mut streamer = HistoryStreamer::uncached(
            Arc::clone(&self.client),
            self.db.message_cache(),
            channel_id,
            self.streamer_config.clone(),
        );
        let mut report = MinerReport::new(channel_id, &self.reports_dir, self.miner_report_batch);

        loop {
            if token.is_cancelled() {
                break;
            }
            let Some(batch) = streamer.next_batch().await? else {
                break;
            };
            for message in &batch {
                if let Some(media) = &message.media {
                    report.record(&media.file_name).await?;
                }
            }
        }
        report.flush().await?;

        Ok(MineSummary {
            channel_id,
            processed_files: report.processed_files(),
            candidates: report.candidate_count(),
        })
    }

    async fn call_with_retry<T, Fut, F>(&self, name: &str, operation: F) -> Result<T, FetchError>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<T, FetchError>>,
    {
        retry_fetch(operation, &self.retry, name).await
    }
}

#[derive(Default)]
struct WalkOutcome {
    media_files: u64,
    parsed: u64,
    unparsable: u64,
    skipped: u64,
    total_bytes: i64,
    touched_titles: BTreeSet<String>,
    cancelled: bool,
}

/// Load the expected-episodes table: title -> season number -> count.
pub fn load_episode_counts(path: &Path) -> Result<HashMap<String, EpisodeCounts>> {
    let raw = std::fs::read_to_string(path)?;
    let parsed: HashMap<String, BTreeMap<String, u32>> = serde_json::from_str(&raw)?;

    parsed
        .into_iter()
        .map(|(title, seasons)| {
            let seasons = seasons
                .into_iter()
                .map(|(season, count)| {
                    let season: u32 = season
                        .parse()
                        .with_context(|| format!("Invalid season '{season}' for '{title}'"))?;
                    Ok((season, count))
                })
                .collect::<Result<EpisodeCounts>>()?;
            Ok((title, seasons))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_load_episode_counts() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"Breaking Bad": {{"1": 7, "2": 13}}}}"#).unwrap();

        let counts = load_episode_counts(file.path()).unwrap();
        let seasons = &counts["Breaking Bad"];
        assert_eq!(seasons[&1], 7);
        assert_eq!(seasons[&2], 13);
    }

    #[test]
    fn test_load_episode_counts_bad_season_key() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"Show": {{"one": 7}}}}"#).unwrap();
        assert!(load_episode_counts(file.path()).is_err());
    }

    #[test]
    fn test_summary_report() {
        let summary = ScanSummary {
            channel_id: -1001,
            chat_title: "Archive".into(),
            total_messages: 500,
            media_files: 120,
            parsed: 110,
            unparsable: 10,
            skipped: 30,
            titles_updated: 4,
            total_bytes: 1024 * 1024,
            cancelled: false,
        };
        assert_eq!(
            summary.report(),
            "Archive: 120 media files, 110 parsed, 10 unparsable, 30 skipped, 4 titles updated (1.00 MB)"
        );
    }
}
