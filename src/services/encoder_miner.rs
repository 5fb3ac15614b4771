//! Encoder-tag mining: surfaces candidate release-group tags
//!
//! Diagnostic sibling of the filename parser. Works by elimination: any
//! token near the end of a filename that is not a known encoder, source
//! tag, number or season/quality/year marker is a candidate for the
//! parser's vocabulary.

use std::collections::HashMap;
use std::path::PathBuf;

use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::info;

use super::filename_parser::{IGNORED_TAGS, KNOWN_ENCODERS};

static BASE_NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^(.*)\.(mkv|mp4|avi|mov)\.(\d{3})$").unwrap());
static EXTENSION_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\.\w+$").unwrap());
static SPLIT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[ ._\[\]()\-]+").unwrap());
static SEASON_EP_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^S\d{1,2}(E\d{1,3})?$").unwrap());
static RESOLUTION_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d{3,4}P$").unwrap());
static YEAR_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d{4}$").unwrap());
static AUDIO_CHANNEL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)[57]\.1(CH)?|DDP|EAC3").unwrap());

/// Strip a multi-part fragment suffix (`name.mkv.002` -> `name.mkv`) so a
/// split release is mined once. Returns the base name and whether the
/// input was a fragment.
pub fn base_release_name(filename: &str) -> (String, bool) {
    match BASE_NAME_RE.captures(filename) {
        Some(caps) => (format!("{}.{}", &caps[1], &caps[2]), true),
        None => (filename.to_string(), false),
    }
}

/// Extract candidate release-group tags from a base filename.
///
/// Only the last two separator-delimited tokens are considered; release
/// tags empirically live at the end of scene names.
pub fn extract_candidate_tags(base_filename: &str) -> Vec<String> {
    let stripped = EXTENSION_RE.replace(base_filename, "");
    // Audio-channel markers like "7.1CH" span a separator, so they must
    // be scrubbed while the name is still intact; after the split their
    // fragments would look like ordinary tokens.
    let scrubbed = AUDIO_CHANNEL_RE.replace_all(&stripped, " ");

    let tokens: Vec<&str> = SPLIT_RE
        .split(&scrubbed)
        .filter(|t| !t.is_empty())
        .collect();

    tokens
        .iter()
        .rev()
        .take(2)
        .rev()
        .filter_map(|token| {
            let candidate = token.trim_matches(|c: char| "._-".contains(c));
            let upper = candidate.to_uppercase();
            if upper.len() <= 2
                || KNOWN_ENCODERS.contains(upper.as_str())
                || IGNORED_TAGS.contains(upper.as_str())
                || upper.chars().all(|c| c.is_ascii_digit())
                || SEASON_EP_RE.is_match(&upper)
                || RESOLUTION_RE.is_match(&upper)
                || YEAR_RE.is_match(&upper)
                || AUDIO_CHANNEL_RE.is_match(&upper)
            {
                None
            } else {
                Some(candidate.to_string())
            }
        })
        .collect()
}

/// Frequency accumulator that exports ranked, incremental report files.
///
/// Long scans produce a numbered report every `batch_size` processed
/// files instead of one unbounded report at the end, so partial results
/// survive an interrupted run.
pub struct MinerReport {
    channel_id: i64,
    reports_dir: PathBuf,
    batch_size: u64,
    counts: HashMap<String, u64>,
    processed_files: u64,
    part: u32,
    seen_bases: std::collections::HashSet<String>,
}

impl MinerReport {
    pub fn new(channel_id: i64, reports_dir: impl Into<PathBuf>, batch_size: u64) -> Self {
        Self {
            channel_id,
            reports_dir: reports_dir.into(),
            batch_size: batch_size.max(1),
            counts: HashMap::new(),
            processed_files: 0,
            part: 0,
            seen_bases: std::collections::HashSet::new(),
        }
    }

    pub fn processed_files(&self) -> u64 {
        self.processed_files
    }

    pub fn candidate_count(&self) -> usize {
        self.counts.len()
    }

    /// Record one raw filename. Returns true when this call flushed a
    /// report part to disk.
    pub async fn record(&mut self, filename: &str) -> Result<bool> {
        let (base, _) = base_release_name(filename);
        if !self.seen_bases.insert(base.clone()) {
            return Ok(false);
        }

        self.processed_files += 1;
        for tag in extract_candidate_tags(&base) {
            *self.counts.entry(tag).or_insert(0) += 1;
        }

        if self.processed_files % self.batch_size == 0 {
            self.flush().await?;
            return Ok(true);
        }
        Ok(false)
    }

    /// Write the current ranked counts as the next report part.
    pub async fn flush(&mut self) -> Result<()> {
        if self.counts.is_empty() {
            return Ok(());
        }
        self.part += 1;

        let mut ranked: Vec<(&String, &u64)> = self.counts.iter().collect();
        ranked.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));

        let mut text = format!(
            "Encoder candidates for channel {} - part {} ({} files processed)\n\n",
            self.channel_id, self.part, self.processed_files
        );
        for (tag, count) in ranked {
            text.push_str(&format!("{:>20} ({})\n", tag, count));
        }

        tokio::fs::create_dir_all(&self.reports_dir)
            .await
            .context("Failed to create reports directory")?;
        let path = self.reports_dir.join(format!(
            "encoders_{}_part{:03}.txt",
            self.channel_id, self.part
        ));
        tokio::fs::write(&path, text)
            .await
            .with_context(|| format!("Failed to write report {}", path.display()))?;

        info!(
            channel_id = self.channel_id,
            part = self.part,
            processed = self.processed_files,
            candidates = self.counts.len(),
            "Wrote encoder report part"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_release_name() {
        let (base, split) = base_release_name("Show.S01E01.mkv.002");
        assert_eq!(base, "Show.S01E01.mkv");
        assert!(split);

        let (base, split) = base_release_name("Show.S01E01.mkv");
        assert_eq!(base, "Show.S01E01.mkv");
        assert!(!split);
    }

    #[test]
    fn test_candidate_from_trailing_token() {
        let tags = extract_candidate_tags("Show.S01E01.1080p.x265-NEWGROUP.mkv");
        assert_eq!(tags, vec!["NEWGROUP"]);
    }

    #[test]
    fn test_known_encoders_rejected() {
        let tags = extract_candidate_tags("Show.S01E01.1080p.x265-PSA.mkv");
        assert!(tags.is_empty());
    }

    #[test]
    fn test_markers_rejected() {
        // Last two tokens are a year and a resolution; both rejected.
        assert!(extract_candidate_tags("Movie.Title.2023.1080p.mkv").is_empty());
        // Season marker and numeric token rejected.
        assert!(extract_candidate_tags("Show.S01E01.456.mkv").is_empty());
        // Audio channel marker rejected.
        assert!(extract_candidate_tags("Show.S01E01.DDP5.EAC3.mkv").is_empty());
    }

    #[test]
    fn test_audio_channel_markers_rejected_across_separators() {
        // "7.1CH" straddles the token split; without scrubbing, "1CH"
        // would survive as a bogus candidate.
        assert!(extract_candidate_tags("Show.S01E01.x265.7.1CH.mkv").is_empty());
        // Scrubbing must not swallow a real trailing group.
        let tags = extract_candidate_tags("Movie.2023.DDP5.1.NEWGRP.mkv");
        assert_eq!(tags, vec!["NEWGRP"]);
    }

    #[test]
    fn test_short_tokens_rejected() {
        assert!(extract_candidate_tags("Show.S01E01.ab.mkv").is_empty());
    }

    #[test]
    fn test_only_last_two_tokens_considered() {
        // CANDIDATE sits third from the end, outside the mined window.
        let tags = extract_candidate_tags("Show.CANDIDATE.S01E01.1080p.mkv");
        assert!(tags.is_empty());
    }

    #[tokio::test]
    async fn test_report_batching_and_dedup() {
        let dir = tempfile::tempdir().unwrap();
        let mut report = MinerReport::new(-1001, dir.path(), 2);

        // Fragments of the same release count once.
        assert!(!report.record("Show.S01E01.NEWGRP.mkv.001").await.unwrap());
        assert!(!report.record("Show.S01E01.NEWGRP.mkv.002").await.unwrap());
        assert_eq!(report.processed_files(), 1);

        // Second distinct file triggers a flush at batch size 2.
        assert!(report.record("Other.S01E02.OTHERGRP.mkv").await.unwrap());

        let part = dir.path().join("encoders_-1001_part001.txt");
        let text = std::fs::read_to_string(part).unwrap();
        assert!(text.contains("part 1 (2 files processed)"));
        assert!(text.contains("NEWGRP (1)"));
        assert!(text.contains("OTHERGRP (1)"));
    }
}
