//! Rendering of aggregate documents into index post text
//!
//! Pure functions: the same aggregate always renders the same text, so
//! edit-in-place updates are cheap no-ops when nothing changed.

use std::collections::BTreeMap;

use crate::db::aggregates::{QualityCell, TitleDoc};

/// Hard platform limit for a single post.
pub const MAX_POST_LEN: usize = 4096;

/// Expected episode counts per title: season -> count.
pub type EpisodeCounts = BTreeMap<u32, u32>;

/// Convert a set of episode numbers into compact range notation.
///
/// `[1,2,3,5,7,8]` -> `"E01-E03, E05, E07-E08"`.
pub fn episode_range(episodes: &[u32]) -> String {
    let mut eps: Vec<u32> = episodes.to_vec();
    eps.sort_unstable();
    eps.dedup();
    if eps.is_empty() {
        return "No episodes found".to_string();
    }

    let mut ranges = Vec::new();
    let (mut start, mut end) = (eps[0], eps[0]);
    for &ep in &eps[1..] {
        if ep == end + 1 {
            end = ep;
        } else {
            ranges.push(render_run(start, end));
            start = ep;
            end = ep;
        }
    }
    ranges.push(render_run(start, end));
    ranges.join(", ")
}

fn render_run(start: u32, end: u32) -> String {
    if start == end {
        format!("E{:02}", start)
    } else {
        format!("E{:02}-E{:02}", start, end)
    }
}

/// Render a series aggregate. Seasons ascending; quality cells in
/// first-observed order; encoders alphabetical with the Unknown bucket
/// last.
pub fn format_series_post(
    title: &str,
    doc: &TitleDoc,
    expected: Option<&EpisodeCounts>,
) -> String {
    let TitleDoc::Series { seasons } = doc else {
        return String::new();
    };

    let mut text = format!("**{}**", title);
    if is_complete(doc, expected) {
        text.push_str(" ✅");
    }
    text.push_str("\n\n");

    for (season_num, season) in seasons {
        let expected_eps = expected
            .and_then(|m| m.get(season_num).copied())
            .unwrap_or(season.episodes.len() as u32);
        text.push_str(&format!(
            "**Season {}** ({} Episodes)\n",
            season_num, expected_eps
        ));

        let count = season.qualities.len();
        for (i, cell) in season.qualities.iter().enumerate() {
            let prefix = if i == count - 1 { "└─" } else { "├─" };
            text.push_str(&format!("{} {}\n", prefix, render_cell(cell)));
        }
        text.push('\n');
    }

    truncate_post(text.trim_end().to_string())
}

fn render_cell(cell: &QualityCell) -> String {
    // "1080P X264 (PSA)" -> bold quality/codec, encoder kept if known.
    let mut parts = cell.key.splitn(3, ' ');
    let quality = parts.next().unwrap_or_default();
    let codec = parts.next().unwrap_or_default();
    let mut line = format!("**{} {}**", quality, codec);
    if let Some(enc) = parts.next() {
        if enc != "(Unknown)" {
            line.push_str(&format!(" {}", enc));
        }
    }

    // Known encoders alphabetically, then the Unknown bucket.
    let mut segments = Vec::new();
    for (encoder, eps) in &cell.episodes_by_encoder {
        if encoder == "Unknown" {
            continue;
        }
        let eps: Vec<u32> = eps.iter().copied().collect();
        segments.push(episode_range(&eps));
    }
    if let Some(eps) = cell.episodes_by_encoder.get("Unknown") {
        let eps: Vec<u32> = eps.iter().copied().collect();
        segments.push(episode_range(&eps));
    }

    format!("{}: {}", line, segments.join(", "))
}

/// Render a movie aggregate: one line per version, in first-observed
/// order, sizes in gibibytes.
pub fn format_movie_post(title: &str, doc: &TitleDoc) -> String {
    let TitleDoc::Movie { versions } = doc else {
        return String::new();
    };

    let mut text = format!("**{}**\n\n", title);
    let count = versions.len();
    for (i, version) in versions.iter().enumerate() {
        let prefix = if i == count - 1 { "└─" } else { "├─" };
        let mut line = format!("**{} {}**", version.quality, version.codec);
        if version.encoder != "Unknown" {
            line.push_str(&format!(" ({})", version.encoder));
        }
        let gib = version.size as f64 / (1024.0 * 1024.0 * 1024.0);
        text.push_str(&format!("{} {}: {:.1} GiB\n", prefix, line, gib));
    }

    truncate_post(text.trim_end().to_string())
}

/// A title is complete when every season with an expected count holds
/// exactly that many distinct episodes.
pub fn is_complete(doc: &TitleDoc, expected: Option<&EpisodeCounts>) -> bool {
    let (TitleDoc::Series { seasons }, Some(expected)) = (doc, expected) else {
        return false;
    };
    !expected.is_empty()
        && expected.iter().all(|(season, count)| {
            seasons
                .get(season)
                .map(|s| s.episodes.len() as u32 == *count)
                .unwrap_or(false)
        })
}

/// Enforce the platform post-length cap, marking the cut.
pub fn truncate_post(text: String) -> String {
    if text.chars().count() <= MAX_POST_LEN {
        return text;
    }
    let cut: String = text.chars().take(MAX_POST_LEN - 6).collect();
    format!("{}\n...", cut)
}

/// Human-readable byte count for summaries.
pub fn format_bytes(bytes: i64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{:.2} {}", value, UNITS[unit])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::filename_parser::{parse_media_info, MediaKind};
    use pretty_assertions::assert_eq;

    fn series_doc(files: &[(&str, i64)]) -> TitleDoc {
        let mut doc = TitleDoc::new(MediaKind::Series);
        for (name, size) in files {
            let item = parse_media_info(name, None).unwrap().with_source(*size, 1);
            doc.merge_item(&item);
        }
        doc
    }

    #[test]
    fn test_episode_range_compression() {
        assert_eq!(episode_range(&[1, 2, 3, 5, 7, 8]), "E01-E03, E05, E07-E08");
        assert_eq!(episode_range(&[4]), "E04");
        assert_eq!(episode_range(&[1, 2]), "E01-E02");
        assert_eq!(episode_range(&[]), "No episodes found");
    }

    #[test]
    fn test_episode_range_unsorted_input() {
        assert_eq!(episode_range(&[8, 1, 7, 2, 3, 5, 2]), "E01-E03, E05, E07-E08");
    }

    #[test]
    fn test_range_roundtrip_lossless() {
        // Re-expanding the compressed notation recovers the input set.
        let input = vec![1, 2, 3, 10, 12, 13, 20];
        let compressed = episode_range(&input);
        let mut expanded = Vec::new();
        for part in compressed.split(", ") {
            let nums: Vec<u32> = part
                .split('-')
                .map(|p| p.trim_start_matches('E').parse().unwrap())
                .collect();
            match nums[..] {
                [single] => expanded.push(single),
                [start, end] => expanded.extend(start..=end),
                _ => panic!("bad run: {part}"),
            }
        }
        assert_eq!(expanded, input);
    }

    #[test]
    fn test_series_post_layout() {
        let doc = series_doc(&[
            ("Show.S01E01.1080p.x264-PSA.mkv", 500),
            ("Show.S01E02.1080p.x264-PSA.mkv", 520),
            ("Show.S01E01.720p.x264-PSA.mkv", 300),
        ]);
        let text = format_series_post("Show", &doc, None);
        assert!(text.contains("**Show**"));
        assert!(text.contains("**Season 1** (2 Episodes)"));
        assert!(text.contains("**1080P X264** (PSA): E01-E02"));
        assert!(text.contains("**720P X264** (PSA): E01"));
        // First-observed cell gets the branch prefix, last the corner.
        assert!(text.contains("├─ **1080P X264**"));
        assert!(text.contains("└─ **720P X264**"));
    }

    #[test]
    fn test_series_post_expected_counts_and_completeness() {
        let doc = series_doc(&[
            ("Show.S01E01.1080p.mkv", 1),
            ("Show.S01E02.1080p.mkv", 1),
        ]);
        let expected: EpisodeCounts = BTreeMap::from([(1, 2)]);
        let text = format_series_post("Show", &doc, Some(&expected));
        assert!(text.contains("**Season 1** (2 Episodes)"));
        assert!(text.starts_with("**Show** ✅"));

        let incomplete: EpisodeCounts = BTreeMap::from([(1, 10)]);
        let text = format_series_post("Show", &doc, Some(&incomplete));
        assert!(text.contains("**Season 1** (10 Episodes)"));
        assert!(!text.contains("✅"));
    }

    #[test]
    fn test_movie_post() {
        let mut doc = TitleDoc::new(MediaKind::Movie);
        let item = parse_media_info("Inception.2010.1080p.x264-PSA.mkv", None)
            .unwrap()
            .with_source(1_610_612_736, 1); // 1.5 GiB
        doc.merge_item(&item);
        let text = format_movie_post("Inception (2010)", &doc);
        assert!(text.contains("**1080P X264** (PSA): 1.5 GiB"));
    }

    #[test]
    fn test_truncation() {
        let long = "x".repeat(MAX_POST_LEN + 100);
        let truncated = truncate_post(long);
        assert!(truncated.chars().count() <= MAX_POST_LEN);
        assert!(truncated.ends_with("\n..."));
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512.00 B");
        assert_eq!(format_bytes(1024 * 1024), "1.00 MB");
    }
}
