//! Heuristic parser for scene-style media filenames and captions
//!
//! Turns strings like:
//! - "Breaking.Bad.S01E01.720p.x265-PSA.mkv"
//! - "Inception.2010.1080p.BluRay.x264-GROUP.mkv"
//! into structured records suitable for per-title aggregation.

use std::collections::HashSet;
use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Release groups the parser recognizes. Kept current with the output of
/// the encoder miner.
pub static KNOWN_ENCODERS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    HashSet::from([
        "GHOST", "AMBER", "ELITE", "BONE", "CELDRA", "MEGUSTA", "EDGE2020", "PAHE", "DARKFLIX",
        "D3G", "PHOCIS", "ZTR", "TIPEX", "PRIMEFIX", "CODSWALLOP", "RAWR", "STAR", "JFF", "HEEL",
        "CBFM", "XWT", "STC", "KITSUNE", "AFG", "EDITH", "MSD", "SDH", "AOC", "G66", "PSA",
        "TIGOLE", "QXR", "TEPES", "VXT", "VYNDROS", "TELLY", "HQMUX", "W4NK3R", "BETA",
        "BHDSTUDIO", "FRAMESTOR", "DON", "DRONES", "FGT", "SPARKS", "NOGROUP", "KINGDOM", "NTB",
        "NTG", "KOGI", "SKG", "EVO", "ION10", "CMRG", "KINGS", "MINX", "FUM", "GALAXYRG",
        "GALAXYTV", "EMBER", "QOQ", "BAOBAO", "YTS", "YIFY", "RARBG", "ETRG", "DHD", "MKVCAGE",
        "RARBGX", "RGXT", "TGX", "SAINT", "DPR", "KAKA", "S4KK", "D-Z0N3", "PTER", "BBL", "BMF",
        "FASM", "SC4R", "4KINGS", "HDX", "DEFLATE", "TERMINAL", "PTP", "ROKIT", "SWTYBLZ",
        "HOMELANDER", "TOMBDOC", "WALTER", "RZEROX",
    ])
});

/// Source/format tags that are never release groups; the miner skips them.
pub static IGNORED_TAGS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    HashSet::from([
        "WEB-DL", "WEBDL", "WEBRIP", "WEB", "BRRIP", "BLURAY", "BD", "BDRIP", "DVDRIP", "DVD",
        "HDTV", "PDTV", "SDTV", "REMUX", "UNTOUCHED", "AMZN", "NF", "NETFLIX", "HULU", "ATVP",
        "DSNP", "MAX", "CRAV", "PCOCK", "RTE", "EZTV", "ETTV", "HDR", "HDR10", "DV", "DOLBY",
        "VISION", "ATMOS", "DTS", "AAC", "DDP", "DDP2", "DDP5", "OPUS", "AC3", "10BIT", "UHD",
        "PROPER", "COMPLETE", "INT", "RIP", "MULTI", "GB", "XVID", "HEVC", "AVC", "X265", "X264",
        "AV1", "VP9", "DUAL", "AUDIO", "MKV", "MP4",
    ])
});

/// Resolution bucket a release falls into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Quality {
    FourK,
    P1080,
    P720,
    P540,
    P480,
    Unknown,
}

impl fmt::Display for Quality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Quality::FourK => "4K",
            Quality::P1080 => "1080P",
            Quality::P720 => "720P",
            Quality::P540 => "540P",
            Quality::P480 => "480P",
            Quality::Unknown => "Unknown",
        };
        f.write_str(s)
    }
}

/// Video codec family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Codec {
    Av1,
    Vp9,
    X265,
    X264,
    Unknown,
}

impl fmt::Display for Codec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Codec::Av1 => "AV1",
            Codec::Vp9 => "VP9",
            Codec::X265 => "X265",
            Codec::X264 => "X264",
            Codec::Unknown => "Unknown",
        };
        f.write_str(s)
    }
}

/// Series or movie.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Series,
    Movie,
}

/// One cataloged media file, as extracted from its filename/caption.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParsedMediaItem {
    pub title: String,
    pub kind: MediaKind,
    pub season: Option<u32>,
    pub episode: Option<u32>,
    pub year: Option<u32>,
    pub quality: Quality,
    pub codec: Codec,
    /// Release-group tag, or `"Unknown"` when nothing matched.
    pub encoder: String,
    pub file_size: i64,
    pub message_id: i64,
}

impl ParsedMediaItem {
    /// Attach the message-level fields the parser cannot know.
    pub fn with_source(mut self, file_size: i64, message_id: i64) -> Self {
        self.file_size = file_size;
        self.message_id = message_id;
        self
    }

    /// Aggregation bucket identity within a season.
    pub fn quality_key(&self) -> String {
        format!("{} {} ({})", self.quality, self.codec, self.encoder)
    }
}

static PART_MARKER_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\.(00\d)\.").unwrap());
static QUALITY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(4K|2160p|1080p|720p|540p|480p)\b").unwrap());
static AV1_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bAV1\b").unwrap());
static VP9_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bVP9\b").unwrap());
static HEVC_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\b(HEVC|x265|H\s*265)\b").unwrap());
static AVC_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\b(AVC|x264|H\s*264)\b").unwrap());
static EXTENSION_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\.\w+$").unwrap());
static TRAILING_GROUP_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"-([A-Za-z0-9]+)$").unwrap());
static SEPARATOR_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[._\-\[\]()]+").unwrap());
static SPACE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());
static SERIES_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(.+?)\s+s(\d{1,2})\s*e(\d{1,3})").unwrap());
static MOVIE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(.+?)\s+(\d{4})\b").unwrap());

/// Parse a filename (and optional caption) into a structured media record.
///
/// Returns `None` for non-first parts of split releases and for names no
/// structural pattern matches; both are counted as "unparsable" upstream,
/// not treated as errors. The result is a pure function of the two inputs.
pub fn parse_media_info(filename: &str, caption: Option<&str>) -> Option<ParsedMediaItem> {
    // Only the first fragment of a multi-part release is cataloged.
    if let Some(caps) = PART_MARKER_RE.captures(filename) {
        if &caps[1] != "001" {
            return None;
        }
    }

    // Prefer the caption only when it already looks like it carries an
    // episode marker; otherwise the filename is the better source.
    let text = match caption {
        Some(c) => {
            let lower = c.to_lowercase();
            if lower.contains('s') && lower.contains('e') {
                c
            } else {
                filename
            }
        }
        None => filename,
    };

    let quality = get_quality(text);
    let codec = get_codec(text);
    let encoder = get_encoder(text);

    let (title, kind, season, episode, year) =
        extract_structural_info(text, quality, codec, &encoder)?;

    debug!(
        filename = filename,
        title = %title,
        quality = %quality,
        codec = %codec,
        encoder = %encoder,
        "Parsed media item"
    );

    Some(ParsedMediaItem {
        title,
        kind,
        season,
        episode,
        year,
        quality,
        codec,
        encoder,
        file_size: 0,
        message_id: 0,
    })
}

/// Extract the resolution tag; `2160p` collapses into the `4K` bucket.
pub fn get_quality(text: &str) -> Quality {
    match QUALITY_RE.captures(text) {
        Some(caps) => match caps[1].to_uppercase().as_str() {
            "4K" | "2160P" => Quality::FourK,
            "1080P" => Quality::P1080,
            "720P" => Quality::P720,
            "540P" => Quality::P540,
            "480P" => Quality::P480,
            _ => Quality::Unknown,
        },
        None => Quality::Unknown,
    }
}

/// Codec detection in fixed priority order.
pub fn get_codec(text: &str) -> Codec {
    if AV1_RE.is_match(text) {
        Codec::Av1
    } else if VP9_RE.is_match(text) {
        Codec::Vp9
    } else if HEVC_RE.is_match(text) {
        Codec::X265
    } else if AVC_RE.is_match(text) {
        Codec::X264
    } else {
        Codec::Unknown
    }
}

/// Release-group detection.
///
/// A trailing `-GROUP` (extension stripped) wins; otherwise the known
/// vocabulary is scanned with the occurrence closest to the end of the
/// string taking precedence.
pub fn get_encoder(text: &str) -> String {
    let stripped = EXTENSION_RE.replace(text, "");

    if let Some(caps) = TRAILING_GROUP_RE.captures(&stripped) {
        let tag = caps[1].to_uppercase();
        if tag != "DUAL" && tag != "AUDIO" {
            return tag;
        }
    }

    // Last occurrence wins: walk the separator-split tokens back to front.
    for token in SEPARATOR_RE.split(&stripped).collect::<Vec<_>>().into_iter().rev() {
        let upper = token.to_uppercase();
        if KNOWN_ENCODERS.contains(upper.as_str()) {
            return upper;
        }
    }

    "Unknown".to_string()
}

fn extract_structural_info(
    text: &str,
    quality: Quality,
    codec: Codec,
    encoder: &str,
) -> Option<(String, MediaKind, Option<u32>, Option<u32>, Option<u32>)> {
    let mut cleaned = SEPARATOR_RE.replace_all(text, " ").to_string();

    // Strip the tags we already extracted so they cannot bleed into the
    // title. A title token that happens to equal a tag is stripped too;
    // accepted approximation of the heuristic.
    for tag in [quality.to_string(), codec.to_string(), encoder.to_string()] {
        if tag != "Unknown" {
            let word_re = Regex::new(&format!(r"(?i)\b{}\b", regex::escape(&tag))).ok()?;
            cleaned = word_re.replace_all(&cleaned, " ").to_string();
        }
    }
    let cleaned = SPACE_RE.replace_all(&cleaned, " ").trim().to_string();

    if let Some(caps) = SERIES_RE.captures(&cleaned) {
        let title = title_case(caps[1].trim());
        let season: u32 = caps[2].parse().ok()?;
        let episode: u32 = caps[3].parse().ok()?;
        return Some((title, MediaKind::Series, Some(season), Some(episode), None));
    }

    if let Some(caps) = MOVIE_RE.captures(&cleaned) {
        let year: u32 = caps[2].parse().ok()?;
        let title = format!("{} ({})", caps[1].trim(), year);
        return Some((title, MediaKind::Movie, None, None, Some(year)));
    }

    None
}

/// Uppercase the first letter of each word, lowercase the rest.
fn title_case(s: &str) -> String {
    s.split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => {
                    first.to_uppercase().collect::<String>() + &chars.as_str().to_lowercase()
                }
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_series() {
        let item = parse_media_info("Breaking.Bad.S01E01.720p.mkv", None).unwrap();
        assert_eq!(item.title, "Breaking Bad");
        assert_eq!(item.kind, MediaKind::Series);
        assert_eq!(item.season, Some(1));
        assert_eq!(item.episode, Some(1));
        assert_eq!(item.quality, Quality::P720);
    }

    #[test]
    fn test_parse_movie() {
        let item = parse_media_info("Inception.2010.1080p.BluRay.x264-GROUP.mkv", None).unwrap();
        assert_eq!(item.kind, MediaKind::Movie);
        assert_eq!(item.title, "Inception (2010)");
        assert_eq!(item.year, Some(2010));
        assert_eq!(item.quality, Quality::P1080);
        assert_eq!(item.codec, Codec::X264);
    }

    #[test]
    fn test_multi_part_rejection() {
        assert!(parse_media_info("Show.S01E01.1080p.002.mkv", None).is_none());
        let first = parse_media_info("Show.S01E01.1080p.001.mkv", None).unwrap();
        let plain = parse_media_info("Show.S01E01.1080p.mkv", None).unwrap();
        assert_eq!(first.title, plain.title);
        assert_eq!(first.season, plain.season);
        assert_eq!(first.episode, plain.episode);
        assert_eq!(first.quality, plain.quality);
    }

    #[test]
    fn test_encoder_trailing_hyphen_rule() {
        let item = parse_media_info("Show.S01E01.1080p.x264-PSA.mkv", None).unwrap();
        assert_eq!(item.encoder, "PSA");
    }

    #[test]
    fn test_encoder_vocabulary_scan() {
        // No trailing hyphen, but PSA is in the known vocabulary.
        let item = parse_media_info("Show.S01E01.1080p.x264.PSA.mkv", None).unwrap();
        assert_eq!(item.encoder, "PSA");
    }

    #[test]
    fn test_encoder_last_occurrence_wins() {
        let item = parse_media_info("EVO.Show.S01E01.1080p.RARBG.mkv", None).unwrap();
        assert_eq!(item.encoder, "RARBG");
    }

    #[test]
    fn test_encoder_dual_audio_excluded() {
        let item = parse_media_info("Show.S01E01.1080p.x265.PSA.Dual-Audio.mkv", None).unwrap();
        assert_eq!(item.encoder, "PSA");
    }

    #[test]
    fn test_quality_2160p_normalizes_to_4k() {
        assert_eq!(get_quality("Show.S01E01.2160p.mkv"), Quality::FourK);
        assert_eq!(get_quality("Show.S01E01.4K.mkv"), Quality::FourK);
    }

    #[test]
    fn test_codec_priority() {
        assert_eq!(get_codec("Show.AV1.x265.mkv"), Codec::Av1);
        assert_eq!(get_codec("Show.HEVC.mkv"), Codec::X265);
        assert_eq!(get_codec("Show.H 264.mkv"), Codec::X264);
        assert_eq!(get_codec("Show.mkv"), Codec::Unknown);
    }

    #[test]
    fn test_caption_preferred_with_episode_marker() {
        let item = parse_media_info(
            "random_upload_7261.mkv",
            Some("Breaking.Bad.S02E05.1080p.mkv"),
        )
        .unwrap();
        assert_eq!(item.title, "Breaking Bad");
        assert_eq!(item.season, Some(2));
        assert_eq!(item.episode, Some(5));
    }

    #[test]
    fn test_unparseable_returns_none() {
        assert!(parse_media_info("VID_20240101_123456.mp4", None).is_none());
        assert!(parse_media_info("notes.txt", None).is_none());
    }

    #[test]
    fn test_quality_key() {
        let item = parse_media_info("Show.S01E01.1080p.x264-PSA.mkv", None).unwrap();
        assert_eq!(item.quality_key(), "1080P X264 (PSA)");
    }

    #[test]
    fn test_glued_and_separated_episode_markers() {
        let glued = parse_media_info("Show.S01E01.mkv", None).unwrap();
        let spaced = parse_media_info("Show S01 E01.mkv", None).unwrap();
        assert_eq!(glued.season, spaced.season);
        assert_eq!(glued.episode, spaced.episode);
    }
}
