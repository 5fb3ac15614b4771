//! Per-title aggregate documents and their merge semantics
//!
//! One row per title; the season/quality structure is a JSON document so
//! merges stay a single upsert. All mutations are additive set-unions, so
//! merging the same item twice grows nothing and concurrent scans cannot
//! corrupt a document.

use std::collections::{BTreeMap, BTreeSet};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sqlx::{Row, SqlitePool};

use crate::services::filename_parser::{Codec, MediaKind, ParsedMediaItem, Quality};

/// One quality bucket within a season. `key` is the composite
/// `"{quality} {codec} ({encoder})"` identity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QualityCell {
    pub key: String,
    pub size: i64,
    pub episodes: BTreeSet<u32>,
    pub episodes_by_encoder: BTreeMap<String, BTreeSet<u32>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SeasonAggregate {
    pub episodes: BTreeSet<u32>,
    /// Quality cells in first-observed order.
    pub qualities: Vec<QualityCell>,
}

/// One release variant of a movie.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VersionRecord {
    pub quality: Quality,
    pub codec: Codec,
    pub encoder: String,
    pub size: i64,
}

/// The JSON document stored per title.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum TitleDoc {
    Series {
        // Internally tagged enums buffer their content, so JSON map keys
        // arrive as strings and must be parsed back into u32 explicitly.
        #[serde(deserialize_with = "deserialize_season_keys")]
        seasons: BTreeMap<u32, SeasonAggregate>,
    },
    Movie {
        versions: Vec<VersionRecord>,
    },
}

fn deserialize_season_keys<'de, D>(
    deserializer: D,
) -> std::result::Result<BTreeMap<u32, SeasonAggregate>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw = BTreeMap::<String, SeasonAggregate>::deserialize(deserializer)?;
    raw.into_iter()
        .map(|(k, v)| {
            k.parse::<u32>()
                .map(|k| (k, v))
                .map_err(serde::de::Error::custom)
        })
        .collect()
}

impl TitleDoc {
    pub fn new(kind: MediaKind) -> Self {
        match kind {
            MediaKind::Series => TitleDoc::Series {
                seasons: BTreeMap::new(),
            },
            MediaKind::Movie => TitleDoc::Movie {
                versions: Vec::new(),
            },
        }
    }

    /// Apply one parsed item. Set-additions are no-ops for episodes the
    /// document already holds; sizes are plain increments.
    pub fn merge_item(&mut self, item: &ParsedMediaItem) {
        match self {
            TitleDoc::Series { seasons } => {
                let (Some(season), Some(episode)) = (item.season, item.episode) else {
                    return;
                };
                let season_agg = seasons.entry(season).or_default();
                season_agg.episodes.insert(episode);

                let key = item.quality_key();
                let cell = match season_agg.qualities.iter_mut().find(|c| c.key == key) {
                    Some(cell) => cell,
                    None => {
                        season_agg.qualities.push(QualityCell {
                            key,
                            size: 0,
                            episodes: BTreeSet::new(),
                            episodes_by_encoder: BTreeMap::new(),
                        });
                        season_agg.qualities.last_mut().unwrap()
                    }
                };
                cell.size += item.file_size;
                cell.episodes.insert(episode);
                cell.episodes_by_encoder
                    .entry(item.encoder.clone())
                    .or_default()
                    .insert(episode);
            }
            TitleDoc::Movie { versions } => {
                let existing = versions.iter_mut().find(|v| {
                    v.quality == item.quality && v.codec == item.codec && v.encoder == item.encoder
                });
                match existing {
                    Some(v) => v.size += item.file_size,
                    None => versions.push(VersionRecord {
                        quality: item.quality,
                        codec: item.codec,
                        encoder: item.encoder.clone(),
                        size: item.file_size,
                    }),
                }
            }
        }
    }
}

/// A title aggregate as stored in the database.
#[derive(Debug, Clone)]
pub struct TitleAggregate {
    pub title: String,
    pub kind: MediaKind,
    pub doc: TitleDoc,
    pub total_size: i64,
}

/// Repository for title aggregates
pub struct AggregateRepository {
    pool: SqlitePool,
}

impl AggregateRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Merge one parsed item into its title document.
    ///
    /// Runs read-modify-write inside one transaction so the per-cell
    /// update is atomic; repeated merges of identical input only grow
    /// sizes, never episode sets.
    pub async fn merge(&self, item: &ParsedMediaItem) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query("SELECT doc, total_size FROM title_aggregates WHERE title = ?1")
            .bind(&item.title)
            .fetch_optional(&mut *tx)
            .await?;

        let (mut doc, total_size) = match row {
            Some(row) => {
                let doc_str: String = row.try_get("doc")?;
                let total: i64 = row.try_get("total_size")?;
                let doc: TitleDoc = serde_json::from_str(&doc_str)
                    .with_context(|| format!("Corrupt aggregate document for '{}'", item.title))?;
                (doc, total)
            }
            None => (TitleDoc::new(item.kind), 0),
        };

        doc.merge_item(item);
        let total_size = total_size + item.file_size;

        let kind_str = match item.kind {
            MediaKind::Series => "series",
            MediaKind::Movie => "movie",
        };
        sqlx::query(
            r#"
            INSERT INTO title_aggregates (title, kind, doc, total_size, updated_at)
            VALUES (?1, ?2, ?3, ?4, datetime('now'))
            ON CONFLICT (title) DO UPDATE SET
                doc = ?3,
                total_size = ?4,
                updated_at = datetime('now')
            "#,
        )
        .bind(&item.title)
        .bind(kind_str)
        .bind(serde_json::to_string(&doc)?)
        .bind(total_size)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    /// Fetch one title's aggregate.
    pub async fn get(&self, title: &str) -> Result<Option<TitleAggregate>> {
        let row = sqlx::query(
            "SELECT title, kind, doc, total_size FROM title_aggregates WHERE title = ?1",
        )
        .bind(title)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| {
            let doc_str: String = row.try_get("doc")?;
            let kind_str: String = row.try_get("kind")?;
            let kind = if kind_str == "movie" {
                MediaKind::Movie
            } else {
                MediaKind::Series
            };
            let doc = serde_json::from_str(&doc_str)?;
            anyhow::Ok(TitleAggregate {
                title: row.try_get("title")?,
                kind,
                doc,
                total_size: row.try_get("total_size")?,
            })
        })
        .transpose()
    }

    /// All cataloged titles, alphabetically.
    pub async fn list_titles(&self) -> Result<Vec<String>> {
        let rows = sqlx::query("SELECT title FROM title_aggregates ORDER BY title")
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter()
            .map(|r| r.try_get::<String, _>("title").map_err(Into::into))
            .collect()
    }
}
