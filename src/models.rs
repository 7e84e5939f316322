//! Data models shared across the pipeline.
//!
//! - [`ParsedArticle`]: what a site adapter extracts from a page
//! - [`NewArticle`] / [`Article`]: an article before and after persistence
//! - [`WordOccurrence`]: one positioned word inside one article
//! - [`WordStat`] / [`DifficultyTier`]: derived corpus-wide statistics

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Opaque article identifier, assigned before the article is stored so that
/// word occurrences can reference it inside the same transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArticleId(pub Uuid);

impl ArticleId {
    /// A fresh random (v4) id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ArticleId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ArticleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Fields a site adapter extracts from raw article content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedArticle {
    pub title: String,
    pub body: String,
    pub published_at: Option<NaiveDate>,
}

/// An article ready to be handed to the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewArticle {
    pub id: ArticleId,
    pub source: String,
    pub url: String,
    pub title: String,
    pub body: String,
    pub published_at: Option<NaiveDate>,
    pub fetched_at: DateTime<Utc>,
}

impl NewArticle {
    /// Build an article from adapter output, stamping a fresh id and fetch time.
    pub fn from_parsed(
        source: impl Into<String>,
        url: impl Into<String>,
        parsed: ParsedArticle,
        fetched_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: ArticleId::new(),
            source: source.into(),
            url: url.into(),
            title: parsed.title,
            body: parsed.body,
            published_at: parsed.published_at,
            fetched_at,
        }
    }
}

/// A persisted article. Immutable once stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Article {
    pub id: ArticleId,
    pub source: String,
    pub url: String,
    pub title: String,
    pub body: String,
    pub published_at: Option<NaiveDate>,
    pub fetched_at: DateTime<Utc>,
}

/// One normalized word at a fixed position inside one article.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WordOccurrence {
    pub word: String,
    pub article_id: ArticleId,
    /// 0-based, non-decreasing in reading order.
    pub sentence_index: u32,
    /// 0-based and gap-free within the article.
    pub position_in_article: u32,
    pub observed_at: DateTime<Utc>,
}

/// Coarse frequency bucket used to prioritize vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DifficultyTier {
    VeryCommon,
    Common,
    Moderate,
    Uncommon,
    Rare,
}

impl DifficultyTier {
    /// Stable lowercase name, as stored in `word_stats.difficulty_tier`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::VeryCommon => "very_common",
            Self::Common => "common",
            Self::Moderate => "moderate",
            Self::Uncommon => "uncommon",
            Self::Rare => "rare",
        }
    }

    /// Inverse of [`as_str`](Self::as_str).
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "very_common" => Some(Self::VeryCommon),
            "common" => Some(Self::Common),
            "moderate" => Some(Self::Moderate),
            "uncommon" => Some(Self::Uncommon),
            "rare" => Some(Self::Rare),
            _ => None,
        }
    }
}

impl fmt::Display for DifficultyTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Corpus-wide statistics for one word, derived from its occurrences.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WordStat {
    pub word: String,
    pub total_frequency: u64,
    /// Number of distinct articles containing the word; never above `total_frequency`.
    pub document_frequency: u64,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    /// `document_frequency / total_frequency`, in `(0, 1]`.
    pub diversity_score: f64,
    pub difficulty_tier: DifficultyTier,
}
