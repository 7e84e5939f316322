//! SQLite persistence for articles, word occurrences and word statistics.
//!
//! An article and its occurrences are written in one `IMMEDIATE` transaction.
//! Duplicates are detected on `(source, url)` and, when the publication date
//! is known, on `(source, title, published_at)`. Both checks are backed by
//! unique indexes, so a writer that loses a race gets a constraint violation
//! which is reported as [`StoreOutcome::DuplicateSkipped`] as well.
//!
//! Timestamps are stored as RFC 3339 text and dates as `YYYY-MM-DD`.

pub mod migrations;

use crate::error::StorageError;
use crate::frequency::{FrequencyAccumulator, FrequencyEngine};
use crate::models::{Article, ArticleId, DifficultyTier, NewArticle, WordOccurrence, WordStat};
use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use migrations::apply_migrations;
use rusqlite::{Connection, OptionalExtension, Row, TransactionBehavior, params};
use serde::Serialize;
use std::fmt;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::{debug, info, instrument};
use uuid::Uuid;

const ARTICLE_SELECT_SQL: &str = "SELECT
    id,
    source,
    url,
    title,
    body,
    published_at,
    fetched_at
FROM articles";

const OCCURRENCE_SELECT_SQL: &str = "SELECT
    word,
    article_id,
    sentence_index,
    position_in_article,
    observed_at
FROM word_occurrences";

/// Occurrences handed to the accumulator at a time during a stats rebuild.
const STATS_BATCH_SIZE: usize = 10_000;

/// Which uniqueness rule rejected an article.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicateKind {
    Url,
    TitleAndDate,
}

impl fmt::Display for DuplicateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Url => f.write_str("same source and url"),
            Self::TitleAndDate => f.write_str("same source, title and publication date"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOutcome {
    Stored(ArticleId),
    DuplicateSkipped(DuplicateKind),
}

/// Shared handle to the article database.
#[derive(Clone)]
pub struct ArticleStore {
    conn: Arc<Mutex<Connection>>,
}

impl fmt::Debug for ArticleStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArticleStore").finish_non_exhaustive()
    }
}

impl ArticleStore {
    /// Open (or create) a database file and apply pending migrations.
    #[instrument(level = "info", skip_all, fields(path = %path.as_ref().display()))]
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let started_at = Instant::now();
        let mut conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode = WAL;")?;
        bootstrap_connection(&mut conn)?;
        info!(
            duration_ms = started_at.elapsed().as_millis() as u64,
            "Opened article store"
        );
        Ok(Self::from_connection(conn))
    }

    /// A private in-memory database with the schema applied.
    ///
    /// Each call returns an independent database; clones of the returned store
    /// share it.
    pub fn open_in_memory() -> Result<Self, StorageError> {
        let mut conn = Connection::open_in_memory()?;
        bootstrap_connection(&mut conn)?;
        Ok(Self::from_connection(conn))
    }

    fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StorageError> {
        self.conn.lock().map_err(|_| StorageError::LockPoisoned)
    }

    /// Persist an article with its word occurrences, or report why it was skipped.
    #[instrument(level = "debug", skip_all, fields(source = %article.source, url = %article.url))]
    pub fn store(
        &self,
        article: &NewArticle,
        occurrences: &[WordOccurrence],
    ) -> Result<StoreOutcome, StorageError> {
        if let Some(stray) = occurrences.iter().find(|o| o.article_id != article.id) {
            return Err(StorageError::InvalidData(format!(
                "occurrence of `{}` belongs to article {}, not {}",
                stray.word, stray.article_id, article.id
            )));
        }

        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let url_taken = tx
            .query_row(
                "SELECT 1 FROM articles WHERE source = ?1 AND url = ?2;",
                params![article.source, article.url],
                |_| Ok(()),
            )
            .optional()?
            .is_some();
        if url_taken {
            debug!("Skipping duplicate article (url)");
            return Ok(StoreOutcome::DuplicateSkipped(DuplicateKind::Url));
        }

        let published_at = article.published_at.map(|d| d.to_string());
        if let Some(date) = &published_at {
            let title_taken = tx
                .query_row(
                    "SELECT 1 FROM articles WHERE source = ?1 AND title = ?2 AND published_at = ?3;",
                    params![article.source, article.title, date],
                    |_| Ok(()),
                )
                .optional()?
                .is_some();
            if title_taken {
                debug!("Skipping duplicate article (title and date)");
                return Ok(StoreOutcome::DuplicateSkipped(DuplicateKind::TitleAndDate));
            }
        }

        let inserted = tx.execute(
            "INSERT INTO articles (id, source, url, title, body, published_at, fetched_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7);",
            params![
                article.id.to_string(),
                article.source,
                article.url,
                article.title,
                article.body,
                published_at,
                format_timestamp(article.fetched_at),
            ],
        );
        if let Err(e) = inserted {
            return match duplicate_kind(&e) {
                Some(kind) => {
                    debug!(%kind, "Lost insert race to a duplicate article");
                    Ok(StoreOutcome::DuplicateSkipped(kind))
                }
                None => Err(e.into()),
            };
        }

        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO word_occurrences
                    (word, article_id, sentence_index, position_in_article, observed_at)
                 VALUES (?1, ?2, ?3, ?4, ?5);",
            )?;
            let article_id = article.id.to_string();
            for occurrence in occurrences {
                stmt.execute(params![
                    occurrence.word,
                    article_id,
                    occurrence.sentence_index,
                    occurrence.position_in_article,
                    format_timestamp(occurrence.observed_at),
                ])?;
            }
        }

        tx.commit()?;
        debug!(id = %article.id, words = occurrences.len(), "Stored article");
        Ok(StoreOutcome::Stored(article.id))
    }

    /// Look up one article.
    ///
    /// # Returns
    ///
    /// `Ok(None)` when no article has this id.
    pub fn get_article(&self, id: ArticleId) -> Result<Option<Article>, StorageError> {
        let conn = self.lock()?;
        let row = conn
            .query_row(
                &format!("{ARTICLE_SELECT_SQL} WHERE id = ?1;"),
                [id.to_string()],
                ArticleRow::read,
            )
            .optional()?;
        row.map(ArticleRow::into_article).transpose()
    }

    /// Articles of one source, oldest fetch first.
    pub fn list_articles(&self, source: &str) -> Result<Vec<Article>, StorageError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "{ARTICLE_SELECT_SQL} WHERE source = ?1 ORDER BY fetched_at ASC, url ASC;"
        ))?;
        let rows = stmt
            .query_map([source], ArticleRow::read)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(ArticleRow::into_article).collect()
    }

    /// Total number of stored articles.
    pub fn article_count(&self) -> Result<u64, StorageError> {
        let conn = self.lock()?;
        to_count(conn.query_row("SELECT COUNT(*) FROM articles;", [], |row| row.get(0))?)
    }

    /// Remove an article; its occurrences go with it. Returns whether it existed.
    pub fn delete_article(&self, id: ArticleId) -> Result<bool, StorageError> {
        let conn = self.lock()?;
        let deleted = conn.execute("DELETE FROM articles WHERE id = ?1;", [id.to_string()])?;
        Ok(deleted > 0)
    }

    /// Every stored occurrence, grouped by article in reading order.
    pub fn occurrences(&self) -> Result<Vec<WordOccurrence>, StorageError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "{OCCURRENCE_SELECT_SQL} ORDER BY article_id ASC, position_in_article ASC;"
        ))?;
        let rows = stmt
            .query_map([], OccurrenceRow::read)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(OccurrenceRow::into_occurrence).collect()
    }

    /// Occurrences of one article in reading order.
    pub fn occurrences_for(&self, article_id: ArticleId) -> Result<Vec<WordOccurrence>, StorageError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "{OCCURRENCE_SELECT_SQL} WHERE article_id = ?1 ORDER BY position_in_article ASC;"
        ))?;
        let rows = stmt
            .query_map([article_id.to_string()], OccurrenceRow::read)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(OccurrenceRow::into_occurrence).collect()
    }

    /// Total number of stored word occurrences.
    pub fn occurrence_count(&self) -> Result<u64, StorageError> {
        let conn = self.lock()?;
        to_count(conn.query_row("SELECT COUNT(*) FROM word_occurrences;", [], |row| row.get(0))?)
    }

    /// Recompute `word_stats` from every stored occurrence. Returns the number
    /// of words written.
    #[instrument(level = "info", skip_all)]
    pub fn rebuild_word_stats(&self, engine: &FrequencyEngine) -> Result<usize, StorageError> {
        let started_at = Instant::now();
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let mut acc = FrequencyAccumulator::new();
        {
            let mut stmt = tx.prepare(OCCURRENCE_SELECT_SQL)?;
            let mut rows = stmt.query([])?;
            let mut batch = Vec::with_capacity(STATS_BATCH_SIZE);
            while let Some(row) = rows.next()? {
                batch.push(OccurrenceRow::read(row)?.into_occurrence()?);
                if batch.len() == STATS_BATCH_SIZE {
                    acc.add_batch(&batch);
                    batch.clear();
                }
            }
            acc.add_batch(&batch);
        }
        let stats = engine.finish(&acc);

        tx.execute("DELETE FROM word_stats;", [])?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO word_stats
                    (word, total_frequency, document_frequency, first_seen, last_seen,
                     diversity_score, difficulty_tier)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7);",
            )?;
            for stat in &stats {
                stmt.execute(params![
                    stat.word,
                    stat.total_frequency as i64,
                    stat.document_frequency as i64,
                    format_timestamp(stat.first_seen),
                    format_timestamp(stat.last_seen),
                    stat.diversity_score,
                    stat.difficulty_tier.as_str(),
                ])?;
            }
        }
        tx.commit()?;

        info!(
            occurrences = acc.occurrence_count(),
            words = stats.len(),
            duration_ms = started_at.elapsed().as_millis() as u64,
            "Rebuilt word statistics"
        );
        Ok(stats.len())
    }

    /// Stored statistics, most frequent first.
    pub fn word_stats(&self) -> Result<Vec<WordStat>, StorageError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT word, total_frequency, document_frequency, first_seen, last_seen,
                    diversity_score, difficulty_tier
             FROM word_stats
             ORDER BY total_frequency DESC, word ASC;",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, f64>(5)?,
                    row.get::<_, String>(6)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(word, total, document, first, last, diversity, tier)| {
                Ok(WordStat {
                    total_frequency: to_count(total)?,
                    document_frequency: to_count(document)?,
                    first_seen: parse_timestamp(&first)?,
                    last_seen: parse_timestamp(&last)?,
                    diversity_score: diversity,
                    difficulty_tier: DifficultyTier::parse(&tier).ok_or_else(|| {
                        StorageError::InvalidData(format!("unknown difficulty tier `{tier}`"))
                    })?,
                    word,
                })
            })
            .collect()
    }
}

fn bootstrap_connection(conn: &mut Connection) -> Result<(), StorageError> {
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    conn.busy_timeout(Duration::from_secs(5))?;
    apply_migrations(conn)
}

/// Map a unique-index violation on `articles` to the rule it enforces.
fn duplicate_kind(error: &rusqlite::Error) -> Option<DuplicateKind> {
    match error {
        rusqlite::Error::SqliteFailure(e, Some(message))
            if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE =>
        {
            if message.contains("articles.url") {
                Some(DuplicateKind::Url)
            } else if message.contains("articles.title") {
                Some(DuplicateKind::TitleAndDate)
            } else {
                None
            }
        }
        _ => None,
    }
}

fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, StorageError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StorageError::InvalidData(format!("bad timestamp `{raw}`: {e}")))
}

fn parse_article_id(raw: &str) -> Result<ArticleId, StorageError> {
    Uuid::parse_str(raw)
        .map(ArticleId)
        .map_err(|e| StorageError::InvalidData(format!("bad article id `{raw}`: {e}")))
}

fn to_count(value: i64) -> Result<u64, StorageError> {
    u64::try_from(value).map_err(|_| StorageError::InvalidData(format!("negative count {value}")))
}

struct ArticleRow {
    id: String,
    source: String,
    url: String,
    title: String,
    body: String,
    published_at: Option<String>,
    fetched_at: String,
}

impl ArticleRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            source: row.get(1)?,
            url: row.get(2)?,
            title: row.get(3)?,
            body: row.get(4)?,
            published_at: row.get(5)?,
            fetched_at: row.get(6)?,
        })
    }

    fn into_article(self) -> Result<Article, StorageError> {
        let published_at = self
            .published_at
            .map(|raw| {
                NaiveDate::parse_from_str(&raw, "%Y-%m-%d")
                    .map_err(|e| StorageError::InvalidData(format!("bad date `{raw}`: {e}")))
            })
            .transpose()?;
        Ok(Article {
            id: parse_article_id(&self.id)?,
            source: self.source,
            url: self.url,
            title: self.title,
            body: self.body,
            published_at,
            fetched_at: parse_timestamp(&self.fetched_at)?,
        })
    }
}

struct OccurrenceRow {
    word: String,
    article_id: String,
    sentence_index: u32,
    position_in_article: u32,
    observed_at: String,
}

impl OccurrenceRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            word: row.get(0)?,
            article_id: row.get(1)?,
            sentence_index: row.get(2)?,
            position_in_article: row.get(3)?,
            observed_at: row.get(4)?,
        })
    }

    fn into_occurrence(self) -> Result<WordOccurrence, StorageError> {
        Ok(WordOccurrence {
            article_id: parse_article_id(&self.article_id)?,
            observed_at: parse_timestamp(&self.observed_at)?,
            word: self.word,
            sentence_index: self.sentence_index,
            position_in_article: self.position_in_article,
        })
    }
}
