//! Drives every source through discovery, fetching, parsing, extraction and
//! storage, and tallies what happened.
//!
//! Sources run concurrently; inside a source, article URLs go through a
//! bounded pool of `concurrency_per_source` in-flight fetches. A failure at
//! one URL is logged with `source` and `url` fields and counted, never
//! propagated. The only thing that stops a source early is its circuit
//! breaker, and even then every remaining URL is still accounted for (as a
//! fast `circuit_open` failure).

use crate::adapters::Source;
use crate::config::PipelineConfig;
use crate::error::{FetchError, ParseError, StorageError};
use crate::extractor::WordExtractor;
use crate::fetcher::{Fetcher, HttpTransport};
use crate::frequency::FrequencyEngine;
use crate::models::{ArticleId, NewArticle};
use crate::store::{ArticleStore, StoreOutcome};
use crate::utils::truncate_for_log;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use futures::stream::{self, StreamExt};
use itertools::Itertools;
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Instant;
use tracing::{debug, error, info, instrument, warn};
use url::Url;

/// Why one URL did not produce a stored article.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Transient,
    Permanent,
    CircuitOpen,
    Parse,
    Storage,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UrlError {
    pub url: String,
    pub kind: FailureKind,
    pub message: String,
}

/// Per-source tallies for one run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceReport {
    pub source: String,
    /// Article URLs the source's pool worked through.
    pub attempted: usize,
    /// Articles newly stored.
    pub processed: usize,
    pub duplicates: usize,
    pub fetch_failures: usize,
    pub circuit_open: usize,
    pub parse_failures: usize,
    pub storage_failures: usize,
    /// Word occurrences stored alongside this source's new articles.
    pub words: usize,
    pub stored: Vec<ArticleId>,
    /// Set when the homepage could not be fetched or yielded no usable links.
    pub discovery_error: Option<String>,
    pub errors: Vec<UrlError>,
    /// `(processed + duplicates) / attempted`; a duplicate is a correctly
    /// handled URL, not a failure.
    pub success_rate: f64,
    pub degraded: bool,
}

impl SourceReport {
    fn new(source: &str) -> Self {
        Self {
            source: source.to_string(),
            attempted: 0,
            processed: 0,
            duplicates: 0,
            fetch_failures: 0,
            circuit_open: 0,
            parse_failures: 0,
            storage_failures: 0,
            words: 0,
            stored: Vec::new(),
            discovery_error: None,
            errors: Vec::new(),
            success_rate: 0.0,
            degraded: false,
        }
    }

    fn record(&mut self, url: String, outcome: UrlOutcome) {
        self.attempted += 1;
        let failure = match outcome {
            UrlOutcome::Stored { article_id, words } => {
                self.processed += 1;
                self.words += words;
                self.stored.push(article_id);
                None
            }
            UrlOutcome::Duplicate => {
                self.duplicates += 1;
                None
            }
            UrlOutcome::FetchFailed(e) => {
                let kind = match &e {
                    FetchError::Transient { .. } => FailureKind::Transient,
                    FetchError::Permanent { .. } => FailureKind::Permanent,
                    FetchError::CircuitOpen { .. } => FailureKind::CircuitOpen,
                };
                if kind == FailureKind::CircuitOpen {
                    self.circuit_open += 1;
                } else {
                    self.fetch_failures += 1;
                }
                Some((kind, e.to_string()))
            }
            UrlOutcome::ParseFailed(e) => {
                self.parse_failures += 1;
                Some((FailureKind::Parse, e.to_string()))
            }
            UrlOutcome::StorageFailed(e) => {
                self.storage_failures += 1;
                Some((FailureKind::Storage, e.to_string()))
            }
        };
        if let Some((kind, message)) = failure {
            self.errors.push(UrlError { url, kind, message });
        }
    }

    /// Compute `success_rate` and `degraded` once every URL is recorded.
    fn finalize(&mut self, degraded_threshold: f64) {
        self.success_rate = if self.attempted == 0 {
            if self.discovery_error.is_some() { 0.0 } else { 1.0 }
        } else {
            (self.processed + self.duplicates) as f64 / self.attempted as f64
        };
        self.degraded = self.success_rate < degraded_threshold;
    }

    /// Failed URLs plus a failed discovery.
    pub fn error_count(&self) -> usize {
        self.errors.len() + usize::from(self.discovery_error.is_some())
    }
}

/// Outcome of a whole run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Report {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub sources: Vec<SourceReport>,
    /// Rows written by the end-of-run statistics rebuild, if it ran and succeeded.
    pub word_stats: Option<usize>,
}

impl Report {
    /// Articles stored across all sources.
    pub fn processed_count(&self) -> usize {
        self.sources.iter().map(|s| s.processed).sum()
    }

    /// URLs attempted across all sources.
    pub fn attempted_count(&self) -> usize {
        self.sources.iter().map(|s| s.attempted).sum()
    }

    /// Error count keyed by source id.
    pub fn per_source_errors(&self) -> BTreeMap<&str, usize> {
        self.sources
            .iter()
            .map(|s| (s.source.as_str(), s.error_count()))
            .collect()
    }

    /// Ids of sources whose success rate fell below the threshold.
    pub fn degraded_sources(&self) -> Vec<&str> {
        self.sources
            .iter()
            .filter(|s| s.degraded)
            .map(|s| s.source.as_str())
            .collect()
    }

    pub fn source(&self, id: &str) -> Option<&SourceReport> {
        self.sources.iter().find(|s| s.source == id)
    }
}

enum UrlOutcome {
    Stored { article_id: ArticleId, words: usize },
    Duplicate,
    FetchFailed(FetchError),
    ParseFailed(ParseError),
    StorageFailed(StorageError),
}

pub struct Orchestrator<T> {
    fetcher: Fetcher<T>,
    store: ArticleStore,
    extractor: WordExtractor,
    engine: FrequencyEngine,
    config: PipelineConfig,
}

impl<T: HttpTransport> Orchestrator<T> {
    /// Assemble an orchestrator.
    ///
    /// # Arguments
    ///
    /// * `fetcher` - Shared by every source; holds each source's breaker and pacer.
    /// * `store` - Destination for articles and occurrences.
    /// * `extractor` - Turns article bodies into word occurrences.
    /// * `engine` - Used to rebuild `word_stats` after the run.
    /// * `config` - Concurrency, article cap, degradation threshold and rebuild switch.
    pub fn new(
        fetcher: Fetcher<T>,
        store: ArticleStore,
        extractor: WordExtractor,
        engine: FrequencyEngine,
        config: PipelineConfig,
    ) -> Self {
        Self {
            fetcher,
            store,
            extractor,
            engine,
            config,
        }
    }

    /// Run every source to completion and report per-source outcomes.
    #[instrument(level = "info", skip_all, fields(sources = sources.len()))]
    pub async fn run(&self, sources: &[Source]) -> Report {
        let started_at = Utc::now();
        let t0 = Instant::now();
        info!(
            concurrency_per_source = self.config.concurrency_per_source,
            "Starting ingestion run"
        );

        let mut reports = join_all(sources.iter().map(|source| self.run_source(source))).await;
        for report in &mut reports {
            report.finalize(self.config.degraded_threshold);
            if report.degraded {
                warn!(
                    source = %report.source,
                    success_rate = report.success_rate,
                    threshold = self.config.degraded_threshold,
                    "Source degraded"
                );
            }
        }

        let word_stats = if self.config.rebuild_stats {
            match self.store.rebuild_word_stats(&self.engine) {
                Ok(words) => Some(words),
                Err(e) => {
                    error!(error = %e, "Failed to rebuild word statistics");
                    None
                }
            }
        } else {
            None
        };

        let report = Report {
            started_at,
            finished_at: Utc::now(),
            sources: reports,
            word_stats,
        };
        info!(
            attempted = report.attempted_count(),
            processed = report.processed_count(),
            degraded = report.degraded_sources().len(),
            elapsed_ms = t0.elapsed().as_millis() as u64,
            "Ingestion run complete"
        );
        report
    }

    #[instrument(level = "info", skip_all, fields(source = %source.id, adapter = source.adapter.name()))]
    async fn run_source(&self, source: &Source) -> SourceReport {
        let mut report = SourceReport::new(&source.id);

        let urls = match self.discover(source).await {
            Ok(urls) => urls,
            Err(reason) => {
                error!(homepage = %source.homepage, error = %reason, "Discovery failed");
                report.discovery_error = Some(reason);
                return report;
            }
        };
        info!(count = urls.len(), "Processing discovered articles");

        let outcomes: Vec<(String, UrlOutcome)> = stream::iter(urls)
            .map(|url| async move {
                let outcome = self.process_url(source, &url).await;
                (url, outcome)
            })
            .buffer_unordered(self.config.concurrency_per_source.max(1))
            .collect()
            .await;

        for (url, outcome) in outcomes {
            report.record(url, outcome);
        }
        info!(
            attempted = report.attempted,
            processed = report.processed,
            duplicates = report.duplicates,
            failed = report.errors.len(),
            "Source complete"
        );
        report
    }

    /// Candidate article URLs: de-duplicated, in discovery order, optionally capped.
    async fn discover(&self, source: &Source) -> Result<Vec<String>, String> {
        let page = self
            .fetcher
            .fetch(&source.id, &source.homepage)
            .await
            .map_err(|e| format!("homepage fetch failed: {e}"))?;
        let base_url = Url::parse(&page.url)
            .or_else(|_| Url::parse(&source.homepage))
            .map_err(|e| format!("invalid homepage url: {e}"))?;
        let urls = source
            .adapter
            .discover(&page.content, &base_url)
            .map_err(|e| format!("discovery failed: {e}"))?;

        let limit = self.config.max_articles_per_source.unwrap_or(usize::MAX);
        let urls = urls.into_iter().unique().take(limit).collect::<Vec<_>>();
        debug!(count = urls.len(), limit = ?self.config.max_articles_per_source, "Discovered URLs");
        Ok(urls)
    }

    #[instrument(level = "debug", skip_all, fields(source = %source.id, %url))]
    async fn process_url(&self, source: &Source, url: &str) -> UrlOutcome {
        let page = match self.fetcher.fetch(&source.id, url).await {
            Ok(page) => page,
            Err(e) => {
                match &e {
                    FetchError::CircuitOpen { .. } => debug!(error = %e, "Skipped: circuit open"),
                    _ => warn!(error = %e, "Fetch failed"),
                }
                return UrlOutcome::FetchFailed(e);
            }
        };

        let parsed = match source.adapter.parse(&page.content) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!(
                    error = %e,
                    preview = %truncate_for_log(&page.content, 200),
                    "Parse failed; dropping article"
                );
                return UrlOutcome::ParseFailed(e);
            }
        };

        let article = NewArticle::from_parsed(&source.id, url, parsed, Utc::now());
        let occurrences = self
            .extractor
            .extract(article.id, &article.body, article.fetched_at);

        match self.store.store(&article, &occurrences) {
            Ok(StoreOutcome::Stored(article_id)) => {
                info!(%article_id, words = occurrences.len(), "Stored article");
                UrlOutcome::Stored {
                    article_id,
                    words: occurrences.len(),
                }
            }
            Ok(StoreOutcome::DuplicateSkipped(kind)) => {
                debug!(%kind, "Duplicate article skipped");
                UrlOutcome::Duplicate
            }
            Err(e) => {
                error!(error = %e, "Storage failed");
                UrlOutcome::StorageFailed(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transient() -> UrlOutcome {
        UrlOutcome::FetchFailed(FetchError::Transient {
            attempts: 3,
            reason: "HTTP 500".to_string(),
        })
    }

    #[test]
    fn test_source_report_tallies() {
        let mut report = SourceReport::new("x");
        report.record(
            "https://x/1".into(),
            UrlOutcome::Stored {
                article_id: ArticleId::new(),
                words: 12,
            },
        );
        report.record("https://x/2".into(), UrlOutcome::Duplicate);
        report.record("https://x/3".into(), transient());
        report.record(
            "https://x/4".into(),
            UrlOutcome::ParseFailed(ParseError::MissingField("title")),
        );
        report.finalize(0.5);

        assert_eq!(report.attempted, 4);
        assert_eq!(report.processed, 1);
        assert_eq!(report.duplicates, 1);
        assert_eq!(report.fetch_failures, 1);
        assert_eq!(report.parse_failures, 1);
        assert_eq!(report.words, 12);
        assert_eq!(report.stored.len(), 1);
        assert_eq!(report.errors.len(), 2);
        assert_eq!(report.errors[0].kind, FailureKind::Transient);
        assert!((report.success_rate - 0.5).abs() < 1e-9);
        assert!(!report.degraded);
    }

    #[test]
    fn test_degraded_below_threshold() {
        let mut report = SourceReport::new("x");
        report.record("https://x/1".into(), transient());
        report.record(
            "https://x/2".into(),
            UrlOutcome::FetchFailed(FetchError::CircuitOpen {
                source_id: "x".into(),
                retry_in: std::time::Duration::from_secs(60),
            }),
        );
        report.finalize(0.5);
        assert_eq!(report.circuit_open, 1);
        assert_eq!(report.success_rate, 0.0);
        assert!(report.degraded);
    }

    #[test]
    fn test_empty_source_rates() {
        let mut quiet = SourceReport::new("quiet");
        quiet.finalize(0.5);
        assert_eq!(quiet.success_rate, 1.0);
        assert!(!quiet.degraded);

        let mut broken = SourceReport::new("broken");
        broken.discovery_error = Some("homepage fetch failed".into());
        broken.finalize(0.5);
        assert_eq!(broken.success_rate, 0.0);
        assert!(broken.degraded);
        assert_eq!(broken.error_count(), 1);
    }

    #[test]
    fn test_report_aggregates() {
        let mut a = SourceReport::new("a");
        a.record(
            "https://a/1".into(),
            UrlOutcome::Stored {
                article_id: ArticleId::new(),
                words: 3,
            },
        );
        a.finalize(0.5);
        let mut b = SourceReport::new("b");
        b.record("https://b/1".into(), transient());
        b.finalize(0.5);

        let now = Utc::now();
        let report = Report {
            started_at: now,
            finished_at: now,
            sources: vec![a, b],
            word_stats: None,
        };
        assert_eq!(report.processed_count(), 1);
        assert_eq!(report.attempted_count(), 2);
        assert_eq!(report.per_source_errors().get("b"), Some(&1));
        assert_eq!(report.per_source_errors().get("a"), Some(&0));
        assert_eq!(report.degraded_sources(), vec!["b"]);
        assert!(report.source("a").is_some());

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["sources"][1]["errors"][0]["kind"], "transient");
    }
}
