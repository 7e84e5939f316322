//! # vocab_ingest
//!
//! Resilient news-article ingestion feeding a word-frequency engine.
//!
//! ## Pipeline
//!
//! 1. **Discovery**: each [`Source`]'s [`SiteAdapter`] turns its homepage
//!    (an HTML listing or a feed) into article URLs
//! 2. **Fetching**: the [`Fetcher`] retrieves pages with retries, per-source
//!    pacing and a per-source circuit breaker
//! 3. **Parsing**: the adapter extracts `{title, body, published_at}`
//! 4. **Extraction**: the [`WordExtractor`] turns the body into positioned
//!    [`WordOccurrence`]s
//! 5. **Storage**: the [`ArticleStore`] writes article and occurrences in one
//!    transaction, skipping duplicates
//! 6. **Statistics**: the [`FrequencyEngine`] rebuilds [`WordStat`]s from every
//!    stored occurrence
//!
//! [`Orchestrator::run`] drives steps 1 to 6 and returns a [`Report`].

pub mod adapters;
pub mod config;
pub mod error;
pub mod extractor;
pub mod fetcher;
pub mod frequency;
pub mod models;
pub mod orchestrator;
pub mod outputs;
pub mod store;
pub mod utils;

pub use adapters::{SiteAdapter, Source, build_sources};
pub use config::Config;
pub use error::{ConfigError, ExtractionError, FetchError, ParseError, StorageError};
pub use extractor::WordExtractor;
pub use fetcher::{Fetcher, HttpTransport, ReqwestTransport};
pub use frequency::{FrequencyAccumulator, FrequencyEngine};
pub use models::{Article, ArticleId, DifficultyTier, NewArticle, ParsedArticle, WordOccurrence, WordStat};
pub use orchestrator::{Orchestrator, Report, SourceReport};
pub use store::{ArticleStore, DuplicateKind, StoreOutcome};
