//! Error taxonomy for the ingestion pipeline.
//!
//! Each stage has its own error type so the orchestrator can tally failures
//! by kind:
//!
//! | Stage | Type | Surfaces past the stage? |
//! |-------|------|--------------------------|
//! | Fetching | [`FetchError`] | yes, counted per URL |
//! | Adapter parsing | [`ParseError`] | yes, article dropped |
//! | Persistence | [`StorageError`] | yes, counted per URL |
//! | Word extraction | [`ExtractionError`] | no, recovered inside the extractor |
//! | Configuration | [`ConfigError`] | yes, fatal at startup |
//!
//! Duplicate articles are not an error: see
//! [`StoreOutcome::DuplicateSkipped`](crate::store::StoreOutcome).

use std::time::Duration;
use thiserror::Error;

/// Why a fetch did not produce usable content.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FetchError {
    /// Every attempt failed with a retryable condition.
    #[error("transient failure after {attempts} attempt(s): {reason}")]
    Transient { attempts: usize, reason: String },

    /// The server gave an answer that retrying will not change.
    #[error("permanent failure{}: {reason}", status_suffix(.status))]
    Permanent { status: Option<u16>, reason: String },

    /// The source's circuit breaker is open; no request was made.
    #[error("circuit open for source {source_id}, retry in {retry_in:?}")]
    CircuitOpen { source_id: String, retry_in: Duration },
}

impl FetchError {
    /// Short label used in reports and log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Transient { .. } => "transient",
            Self::Permanent { .. } => "permanent",
            Self::CircuitOpen { .. } => "circuit_open",
        }
    }
}

fn status_suffix(status: &Option<u16>) -> String {
    status.map(|s| format!(" (HTTP {s})")).unwrap_or_default()
}

/// The adapter could not turn fetched content into an article.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("missing required field: {0}")]
    MissingField(&'static str),

    #[error("invalid selector `{selector}`: {reason}")]
    InvalidSelector { selector: String, reason: String },

    #[error("unparseable date `{0}`")]
    InvalidDate(String),

    #[error("malformed document: {0}")]
    Malformed(String),
}

/// Persistence failures. Duplicates are reported through the store outcome.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("transaction failed: {0}")]
    TransactionFailure(#[from] rusqlite::Error),

    #[error("database schema version {db_version} is newer than supported {latest_supported}")]
    Migration {
        db_version: u32,
        latest_supported: u32,
    },

    #[error("invalid persisted data: {0}")]
    InvalidData(String),

    #[error("storage lock poisoned")]
    LockPoisoned,
}

/// Internal word-extraction failures; never leave the extractor.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ExtractionError {
    #[error("input of {bytes} bytes exceeds limit of {limit} bytes")]
    InputTooLarge { bytes: usize, limit: usize },

    #[error("input looks like binary content ({control_chars} control characters)")]
    BinaryContent { control_chars: usize },
}

/// Configuration loading and validation failures.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("source {source_id}: {error}")]
    Adapter {
        source_id: String,
        #[source]
        error: ParseError,
    },
}
