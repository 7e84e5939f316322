//! YAML configuration for the pipeline.
//!
//! Every section is optional and falls back to the defaults below, so a
//! minimal file only needs a `sources` list:
//!
//! ```yaml
//! database_path: ./vocab.db
//! sources:
//!   - id: cnn
//!     adapter: html
//!     homepage: https://lite.cnn.com
//!     selectors:
//!       link: ".card--lite a[href]"
//!       title: ".headline--lite"
//!       body: ".article--lite p"
//! ```
//!
//! Difficulty-tier thresholds and the minimum frequency cutoff are tunables,
//! not fixed contracts.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;
use tracing::{info, instrument};

/// Top-level configuration file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database_path: String,
    /// Where JSON reports are written; reports are skipped when unset.
    pub json_output_dir: Option<String>,
    pub fetcher: FetcherConfig,
    pub breaker: BreakerConfig,
    pub pipeline: PipelineConfig,
    pub extractor: ExtractorConfig,
    pub frequency: FrequencyConfig,
    pub sources: Vec<SourceConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: "vocab.db".to_string(),
            json_output_dir: None,
            fetcher: FetcherConfig::default(),
            breaker: BreakerConfig::default(),
            pipeline: PipelineConfig::default(),
            extractor: ExtractorConfig::default(),
            frequency: FrequencyConfig::default(),
            sources: Vec::new(),
        }
    }
}

/// HTTP client, retry and politeness settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FetcherConfig {
    pub user_agent: String,
    pub timeout_secs: u64,
    pub connect_timeout_secs: u64,
    /// Idle connections kept per host in the shared pool.
    pub pool_max_idle_per_host: usize,
    /// Requests allowed in flight across all sources.
    pub max_connections: usize,
    /// Total attempts per fetch, including the first.
    pub max_attempts: usize,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub retry_jitter_ms: u64,
    /// Bodies shorter than this are treated as transient failures.
    pub min_content_bytes: usize,
    /// Minimum spacing between two requests to the same source.
    pub request_delay_ms: u64,
    pub request_delay_jitter_ms: u64,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            user_agent: format!("vocab_ingest/{}", env!("CARGO_PKG_VERSION")),
            timeout_secs: 20,
            connect_timeout_secs: 10,
            pool_max_idle_per_host: 10,
            max_connections: 20,
            max_attempts: 3,
            base_delay_ms: 1_000,
            max_delay_ms: 30_000,
            retry_jitter_ms: 250,
            min_content_bytes: 500,
            request_delay_ms: 1_000,
            request_delay_jitter_ms: 500,
        }
    }
}

impl FetcherConfig {
    /// Whole-request timeout.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    pub fn request_delay(&self) -> Duration {
        Duration::from_millis(self.request_delay_ms)
    }
}

/// Per-source circuit breaker settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerConfig {
    /// Consecutive transient fetch failures before the breaker opens.
    pub failure_threshold: u32,
    pub cooldown_ms: u64,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown_ms: 300_000,
        }
    }
}

impl BreakerConfig {
    /// How long an open breaker rejects requests.
    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }
}

/// Orchestrator settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Concurrent article fetches per source.
    pub concurrency_per_source: usize,
    pub max_articles_per_source: Option<usize>,
    /// Sources whose success rate falls below this are reported as degraded.
    pub degraded_threshold: f64,
    /// Rebuild the `word_stats` table at the end of each run.
    pub rebuild_stats: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            concurrency_per_source: 3,
            max_articles_per_source: None,
            degraded_threshold: 0.5,
            rebuild_stats: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractorConfig {
    /// Shortest token kept, counted in characters.
    pub min_word_length: usize,
    pub max_text_bytes: usize,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            min_word_length: 2,
            max_text_bytes: 2 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FrequencyConfig {
    /// Words seen fewer times than this are left out of the statistics.
    pub min_total_frequency: u64,
    pub tiers: TierThresholds,
}

impl Default for FrequencyConfig {
    fn default() -> Self {
        Self {
            min_total_frequency: 3,
            tiers: TierThresholds::default(),
        }
    }
}

/// Lower bounds (inclusive) on total frequency for each tier; anything
/// below `uncommon` is rare.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TierThresholds {
    pub very_common: u64,
    pub common: u64,
    pub moderate: u64,
    pub uncommon: u64,
}

impl Default for TierThresholds {
    fn default() -> Self {
        Self {
            very_common: 50,
            common: 20,
            moderate: 10,
            uncommon: 5,
        }
    }
}

/// Which built-in adapter handles a source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdapterKind {
    /// Links discovered from an HTML listing page.
    Html,
    /// Links discovered from an RSS or Atom feed.
    Feed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    pub id: String,
    pub adapter: AdapterKind,
    /// Listing page (html) or feed URL (feed).
    pub homepage: String,
    #[serde(default)]
    pub selectors: SelectorConfig,
}

/// CSS selectors used by the built-in adapters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectorConfig {
    /// Anchors on the listing page; only used by `html` sources.
    pub link: String,
    pub title: String,
    /// Every match contributes one paragraph to the body.
    pub body: String,
    /// Element holding the publication date.
    pub date: Option<String>,
    /// Attribute of the date element to read instead of its text.
    pub date_attr: Option<String>,
    /// `chrono` format string tried after RFC 3339 and `%Y-%m-%d`.
    pub date_format: Option<String>,
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self {
            link: "a[href]".to_string(),
            title: "h1".to_string(),
            body: "article p".to_string(),
            date: Some("meta[property=\"article:published_time\"]".to_string()),
            date_attr: Some("content".to_string()),
            date_format: None,
        }
    }
}

impl Config {
    /// Read, parse and validate a YAML configuration file.
    #[instrument(level = "info", skip_all, fields(path = %path.as_ref().display()))]
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let config = Self::from_yaml_str(&raw)?;
        info!(sources = config.sources.len(), "Loaded configuration");
        Ok(config)
    }

    /// Parse and validate a YAML document.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Yaml`] on malformed input, or any error from [`Config::validate`].
    pub fn from_yaml_str(raw: &str) -> Result<Self, ConfigError> {
        let mut config: Config = serde_yaml::from_str(raw)?;
        if config.database_path.is_empty() {
            config.database_path = "vocab.db".to_string();
        }
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the pipeline cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.fetcher.max_attempts == 0 {
            return Err(ConfigError::Invalid("fetcher.max_attempts must be at least 1".into()));
        }
        if self.fetcher.max_connections == 0 {
            return Err(ConfigError::Invalid("fetcher.max_connections must be at least 1".into()));
        }
        if self.breaker.failure_threshold == 0 {
            return Err(ConfigError::Invalid("breaker.failure_threshold must be at least 1".into()));
        }
        if self.pipeline.concurrency_per_source == 0 {
            return Err(ConfigError::Invalid(
                "pipeline.concurrency_per_source must be at least 1".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.pipeline.degraded_threshold) {
            return Err(ConfigError::Invalid(
                "pipeline.degraded_threshold must be within [0, 1]".into(),
            ));
        }
        if self.extractor.min_word_length == 0 {
            return Err(ConfigError::Invalid("extractor.min_word_length must be at least 1".into()));
        }
        let t = &self.frequency.tiers;
        if !(t.very_common >= t.common && t.common >= t.moderate && t.moderate >= t.uncommon) {
            return Err(ConfigError::Invalid(
                "frequency.tiers must be ordered very_common >= common >= moderate >= uncommon".into(),
            ));
        }

        let mut seen = HashSet::new();
        for source in &self.sources {
            if source.id.trim().is_empty() {
                return Err(ConfigError::Invalid("source id must not be empty".into()));
            }
            if !seen.insert(source.id.as_str()) {
                return Err(ConfigError::Invalid(format!("duplicate source id `{}`", source.id)));
            }
            if url::Url::parse(&source.homepage).is_err() {
                return Err(ConfigError::Invalid(format!(
                    "source `{}` has an invalid homepage URL `{}`",
                    source.id, source.homepage
                )));
            }
            crate::adapters::build_adapter(source)?;
        }
        Ok(())
    }
}
