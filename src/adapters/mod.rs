//! Site adapters: the only source-specific code in the pipeline.
//!
//! Each source is handled by one [`SiteAdapter`], which follows a two-phase
//! pattern:
//!
//! 1. **Discovery**: turn the source's homepage (listing page or feed) into
//!    candidate article URLs
//! 2. **Parsing**: turn one fetched article page into `{title, body, published_at}`
//!
//! Adapters never touch the network; the orchestrator fetches every document
//! through the shared [`Fetcher`](crate::fetcher::Fetcher) and hands the
//! content over.
//!
//! # Built-in adapters
//!
//! | Kind | Type | Discovery |
//! |------|------|-----------|
//! | `html` | [`HtmlAdapter`] | CSS selector over a listing page |
//! | `feed` | [`FeedAdapter`] | RSS `<item><link>` / Atom `<entry><link>` |
//!
//! The mapping from [`AdapterKind`] to implementation is a plain `match` in
//! [`build_adapter`].

pub mod feed;
pub mod html;
pub mod selectors;

pub use feed::FeedAdapter;
pub use html::HtmlAdapter;

use crate::config::{AdapterKind, SourceConfig};
use crate::error::{ConfigError, ParseError};
use crate::models::ParsedArticle;
use std::fmt;
use tracing::info;
use url::Url;

/// Per-source discovery and parsing.
pub trait SiteAdapter: Send + Sync {
    /// Adapter kind, for logs.
    fn name(&self) -> &'static str;

    /// Candidate article URLs found in the homepage document, absolute and
    /// de-duplicated.
    fn discover(&self, homepage: &str, base_url: &Url) -> Result<Vec<String>, ParseError>;

    /// Extract the article fields from a fetched page.
    fn parse(&self, raw_content: &str) -> Result<ParsedArticle, ParseError>;
}

/// A configured source ready to be run.
pub struct Source {
    pub id: String,
    pub homepage: String,
    pub adapter: Box<dyn SiteAdapter>,
}

impl Source {
    /// A source ready to run.
    ///
    /// # Arguments
    ///
    /// * `id` - Stable source identifier, used for breaker state and dedup.
    /// * `homepage` - Listing page or feed URL fetched for discovery.
    /// * `adapter` - Site-specific discovery and parsing.
    pub fn new(id: impl Into<String>, homepage: impl Into<String>, adapter: Box<dyn SiteAdapter>) -> Self {
        Self {
            id: id.into(),
            homepage: homepage.into(),
            adapter,
        }
    }
}

impl fmt::Debug for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Source")
            .field("id", &self.id)
            .field("homepage", &self.homepage)
            .field("adapter", &self.adapter.name())
            .finish()
    }
}

/// Instantiate the adapter named by a source's configuration.
pub fn build_adapter(config: &SourceConfig) -> Result<Box<dyn SiteAdapter>, ConfigError> {
    let wrap = |error| ConfigError::Adapter {
        source_id: config.id.clone(),
        error,
    };
    let adapter: Box<dyn SiteAdapter> = match config.adapter {
        AdapterKind::Html => Box::new(HtmlAdapter::new(&config.selectors).map_err(wrap)?),
        AdapterKind::Feed => Box::new(FeedAdapter::new(&config.selectors).map_err(wrap)?),
    };
    Ok(adapter)
}

/// Build runnable sources, optionally keeping only the ids in `only`.
pub fn build_sources(configs: &[SourceConfig], only: &[String]) -> Result<Vec<Source>, ConfigError> {
    let sources = configs
        .iter()
        .filter(|c| only.is_empty() || only.iter().any(|id| id == &c.id))
        .map(|c| Ok(Source::new(&c.id, &c.homepage, build_adapter(c)?)))
        .collect::<Result<Vec<_>, ConfigError>>()?;

    if let Some(missing) = only.iter().find(|id| !configs.iter().any(|c| &c.id == *id)) {
        return Err(ConfigError::Invalid(format!("unknown source `{missing}`")));
    }

    info!(count = sources.len(), "Built sources");
    Ok(sources)
}
