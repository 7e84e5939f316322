//! Adapter for sources that list their articles on an HTML page.
//!
//! Article links are the `href`s matched by the source's `link` selector,
//! resolved against the listing page URL, e.g. `.card--lite a[href]` on
//! <https://lite.cnn.com> yields `https://lite.cnn.com/2025/05/06/article-slug`.

use super::SiteAdapter;
use super::selectors::{ArticleSelectors, compile_selector};
use crate::config::SelectorConfig;
use crate::error::ParseError;
use crate::models::ParsedArticle;
use itertools::Itertools;
use scraper::{Html, Selector};
use tracing::debug;
use url::Url;

#[derive(Debug)]
pub struct HtmlAdapter {
    link: Selector,
    article: ArticleSelectors,
}

impl HtmlAdapter {
    /// Compile the link and article selectors for one source.
    ///
    /// # Errors
    ///
    /// [`ParseError::InvalidSelector`] when any selector does not compile.
    pub fn new(config: &SelectorConfig) -> Result<Self, ParseError> {
        Ok(Self {
            link: compile_selector(&config.link)?,
            article: ArticleSelectors::compile(config)?,
        })
    }
}

impl SiteAdapter for HtmlAdapter {
    fn name(&self) -> &'static str {
        "html"
    }

    fn discover(&self, homepage: &str, base_url: &Url) -> Result<Vec<String>, ParseError> {
        let document = Html::parse_document(homepage);
        let urls = document
            .select(&self.link)
            .filter_map(|el| el.value().attr("href"))
            .filter_map(|href| resolve_link(base_url, href))
            .unique()
            .collect::<Vec<_>>();
        debug!(count = urls.len(), base = %base_url, "Discovered article links");
        Ok(urls)
    }

    fn parse(&self, raw_content: &str) -> Result<ParsedArticle, ParseError> {
        self.article.extract(raw_content)
    }
}

/// Resolve `href` against `base`, keeping only http(s) targets and dropping fragments.
pub(crate) fn resolve_link(base: &Url, href: &str) -> Option<String> {
    let mut resolved = base.join(href.trim()).ok()?;
    if !matches!(resolved.scheme(), "http" | "https") {
        return None;
    }
    resolved.set_fragment(None);
    Some(resolved.to_string())
}
