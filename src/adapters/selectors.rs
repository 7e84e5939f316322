//! CSS-selector based article extraction shared by the built-in adapters.

use crate::config::SelectorConfig;
use crate::error::ParseError;
use crate::models::ParsedArticle;
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use scraper::{ElementRef, Html, Selector};
use tracing::debug;

/// Parse one CSS selector, naming it in the error.
pub(crate) fn compile_selector(selector: &str) -> Result<Selector, ParseError> {
    Selector::parse(selector).map_err(|e| ParseError::InvalidSelector {
        selector: selector.to_string(),
        reason: e.to_string(),
    })
}

/// Compiled selectors for the title, body and date of an article page.
#[derive(Debug)]
pub struct ArticleSelectors {
    title: Selector,
    body: Selector,
    date: Option<Selector>,
    date_attr: Option<String>,
    date_format: Option<String>,
}

impl ArticleSelectors {
    /// Compile title, body and optional date selectors.
    pub fn compile(config: &SelectorConfig) -> Result<Self, ParseError> {
        Ok(Self {
            title: compile_selector(&config.title)?,
            body: compile_selector(&config.body)?,
            date: config.date.as_deref().map(compile_selector).transpose()?,
            date_attr: config.date_attr.clone(),
            date_format: config.date_format.clone(),
        })
    }

    /// Pull `{title, body, published_at}` out of an article page.
    ///
    /// Title and body are required; an absent or unreadable date yields
    /// `published_at: None`.
    pub fn extract(&self, html: &str) -> Result<ParsedArticle, ParseError> {
        let document = Html::parse_document(html);

        let title = document
            .select(&self.title)
            .map(element_text)
            .find(|t| !t.is_empty())
            .ok_or(ParseError::MissingField("title"))?;

        let body = document
            .select(&self.body)
            .map(element_text)
            .filter(|p| !p.is_empty())
            .collect::<Vec<_>>()
            .join("\n\n");
        if body.is_empty() {
            return Err(ParseError::MissingField("body"));
        }

        let published_at = self.date.as_ref().and_then(|selector| {
            let raw = document.select(selector).find_map(|el| match &self.date_attr {
                Some(attr) => el.value().attr(attr).map(str::to_string),
                None => Some(element_text(el)),
            })?;
            match parse_date(&raw, self.date_format.as_deref()) {
                Ok(date) => Some(date),
                Err(e) => {
                    debug!(error = %e, "Ignoring unreadable publication date");
                    None
                }
            }
        });

        Ok(ParsedArticle {
            title,
            body,
            published_at,
        })
    }
}

/// Whitespace-collapsed text content of an element.
fn element_text(element: ElementRef<'_>) -> String {
    element
        .text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Parse a publication date, trying RFC 3339, then `YYYY-MM-DD` (also as a
/// prefix of a longer timestamp), then the source's own format.
pub fn parse_date(raw: &str, format: Option<&str>) -> Result<NaiveDate, ParseError> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.date_naive());
    }
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Ok(date);
    }
    if let Some(Ok(date)) = raw.get(..10).map(|p| NaiveDate::parse_from_str(p, "%Y-%m-%d")) {
        return Ok(date);
    }
    if let Some(format) = format {
        if let Ok(date) = NaiveDate::parse_from_str(raw, format) {
            return Ok(date);
        }
        if let Ok(dt) = NaiveDateTime::parse_from_str(raw, format) {
            return Ok(dt.date());
        }
    }
    Err(ParseError::InvalidDate(raw.to_string()))
}
