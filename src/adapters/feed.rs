//! Adapter for sources that publish an RSS or Atom feed.
//!
//! Discovery reads `<item><link>` (RSS 2.0) and `<entry><link href>` (Atom);
//! article pages are parsed with the same selectors as [`HtmlAdapter`](super::HtmlAdapter).

use super::SiteAdapter;
use super::html::resolve_link;
use super::selectors::ArticleSelectors;
use crate::config::SelectorConfig;
use crate::error::ParseError;
use crate::models::ParsedArticle;
use itertools::Itertools;
use quick_xml::escape::resolve_predefined_entity;
use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;
use tracing::debug;
use url::Url;

#[derive(Debug)]
pub struct FeedAdapter {
    article: ArticleSelectors,
}

impl FeedAdapter {
    /// Build a feed adapter. Only the article selectors are used; links come
    /// from the feed's `<item><link>` and `<entry><link href>` elements.
    ///
    /// # Errors
    ///
    /// [`ParseError::InvalidSelector`] when a selector does not compile.
    pub fn new(config: &SelectorConfig) -> Result<Self, ParseError> {
        Ok(Self {
            article: ArticleSelectors::compile(config)?,
        })
    }
}

impl SiteAdapter for FeedAdapter {
    fn name(&self) -> &'static str {
        "feed"
    }

    fn discover(&self, homepage: &str, base_url: &Url) -> Result<Vec<String>, ParseError> {
        let urls = feed_links(homepage)?
            .into_iter()
            .filter_map(|link| resolve_link(base_url, &link))
            .unique()
            .collect::<Vec<_>>();
        debug!(count = urls.len(), feed = %base_url, "Discovered feed entries");
        Ok(urls)
    }

    fn parse(&self, raw_content: &str) -> Result<ParsedArticle, ParseError> {
        self.article.extract(raw_content)
    }
}

/// Raw link values of every feed item, in document order.
fn feed_links(xml: &str) -> Result<Vec<String>, ParseError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut links = Vec::new();
    let mut in_item = false;
    let mut link_text: Option<String> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"item" | b"entry" => in_item = true,
                b"link" if in_item => match href_of(&e) {
                    Some(href) => links.push(href),
                    None => link_text = Some(String::new()),
                },
                _ => {}
            },
            Ok(Event::Empty(e)) => {
                if in_item && e.local_name().as_ref() == b"link" {
                    links.extend(href_of(&e));
                }
            }
            Ok(Event::Text(t)) => {
                if let Some(text) = link_text.as_mut() {
                    text.push_str(&String::from_utf8_lossy(&t));
                }
            }
            Ok(Event::CData(c)) => {
                if let Some(text) = link_text.as_mut() {
                    text.push_str(&String::from_utf8_lossy(&c));
                }
            }
            Ok(Event::GeneralRef(r)) => {
                if let Some(text) = link_text.as_mut() {
                    let name = String::from_utf8_lossy(&r);
                    if let Some(resolved) = resolve_predefined_entity(&name) {
                        text.push_str(resolved);
                    }
                }
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"item" | b"entry" => in_item = false,
                b"link" => {
                    if let Some(text) = link_text.take() {
                        let text = text.trim().replace("&amp;", "&");
                        if !text.is_empty() {
                            links.push(text);
                        }
                    }
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => {
                return Err(ParseError::Malformed(format!(
                    "feed error at byte {}: {e}",
                    reader.buffer_position()
                )));
            }
        }
    }

    Ok(links)
}

/// Atom-style `href`, skipping links that are not the entry's alternate page.
fn href_of(e: &BytesStart<'_>) -> Option<String> {
    let rel = e
        .try_get_attribute("rel")
        .ok()
        .flatten()
        .map(|a| String::from_utf8_lossy(&a.value).into_owned());
    if rel.as_deref().is_some_and(|r| r != "alternate") {
        return None;
    }
    e.try_get_attribute("href")
        .ok()
        .flatten()
        .map(|a| String::from_utf8_lossy(&a.value).replace("&amp;", "&"))
}
