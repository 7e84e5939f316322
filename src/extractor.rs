//! Word extraction: article text → positioned word occurrences.
//!
//! The pipeline is three pure steps:
//!
//! 1. **Segment** the text into sentences at runs of terminal punctuation
//!    (`.` `!` `?` `…`) followed by whitespace, and at blank lines
//! 2. **Tokenize** each sentence on whitespace
//! 3. **Normalize and filter** each token with [`normalize_token`]
//!
//! Positions and sentence indices are only assigned to tokens that survive,
//! so both sequences are gap-free. [`WordExtractor::extract`] never fails:
//! an article without vocabulary data is still worth storing.

use crate::config::ExtractorConfig;
use crate::error::ExtractionError;
use crate::models::{ArticleId, WordOccurrence};
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, instrument, warn};

static SENTENCE_BOUNDARY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"[.!?…]+["'»”’)\]]*(?:\s+|$)|\n\s*\n"#).expect("valid sentence regex")
});

static URL_SHAPE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^(?:[a-z][a-z0-9+.-]*://|www\.)").expect("valid url regex"));

/// Bare host names such as `lemonde.fr` or `news.bbc.co.uk`.
static DOMAIN_SHAPE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[\p{L}\p{N}-]+(?:\.[\p{L}\p{N}-]+)*\.\p{L}{2,}$").expect("valid domain regex")
});

/// Dotted single-letter abbreviations such as `U.S` or `e.g`.
static ABBREVIATION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?:\p{L}\.)+\p{L}$").expect("valid abbreviation regex"));

static EMAIL_SHAPE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("valid email regex"));

/// A normalized word with its place in the text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub word: String,
    pub sentence_index: u32,
    pub position: u32,
}

/// Letters, digits and combining diacritical marks (for decomposed text).
fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || ('\u{0300}'..='\u{036F}').contains(&c)
}

/// Schemes, `www.` prefixes, paths and bare domains. Dotted abbreviations
/// are words.
fn looks_like_url(token: &str) -> bool {
    if ABBREVIATION.is_match(token) {
        return false;
    }
    URL_SHAPE.is_match(token) || token.contains('/') || DOMAIN_SHAPE.is_match(token)
}

/// Normalize one raw whitespace-delimited token.
///
/// Returns `None` for URLs, email addresses, purely numeric tokens and
/// tokens with no word characters. Diacritics are kept; case is folded.
///
/// ```ignore
/// assert_eq!(normalize_token("«Été»,"), Some("été".to_string()));
/// assert_eq!(normalize_token("l’école"), Some("l'école".to_string()));
/// assert_eq!(normalize_token("2024"), None);
/// ```
pub fn normalize_token(raw: &str) -> Option<String> {
    let unified = raw.replace(['’', '‘', '`', 'ʼ'], "'");
    let trimmed = unified.trim_matches(|c: char| !is_word_char(c));
    if trimmed.is_empty() || looks_like_url(trimmed) || EMAIL_SHAPE.is_match(trimmed) {
        return None;
    }

    let word: String = trimmed
        .to_lowercase()
        .chars()
        .filter(|&c| is_word_char(c) || c == '\'' || c == '-')
        .collect();

    if word.chars().all(|c| !c.is_alphabetic()) {
        return None;
    }
    Some(word)
}

/// Split text into sentences, dropping empty ones.
pub fn split_sentences(text: &str) -> impl Iterator<Item = &str> {
    SENTENCE_BOUNDARY
        .split(text)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

/// Turns article bodies into [`WordOccurrence`]s.
#[derive(Debug, Clone)]
pub struct WordExtractor {
    min_word_length: usize,
    max_text_bytes: usize,
}

impl Default for WordExtractor {
    fn default() -> Self {
        Self::new(&ExtractorConfig::default())
    }
}

impl WordExtractor {
    /// Build an extractor from configuration.
    ///
    /// `min_word_length` is clamped to at least 1.
    pub fn new(config: &ExtractorConfig) -> Self {
        Self {
            min_word_length: config.min_word_length.max(1),
            max_text_bytes: config.max_text_bytes,
        }
    }

    /// Tokenize `text` in reading order.
    pub fn tokenize(&self, text: &str) -> Result<Vec<Token>, ExtractionError> {
        self.check_input(text)?;

        let mut tokens = Vec::new();
        let mut sentence_index = 0u32;
        let mut position = 0u32;

        for sentence in split_sentences(text) {
            let mut emitted = false;
            for raw in sentence.split_whitespace() {
                let Some(word) = normalize_token(raw) else {
                    continue;
                };
                if word.chars().count() < self.min_word_length {
                    continue;
                }
                tokens.push(Token {
                    word,
                    sentence_index,
                    position,
                });
                position += 1;
                emitted = true;
            }
            if emitted {
                sentence_index += 1;
            }
        }
        Ok(tokens)
    }

    /// Word occurrences for one article; empty (and logged) on any internal failure.
    #[instrument(level = "debug", skip_all, fields(%article_id, bytes = text.len()))]
    pub fn extract(
        &self,
        article_id: ArticleId,
        text: &str,
        observed_at: DateTime<Utc>,
    ) -> Vec<WordOccurrence> {
        match self.tokenize(text) {
            Ok(tokens) => {
                debug!(words = tokens.len(), "Extracted words");
                tokens
                    .into_iter()
                    .map(|t| WordOccurrence {
                        word: t.word,
                        article_id,
                        sentence_index: t.sentence_index,
                        position_in_article: t.position,
                        observed_at,
                    })
                    .collect()
            }
            Err(e) => {
                warn!(error = %e, "Word extraction failed; storing article without vocabulary");
                Vec::new()
            }
        }
    }

    fn check_input(&self, text: &str) -> Result<(), ExtractionError> {
        if text.len() > self.max_text_bytes {
            return Err(ExtractionError::InputTooLarge {
                bytes: text.len(),
                limit: self.max_text_bytes,
            });
        }
        let control_chars = text
            .chars()
            .filter(|c| c.is_control() && !c.is_whitespace())
            .count();
        if control_chars > 0 && (text.contains('\0') || control_chars * 100 > text.chars().count()) {
            return Err(ExtractionError::BinaryContent { control_chars });
        }
        Ok(())
    }
}
