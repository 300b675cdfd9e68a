//! Claim text validation, normalization and keyword extraction.

use lazy_static::lazy_static;
use regex::Regex;
use std::collections::HashSet;
use thiserror::Error;

/// Minimum claim length, in Unicode scalar values, after trimming.
pub const MIN_CLAIM_CHARS: usize = 10;

/// Maximum claim length, in Unicode scalar values, after trimming.
pub const MAX_CLAIM_CHARS: usize = 10_000;

/// Minimum number of word characters a claim must contain.
const MIN_WORD_CHARS: usize = 5;

/// Keywords kept for fact-check search queries.
const MAX_KEYWORDS: usize = 20;

lazy_static! {
    static ref WHITESPACE_RUN: Regex = Regex::new(r"\s+").unwrap();
    static ref REPEATED_PUNCTUATION: Regex = Regex::new(r"([!?.,;:])[!?.,;:]+").unwrap();
    static ref WORD: Regex = Regex::new(r"[\p{L}\p{N}]+").unwrap();

    // Portuguese and English function words dropped from search queries
    static ref STOPWORDS: HashSet<&'static str> = [
        "a", "o", "as", "os", "um", "uma", "uns", "umas", "de", "da", "do", "das", "dos",
        "em", "na", "no", "nas", "nos", "por", "para", "com", "sem", "que", "e", "ou",
        "se", "ao", "aos", "à", "às", "é", "foi", "ser", "são", "está", "estão", "mais",
        "menos", "muito", "isso", "esse", "essa", "este", "esta", "seu", "sua", "pelo",
        "pela", "entre", "sobre", "também", "já", "não", "sim", "mas", "como", "quando",
        "the", "an", "of", "in", "on", "at", "to", "for", "with", "by", "from", "and",
        "or", "is", "are", "was", "were", "be", "been", "it", "its", "this", "that",
        "these", "those", "has", "have", "had", "not", "but", "as", "than", "very",
    ]
    .into_iter()
    .collect();
}

/// Why a claim was rejected.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("claim text is empty")]
    Empty,

    #[error("claim text too short: {actual} characters (minimum {min})")]
    TooShort { min: usize, actual: usize },

    #[error("claim text too long: {actual} characters (maximum {max})")]
    TooLong { max: usize, actual: usize },

    #[error("claim text has no meaningful content")]
    NoMeaningfulContent,

    #[error("custom strategy requires a provider toggle set")]
    MissingCustomConfig,
}

/// Validate a claim and return it trimmed.
///
/// Lengths count Unicode scalar values, not bytes.
pub fn validate_claim(text: &str) -> Result<&str, ValidationError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::Empty);
    }

    let chars = trimmed.chars().count();
    if chars < MIN_CLAIM_CHARS {
        return Err(ValidationError::TooShort {
            min: MIN_CLAIM_CHARS,
            actual: chars,
        });
    }
    if chars > MAX_CLAIM_CHARS {
        return Err(ValidationError::TooLong {
            max: MAX_CLAIM_CHARS,
            actual: chars,
        });
    }

    let word_chars = trimmed.chars().filter(|c| c.is_alphanumeric()).count();
    if word_chars < MIN_WORD_CHARS {
        return Err(ValidationError::NoMeaningfulContent);
    }

    Ok(trimmed)
}

/// Drop control characters, collapse whitespace and trim.
pub fn normalize(text: &str) -> String {
    let cleaned: String = text
        .chars()
        .map(|c| if c == '\t' || c == '\n' || c == '\r' { ' ' } else { c })
        .filter(|c| !c.is_control())
        .collect();
    WHITESPACE_RUN.replace_all(cleaned.trim(), " ").into_owned()
}

/// Normalization used for cache keys: `normalize` plus case folding,
/// typographic quote folding and collapsing of repeated punctuation.
pub fn normalize_for_key(text: &str) -> String {
    let folded: String = normalize(text)
        .to_lowercase()
        .chars()
        .map(|c| match c {
            '\u{201C}' | '\u{201D}' | '\u{00AB}' | '\u{00BB}' => '"',
            '\u{2018}' | '\u{2019}' => '\'',
            other => other,
        })
        .collect();
    REPEATED_PUNCTUATION.replace_all(&folded, "$1").into_owned()
}

/// Produces search keywords for fact-check queries.
pub trait KeywordExtractor: Send + Sync {
    fn extract_for_fact_check(&self, text: &str) -> Vec<String>;
}

/// Stopword-filtering extractor for Portuguese and English text.
///
/// Ranks content words by frequency. Ties keep order of first appearance.
#[derive(Debug, Clone)]
pub struct StopwordKeywordExtractor {
    max_keywords: usize,
}

impl StopwordKeywordExtractor {
    pub fn new() -> Self {
        Self {
            max_keywords: MAX_KEYWORDS,
        }
    }

    pub fn with_max_keywords(max_keywords: usize) -> Self {
        Self { max_keywords }
    }
}

impl Default for StopwordKeywordExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl KeywordExtractor for StopwordKeywordExtractor {
    fn extract_for_fact_check(&self, text: &str) -> Vec<String> {
        let lowered = text.to_lowercase();
        let mut counts: Vec<(String, usize)> = Vec::new();

        for m in WORD.find_iter(&lowered) {
            let word = m.as_str();
            let is_number = word.chars().all(|c| c.is_numeric());
            if word.chars().count() < 3 && !is_number {
                continue;
            }
            if STOPWORDS.contains(word) {
                continue;
            }
            match counts.iter_mut().find(|(w, _)| w == word) {
                Some((_, n)) => *n += 1,
                None => counts.push((word.to_string(), 1)),
            }
        }

        // stable sort keeps first-appearance order among equal counts
        counts.sort_by(|a, b| b.1.cmp(&a.1));
        counts
            .into_iter()
            .take(self.max_keywords)
            .map(|(w, _)| w)
            .collect()
    }
}
