//! Text index: a tokenized inverted index (whitespace + basic punctuation
//! split), supporting `contains` with optional case folding.

use dashmap::DashMap;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;

use crate::value::Value;

static TOKENIZER: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^\w]+").expect("static tokenizer regex"));

fn tokenizer() -> &'static Regex {
    &TOKENIZER
}

fn tokenize(text: &str, case_sensitive: bool) -> Vec<String> {
    let normalized = if case_sensitive {
        text.to_string()
    } else {
        text.to_lowercase()
    };
    tokenizer()
        .split(&normalized)
        .filter(|tok| !tok.is_empty())
        .map(str::to_string)
        .collect()
}

/// Tokenized inverted-index for substring/`contains` text search.
pub struct TextIndex {
    postings: DashMap<String, HashSet<String>>,
    case_sensitive: bool,
}

impl TextIndex {
    /// Build an empty text index.
    pub fn new(case_sensitive: bool) -> Self {
        Self {
            postings: DashMap::new(),
            case_sensitive,
        }
    }

    /// Tokenize `value` (if it's a string) and index every token against
    /// `entity_id`.
    pub fn insert(&self, value: &Value, entity_id: &str) {
        let Value::String(text) = value else {
            return;
        };
        for token in tokenize(text, self.case_sensitive) {
            self.postings.entry(token).or_default().insert(entity_id.to_string());
        }
    }

    /// Remove `entity_id` from every token's posting list.
    pub fn remove_all(&self, entity_id: &str) {
        for mut entry in self.postings.iter_mut() {
            entry.value_mut().remove(entity_id);
        }
    }

    /// Ids whose indexed text field contains `needle` as a token.
    /// FiberDB's `contains` operator is a substring match; the text index
    /// answers the common case — `needle` itself tokenizes to one token —
    /// exactly, and otherwise falls back to `None` so the query engine can
    /// use a full scan for multi-token substrings.
    pub fn contains(&self, needle: &str) -> Option<HashSet<String>> {
        let tokens = tokenize(needle, self.case_sensitive);
        if tokens.len() != 1 {
            return None;
        }
        Some(
            self.postings
                .get(&tokens[0])
                .map(|set| set.clone())
                .unwrap_or_default(),
        )
    }

    /// Number of distinct tokens indexed.
    pub fn distinct_tokens(&self) -> usize {
        self.postings.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokenizes_on_whitespace_and_punctuation() {
        let idx = TextIndex::new(false);
        idx.insert(&Value::from("Acme, Inc."), "c1");
        let result = idx.contains("acme").unwrap();
        assert!(result.contains("c1"));
    }

    #[test]
    fn case_sensitive_mode_distinguishes_tokens() {
        let idx = TextIndex::new(true);
        idx.insert(&Value::from("Acme"), "c1");
        assert!(idx.contains("acme").unwrap().is_empty());
        assert!(idx.contains("Acme").unwrap().contains("c1"));
    }

    #[test]
    fn multi_token_needle_defers_to_scan() {
        let idx = TextIndex::new(false);
        idx.insert(&Value::from("Acme Corp"), "c1");
        assert!(idx.contains("acme corp").is_none());
    }
}
