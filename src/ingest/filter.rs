use regex::{Regex, RegexBuilder};
use std::collections::HashMap;

use crate::error::Result;

/// Finds poll options mentioned in free text.
///
/// Matching ignores case but requires a whole token: the characters around a
/// match must not be letters, digits or `_`. Matches are reported with the
/// option's stored spelling; when polls spell the same option differently,
/// every spelling is reported so each poll gets the vote.
pub struct OptionFilter {
    keywords: Vec<String>,
    pattern: Option<Regex>,
    // lowercased option -> every spelling stored across polls
    spellings: HashMap<String, Vec<String>>,
}

impl OptionFilter {
    pub fn new(options: &[String]) -> Result<Self> {
        let mut keywords = Vec::new();
        let mut spellings: HashMap<String, Vec<String>> = HashMap::new();
        for option in options {
            let option = option.trim();
            if option.is_empty() {
                continue;
            }
            // One track keyword per option; the stream matches without case anyway
            let known = spellings.entry(option.to_lowercase()).or_default();
            if known.is_empty() {
                keywords.push(option.to_string());
            }
            if !known.iter().any(|spelling| spelling == option) {
                known.push(option.to_string());
            }
        }

        let pattern = if keywords.is_empty() {
            None
        } else {
            // Longest first so "gopher" wins over "go" at the same position
            let mut alternatives: Vec<&String> = keywords.iter().collect();
            alternatives.sort_by(|a, b| b.len().cmp(&a.len()));
            let body = alternatives
                .iter()
                .map(|option| regex::escape(option))
                .collect::<Vec<_>>()
                .join("|");
            Some(
                RegexBuilder::new(&format!("(?:{})", body))
                    .case_insensitive(true)
                    .size_limit(64 * 1024 * 1024)
                    .build()?,
            )
        };

        Ok(Self {
            keywords,
            pattern,
            spellings,
        })
    }

    /// Options to hand to the stream as track keywords.
    pub fn keywords(&self) -> &[String] {
        &self.keywords
    }

    pub fn is_empty(&self) -> bool {
        self.keywords.is_empty()
    }

    /// Distinct stored options found in `text`, in order of first appearance.
    pub fn matches(&self, text: &str) -> Vec<&str> {
        let Some(pattern) = &self.pattern else {
            return Vec::new();
        };

        let mut found: Vec<&str> = Vec::new();
        for m in pattern.find_iter(text) {
            let before = text[..m.start()].chars().next_back();
            let after = text[m.end()..].chars().next();
            if before.is_some_and(is_word_char) || after.is_some_and(is_word_char) {
                continue;
            }
            let Some(options) = self.spellings.get(&m.as_str().to_lowercase()) else {
                continue;
            };
            for option in options {
                if !found.contains(&option.as_str()) {
                    found.push(option.as_str());
                }
            }
        }
        found
    }
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}
