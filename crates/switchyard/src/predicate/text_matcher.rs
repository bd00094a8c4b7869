//! Literal and pattern matching for single-valued request attributes.
//!
//! Used by the Referer, User-Agent and virtual host predicates. The
//! configuration shape picks the variant: a bare string is a literal,
//! `{ matches: "..." }` is a regular expression.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum TextMatcher {
    /// Case-exact equality: `"Mozilla/5.0"`
    Literal(String),

    /// Unanchored regex search: `{ matches: "(?i)firefox" }`
    Pattern { matches: String },
}

impl TextMatcher {
    pub fn literal(value: impl Into<String>) -> Self {
        TextMatcher::Literal(value.into())
    }

    pub fn pattern(pattern: impl Into<String>) -> Self {
        TextMatcher::Pattern {
            matches: pattern.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub enum CompiledTextMatcher {
    Literal(String),
    Pattern(Arc<Regex>),
}

impl CompiledTextMatcher {
    pub fn compile(matcher: &TextMatcher) -> Result<Self, regex::Error> {
        match matcher {
            TextMatcher::Literal(value) => Ok(CompiledTextMatcher::Literal(value.clone())),
            TextMatcher::Pattern { matches } => {
                Ok(CompiledTextMatcher::Pattern(Arc::new(Regex::new(matches)?)))
            }
        }
    }

    /// A missing value never matches.
    pub fn matches(&self, value: Option<&str>) -> bool {
        match (self, value) {
            (_, None) => false,
            (CompiledTextMatcher::Literal(expected), Some(v)) => v == expected,
            (CompiledTextMatcher::Pattern(regex), Some(v)) => regex.is_match(v),
        }
    }

    pub fn describe(&self) -> String {
        match self {
            CompiledTextMatcher::Literal(v) => format!("\"{v}\""),
            CompiledTextMatcher::Pattern(re) => format!("/{}/", re.as_str()),
        }
    }
}
