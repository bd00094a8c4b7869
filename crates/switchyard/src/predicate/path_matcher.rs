//! Path matching configuration and compilation.
//!
//! A literal starting with `/` is an absolute path and matches as a prefix.
//! Any other literal is a fragment and matches anywhere in the path.
//! `{ matches: "..." }` is a regex search over the path.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum PathMatcher {
    Literal(String),
    Pattern { matches: String },
}

impl PathMatcher {
    pub fn literal(value: impl Into<String>) -> Self {
        PathMatcher::Literal(value.into())
    }

    pub fn pattern(pattern: impl Into<String>) -> Self {
        PathMatcher::Pattern {
            matches: pattern.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub enum CompiledPathMatcher {
    Prefix(String),
    Fragment(String),
    Regex(Arc<Regex>),
}

impl CompiledPathMatcher {
    pub fn compile(config: &PathMatcher) -> Result<Self, regex::Error> {
        match config {
            PathMatcher::Literal(value) if value.starts_with('/') => {
                Ok(CompiledPathMatcher::Prefix(value.clone()))
            }
            PathMatcher::Literal(value) => Ok(CompiledPathMatcher::Fragment(value.clone())),
            PathMatcher::Pattern { matches } => {
                Ok(CompiledPathMatcher::Regex(Arc::new(Regex::new(matches)?)))
            }
        }
    }

    pub fn matches(&self, path: &str) -> bool {
        match self {
            CompiledPathMatcher::Prefix(prefix) => path.starts_with(prefix.as_str()),
            CompiledPathMatcher::Fragment(fragment) => path.contains(fragment.as_str()),
            CompiledPathMatcher::Regex(regex) => regex.is_match(path),
        }
    }

    pub fn describe(&self) -> String {
        match self {
            CompiledPathMatcher::Prefix(p) => format!("prefix \"{p}\""),
            CompiledPathMatcher::Fragment(f) => format!("fragment \"{f}\""),
            CompiledPathMatcher::Regex(re) => format!("/{}/", re.as_str()),
        }
    }
}
