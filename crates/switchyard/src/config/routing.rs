//! Routing configuration: ordered rule sets plus a default target.

use crate::predicate::Predicate;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RoutingConfig {
    /// Application or proxy used when no rule matches
    pub default: String,
    /// Evaluated in order; the first matching rule wins
    #[serde(default)]
    pub rules: Vec<RuleSetConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RuleSetConfig {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    /// Application or proxy name
    pub target: String,
    /// All must match; an empty list matches every request
    #[serde(default)]
    pub predicates: Vec<Predicate>,
}
