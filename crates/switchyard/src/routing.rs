//! Rule-set router.
//!
//! Rule sets are scanned in registration order and the first one whose
//! predicates all hold picks the target. The table is immutable once built;
//! reloading means building a new [`Router`] and publishing it through a
//! [`SharedRouter`].

use crate::config::{RoutingConfig, RuleSetConfig};
use crate::metrics;
use crate::predicate::{MatchContext, Predicate, PredicateSet};
use crate::request::RequestView;
use anyhow::anyhow;
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::debug;

/// Name recorded in metrics when the default target was used.
pub const DEFAULT_RULE_LABEL: &str = "default";

#[derive(Debug, Clone)]
pub struct CompiledRuleSet {
    pub name: String,
    pub group: Option<String>,
    pub predicates: PredicateSet,
}

impl CompiledRuleSet {
    pub fn compile(
        name: impl Into<String>,
        group: Option<String>,
        predicates: &[Predicate],
    ) -> Result<Self, crate::error::PredicateError> {
        Ok(Self {
            name: name.into(),
            group,
            predicates: PredicateSet::compile(predicates)?,
        })
    }

    fn from_config(config: &RuleSetConfig) -> anyhow::Result<Self> {
        Self::compile(config.name.clone(), config.group.clone(), &config.predicates)
            .map_err(|e| anyhow!("Routing rule '{}': {e}", config.name))
    }

    pub async fn matches(&self, req: &RequestView, ctx: &MatchContext) -> bool {
        self.predicates.matches(req, ctx).await
    }
}

/// Outcome of a dispatch: the target and the rule that chose it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision<'a, T> {
    pub target: &'a T,
    /// `None` when no rule matched and the default target was used
    pub rule: Option<&'a str>,
}

#[derive(Debug, Clone)]
pub struct Router<T> {
    entries: Vec<(CompiledRuleSet, T)>,
    default: T,
}

impl<T> Router<T> {
    pub fn new(default: T) -> Self {
        Self {
            entries: Vec::new(),
            default,
        }
    }

    /// Append a rule set; earlier entries take precedence.
    pub fn route(mut self, rule_set: CompiledRuleSet, target: T) -> Self {
        self.entries.push((rule_set, target));
        self
    }

    /// Build a router from configuration, mapping every target name through
    /// `resolve`.
    pub fn from_config<F>(config: &RoutingConfig, resolve: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<T>,
    {
        let default = resolve(&config.default)
            .ok_or_else(|| anyhow!("routing.default '{}' is not a known target", config.default))?;
        let mut router = Router::new(default);
        for rule in &config.rules {
            let target = resolve(&rule.target).ok_or_else(|| {
                anyhow!(
                    "Routing rule '{}' targets unknown '{}'",
                    rule.name,
                    rule.target
                )
            })?;
            router = router.route(CompiledRuleSet::from_config(rule)?, target);
        }
        Ok(router)
    }

    pub async fn resolve(&self, req: &RequestView, ctx: &MatchContext) -> Decision<'_, T> {
        for (rule_set, target) in &self.entries {
            if rule_set.matches(req, ctx).await {
                debug!(
                    rule = %rule_set.name,
                    group = ?rule_set.group,
                    path = %req.path,
                    "request matched routing rule"
                );
                metrics::record_rule_match(&rule_set.name);
                return Decision {
                    target,
                    rule: Some(&rule_set.name),
                };
            }
        }
        debug!(path = %req.path, "no routing rule matched, using default target");
        metrics::record_rule_match(DEFAULT_RULE_LABEL);
        Decision {
            target: &self.default,
            rule: None,
        }
    }

    pub async fn dispatch(&self, req: &RequestView, ctx: &MatchContext) -> &T {
        self.resolve(req, ctx).await.target
    }

    pub fn default_target(&self) -> &T {
        &self.default
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn rules(&self) -> impl Iterator<Item = &CompiledRuleSet> {
        self.entries.iter().map(|(rule_set, _)| rule_set)
    }
}

/// Atomically replaceable router handle.
///
/// Readers take a cheap `Arc` snapshot and keep using it for the whole
/// request, even if a new table is published meanwhile.
#[derive(Debug)]
pub struct SharedRouter<T> {
    current: RwLock<Arc<Router<T>>>,
}

impl<T> SharedRouter<T> {
    pub fn new(router: Router<T>) -> Self {
        Self {
            current: RwLock::new(Arc::new(router)),
        }
    }

    pub fn current(&self) -> Arc<Router<T>> {
        Arc::clone(&self.current.read())
    }

    pub fn publish(&self, router: Router<T>) {
        *self.current.write() = Arc::new(router);
    }
}
