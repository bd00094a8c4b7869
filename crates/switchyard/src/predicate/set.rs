//! Conjunctions of predicates and the context they are evaluated in.

use super::{CompiledPredicate, Predicate};
use crate::campaign::{CampaignStore, NoCampaignStore};
use crate::error::{LookupUnavailable, PredicateError};
use crate::request::RequestView;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_LOOKUP_TIMEOUT: Duration = Duration::from_millis(250);

/// Shared state predicates may consult while evaluating.
#[derive(Clone)]
pub struct MatchContext {
    campaigns: Arc<dyn CampaignStore>,
    lookup_timeout: Duration,
}

impl MatchContext {
    pub fn new(campaigns: Arc<dyn CampaignStore>, lookup_timeout: Duration) -> Self {
        Self {
            campaigns,
            lookup_timeout,
        }
    }

    /// Context where every campaign lookup is unavailable.
    pub fn without_campaigns() -> Self {
        Self::new(Arc::new(NoCampaignStore), DEFAULT_LOOKUP_TIMEOUT)
    }

    pub fn lookup_timeout(&self) -> Duration {
        self.lookup_timeout
    }

    /// One bounded lookup against the campaign store. Results are not cached.
    pub async fn campaign_contains(
        &self,
        campaign: &str,
        ip: IpAddr,
    ) -> Result<bool, LookupUnavailable> {
        match tokio::time::timeout(self.lookup_timeout, self.campaigns.contains_ip(campaign, ip))
            .await
        {
            Ok(result) => result,
            Err(_) => Err(LookupUnavailable::TimedOut(self.lookup_timeout)),
        }
    }
}

impl std::fmt::Debug for MatchContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MatchContext")
            .field("lookup_timeout", &self.lookup_timeout)
            .finish_non_exhaustive()
    }
}

/// Ordered conjunction of predicates.
///
/// Evaluated left to right, stopping at the first predicate that does not
/// match. An empty set matches every request.
#[derive(Debug, Clone, Default)]
pub struct PredicateSet {
    predicates: Vec<CompiledPredicate>,
}

/// A predicate set used inside a handler to decide whether it engages.
pub type Filter = PredicateSet;

impl PredicateSet {
    pub fn new(predicates: Vec<CompiledPredicate>) -> Self {
        Self { predicates }
    }

    pub fn compile(predicates: &[Predicate]) -> Result<Self, PredicateError> {
        let predicates = predicates
            .iter()
            .map(CompiledPredicate::compile)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { predicates })
    }

    pub async fn matches(&self, req: &RequestView, ctx: &MatchContext) -> bool {
        for predicate in &self.predicates {
            if !predicate.matches(req, ctx).await {
                return false;
            }
        }
        true
    }

    pub fn len(&self) -> usize {
        self.predicates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.predicates.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &CompiledPredicate> {
        self.predicates.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::predicate::{PathMatcher, TextMatcher};
    use async_trait::async_trait;
    use hyper::Request;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tracing_test::traced_test;

    /// Counts lookups so tests can see whether a campaign predicate ran.
    #[derive(Default)]
    struct CountingStore {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl CampaignStore for CountingStore {
        async fn contains_ip(&self, _campaign: &str, _ip: IpAddr) -> Result<bool, LookupUnavailable> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(true)
        }
    }

    struct SlowStore;

    #[async_trait]
    impl CampaignStore for SlowStore {
        async fn contains_ip(&self, _campaign: &str, _ip: IpAddr) -> Result<bool, LookupUnavailable> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(true)
        }
    }

    fn view(path: &str, ip: &str) -> RequestView {
        let req = Request::builder()
            .uri(path)
            .header("user-agent", "curl/8.4.0")
            .body(())
            .unwrap();
        RequestView::from_request(&req, Some(ip.parse().unwrap()))
    }

    #[tokio::test]
    async fn test_empty_set_matches_everything() {
        let set = PredicateSet::default();
        assert!(set.is_empty());
        assert!(set.matches(&view("/", "10.0.0.1"), &MatchContext::without_campaigns()).await);
    }

    #[tokio::test]
    async fn test_conjunction_requires_all() {
        let set = PredicateSet::compile(&[
            Predicate::path(PathMatcher::literal("/api")),
            Predicate::user_agent(TextMatcher::pattern("^curl/")),
        ])
        .unwrap();
        let ctx = MatchContext::without_campaigns();

        assert!(set.matches(&view("/api/users", "10.0.0.1"), &ctx).await);
        assert!(!set.matches(&view("/web", "10.0.0.1"), &ctx).await);
    }

    #[tokio::test]
    async fn test_conjunction_short_circuits() {
        let store = Arc::new(CountingStore::default());
        let ctx = MatchContext::new(store.clone(), DEFAULT_LOOKUP_TIMEOUT);
        let set = PredicateSet::compile(&[
            Predicate::ip("192.168.0.0/16"),
            Predicate::campaign("spring-2024"),
        ])
        .unwrap();

        assert!(!set.matches(&view("/", "10.0.0.1"), &ctx).await);
        assert_eq!(store.calls.load(Ordering::SeqCst), 0);

        assert!(set.matches(&view("/", "192.168.1.42"), &ctx).await);
        assert_eq!(store.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_each_evaluation_performs_one_lookup() {
        let store = Arc::new(CountingStore::default());
        let ctx = MatchContext::new(store.clone(), DEFAULT_LOOKUP_TIMEOUT);
        let set = PredicateSet::compile(&[Predicate::campaign("spring-2024")]).unwrap();

        for _ in 0..3 {
            assert!(set.matches(&view("/", "192.168.1.42"), &ctx).await);
        }
        assert_eq!(store.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    #[traced_test]
    async fn test_slow_lookup_times_out_as_non_match() {
        let ctx = MatchContext::new(Arc::new(SlowStore), Duration::from_millis(50));
        let set = PredicateSet::compile(&[Predicate::campaign("spring-2024")]).unwrap();

        assert!(!set.matches(&view("/", "192.168.1.42"), &ctx).await);
        assert!(logs_contain("campaign lookup unavailable"));
    }

    #[test]
    fn test_compile_reports_first_error() {
        let err = PredicateSet::compile(&[Predicate::ip("10.0.0.0/8"), Predicate::ip("nope")])
            .unwrap_err();
        assert!(matches!(err, PredicateError::InvalidNetwork(s) if s == "nope"));
    }
}
