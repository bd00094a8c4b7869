//! Request predicates.
//!
//! A predicate tests one attribute of the inbound request: client IP,
//! Referer, User-Agent, virtual host, path, or campaign membership. The
//! configuration form ([`Predicate`]) is compiled once into a
//! [`CompiledPredicate`] and evaluated for every request.
//!
//! # Module Structure
//!
//! - `text_matcher` - literal / pattern matching for Referer, User-Agent, VHost
//! - `path_matcher` - prefix / fragment / pattern path matching
//! - `network` - single address and CIDR matching
//! - `set` - conjunctions of predicates shared by rules and filters

mod network;
mod path_matcher;
mod set;
mod text_matcher;

pub use network::CompiledNetwork;
pub use path_matcher::{CompiledPathMatcher, PathMatcher};
pub use set::{Filter, MatchContext, PredicateSet, DEFAULT_LOOKUP_TIMEOUT};
pub use text_matcher::{CompiledTextMatcher, TextMatcher};

use crate::error::{LookupUnavailable, PredicateError};
use crate::metrics;
use crate::request::RequestView;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// The attribute a predicate inspects and how.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PredicateKind {
    /// `ip: 10.0.0.0/8` or `ip: 192.168.1.42`
    Ip(String),
    Referer(TextMatcher),
    UserAgent(TextMatcher),
    /// Compared against the Host header without its port.
    Vhost(TextMatcher),
    Path(PathMatcher),
    /// Name of a campaign whose address set must contain the client IP.
    Campaign(String),
}

/// Predicate configuration.
///
/// ```yaml
/// - ip: 10.0.0.0/8
/// - user_agent: { matches: "(?i)firefox" }
/// - campaign: spring-2024
///   not: true
/// ```
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct Predicate {
    #[serde(flatten)]
    pub kind: PredicateKind,

    /// Negate the match result
    #[serde(default, skip_serializing_if = "is_false")]
    pub not: bool,
}

fn is_false(b: &bool) -> bool {
    !*b
}

impl Predicate {
    pub fn new(kind: PredicateKind) -> Self {
        Self { kind, not: false }
    }

    pub fn ip(spec: impl Into<String>) -> Self {
        Self::new(PredicateKind::Ip(spec.into()))
    }

    pub fn referer(matcher: TextMatcher) -> Self {
        Self::new(PredicateKind::Referer(matcher))
    }

    pub fn user_agent(matcher: TextMatcher) -> Self {
        Self::new(PredicateKind::UserAgent(matcher))
    }

    pub fn vhost(matcher: TextMatcher) -> Self {
        Self::new(PredicateKind::Vhost(matcher))
    }

    pub fn path(matcher: PathMatcher) -> Self {
        Self::new(PredicateKind::Path(matcher))
    }

    pub fn campaign(name: impl Into<String>) -> Self {
        Self::new(PredicateKind::Campaign(name.into()))
    }

    pub fn negated(mut self) -> Self {
        self.not = !self.not;
        self
    }
}

#[derive(Debug, Clone)]
enum CompiledKind {
    Ip(CompiledNetwork),
    Referer(CompiledTextMatcher),
    UserAgent(CompiledTextMatcher),
    Vhost(CompiledTextMatcher),
    Path(CompiledPathMatcher),
    Campaign(String),
}

/// Compiled predicate for runtime evaluation.
#[derive(Debug, Clone)]
pub struct CompiledPredicate {
    kind: CompiledKind,
    negate: bool,
}

impl CompiledPredicate {
    pub fn compile(predicate: &Predicate) -> Result<Self, PredicateError> {
        let text = |m: &TextMatcher| {
            CompiledTextMatcher::compile(m).map_err(|source| PredicateError::InvalidPattern {
                pattern: match m {
                    TextMatcher::Literal(v) => v.clone(),
                    TextMatcher::Pattern { matches } => matches.clone(),
                },
                source,
            })
        };

        let kind = match &predicate.kind {
            PredicateKind::Ip(spec) => CompiledKind::Ip(CompiledNetwork::compile(spec)?),
            PredicateKind::Referer(m) => CompiledKind::Referer(text(m)?),
            PredicateKind::UserAgent(m) => CompiledKind::UserAgent(text(m)?),
            PredicateKind::Vhost(m) => CompiledKind::Vhost(text(m)?),
            PredicateKind::Path(m) => CompiledKind::Path(CompiledPathMatcher::compile(m).map_err(
                |source| PredicateError::InvalidPattern {
                    pattern: match m {
                        PathMatcher::Literal(v) => v.clone(),
                        PathMatcher::Pattern { matches } => matches.clone(),
                    },
                    source,
                },
            )?),
            PredicateKind::Campaign(name) => {
                let name = name.trim();
                if name.is_empty() {
                    return Err(PredicateError::EmptyCampaign);
                }
                CompiledKind::Campaign(name.to_string())
            }
        };

        Ok(Self {
            kind,
            negate: predicate.not,
        })
    }

    /// Evaluate the predicate without negation.
    ///
    /// Only campaign predicates can fail; everything else is pure.
    pub async fn evaluate(
        &self,
        req: &RequestView,
        ctx: &MatchContext,
    ) -> Result<bool, LookupUnavailable> {
        let matched = match &self.kind {
            CompiledKind::Ip(net) => req.client_ip.is_some_and(|ip| net.contains(ip)),
            CompiledKind::Referer(m) => m.matches(req.referer.as_deref()),
            CompiledKind::UserAgent(m) => m.matches(req.user_agent.as_deref()),
            CompiledKind::Vhost(m) => m.matches(req.host.as_deref()),
            CompiledKind::Path(m) => m.matches(&req.path),
            CompiledKind::Campaign(name) => match req.client_ip {
                Some(ip) => ctx.campaign_contains(name, ip).await?,
                None => false,
            },
        };
        Ok(matched)
    }

    /// Evaluate with negation applied.
    ///
    /// A failed lookup is a non-match whether or not the predicate is negated.
    pub async fn matches(&self, req: &RequestView, ctx: &MatchContext) -> bool {
        match self.evaluate(req, ctx).await {
            Ok(matched) => matched != self.negate,
            Err(err) => {
                let campaign = match &self.kind {
                    CompiledKind::Campaign(name) => name.as_str(),
                    _ => "",
                };
                warn!(
                    campaign = campaign,
                    client_ip = ?req.client_ip,
                    "campaign lookup unavailable, treating as non-match: {}",
                    err
                );
                metrics::record_lookup_unavailable(campaign);
                false
            }
        }
    }

    pub fn is_negated(&self) -> bool {
        self.negate
    }

    /// Short human readable form for logs.
    pub fn describe(&self) -> String {
        let body = match &self.kind {
            CompiledKind::Ip(net) => format!("ip {}", net.net()),
            CompiledKind::Referer(m) => format!("referer {}", m.describe()),
            CompiledKind::UserAgent(m) => format!("user_agent {}", m.describe()),
            CompiledKind::Vhost(m) => format!("vhost {}", m.describe()),
            CompiledKind::Path(m) => format!("path {}", m.describe()),
            CompiledKind::Campaign(name) => format!("campaign {name}"),
        };
        if self.negate {
            format!("not {body}")
        } else {
            body
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::InMemoryCampaignStore;
    use crate::campaign::{Campaign, CampaignStore};
    use async_trait::async_trait;
    use hyper::Request;
    use std::net::IpAddr;
    use std::sync::Arc;
    use std::time::Duration;

    fn view(client_ip: &str, builder: hyper::http::request::Builder) -> RequestView {
        let req = builder.body(()).unwrap();
        RequestView::from_request(&req, Some(client_ip.parse().unwrap()))
    }

    fn get(uri: &str) -> hyper::http::request::Builder {
        Request::builder().uri(uri)
    }

    fn campaign_ctx() -> MatchContext {
        let store = InMemoryCampaignStore::from_campaigns(vec![Campaign {
            name: "spring-2024".to_string(),
            description: "spring sale".to_string(),
            addresses: vec!["192.168.1.42".parse().unwrap()],
        }]);
        MatchContext::new(Arc::new(store), Duration::from_millis(250))
    }

    struct FailingStore;

    #[async_trait]
    impl CampaignStore for FailingStore {
        async fn contains_ip(&self, _campaign: &str, _ip: IpAddr) -> Result<bool, LookupUnavailable> {
            Err(LookupUnavailable::Backend("connection refused".to_string()))
        }
    }

    async fn check(predicate: Predicate, req: &RequestView) -> bool {
        CompiledPredicate::compile(&predicate)
            .unwrap()
            .matches(req, &MatchContext::without_campaigns())
            .await
    }

    #[tokio::test]
    async fn test_ip_predicate() {
        let p = Predicate::ip("192.168.1.1/24");
        assert!(check(p.clone(), &view("192.168.1.42", get("/"))).await);
        assert!(!check(p, &view("10.0.0.1", get("/"))).await);
    }

    #[tokio::test]
    async fn test_ip_predicate_without_client_ip() {
        let req = RequestView::from_request(&Request::new(()), None);
        assert!(!check(Predicate::ip("0.0.0.0/0"), &req).await);
    }

    #[tokio::test]
    async fn test_referer_and_user_agent_predicates() {
        let req = view(
            "10.0.0.1",
            get("/")
                .header("referer", "https://news.ycombinator.com/item?id=1")
                .header("user-agent", "Mozilla/5.0 Firefox/120.0"),
        );

        assert!(check(Predicate::referer(TextMatcher::pattern("ycombinator")), &req).await);
        assert!(!check(Predicate::referer(TextMatcher::literal("ycombinator")), &req).await);
        assert!(
            check(
                Predicate::user_agent(TextMatcher::literal("Mozilla/5.0 Firefox/120.0")),
                &req
            )
            .await
        );
        assert!(!check(Predicate::user_agent(TextMatcher::pattern("Chrome")), &req).await);
    }

    #[tokio::test]
    async fn test_missing_referer_never_matches() {
        let req = view("10.0.0.1", get("/"));
        assert!(!check(Predicate::referer(TextMatcher::pattern(".*")), &req).await);
    }

    #[tokio::test]
    async fn test_vhost_ignores_port() {
        let req = view("10.0.0.1", get("/").header("host", "shop.example.com:8080"));
        assert!(check(Predicate::vhost(TextMatcher::literal("shop.example.com")), &req).await);
        assert!(check(Predicate::vhost(TextMatcher::pattern(r"^shop\.")), &req).await);
        assert!(!check(Predicate::vhost(TextMatcher::literal("example.com")), &req).await);
    }

    #[tokio::test]
    async fn test_path_predicate_prefix_and_fragment() {
        let req = view("10.0.0.1", get("/path/sub/dir"));
        assert!(check(Predicate::path(PathMatcher::literal("/path/sub")), &req).await);
        assert!(check(Predicate::path(PathMatcher::literal("sub/dir")), &req).await);
        assert!(!check(Predicate::path(PathMatcher::literal("/sub")), &req).await);
    }

    #[tokio::test]
    async fn test_negation() {
        let req = view("10.0.0.1", get("/admin"));
        assert!(!check(Predicate::path(PathMatcher::literal("/admin")).negated(), &req).await);
        assert!(check(Predicate::path(PathMatcher::literal("/public")).negated(), &req).await);
    }

    #[tokio::test]
    async fn test_campaign_membership() {
        let ctx = campaign_ctx();
        let p = CompiledPredicate::compile(&Predicate::campaign("spring-2024")).unwrap();

        assert!(p.matches(&view("192.168.1.42", get("/")), &ctx).await);
        assert!(!p.matches(&view("192.168.1.43", get("/")), &ctx).await);
    }

    #[tokio::test]
    async fn test_unknown_campaign_is_non_match() {
        let ctx = campaign_ctx();
        let p = CompiledPredicate::compile(&Predicate::campaign("autumn")).unwrap();
        assert!(!p.matches(&view("192.168.1.42", get("/")), &ctx).await);
    }

    #[tokio::test]
    async fn test_campaign_store_failure_is_non_match() {
        let ctx = MatchContext::new(Arc::new(FailingStore), Duration::from_millis(250));
        let p = CompiledPredicate::compile(&Predicate::campaign("spring-2024")).unwrap();
        let req = view("192.168.1.42", get("/"));

        assert!(p.evaluate(&req, &ctx).await.is_err());
        assert!(!p.matches(&req, &ctx).await);
    }

    #[tokio::test]
    async fn test_negated_campaign_failure_stays_non_match() {
        let ctx = MatchContext::new(Arc::new(FailingStore), Duration::from_millis(250));
        let p = CompiledPredicate::compile(&Predicate::campaign("spring-2024").negated()).unwrap();
        assert!(!p.matches(&view("192.168.1.42", get("/")), &ctx).await);
    }

    #[tokio::test]
    async fn test_campaign_without_store_is_non_match() {
        let p = CompiledPredicate::compile(&Predicate::campaign("spring-2024")).unwrap();
        let req = view("192.168.1.42", get("/"));
        assert!(!p.matches(&req, &MatchContext::without_campaigns()).await);
    }

    #[test]
    fn test_compile_errors() {
        assert!(matches!(
            CompiledPredicate::compile(&Predicate::ip("300.1.1.1")),
            Err(PredicateError::InvalidNetwork(_))
        ));
        assert!(matches!(
            CompiledPredicate::compile(&Predicate::user_agent(TextMatcher::pattern("[a-"))),
            Err(PredicateError::InvalidPattern { .. })
        ));
        assert!(matches!(
            CompiledPredicate::compile(&Predicate::campaign("  ")),
            Err(PredicateError::EmptyCampaign)
        ));
    }

    #[test]
    fn test_predicate_yaml_shapes() {
        let yaml = r#"
- ip: 10.0.0.0/8
- referer: "https://example.com/"
- user_agent: { matches: "(?i)firefox" }
- vhost: shop.example.com
- path: /reddit
- campaign: spring-2024
  not: true
"#;
        let predicates: Vec<Predicate> = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(
            predicates,
            vec![
                Predicate::ip("10.0.0.0/8"),
                Predicate::referer(TextMatcher::literal("https://example.com/")),
                Predicate::user_agent(TextMatcher::pattern("(?i)firefox")),
                Predicate::vhost(TextMatcher::literal("shop.example.com")),
                Predicate::path(PathMatcher::literal("/reddit")),
                Predicate::campaign("spring-2024").negated(),
            ]
        );
    }

    #[test]
    fn test_describe() {
        let p = CompiledPredicate::compile(&Predicate::campaign("spring-2024").negated()).unwrap();
        assert_eq!(p.describe(), "not campaign spring-2024");
        assert!(p.is_negated());
    }
}
