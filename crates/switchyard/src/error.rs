//! Error types shared by the routing core and the proxy pipeline.

use hyper::StatusCode;
use std::fmt;
use std::time::Duration;

/// Boxed transport error returned by upstream clients.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Problems found while compiling predicate configuration.
#[derive(Debug, thiserror::Error)]
pub enum PredicateError {
    #[error("invalid pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("invalid address or network '{0}'")]
    InvalidNetwork(String),

    #[error("campaign predicate requires a campaign name")]
    EmptyCampaign,
}

/// A campaign membership lookup could not be answered.
///
/// Never fatal: predicates treat it as a non-match.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LookupUnavailable {
    #[error("no campaign store configured")]
    NotConfigured,

    #[error("campaign lookup timed out after {0:?}")]
    TimedOut(Duration),

    #[error("campaign store error: {0}")]
    Backend(String),
}

/// Which rewriter chain a failure came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RewriteStage {
    Request,
    Response,
}

impl RewriteStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            RewriteStage::Request => "request",
            RewriteStage::Response => "response",
        }
    }
}

impl fmt::Display for RewriteStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failures of a single proxied exchange.
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("upstream request to {uri} failed: {source}")]
    Upstream {
        uri: String,
        #[source]
        source: BoxError,
    },

    #[error("upstream request to {uri} timed out after {timeout:?}")]
    UpstreamTimeout { uri: String, timeout: Duration },

    #[error("{stage} rewriter '{rewriter}' failed: {source}")]
    Rewrite {
        stage: RewriteStage,
        rewriter: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("upstream response from {uri} exceeds the {limit} byte rewrite buffer")]
    ResponseTooLarge { uri: String, limit: usize },

    #[error("invalid outbound request: {0}")]
    InvalidRequest(String),
}

impl ProxyError {
    /// Status returned to the client when this error ends an exchange.
    pub fn status_code(&self) -> StatusCode {
        match self {
            ProxyError::Upstream { .. }
            | ProxyError::UpstreamTimeout { .. }
            | ProxyError::ResponseTooLarge { .. } => StatusCode::BAD_GATEWAY,
            ProxyError::Rewrite { .. } | ProxyError::InvalidRequest(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Short label used for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            ProxyError::Upstream { .. } => "upstream",
            ProxyError::UpstreamTimeout { .. } => "upstream_timeout",
            ProxyError::ResponseTooLarge { .. } => "response_too_large",
            ProxyError::Rewrite { .. } => "rewrite",
            ProxyError::InvalidRequest(_) => "invalid_request",
        }
    }
}
