//! Proxy controller: turns an inbound request into an upstream exchange and
//! runs the profile's rewriters over both directions.

use super::client::Upstream;
use super::headers::is_hop_by_hop;
use super::response_ext::full_body;
use crate::config::ProxyConfig;
use crate::error::ProxyError;
use crate::metrics;
use crate::predicate::{Filter, MatchContext, PredicateSet};
use crate::request::RequestView;
use crate::rewrite::{
    build_request_chain, build_response_chain, OutboundRequest, RequestOverrides,
    RequestRewriterChain, ResponseHead, ResponseRewriterChain, RewritableBody,
};
use anyhow::anyhow;
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, LengthLimitError, Limited};
use hyper::body::Bytes;
use hyper::header::{ACCEPT_ENCODING, CONTENT_ENCODING, CONTENT_LENGTH};
use hyper::Response;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// One rewriting proxy configuration: when it engages, how the outbound
/// request is derived, and what happens to the response.
#[derive(Debug, Clone)]
pub struct ProxyProfile {
    pub name: String,
    pub filter: Filter,
    pub overrides: RequestOverrides,
    pub forward_header_prefix: Option<String>,
    pub request_rewriters: RequestRewriterChain,
    pub response_rewriters: ResponseRewriterChain,
}

impl ProxyProfile {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            filter: PredicateSet::default(),
            overrides: RequestOverrides::default(),
            forward_header_prefix: None,
            request_rewriters: RequestRewriterChain::new(),
            response_rewriters: ResponseRewriterChain::new(),
        }
    }

    pub fn from_config(config: &ProxyConfig) -> anyhow::Result<Self> {
        let filter = PredicateSet::compile(&config.filter)
            .map_err(|e| anyhow!("Proxy '{}' filter: {e}", config.name))?;
        let request_rewriters = build_request_chain(&config.request_rewriters)
            .map_err(|e| anyhow!("Proxy '{}' request rewriters: {e}", config.name))?;
        let response_rewriters = build_response_chain(&config.response_rewriters)
            .map_err(|e| anyhow!("Proxy '{}' response rewriters: {e}", config.name))?;

        Ok(Self {
            name: config.name.clone(),
            filter,
            overrides: config.overrides.clone(),
            forward_header_prefix: config.forward_header_prefix.clone(),
            request_rewriters,
            response_rewriters,
        })
    }

    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filter = filter;
        self
    }

    pub fn with_overrides(mut self, overrides: RequestOverrides) -> Self {
        self.overrides = overrides;
        self
    }

    pub fn with_forward_header_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.forward_header_prefix = Some(prefix.into());
        self
    }

    pub fn with_request_rewriters(mut self, chain: RequestRewriterChain) -> Self {
        self.request_rewriters = chain;
        self
    }

    pub fn with_response_rewriters(mut self, chain: ResponseRewriterChain) -> Self {
        self.response_rewriters = chain;
        self
    }

    /// Whether the profile handles this request; an empty filter always does.
    pub async fn engages(&self, req: &RequestView, ctx: &MatchContext) -> bool {
        self.filter.matches(req, ctx).await
    }

    /// Derive the outbound descriptor: seed from the inbound view, apply the
    /// overrides, run the request rewriters, then assert the overrides again.
    pub fn prepare(&self, view: &RequestView) -> Result<OutboundRequest, ProxyError> {
        let mut outbound = OutboundRequest::from_view(view, self.forward_header_prefix.as_deref());
        self.overrides.apply(&mut outbound);
        self.request_rewriters.apply(&mut outbound)?;
        self.overrides.apply(&mut outbound);

        if self.response_rewriters.has_body_stages() {
            outbound.set_header(ACCEPT_ENCODING.as_str(), "identity");
        }
        Ok(outbound)
    }
}

/// Default cap on a body buffered for rewriting.
pub const DEFAULT_MAX_BUFFERED_BODY: usize = 8 * 1024 * 1024;

pub struct ProxyController {
    upstream: Arc<dyn Upstream>,
    timeout: Duration,
    max_buffered_body: usize,
}

impl ProxyController {
    pub fn new(upstream: Arc<dyn Upstream>, timeout: Duration) -> Self {
        Self {
            upstream,
            timeout,
            max_buffered_body: DEFAULT_MAX_BUFFERED_BODY,
        }
    }

    pub fn with_max_buffered_body(mut self, limit: usize) -> Self {
        self.max_buffered_body = limit;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn max_buffered_body(&self) -> usize {
        self.max_buffered_body
    }

    /// Run one proxied exchange for `profile`.
    ///
    /// Upstream failures are not retried. A rewriter failure stops its chain
    /// and becomes [`ProxyError::Rewrite`].
    ///
    /// The body is only buffered when a body stage wants it. Encoded bodies,
    /// content no stage accepts and bodies whose declared length exceeds the
    /// buffer cap stream through with only the observers applied. A body
    /// without a declared length that outgrows the cap is
    /// [`ProxyError::ResponseTooLarge`].
    pub async fn proxy(
        &self,
        view: &RequestView,
        body: BoxBody<Bytes, hyper::Error>,
        profile: &ProxyProfile,
    ) -> Result<Response<BoxBody<Bytes, hyper::Error>>, ProxyError> {
        let outbound = profile.prepare(view)?;
        let uri = outbound.uri()?.to_string();
        debug!(profile = %profile.name, upstream = %uri, "proxying request");

        let request = outbound.into_request(body)?;
        let start = Instant::now();
        let response = match tokio::time::timeout(self.timeout, self.upstream.send(request)).await {
            Ok(Ok(response)) => response,
            Ok(Err(source)) => return Err(ProxyError::Upstream { uri, source }),
            Err(_) => {
                return Err(ProxyError::UpstreamTimeout {
                    uri,
                    timeout: self.timeout,
                })
            }
        };

        let (parts, body) = response.into_parts();
        let mut head = ResponseHead {
            status: parts.status,
            version: parts.version,
            headers: parts.headers,
        };
        strip_hop_by_hop(&mut head);

        let chain = &profile.response_rewriters;
        if !self.should_buffer(&profile.name, chain, &head) {
            chain.apply_head(&mut head)?;
            metrics::record_upstream_duration(&profile.name, elapsed_ms(start));
            return Ok(into_response(head, body));
        }

        let remaining = self.timeout.saturating_sub(start.elapsed());
        let limited = Limited::new(body, self.max_buffered_body);
        let bytes = match tokio::time::timeout(remaining, limited.collect()).await {
            Ok(Ok(collected)) => collected.to_bytes(),
            Ok(Err(e)) if e.downcast_ref::<LengthLimitError>().is_some() => {
                return Err(ProxyError::ResponseTooLarge {
                    uri,
                    limit: self.max_buffered_body,
                })
            }
            Ok(Err(source)) => return Err(ProxyError::Upstream { uri, source }),
            Err(_) => {
                return Err(ProxyError::UpstreamTimeout {
                    uri,
                    timeout: self.timeout,
                })
            }
        };
        metrics::record_upstream_duration(&profile.name, elapsed_ms(start));

        let bytes = rewrite_response(chain, &mut head, bytes)?;
        head.headers.remove(CONTENT_LENGTH);
        Ok(into_response(head, full_body(bytes)))
    }

    fn should_buffer(&self, profile: &str, chain: &ResponseRewriterChain, head: &ResponseHead) -> bool {
        if !chain.has_body_stages() {
            return false;
        }
        if let Some(encoding) = content_encoding(head) {
            warn!(
                profile = %profile,
                content_encoding = %encoding,
                "upstream ignored accept-encoding: identity, skipping body rewriters"
            );
            return false;
        }
        if !chain.wants_body(head) {
            debug!(
                profile = %profile,
                content_type = ?head.content_type(),
                "no body rewriter accepts this content, streaming through"
            );
            return false;
        }
        let declared = head
            .header(CONTENT_LENGTH.as_str())
            .and_then(|v| v.trim().parse::<usize>().ok());
        if let Some(length) = declared.filter(|len| *len > self.max_buffered_body) {
            warn!(
                profile = %profile,
                content_length = length,
                limit = self.max_buffered_body,
                "response too large to rewrite, streaming through unchanged"
            );
            return false;
        }
        true
    }
}

/// A content encoding other than identity, if the response carries one.
fn content_encoding(head: &ResponseHead) -> Option<&str> {
    head.header(CONTENT_ENCODING.as_str())
        .map(str::trim)
        .filter(|e| !e.is_empty() && !e.eq_ignore_ascii_case("identity"))
}

/// Run the full response chain over a buffered body.
///
/// Kept synchronous: the parsed markup tree is not `Send` and must never
/// live across an await point.
fn rewrite_response(
    chain: &ResponseRewriterChain,
    head: &mut ResponseHead,
    bytes: Bytes,
) -> Result<Bytes, ProxyError> {
    let mut body = RewritableBody::new(bytes);
    chain.apply(head, &mut body)?;
    body.into_bytes().map_err(|source| ProxyError::Rewrite {
        stage: crate::error::RewriteStage::Response,
        rewriter: "serialize".to_string(),
        source,
    })
}

fn strip_hop_by_hop(head: &mut ResponseHead) {
    let hop: Vec<_> = head
        .headers
        .keys()
        .filter(|name| is_hop_by_hop(name.as_str()))
        .cloned()
        .collect();
    for name in hop {
        head.headers.remove(name);
    }
}

fn into_response(
    head: ResponseHead,
    body: BoxBody<Bytes, hyper::Error>,
) -> Response<BoxBody<Bytes, hyper::Error>> {
    let mut response = Response::new(body);
    *response.status_mut() = head.status;
    *response.version_mut() = head.version;
    *response.headers_mut() = head.headers;
    response
}

fn elapsed_ms(start: Instant) -> f64 {
    start.elapsed().as_secs_f64() * 1000.0
}
