//! Rewriter capabilities and the ordered chains that run them.
//!
//! Each capability is a separate trait so a stage only receives what it
//! declared it needs:
//!
//! - [`RequestRewriter`] mutates the outbound request descriptor
//! - [`ResponseObserver`] sees and may edit the response head only
//! - [`ResponseBodyTransformer`] gets the head plus body text and may replace the text
//! - [`MarkupTransformer`] gets the head plus the parsed document and edits it in place
//!
//! Closures with the matching signature implement the traits directly.

use super::body::{MarkupKind, RewritableBody};
use super::descriptor::OutboundRequest;
use crate::error::{ProxyError, RewriteStage};
use anyhow::Result;
use hyper::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use hyper::{StatusCode, Version};
use std::sync::Arc;
use sxd_document::dom::Document;
use tracing::debug;

pub trait RequestRewriter: Send + Sync {
    fn rewrite(&self, request: &mut OutboundRequest) -> Result<()>;
}

impl<F> RequestRewriter for F
where
    F: Fn(&mut OutboundRequest) -> Result<()> + Send + Sync,
{
    fn rewrite(&self, request: &mut OutboundRequest) -> Result<()> {
        self(request)
    }
}

pub trait ResponseObserver: Send + Sync {
    fn observe(&self, head: &mut ResponseHead) -> Result<()>;
}

impl<F> ResponseObserver for F
where
    F: Fn(&mut ResponseHead) -> Result<()> + Send + Sync,
{
    fn observe(&self, head: &mut ResponseHead) -> Result<()> {
        self(head)
    }
}

pub trait ResponseBodyTransformer: Send + Sync {
    /// `Some(non-empty)` replaces the body; `None` or an empty string keeps it.
    fn transform(&self, head: &mut ResponseHead, body: &str) -> Result<Option<String>>;

    /// Whether this stage wants the body of `head` at all. Bodies no stage
    /// wants are streamed through without buffering.
    fn accepts(&self, head: &ResponseHead) -> bool {
        head.is_textual()
    }
}

impl<F> ResponseBodyTransformer for F
where
    F: Fn(&mut ResponseHead, &str) -> Result<Option<String>> + Send + Sync,
{
    fn transform(&self, head: &mut ResponseHead, body: &str) -> Result<Option<String>> {
        self(head, body)
    }
}

pub trait MarkupTransformer: Send + Sync {
    fn transform(&self, head: &mut ResponseHead, document: &Document<'_>) -> Result<()>;
}

impl<F> MarkupTransformer for F
where
    F: for<'d> Fn(&mut ResponseHead, &Document<'d>) -> Result<()> + Send + Sync,
{
    fn transform(&self, head: &mut ResponseHead, document: &Document<'_>) -> Result<()> {
        self(head, document)
    }
}

/// Status line and headers of the upstream response.
#[derive(Debug, Clone)]
pub struct ResponseHead {
    pub status: StatusCode,
    pub version: Version,
    pub headers: HeaderMap,
}

impl ResponseHead {
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            version: Version::HTTP_11,
            headers: HeaderMap::new(),
        }
    }

    pub fn content_type(&self) -> Option<&str> {
        self.headers.get(CONTENT_TYPE).and_then(|v| v.to_str().ok())
    }

    /// Media type without parameters, lower-cased.
    pub fn mime(&self) -> Option<String> {
        self.content_type().map(|ct| {
            ct.split(';')
                .next()
                .unwrap_or_default()
                .trim()
                .to_ascii_lowercase()
        })
    }

    /// HTML bodies get a lenient HTML view; XHTML and XML a strict XML one.
    pub fn markup_kind(&self) -> Option<MarkupKind> {
        let mime = self.mime()?;
        if mime == "text/html" {
            Some(MarkupKind::Html)
        } else if mime == "application/xhtml+xml"
            || mime == "text/xml"
            || mime == "application/xml"
            || mime.ends_with("+xml")
        {
            Some(MarkupKind::Xml)
        } else {
            None
        }
    }

    pub fn is_markup(&self) -> bool {
        self.markup_kind().is_some()
    }

    /// Whether the body is plausibly text. A missing content type counts.
    pub fn is_textual(&self) -> bool {
        let Some(mime) = self.mime() else {
            return true;
        };
        mime.starts_with("text/")
            || mime.ends_with("+json")
            || mime.ends_with("+xml")
            || matches!(
                mime.as_str(),
                "application/json"
                    | "application/xml"
                    | "application/javascript"
                    | "application/x-javascript"
                    | "application/ecmascript"
                    | "application/x-www-form-urlencoded"
                    | "application/graphql"
            )
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn set_header(&mut self, name: &str, value: &str) -> Result<()> {
        let name = HeaderName::from_bytes(name.as_bytes())?;
        let value = HeaderValue::from_str(value)?;
        self.headers.insert(name, value);
        Ok(())
    }

    pub fn remove_header(&mut self, name: &str) {
        self.headers.remove(name);
    }
}

/// Ordered, named request rewriters.
#[derive(Clone, Default)]
pub struct RequestRewriterChain {
    stages: Vec<(String, Arc<dyn RequestRewriter>)>,
}

impl RequestRewriterChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(mut self, name: impl Into<String>, rewriter: Arc<dyn RequestRewriter>) -> Self {
        self.stages.push((name.into(), rewriter));
        self
    }

    pub fn rewrite<F>(self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&mut OutboundRequest) -> Result<()> + Send + Sync + 'static,
    {
        self.push(name, Arc::new(f))
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.stages.iter().map(|(name, _)| name.as_str())
    }

    /// Run every rewriter in registration order. The first failure stops the
    /// chain; mutations made before it are kept.
    pub fn apply(&self, request: &mut OutboundRequest) -> Result<(), ProxyError> {
        for (name, rewriter) in &self.stages {
            rewriter
                .rewrite(request)
                .map_err(|source| ProxyError::Rewrite {
                    stage: RewriteStage::Request,
                    rewriter: name.clone(),
                    source,
                })?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for RequestRewriterChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

/// One capability-tagged response stage.
#[derive(Clone)]
pub enum ResponseStage {
    Observe(Arc<dyn ResponseObserver>),
    Text(Arc<dyn ResponseBodyTransformer>),
    Markup(Arc<dyn MarkupTransformer>),
}

impl ResponseStage {
    pub fn needs_body(&self) -> bool {
        !matches!(self, ResponseStage::Observe(_))
    }

    fn kind(&self) -> &'static str {
        match self {
            ResponseStage::Observe(_) => "observe",
            ResponseStage::Text(_) => "text",
            ResponseStage::Markup(_) => "markup",
        }
    }
}

/// Ordered, named response rewriters.
#[derive(Clone, Default)]
pub struct ResponseRewriterChain {
    stages: Vec<(String, ResponseStage)>,
}

impl ResponseRewriterChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(mut self, name: impl Into<String>, stage: ResponseStage) -> Self {
        self.stages.push((name.into(), stage));
        self
    }

    pub fn observe<F>(self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&mut ResponseHead) -> Result<()> + Send + Sync + 'static,
    {
        self.push(name, ResponseStage::Observe(Arc::new(f)))
    }

    pub fn transform_text<F>(self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&mut ResponseHead, &str) -> Result<Option<String>> + Send + Sync + 'static,
    {
        self.push(name, ResponseStage::Text(Arc::new(f)))
    }

    pub fn transform_markup<F>(self, name: impl Into<String>, f: F) -> Self
    where
        F: for<'d> Fn(&mut ResponseHead, &Document<'d>) -> Result<()> + Send + Sync + 'static,
    {
        self.push(name, ResponseStage::Markup(Arc::new(f)))
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Whether any stage needs the body; if not the body can stream through.
    pub fn has_body_stages(&self) -> bool {
        self.stages.iter().any(|(_, stage)| stage.needs_body())
    }

    /// Whether any body stage would run for a response with this head.
    pub fn wants_body(&self, head: &ResponseHead) -> bool {
        self.stages.iter().any(|(_, stage)| match stage {
            ResponseStage::Observe(_) => false,
            ResponseStage::Text(transformer) => transformer.accepts(head),
            ResponseStage::Markup(_) => head.is_markup(),
        })
    }

    /// Run only the observers. Used when the body streams through unbuffered.
    pub fn apply_head(&self, head: &mut ResponseHead) -> Result<(), ProxyError> {
        for (name, stage) in &self.stages {
            if let ResponseStage::Observe(observer) = stage {
                observer.observe(head).map_err(|e| rewrite_error(name, e))?;
            }
        }
        Ok(())
    }

    /// Run every stage in registration order.
    ///
    /// Text stages are skipped for bodies they do not accept or that have no
    /// text view; markup stages are skipped for non-markup content types. The
    /// tree is only parsed when a markup stage actually runs.
    pub fn apply(&self, head: &mut ResponseHead, body: &mut RewritableBody) -> Result<(), ProxyError> {
        for (name, stage) in &self.stages {
            match stage {
                ResponseStage::Observe(observer) => {
                    observer.observe(head).map_err(|e| rewrite_error(name, e))?;
                }
                ResponseStage::Text(transformer) => {
                    if !transformer.accepts(head) {
                        debug!(
                            rewriter = %name,
                            content_type = ?head.content_type(),
                            "skipping text stage for this content type"
                        );
                        continue;
                    }
                    let replacement = match body.text().map_err(|e| rewrite_error(name, e))? {
                        Some(text) => transformer
                            .transform(head, text)
                            .map_err(|e| rewrite_error(name, e))?,
                        None => {
                            debug!(rewriter = %name, "skipping text stage, body has no text view");
                            None
                        }
                    };
                    if let Some(text) = replacement.filter(|t| !t.is_empty()) {
                        body.replace_text(text);
                    }
                }
                ResponseStage::Markup(transformer) => {
                    let Some(kind) = head.markup_kind() else {
                        debug!(
                            rewriter = %name,
                            content_type = ?head.content_type(),
                            "skipping {} stage for non-markup content",
                            stage.kind()
                        );
                        continue;
                    };
                    let result = body
                        .with_document(kind, |document| transformer.transform(head, document))
                        .map_err(|e| rewrite_error(name, e))?;
                    match result {
                        Some(outcome) => outcome.map_err(|e| rewrite_error(name, e))?,
                        None => debug!(rewriter = %name, "skipping markup stage, body has no text view"),
                    }
                }
            }
        }
        Ok(())
    }
}

fn rewrite_error(name: &str, source: anyhow::Error) -> ProxyError {
    ProxyError::Rewrite {
        stage: RewriteStage::Response,
        rewriter: name.to_string(),
        source,
    }
}

impl std::fmt::Debug for ResponseRewriterChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(
                self.stages
                    .iter()
                    .map(|(name, stage)| format!("{name}:{}", stage.kind())),
            )
            .finish()
    }
}
