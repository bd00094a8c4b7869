//! Outbound request descriptor.
//!
//! Derived from the inbound [`RequestView`], mutated by overrides and request
//! rewriters, then turned into the request sent upstream. One descriptor is
//! owned by exactly one proxy exchange.

use crate::error::ProxyError;
use crate::proxy::headers::is_hop_by_hop;
use crate::request::RequestView;
use http_body_util::combinators::BoxBody;
use hyper::body::Bytes;
use hyper::header::{HeaderValue, CONTENT_TYPE, HOST};
use hyper::{Method, Request, Uri};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundRequest {
    pub scheme: String,
    pub host: String,
    pub port: u16,
    pub method: Method,
    pub path: String,
    pub query: Option<String>,
    pub content_type: Option<String>,
    /// Lower-case name to value. Sorted so two descriptors built from the
    /// same request compare and serialize identically.
    pub headers: BTreeMap<String, String>,
}

impl OutboundRequest {
    /// Seed a descriptor from the inbound request.
    ///
    /// `host`, `content-length` and hop-by-hop headers are never copied.
    /// With a forwarding prefix only headers carrying it are copied, with
    /// the prefix stripped (`x-forward-cookie` becomes `cookie`).
    pub fn from_view(view: &RequestView, forward_prefix: Option<&str>) -> Self {
        let mut headers: BTreeMap<String, String> = BTreeMap::new();
        let prefix = forward_prefix.map(str::to_ascii_lowercase);

        for (name, value) in view.headers.iter() {
            let name = name.as_str();
            let name = match prefix.as_deref() {
                Some(prefix) => match name.strip_prefix(prefix) {
                    Some(stripped) if !stripped.is_empty() => stripped,
                    _ => continue,
                },
                None => name,
            };
            if name == "host" || name == "content-length" || is_hop_by_hop(name) {
                continue;
            }
            let Ok(value) = value.to_str() else {
                continue;
            };
            headers
                .entry(name.to_string())
                .and_modify(|existing| {
                    existing.push_str(if name == "cookie" { "; " } else { ", " });
                    existing.push_str(value);
                })
                .or_insert_with(|| value.to_string());
        }

        Self {
            scheme: view.scheme.clone(),
            host: view.host.clone().unwrap_or_default(),
            port: view.effective_port(),
            method: view.method.clone(),
            path: view.path.clone(),
            query: view.query.clone(),
            content_type: view.content_type.clone(),
            headers,
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn set_header(&mut self, name: &str, value: impl Into<String>) {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
    }

    pub fn remove_header(&mut self, name: &str) -> Option<String> {
        self.headers.remove(&name.to_ascii_lowercase())
    }

    fn default_port(&self) -> u16 {
        if self.scheme.eq_ignore_ascii_case("https") {
            443
        } else {
            80
        }
    }

    /// `host` or `host:port`, omitting the scheme's default port.
    pub fn authority(&self) -> String {
        if self.port == self.default_port() {
            self.host.clone()
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    pub fn uri(&self) -> Result<Uri, ProxyError> {
        if self.host.is_empty() {
            return Err(ProxyError::InvalidRequest(
                "outbound request has no host".to_string(),
            ));
        }
        let path = if self.path.starts_with('/') {
            self.path.clone()
        } else {
            format!("/{}", self.path)
        };
        let mut uri = format!("{}://{}{}", self.scheme, self.authority(), path);
        if let Some(query) = self.query.as_deref().filter(|q| !q.is_empty()) {
            uri.push('?');
            uri.push_str(query);
        }
        uri.parse::<Uri>()
            .map_err(|e| ProxyError::InvalidRequest(format!("'{uri}': {e}")))
    }

    /// Build the upstream request.
    ///
    /// The `host` header is the descriptor's authority unless a rewriter set
    /// one explicitly.
    pub fn into_request(
        self,
        body: BoxBody<Bytes, hyper::Error>,
    ) -> Result<Request<BoxBody<Bytes, hyper::Error>>, ProxyError> {
        let uri = self.uri()?;
        let mut builder = Request::builder().method(self.method.clone()).uri(uri);

        let headers = builder
            .headers_mut()
            .ok_or_else(|| ProxyError::InvalidRequest("request builder failed".to_string()))?;

        for (name, value) in &self.headers {
            let name = hyper::header::HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| ProxyError::InvalidRequest(format!("header name '{name}': {e}")))?;
            let value = HeaderValue::from_str(value).map_err(|e| {
                ProxyError::InvalidRequest(format!("header '{name}' value: {e}"))
            })?;
            headers.append(name, value);
        }
        if !headers.contains_key(HOST) {
            let host = HeaderValue::from_str(&self.authority())
                .map_err(|e| ProxyError::InvalidRequest(format!("host header: {e}")))?;
            headers.insert(HOST, host);
        }
        match self.content_type.as_deref() {
            Some(content_type) => {
                let value = HeaderValue::from_str(content_type)
                    .map_err(|e| ProxyError::InvalidRequest(format!("content-type: {e}")))?;
                headers.insert(CONTENT_TYPE, value);
            }
            None => {
                headers.remove(CONTENT_TYPE);
            }
        }

        builder
            .body(body)
            .map_err(|e| ProxyError::InvalidRequest(e.to_string()))
    }
}
