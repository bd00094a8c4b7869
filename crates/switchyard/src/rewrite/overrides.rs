//! Static per-profile overrides of the outbound request.

use super::descriptor::OutboundRequest;
use hyper::Method;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Fields set here replace whatever the inbound request carried.
///
/// Applied before the request rewriters run and asserted again afterwards,
/// so a rewriter cannot undo an override.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct RequestOverrides {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheme: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
}

impl RequestOverrides {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    pub fn validate(&self) -> Result<(), String> {
        if let Some(ref scheme) = self.scheme {
            if !matches!(scheme.to_ascii_lowercase().as_str(), "http" | "https") {
                return Err(format!("unsupported scheme '{scheme}'"));
            }
        }
        if let Some(ref method) = self.method {
            Method::from_bytes(method.as_bytes())
                .map_err(|_| format!("invalid method '{method}'"))?;
        }
        if let Some(ref host) = self.host {
            if host.is_empty() || host.contains('/') {
                return Err(format!("invalid host '{host}'"));
            }
        }
        Ok(())
    }

    /// Write every configured field into the descriptor.
    ///
    /// Changing scheme or host without an explicit port moves the port to the
    /// scheme default; the inbound port belongs to the inbound host.
    pub fn apply(&self, request: &mut OutboundRequest) {
        if let Some(ref scheme) = self.scheme {
            request.scheme = scheme.to_ascii_lowercase();
        }
        if let Some(ref host) = self.host {
            request.host = host.clone();
        }
        match self.port {
            Some(port) => request.port = port,
            None if self.scheme.is_some() || self.host.is_some() => {
                request.port = if request.scheme == "https" { 443 } else { 80 };
            }
            None => {}
        }
        if let Some(method) = self
            .method
            .as_deref()
            .and_then(|m| Method::from_bytes(m.as_bytes()).ok())
        {
            request.method = method;
        }
        if let Some(ref path) = self.path {
            request.path = path.clone();
        }
        if let Some(ref query) = self.query {
            request.query = if query.is_empty() {
                None
            } else {
                Some(query.clone())
            };
        }
        if let Some(ref content_type) = self.content_type {
            request.content_type = Some(content_type.clone());
        }
        for (name, value) in &self.headers {
            request.set_header(name, value.clone());
        }
    }
}
