//! Read-only view of an inbound request.
//!
//! Built once per request by the hosting server. Predicates, the router and
//! the proxy controller all read from it; nothing mutates the inbound request.

use hyper::header::{HeaderMap, HeaderName, CONTENT_TYPE, HOST, REFERER, USER_AGENT};
use hyper::http::uri::Authority;
use hyper::{Method, Request};
use std::net::IpAddr;

#[derive(Debug, Clone)]
pub struct RequestView {
    pub client_ip: Option<IpAddr>,
    pub scheme: String,
    /// Host without its port.
    pub host: Option<String>,
    pub port: Option<u16>,
    pub method: Method,
    pub path: String,
    pub query: Option<String>,
    pub referer: Option<String>,
    pub user_agent: Option<String>,
    pub content_type: Option<String>,
    pub headers: HeaderMap,
}

impl RequestView {
    /// Build a view from a hyper request and the socket peer address.
    pub fn from_request<B>(req: &Request<B>, peer: Option<IpAddr>) -> Self {
        let headers = req.headers().clone();
        let uri = req.uri();

        let authority = uri
            .authority()
            .map(|a| a.as_str().to_string())
            .or_else(|| header_str(&headers, &HOST).map(str::to_string));
        let (host, port) = authority
            .as_deref()
            .map(split_authority)
            .unwrap_or((None, None));

        Self {
            client_ip: peer,
            scheme: uri.scheme_str().unwrap_or("http").to_ascii_lowercase(),
            host,
            port,
            method: req.method().clone(),
            path: uri.path().to_string(),
            query: uri.query().map(str::to_string),
            referer: header_str(&headers, &REFERER).map(str::to_string),
            user_agent: header_str(&headers, &USER_AGENT).map(str::to_string),
            content_type: header_str(&headers, &CONTENT_TYPE).map(str::to_string),
            headers,
        }
    }

    /// Override the scheme the request arrived on (the listener knows it,
    /// origin-form request targets do not carry it).
    pub fn with_scheme(mut self, scheme: &str) -> Self {
        self.scheme = scheme.to_ascii_lowercase();
        self
    }

    /// Take the client address from a forwarding header when present.
    ///
    /// Each trusted proxy appends the address it received the request from,
    /// so with `trusted_proxies` hops in front of the listener the client is
    /// that many entries from the right. Entries further left are supplied
    /// by the client and ignored. A list shorter than the hop count or an
    /// unparseable entry leaves the socket peer in place.
    pub fn with_client_ip_header(mut self, header: Option<&HeaderName>, trusted_proxies: usize) -> Self {
        let Some(header) = header else {
            return self;
        };
        let entries: Vec<&str> = self
            .headers
            .get_all(header)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|v| v.split(','))
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .collect();
        let forwarded = entries
            .len()
            .checked_sub(trusted_proxies.max(1))
            .and_then(|i| entries.get(i))
            .and_then(|v| v.parse::<IpAddr>().ok());
        if let Some(ip) = forwarded {
            self.client_ip = Some(ip);
        }
        self
    }

    /// Port the request addressed, falling back to the scheme default.
    pub fn effective_port(&self) -> u16 {
        self.port.unwrap_or(if self.scheme == "https" { 443 } else { 80 })
    }

    /// Look up a header value as text.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &HeaderName) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn split_authority(raw: &str) -> (Option<String>, Option<u16>) {
    match raw.parse::<Authority>() {
        Ok(authority) => (
            Some(authority.host().to_ascii_lowercase()),
            authority.port_u16(),
        ),
        Err(_) => (Some(raw.to_ascii_lowercase()), None),
    }
}
