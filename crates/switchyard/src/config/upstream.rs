//! Downstream applications and connection pool configuration.

use super::protocol::Protocol;
use serde::{Deserialize, Serialize};

/// Named downstream application that requests are forwarded to unchanged.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Application {
    pub name: String,
    /// Base URL, e.g. `http://127.0.0.1:8000` or `https://app.internal/prefix`
    pub url: String,
    /// Skip TLS certificate verification (for self-signed certs in dev/test)
    #[serde(default)]
    pub tls_skip_verify: bool,
}

impl Application {
    /// Parse and extract protocol from URL
    pub fn get_protocol(&self) -> Result<Protocol, String> {
        let url_parts: Vec<&str> = self.url.splitn(2, "://").collect();
        if url_parts.len() != 2 {
            return Err(format!("Invalid URL format (missing scheme): {}", self.url));
        }

        Protocol::from_scheme(url_parts[0])
    }

    /// Validate that the application configuration is valid
    pub fn validate(&self) -> Result<(), String> {
        self.get_protocol().map_err(|e| {
            format!(
                "Application '{}': {e}. Currently supported: http, https",
                self.name
            )
        })?;
        self.url
            .parse::<hyper::Uri>()
            .map_err(|e| format!("Application '{}' has an invalid url: {e}", self.name))?;
        Ok(())
    }

    /// Base URL without a trailing slash, ready to have a path appended.
    pub fn base_url(&self) -> &str {
        self.url.trim_end_matches('/')
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ConnectionPoolConfig {
    #[serde(default = "default_pool_max_idle_per_host")]
    pub max_idle_per_host: usize,

    #[serde(default = "default_pool_idle_timeout")]
    pub idle_timeout_secs: u64,

    #[serde(default = "default_keepalive_timeout")]
    pub keepalive_timeout_secs: u64,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Upper bound for a whole upstream exchange made by a proxy profile.
    #[serde(default = "default_upstream_timeout")]
    pub upstream_timeout_secs: u64,

    /// Largest upstream body a proxy profile buffers for its body rewriters.
    /// Larger bodies with a known length stream through unchanged.
    #[serde(default = "default_max_buffered_body_bytes")]
    pub max_buffered_body_bytes: usize,
}

impl Default for ConnectionPoolConfig {
    fn default() -> Self {
        Self {
            max_idle_per_host: default_pool_max_idle_per_host(),
            idle_timeout_secs: default_pool_idle_timeout(),
            keepalive_timeout_secs: default_keepalive_timeout(),
            connect_timeout_secs: default_connect_timeout(),
            upstream_timeout_secs: default_upstream_timeout(),
            max_buffered_body_bytes: default_max_buffered_body_bytes(),
        }
    }
}

fn default_pool_max_idle_per_host() -> usize {
    100
}

fn default_pool_idle_timeout() -> u64 {
    90
}

fn default_keepalive_timeout() -> u64 {
    60
}

fn default_connect_timeout() -> u64 {
    5
}

fn default_upstream_timeout() -> u64 {
    30
}

fn default_max_buffered_body_bytes() -> usize {
    8 * 1024 * 1024
}
