//! Listen, metrics, and TLS configuration.

use super::protocol::Protocol;
use serde::{Deserialize, Serialize};

/// TLS configuration for HTTPS listener
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TlsConfig {
    /// Path to TLS certificate file (PEM format)
    pub cert_path: String,
    /// Path to TLS private key file (PEM format)
    pub key_path: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ListenConfig {
    #[serde(default = "default_listen_port")]
    pub port: u16,
    /// Protocol for listener (http or https)
    #[serde(default)]
    pub protocol: Protocol,
    /// TLS configuration (required when protocol is https)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls: Option<TlsConfig>,
    /// Header carrying the original client address (e.g. x-forwarded-for).
    /// When unset the socket peer address is used.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_ip_header: Option<String>,
    /// Proxies in front of the listener that append to `client_ip_header`.
    /// The client address is read this many entries from the right.
    #[serde(default = "default_trusted_proxies")]
    pub trusted_proxies: usize,
}

fn default_trusted_proxies() -> usize {
    1
}

fn default_listen_port() -> u16 {
    8080
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            port: default_listen_port(),
            protocol: Protocol::Http,
            tls: None,
            client_ip_header: None,
            trusted_proxies: default_trusted_proxies(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MetricsConfig {
    /// 0 disables the metrics listener
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

fn default_metrics_port() -> u16 {
    9090
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            port: default_metrics_port(),
        }
    }
}
