//! Configuration types for Switchyard.

mod campaigns;
mod listen;
mod protocol;
mod proxies;
mod routing;
mod upstream;

use std::collections::HashSet;
use std::path::Path;

use hyper::header::HeaderName;
use serde::{Deserialize, Serialize};

pub use campaigns::{CampaignsConfig, RedisConfig};
pub use listen::{ListenConfig, MetricsConfig, TlsConfig};
pub use protocol::Protocol;
pub use proxies::ProxyConfig;
pub use routing::{RoutingConfig, RuleSetConfig};
pub use upstream::{Application, ConnectionPoolConfig};

use crate::predicate::PredicateSet;
use crate::rewrite::{build_request_chain, build_response_chain};

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub listen: ListenConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,

    /// Downstream applications, forwarded to unchanged
    #[serde(default)]
    pub applications: Vec<Application>,

    /// Rewriting proxy profiles
    #[serde(default)]
    pub proxies: Vec<ProxyConfig>,

    pub routing: RoutingConfig,

    #[serde(default)]
    pub campaigns: CampaignsConfig,

    #[serde(default)]
    pub connection_pool: ConnectionPoolConfig,
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, anyhow::Error> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    pub fn from_yaml(contents: &str) -> Result<Self, anyhow::Error> {
        let config: Config = serde_yaml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), anyhow::Error> {
        // Validate listener configuration
        if self.listen.protocol == Protocol::Https && self.listen.tls.is_none() {
            anyhow::bail!(
                "TLS configuration is required when listener protocol is 'https'. \
                 Please provide 'listen.tls.cert_path' and 'listen.tls.key_path'"
            );
        }

        if let Some(ref header) = self.listen.client_ip_header {
            HeaderName::from_bytes(header.as_bytes()).map_err(|_| {
                anyhow::anyhow!("listen.client_ip_header '{header}' is not a valid header name")
            })?;
        }
        if self.listen.trusted_proxies == 0 {
            anyhow::bail!("listen.trusted_proxies must be at least 1");
        }

        // Names are shared between applications and proxies
        let mut names = HashSet::new();
        for application in &self.applications {
            application.validate().map_err(|e| anyhow::anyhow!(e))?;
            if !names.insert(application.name.as_str()) {
                anyhow::bail!("Duplicate target name '{}'", application.name);
            }
        }
        for proxy in &self.proxies {
            if !names.insert(proxy.name.as_str()) {
                anyhow::bail!("Duplicate target name '{}'", proxy.name);
            }
        }

        if self.connection_pool.max_buffered_body_bytes == 0 {
            anyhow::bail!("connection_pool.max_buffered_body_bytes must be greater than zero");
        }

        self.validate_routing(&names)?;
        self.validate_proxies()?;
        self.validate_campaigns()?;

        Ok(())
    }

    fn validate_routing(&self, names: &HashSet<&str>) -> Result<(), anyhow::Error> {
        if !names.contains(self.routing.default.as_str()) {
            anyhow::bail!(
                "routing.default '{}' does not name an application or proxy",
                self.routing.default
            );
        }

        let mut rule_names = HashSet::new();
        for rule in &self.routing.rules {
            if !rule_names.insert(rule.name.as_str()) {
                anyhow::bail!("Duplicate routing rule name '{}'", rule.name);
            }
            if !names.contains(rule.target.as_str()) {
                anyhow::bail!(
                    "Routing rule '{}' targets '{}', which is not an application or proxy",
                    rule.name,
                    rule.target
                );
            }
            PredicateSet::compile(&rule.predicates)
                .map_err(|e| anyhow::anyhow!("Routing rule '{}': {e}", rule.name))?;
        }
        Ok(())
    }

    fn validate_proxies(&self) -> Result<(), anyhow::Error> {
        for proxy in &self.proxies {
            PredicateSet::compile(&proxy.filter)
                .map_err(|e| anyhow::anyhow!("Proxy '{}' filter: {e}", proxy.name))?;
            proxy
                .overrides
                .validate()
                .map_err(|e| anyhow::anyhow!("Proxy '{}' overrides: {e}", proxy.name))?;
            build_request_chain(&proxy.request_rewriters)
                .map_err(|e| anyhow::anyhow!("Proxy '{}' request rewriters: {e}", proxy.name))?;
            build_response_chain(&proxy.response_rewriters)
                .map_err(|e| anyhow::anyhow!("Proxy '{}' response rewriters: {e}", proxy.name))?;
        }
        Ok(())
    }

    fn validate_campaigns(&self) -> Result<(), anyhow::Error> {
        match self.campaigns.backend.as_str() {
            "inmemory" => {}
            "redis" => {
                if self.campaigns.redis.is_none() {
                    anyhow::bail!("campaigns.backend is 'redis' but no campaigns.redis block was provided");
                }
            }
            other => anyhow::bail!("Unknown campaign backend '{other}'. Supported: inmemory, redis"),
        }
        if self.campaigns.lookup_timeout_ms == 0 {
            anyhow::bail!("campaigns.lookup_timeout_ms must be greater than zero");
        }
        Ok(())
    }

    /// Header the listener reads the client address from, if configured.
    pub fn client_ip_header(&self) -> Option<HeaderName> {
        self.listen
            .client_ip_header
            .as_deref()
            .and_then(|h| HeaderName::from_bytes(h.as_bytes()).ok())
    }

    /// Whether any application asks for certificate verification to be skipped.
    pub fn should_skip_tls_verify(&self) -> bool {
        self.applications.iter().any(|a| a.tls_skip_verify)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const FULL: &str = r#"
listen:
  port: 8080
  client_ip_header: x-forwarded-for
metrics:
  port: 9090
applications:
  - name: main-site
    url: http://127.0.0.1:8000
  - name: beta-site
    url: https://beta.internal
    tls_skip_verify: true
proxies:
  - name: reddit
    filter:
      - path: /reddit
    overrides:
      scheme: https
      host: www.reddit.com
      port: 443
      path: /r/erlang
    request_rewriters:
      - set_header: { name: x-via, value: switchyard }
    response_rewriters:
      - replace: { pattern: "ERLANG", replacement: "erlang" }
      - lowercase
routing:
  default: main-site
  rules:
    - name: office-network
      group: internal
      target: beta-site
      predicates:
        - ip: 10.0.0.0/8
        - user_agent: { matches: "(?i)firefox" }
        - campaign: spring-2024
          not: true
    - name: reddit
      target: reddit
      predicates:
        - path: /reddit
campaigns:
  backend: inmemory
  lookup_timeout_ms: 100
  entries:
    - name: spring-2024
      description: spring sale
      addresses: [192.168.1.42]
connection_pool:
  upstream_timeout_secs: 10
"#;

    #[test]
    fn test_parse_full_config() {
        let config = Config::from_yaml(FULL).unwrap();
        assert_eq!(config.listen.port, 8080);
        assert_eq!(config.applications.len(), 2);
        assert_eq!(config.proxies[0].name, "reddit");
        assert_eq!(
            config.proxies[0].overrides.host.as_deref(),
            Some("www.reddit.com")
        );
        assert_eq!(config.proxies[0].response_rewriters.len(), 2);
        assert_eq!(config.routing.rules.len(), 2);
        assert_eq!(config.routing.rules[0].predicates.len(), 3);
        assert_eq!(config.routing.rules[0].group.as_deref(), Some("internal"));
        assert!(config.routing.rules[0].predicates[2].not);
        assert_eq!(config.campaigns.lookup_timeout_ms, 100);
        assert_eq!(config.campaigns.entries[0].addresses.len(), 1);
        assert_eq!(config.connection_pool.upstream_timeout_secs, 10);
        assert_eq!(config.connection_pool.max_idle_per_host, 100);
        assert!(config.should_skip_tls_verify());
        assert_eq!(
            config.client_ip_header(),
            Some(HeaderName::from_static("x-forwarded-for"))
        );
    }

    #[test]
    fn test_minimal_config_defaults() {
        let yaml = r#"
applications:
  - name: app
    url: http://127.0.0.1:8000
routing:
  default: app
"#;
        let config = Config::from_yaml(yaml).unwrap();
        assert_eq!(config.listen.port, 8080);
        assert_eq!(config.metrics.port, 9090);
        assert_eq!(config.campaigns.backend, "inmemory");
        assert_eq!(config.campaigns.lookup_timeout_ms, 250);
        assert_eq!(config.connection_pool.upstream_timeout_secs, 30);
        assert_eq!(config.connection_pool.max_buffered_body_bytes, 8 * 1024 * 1024);
        assert!(config.client_ip_header().is_none());
        assert_eq!(config.listen.trusted_proxies, 1);
    }

    #[test]
    fn test_unknown_default_target_rejected() {
        let yaml = r#"
applications:
  - name: app
    url: http://127.0.0.1:8000
routing:
  default: missing
"#;
        let err = Config::from_yaml(yaml).unwrap_err();
        assert!(err.to_string().contains("routing.default 'missing'"));
    }

    #[test]
    fn test_unknown_rule_target_rejected() {
        let yaml = r#"
applications:
  - name: app
    url: http://127.0.0.1:8000
routing:
  default: app
  rules:
    - name: r1
      target: nowhere
"#;
        let err = Config::from_yaml(yaml).unwrap_err();
        assert!(err.to_string().contains("targets 'nowhere'"));
    }

    #[test]
    fn test_zero_trusted_proxies_rejected() {
        let yaml = r#"
listen:
  client_ip_header: x-forwarded-for
  trusted_proxies: 0
applications:
  - name: app
    url: http://127.0.0.1:8000
routing:
  default: app
"#;
        let err = Config::from_yaml(yaml).unwrap_err();
        assert!(err.to_string().contains("trusted_proxies"));
    }

    #[test]
    fn test_zero_body_buffer_rejected() {
        let yaml = r#"
connection_pool:
  max_buffered_body_bytes: 0
applications:
  - name: app
    url: http://127.0.0.1:8000
routing:
  default: app
"#;
        let err = Config::from_yaml(yaml).unwrap_err();
        assert!(err.to_string().contains("max_buffered_body_bytes"));
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let yaml = r#"
applications:
  - name: app
    url: http://127.0.0.1:8000
proxies:
  - name: app
routing:
  default: app
"#;
        let err = Config::from_yaml(yaml).unwrap_err();
        assert!(err.to_string().contains("Duplicate target name 'app'"));
    }

    #[test]
    fn test_bad_predicate_rejected() {
        let yaml = r#"
applications:
  - name: app
    url: http://127.0.0.1:8000
routing:
  default: app
  rules:
    - name: bad-cidr
      target: app
      predicates:
        - ip: 10.0.0.0/40
"#;
        let err = Config::from_yaml(yaml).unwrap_err();
        assert!(err.to_string().contains("bad-cidr"));
    }

    #[test]
    fn test_bad_rewriter_pattern_rejected() {
        let yaml = r#"
applications:
  - name: app
    url: http://127.0.0.1:8000
proxies:
  - name: p
    response_rewriters:
      - replace: { pattern: "(", replacement: "" }
routing:
  default: app
"#;
        let err = Config::from_yaml(yaml).unwrap_err();
        assert!(err.to_string().contains("Proxy 'p' response rewriters"));
    }

    #[test]
    fn test_https_listener_requires_tls() {
        let yaml = r#"
listen:
  port: 8443
  protocol: https
applications:
  - name: app
    url: http://127.0.0.1:8000
routing:
  default: app
"#;
        assert!(Config::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_redis_backend_requires_block() {
        let yaml = r#"
applications:
  - name: app
    url: http://127.0.0.1:8000
routing:
  default: app
campaigns:
  backend: redis
"#;
        let err = Config::from_yaml(yaml).unwrap_err();
        assert!(err.to_string().contains("campaigns.redis"));
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(FULL.as_bytes()).unwrap();
        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.routing.default, "main-site");
    }

    #[test]
    fn test_from_missing_file() {
        assert!(Config::from_file("/nonexistent/switchyard.yaml").is_err());
    }
}
