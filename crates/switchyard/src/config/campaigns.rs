//! Campaign store configuration.

use crate::campaign::Campaign;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CampaignsConfig {
    #[serde(default = "default_backend_type")]
    pub backend: String, // "inmemory" or "redis"
    /// Upper bound for a single membership lookup
    #[serde(default = "default_lookup_timeout_ms")]
    pub lookup_timeout_ms: u64,
    #[serde(default)]
    pub entries: Vec<Campaign>,
    #[serde(default)]
    pub redis: Option<RedisConfig>,
}

fn default_backend_type() -> String {
    "inmemory".to_string()
}

fn default_lookup_timeout_ms() -> u64 {
    250
}

impl Default for CampaignsConfig {
    fn default() -> Self {
        Self {
            backend: default_backend_type(),
            lookup_timeout_ms: default_lookup_timeout_ms(),
            entries: Vec::new(),
            redis: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RedisConfig {
    pub url: String,
    #[serde(default = "default_redis_pool_size")]
    pub pool_size: usize,
    #[serde(default = "default_redis_key_prefix")]
    pub key_prefix: String,
}

fn default_redis_pool_size() -> usize {
    10
}

fn default_redis_key_prefix() -> String {
    "switchyard:campaign:".to_string()
}
