use crate::config::CampaignsConfig;
use crate::error::LookupUnavailable;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::sync::Arc;

/// A named set of client addresses, e.g. the visitors of a marketing campaign.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct Campaign {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub addresses: Vec<IpAddr>,
}

/// Backend-agnostic membership lookup for campaign predicates.
///
/// Implementations are consulted once per predicate evaluation and must not
/// cache answers across requests.
#[async_trait]
pub trait CampaignStore: Send + Sync {
    /// Whether `ip` belongs to `campaign`. Unknown campaigns contain nothing.
    async fn contains_ip(&self, campaign: &str, ip: IpAddr) -> Result<bool, LookupUnavailable>;
}

/// Store used when no campaign backend is configured.
#[derive(Debug)]
pub struct NoCampaignStore;

#[async_trait]
impl CampaignStore for NoCampaignStore {
    async fn contains_ip(&self, _campaign: &str, _ip: IpAddr) -> Result<bool, LookupUnavailable> {
        Err(LookupUnavailable::NotConfigured)
    }
}

/// Create a CampaignStore based on configuration
///
/// # Example
/// ```ignore
/// use switchyard::config::CampaignsConfig;
/// use switchyard::campaign::create_campaign_store;
///
/// let config = CampaignsConfig::default(); // inmemory, no entries
/// let store = create_campaign_store(&config)?;
/// ```
pub fn create_campaign_store(config: &CampaignsConfig) -> Result<Arc<dyn CampaignStore>> {
    match config.backend.as_str() {
        "inmemory" => {
            use crate::backends::InMemoryCampaignStore;
            tracing::info!(
                "Using InMemory CampaignStore ({} campaigns)",
                config.entries.len()
            );
            Ok(Arc::new(InMemoryCampaignStore::from_campaigns(
                config.entries.iter().cloned(),
            )))
        }
        "redis" => {
            let redis_config = config
                .redis
                .as_ref()
                .ok_or_else(|| anyhow!("Redis backend selected but no redis config provided"))?;

            #[cfg(feature = "redis-backend")]
            {
                use crate::backends::RedisCampaignStore;
                use anyhow::Context;

                let store = RedisCampaignStore::new(
                    &redis_config.url,
                    redis_config.pool_size,
                    redis_config.key_prefix.clone(),
                )
                .context("Failed to create Redis backend")?;

                if !config.entries.is_empty() {
                    store
                        .seed(&config.entries)
                        .context("Failed to seed campaigns into Redis")?;
                }

                tracing::info!("Using redis CampaignStore (url={})", redis_config.url);

                Ok(Arc::new(store))
            }

            #[cfg(not(feature = "redis-backend"))]
            {
                let _ = redis_config;
                Err(anyhow!(
                    "Redis backend not available. Compile with --features redis-backend"
                ))
            }
        }
        other => Err(anyhow!("Unknown campaign backend type: {other}")),
    }
}
