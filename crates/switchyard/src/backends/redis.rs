use crate::campaign::{Campaign, CampaignStore};
use crate::error::LookupUnavailable;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use redis::{Commands, Connection};
use std::net::IpAddr;
use std::sync::Mutex;

/// Simple connection manager for Redis
struct RedisConnectionManager {
    client: redis::Client,
}

impl RedisConnectionManager {
    fn new(client: redis::Client) -> Self {
        Self { client }
    }
}

impl r2d2::ManageConnection for RedisConnectionManager {
    type Connection = Mutex<Connection>;
    type Error = redis::RedisError;

    fn connect(&self) -> Result<Self::Connection, Self::Error> {
        let conn = self.client.get_connection()?;
        Ok(Mutex::new(conn))
    }

    fn is_valid(&self, conn: &mut Self::Connection) -> Result<(), Self::Error> {
        match conn.get_mut() {
            Ok(conn) => redis::cmd("PING").query(conn),
            Err(poisoned) => redis::cmd("PING").query(poisoned.into_inner()),
        }
    }

    fn has_broken(&self, _conn: &mut Self::Connection) -> bool {
        false
    }
}

/// Redis implementation of CampaignStore using a synchronous client
///
/// Each campaign is a Redis set keyed `<prefix><campaign>` holding the
/// textual client addresses. Lookups run `SISMEMBER` on the blocking pool.
pub struct RedisCampaignStore {
    pool: r2d2::Pool<RedisConnectionManager>,
    key_prefix: String,
}

impl RedisCampaignStore {
    /// Create a new Redis campaign store
    ///
    /// # Arguments
    /// * `url` - Redis connection URL (e.g. "redis://localhost:6379")
    /// * `pool_size` - Connection pool size
    /// * `key_prefix` - Prefix for campaign keys (e.g. "switchyard:campaign:")
    pub fn new(url: &str, pool_size: usize, key_prefix: String) -> Result<Self> {
        let client = redis::Client::open(url).context("Failed to parse Redis URL")?;

        let manager = RedisConnectionManager::new(client);

        let pool = r2d2::Pool::builder()
            .max_size(pool_size as u32)
            .connection_timeout(std::time::Duration::from_secs(5))
            .build(manager)
            .context("Failed to create Redis connection pool")?;

        // Test connection with PING
        {
            let conn = pool.get().context("Failed to get connection from pool")?;
            let mut guard = conn
                .lock()
                .map_err(|_| anyhow!("Redis connection mutex poisoned"))?;
            let _: String = redis::cmd("PING")
                .query(&mut *guard)
                .context("Failed to PING Redis")?;
        }

        tracing::info!(
            "Connected to Redis with prefix={}, pool_size={}",
            key_prefix,
            pool_size
        );

        Ok(Self { pool, key_prefix })
    }

    fn make_key(prefix: &str, campaign: &str) -> String {
        format!("{prefix}{campaign}")
    }

    /// Add the configured campaign addresses to their Redis sets.
    ///
    /// Existing members are kept; the store stays the owner of membership.
    pub fn seed(&self, campaigns: &[Campaign]) -> Result<()> {
        let conn = self
            .pool
            .get()
            .context("Failed to get Redis connection from pool")?;
        let mut guard = conn
            .lock()
            .map_err(|_| anyhow!("Redis connection mutex poisoned"))?;

        for campaign in campaigns {
            if campaign.addresses.is_empty() {
                continue;
            }
            let key = Self::make_key(&self.key_prefix, &campaign.name);
            let members: Vec<String> = campaign
                .addresses
                .iter()
                .map(|ip| ip.to_canonical().to_string())
                .collect();
            let _: i64 = guard.sadd(&key, members).context("Redis SADD failed")?;
        }
        Ok(())
    }
}

#[async_trait]
impl CampaignStore for RedisCampaignStore {
    async fn contains_ip(&self, campaign: &str, ip: IpAddr) -> Result<bool, LookupUnavailable> {
        let pool = self.pool.clone();
        let key = Self::make_key(&self.key_prefix, campaign);
        let member = ip.to_canonical().to_string();

        tokio::task::spawn_blocking(move || {
            let conn = pool
                .get()
                .map_err(|e| LookupUnavailable::Backend(format!("pool: {e}")))?;
            let mut guard = conn
                .lock()
                .map_err(|_| LookupUnavailable::Backend("connection mutex poisoned".into()))?;
            guard
                .sismember::<_, _, bool>(&key, &member)
                .map_err(|e| LookupUnavailable::Backend(format!("SISMEMBER {key}: {e}")))
        })
        .await
        .map_err(|e| LookupUnavailable::Backend(format!("lookup task failed: {e}")))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_make_key() {
        assert_eq!(
            RedisCampaignStore::make_key("switchyard:campaign:", "spring-2024"),
            "switchyard:campaign:spring-2024"
        );
    }

    #[test]
    fn test_new_rejects_bad_url() {
        assert!(RedisCampaignStore::new("not a url", 1, "p:".to_string()).is_err());
    }
}
