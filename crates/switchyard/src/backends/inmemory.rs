use crate::campaign::{Campaign, CampaignStore};
use crate::error::LookupUnavailable;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::net::IpAddr;

/// In-memory implementation of CampaignStore
///
/// Seeded from configuration and mutable at runtime. Lookups take a read
/// lock only, so concurrent predicate evaluation does not serialize.
#[derive(Debug, Default)]
pub struct InMemoryCampaignStore {
    campaigns: RwLock<HashMap<String, StoredCampaign>>,
}

#[derive(Debug, Clone, Default)]
struct StoredCampaign {
    description: String,
    addresses: HashSet<IpAddr>,
}

impl InMemoryCampaignStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_campaigns(campaigns: impl IntoIterator<Item = Campaign>) -> Self {
        let store = Self::new();
        for campaign in campaigns {
            store.upsert(campaign);
        }
        store
    }

    /// Insert a campaign, replacing any existing one with the same name.
    pub fn upsert(&self, campaign: Campaign) {
        let stored = StoredCampaign {
            description: campaign.description,
            addresses: campaign
                .addresses
                .into_iter()
                .map(|ip| ip.to_canonical())
                .collect(),
        };
        self.campaigns.write().insert(campaign.name, stored);
    }

    pub fn remove(&self, name: &str) -> Option<Campaign> {
        self.campaigns
            .write()
            .remove(name)
            .map(|stored| to_campaign(name, stored))
    }

    /// Add one address, creating the campaign if needed. Returns false if it was already present.
    pub fn add_address(&self, name: &str, ip: IpAddr) -> bool {
        self.campaigns
            .write()
            .entry(name.to_string())
            .or_default()
            .addresses
            .insert(ip.to_canonical())
    }

    pub fn remove_address(&self, name: &str, ip: IpAddr) -> bool {
        self.campaigns
            .write()
            .get_mut(name)
            .is_some_and(|c| c.addresses.remove(&ip.to_canonical()))
    }

    pub fn get(&self, name: &str) -> Option<Campaign> {
        self.campaigns
            .read()
            .get(name)
            .cloned()
            .map(|stored| to_campaign(name, stored))
    }

    pub fn len(&self) -> usize {
        self.campaigns.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.campaigns.read().is_empty()
    }
}

fn to_campaign(name: &str, stored: StoredCampaign) -> Campaign {
    let mut addresses: Vec<IpAddr> = stored.addresses.into_iter().collect();
    addresses.sort();
    Campaign {
        name: name.to_string(),
        description: stored.description,
        addresses,
    }
}

#[async_trait]
impl CampaignStore for InMemoryCampaignStore {
    async fn contains_ip(&self, campaign: &str, ip: IpAddr) -> Result<bool, LookupUnavailable> {
        let ip = ip.to_canonical();
        Ok(self
            .campaigns
            .read()
            .get(campaign)
            .is_some_and(|c| c.addresses.contains(&ip)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    fn spring() -> Campaign {
        Campaign {
            name: "spring-2024".to_string(),
            description: "spring sale".to_string(),
            addresses: vec![ip("192.168.1.42")],
        }
    }

    #[tokio::test]
    async fn test_membership() {
        let store = InMemoryCampaignStore::from_campaigns(vec![spring()]);
        assert_eq!(store.contains_ip("spring-2024", ip("192.168.1.42")).await, Ok(true));
        assert_eq!(store.contains_ip("spring-2024", ip("192.168.1.41")).await, Ok(false));
        assert_eq!(store.contains_ip("summer", ip("192.168.1.42")).await, Ok(false));
    }

    #[tokio::test]
    async fn test_runtime_mutation_is_visible() {
        let store = InMemoryCampaignStore::from_campaigns(vec![spring()]);

        assert!(store.add_address("spring-2024", ip("10.0.0.5")));
        assert!(!store.add_address("spring-2024", ip("10.0.0.5")));
        assert_eq!(store.contains_ip("spring-2024", ip("10.0.0.5")).await, Ok(true));

        assert!(store.remove_address("spring-2024", ip("192.168.1.42")));
        assert_eq!(store.contains_ip("spring-2024", ip("192.168.1.42")).await, Ok(false));

        let removed = store.remove("spring-2024").unwrap();
        assert_eq!(removed.addresses, vec![ip("10.0.0.5")]);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_add_address_creates_campaign() {
        let store = InMemoryCampaignStore::new();
        store.add_address("autumn", ip("10.1.1.1"));
        assert_eq!(store.len(), 1);
        assert_eq!(store.contains_ip("autumn", ip("10.1.1.1")).await, Ok(true));
    }

    #[test]
    fn test_upsert_replaces() {
        let store = InMemoryCampaignStore::from_campaigns(vec![spring()]);
        store.upsert(Campaign {
            name: "spring-2024".to_string(),
            description: "replaced".to_string(),
            addresses: vec![],
        });
        let campaign = store.get("spring-2024").unwrap();
        assert_eq!(campaign.description, "replaced");
        assert!(campaign.addresses.is_empty());
    }

    #[tokio::test]
    async fn test_ipv4_mapped_lookup() {
        let store = InMemoryCampaignStore::from_campaigns(vec![spring()]);
        assert_eq!(
            store.contains_ip("spring-2024", ip("::ffff:192.168.1.42")).await,
            Ok(true)
        );
    }
}
