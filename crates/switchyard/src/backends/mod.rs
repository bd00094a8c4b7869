//! Campaign store backends.

mod inmemory;
#[cfg(feature = "redis-backend")]
mod redis;

pub use self::inmemory::InMemoryCampaignStore;
#[cfg(feature = "redis-backend")]
pub use self::redis::RedisCampaignStore;
