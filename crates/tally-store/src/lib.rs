//! # Tally Store
//!
//! Persistence gateway for usage samples.
//!
//! - [`UsageStore`]: the storage contract the meter writes through
//! - [`InMemoryStore`]: DashMap-backed store for tests and local runs
//! - [`RedisStore`]: sorted-set-per-tenant store for production

pub mod memory;
pub mod redis_store;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tally_common::{EntityIdentity, Result, TenantId, UsageSample};

pub use memory::InMemoryStore;
pub use redis_store::RedisStore;

/// Storage contract for usage samples
#[async_trait]
pub trait UsageStore: Send + Sync {
    /// Persist a batch of samples. The batch is the unit of atomicity.
    async fn insert_samples(&self, samples: &[UsageSample]) -> Result<()>;

    /// Distinct identities recorded for a tenant during `[start, end)`
    async fn distinct_identities(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        tenant: &TenantId,
    ) -> Result<Vec<EntityIdentity>>;

    /// Delete every sample observed before `cutoff`, returning how many went
    async fn delete_before(&self, cutoff: DateTime<Utc>) -> Result<u64>;

    /// Delete samples older than `days` days
    async fn delete_older_than(&self, days: u32) -> Result<u64> {
        let cutoff = Utc::now() - Duration::days(i64::from(days));
        self.delete_before(cutoff).await
    }
}
