//! In-memory storage implementation
//!
//! Uses DashMap for concurrent access. Besides samples it keeps recorded
//! traffic counters so it can stand in for the traffic collaborator too.

use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tally_common::{EntityIdentity, Result, TenantId, TrafficSource, UsageSample};

use crate::UsageStore;

/// A sent-bytes observation
#[derive(Debug, Clone, Copy)]
struct TrafficRecord {
    at: DateTime<Utc>,
    bytes: u64,
}

/// In-memory usage store
#[derive(Default)]
pub struct InMemoryStore {
    /// Samples by tenant
    samples: DashMap<TenantId, Vec<UsageSample>>,

    /// Sent-byte observations by tenant and entity
    traffic: DashMap<(TenantId, EntityIdentity), Vec<TrafficRecord>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// All samples stored for a tenant, in insertion order
    pub fn samples(&self, tenant: &TenantId) -> Vec<UsageSample> {
        self.samples
            .get(tenant)
            .map(|s| s.clone())
            .unwrap_or_default()
    }

    /// Total number of stored samples
    pub fn len(&self) -> usize {
        self.samples.iter().map(|s| s.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Record bytes sent by an entity at a point in time
    pub fn record_traffic(
        &self,
        tenant: &TenantId,
        entity: &EntityIdentity,
        at: DateTime<Utc>,
        bytes: u64,
    ) {
        self.traffic
            .entry((tenant.clone(), entity.clone()))
            .or_default()
            .push(TrafficRecord { at, bytes });
    }
}

#[async_trait]
impl UsageStore for InMemoryStore {
    async fn insert_samples(&self, samples: &[UsageSample]) -> Result<()> {
        for sample in samples {
            let tenant = TenantId::new(sample.category.clone());
            let mut stored = self.samples.entry(tenant).or_default();
            // identical samples collapse, matching the sorted-set backend
            if !stored.contains(sample) {
                stored.push(sample.clone());
            }
        }
        Ok(())
    }

    async fn distinct_identities(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        tenant: &TenantId,
    ) -> Result<Vec<EntityIdentity>> {
        let identities: BTreeSet<EntityIdentity> = self
            .samples
            .get(tenant)
            .map(|samples| {
                samples
                    .iter()
                    .filter(|s| s.observed_at >= start && s.observed_at < end)
                    .map(UsageSample::identity)
                    .collect()
            })
            .unwrap_or_default();
        Ok(identities.into_iter().collect())
    }

    async fn delete_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let mut deleted = 0u64;
        for mut samples in self.samples.iter_mut() {
            let before = samples.len();
            samples.retain(|s| s.observed_at >= cutoff);
            deleted += (before - samples.len()) as u64;
        }
        Ok(deleted)
    }
}

#[async_trait]
impl TrafficSource for InMemoryStore {
    async fn sent_bytes(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        tenant: &TenantId,
        entity: &EntityIdentity,
    ) -> Result<u64> {
        let total = self
            .traffic
            .get(&(tenant.clone(), entity.clone()))
            .map(|records| {
                records
                    .iter()
                    .filter(|r| r.at >= start && r.at < end)
                    .map(|r| r.bytes)
                    .sum()
            })
            .unwrap_or(0);
        Ok(total)
    }
}
