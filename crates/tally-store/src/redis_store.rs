//! Redis usage store
//!
//! Samples live in one sorted set per tenant, scored by observation time in
//! milliseconds, with the JSON-encoded sample as the member. Writing the same
//! sample twice leaves a single member. A tenant index set lets retention
//! sweep every tenant without scanning the keyspace.

use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use tally_common::{EntityIdentity, Result, TallyError, TenantId, UsageSample};
use tracing::{debug, info, instrument, warn};

use crate::UsageStore;

/// Redis-backed usage store
pub struct RedisStore {
    /// Reconnecting connection shared by all callers
    connection: ConnectionManager,
    /// Key prefix for all entries
    prefix: String,
}

impl RedisStore {
    /// Connect to Redis
    pub async fn new(redis_url: &str) -> Result<Self> {
        let client = Client::open(redis_url)
            .map_err(|e| TallyError::Config(format!("Failed to create Redis client: {}", e)))?;

        let connection = ConnectionManager::new(client)
            .await
            .map_err(|e| TallyError::Storage(format!("Failed to connect to Redis: {}", e)))?;

        info!("Connected to Redis usage store");

        Ok(Self {
            connection,
            prefix: "tally".to_string(),
        })
    }

    /// Use a custom key prefix
    pub fn with_prefix(mut self, prefix: &str) -> Self {
        self.prefix = prefix.to_string();
        self
    }

    fn samples_key(&self, tenant: &str) -> String {
        samples_key(&self.prefix, tenant)
    }

    fn tenants_key(&self) -> String {
        format!("{}:tenants", self.prefix)
    }
}

fn samples_key(prefix: &str, tenant: &str) -> String {
    format!("{}:samples:{}", prefix, tenant)
}

/// Exclusive score bound
fn exclusive(ts: DateTime<Utc>) -> String {
    format!("({}", ts.timestamp_millis())
}

#[async_trait]
impl UsageStore for RedisStore {
    #[instrument(skip(self, samples), fields(count = samples.len()))]
    async fn insert_samples(&self, samples: &[UsageSample]) -> Result<()> {
        if samples.is_empty() {
            return Ok(());
        }

        let mut pipe = redis::pipe();
        pipe.atomic();
        for sample in samples {
            let member = serde_json::to_string(sample)?;
            pipe.zadd(
                self.samples_key(&sample.category),
                member,
                sample.observed_at.timestamp_millis(),
            )
            .ignore();
            pipe.sadd(self.tenants_key(), &sample.category).ignore();
        }

        let mut conn = self.connection.clone();
        pipe.query_async::<_, ()>(&mut conn)
            .await
            .map_err(|e| TallyError::Storage(format!("Redis sample insert failed: {}", e)))?;

        debug!("Inserted usage samples");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn distinct_identities(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        tenant: &TenantId,
    ) -> Result<Vec<EntityIdentity>> {
        let mut conn = self.connection.clone();
        let members: Vec<String> = conn
            .zrangebyscore(
                self.samples_key(tenant.as_str()),
                start.timestamp_millis(),
                exclusive(end),
            )
            .await
            .map_err(|e| TallyError::Storage(format!("Redis range query failed: {}", e)))?;

        let mut identities = BTreeSet::new();
        for member in members {
            match serde_json::from_str::<UsageSample>(&member) {
                Ok(sample) => {
                    identities.insert(sample.identity());
                }
                Err(e) => warn!(tenant = %tenant, error = %e, "Skipping undecodable sample"),
            }
        }
        Ok(identities.into_iter().collect())
    }

    #[instrument(skip(self))]
    async fn delete_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let mut conn = self.connection.clone();
        let tenants: Vec<String> = conn
            .smembers(self.tenants_key())
            .await
            .map_err(|e| TallyError::Storage(format!("Redis SMEMBERS failed: {}", e)))?;

        let mut deleted = 0u64;
        for tenant in tenants {
            let removed: u64 = conn
                .zrembyscore(self.samples_key(&tenant), "-inf", exclusive(cutoff))
                .await
                .map_err(|e| TallyError::Storage(format!("Redis retention sweep failed: {}", e)))?;
            deleted += removed;
        }

        info!(deleted, cutoff = %cutoff, "Dropped expired usage samples");
        Ok(deleted)
    }
}
