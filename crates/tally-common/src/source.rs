//! Collaborator contracts
//!
//! The metering engine reads the outside world only through these
//! capabilities. Concrete adapters live in `tally-collect`; tests provide
//! their own in-memory doubles.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::types::cluster::{BucketUsage, NetworkService, TenantId, VolumeClaim, WorkloadInstance};
use crate::types::identity::EntityIdentity;

/// Discovers the tenants that are subject to metering
#[async_trait]
pub trait TenantDirectory: Send + Sync {
    /// All tenants carrying the ownership marker
    async fn list_tenants(&self) -> Result<Vec<TenantId>>;
}

/// Read-only view of tenant-scoped cluster objects
#[async_trait]
pub trait ClusterApi: Send + Sync {
    /// Workload instances (pods) in a tenant
    async fn list_instances(&self, tenant: &TenantId) -> Result<Vec<WorkloadInstance>>;

    /// Volume claims in a tenant
    async fn list_claims(&self, tenant: &TenantId) -> Result<Vec<VolumeClaim>>;

    /// Network services in a tenant
    async fn list_services(&self, tenant: &TenantId) -> Result<Vec<NetworkService>>;
}

/// Source of GPU hardware metadata per compute node
#[async_trait]
pub trait GpuInventory: Send + Sync {
    /// Map of node name to GPU product label, for nodes that carry GPUs
    async fn node_gpu_models(&self) -> Result<HashMap<String, String>>;
}

/// Object-storage backend used for bucket metering
#[async_trait]
pub trait ObjectStorage: Send + Sync {
    /// Buckets owned by an external account
    async fn list_buckets(&self, account: &str) -> Result<Vec<String>>;

    /// Stored bytes and object count of a bucket
    async fn bucket_usage(&self, bucket: &str) -> Result<BucketUsage>;

    /// Bytes served out of a bucket during `[start, end)`
    async fn egress_bytes(&self, bucket: &str, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<u64>;
}

/// Per-entity network traffic counters
#[async_trait]
pub trait TrafficSource: Send + Sync {
    /// Bytes sent by an entity during `[start, end)`
    async fn sent_bytes(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        tenant: &TenantId,
        entity: &EntityIdentity,
    ) -> Result<u64>;
}
