//! Per-tenant aggregation
//!
//! One pass lists a tenant's instances, claims and services (plus buckets when
//! object storage is configured), accumulates raw usage per identity, converts
//! it and writes the resulting samples in a single batch.

use std::sync::Arc;

use chrono::{DateTime, Duration, DurationRound, Utc};
use tally_common::types::cluster::{CPU_KEY, GPU_LIMIT_KEY, MEMORY_KEY};
use tally_common::{
    ClaimPhase, ClusterApi, InstancePhase, ObjectStorage, PropertyTable, Quantity, ResourceKind,
    Result, ServiceType, TallyError, TenantId, UsageSample, WorkloadInstance, NODE_PORT_RAW_COST,
};
use tally_store::UsageStore;
use tracing::{debug, error, info, instrument, warn};

use crate::accumulator::TenantUsage;
use crate::gpu::GpuResolver;
use crate::identity::IdentityResolver;

/// Claim holding operator backups, never billed
pub const BACKUP_CLAIM: &str = "kubeblocks-backup-data";

/// Prefix stripped from a tenant name to get its storage account
pub const ACCOUNT_PREFIX: &str = "ns-";

/// How long finished or stalled instances keep being billed
pub fn grace_period() -> Duration {
    Duration::minutes(1)
}

/// Object-storage account owning a tenant's buckets
pub fn account_for(tenant: &TenantId) -> &str {
    tenant
        .as_str()
        .strip_prefix(ACCOUNT_PREFIX)
        .unwrap_or(tenant.as_str())
}

/// Per-tenant metering pass
pub struct TenantAggregator {
    cluster: Arc<dyn ClusterApi>,
    gpu: Arc<GpuResolver>,
    properties: Arc<PropertyTable>,
    store: Arc<dyn UsageStore>,
    identities: IdentityResolver,
    object_storage: Option<Arc<dyn ObjectStorage>>,
    /// Egress lookback for buckets, normally the tick period
    egress_window: Duration,
}

impl TenantAggregator {
    pub fn new(
        cluster: Arc<dyn ClusterApi>,
        gpu: Arc<GpuResolver>,
        properties: Arc<PropertyTable>,
        store: Arc<dyn UsageStore>,
    ) -> Self {
        Self {
            cluster,
            gpu,
            properties,
            store,
            identities: IdentityResolver::default(),
            object_storage: None,
            egress_window: Duration::minutes(1),
        }
    }

    /// Also meter the tenant's object-storage buckets
    pub fn with_object_storage(mut self, storage: Arc<dyn ObjectStorage>) -> Self {
        self.object_storage = Some(storage);
        self
    }

    pub fn with_egress_window(mut self, window: Duration) -> Self {
        self.egress_window = window;
        self
    }

    pub fn with_identities(mut self, identities: IdentityResolver) -> Self {
        self.identities = identities;
        self
    }

    /// Meter `tenant` now and persist the samples.
    ///
    /// Returns the number of samples written.
    #[instrument(skip(self), fields(tenant = %tenant))]
    pub async fn meter(&self, tenant: &TenantId) -> Result<usize> {
        let samples = self.collect(tenant, Utc::now()).await?;
        if samples.is_empty() {
            debug!("No measurable usage");
            return Ok(0);
        }
        self.store.insert_samples(&samples).await?;
        debug!(samples = samples.len(), "Tenant usage persisted");
        Ok(samples.len())
    }

    /// Observe `tenant` as of `now` without persisting.
    ///
    /// Skip rules use `now` itself. Samples and the egress window use the
    /// minute it falls in.
    pub async fn collect(&self, tenant: &TenantId, now: DateTime<Utc>) -> Result<Vec<UsageSample>> {
        // whole-minute timestamps make a repeated pass rewrite identical samples
        let observed_at = now.duration_trunc(Duration::minutes(1)).unwrap_or(now);
        let mut usage = TenantUsage::new();
        let mut failed = Vec::new();

        match self.cluster.list_instances(tenant).await {
            Ok(instances) => {
                for instance in &instances {
                    self.add_instance(tenant, instance, now, &mut usage).await;
                }
            }
            Err(e) => {
                error!(tenant = %tenant, error = %e, "Failed to list instances");
                failed.push("instances");
            }
        }

        match self.cluster.list_claims(tenant).await {
            Ok(claims) => {
                for claim in claims
                    .iter()
                    .filter(|c| c.phase == ClaimPhase::Bound && c.name != BACKUP_CLAIM)
                {
                    usage.add(
                        &IdentityResolver::claim(claim),
                        ResourceKind::Storage,
                        claim.storage,
                    );
                }
            }
            Err(e) => {
                error!(tenant = %tenant, error = %e, "Failed to list volume claims");
                failed.push("claims");
            }
        }

        match self.cluster.list_services(tenant).await {
            Ok(services) => {
                for service in services
                    .iter()
                    .filter(|s| s.service_type == ServiceType::NodePort)
                {
                    usage.add(
                        &IdentityResolver::service(service),
                        ResourceKind::NodePorts,
                        Quantity::from_units(NODE_PORT_RAW_COST),
                    );
                }
            }
            Err(e) => {
                error!(tenant = %tenant, error = %e, "Failed to list services");
                failed.push("services");
            }
        }

        if failed.len() == 3 {
            return Err(TallyError::Discovery(format!(
                "every listing failed for tenant {}",
                tenant
            )));
        }

        if let Some(storage) = &self.object_storage {
            if let Err(e) = self.add_buckets(storage.as_ref(), tenant, observed_at, &mut usage).await {
                error!(tenant = %tenant, error = %e, "Failed to meter object storage");
            }
        }

        Ok(usage.into_samples(tenant, &self.properties, observed_at))
    }

    async fn add_instance(
        &self,
        tenant: &TenantId,
        instance: &WorkloadInstance,
        now: DateTime<Utc>,
        usage: &mut TenantUsage,
    ) {
        let Some(node) = instance.node_name.as_deref() else {
            return;
        };
        if instance.phase == InstancePhase::Succeeded {
            let finished = instance.finished_at.or(instance.started_at);
            if finished.map_or(true, |t| now - t > grace_period()) {
                return;
            }
        }

        let identity = self.identities.workload(instance);
        usage.entry(&identity);

        let stalled = instance.phase != InstancePhase::Running
            && instance
                .started_at
                .map_or(true, |t| now - t > grace_period());

        for container in &instance.containers {
            if let Some(gpus) = container.limits.get(GPU_LIMIT_KEY).filter(|q| !q.is_zero()) {
                match self.gpu.resolve(node).await {
                    Ok(product) => usage.add(
                        &IdentityResolver::gpu(&product),
                        ResourceKind::Gpu(product.clone()),
                        *gpus,
                    ),
                    Err(e) => warn!(
                        tenant = %tenant,
                        instance = %instance.name,
                        node,
                        error = %e,
                        "Skipping GPU usage"
                    ),
                }
            }
            if stalled {
                continue;
            }
            usage.add(&identity, ResourceKind::Cpu, container.limit_or_request(CPU_KEY));
            usage.add(&identity, ResourceKind::Memory, container.limit_or_request(MEMORY_KEY));
        }
    }

    async fn add_buckets(
        &self,
        storage: &dyn ObjectStorage,
        tenant: &TenantId,
        end: DateTime<Utc>,
        usage: &mut TenantUsage,
    ) -> Result<()> {
        let buckets = storage.list_buckets(account_for(tenant)).await?;
        for bucket in &buckets {
            let footprint = storage.bucket_usage(bucket).await?;
            if footprint.objects == 0 {
                continue;
            }
            let egress = storage
                .egress_bytes(bucket, end - self.egress_window, end)
                .await?;
            let identity = IdentityResolver::bucket(bucket);
            usage.add(&identity, ResourceKind::Storage, Quantity::from_units(footprint.bytes));
            usage.add(&identity, ResourceKind::Network, Quantity::from_units(egress));
        }
        if !buckets.is_empty() {
            info!(tenant = %tenant, buckets = buckets.len(), "Metered object storage");
        }
        Ok(())
    }
}
