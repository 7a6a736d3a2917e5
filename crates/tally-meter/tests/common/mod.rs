//! Shared fakes for the meter tests
#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tally_common::{
    BucketUsage, ClaimPhase, ClusterApi, ContainerResources, GpuInventory, InstancePhase,
    NetworkService, ObjectStorage, PropertyDefinition, PropertyTable, Quantity, Result,
    ServiceType, TallyError, TenantDirectory, TenantId, VolumeClaim, WorkloadInstance,
};
use tally_meter::{GpuResolver, RetryPolicy, TenantAggregator};
use tally_store::UsageStore;

/// In-memory cluster: tenants, their objects, GPU nodes
#[derive(Default)]
pub struct FakeCluster {
    pub tenants: Mutex<Vec<TenantId>>,
    pub instances: Mutex<HashMap<TenantId, Vec<WorkloadInstance>>>,
    pub claims: Mutex<HashMap<TenantId, Vec<VolumeClaim>>>,
    pub services: Mutex<HashMap<TenantId, Vec<NetworkService>>>,
    pub gpu_nodes: Mutex<HashMap<String, String>>,
    /// Tenants whose every listing fails
    pub broken: Mutex<HashSet<TenantId>>,
    /// Tenants whose instance listing alone fails
    pub broken_instances: Mutex<HashSet<TenantId>>,
    /// Delay added to instance listings
    pub list_delay: Option<Duration>,
    pub instance_lists: AtomicUsize,
    in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
}

impl FakeCluster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(delay: Duration) -> Self {
        Self {
            list_delay: Some(delay),
            ..Default::default()
        }
    }

    pub fn add_tenant(&self, tenant: &str) -> TenantId {
        let tenant = TenantId::from(tenant);
        self.tenants.lock().push(tenant.clone());
        tenant
    }

    pub fn add_instance(&self, tenant: &TenantId, instance: WorkloadInstance) {
        self.instances.lock().entry(tenant.clone()).or_default().push(instance);
    }

    pub fn add_claim(&self, tenant: &TenantId, name: &str, phase: ClaimPhase, storage: &str) {
        self.claims.lock().entry(tenant.clone()).or_default().push(VolumeClaim {
            name: name.into(),
            phase,
            storage: q(storage),
        });
    }

    pub fn add_service(&self, tenant: &TenantId, name: &str, service_type: ServiceType) {
        self.services
            .lock()
            .entry(tenant.clone())
            .or_default()
            .push(NetworkService {
                name: name.into(),
                service_type,
            });
    }

    pub fn add_gpu_node(&self, node: &str, product: &str) {
        self.gpu_nodes.lock().insert(node.into(), product.into());
    }

    pub fn break_tenant(&self, tenant: &TenantId) {
        self.broken.lock().insert(tenant.clone());
    }

    fn check(&self, tenant: &TenantId) -> Result<()> {
        if self.broken.lock().contains(tenant) {
            return Err(TallyError::Discovery(format!("{} unreachable", tenant)));
        }
        Ok(())
    }
}

#[async_trait]
impl TenantDirectory for FakeCluster {
    async fn list_tenants(&self) -> Result<Vec<TenantId>> {
        Ok(self.tenants.lock().clone())
    }
}

#[async_trait]
impl ClusterApi for FakeCluster {
    async fn list_instances(&self, tenant: &TenantId) -> Result<Vec<WorkloadInstance>> {
        self.instance_lists.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if let Some(delay) = self.list_delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        self.check(tenant)?;
        if self.broken_instances.lock().contains(tenant) {
            return Err(TallyError::Discovery("pods unavailable".into()));
        }
        Ok(self.instances.lock().get(tenant).cloned().unwrap_or_default())
    }

    async fn list_claims(&self, tenant: &TenantId) -> Result<Vec<VolumeClaim>> {
        self.check(tenant)?;
        Ok(self.claims.lock().get(tenant).cloned().unwrap_or_default())
    }

    async fn list_services(&self, tenant: &TenantId) -> Result<Vec<NetworkService>> {
        self.check(tenant)?;
        Ok(self.services.lock().get(tenant).cloned().unwrap_or_default())
    }
}

#[async_trait]
impl GpuInventory for FakeCluster {
    async fn node_gpu_models(&self) -> Result<HashMap<String, String>> {
        Ok(self.gpu_nodes.lock().clone())
    }
}

/// Buckets per account with fixed footprints
#[derive(Default)]
pub struct FakeObjectStorage {
    pub buckets: Mutex<BTreeMap<String, (BucketUsage, u64)>>,
    pub egress_windows: Mutex<Vec<(DateTime<Utc>, DateTime<Utc>)>>,
}

impl FakeObjectStorage {
    pub fn add_bucket(&self, name: &str, bytes: u64, objects: u64, egress: u64) {
        self.buckets
            .lock()
            .insert(name.into(), (BucketUsage { bytes, objects }, egress));
    }
}

#[async_trait]
impl ObjectStorage for FakeObjectStorage {
    async fn list_buckets(&self, account: &str) -> Result<Vec<String>> {
        let prefix = format!("{}-", account);
        Ok(self
            .buckets
            .lock()
            .keys()
            .filter(|b| b.starts_with(&prefix))
            .cloned()
            .collect())
    }

    async fn bucket_usage(&self, bucket: &str) -> Result<BucketUsage> {
        self.buckets
            .lock()
            .get(bucket)
            .map(|(usage, _)| *usage)
            .ok_or_else(|| TallyError::Metrics(format!("no bucket {}", bucket)))
    }

    async fn egress_bytes(&self, bucket: &str, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<u64> {
        self.egress_windows.lock().push((start, end));
        self.buckets
            .lock()
            .get(bucket)
            .map(|(_, egress)| *egress)
            .ok_or_else(|| TallyError::Metrics(format!("no bucket {}", bucket)))
    }
}

pub fn q(s: &str) -> Quantity {
    s.parse().unwrap()
}

/// Defaults plus whole-core CPU, GiB memory and one GPU product
pub fn table() -> PropertyTable {
    PropertyTable::new(vec![
        PropertyDefinition::new("cpu", 0, q("1")),
        PropertyDefinition::new("memory", 1, q("1Gi")),
        PropertyDefinition::new("storage", 2, q("1Gi")),
        PropertyDefinition::new("network", 3, q("1Mi")),
        PropertyDefinition::new("services.nodeports", 4, q("1")),
        PropertyDefinition::new("gpu-A100", 5, q("1")),
    ])
    .unwrap()
}

pub fn container(cpu: &str, memory: &str) -> ContainerResources {
    ContainerResources {
        limits: BTreeMap::new(),
        requests: BTreeMap::from([("cpu".to_string(), q(cpu)), ("memory".to_string(), q(memory))]),
    }
}

pub fn gpu_container(cpu: &str, gpus: &str) -> ContainerResources {
    ContainerResources {
        limits: BTreeMap::from([
            ("cpu".to_string(), q(cpu)),
            ("nvidia.com/gpu".to_string(), q(gpus)),
        ]),
        requests: BTreeMap::new(),
    }
}

/// Running instance of app `app` on `node-1`, started ten minutes before `now`
pub fn app_instance(
    name: &str,
    app: &str,
    now: DateTime<Utc>,
    containers: Vec<ContainerResources>,
) -> WorkloadInstance {
    WorkloadInstance {
        name: name.into(),
        labels: BTreeMap::from([("app".to_string(), app.to_string())]),
        owners: vec![],
        node_name: Some("node-1".into()),
        phase: InstancePhase::Running,
        started_at: Some(now - chrono::Duration::minutes(10)),
        finished_at: None,
        containers,
    }
}

pub fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        retries: 2,
        backoff: Duration::from_millis(1),
    }
}

pub async fn aggregator(
    cluster: &Arc<FakeCluster>,
    store: Arc<dyn UsageStore>,
) -> TenantAggregator {
    let gpu = GpuResolver::preload(cluster.clone(), fast_retry()).await.unwrap();
    TenantAggregator::new(cluster.clone(), Arc::new(gpu), Arc::new(table()), store)
}
