//! Kubernetes REST adapter
//!
//! Talks to the API server with plain authenticated GETs and maps the
//! handful of fields the meter needs into `tally-common` snapshots. Wire
//! structs stay private to this module.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tally_common::{
    ClaimPhase, ClusterApi, ContainerResources, GpuInventory, InstancePhase, NetworkService,
    OwnerReference, Quantity, Result, ServiceType, TallyError, TenantDirectory, TenantId,
    VolumeClaim, WorkloadInstance,
};
use tracing::{debug, instrument, warn};

/// Node label carrying the GPU product name
pub const GPU_PRODUCT_LABEL: &str = "nvidia.com/gpu.product";

/// Node capacity key for GPUs
pub const GPU_CAPACITY_KEY: &str = "nvidia.com/gpu";

/// Orchestration API connection settings
#[derive(Debug, Clone)]
pub struct KubeConfig {
    /// API server base URL
    pub api_url: String,
    /// Service-account token file, re-read on every request
    pub token_path: Option<PathBuf>,
    /// CA bundle for the API server certificate
    pub ca_path: Option<PathBuf>,
    /// Label whose presence marks a namespace as a billable tenant
    pub owner_label: String,
}

impl Default for KubeConfig {
    fn default() -> Self {
        Self {
            api_url: "https://kubernetes.default.svc".to_string(),
            token_path: Some(PathBuf::from(
                "/var/run/secrets/kubernetes.io/serviceaccount/token",
            )),
            ca_path: Some(PathBuf::from(
                "/var/run/secrets/kubernetes.io/serviceaccount/ca.crt",
            )),
            owner_label: "user.sealos.io/owner".to_string(),
        }
    }
}

/// Read-only orchestration API client
pub struct KubeClient {
    http: reqwest::Client,
    api_url: String,
    token_path: Option<PathBuf>,
    owner_label: String,
}

impl KubeClient {
    /// Build a client from settings, loading the CA bundle if configured
    pub async fn new(config: &KubeConfig) -> Result<Self> {
        let mut builder =
            reqwest::Client::builder().timeout(Duration::from_secs(crate::DEFAULT_HTTP_TIMEOUT_SECS));
        if let Some(ca_path) = &config.ca_path {
            let pem = tokio::fs::read(ca_path).await.map_err(|e| {
                TallyError::Config(format!("Failed to read CA bundle {}: {}", ca_path.display(), e))
            })?;
            let cert = reqwest::Certificate::from_pem(&pem)
                .map_err(|e| TallyError::Config(format!("Invalid CA bundle: {}", e)))?;
            builder = builder.add_root_certificate(cert);
        }
        let http = builder
            .build()
            .map_err(|e| TallyError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            api_url: config.api_url.trim_end_matches('/').to_string(),
            token_path: config.token_path.clone(),
            owner_label: config.owner_label.clone(),
        })
    }

    async fn list<T: DeserializeOwned>(&self, path: &str, query: &[(&str, &str)]) -> Result<Vec<T>> {
        let mut request = self.http.get(format!("{}{}", self.api_url, path)).query(query);
        if let Some(token_path) = &self.token_path {
            let token = tokio::fs::read_to_string(token_path).await.map_err(|e| {
                TallyError::Config(format!("Failed to read token {}: {}", token_path.display(), e))
            })?;
            request = request.bearer_auth(token.trim());
        }

        let response = request
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| TallyError::Discovery(format!("GET {} failed: {}", path, e)))?;
        let list: ObjectList<T> = response
            .json()
            .await
            .map_err(|e| TallyError::Discovery(format!("Decoding {} failed: {}", path, e)))?;

        debug!(path, items = list.items.len(), "Listed objects");
        Ok(list.items)
    }
}

#[async_trait]
impl TenantDirectory for KubeClient {
    #[instrument(skip(self))]
    async fn list_tenants(&self) -> Result<Vec<TenantId>> {
        let namespaces: Vec<Namespace> = self
            .list("/api/v1/namespaces", &[("labelSelector", self.owner_label.as_str())])
            .await?;
        Ok(namespaces
            .into_iter()
            .map(|ns| TenantId::new(ns.metadata.name))
            .collect())
    }
}

#[async_trait]
impl ClusterApi for KubeClient {
    async fn list_instances(&self, tenant: &TenantId) -> Result<Vec<WorkloadInstance>> {
        let pods: Vec<Pod> = self
            .list(&format!("/api/v1/namespaces/{}/pods", tenant), &[])
            .await?;
        Ok(pods.into_iter().map(WorkloadInstance::from).collect())
    }

    async fn list_claims(&self, tenant: &TenantId) -> Result<Vec<VolumeClaim>> {
        let claims: Vec<PersistentVolumeClaim> = self
            .list(&format!("/api/v1/namespaces/{}/persistentvolumeclaims", tenant), &[])
            .await?;
        Ok(claims.into_iter().map(VolumeClaim::from).collect())
    }

    async fn list_services(&self, tenant: &TenantId) -> Result<Vec<NetworkService>> {
        let services: Vec<Service> = self
            .list(&format!("/api/v1/namespaces/{}/services", tenant), &[])
            .await?;
        Ok(services.into_iter().map(NetworkService::from).collect())
    }
}

#[async_trait]
impl GpuInventory for KubeClient {
    #[instrument(skip(self))]
    async fn node_gpu_models(&self) -> Result<HashMap<String, String>> {
        let nodes: Vec<Node> = self
            .list("/api/v1/nodes", &[("labelSelector", GPU_PRODUCT_LABEL)])
            .await?;
        Ok(gpu_models(nodes))
    }
}

fn gpu_models(nodes: Vec<Node>) -> HashMap<String, String> {
    nodes
        .into_iter()
        .filter(|node| {
            node.status
                .capacity
                .get(GPU_CAPACITY_KEY)
                .and_then(|raw| parse_quantity(&node.metadata.name, GPU_CAPACITY_KEY, raw))
                .map_or(false, |q| !q.is_zero())
        })
        .filter_map(|node| {
            let product = node.metadata.labels.get(GPU_PRODUCT_LABEL)?.clone();
            Some((node.metadata.name, product))
        })
        .collect()
}

/// Parse one wire quantity, logging and skipping values that do not parse
fn parse_quantity(object: &str, key: &str, raw: &str) -> Option<Quantity> {
    match raw.parse() {
        Ok(quantity) => Some(quantity),
        Err(e) => {
            warn!(object, key, error = %e, "Ignoring unparseable quantity");
            None
        }
    }
}

fn parse_quantities(object: &str, raw: BTreeMap<String, String>) -> BTreeMap<String, Quantity> {
    raw.into_iter()
        .filter_map(|(key, value)| {
            let quantity = parse_quantity(object, &key, &value)?;
            Some((key, quantity))
        })
        .collect()
}

// Wire types

#[derive(Deserialize)]
struct ObjectList<T> {
    #[serde(default = "Vec::new")]
    items: Vec<T>,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct ObjectMeta {
    name: String,
    #[serde(default)]
    labels: BTreeMap<String, String>,
    #[serde(default)]
    owner_references: Vec<WireOwnerReference>,
}

#[derive(Deserialize)]
struct WireOwnerReference {
    kind: String,
    name: String,
    #[serde(default)]
    controller: Option<bool>,
}

#[derive(Deserialize)]
struct Namespace {
    metadata: ObjectMeta,
}

#[derive(Deserialize)]
struct Pod {
    metadata: ObjectMeta,
    #[serde(default)]
    spec: PodSpec,
    #[serde(default)]
    status: PodStatus,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct PodSpec {
    #[serde(default)]
    node_name: Option<String>,
    #[serde(default)]
    containers: Vec<Container>,
}

#[derive(Deserialize)]
struct Container {
    #[serde(default)]
    resources: Resources,
}

// Quantities stay raw here so one odd value cannot fail a whole list
#[derive(Deserialize, Default)]
struct Resources {
    #[serde(default)]
    limits: BTreeMap<String, String>,
    #[serde(default)]
    requests: BTreeMap<String, String>,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct PodStatus {
    #[serde(default)]
    phase: Option<String>,
    #[serde(default)]
    start_time: Option<DateTime<Utc>>,
    #[serde(default)]
    container_statuses: Vec<ContainerStatus>,
}

#[derive(Deserialize)]
struct ContainerStatus {
    #[serde(default)]
    state: ContainerState,
}

#[derive(Deserialize, Default)]
struct ContainerState {
    #[serde(default)]
    terminated: Option<TerminatedState>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TerminatedState {
    #[serde(default)]
    finished_at: Option<DateTime<Utc>>,
}

#[derive(Deserialize)]
struct PersistentVolumeClaim {
    metadata: ObjectMeta,
    #[serde(default)]
    spec: ClaimSpec,
    #[serde(default)]
    status: ClaimStatus,
}

#[derive(Deserialize, Default)]
struct ClaimSpec {
    #[serde(default)]
    resources: Resources,
}

#[derive(Deserialize, Default)]
struct ClaimStatus {
    #[serde(default)]
    phase: Option<String>,
}

#[derive(Deserialize)]
struct Service {
    metadata: ObjectMeta,
    #[serde(default)]
    spec: ServiceSpec,
}

#[derive(Deserialize, Default)]
struct ServiceSpec {
    #[serde(default, rename = "type")]
    service_type: Option<String>,
}

#[derive(Deserialize)]
struct Node {
    metadata: ObjectMeta,
    #[serde(default)]
    status: NodeStatus,
}

#[derive(Deserialize, Default)]
struct NodeStatus {
    #[serde(default)]
    capacity: BTreeMap<String, String>,
}

impl From<Pod> for WorkloadInstance {
    fn from(pod: Pod) -> Self {
        let statuses = &pod.status.container_statuses;
        // finished only once every container has terminated
        let finished_at = if !statuses.is_empty()
            && statuses.iter().all(|s| s.state.terminated.is_some())
        {
            statuses
                .iter()
                .filter_map(|s| s.state.terminated.as_ref()?.finished_at)
                .max()
        } else {
            None
        };

        let name = pod.metadata.name;
        let containers = pod
            .spec
            .containers
            .into_iter()
            .map(|c| ContainerResources {
                limits: parse_quantities(&name, c.resources.limits),
                requests: parse_quantities(&name, c.resources.requests),
            })
            .collect();

        WorkloadInstance {
            name,
            labels: pod.metadata.labels,
            owners: pod
                .metadata
                .owner_references
                .into_iter()
                .map(|o| OwnerReference {
                    kind: o.kind,
                    name: o.name,
                    controller: o.controller.unwrap_or(false),
                })
                .collect(),
            node_name: pod.spec.node_name.filter(|n| !n.is_empty()),
            phase: InstancePhase::parse(pod.status.phase.as_deref().unwrap_or_default()),
            started_at: pod.status.start_time,
            finished_at,
            containers,
        }
    }
}

impl From<PersistentVolumeClaim> for VolumeClaim {
    fn from(pvc: PersistentVolumeClaim) -> Self {
        let phase = match pvc.status.phase.as_deref() {
            Some("Bound") => ClaimPhase::Bound,
            Some("Lost") => ClaimPhase::Lost,
            _ => ClaimPhase::Pending,
        };
        let key = tally_common::types::cluster::STORAGE_KEY;
        let storage = pvc
            .spec
            .resources
            .requests
            .get(key)
            .and_then(|raw| parse_quantity(&pvc.metadata.name, key, raw))
            .unwrap_or(Quantity::ZERO);
        VolumeClaim {
            name: pvc.metadata.name,
            phase,
            storage,
        }
    }
}

impl From<Service> for NetworkService {
    fn from(svc: Service) -> Self {
        NetworkService {
            name: svc.metadata.name,
            service_type: ServiceType::parse(svc.spec.service_type.as_deref().unwrap_or_default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_pod_conversion() {
        let json = r#"{
            "items": [{
                "metadata": {
                    "name": "web-5d8f7c9b4-x2x7k",
                    "labels": {"app": "web"},
                    "ownerReferences": [
                        {"kind": "ReplicaSet", "name": "web-5d8f7c9b4", "controller": true}
                    ]
                },
                "spec": {
                    "nodeName": "node-1",
                    "containers": [
                        {"resources": {"limits": {"cpu": "1", "nvidia.com/gpu": "1"},
                                       "requests": {"memory": "256Mi"}}},
                        {}
                    ]
                },
                "status": {"phase": "Running", "startTime": "2024-03-01T10:00:00Z"}
            }]
        }"#;
        let list: ObjectList<Pod> = serde_json::from_str(json).unwrap();
        let instance = WorkloadInstance::from(list.items.into_iter().next().unwrap());

        assert_eq!(instance.name, "web-5d8f7c9b4-x2x7k");
        assert_eq!(instance.node_name.as_deref(), Some("node-1"));
        assert_eq!(instance.phase, InstancePhase::Running);
        assert_eq!(
            instance.started_at,
            Some(Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap())
        );
        assert!(instance.owners[0].controller);
        assert_eq!(instance.containers.len(), 2);
        assert_eq!(instance.containers[0].limits["cpu"].milli(), 1000);
        assert!(instance.finished_at.is_none());
    }

    #[test]
    fn test_exponent_and_bad_quantities_keep_the_list() {
        let json = r#"{
            "items": [
                {"metadata": {"name": "web-0"},
                 "spec": {"containers": [{"resources": {"limits": {"memory": "256Mi"}}}]},
                 "status": {"phase": "Running"}},
                {"metadata": {"name": "web-1"},
                 "spec": {"containers": [{"resources": {
                     "limits": {"memory": "129e6", "cpu": "12Zi"},
                     "requests": {"cpu": "500m"}}}]},
                 "status": {"phase": "Running"}}
            ]
        }"#;
        let list: ObjectList<Pod> = serde_json::from_str(json).unwrap();
        let instances: Vec<WorkloadInstance> =
            list.items.into_iter().map(WorkloadInstance::from).collect();

        assert_eq!(instances.len(), 2);
        assert_eq!(
            instances[0].containers[0].limits["memory"],
            "256Mi".parse::<Quantity>().unwrap()
        );
        let second = &instances[1].containers[0];
        assert_eq!(second.limits["memory"], Quantity::from_units(129_000_000));
        assert!(!second.limits.contains_key("cpu"));
        assert_eq!(second.limit_or_request("cpu").milli(), 500);
    }

    #[test]
    fn test_finished_pod_takes_latest_termination() {
        let json = r#"{
            "metadata": {"name": "job-abc"},
            "spec": {"nodeName": "", "containers": []},
            "status": {
                "phase": "Succeeded",
                "containerStatuses": [
                    {"state": {"terminated": {"finishedAt": "2024-03-01T10:01:00Z"}}},
                    {"state": {"terminated": {"finishedAt": "2024-03-01T10:03:00Z"}}}
                ]
            }
        }"#;
        let pod: Pod = serde_json::from_str(json).unwrap();
        let instance = WorkloadInstance::from(pod);
        assert_eq!(instance.phase, InstancePhase::Succeeded);
        assert!(instance.node_name.is_none());
        assert_eq!(
            instance.finished_at,
            Some(Utc.with_ymd_and_hms(2024, 3, 1, 10, 3, 0).unwrap())
        );
    }

    #[test]
    fn test_claim_and_service_conversion() {
        let pvc: PersistentVolumeClaim = serde_json::from_str(
            r#"{"metadata": {"name": "data-db-0"},
                "spec": {"resources": {"requests": {"storage": "10Gi"}}},
                "status": {"phase": "Bound"}}"#,
        )
        .unwrap();
        let claim = VolumeClaim::from(pvc);
        assert_eq!(claim.phase, ClaimPhase::Bound);
        assert_eq!(claim.storage, "10Gi".parse::<Quantity>().unwrap());

        let svc: Service = serde_json::from_str(
            r#"{"metadata": {"name": "ssh"}, "spec": {"type": "NodePort"}}"#,
        )
        .unwrap();
        assert_eq!(NetworkService::from(svc).service_type, ServiceType::NodePort);
    }

    #[test]
    fn test_gpu_models_require_capacity() {
        let nodes: ObjectList<Node> = serde_json::from_str(
            r#"{"items": [
                {"metadata": {"name": "gpu-1", "labels": {"nvidia.com/gpu.product": "NVIDIA-A100"}},
                 "status": {"capacity": {"nvidia.com/gpu": "8"}}},
                {"metadata": {"name": "gpu-2", "labels": {"nvidia.com/gpu.product": "Tesla-T4"}},
                 "status": {"capacity": {"nvidia.com/gpu": "0"}}},
                {"metadata": {"name": "gpu-3", "labels": {"nvidia.com/gpu.product": "NVIDIA-H100"}},
                 "status": {"capacity": {"nvidia.com/gpu": "8e0", "memory": "5e"}}},
                {"metadata": {"name": "cpu-1"}, "status": {"capacity": {"cpu": "64"}}}
            ]}"#,
        )
        .unwrap();
        let models = gpu_models(nodes.items);
        assert_eq!(models.len(), 2);
        assert_eq!(models["gpu-1"], "NVIDIA-A100");
        assert_eq!(models["gpu-3"], "NVIDIA-H100");
    }
}
