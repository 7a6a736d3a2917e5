//! Orchestration snapshots
//!
//! Plain views of the cluster objects the meter reads. Adapters translate
//! their client-specific wire types into these so the metering engine never
//! touches an orchestration SDK directly.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::quantity::Quantity;

/// Container resource key for CPU
pub const CPU_KEY: &str = "cpu";
/// Container resource key for memory
pub const MEMORY_KEY: &str = "memory";
/// Claim resource key for storage
pub const STORAGE_KEY: &str = "storage";
/// Container limit key for NVIDIA accelerators
pub const GPU_LIMIT_KEY: &str = "nvidia.com/gpu";

/// Tenant (namespace) identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TenantId(String);

impl TenantId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TenantId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Lifecycle phase of a workload instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InstancePhase {
    Pending,
    Running,
    Succeeded,
    Failed,
    Unknown,
}

impl InstancePhase {
    pub fn parse(s: &str) -> Self {
        match s {
            "Pending" => InstancePhase::Pending,
            "Running" => InstancePhase::Running,
            "Succeeded" => InstancePhase::Succeeded,
            "Failed" => InstancePhase::Failed,
            _ => InstancePhase::Unknown,
        }
    }
}

/// Controller that owns a workload instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnerReference {
    pub kind: String,
    pub name: String,
    /// Whether this owner is the managing controller
    pub controller: bool,
}

/// Declared resources of one container
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerResources {
    pub limits: BTreeMap<String, Quantity>,
    pub requests: BTreeMap<String, Quantity>,
}

impl ContainerResources {
    /// Limit for `key` if set, else the request, else zero
    pub fn limit_or_request(&self, key: &str) -> Quantity {
        self.limits
            .get(key)
            .or_else(|| self.requests.get(key))
            .copied()
            .unwrap_or(Quantity::ZERO)
    }
}

/// One scheduled or pending unit of compute (pod)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkloadInstance {
    pub name: String,
    pub labels: BTreeMap<String, String>,
    pub owners: Vec<OwnerReference>,
    /// Node the instance is bound to, if scheduled
    pub node_name: Option<String>,
    pub phase: InstancePhase,
    pub started_at: Option<DateTime<Utc>>,
    /// Latest container termination time, if every container has finished
    pub finished_at: Option<DateTime<Utc>>,
    pub containers: Vec<ContainerResources>,
}

impl WorkloadInstance {
    /// Managing controller, falling back to the first owner
    pub fn controller(&self) -> Option<&OwnerReference> {
        self.owners
            .iter()
            .find(|o| o.controller)
            .or_else(|| self.owners.first())
    }
}

/// Binding phase of a volume claim
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClaimPhase {
    Pending,
    Bound,
    Lost,
}

/// Persistent storage allocation (PVC)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VolumeClaim {
    pub name: String,
    pub phase: ClaimPhase,
    /// Declared storage request
    pub storage: Quantity,
}

/// Exposure type of a network service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServiceType {
    ClusterIp,
    NodePort,
    LoadBalancer,
    ExternalName,
    Other(String),
}

impl ServiceType {
    pub fn parse(s: &str) -> Self {
        match s {
            "ClusterIP" | "" => ServiceType::ClusterIp,
            "NodePort" => ServiceType::NodePort,
            "LoadBalancer" => ServiceType::LoadBalancer,
            "ExternalName" => ServiceType::ExternalName,
            other => ServiceType::Other(other.to_string()),
        }
    }
}

/// Network service exposed by a tenant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkService {
    pub name: String,
    pub service_type: ServiceType,
}

/// Object-storage bucket footprint
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketUsage {
    pub bytes: u64,
    pub objects: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limit_preferred_over_request() {
        let container = ContainerResources {
            limits: BTreeMap::from([(CPU_KEY.to_string(), "2".parse().unwrap())]),
            requests: BTreeMap::from([
                (CPU_KEY.to_string(), "500m".parse().unwrap()),
                (MEMORY_KEY.to_string(), "128Mi".parse().unwrap()),
            ]),
        };
        assert_eq!(container.limit_or_request(CPU_KEY).milli(), 2000);
        assert_eq!(
            container.limit_or_request(MEMORY_KEY),
            "128Mi".parse::<Quantity>().unwrap()
        );
        assert_eq!(container.limit_or_request(GPU_LIMIT_KEY), Quantity::ZERO);
    }

    #[test]
    fn test_controller_owner() {
        let instance = WorkloadInstance {
            name: "web-7d9f8-abcde".into(),
            labels: BTreeMap::new(),
            owners: vec![
                OwnerReference { kind: "Node".into(), name: "n1".into(), controller: false },
                OwnerReference { kind: "ReplicaSet".into(), name: "web-7d9f8".into(), controller: true },
            ],
            node_name: None,
            phase: InstancePhase::Pending,
            started_at: None,
            finished_at: None,
            containers: vec![],
        };
        assert_eq!(instance.controller().unwrap().kind, "ReplicaSet");
    }

    #[test]
    fn test_parse_enums() {
        assert_eq!(InstancePhase::parse("Running"), InstancePhase::Running);
        assert_eq!(InstancePhase::parse("Weird"), InstancePhase::Unknown);
        assert_eq!(ServiceType::parse("NodePort"), ServiceType::NodePort);
        assert_eq!(ServiceType::parse(""), ServiceType::ClusterIp);
    }
}
