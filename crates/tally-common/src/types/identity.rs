//! Billable entity identity
//!
//! Everything metered inside a tenant is attributed to an `(kind, name)`
//! pair. Distinct physical resources that resolve to the same identity are
//! summed into a single usage sample.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Kind of billable entity
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EntityKind {
    /// Application launched from the app manager
    App,
    /// Managed database cluster
    Database,
    /// Batch job
    Job,
    /// Web terminal
    Terminal,
    /// Controller-owned workload, keyed by the owner's kind
    Workload(String),
    /// Bare instance with no owner
    Pod,
    VolumeClaim,
    NodePort,
    ObjectStorage,
    /// GPU product pseudo-resource
    Gpu,
}

impl EntityKind {
    pub fn as_str(&self) -> &str {
        match self {
            EntityKind::App => "APP",
            EntityKind::Database => "DB",
            EntityKind::Job => "JOB",
            EntityKind::Terminal => "TERMINAL",
            EntityKind::Workload(kind) => kind,
            EntityKind::Pod => "POD",
            EntityKind::VolumeClaim => "PVC",
            EntityKind::NodePort => "NODEPORT",
            EntityKind::ObjectStorage => "OBJECT-STORAGE",
            EntityKind::Gpu => "GPU",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<String> for EntityKind {
    fn from(s: String) -> Self {
        match s.as_str() {
            "APP" => EntityKind::App,
            "DB" => EntityKind::Database,
            "JOB" => EntityKind::Job,
            "TERMINAL" => EntityKind::Terminal,
            "POD" => EntityKind::Pod,
            "PVC" => EntityKind::VolumeClaim,
            "NODEPORT" => EntityKind::NodePort,
            "OBJECT-STORAGE" => EntityKind::ObjectStorage,
            "GPU" => EntityKind::Gpu,
            _ => EntityKind::Workload(s),
        }
    }
}

impl From<&str> for EntityKind {
    fn from(s: &str) -> Self {
        EntityKind::from(s.to_string())
    }
}

impl From<EntityKind> for String {
    fn from(kind: EntityKind) -> Self {
        kind.as_str().to_string()
    }
}

/// Stable identity of a billable thing within a tenant
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityIdentity {
    pub kind: EntityKind,
    pub name: String,
}

impl EntityIdentity {
    pub fn new(kind: EntityKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
        }
    }
}

impl fmt::Display for EntityIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_string_forms() {
        for kind in [
            EntityKind::App,
            EntityKind::Database,
            EntityKind::Job,
            EntityKind::Terminal,
            EntityKind::Pod,
            EntityKind::VolumeClaim,
            EntityKind::NodePort,
            EntityKind::ObjectStorage,
            EntityKind::Gpu,
            EntityKind::Workload("StatefulSet".into()),
        ] {
            assert_eq!(EntityKind::from(kind.as_str()), kind);
        }
    }

    #[test]
    fn test_identity_json() {
        let id = EntityIdentity::new(EntityKind::ObjectStorage, "alice-assets");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, r#"{"kind":"OBJECT-STORAGE","name":"alice-assets"}"#);
        assert_eq!(id.to_string(), "OBJECT-STORAGE/alice-assets");
    }
}
