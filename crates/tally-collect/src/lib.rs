//! # Tally Collect
//!
//! Adapters from external systems to the collaborator contracts in
//! `tally-common`:
//!
//! - [`KubeClient`]: orchestration API (tenants, pods, claims, services, GPU nodes)
//! - [`PromClient`]: Prometheus instant queries
//! - [`PromObjectStorage`]: MinIO bucket usage and egress via Prometheus
//! - [`PromTraffic`]: per-entity sent-bytes counters via Prometheus

pub mod kube;
pub mod object_storage;
pub mod prometheus;
pub mod traffic;

pub use kube::{KubeClient, KubeConfig};
pub use object_storage::PromObjectStorage;
pub use prometheus::PromClient;
pub use traffic::PromTraffic;

/// Default request timeout for adapter HTTP calls
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;
