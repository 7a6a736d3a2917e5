//! # Tally Common
//!
//! Shared types, errors, and collaborator contracts for the Tally usage meter.
//!
//! ## Core Types
//!
//! - [`Quantity`]: raw machine quantity at milli-unit precision
//! - [`ResourceKind`]/[`PropertyTable`]: resource dimensions and their billing units
//! - [`EntityIdentity`]: `(kind, name)` a tenant's usage is attributed to
//! - [`UsageSample`]: one converted, persisted usage observation
//!
//! ## Collaborators
//!
//! - [`source`]: tenant discovery, cluster listing, GPU inventory,
//!   object storage and traffic counters

pub mod error;
pub mod source;
pub mod types;

// Re-export commonly used types at crate root
pub use error::{ClassificationError, ConversionError, Result, TallyError};
pub use source::{ClusterApi, GpuInventory, ObjectStorage, TenantDirectory, TrafficSource};
pub use types::{
    cluster::{
        BucketUsage, ClaimPhase, ContainerResources, InstancePhase, NetworkService,
        OwnerReference, ServiceType, TenantId, VolumeClaim, WorkloadInstance,
    },
    identity::{EntityIdentity, EntityKind},
    property::{PropertyDefinition, PropertyTable, ResourceKind},
    quantity::Quantity,
    sample::UsageSample,
};

/// Tally version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Raw node-port reservation charged per exposed service
pub const NODE_PORT_RAW_COST: u64 = 1000;

/// Default number of tenants metered concurrently
pub const DEFAULT_CONCURRENCY_LIMIT: usize = 1000;

/// Default sample retention in days
pub const DEFAULT_RETENTION_DAYS: u32 = 30;
