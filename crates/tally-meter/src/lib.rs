//! # Tally Meter
//!
//! Periodic usage metering for multi-tenant clusters.
//!
//! Every minute the [`FanOut`] runs a [`TenantAggregator`] for each tenant
//! under a shared concurrency ceiling; each pass observes the tenant's
//! workloads, claims, node-port services and buckets, sums raw usage per
//! identity and persists converted [`UsageSample`](tally_common::UsageSample)s.
//! Every hour the [`TrafficMeter`] bills network egress for the identities
//! recorded in the previous window. The [`Scheduler`] owns the loops.

pub mod accumulator;
pub mod aggregator;
pub mod config;
pub mod fanout;
pub mod gpu;
pub mod identity;
pub mod retry;
pub mod scheduler;
pub mod traffic;

pub use accumulator::{RawAccumulator, TenantUsage};
pub use aggregator::TenantAggregator;
pub use config::MeterConfig;
pub use fanout::{FanOut, PassReport};
pub use gpu::GpuResolver;
pub use identity::{IdentityResolver, WorkloadRule};
pub use retry::RetryPolicy;
pub use scheduler::{Scheduler, SchedulerHandle};
pub use traffic::{TrafficMeter, TrafficReport, TrafficWindow};
