//! Bounded fan-out over tenants
//!
//! Every tenant gets its own task; a process-wide semaphore caps how many
//! are metering at once. The pass returns only after every task finished.

use std::sync::Arc;
use std::time::Instant;

use tally_common::{Result, TallyError, TenantDirectory, TenantId};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info, instrument, warn};

use crate::aggregator::TenantAggregator;

/// Outcome of one fan-out pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassReport {
    /// Tenants dispatched
    pub tenants: usize,
    /// Tenants whose samples were written
    pub metered: usize,
    /// Samples written across all tenants
    pub samples: usize,
    /// Tenants that failed, with the error
    pub failures: Vec<(TenantId, String)>,
    /// Tasks that panicked
    pub panicked: usize,
}

/// Dispatches the aggregator over every tenant under a concurrency ceiling
pub struct FanOut {
    tenants: Arc<dyn TenantDirectory>,
    aggregator: Arc<TenantAggregator>,
    admission: Arc<Semaphore>,
}

impl FanOut {
    pub fn new(
        tenants: Arc<dyn TenantDirectory>,
        aggregator: Arc<TenantAggregator>,
        concurrency_limit: usize,
    ) -> Self {
        Self {
            tenants,
            aggregator,
            admission: Arc::new(Semaphore::new(concurrency_limit.max(1))),
        }
    }

    /// Slots currently free
    pub fn available(&self) -> usize {
        self.admission.available_permits()
    }

    /// Discover tenants and meter them all
    #[instrument(skip(self))]
    pub async fn run(&self) -> Result<PassReport> {
        let tenants = self.tenants.list_tenants().await?;
        Ok(self.run_tenants(tenants).await)
    }

    /// Meter the given tenants, waiting for all of them
    pub async fn run_tenants(&self, tenants: Vec<TenantId>) -> PassReport {
        let mut report = PassReport {
            tenants: tenants.len(),
            ..Default::default()
        };
        if tenants.is_empty() {
            warn!("No tenants to meter");
            return report;
        }

        let started = Instant::now();
        let mut tasks = JoinSet::new();
        for tenant in tenants {
            let admission = self.admission.clone();
            let aggregator = self.aggregator.clone();
            tasks.spawn(async move {
                let result = match admission.acquire_owned().await {
                    Ok(_permit) => aggregator.meter(&tenant).await,
                    Err(e) => Err(TallyError::Internal(format!("admission closed: {}", e))),
                };
                (tenant, result)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, Ok(samples))) => {
                    report.metered += 1;
                    report.samples += samples;
                }
                Ok((tenant, Err(e))) => {
                    error!(tenant = %tenant, error = %e, "Tenant metering failed");
                    report.failures.push((tenant, e.to_string()));
                }
                Err(e) => {
                    error!(error = %e, "Tenant metering task panicked");
                    report.panicked += 1;
                }
            }
        }

        info!(
            tenants = report.tenants,
            samples = report.samples,
            failed = report.failures.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Fan-out pass complete"
        );
        report
    }
}
