//! Hourly traffic metering
//!
//! For each tenant, bytes sent during an hour window are billed against the
//! identities already recorded in that window. Windows are half-open and
//! chained end to start.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, DurationRound, Utc};
use tally_common::{
    ConversionError, EntityKind, PropertyTable, Quantity, ResourceKind, Result, TenantDirectory,
    TenantId, TrafficSource, UsageSample,
};
use tally_store::UsageStore;
use tracing::{error, info, instrument};

/// Half-open `[start, end)` traffic window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrafficWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TrafficWindow {
    pub fn period() -> Duration {
        Duration::hours(1)
    }

    /// Partial window from `now` to the next hour boundary
    pub fn first(now: DateTime<Utc>) -> Self {
        Self {
            start: now,
            end: next_boundary(now, Self::period()),
        }
    }

    /// The window directly following this one
    pub fn next(&self) -> Self {
        Self {
            start: self.end,
            end: self.end + Self::period(),
        }
    }

    /// Timestamp for samples summarizing this window
    pub fn sample_time(&self) -> DateTime<Utc> {
        self.end - Duration::minutes(1)
    }
}

/// First multiple of `period` strictly after `now`
pub fn next_boundary(now: DateTime<Utc>, period: Duration) -> DateTime<Utc> {
    match now.duration_trunc(period) {
        Ok(floor) => floor + period,
        Err(_) => now + period,
    }
}

/// Outcome of one traffic pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrafficReport {
    pub tenants: usize,
    pub samples: usize,
    pub failures: Vec<(TenantId, String)>,
}

/// Bills per-identity network egress for a window
pub struct TrafficMeter {
    tenants: Arc<dyn TenantDirectory>,
    store: Arc<dyn UsageStore>,
    traffic: Arc<dyn TrafficSource>,
    properties: Arc<PropertyTable>,
}

impl TrafficMeter {
    pub fn new(
        tenants: Arc<dyn TenantDirectory>,
        store: Arc<dyn UsageStore>,
        traffic: Arc<dyn TrafficSource>,
        properties: Arc<PropertyTable>,
    ) -> Self {
        Self {
            tenants,
            store,
            traffic,
            properties,
        }
    }

    /// Run one pass over every tenant
    #[instrument(skip(self), fields(start = %window.start, end = %window.end))]
    pub async fn run(&self, window: TrafficWindow) -> Result<TrafficReport> {
        if self.properties.get(&ResourceKind::Network).is_none() {
            return Err(ConversionError::MissingProperty(ResourceKind::Network.name()).into());
        }
        let tenants = self.tenants.list_tenants().await?;
        let mut report = TrafficReport {
            tenants: tenants.len(),
            ..Default::default()
        };

        for tenant in tenants {
            match self.meter_tenant(&tenant, window).await {
                Ok(written) => report.samples += written,
                Err(e) => {
                    error!(tenant = %tenant, error = %e, "Traffic metering failed");
                    report.failures.push((tenant, e.to_string()));
                }
            }
        }

        info!(
            tenants = report.tenants,
            samples = report.samples,
            failed = report.failures.len(),
            "Traffic pass complete"
        );
        Ok(report)
    }

    /// Meter one tenant; the first failing identity aborts the rest
    pub async fn meter_tenant(&self, tenant: &TenantId, window: TrafficWindow) -> Result<usize> {
        let identities = self
            .store
            .distinct_identities(window.start, window.end, tenant)
            .await?;

        let mut written = 0;
        // bucket egress is already billed by the minute pass
        for identity in identities
            .into_iter()
            .filter(|id| id.kind != EntityKind::ObjectStorage)
        {
            let bytes = self
                .traffic
                .sent_bytes(window.start, window.end, tenant, &identity)
                .await?;
            let (enum_id, billed) = self
                .properties
                .convert(&ResourceKind::Network, Quantity::from_units(bytes))?;
            let sample = UsageSample::new(
                tenant.as_str(),
                identity,
                BTreeMap::from([(enum_id, billed)]),
                window.sample_time(),
            );
            if let Some(sample) = sample {
                self.store.insert_samples(std::slice::from_ref(&sample)).await?;
                written += 1;
            }
        }
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_first_window_ends_on_hour() {
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 10, 17, 42).unwrap();
        let window = TrafficWindow::first(now);
        assert_eq!(window.start, now);
        assert_eq!(window.end, Utc.with_ymd_and_hms(2024, 3, 1, 11, 0, 0).unwrap());
        assert_eq!(
            window.sample_time(),
            Utc.with_ymd_and_hms(2024, 3, 1, 10, 59, 0).unwrap()
        );
    }

    #[test]
    fn test_windows_chain() {
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 10, 17, 42).unwrap();
        let mut window = TrafficWindow::first(now);
        for _ in 0..5 {
            let next = window.next();
            assert_eq!(next.start, window.end);
            assert_eq!(next.end - next.start, Duration::hours(1));
            window = next;
        }
    }

    #[test]
    fn test_boundary_on_exact_hour_moves_forward() {
        let on_hour = Utc.with_ymd_and_hms(2024, 3, 1, 11, 0, 0).unwrap();
        assert_eq!(
            next_boundary(on_hour, Duration::hours(1)),
            Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
        );
        assert_eq!(
            next_boundary(on_hour, Duration::minutes(1)),
            Utc.with_ymd_and_hms(2024, 3, 1, 11, 1, 0).unwrap()
        );
    }
}
