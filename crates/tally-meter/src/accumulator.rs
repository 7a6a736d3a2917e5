//! Raw usage accumulation
//!
//! Contributions are summed per identity at raw precision and only converted
//! to billed units once the whole tenant has been observed, so two 0.4-core
//! instances bill as one core rather than two.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use tally_common::{
    ConversionError, EntityIdentity, PropertyTable, Quantity, ResourceKind, TenantId, UsageSample,
};
use tracing::error;

/// Running raw totals for one identity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawAccumulator {
    quantities: BTreeMap<ResourceKind, Quantity>,
}

impl Default for RawAccumulator {
    fn default() -> Self {
        Self::new()
    }
}

impl RawAccumulator {
    /// Accumulator holding a zero for every base resource kind
    pub fn new() -> Self {
        Self {
            quantities: ResourceKind::BASE
                .iter()
                .map(|kind| (kind.clone(), Quantity::ZERO))
                .collect(),
        }
    }

    pub fn add(&mut self, kind: ResourceKind, quantity: Quantity) {
        *self.quantities.entry(kind).or_insert(Quantity::ZERO) += quantity;
    }

    pub fn get(&self, kind: &ResourceKind) -> Quantity {
        self.quantities.get(kind).copied().unwrap_or(Quantity::ZERO)
    }

    /// True when nothing measurable was accumulated
    pub fn is_zero(&self) -> bool {
        self.quantities.values().all(Quantity::is_zero)
    }

    /// Billed units per enum id, plus the kinds that could not be converted.
    ///
    /// Zero quantities are not looked up, so an unconfigured kind that was
    /// never used is not an error.
    pub fn convert(&self, table: &PropertyTable) -> (BTreeMap<u8, u64>, Vec<ConversionError>) {
        let mut used = BTreeMap::new();
        let mut errors = Vec::new();
        for (kind, quantity) in &self.quantities {
            if quantity.is_zero() {
                continue;
            }
            match table.convert(kind, *quantity) {
                Ok((enum_id, billed)) => {
                    let entry = used.entry(enum_id).or_insert(0u64);
                    *entry = entry.saturating_add(billed);
                }
                Err(e) => errors.push(e),
            }
        }
        (used, errors)
    }
}

/// Per-identity accumulators for one tenant pass
#[derive(Debug, Default)]
pub struct TenantUsage {
    entries: BTreeMap<EntityIdentity, RawAccumulator>,
}

impl TenantUsage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accumulator for `identity`, created zeroed on first sight
    pub fn entry(&mut self, identity: &EntityIdentity) -> &mut RawAccumulator {
        self.entries.entry(identity.clone()).or_default()
    }

    pub fn add(&mut self, identity: &EntityIdentity, kind: ResourceKind, quantity: Quantity) {
        self.entry(identity).add(kind, quantity);
    }

    /// Convert every identity into a sample, dropping the all-zero ones.
    ///
    /// Conversion failures are logged and only the failing kind is left out.
    pub fn into_samples(
        self,
        tenant: &TenantId,
        table: &PropertyTable,
        observed_at: DateTime<Utc>,
    ) -> Vec<UsageSample> {
        let mut samples = Vec::with_capacity(self.entries.len());
        for (identity, raw) in self.entries {
            let (used, errors) = raw.convert(table);
            for e in errors {
                error!(tenant = %tenant, entity = %identity, error = %e, "Dropping unconvertible usage");
            }
            if let Some(sample) = UsageSample::new(tenant.as_str(), identity, used, observed_at) {
                samples.push(sample);
            }
        }
        samples
    }
}
