//! Usage samples
//!
//! A sample is one converted observation of one entity. Samples are never
//! mutated after creation and never carry an empty or all-zero `used` map.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::identity::{EntityIdentity, EntityKind};

/// One persisted usage observation
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UsageSample {
    /// Tenant the usage is billed to
    pub category: String,
    /// Entity kind the usage is attributed to
    pub kind: EntityKind,
    /// Entity name the usage is attributed to
    pub name: String,
    /// Billed units keyed by billing-unit enum id
    pub used: BTreeMap<u8, u64>,
    /// Observation time
    pub observed_at: DateTime<Utc>,
}

impl UsageSample {
    /// Create a sample, dropping zero entries.
    ///
    /// Returns `None` when nothing measurable remains.
    pub fn new(
        category: impl Into<String>,
        entity: EntityIdentity,
        used: BTreeMap<u8, u64>,
        observed_at: DateTime<Utc>,
    ) -> Option<Self> {
        let used: BTreeMap<u8, u64> = used.into_iter().filter(|(_, v)| *v > 0).collect();
        if used.is_empty() {
            return None;
        }
        Some(Self {
            category: category.into(),
            kind: entity.kind,
            name: entity.name,
            used,
            observed_at,
        })
    }

    /// Identity the sample is attributed to
    pub fn identity(&self) -> EntityIdentity {
        EntityIdentity::new(self.kind.clone(), self.name.clone())
    }
}
