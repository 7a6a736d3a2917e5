//! Billing properties
//!
//! Maps each resource kind to the platform's billing-unit enum id and the
//! quantum one billed unit stands for. The table is built once at start-up
//! and shared read-only afterwards.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::quantity::Quantity;
use crate::error::{ConversionError, Result, TallyError};

/// Prefix of per-product GPU resource kinds
pub const GPU_RESOURCE_PREFIX: &str = "gpu-";

/// A raw resource dimension that can be metered
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResourceKind {
    Cpu,
    Memory,
    Storage,
    Network,
    NodePorts,
    /// Accelerator time, per GPU product
    Gpu(String),
}

impl ResourceKind {
    /// Kinds every accumulator starts with
    pub const BASE: [ResourceKind; 5] = [
        ResourceKind::Cpu,
        ResourceKind::Memory,
        ResourceKind::Storage,
        ResourceKind::Network,
        ResourceKind::NodePorts,
    ];

    /// Name used as the property-table key
    pub fn name(&self) -> String {
        match self {
            ResourceKind::Cpu => "cpu".to_string(),
            ResourceKind::Memory => "memory".to_string(),
            ResourceKind::Storage => "storage".to_string(),
            ResourceKind::Network => "network".to_string(),
            ResourceKind::NodePorts => "services.nodeports".to_string(),
            ResourceKind::Gpu(product) => format!("{GPU_RESOURCE_PREFIX}{product}"),
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

impl FromStr for ResourceKind {
    type Err = TallyError;

    fn from_str(s: &str) -> Result<Self> {
        let kind = match s {
            "cpu" => ResourceKind::Cpu,
            "memory" => ResourceKind::Memory,
            "storage" => ResourceKind::Storage,
            "network" => ResourceKind::Network,
            "services.nodeports" => ResourceKind::NodePorts,
            other => match other.strip_prefix(GPU_RESOURCE_PREFIX) {
                Some(product) if !product.is_empty() => ResourceKind::Gpu(product.to_string()),
                _ => {
                    return Err(crate::error::ClassificationError::UnknownResource(
                        other.to_string(),
                    )
                    .into())
                }
            },
        };
        Ok(kind)
    }
}

/// Billing definition for one resource kind
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyDefinition {
    /// Resource kind name (`cpu`, `memory`, `gpu-<product>`, ...)
    pub name: String,
    /// Billing-unit enum id
    #[serde(rename = "enum")]
    pub enum_id: u8,
    /// Raw quantity one billed unit covers
    pub unit: Quantity,
}

impl PropertyDefinition {
    pub fn new(name: impl Into<String>, enum_id: u8, unit: Quantity) -> Self {
        Self {
            name: name.into(),
            enum_id,
            unit,
        }
    }
}

/// Lookup table from resource kind name to its billing definition
#[derive(Debug, Clone)]
pub struct PropertyTable {
    by_name: HashMap<String, PropertyDefinition>,
}

impl PropertyTable {
    /// Build a table, rejecting unknown kinds, zero units and duplicate names
    pub fn new(definitions: impl IntoIterator<Item = PropertyDefinition>) -> Result<Self> {
        let mut by_name = HashMap::new();
        for def in definitions {
            def.name.parse::<ResourceKind>()?;
            if def.unit.is_zero() {
                return Err(ConversionError::ZeroUnit(def.name).into());
            }
            if by_name.contains_key(&def.name) {
                return Err(TallyError::Config(format!(
                    "duplicate property definition {}",
                    def.name
                )));
            }
            by_name.insert(def.name.clone(), def);
        }
        Ok(Self { by_name })
    }

    /// The platform's standard billing units
    pub fn default_definitions() -> Vec<PropertyDefinition> {
        vec![
            PropertyDefinition::new("cpu", 0, Quantity::from_milli(1)),
            PropertyDefinition::new("memory", 1, Quantity::from_units(1 << 20)),
            PropertyDefinition::new("storage", 2, Quantity::from_units(1 << 20)),
            PropertyDefinition::new("network", 3, Quantity::from_units(1 << 20)),
            PropertyDefinition::new("services.nodeports", 4, Quantity::from_units(1)),
        ]
    }

    pub fn get(&self, kind: &ResourceKind) -> Option<&PropertyDefinition> {
        self.by_name.get(&kind.name())
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }

    /// Convert a raw quantity into `(enum id, billed units)`.
    ///
    /// Billed units are `ceil(milli(raw) / milli(unit))`.
    pub fn convert(
        &self,
        kind: &ResourceKind,
        raw: Quantity,
    ) -> std::result::Result<(u8, u64), ConversionError> {
        let def = self
            .get(kind)
            .ok_or_else(|| ConversionError::MissingProperty(kind.name()))?;
        let billed = raw
            .ceil_div(def.unit)
            .ok_or_else(|| ConversionError::ZeroUnit(def.name.clone()))?;
        let billed = u64::try_from(billed).map_err(|_| ConversionError::Overflow(def.name.clone()))?;
        Ok((def.enum_id, billed))
    }
}

impl Default for PropertyTable {
    fn default() -> Self {
        let by_name = Self::default_definitions()
            .into_iter()
            .map(|def| (def.name.clone(), def))
            .collect();
        Self { by_name }
    }
}
