//! Error types for Tally
//!
//! Provides a unified error type and domain-specific error variants

use thiserror::Error;

/// Result type alias using TallyError
pub type Result<T> = std::result::Result<T, TallyError>;

/// Unified error type for Tally operations
#[derive(Debug, Error)]
pub enum TallyError {
    // Listing tenants or entities from the orchestration API failed
    #[error("Discovery error: {0}")]
    Discovery(String),

    // An observed contribution could not be attributed
    #[error("Classification error: {0}")]
    Classification(#[from] ClassificationError),

    // Raw quantity could not be turned into billing units
    #[error("Conversion error: {0}")]
    Conversion(#[from] ConversionError),

    // Quantity string parse failure
    #[error("Invalid quantity {input:?}: {reason}")]
    Quantity { input: String, reason: String },

    // Storage errors
    #[error("Storage error: {0}")]
    Storage(String),

    // Metrics endpoint errors
    #[error("Metrics error: {0}")]
    Metrics(String),

    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    // Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    // Generic internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Errors attributing an observed contribution to a billable resource
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ClassificationError {
    #[error("No GPU model known for node {node}")]
    GpuModelNotFound { node: String },

    #[error("Unknown resource kind: {0}")]
    UnknownResource(String),
}

/// Unit conversion errors
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConversionError {
    #[error("No property definition for resource {0}")]
    MissingProperty(String),

    #[error("Property {0} has a zero conversion unit")]
    ZeroUnit(String),

    #[error("Billed value for {0} overflows")]
    Overflow(String),
}

impl TallyError {
    /// Shorthand for quantity parse failures
    pub fn quantity(input: &str, reason: impl Into<String>) -> Self {
        TallyError::Quantity {
            input: input.to_string(),
            reason: reason.into(),
        }
    }
}

// Implement From for common external error types
impl From<serde_json::Error> for TallyError {
    fn from(err: serde_json::Error) -> Self {
        TallyError::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for TallyError {
    fn from(err: std::io::Error) -> Self {
        TallyError::Storage(err.to_string())
    }
}

impl From<anyhow::Error> for TallyError {
    fn from(err: anyhow::Error) -> Self {
        TallyError::Internal(err.to_string())
    }
}
