//! Error types for Synheart Body

use thiserror::Error;

use crate::store::StoreError;

/// Errors that can occur while recording measurements or recomputing metrics
#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("Metric store error: {0}")]
    Store(#[from] StoreError),

    #[error("Invalid value for {metric}: {input:?}")]
    InvalidValue { metric: String, input: String },

    #[error("Value out of range for {metric}: {value}")]
    OutOfRange { metric: String, value: f64 },

    #[error("Sample not found: {0}")]
    NotFound(String),

    #[error("Unknown metric: {0}")]
    UnknownMetric(String),

    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Engine lock poisoned by a panicked writer")]
    LockPoisoned,
}
