//! Error types shared across the bolla workspace

use thiserror::Error;

/// Result type alias for bolla operations
pub type Result<T> = std::result::Result<T, BollaError>;

/// Infrastructure-level error type.
///
/// Per-row outcomes (invalid postal code, locality mismatch, carrier
/// rejections) are *data*, not errors, and live in `bolla-core` as typed
/// failure values. This enum covers the failures that abort an operation
/// rather than a single row.
#[derive(Error, Debug)]
pub enum BollaError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Ledger error: {0}")]
    Ledger(String),

    #[error("Logging initialization failed: {0}")]
    Logging(String),
}

impl BollaError {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a ledger error
    pub fn ledger(msg: impl Into<String>) -> Self {
        Self::Ledger(msg.into())
    }
}
