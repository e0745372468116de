//! Bolla Common Library
//!
//! Shared error handling, logging setup, and fingerprint utilities for the
//! bolla workspace.
//!
//! # Overview
//!
//! - **Error Handling**: the workspace-wide [`BollaError`] and `Result` alias
//! - **Logging**: `tracing` subscriber configuration and initialization
//! - **Fingerprints**: stable row identity used by the upload ledger

pub mod error;
pub mod fingerprint;
pub mod logging;

// Re-export commonly used types
pub use error::{BollaError, Result};
pub use fingerprint::Fingerprint;
