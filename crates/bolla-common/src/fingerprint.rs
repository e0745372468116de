//! Shipment fingerprints for duplicate detection
//!
//! A fingerprint is a stable key derived from the fields that identify a
//! shipment in its source data: the source-file identity, the row ordinal,
//! and a short hash of the identifying row content. It is used only by the
//! upload ledger and is never sent to the carrier.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Number of hex characters kept from the content hash. Enough to tell
/// apart edited rows sharing the same ordinal, short enough to keep ledger
/// keys readable in support tickets.
const CONTENT_HASH_LEN: usize = 12;

/// Stable shipment identity: `{source}:{ordinal}:{content-hash}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Derive a fingerprint from source-file identity, row ordinal, and the
    /// identifying row fields (recipient, address, postal code).
    ///
    /// Deterministic: the same inputs always produce the same key,
    /// independent of run order.
    pub fn derive(source: &str, ordinal: u32, identity_fields: &[&str]) -> Self {
        let mut hasher = Sha256::new();
        for field in identity_fields {
            hasher.update(field.trim().to_lowercase().as_bytes());
            hasher.update(b"|");
        }
        let digest = hex::encode(hasher.finalize());
        Fingerprint(format!(
            "{}:{}:{}",
            source,
            ordinal,
            &digest[..CONTENT_HASH_LEN]
        ))
    }

    /// Reconstruct a fingerprint from its stored ledger key.
    pub fn from_key(key: impl Into<String>) -> Self {
        Fingerprint(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_is_deterministic() {
        let a = Fingerprint::derive("rete_NEW", 7, &["Rossi Srl", "Via Roma 1", "20100"]);
        let b = Fingerprint::derive("rete_NEW", 7, &["Rossi Srl", "Via Roma 1", "20100"]);
        assert_eq!(a, b);
    }

    #[test]
    fn test_fingerprint_ignores_case_and_padding() {
        let a = Fingerprint::derive("f", 1, &["ROSSI SRL", " Via Roma 1 "]);
        let b = Fingerprint::derive("f", 1, &["rossi srl", "Via Roma 1"]);
        assert_eq!(a, b);
    }

    #[test]
    fn test_fingerprint_changes_with_content() {
        let a = Fingerprint::derive("f", 1, &["Rossi Srl", "Via Roma 1"]);
        let b = Fingerprint::derive("f", 1, &["Rossi Srl", "Via Roma 2"]);
        assert_ne!(a, b);
    }

    #[test]
    fn test_fingerprint_embeds_source_and_ordinal() {
        let fp = Fingerprint::derive("rete_OLD", 42, &["x"]);
        assert!(fp.as_str().starts_with("rete_OLD:42:"));
    }
}
