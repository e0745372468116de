//! Source layout detection
//!
//! Input sources come in three shapes, distinguished by header signature
//! and, as a fallback, by the source name. The layout fixes the default
//! package count and weight and which extra columns are meaningful.
//!
//! Detection is a pure classification over (source name, header columns),
//! decoupled from file discovery, so the rules are testable without any
//! filesystem involvement.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Header column that marks an OLD-layout source.
const OLD_MARKER: &str = "layout";

/// Header column that marks a NEW-layout source.
const NEW_MARKER: &str = "location negozio";

/// Header columns that mark an AGENCY source.
const AGENCY_MARKERS: [&str; 2] = ["area", "n° point serviti"];

/// The source-format variant of an input file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LayoutKind {
    Old,
    New,
    Agency,
}

impl LayoutKind {
    pub fn as_str(&self) -> &str {
        match self {
            LayoutKind::Old => "old",
            LayoutKind::New => "new",
            LayoutKind::Agency => "agency",
        }
    }

    /// Default package count and weight for this layout, `None` when the
    /// source must supply them row by row.
    pub fn defaults(&self) -> Option<LayoutDefaults> {
        match self {
            LayoutKind::Old => Some(LayoutDefaults { packages: 1, weight_kg: 3.0 }),
            LayoutKind::New => Some(LayoutDefaults { packages: 2, weight_kg: 3.0 }),
            // AGENCY shipments vary per row; defaulting would be wrong.
            LayoutKind::Agency => None,
        }
    }
}

impl std::fmt::Display for LayoutKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Layout-level shipment defaults.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LayoutDefaults {
    pub packages: u32,
    pub weight_kg: f64,
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum LayoutError {
    #[error("unrecognized source layout for '{0}': no known header signature or name marker")]
    Unrecognized(String),
}

/// Classify a source from its header columns and name.
///
/// Header signature wins over the name; an unrecognized source is an error,
/// never a guessed layout.
pub fn detect(source_name: &str, header_columns: &[String]) -> Result<LayoutKind, LayoutError> {
    let headers: Vec<String> = header_columns
        .iter()
        .map(|c| c.trim().to_lowercase())
        .collect();

    if AGENCY_MARKERS.iter().any(|m| headers.iter().any(|h| h == m)) {
        return Ok(LayoutKind::Agency);
    }
    if headers.iter().any(|h| h == OLD_MARKER) {
        return Ok(LayoutKind::Old);
    }
    if headers.iter().any(|h| h == NEW_MARKER) {
        return Ok(LayoutKind::New);
    }

    // Fallback: the source name convention used by the upstream exports.
    let name = source_name.to_uppercase();
    if name.contains("AGENZIE") {
        return Ok(LayoutKind::Agency);
    }
    if name.contains("OLD") {
        return Ok(LayoutKind::Old);
    }
    if name.contains("NEW") {
        return Ok(LayoutKind::New);
    }

    Err(LayoutError::Unrecognized(source_name.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cols(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_detect_old_by_header() {
        let kind = detect("rete.xlsx", &cols(&["Indirizzo", "Layout", "Cap"])).unwrap();
        assert_eq!(kind, LayoutKind::Old);
    }

    #[test]
    fn test_detect_new_by_header() {
        let kind = detect("rete.xlsx", &cols(&["LOCATION NEGOZIO", "CAP"])).unwrap();
        assert_eq!(kind, LayoutKind::New);
    }

    #[test]
    fn test_detect_agency_by_header() {
        let kind = detect("punti.xlsx", &cols(&["Area", "Indirizzo"])).unwrap();
        assert_eq!(kind, LayoutKind::Agency);
        let kind = detect("punti.xlsx", &cols(&["N° Point serviti"])).unwrap();
        assert_eq!(kind, LayoutKind::Agency);
    }

    #[test]
    fn test_header_signature_wins_over_name() {
        // Name says NEW but the header carries the AGENCY markers.
        let kind = detect("rete_NEW.xlsx", &cols(&["Area", "Indirizzo"])).unwrap();
        assert_eq!(kind, LayoutKind::Agency);
    }

    #[test]
    fn test_detect_by_name_fallback() {
        assert_eq!(detect("rete_OLD_agosto.xlsx", &[]).unwrap(), LayoutKind::Old);
        assert_eq!(detect("rete_NEW_agosto.xlsx", &[]).unwrap(), LayoutKind::New);
        assert_eq!(detect("AGENZIE_nord.xlsx", &[]).unwrap(), LayoutKind::Agency);
    }

    #[test]
    fn test_unrecognized_is_an_error() {
        let err = detect("misc.xlsx", &cols(&["Colonna1"])).unwrap_err();
        assert_eq!(err, LayoutError::Unrecognized("misc.xlsx".to_string()));
    }

    #[test]
    fn test_layout_defaults() {
        assert_eq!(
            LayoutKind::Old.defaults(),
            Some(LayoutDefaults { packages: 1, weight_kg: 3.0 })
        );
        assert_eq!(
            LayoutKind::New.defaults(),
            Some(LayoutDefaults { packages: 2, weight_kg: 3.0 })
        );
        assert!(LayoutKind::Agency.defaults().is_none());
    }
}
