//! Core data model for the shipment upload pipeline

use serde::{Deserialize, Serialize};

// ============================================================================
// Carrier field maxima (carrier contract, honored exactly)
// ============================================================================

/// Maximum length of the recipient name field.
pub const MAX_RECIPIENT_LEN: usize = 35;

/// Maximum length of the street address field.
pub const MAX_STREET_LEN: usize = 35;

/// Maximum length of the locality field.
pub const MAX_LOCALITY_LEN: usize = 30;

/// Maximum length of the free-text notes field.
pub const MAX_NOTES_LEN: usize = 40;

/// Maximum number of shipment records per submitted batch.
pub const MAX_BATCH_SIZE: usize = 400;

/// Separator used when synthesizing the notes field.
pub const NOTES_SEPARATOR: &str = "-";

// ============================================================================
// Input
// ============================================================================

/// Raw fields from one spreadsheet record, immutable once read.
///
/// At most one of `mobile_phone` / `landline_phone` is populated in real
/// inputs; when both appear, mobile wins. `packages` and `weight_kg` are
/// only meaningful for AGENCY-layout sources, where they are mandatory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputRow {
    /// Ordinal index of the row in its source file (the "progressivo").
    pub ordinal: u32,
    /// Recipient name ("ragione sociale").
    pub recipient: String,
    /// Raw address text as typed.
    pub address: String,
    pub city: String,
    pub postal_code: String,
    pub province: String,
    #[serde(default)]
    pub mobile_phone: Option<String>,
    #[serde(default)]
    pub landline_phone: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    /// Optional delivery instructions ("presso CC", "note per consegne").
    #[serde(default)]
    pub instructions: Option<String>,
    /// Manual package count (AGENCY layouts only).
    #[serde(default)]
    pub packages: Option<u32>,
    /// Manual weight in kilograms (AGENCY layouts only).
    #[serde(default)]
    pub weight_kg: Option<f64>,
    /// Explicit customer reference ("Bda") when the source provides one.
    #[serde(default)]
    pub reference: Option<String>,
}

// ============================================================================
// Addresses
// ============================================================================

/// How precisely the geocoding collaborator located the address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    /// Rooftop-level match.
    Exact,
    /// Interpolated between known points on the street.
    Interpolated,
    /// Area-level match only; ambiguous for delivery purposes.
    Approximate,
}

/// Canonical address as returned by the normalizer.
///
/// Invariants: `postal_code` is exactly 5 digits, `province` exactly 2
/// uppercase letters; an ambiguous result never reaches this type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizedAddress {
    pub street: String,
    pub locality: String,
    pub province: String,
    pub postal_code: String,
    pub confidence: Confidence,
}

/// A normalized address with street and locality compressed to the carrier
/// maxima. Postal code and province are carried over untouched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AbbreviatedAddress {
    pub street: String,
    pub locality: String,
    pub province: String,
    pub postal_code: String,
}

// ============================================================================
// Carrier vocabulary
// ============================================================================

/// Port type code ("porto").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PortType {
    /// Sender pays ("porto franco").
    #[default]
    Franco,
    /// Recipient pays ("porto assegnato").
    Assegnato,
}

impl PortType {
    pub fn as_code(&self) -> &str {
        match self {
            PortType::Franco => "F",
            PortType::Assegnato => "A",
        }
    }
}

/// Package type code ("tipo collo").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PackageType {
    #[default]
    Standard,
    Voluminous,
}

impl PackageType {
    pub fn as_code(&self) -> &str {
        match self {
            PackageType::Standard => "0",
            PackageType::Voluminous => "1",
        }
    }
}

/// Shipment type code ("tipo spedizione").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ShipmentType {
    #[default]
    National,
    International,
}

impl ShipmentType {
    pub fn as_code(&self) -> &str {
        match self {
            ShipmentType::National => "N",
            ShipmentType::International => "E",
        }
    }
}

/// Cash-on-delivery collection type ("tipo contrassegno").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CodType {
    Cash,
    BankCheck,
}

impl CodType {
    pub fn as_code(&self) -> &str {
        match self {
            CodType::Cash => "CONT",
            CodType::BankCheck => "AB",
        }
    }
}

/// Requested label PDF format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PdfFormat {
    #[default]
    A6,
    A4,
}

impl PdfFormat {
    pub fn as_code(&self) -> &str {
        match self {
            PdfFormat::A6 => "A6",
            PdfFormat::A4 => "A4",
        }
    }
}

// ============================================================================
// Shipment record
// ============================================================================

/// The carrier-bound record, every text field already within its maximum.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShipmentRecord {
    pub recipient: String,
    pub street: String,
    pub locality: String,
    pub province: String,
    pub postal_code: String,
    pub packages: u32,
    pub weight_kg: f64,
    pub port: PortType,
    pub package_type: PackageType,
    pub shipment_type: ShipmentType,
    /// Synthesized free-text notes (ordinal, phone, instructions).
    pub notes: String,
    pub phone: Option<String>,
    pub email: Option<String>,
    /// Customer reference ("Bda"); generated when the source row lacks one.
    pub reference: String,
    /// Cash-on-delivery amount, zero for the shipments this pipeline sends.
    pub cod_amount: f64,
    pub cod_type: Option<CodType>,
    pub pdf_format: PdfFormat,
}

// ============================================================================
// Row failures
// ============================================================================

/// Terminal data-quality failures: never retried, surfaced for manual
/// correction. One row's failure never aborts its siblings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum DataQualityFailure {
    /// Postal code is not 5 numeric characters. Detected before any
    /// collaborator call.
    InvalidZip { zip: String },
    /// Province is not 2 alphabetic characters.
    InvalidProvince { province: String },
    /// Geocoder resolved a different municipality than the row claims.
    LocalityMismatch { expected: String, found: String },
    /// Geocoder could not resolve the address at all.
    NotFound,
    /// Result too imprecise to be addressable (bare contrada, statale
    /// without civic number, "snc", area-level match without a street).
    Ambiguous { reason: String },
    /// AGENCY layout row without a manual package count or weight.
    MissingManualField { field: String },
    /// Row without a recipient name.
    MissingRecipient,
}

impl DataQualityFailure {
    /// Short stable code used in summaries and logs.
    pub fn code(&self) -> &'static str {
        match self {
            DataQualityFailure::InvalidZip { .. } => "INVALID_ZIP",
            DataQualityFailure::InvalidProvince { .. } => "INVALID_PROVINCE",
            DataQualityFailure::LocalityMismatch { .. } => "LOCALITY_MISMATCH",
            DataQualityFailure::NotFound => "ZERO_RESULTS",
            DataQualityFailure::Ambiguous { .. } => "AMBIGUOUS",
            DataQualityFailure::MissingManualField { .. } => "MISSING_MANUAL_FIELD",
            DataQualityFailure::MissingRecipient => "MISSING_RECIPIENT",
        }
    }
}

impl std::fmt::Display for DataQualityFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DataQualityFailure::InvalidZip { zip } => write!(f, "invalid postal code '{}'", zip),
            DataQualityFailure::InvalidProvince { province } => {
                write!(f, "invalid province '{}'", province)
            },
            DataQualityFailure::LocalityMismatch { expected, found } => {
                write!(f, "municipality mismatch: expected '{}', found '{}'", expected, found)
            },
            DataQualityFailure::NotFound => write!(f, "address not found"),
            DataQualityFailure::Ambiguous { reason } => write!(f, "ambiguous address: {}", reason),
            DataQualityFailure::MissingManualField { field } => {
                write!(f, "missing manual field '{}'", field)
            },
            DataQualityFailure::MissingRecipient => write!(f, "missing recipient name"),
        }
    }
}

/// Outcome of one row's trip through the pipeline, reported in the run
/// summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum RowOutcome {
    /// Carrier accepted the record and assigned a shipment number.
    Confirmed { shipment_number: String },
    /// Ledger already holds this fingerprint; nothing was sent.
    SkippedDuplicate { previous_status: String },
    /// Terminal data-quality failure, for manual correction.
    Rejected { failure: DataQualityFailure },
    /// Carrier rejected the record for a business reason.
    CarrierRejected { message: String },
    /// Transient trouble exhausted the retry budget; eligible next run.
    Unresolved { detail: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_carrier_codes_are_stable() {
        assert_eq!(PortType::Franco.as_code(), "F");
        assert_eq!(PackageType::Standard.as_code(), "0");
        assert_eq!(ShipmentType::National.as_code(), "N");
        assert_eq!(CodType::Cash.as_code(), "CONT");
        assert_eq!(PdfFormat::A6.as_code(), "A6");
    }

    #[test]
    fn test_failure_codes() {
        let f = DataQualityFailure::InvalidZip { zip: "2010".into() };
        assert_eq!(f.code(), "INVALID_ZIP");
        let f = DataQualityFailure::LocalityMismatch {
            expected: "Milano".into(),
            found: "Monza".into(),
        };
        assert_eq!(f.code(), "LOCALITY_MISMATCH");
    }

    #[test]
    fn test_input_row_optional_fields_default() {
        let row: InputRow = serde_json::from_str(
            r#"{"ordinal":1,"recipient":"Rossi Srl","address":"Via Roma 1",
                "city":"Milano","postal_code":"20100","province":"MI"}"#,
        )
        .unwrap();
        assert!(row.mobile_phone.is_none());
        assert!(row.packages.is_none());
        assert!(row.reference.is_none());
    }
}
