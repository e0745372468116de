//! Shipment record assembly
//!
//! Combines a raw row, its layout defaults, and the abbreviated address into
//! a carrier-ready [`ShipmentRecord`]. Pure and deterministic apart from the
//! generated references; every text field leaves here within its carrier
//! maximum.

use crate::abbreviate::abbreviate;
use crate::layout::LayoutKind;
use crate::model::{
    AbbreviatedAddress, CodType, DataQualityFailure, InputRow, PackageType, PdfFormat, PortType,
    ShipmentRecord, ShipmentType, MAX_NOTES_LEN, MAX_RECIPIENT_LEN, NOTES_SEPARATOR,
};
use chrono::Utc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Generates unique customer references for rows that lack one.
///
/// The timestamp is captured once per run and combined with the row ordinal
/// and a monotonic counter, so two runs of the same file in the same second
/// still cannot collide with each other's counters.
pub struct ReferenceGenerator {
    stamp: String,
    counter: AtomicU64,
}

impl ReferenceGenerator {
    pub fn new() -> Self {
        Self {
            stamp: Utc::now().format("%Y%m%d%H%M%S").to_string(),
            counter: AtomicU64::new(0),
        }
    }

    pub fn next(&self, ordinal: u32) -> String {
        let seq = self.counter.fetch_add(1, Ordering::Relaxed);
        format!("{}-{}-{}", self.stamp, ordinal, seq)
    }
}

impl Default for ReferenceGenerator {
    fn default() -> Self {
        Self::new()
    }
}

/// Builds carrier-bound records from validated inputs.
pub struct RecordBuilder {
    references: ReferenceGenerator,
}

impl RecordBuilder {
    pub fn new() -> Self {
        Self { references: ReferenceGenerator::new() }
    }

    /// Assemble one record. Fails only on data the layout says must be
    /// present: a recipient, and manual quantities for AGENCY rows.
    pub fn build(
        &self,
        row: &InputRow,
        layout: LayoutKind,
        address: &AbbreviatedAddress,
    ) -> Result<ShipmentRecord, DataQualityFailure> {
        let recipient = row.recipient.trim();
        if recipient.is_empty() {
            return Err(DataQualityFailure::MissingRecipient);
        }

        let (packages, weight_kg) = match layout.defaults() {
            Some(defaults) => (
                row.packages.unwrap_or(defaults.packages),
                row.weight_kg.unwrap_or(defaults.weight_kg),
            ),
            None => {
                let packages = row.packages.ok_or(DataQualityFailure::MissingManualField {
                    field: "packages".to_string(),
                })?;
                let weight_kg = row.weight_kg.ok_or(DataQualityFailure::MissingManualField {
                    field: "weight_kg".to_string(),
                })?;
                (packages, weight_kg)
            },
        };

        let phone = row
            .mobile_phone
            .as_deref()
            .and_then(clean_phone)
            .or_else(|| row.landline_phone.as_deref().and_then(clean_phone));

        let reference = match row.reference.as_deref().map(str::trim) {
            Some(r) if !r.is_empty() => r.to_string(),
            _ => self.references.next(row.ordinal),
        };

        Ok(ShipmentRecord {
            recipient: truncate_chars(recipient, MAX_RECIPIENT_LEN),
            street: address.street.clone(),
            locality: address.locality.clone(),
            province: address.province.clone(),
            postal_code: address.postal_code.clone(),
            packages,
            weight_kg,
            port: PortType::Franco,
            package_type: PackageType::Standard,
            shipment_type: ShipmentType::National,
            notes: build_notes(row.ordinal, phone.as_deref(), row.instructions.as_deref()),
            phone,
            email: row
                .email
                .as_deref()
                .map(str::trim)
                .filter(|e| !e.is_empty())
                .map(String::from),
            reference,
            cod_amount: 0.0,
            cod_type: None,
            pdf_format: PdfFormat::A6,
        })
    }
}

impl Default for RecordBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// The driver-facing notes line: ordinal, phone, and instructions joined
/// with the separator, compressed into the notes maximum.
fn build_notes(ordinal: u32, phone: Option<&str>, instructions: Option<&str>) -> String {
    let mut parts = vec![ordinal.to_string()];
    if let Some(phone) = phone {
        parts.push(phone.to_string());
    }
    if let Some(instructions) = instructions.map(str::trim).filter(|i| !i.is_empty()) {
        parts.push(instructions.to_string());
    }
    abbreviate(&parts.join(NOTES_SEPARATOR), MAX_NOTES_LEN)
}

/// Strip the international prefix and internal whitespace; drop numbers
/// that come out empty.
fn clean_phone(raw: &str) -> Option<String> {
    let cleaned: String = raw
        .trim()
        .trim_start_matches("+39")
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '.' && *c != '/')
        .collect();
    (!cleaned.is_empty()).then_some(cleaned)
}

fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect::<String>().trim_end().to_string()
}
