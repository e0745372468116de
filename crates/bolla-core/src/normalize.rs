//! Address normalization and validation
//!
//! Wraps the geocoding collaborator: shape-checks the row locally, asks the
//! provider for a canonical form, then applies the acceptance rules. The
//! outcome is either a [`NormalizedAddress`] or a typed failure that keeps
//! data-quality problems (terminal for the row) apart from provider
//! unavailability (retryable).

use crate::geocode::{AddressQuery, GeocodeCandidate, GeocodeError, GeocodeProvider};
use crate::model::{Confidence, DataQualityFailure, NormalizedAddress};
use regex::Regex;
use std::sync::Arc;
use std::sync::OnceLock;
use tracing::debug;

/// Failure to normalize one row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NormalizeFailure {
    /// Terminal for the row; surfaced for manual correction.
    Quality(DataQualityFailure),
    /// Transient; the orchestrating layer may retry with backoff.
    Unavailable { detail: String },
}

pub struct AddressNormalizer {
    provider: Arc<dyn GeocodeProvider>,
}

impl AddressNormalizer {
    pub fn new(provider: Arc<dyn GeocodeProvider>) -> Self {
        Self { provider }
    }

    /// Validate and normalize one address. Exactly one provider call, and
    /// none at all when the postal code is malformed.
    pub async fn normalize(
        &self,
        street: &str,
        city: &str,
        postal_code: &str,
        province: &str,
    ) -> Result<NormalizedAddress, NormalizeFailure> {
        let zip = clean_zip(postal_code);
        if !is_valid_zip(&zip) {
            return Err(NormalizeFailure::Quality(DataQualityFailure::InvalidZip {
                zip: postal_code.trim().to_string(),
            }));
        }

        let province = province.trim().to_uppercase();
        if province.len() != 2 || !province.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(NormalizeFailure::Quality(DataQualityFailure::InvalidProvince {
                province,
            }));
        }

        let query = AddressQuery {
            street: street.trim().to_string(),
            city: city.trim().to_string(),
            postal_code: zip.clone(),
            province: province.clone(),
        };

        let candidate = match self.provider.resolve(&query).await {
            Ok(candidate) => candidate,
            Err(GeocodeError::NoResult) => {
                return Err(NormalizeFailure::Quality(DataQualityFailure::NotFound))
            },
            Err(e) => {
                // Denied requests are config trouble, not row trouble; they
                // surface as unresolved alongside the transient failures.
                return Err(NormalizeFailure::Unavailable { detail: e.to_string() });
            },
        };

        if let Some(found) = &candidate.locality {
            if !city.trim().is_empty() && !cities_match(city, found) {
                return Err(NormalizeFailure::Quality(DataQualityFailure::LocalityMismatch {
                    expected: city.trim().to_string(),
                    found: found.clone(),
                }));
            }
        }

        if let Some(reason) = ambiguity_reason(&query.street, &candidate) {
            return Err(NormalizeFailure::Quality(DataQualityFailure::Ambiguous {
                reason: reason.to_string(),
            }));
        }

        // The provider may correct the CAP; take its word when the value is
        // well-formed, keep the (already valid) input otherwise.
        let postal_code = candidate
            .postal_code
            .as_deref()
            .filter(|p| is_valid_zip(p))
            .unwrap_or(&zip)
            .to_string();

        let normalized = NormalizedAddress {
            street: candidate
                .formatted_street()
                .unwrap_or_else(|| query.street.clone()),
            locality: candidate
                .locality
                .unwrap_or_else(|| query.city.clone()),
            province,
            postal_code,
            confidence: candidate.confidence,
        };
        debug!(street = %normalized.street, zip = %normalized.postal_code, "address normalized");
        Ok(normalized)
    }
}

fn clean_zip(raw: &str) -> String {
    let zip = raw.trim();
    // Upstream exports sometimes render the CAP as a float ("20100.0").
    let zip = zip.split('.').next().unwrap_or(zip);
    if !zip.is_empty() && zip.chars().all(|c| c.is_ascii_digit()) && zip.len() < 5 {
        format!("{:0>5}", zip)
    } else {
        zip.to_string()
    }
}

fn is_valid_zip(zip: &str) -> bool {
    zip.len() == 5 && zip.chars().all(|c| c.is_ascii_digit())
}

fn cities_match(expected: &str, found: &str) -> bool {
    normalize_city(expected) == normalize_city(found)
}

fn normalize_city(city: &str) -> String {
    let mut s = city.trim().to_lowercase();
    for prefix in ["comune di ", "città di ", "citta' di "] {
        if let Some(stripped) = s.strip_prefix(prefix) {
            s = stripped.to_string();
        }
    }
    s
}

/// Acceptance rules for result precision. A candidate passes only when it
/// is specific enough to put a parcel on a doorstep.
fn ambiguity_reason(input_street: &str, candidate: &GeocodeCandidate) -> Option<&'static str> {
    static CONTRADA: OnceLock<Regex> = OnceLock::new();
    static STATALE: OnceLock<Regex> = OnceLock::new();
    static SNC: OnceLock<Regex> = OnceLock::new();

    let contrada = CONTRADA.get_or_init(|| {
        Regex::new(r"(?i)\b(contrada|c\.da|localita|località|loc\.)\b")
            .unwrap_or_else(|e| panic!("{}", e))
    });
    let statale = STATALE.get_or_init(|| {
        Regex::new(r"(?i)\b(strada\s+statale|s\.s\.|strada\s+provinciale|s\.p\.)\b")
            .unwrap_or_else(|e| panic!("{}", e))
    });
    let snc = SNC.get_or_init(|| Regex::new(r"(?i)\bsnc\b").unwrap_or_else(|e| panic!("{}", e)));

    if snc.is_match(input_street) {
        return Some("no civic number (snc)");
    }
    if contrada.is_match(input_street)
        && (candidate.street.is_none() || candidate.confidence == Confidence::Approximate)
    {
        return Some("contrada or località without a specific street");
    }
    if statale.is_match(input_street) && candidate.street_number.is_none() {
        return Some("state or provincial road without a civic number");
    }
    if candidate.confidence == Confidence::Approximate && candidate.street.is_none() {
        return Some("area-level match without a street");
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Scripted provider: pops one canned response per call.
    struct StubProvider {
        responses: Mutex<Vec<Result<GeocodeCandidate, GeocodeError>>>,
        calls: Mutex<u32>,
    }

    impl StubProvider {
        fn with(responses: Vec<Result<GeocodeCandidate, GeocodeError>>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses),
                calls: Mutex::new(0),
            })
        }

        fn call_count(&self) -> u32 {
            *self.calls.lock().unwrap()
        }
    }

    #[async_trait]
    impl GeocodeProvider for StubProvider {
        async fn resolve(&self, _query: &AddressQuery) -> Result<GeocodeCandidate, GeocodeError> {
            *self.calls.lock().unwrap() += 1;
            self.responses
                .lock()
                .unwrap()
                .pop()
                .unwrap_or(Err(GeocodeError::NoResult))
        }
    }

    fn exact_candidate() -> GeocodeCandidate {
        GeocodeCandidate {
            street: Some("Via Roma".into()),
            street_number: Some("1".into()),
            locality: Some("Milano".into()),
            postal_code: Some("20121".into()),
            confidence: Confidence::Exact,
        }
    }

    #[tokio::test]
    async fn test_invalid_zip_skips_provider() {
        let provider = StubProvider::with(vec![Ok(exact_candidate())]);
        let normalizer = AddressNormalizer::new(provider.clone());

        let err = normalizer
            .normalize("Via Roma 1", "Milano", "2010A", "MI")
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            NormalizeFailure::Quality(DataQualityFailure::InvalidZip { .. })
        ));
        assert_eq!(provider.call_count(), 0);
    }

    #[tokio::test]
    async fn test_zip_padded_and_float_suffix_dropped() {
        let provider = StubProvider::with(vec![Ok(exact_candidate())]);
        let normalizer = AddressNormalizer::new(provider);

        let ok = normalizer
            .normalize("Via Roma 1", "Milano", "20100.0", "mi")
            .await
            .unwrap();
        // Provider corrected the CAP; province is normalized to uppercase.
        assert_eq!(ok.postal_code, "20121");
        assert_eq!(ok.province, "MI");
    }

    #[tokio::test]
    async fn test_locality_mismatch_rejected() {
        let provider = StubProvider::with(vec![Ok(GeocodeCandidate {
            locality: Some("Monza".into()),
            ..exact_candidate()
        })]);
        let normalizer = AddressNormalizer::new(provider);

        let err = normalizer
            .normalize("Via Roma 1", "Milano", "20100", "MI")
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            NormalizeFailure::Quality(DataQualityFailure::LocalityMismatch { .. })
        ));
    }

    #[tokio::test]
    async fn test_comune_di_prefix_still_matches() {
        let provider = StubProvider::with(vec![Ok(GeocodeCandidate {
            locality: Some("Comune di Milano".into()),
            ..exact_candidate()
        })]);
        let normalizer = AddressNormalizer::new(provider);

        let ok = normalizer
            .normalize("Via Roma 1", "Milano", "20100", "MI")
            .await;
        assert!(ok.is_ok());
    }

    #[tokio::test]
    async fn test_snc_is_ambiguous() {
        let provider = StubProvider::with(vec![Ok(exact_candidate())]);
        let normalizer = AddressNormalizer::new(provider);

        let err = normalizer
            .normalize("Via Roma snc", "Milano", "20100", "MI")
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            NormalizeFailure::Quality(DataQualityFailure::Ambiguous { .. })
        ));
    }

    #[tokio::test]
    async fn test_approximate_without_street_is_ambiguous() {
        let provider = StubProvider::with(vec![Ok(GeocodeCandidate {
            street: None,
            street_number: None,
            confidence: Confidence::Approximate,
            ..exact_candidate()
        })]);
        let normalizer = AddressNormalizer::new(provider);

        let err = normalizer
            .normalize("Piana grande", "Milano", "20100", "MI")
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            NormalizeFailure::Quality(DataQualityFailure::Ambiguous { .. })
        ));
    }

    #[tokio::test]
    async fn test_rate_limit_is_transient() {
        let provider = StubProvider::with(vec![Err(GeocodeError::RateLimited)]);
        let normalizer = AddressNormalizer::new(provider);

        let err = normalizer
            .normalize("Via Roma 1", "Milano", "20100", "MI")
            .await
            .unwrap_err();

        assert!(matches!(err, NormalizeFailure::Unavailable { .. }));
    }

    #[tokio::test]
    async fn test_no_result_is_terminal() {
        let provider = StubProvider::with(vec![Err(GeocodeError::NoResult)]);
        let normalizer = AddressNormalizer::new(provider);

        let err = normalizer
            .normalize("Via Inesistente 999", "Milano", "20100", "MI")
            .await
            .unwrap_err();

        assert_eq!(
            err,
            NormalizeFailure::Quality(DataQualityFailure::NotFound)
        );
    }
}
