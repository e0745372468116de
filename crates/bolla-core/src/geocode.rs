//! Geocoding collaborator
//!
//! The pipeline consumes geocoding as a black box: free-text address
//! components in, normalized components plus a precision indicator out.
//! [`GeocodeProvider`] is the seam; [`HttpGeocodeProvider`] is the adapter
//! for a Google-style geocode JSON API, with a request timeout and an
//! in-process rate limiter to respect the provider's quota.

use crate::config::GeocodeConfig;
use crate::model::Confidence;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

/// Free-text address components sent to the provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddressQuery {
    pub street: String,
    pub city: String,
    pub postal_code: String,
    pub province: String,
}

impl AddressQuery {
    /// One-line form used as the provider's free-text query.
    pub fn to_query_string(&self) -> String {
        [
            self.street.as_str(),
            self.postal_code.as_str(),
            self.city.as_str(),
            self.province.as_str(),
            "Italia",
        ]
        .iter()
        .filter(|p| !p.trim().is_empty())
        .cloned()
        .collect::<Vec<_>>()
        .join(", ")
    }
}

/// Normalized components returned by the provider. Any component the
/// provider could not determine is `None`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeocodeCandidate {
    pub street: Option<String>,
    pub street_number: Option<String>,
    pub locality: Option<String>,
    pub postal_code: Option<String>,
    pub confidence: Confidence,
}

impl GeocodeCandidate {
    /// "Route, number" when both are known, the route alone otherwise.
    pub fn formatted_street(&self) -> Option<String> {
        match (&self.street, &self.street_number) {
            (Some(route), Some(number)) => Some(format!("{}, {}", route, number)),
            (Some(route), None) => Some(route.clone()),
            _ => None,
        }
    }
}

/// Provider failures. `RateLimited` and `Unavailable` are transient and may
/// be retried by the orchestrating layer; the rest are terminal for the row.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GeocodeError {
    #[error("no result for address")]
    NoResult,

    #[error("provider rejected the request: {0}")]
    Denied(String),

    #[error("provider rate limit exceeded")]
    RateLimited,

    #[error("provider unavailable: {0}")]
    Unavailable(String),
}

impl GeocodeError {
    /// True for failures worth retrying with backoff.
    pub fn is_transient(&self) -> bool {
        matches!(self, GeocodeError::RateLimited | GeocodeError::Unavailable(_))
    }
}

/// The geocoding seam. One outbound call per row; implementations may cache
/// identical queries within a run but are not required to.
#[async_trait]
pub trait GeocodeProvider: Send + Sync {
    async fn resolve(&self, query: &AddressQuery) -> Result<GeocodeCandidate, GeocodeError>;
}

// ============================================================================
// HTTP adapter
// ============================================================================

/// Adapter for a Google-style geocode JSON API.
pub struct HttpGeocodeProvider {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    min_interval: Duration,
    last_request: Mutex<Option<Instant>>,
}

impl HttpGeocodeProvider {
    pub fn new(config: &GeocodeConfig) -> Result<Self, GeocodeError> {
        if config.api_key.is_empty() {
            return Err(GeocodeError::Denied("missing geocoding API key".to_string()));
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| GeocodeError::Unavailable(e.to_string()))?;

        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            api_key: config.api_key.clone(),
            min_interval: Duration::from_secs_f64(1.0 / config.requests_per_second.max(1) as f64),
            last_request: Mutex::new(None),
        })
    }

    /// Space requests out to the configured per-second budget.
    async fn throttle(&self) {
        let mut last = self.last_request.lock().await;
        if let Some(prev) = *last {
            let elapsed = prev.elapsed();
            if elapsed < self.min_interval {
                tokio::time::sleep(self.min_interval - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }

    fn parse_response(&self, body: &serde_json::Value) -> Result<GeocodeCandidate, GeocodeError> {
        let status = body
            .get("status")
            .and_then(|s| s.as_str())
            .unwrap_or("UNKNOWN_ERROR");

        match status {
            "OK" => {},
            "ZERO_RESULTS" => return Err(GeocodeError::NoResult),
            "OVER_QUERY_LIMIT" => return Err(GeocodeError::RateLimited),
            "REQUEST_DENIED" | "INVALID_REQUEST" => {
                return Err(GeocodeError::Denied(status.to_string()))
            },
            other => return Err(GeocodeError::Unavailable(format!("status {}", other))),
        }

        let result = body
            .get("results")
            .and_then(|r| r.as_array())
            .and_then(|r| r.first())
            .ok_or(GeocodeError::NoResult)?;

        let components = result
            .get("address_components")
            .and_then(|c| c.as_array())
            .cloned()
            .unwrap_or_default();

        let confidence = match result
            .pointer("/geometry/location_type")
            .and_then(|t| t.as_str())
            .unwrap_or("APPROXIMATE")
        {
            "ROOFTOP" => Confidence::Exact,
            "RANGE_INTERPOLATED" | "GEOMETRIC_CENTER" => Confidence::Interpolated,
            _ => Confidence::Approximate,
        };

        Ok(GeocodeCandidate {
            street: component(&components, "route"),
            street_number: component(&components, "street_number"),
            // The municipality comes back as a locality or, for smaller
            // comuni, as administrative_area_level_3.
            locality: component(&components, "locality")
                .or_else(|| component(&components, "administrative_area_level_3")),
            postal_code: component(&components, "postal_code"),
            confidence,
        })
    }
}

fn component(components: &[serde_json::Value], kind: &str) -> Option<String> {
    components
        .iter()
        .find(|c| {
            c.get("types")
                .and_then(|t| t.as_array())
                .map(|t| t.iter().any(|v| v.as_str() == Some(kind)))
                .unwrap_or(false)
        })
        .and_then(|c| c.get("long_name"))
        .and_then(|n| n.as_str())
        .map(|n| n.to_string())
}

#[async_trait]
impl GeocodeProvider for HttpGeocodeProvider {
    async fn resolve(&self, query: &AddressQuery) -> Result<GeocodeCandidate, GeocodeError> {
        self.throttle().await;

        let address = query.to_query_string();
        debug!(%address, "geocoding request");

        let response = self
            .client
            .get(&self.endpoint)
            .query(&[
                ("address", address.as_str()),
                ("key", self.api_key.as_str()),
                ("language", "it"),
            ])
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    GeocodeError::Unavailable("request timed out".to_string())
                } else {
                    GeocodeError::Unavailable(e.to_string())
                }
            })?;

        if response.status().as_u16() == 429 {
            return Err(GeocodeError::RateLimited);
        }
        if response.status().is_server_error() {
            return Err(GeocodeError::Unavailable(format!(
                "server returned {}",
                response.status()
            )));
        }

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| GeocodeError::Unavailable(format!("bad response body: {}", e)))?;

        self.parse_response(&body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_string_skips_empty_components() {
        let q = AddressQuery {
            street: "Via Roma 1".into(),
            city: "Milano".into(),
            postal_code: "".into(),
            province: "MI".into(),
        };
        assert_eq!(q.to_query_string(), "Via Roma 1, Milano, MI, Italia");
    }

    #[test]
    fn test_formatted_street() {
        let c = GeocodeCandidate {
            street: Some("Via Roma".into()),
            street_number: Some("1".into()),
            locality: None,
            postal_code: None,
            confidence: Confidence::Exact,
        };
        assert_eq!(c.formatted_street().unwrap(), "Via Roma, 1");

        let no_number = GeocodeCandidate { street_number: None, ..c.clone() };
        assert_eq!(no_number.formatted_street().unwrap(), "Via Roma");
    }

    #[test]
    fn test_transient_classification() {
        assert!(GeocodeError::RateLimited.is_transient());
        assert!(GeocodeError::Unavailable("x".into()).is_transient());
        assert!(!GeocodeError::NoResult.is_transient());
        assert!(!GeocodeError::Denied("x".into()).is_transient());
    }
}
