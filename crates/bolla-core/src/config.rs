//! Configuration
//!
//! Collaborator endpoints, credentials, and pipeline tuning, loaded from the
//! environment (`.env` files are honored by the binary before this runs).
//! Every value has a default except the secrets, which stay empty and fail
//! the relevant collaborator's own validation.

use crate::retry::RetryConfig;
use bolla_common::{BollaError, Result};
use serde::{Deserialize, Serialize};
use std::env;

use crate::model::MAX_BATCH_SIZE;

/// Geocoding provider settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeocodeConfig {
    pub api_key: String,
    pub endpoint: String,
    pub timeout_secs: u64,
    /// Outbound request budget enforced by the in-process throttle.
    pub requests_per_second: u32,
}

impl Default for GeocodeConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            endpoint: "https://maps.googleapis.com/maps/api/geocode/json".to_string(),
            timeout_secs: 10,
            requests_per_second: 40,
        }
    }
}

impl GeocodeConfig {
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            api_key: env::var("BOLLA_GEOCODE_API_KEY").unwrap_or_default(),
            endpoint: env::var("BOLLA_GEOCODE_ENDPOINT").unwrap_or(defaults.endpoint),
            timeout_secs: parse_env("BOLLA_GEOCODE_TIMEOUT_SECS", defaults.timeout_secs)?,
            requests_per_second: parse_env(
                "BOLLA_GEOCODE_RPS",
                defaults.requests_per_second,
            )?,
        })
    }
}

/// Carrier label-service settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CarrierConfig {
    pub endpoint: String,
    /// Carrier branch ("sede") the account belongs to.
    pub site: String,
    pub client_code: String,
    pub password: String,
    pub contract_code: String,
    pub timeout_secs: u64,
    /// Ask the carrier to render labels server-side.
    pub generate_pdf: bool,
}

impl Default for CarrierConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            site: String::new(),
            client_code: String::new(),
            password: String::new(),
            contract_code: String::new(),
            timeout_secs: 30,
            generate_pdf: true,
        }
    }
}

impl CarrierConfig {
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            endpoint: env::var("BOLLA_CARRIER_ENDPOINT").unwrap_or_default(),
            site: env::var("BOLLA_CARRIER_SITE").unwrap_or_default(),
            client_code: env::var("BOLLA_CARRIER_CLIENT_CODE").unwrap_or_default(),
            password: env::var("BOLLA_CARRIER_PASSWORD").unwrap_or_default(),
            contract_code: env::var("BOLLA_CARRIER_CONTRACT_CODE").unwrap_or_default(),
            timeout_secs: parse_env("BOLLA_CARRIER_TIMEOUT_SECS", defaults.timeout_secs)?,
            generate_pdf: parse_env("BOLLA_CARRIER_GENERATE_PDF", defaults.generate_pdf)?,
        })
    }

    /// True when every field the carrier authenticates on is present.
    pub fn credentials_complete(&self) -> bool {
        !self.endpoint.is_empty()
            && !self.site.is_empty()
            && !self.client_code.is_empty()
            && !self.password.is_empty()
            && !self.contract_code.is_empty()
    }
}

/// Pipeline tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Records per carrier submission; clamped to the carrier maximum.
    pub batch_size: usize,
    /// Concurrent in-flight normalizations.
    pub normalize_workers: usize,
    pub retry: RetryConfig,
    /// Confirm all open shipments once the run's batches are in.
    pub close_work_day: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            batch_size: MAX_BATCH_SIZE,
            normalize_workers: 4,
            retry: RetryConfig::default(),
            close_work_day: false,
        }
    }
}

impl PipelineConfig {
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        let batch_size: usize = parse_env("BOLLA_BATCH_SIZE", defaults.batch_size)?;
        Ok(Self {
            batch_size: batch_size.clamp(1, MAX_BATCH_SIZE),
            normalize_workers: parse_env("BOLLA_NORMALIZE_WORKERS", defaults.normalize_workers)?
                .max(1),
            retry: RetryConfig {
                max_attempts: parse_env(
                    "BOLLA_RETRY_MAX_ATTEMPTS",
                    defaults.retry.max_attempts,
                )?,
                base_delay_ms: parse_env(
                    "BOLLA_RETRY_BASE_DELAY_MS",
                    defaults.retry.base_delay_ms,
                )?,
                max_delay_ms: parse_env("BOLLA_RETRY_MAX_DELAY_MS", defaults.retry.max_delay_ms)?,
                jitter: parse_env("BOLLA_RETRY_JITTER", defaults.retry.jitter)?,
            },
            close_work_day: parse_env("BOLLA_CLOSE_WORK_DAY", defaults.close_work_day)?,
        })
    }
}

/// All of the above, loaded together by the binary.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    pub geocode: GeocodeConfig,
    pub carrier: CarrierConfig,
    pub pipeline: PipelineConfig,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            geocode: GeocodeConfig::from_env()?,
            carrier: CarrierConfig::from_env()?,
            pipeline: PipelineConfig::from_env()?,
        })
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, default: T) -> Result<T> {
    match env::var(name) {
        Ok(raw) => raw
            .parse()
            .map_err(|_| BollaError::config(format!("invalid value for {}: '{}'", name, raw))),
        Err(_) => Ok(default),
    }
}
