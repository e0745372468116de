//! Run orchestration
//!
//! One [`Pipeline::run`] call processes one input source end to end:
//! reconcile leftovers from interrupted runs, normalize and build every row,
//! admit survivors through the ledger, upload in batches, and optionally
//! close the work day. Row failures never abort the run; the summary
//! reports every row's fate.

use crate::builder::RecordBuilder;
use crate::carrier::CarrierClient;
use crate::config::PipelineConfig;
use crate::geocode::GeocodeProvider;
use crate::layout::{self, LayoutKind};
use crate::ledger::{Admission, LedgerEntry, UploadLedger};
use crate::model::{
    AbbreviatedAddress, DataQualityFailure, InputRow, RowOutcome, MAX_LOCALITY_LEN, MAX_STREET_LEN,
};
use crate::normalize::{AddressNormalizer, NormalizeFailure};
use crate::uploader::{AdmittedRecord, BatchUploader};
use crate::{abbreviate::abbreviate, model::ShipmentRecord};
use bolla_common::{BollaError, Fingerprint, Result};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

/// One already-parsed input source: name, header row, and data rows in file
/// order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputSource {
    pub name: String,
    pub header_columns: Vec<String>,
    pub rows: Vec<InputRow>,
}

/// The fate of one input row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RowReport {
    pub ordinal: u32,
    pub recipient: String,
    #[serde(flatten)]
    pub outcome: RowOutcome,
}

/// Everything a run did, for operators and exit codes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub source: String,
    pub layout: LayoutKind,
    pub total_rows: usize,
    pub confirmed: usize,
    pub skipped_duplicates: usize,
    pub data_quality_failures: usize,
    pub business_failures: usize,
    pub unresolved: usize,
    /// Stuck entries from previous runs settled against the carrier.
    pub reconciled: usize,
    pub work_day_closed: bool,
    pub rows: Vec<RowReport>,
}

impl RunSummary {
    /// True when every row either shipped or was a known duplicate.
    pub fn is_clean(&self) -> bool {
        self.data_quality_failures == 0 && self.business_failures == 0 && self.unresolved == 0
    }

    /// Confirmed fraction of the rows that were actually attempted.
    pub fn success_rate(&self) -> f64 {
        let attempted = self.total_rows - self.skipped_duplicates;
        if attempted == 0 {
            1.0
        } else {
            self.confirmed as f64 / attempted as f64
        }
    }
}

enum Prepared {
    Ready(Box<ShipmentRecord>),
    Quality(DataQualityFailure),
    Unresolved(String),
}

pub struct Pipeline {
    normalizer: AddressNormalizer,
    builder: RecordBuilder,
    carrier: Arc<dyn CarrierClient>,
    ledger: Arc<UploadLedger>,
    config: PipelineConfig,
}

impl Pipeline {
    pub fn new(
        provider: Arc<dyn GeocodeProvider>,
        carrier: Arc<dyn CarrierClient>,
        ledger: Arc<UploadLedger>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            normalizer: AddressNormalizer::new(provider),
            builder: RecordBuilder::new(),
            carrier,
            ledger,
            config,
        }
    }

    /// Process one source end to end.
    pub async fn run(&self, source: InputSource) -> Result<RunSummary> {
        let layout = layout::detect(&source.name, &source.header_columns)
            .map_err(|e| BollaError::config(e.to_string()))?;
        info!(source = %source.name, %layout, rows = source.rows.len(), "starting run");

        let reconciled = self.reconcile().await?;

        let total_rows = source.rows.len();
        let prepared = self.prepare_rows(&source.rows, layout).await;

        // Admission is sequential: the ledger serializes it anyway, and
        // batch order must follow input order.
        let mut outcomes: Vec<Option<RowOutcome>> = vec![None; total_rows];
        let mut admitted: Vec<AdmittedRecord> = Vec::new();
        let mut slot_of: HashMap<Fingerprint, usize> = HashMap::new();

        for (slot, (row, prepared)) in source.rows.iter().zip(prepared).enumerate() {
            match prepared {
                Prepared::Quality(failure) => {
                    warn!(ordinal = row.ordinal, %failure, "row rejected");
                    outcomes[slot] = Some(RowOutcome::Rejected { failure });
                },
                Prepared::Unresolved(detail) => {
                    warn!(ordinal = row.ordinal, %detail, "row unresolved");
                    outcomes[slot] = Some(RowOutcome::Unresolved { detail });
                },
                Prepared::Ready(record) => {
                    let fingerprint = Fingerprint::derive(
                        &source.name,
                        row.ordinal,
                        &[&row.recipient, &row.address, &row.postal_code],
                    );
                    match self.ledger.admit(&fingerprint, &record.reference).await? {
                        Admission::Admitted => {
                            slot_of.insert(fingerprint.clone(), slot);
                            admitted.push(AdmittedRecord { fingerprint, record: *record });
                        },
                        Admission::Skipped(status) => {
                            outcomes[slot] = Some(RowOutcome::SkippedDuplicate {
                                previous_status: status.as_str().to_string(),
                            });
                        },
                    }
                },
            }
        }

        let uploader = BatchUploader::new(
            self.carrier.clone(),
            self.ledger.clone(),
            self.config.retry,
            self.config.batch_size,
        );
        for (fingerprint, outcome) in uploader.upload(admitted).await? {
            if let Some(&slot) = slot_of.get(&fingerprint) {
                outcomes[slot] = Some(outcome);
            }
        }

        let rows: Vec<RowReport> = source
            .rows
            .iter()
            .zip(outcomes)
            .map(|(row, outcome)| RowReport {
                ordinal: row.ordinal,
                recipient: row.recipient.clone(),
                outcome: outcome.unwrap_or(RowOutcome::Unresolved {
                    detail: "no outcome recorded".to_string(),
                }),
            })
            .collect();

        let mut summary = RunSummary {
            source: source.name,
            layout,
            total_rows,
            confirmed: 0,
            skipped_duplicates: 0,
            data_quality_failures: 0,
            business_failures: 0,
            unresolved: 0,
            reconciled,
            work_day_closed: false,
            rows,
        };
        for report in &summary.rows {
            match &report.outcome {
                RowOutcome::Confirmed { .. } => summary.confirmed += 1,
                RowOutcome::SkippedDuplicate { .. } => summary.skipped_duplicates += 1,
                RowOutcome::Rejected { .. } => summary.data_quality_failures += 1,
                RowOutcome::CarrierRejected { .. } => summary.business_failures += 1,
                RowOutcome::Unresolved { .. } => summary.unresolved += 1,
            }
        }

        if self.config.close_work_day && summary.confirmed > 0 {
            match self.carrier.confirm_open_shipments().await {
                Ok(()) => summary.work_day_closed = true,
                Err(e) => warn!(error = %e, "work day close failed"),
            }
        }

        info!(
            confirmed = summary.confirmed,
            skipped = summary.skipped_duplicates,
            rejected = summary.data_quality_failures + summary.business_failures,
            unresolved = summary.unresolved,
            "run finished"
        );
        Ok(summary)
    }

    /// Normalize, abbreviate, and build all rows concurrently, preserving
    /// input order.
    async fn prepare_rows(&self, rows: &[InputRow], layout: LayoutKind) -> Vec<Prepared> {
        futures::stream::iter(rows)
            .map(|row| self.prepare_row(row, layout))
            .buffered(self.config.normalize_workers.max(1))
            .collect()
            .await
    }

    async fn prepare_row(&self, row: &InputRow, layout: LayoutKind) -> Prepared {
        let mut attempts = 0u32;
        let normalized = loop {
            match self
                .normalizer
                .normalize(&row.address, &row.city, &row.postal_code, &row.province)
                .await
            {
                Ok(normalized) => break normalized,
                Err(NormalizeFailure::Quality(failure)) => return Prepared::Quality(failure),
                Err(NormalizeFailure::Unavailable { detail }) => {
                    attempts += 1;
                    if !self.config.retry.should_retry(attempts) {
                        return Prepared::Unresolved(detail);
                    }
                    tokio::time::sleep(self.config.retry.backoff_delay(attempts - 1)).await;
                },
            }
        };

        let address = AbbreviatedAddress {
            street: abbreviate(&normalized.street, MAX_STREET_LEN),
            locality: abbreviate(&normalized.locality, MAX_LOCALITY_LEN),
            province: normalized.province,
            postal_code: normalized.postal_code,
        };

        match self.builder.build(row, layout, &address) {
            Ok(record) => Prepared::Ready(Box::new(record)),
            Err(failure) => Prepared::Quality(failure),
        }
    }

    /// Settle entries a previous run left in Submitted: ask the carrier
    /// whether each actually arrived. Returns how many were settled.
    async fn reconcile(&self) -> Result<usize> {
        let stuck = self.ledger.stuck_submitted().await?;
        let mut settled = 0;
        for entry in stuck {
            settled += self.reconcile_entry(&entry).await? as usize;
        }
        Ok(settled)
    }

    async fn reconcile_entry(&self, entry: &LedgerEntry) -> Result<bool> {
        let Some(reference) = entry.reference.as_deref().filter(|r| !r.is_empty()) else {
            // Without a reference there is nothing to query; leave the
            // entry for manual inspection rather than guessing.
            warn!(fingerprint = %entry.fingerprint, "stuck entry has no reference");
            return Ok(false);
        };

        match self.carrier.query_status(reference).await {
            Ok(Some(remote)) => {
                info!(%reference, number = %remote.shipment_number, "stuck entry confirmed remotely");
                self.ledger
                    .mark_confirmed(&entry.fingerprint, &remote.shipment_number)
                    .await?;
                Ok(true)
            },
            Ok(None) => {
                self.ledger
                    .mark_failed(&entry.fingerprint, "submission interrupted, carrier never received it")
                    .await?;
                Ok(true)
            },
            Err(e) => {
                // Cannot prove anything either way; the entry stays
                // submitted for the next run to settle.
                warn!(%reference, error = %e, "reconciliation query failed");
                Ok(false)
            },
        }
    }
}
