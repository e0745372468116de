//! Batch upload orchestration
//!
//! Splits admitted records into carrier-sized batches, drives the submission
//! retry loop, and commits every outcome to the ledger the moment it is
//! known. Retries happen at record granularity: a record the carrier already
//! accepted or rejected is never sent again, whatever happens to the rest of
//! its batch.

use crate::carrier::{CarrierClient, CarrierError, RecordOutcome};
use crate::ledger::UploadLedger;
use crate::model::{RowOutcome, ShipmentRecord, MAX_BATCH_SIZE};
use crate::retry::RetryConfig;
use bolla_common::{Fingerprint, Result};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

/// One record the ledger admitted for this run.
#[derive(Debug, Clone)]
pub struct AdmittedRecord {
    pub fingerprint: Fingerprint,
    pub record: ShipmentRecord,
}

pub struct BatchUploader {
    carrier: Arc<dyn CarrierClient>,
    ledger: Arc<UploadLedger>,
    retry: RetryConfig,
    batch_size: usize,
}

impl BatchUploader {
    pub fn new(
        carrier: Arc<dyn CarrierClient>,
        ledger: Arc<UploadLedger>,
        retry: RetryConfig,
        batch_size: usize,
    ) -> Self {
        Self {
            carrier,
            ledger,
            retry,
            batch_size: batch_size.clamp(1, MAX_BATCH_SIZE),
        }
    }

    /// Upload all admitted records, batch by batch in input order. Returns
    /// one outcome per record.
    pub async fn upload(
        &self,
        records: Vec<AdmittedRecord>,
    ) -> Result<Vec<(Fingerprint, RowOutcome)>> {
        let mut results = Vec::with_capacity(records.len());
        let total_batches = records.len().div_ceil(self.batch_size.max(1));

        for (index, batch) in records.chunks(self.batch_size).enumerate() {
            info!(batch = index + 1, of = total_batches, records = batch.len(), "submitting batch");
            let outcomes = self.upload_batch(batch).await?;
            results.extend(outcomes);
        }
        Ok(results)
    }

    async fn upload_batch(
        &self,
        batch: &[AdmittedRecord],
    ) -> Result<Vec<(Fingerprint, RowOutcome)>> {
        let fingerprints: Vec<Fingerprint> =
            batch.iter().map(|r| r.fingerprint.clone()).collect();
        // Submitted before the wire call: a crash between here and the
        // outcome leaves the entry reconcilable, never re-sendable.
        self.ledger.mark_submitted(&fingerprints).await?;

        let mut pending: Vec<AdmittedRecord> = batch.to_vec();
        let mut results = Vec::with_capacity(batch.len());
        let mut attempts = 0u32;

        while !pending.is_empty() {
            let records: Vec<ShipmentRecord> =
                pending.iter().map(|r| r.record.clone()).collect();

            match self.carrier.submit(&records).await {
                Ok(outcomes) => {
                    let settled = self.settle(&mut pending, outcomes).await?;
                    results.extend(settled);
                },
                Err(CarrierError::Rejected(message)) => {
                    // The carrier refused the whole request. Terminal for
                    // every record still pending in this batch.
                    for admitted in pending.drain(..) {
                        self.ledger.mark_failed(&admitted.fingerprint, &message).await?;
                        results.push((
                            admitted.fingerprint,
                            RowOutcome::CarrierRejected { message: message.clone() },
                        ));
                    }
                },
                Err(e) => {
                    warn!(attempt = attempts + 1, error = %e, "batch submission failed");
                },
            }

            if pending.is_empty() {
                break;
            }
            attempts += 1;
            if !self.retry.should_retry(attempts) {
                break;
            }
            tokio::time::sleep(self.retry.backoff_delay(attempts - 1)).await;
        }

        // Retry budget exhausted: park the leftovers as failed so the next
        // run can re-admit them.
        for admitted in pending {
            let detail = "carrier unavailable, retry budget exhausted".to_string();
            self.ledger.mark_failed(&admitted.fingerprint, &detail).await?;
            results.push((admitted.fingerprint, RowOutcome::Unresolved { detail }));
        }

        Ok(results)
    }

    /// Apply one submission's outcomes: confirmed and rejected records leave
    /// the pending set, anything the carrier did not answer for stays.
    async fn settle(
        &self,
        pending: &mut Vec<AdmittedRecord>,
        outcomes: Vec<RecordOutcome>,
    ) -> Result<Vec<(Fingerprint, RowOutcome)>> {
        let mut by_reference: HashMap<String, RecordOutcome> = HashMap::new();
        let mut positional: Vec<Option<RecordOutcome>> = Vec::new();
        for (i, outcome) in outcomes.into_iter().enumerate() {
            if outcome.reference.is_empty() {
                positional.resize(i + 1, None);
                positional[i] = Some(outcome);
            } else {
                by_reference.insert(outcome.reference.clone(), outcome);
            }
        }

        let mut results = Vec::new();
        let mut still_pending = Vec::new();

        for (i, admitted) in pending.drain(..).enumerate() {
            let outcome = by_reference
                .remove(&admitted.record.reference)
                .or_else(|| positional.get_mut(i).and_then(Option::take));

            match outcome {
                Some(o) if o.accepted => {
                    let number = o.shipment_number.unwrap_or_default();
                    self.ledger.mark_confirmed(&admitted.fingerprint, &number).await?;
                    results.push((
                        admitted.fingerprint,
                        RowOutcome::Confirmed { shipment_number: number },
                    ));
                },
                Some(o) => {
                    let message =
                        o.message.unwrap_or_else(|| "rejected by carrier".to_string());
                    self.ledger.mark_failed(&admitted.fingerprint, &message).await?;
                    results.push((
                        admitted.fingerprint,
                        RowOutcome::CarrierRejected { message },
                    ));
                },
                None => still_pending.push(admitted),
            }
        }

        *pending = still_pending;
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::UploadStatus;
    use crate::model::{PackageType, PdfFormat, PortType, ShipmentType};
    use async_trait::async_trait;
    use std::result::Result;
    use std::sync::Mutex;

    fn record(reference: &str) -> ShipmentRecord {
        ShipmentRecord {
            recipient: "Rossi Srl".into(),
            street: "V. Roma, 1".into(),
            locality: "Milano".into(),
            province: "MI".into(),
            postal_code: "20121".into(),
            packages: 1,
            weight_kg: 3.0,
            port: PortType::Franco,
            package_type: PackageType::Standard,
            shipment_type: ShipmentType::National,
            notes: "1".into(),
            phone: None,
            email: None,
            reference: reference.into(),
            cod_amount: 0.0,
            cod_type: None,
            pdf_format: PdfFormat::A6,
        }
    }

    fn admitted(n: u32) -> AdmittedRecord {
        AdmittedRecord {
            fingerprint: Fingerprint::derive("src", n, &["r"]),
            record: record(&format!("ref-{}", n)),
        }
    }

    async fn ledger_with(records: &[AdmittedRecord]) -> Arc<UploadLedger> {
        let ledger = Arc::new(UploadLedger::open_in_memory().await.unwrap());
        for r in records {
            ledger.admit(&r.fingerprint, &r.record.reference).await.unwrap();
        }
        ledger
    }

    /// Scripted carrier: one response per submission, recording batch sizes.
    struct ScriptedCarrier {
        responses: Mutex<Vec<Result<Vec<RecordOutcome>, CarrierError>>>,
        batch_sizes: Mutex<Vec<usize>>,
    }

    impl ScriptedCarrier {
        fn with(mut responses: Vec<Result<Vec<RecordOutcome>, CarrierError>>) -> Arc<Self> {
            responses.reverse();
            Arc::new(Self {
                responses: Mutex::new(responses),
                batch_sizes: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl CarrierClient for ScriptedCarrier {
        async fn submit(
            &self,
            records: &[ShipmentRecord],
        ) -> Result<Vec<RecordOutcome>, CarrierError> {
            self.batch_sizes.lock().unwrap().push(records.len());
            self.responses
                .lock()
                .unwrap()
                .pop()
                .unwrap_or(Err(CarrierError::Transport("script exhausted".into())))
        }

        async fn confirm_open_shipments(&self) -> Result<(), CarrierError> {
            Ok(())
        }

        async fn query_status(
            &self,
            _reference: &str,
        ) -> Result<Option<crate::carrier::RemoteShipment>, CarrierError> {
            Ok(None)
        }
    }

    fn accepted(reference: &str, number: &str) -> RecordOutcome {
        RecordOutcome {
            reference: reference.into(),
            shipment_number: Some(number.into()),
            accepted: true,
            message: None,
        }
    }

    fn rejected(reference: &str, message: &str) -> RecordOutcome {
        RecordOutcome {
            reference: reference.into(),
            shipment_number: None,
            accepted: false,
            message: Some(message.into()),
        }
    }

    fn no_delay() -> RetryConfig {
        RetryConfig { max_attempts: 3, base_delay_ms: 0, max_delay_ms: 0, jitter: false }
    }

    #[tokio::test]
    async fn test_batches_preserve_order_and_size() {
        let records: Vec<AdmittedRecord> = (0..5).map(admitted).collect();
        let ledger = ledger_with(&records).await;
        let carrier = ScriptedCarrier::with(vec![
            Ok(vec![accepted("ref-0", "n0"), accepted("ref-1", "n1")]),
            Ok(vec![accepted("ref-2", "n2"), accepted("ref-3", "n3")]),
            Ok(vec![accepted("ref-4", "n4")]),
        ]);

        let uploader = BatchUploader::new(carrier.clone(), ledger, no_delay(), 2);
        let results = uploader.upload(records).await.unwrap();

        assert_eq!(*carrier.batch_sizes.lock().unwrap(), vec![2, 2, 1]);
        assert_eq!(results.len(), 5);
        assert!(results
            .iter()
            .all(|(_, o)| matches!(o, RowOutcome::Confirmed { .. })));
    }

    #[tokio::test]
    async fn test_retry_resubmits_only_unanswered_records() {
        let records: Vec<AdmittedRecord> = (0..3).map(admitted).collect();
        let ledger = ledger_with(&records).await;
        // First attempt answers for two records only; the retry must carry
        // just the third.
        let carrier = ScriptedCarrier::with(vec![
            Ok(vec![accepted("ref-0", "n0"), rejected("ref-1", "indirizzo errato")]),
            Ok(vec![accepted("ref-2", "n2")]),
        ]);

        let uploader = BatchUploader::new(carrier.clone(), ledger.clone(), no_delay(), 400);
        let results = uploader.upload(records.clone()).await.unwrap();

        assert_eq!(*carrier.batch_sizes.lock().unwrap(), vec![3, 1]);
        assert!(matches!(results[0].1, RowOutcome::Confirmed { .. }));
        assert!(matches!(results[1].1, RowOutcome::CarrierRejected { .. }));
        assert!(matches!(results[2].1, RowOutcome::Confirmed { .. }));

        let entry = ledger.entry(&records[1].fingerprint).await.unwrap().unwrap();
        assert_eq!(entry.status, UploadStatus::Failed);
        assert_eq!(entry.failure_reason.as_deref(), Some("indirizzo errato"));
    }

    #[tokio::test]
    async fn test_transient_failure_then_success() {
        let records: Vec<AdmittedRecord> = (0..2).map(admitted).collect();
        let ledger = ledger_with(&records).await;
        let carrier = ScriptedCarrier::with(vec![
            Err(CarrierError::Timeout),
            Ok(vec![accepted("ref-0", "n0"), accepted("ref-1", "n1")]),
        ]);

        let uploader = BatchUploader::new(carrier.clone(), ledger, no_delay(), 400);
        let results = uploader.upload(records).await.unwrap();

        assert_eq!(*carrier.batch_sizes.lock().unwrap(), vec![2, 2]);
        assert_eq!(results.len(), 2);
        assert!(results
            .iter()
            .all(|(_, o)| matches!(o, RowOutcome::Confirmed { .. })));
    }

    #[tokio::test]
    async fn test_exhausted_retries_leave_records_reclaimable() {
        let records: Vec<AdmittedRecord> = vec![admitted(0)];
        let ledger = ledger_with(&records).await;
        let carrier = ScriptedCarrier::with(vec![
            Err(CarrierError::Timeout),
            Err(CarrierError::Timeout),
            Err(CarrierError::Timeout),
        ]);

        let uploader = BatchUploader::new(carrier, ledger.clone(), no_delay(), 400);
        let results = uploader.upload(records.clone()).await.unwrap();

        assert!(matches!(results[0].1, RowOutcome::Unresolved { .. }));
        // Failed, so a later run can admit it again.
        let admission = ledger.admit(&records[0].fingerprint, "ref-0").await.unwrap();
        assert_eq!(admission, crate::ledger::Admission::Admitted);
    }

    #[tokio::test]
    async fn test_batch_level_rejection_is_terminal() {
        let records: Vec<AdmittedRecord> = (0..2).map(admitted).collect();
        let ledger = ledger_with(&records).await;
        let carrier =
            ScriptedCarrier::with(vec![Err(CarrierError::Rejected("credenziali errate".into()))]);

        let uploader = BatchUploader::new(carrier.clone(), ledger, no_delay(), 400);
        let results = uploader.upload(records).await.unwrap();

        // No retry after a rejection.
        assert_eq!(carrier.batch_sizes.lock().unwrap().len(), 1);
        assert!(results
            .iter()
            .all(|(_, o)| matches!(o, RowOutcome::CarrierRejected { .. })));
    }
}
