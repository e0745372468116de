//! End-to-end pipeline tests with in-process collaborators.

use async_trait::async_trait;
use bolla_core::carrier::{CarrierClient, CarrierError, RecordOutcome, RemoteShipment};
use bolla_core::config::PipelineConfig;
use bolla_core::geocode::{AddressQuery, GeocodeCandidate, GeocodeError, GeocodeProvider};
use bolla_core::ledger::UploadLedger;
use bolla_core::model::{Confidence, InputRow, RowOutcome, ShipmentRecord};
use bolla_core::pipeline::{InputSource, Pipeline};
use bolla_core::retry::RetryConfig;
use std::sync::{Arc, Mutex};

struct EchoGeocoder;

#[async_trait]
impl GeocodeProvider for EchoGeocoder {
    async fn resolve(&self, query: &AddressQuery) -> Result<GeocodeCandidate, GeocodeError> {
        Ok(GeocodeCandidate {
            street: Some(query.street.clone()),
            street_number: None,
            locality: Some(query.city.clone()),
            postal_code: Some(query.postal_code.clone()),
            confidence: Confidence::Exact,
        })
    }
}

/// Accepts everything; remembers batch sizes, references, and package counts.
#[derive(Default)]
struct RecordingCarrier {
    batch_sizes: Mutex<Vec<usize>>,
    package_total: Mutex<u32>,
    references: Mutex<Vec<String>>,
    remote: Mutex<Vec<RemoteShipment>>,
}

#[async_trait]
impl CarrierClient for RecordingCarrier {
    async fn submit(&self, records: &[ShipmentRecord]) -> Result<Vec<RecordOutcome>, CarrierError> {
        self.batch_sizes.lock().unwrap().push(records.len());
        *self.package_total.lock().unwrap() += records.iter().map(|r| r.packages).sum::<u32>();
        let mut references = self.references.lock().unwrap();
        Ok(records
            .iter()
            .map(|r| {
                references.push(r.reference.clone());
                RecordOutcome {
                    reference: r.reference.clone(),
                    shipment_number: Some(format!("sn-{}", references.len())),
                    accepted: true,
                    message: None,
                }
            })
            .collect())
    }

    async fn confirm_open_shipments(&self) -> Result<(), CarrierError> {
        Ok(())
    }

    async fn query_status(&self, reference: &str) -> Result<Option<RemoteShipment>, CarrierError> {
        Ok(self
            .remote
            .lock()
            .unwrap()
            .iter()
            .find(|s| s.reference == reference)
            .cloned())
    }
}

fn row(ordinal: u32) -> InputRow {
    InputRow {
        ordinal,
        recipient: format!("Negozio {}", ordinal),
        address: format!("Via Giuseppe Verdi {}", ordinal),
        city: "Bologna".into(),
        postal_code: "40121".into(),
        province: "BO".into(),
        mobile_phone: Some("3331234567".into()),
        landline_phone: None,
        email: None,
        instructions: None,
        packages: None,
        weight_kg: None,
        reference: None,
    }
}

fn new_layout_source(rows: Vec<InputRow>) -> InputSource {
    InputSource {
        name: "rete_NEW_settembre.xlsx".into(),
        header_columns: vec!["Location negozio".into(), "Indirizzo".into(), "CAP".into()],
        rows,
    }
}

fn fast_config() -> PipelineConfig {
    PipelineConfig {
        retry: RetryConfig { max_attempts: 2, base_delay_ms: 0, max_delay_ms: 0, jitter: false },
        ..PipelineConfig::default()
    }
}

#[tokio::test]
async fn large_source_is_split_into_ordered_batches() {
    let carrier = Arc::new(RecordingCarrier::default());
    let ledger = Arc::new(UploadLedger::open_in_memory().await.unwrap());
    let pipeline = Pipeline::new(Arc::new(EchoGeocoder), carrier.clone(), ledger, fast_config());

    let rows: Vec<InputRow> = (1..=1000).map(row).collect();
    let summary = pipeline.run(new_layout_source(rows)).await.unwrap();

    assert_eq!(summary.confirmed, 1000);
    assert!(summary.is_clean());
    assert_eq!(*carrier.batch_sizes.lock().unwrap(), vec![400, 400, 200]);
    // NEW layout defaults to 2 packages per shipment.
    assert_eq!(*carrier.package_total.lock().unwrap(), 2000);

    // Every generated reference is unique.
    let references = carrier.references.lock().unwrap();
    let mut deduped = references.clone();
    deduped.sort();
    deduped.dedup();
    assert_eq!(deduped.len(), references.len());
}

#[tokio::test]
async fn interrupted_run_is_reconciled_not_resubmitted() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ledger.db");

    let carrier = Arc::new(RecordingCarrier::default());
    let rows = vec![row(1), row(2)];

    // First run completes normally.
    {
        let ledger = Arc::new(UploadLedger::open(&path).await.unwrap());
        let pipeline =
            Pipeline::new(Arc::new(EchoGeocoder), carrier.clone(), ledger, fast_config());
        let summary = pipeline.run(new_layout_source(rows.clone())).await.unwrap();
        assert_eq!(summary.confirmed, 2);
    }

    // Second run with the same rows: nothing reaches the carrier again.
    let ledger = Arc::new(UploadLedger::open(&path).await.unwrap());
    let pipeline = Pipeline::new(Arc::new(EchoGeocoder), carrier.clone(), ledger, fast_config());
    let summary = pipeline.run(new_layout_source(rows)).await.unwrap();

    assert_eq!(summary.confirmed, 0);
    assert_eq!(summary.skipped_duplicates, 2);
    assert!(summary.is_clean());
    assert_eq!(carrier.batch_sizes.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn agency_rows_without_quantities_fail_rows_not_run() {
    let carrier = Arc::new(RecordingCarrier::default());
    let ledger = Arc::new(UploadLedger::open_in_memory().await.unwrap());
    let pipeline = Pipeline::new(Arc::new(EchoGeocoder), carrier.clone(), ledger, fast_config());

    let mut complete = row(1);
    complete.packages = Some(4);
    complete.weight_kg = Some(18.0);
    let incomplete = row(2);

    let summary = pipeline
        .run(InputSource {
            name: "AGENZIE_nord.xlsx".into(),
            header_columns: vec!["Area".into(), "Indirizzo".into()],
            rows: vec![complete, incomplete],
        })
        .await
        .unwrap();

    assert_eq!(summary.confirmed, 1);
    assert_eq!(summary.data_quality_failures, 1);
    assert!(matches!(
        summary.rows[1].outcome,
        RowOutcome::Rejected { .. }
    ));
    assert_eq!(*carrier.package_total.lock().unwrap(), 4);
}
