//! Durable upload ledger (duplicate tracker)
//!
//! The ledger is the pipeline's only memory across runs: a fingerprint ->
//! entry store in a single SQLite file. An admitted fingerprint moves
//! Pending -> Submitted before the network call, then Confirmed or
//! Failed(reason). Failed entries may be re-admitted on a later run;
//! Confirmed entries never are. Entries are never deleted.
//!
//! The pool is capped at one connection, which makes every admit and state
//! transition serialized: admit-then-mark-submitted cannot interleave for
//! the same fingerprint within a run.

use bolla_common::{BollaError, Fingerprint, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use std::path::Path;
use tracing::info;

/// Submission status of one fingerprint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadStatus {
    /// Admitted this run, not yet handed to the carrier.
    Pending,
    /// Handed to the carrier; outcome not yet recorded.
    Submitted,
    /// Carrier accepted and assigned a shipment number.
    Confirmed,
    /// Terminal for this run; eligible for re-admission on a later run.
    Failed,
}

impl UploadStatus {
    pub fn as_str(&self) -> &str {
        match self {
            UploadStatus::Pending => "pending",
            UploadStatus::Submitted => "submitted",
            UploadStatus::Confirmed => "confirmed",
            UploadStatus::Failed => "failed",
        }
    }
}

impl From<&str> for UploadStatus {
    fn from(s: &str) -> Self {
        match s {
            "pending" => UploadStatus::Pending,
            "submitted" => UploadStatus::Submitted,
            "confirmed" => UploadStatus::Confirmed,
            "failed" => UploadStatus::Failed,
            // An unknown state is reconciled like a stuck submission,
            // never assumed resolved.
            _ => UploadStatus::Submitted,
        }
    }
}

/// One row of the ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub fingerprint: Fingerprint,
    pub status: UploadStatus,
    pub shipment_number: Option<String>,
    pub failure_reason: Option<String>,
    /// Customer reference ("Bda") the record carried; reconciliation keys
    /// status queries on it.
    pub reference: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Result of asking the ledger to admit a fingerprint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    Admitted,
    Skipped(UploadStatus),
}

pub struct UploadLedger {
    pool: SqlitePool,
}

impl UploadLedger {
    /// Open (or create) the ledger file at `path`.
    pub async fn open(path: &Path) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        Self::connect(options).await
    }

    /// In-memory ledger for tests; gone when dropped.
    pub async fn open_in_memory() -> Result<Self> {
        Self::connect(SqliteConnectOptions::new().in_memory(true)).await
    }

    async fn connect(options: SqliteConnectOptions) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            // Single writer: serializes admit/commit and keeps an in-memory
            // database on one shared connection.
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(db_err)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS upload_ledger (
                fingerprint     TEXT PRIMARY KEY,
                status          TEXT NOT NULL,
                shipment_number TEXT,
                failure_reason  TEXT,
                reference       TEXT,
                created_at      TEXT NOT NULL,
                updated_at      TEXT NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await
        .map_err(db_err)?;

        Ok(Self { pool })
    }

    /// Admit a fingerprint for upload, atomically.
    ///
    /// First sighting and re-admission of a Failed entry both yield
    /// `Admitted`; anything already Pending, Submitted, or Confirmed is
    /// skipped with its current status.
    pub async fn admit(&self, fingerprint: &Fingerprint, reference: &str) -> Result<Admission> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO upload_ledger (fingerprint, status, reference, created_at, updated_at)
            VALUES (?1, 'pending', ?2, ?3, ?3)
            ON CONFLICT(fingerprint) DO NOTHING
            "#,
        )
        .bind(fingerprint.as_str())
        .bind(reference)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?
        .rows_affected();

        if inserted == 1 {
            tx.commit().await.map_err(db_err)?;
            return Ok(Admission::Admitted);
        }

        let status: String =
            sqlx::query_scalar("SELECT status FROM upload_ledger WHERE fingerprint = ?1")
                .bind(fingerprint.as_str())
                .fetch_one(&mut *tx)
                .await
                .map_err(db_err)?;

        let admission = match UploadStatus::from(status.as_str()) {
            UploadStatus::Failed => {
                let updated = sqlx::query(
                    r#"
                    UPDATE upload_ledger
                    SET status = 'pending', failure_reason = NULL,
                        reference = ?2, updated_at = ?3
                    WHERE fingerprint = ?1 AND status = 'failed'
                    "#,
                )
                .bind(fingerprint.as_str())
                .bind(reference)
                .bind(now)
                .execute(&mut *tx)
                .await
                .map_err(db_err)?
                .rows_affected();

                if updated == 1 {
                    Admission::Admitted
                } else {
                    Admission::Skipped(UploadStatus::Pending)
                }
            },
            other => Admission::Skipped(other),
        };

        tx.commit().await.map_err(db_err)?;
        Ok(admission)
    }

    /// Transition fingerprints to Submitted. Called immediately before the
    /// batch goes on the wire.
    pub async fn mark_submitted(&self, fingerprints: &[Fingerprint]) -> Result<()> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        for fp in fingerprints {
            sqlx::query(
                "UPDATE upload_ledger SET status = 'submitted', updated_at = ?2
                 WHERE fingerprint = ?1",
            )
            .bind(fp.as_str())
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        }
        tx.commit().await.map_err(db_err)?;
        Ok(())
    }

    pub async fn mark_confirmed(
        &self,
        fingerprint: &Fingerprint,
        shipment_number: &str,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE upload_ledger
             SET status = 'confirmed', shipment_number = ?2, failure_reason = NULL,
                 updated_at = ?3
             WHERE fingerprint = ?1",
        )
        .bind(fingerprint.as_str())
        .bind(shipment_number)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    pub async fn mark_failed(&self, fingerprint: &Fingerprint, reason: &str) -> Result<()> {
        sqlx::query(
            "UPDATE upload_ledger
             SET status = 'failed', failure_reason = ?2, updated_at = ?3
             WHERE fingerprint = ?1",
        )
        .bind(fingerprint.as_str())
        .bind(reason)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    /// Entries a previous run left in Submitted: dispatched, outcome never
    /// recorded. These must be reconciled against the carrier before the
    /// fingerprint is touched again.
    pub async fn stuck_submitted(&self) -> Result<Vec<LedgerEntry>> {
        let rows = sqlx::query(
            "SELECT fingerprint, status, shipment_number, failure_reason, reference,
                    created_at, updated_at
             FROM upload_ledger WHERE status = 'submitted'
             ORDER BY created_at",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        let entries: Vec<LedgerEntry> = rows.iter().map(entry_from_row).collect::<Result<_>>()?;
        if !entries.is_empty() {
            info!(count = entries.len(), "found submitted entries from a previous run");
        }
        Ok(entries)
    }

    pub async fn entry(&self, fingerprint: &Fingerprint) -> Result<Option<LedgerEntry>> {
        let row = sqlx::query(
            "SELECT fingerprint, status, shipment_number, failure_reason, reference,
                    created_at, updated_at
             FROM upload_ledger WHERE fingerprint = ?1",
        )
        .bind(fingerprint.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        row.as_ref().map(entry_from_row).transpose()
    }

    /// Number of entries currently in the given status.
    pub async fn count_in_status(&self, status: UploadStatus) -> Result<u64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM upload_ledger WHERE status = ?1")
                .bind(status.as_str())
                .fetch_one(&self.pool)
                .await
                .map_err(db_err)?;
        Ok(count as u64)
    }
}

fn entry_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<LedgerEntry> {
    let status: String = row.try_get("status").map_err(db_err)?;
    Ok(LedgerEntry {
        fingerprint: Fingerprint::from_key(row.try_get::<String, _>("fingerprint").map_err(db_err)?),
        status: UploadStatus::from(status.as_str()),
        shipment_number: row.try_get("shipment_number").map_err(db_err)?,
        failure_reason: row.try_get("failure_reason").map_err(db_err)?,
        reference: row.try_get("reference").map_err(db_err)?,
        created_at: row.try_get("created_at").map_err(db_err)?,
        updated_at: row.try_get("updated_at").map_err(db_err)?,
    })
}

fn db_err(e: sqlx::Error) -> BollaError {
    BollaError::Ledger(e.to_string())
}
