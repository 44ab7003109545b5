use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};
use sluice_core::ledger::{BatchLedger, LedgerError};
use sluice_schemas::{Batch, BatchStatus, RunSummary};

use crate::store::{conversion_error, from_sqlite, to_sqlite, SqliteStore};

const BATCH_COLUMNS: &str =
    "id, pipeline, status, message, result, attempts, started_at, created_at, updated_at";

fn batch_from_row(row: &Row<'_>) -> rusqlite::Result<Batch> {
    let status: String = row.get(2)?;
    let result: Option<String> = row.get(4)?;
    let started_at: Option<String> = row.get(6)?;
    let created_at: String = row.get(7)?;
    let updated_at: String = row.get(8)?;

    Ok(Batch {
        id: row.get(0)?,
        pipeline: row.get(1)?,
        status: status.parse().map_err(|e| conversion_error(2, e))?,
        message: row.get(3)?,
        result: result
            .map(|raw| serde_json::from_str::<RunSummary>(&raw))
            .transpose()
            .map_err(|e| conversion_error(4, e))?,
        attempts: row.get(5)?,
        started_at: started_at
            .map(|raw| from_sqlite(6, &raw))
            .transpose()?,
        created_at: from_sqlite(7, &created_at)?,
        updated_at: from_sqlite(8, &updated_at)?,
    })
}

#[async_trait]
impl BatchLedger for SqliteStore {
    async fn create(&self, batch_id: &str, pipeline: &str) -> Result<Batch, LedgerError> {
        let conn = self.lock_conn(LedgerError::LockPoisoned)?;
        let batch = Batch::new(batch_id, pipeline, Utc::now());

        let inserted = conn
            .execute(
                "INSERT OR IGNORE INTO etl_batches \
                 (id, pipeline, status, attempts, created_at, updated_at) \
                 VALUES (?1, ?2, ?3, 0, ?4, ?4)",
                params![
                    batch.id,
                    batch.pipeline,
                    batch.status.as_str(),
                    to_sqlite(batch.created_at)
                ],
            )
            .map_err(LedgerError::backend)?;

        if inserted == 0 {
            return Err(LedgerError::AlreadyExists(batch_id.to_string()));
        }

        Ok(batch)
    }

    async fn find(&self, batch_id: &str) -> Result<Option<Batch>, LedgerError> {
        let conn = self.lock_conn(LedgerError::LockPoisoned)?;
        conn.query_row(
            &format!("SELECT {BATCH_COLUMNS} FROM etl_batches WHERE id = ?1"),
            [batch_id],
            batch_from_row,
        )
        .optional()
        .map_err(LedgerError::backend)
    }

    async fn update_status(
        &self,
        batch_id: &str,
        status: BatchStatus,
        message: Option<String>,
        result: Option<RunSummary>,
    ) -> Result<bool, LedgerError> {
        let mut conn = self.lock_conn(LedgerError::LockPoisoned)?;
        let tx = conn.transaction().map_err(LedgerError::backend)?;

        let Some(mut batch) = tx
            .query_row(
                &format!("SELECT {BATCH_COLUMNS} FROM etl_batches WHERE id = ?1"),
                [batch_id],
                batch_from_row,
            )
            .optional()
            .map_err(LedgerError::backend)?
        else {
            return Ok(false);
        };

        if !batch.apply(status, message, result, Utc::now()) {
            return Ok(false);
        }

        let result = batch
            .result
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(LedgerError::backend)?;

        tx.execute(
            "UPDATE etl_batches SET status = ?2, message = ?3, result = ?4, attempts = ?5, \
             started_at = ?6, updated_at = ?7 WHERE id = ?1",
            params![
                batch.id,
                batch.status.as_str(),
                batch.message,
                result,
                batch.attempts,
                batch.started_at.map(to_sqlite),
                to_sqlite(batch.updated_at)
            ],
        )
        .map_err(LedgerError::backend)?;
        tx.commit().map_err(LedgerError::backend)?;

        Ok(true)
    }

    async fn last_completed_start(
        &self,
        pipeline: &str,
    ) -> Result<Option<DateTime<Utc>>, LedgerError> {
        let conn = self.lock_conn(LedgerError::LockPoisoned)?;
        let started_at: Option<String> = conn
            .query_row(
                "SELECT MAX(started_at) FROM etl_batches WHERE pipeline = ?1 AND status = ?2",
                params![pipeline, BatchStatus::Completed.as_str()],
                |row| row.get(0),
            )
            .map_err(LedgerError::backend)?;

        started_at
            .map(|raw| from_sqlite(0, &raw))
            .transpose()
            .map_err(LedgerError::backend)
    }
}
