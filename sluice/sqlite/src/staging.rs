use async_trait::async_trait;
use rusqlite::{params, OptionalExtension};
use sluice_core::staging::{StagingError, StagingStore};
use sluice_schemas::{NewStagedRecord, StagedRecord, StagingStatus};
use tracing::debug;

use crate::store::{conversion_error, from_sqlite, to_sqlite, SqliteStore};

#[async_trait]
impl StagingStore for SqliteStore {
    async fn insert(&self, records: Vec<NewStagedRecord>) -> Result<usize, StagingError> {
        let mut conn = self.lock_conn(StagingError::LockPoisoned)?;
        let tx = conn.transaction().map_err(StagingError::backend)?;

        {
            let mut stmt = tx
                .prepare_cached(
                    "INSERT INTO etl_staging (batch_id, source, payload, extracted_at, status) \
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                )
                .map_err(StagingError::backend)?;

            for record in &records {
                stmt.execute(params![
                    record.batch_id,
                    record.source,
                    record.payload,
                    to_sqlite(record.extracted_at),
                    StagingStatus::Pending.as_str()
                ])
                .map_err(StagingError::backend)?;
            }
        }

        tx.commit().map_err(StagingError::backend)?;
        debug!(records = records.len(), "Inserted staging chunk");

        Ok(records.len())
    }

    async fn load(&self, batch_id: &str) -> Result<Vec<StagedRecord>, StagingError> {
        let conn = self.lock_conn(StagingError::LockPoisoned)?;
        let mut stmt = conn
            .prepare(
                "SELECT id, batch_id, source, payload, extracted_at, status, error \
                 FROM etl_staging WHERE batch_id = ?1 ORDER BY id",
            )
            .map_err(StagingError::backend)?;

        let rows = stmt
            .query_map([batch_id], |row| {
                let extracted_at: String = row.get(4)?;
                let status: String = row.get(5)?;
                Ok(StagedRecord {
                    id: row.get(0)?,
                    batch_id: row.get(1)?,
                    source: row.get(2)?,
                    payload: row.get(3)?,
                    extracted_at: from_sqlite(4, &extracted_at)?,
                    status: status.parse().map_err(|e| conversion_error(5, e))?,
                    error: row.get(6)?,
                })
            })
            .map_err(StagingError::backend)?;

        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(StagingError::backend)
    }

    async fn mark(
        &self,
        id: i64,
        status: StagingStatus,
        error: Option<String>,
    ) -> Result<bool, StagingError> {
        let conn = self.lock_conn(StagingError::LockPoisoned)?;

        let current: Option<String> = conn
            .query_row("SELECT status FROM etl_staging WHERE id = ?1", [id], |row| {
                row.get(0)
            })
            .optional()
            .map_err(StagingError::backend)?;

        let Some(current) = current else {
            return Ok(false);
        };
        let current: StagingStatus = current.parse().map_err(StagingError::backend)?;
        if !current.can_transition_to(status) {
            return Ok(false);
        }

        conn.execute(
            "UPDATE etl_staging SET status = ?2, error = ?3 WHERE id = ?1",
            params![id, status.as_str(), error],
        )
        .map_err(StagingError::backend)?;

        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn record(batch_id: &str, payload: &str) -> NewStagedRecord {
        NewStagedRecord {
            batch_id: batch_id.to_string(),
            source: "carrier".to_string(),
            payload: payload.as_bytes().to_vec(),
            extracted_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn insert_and_load_by_batch() {
        let store = SqliteStore::in_memory().unwrap();

        let inserted = store
            .insert(vec![
                record("b-1", r#"{"id":1}"#),
                record("b-2", r#"{"id":2}"#),
                record("b-1", r#"{"id":3}"#),
            ])
            .await
            .unwrap();
        assert_eq!(inserted, 3);

        let staged = store.load("b-1").await.unwrap();
        assert_eq!(staged.len(), 2);
        assert_eq!(staged[0].payload, br#"{"id":1}"#.to_vec());
        assert_eq!(staged[1].payload, br#"{"id":3}"#.to_vec());
        assert!(staged[0].id < staged[1].id);
        assert!(staged.iter().all(|r| r.status == StagingStatus::Pending));
    }

    #[tokio::test]
    async fn status_only_moves_forward() {
        let store = SqliteStore::in_memory().unwrap();
        store.insert(vec![record("b-1", "{}")]).await.unwrap();
        let id = store.load("b-1").await.unwrap()[0].id;

        assert!(store.mark(id, StagingStatus::Transformed, None).await.unwrap());
        assert!(store
            .mark(id, StagingStatus::Failed, Some("[\"bad\"]".to_string()))
            .await
            .unwrap());
        assert!(!store.mark(id, StagingStatus::Pending, None).await.unwrap());
        assert!(!store.mark(id + 1, StagingStatus::Failed, None).await.unwrap());

        let staged = &store.load("b-1").await.unwrap()[0];
        assert_eq!(staged.status, StagingStatus::Failed);
        assert_eq!(staged.error.as_deref(), Some("[\"bad\"]"));
    }
}
