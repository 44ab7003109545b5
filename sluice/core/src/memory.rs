//! In-memory implementations of the storage boundaries.
//!
//! Useful for embedding the pipeline in tests. The warehouse records every
//! call it receives and cannot execute SQL: `select` returns the rows it was
//! seeded with.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sluice_schemas::{
    Batch, BatchStatus, NewStagedRecord, Record, RunSummary, StagedRecord, StagingStatus,
};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

use crate::aggregate::{glob_to_regex, AggregateError, AggregationRefresher, CacheInvalidator};
use crate::ledger::{BatchLedger, LedgerError};
use crate::staging::{StagingError, StagingStore};
use crate::warehouse::{Warehouse, WarehouseError};

fn lock<T, E>(mutex: &Mutex<T>, poisoned: E) -> Result<MutexGuard<'_, T>, E> {
    mutex.lock().map_err(|_| poisoned)
}

#[derive(Debug, Default)]
pub struct MemoryLedger {
    batches: Mutex<HashMap<String, Batch>>,
}

impl MemoryLedger {
    /// Insert a batch as-is, bypassing transition checks
    pub fn seed(&self, batch: Batch) {
        if let Ok(mut batches) = self.batches.lock() {
            batches.insert(batch.id.clone(), batch);
        }
    }
}

#[async_trait]
impl BatchLedger for MemoryLedger {
    async fn create(&self, batch_id: &str, pipeline: &str) -> Result<Batch, LedgerError> {
        let mut batches = lock(&self.batches, LedgerError::LockPoisoned)?;
        if batches.contains_key(batch_id) {
            return Err(LedgerError::AlreadyExists(batch_id.to_string()));
        }

        let batch = Batch::new(batch_id, pipeline, Utc::now());
        batches.insert(batch_id.to_string(), batch.clone());
        Ok(batch)
    }

    async fn find(&self, batch_id: &str) -> Result<Option<Batch>, LedgerError> {
        Ok(lock(&self.batches, LedgerError::LockPoisoned)?
            .get(batch_id)
            .cloned())
    }

    async fn update_status(
        &self,
        batch_id: &str,
        status: BatchStatus,
        message: Option<String>,
        result: Option<RunSummary>,
    ) -> Result<bool, LedgerError> {
        let mut batches = lock(&self.batches, LedgerError::LockPoisoned)?;
        Ok(batches
            .get_mut(batch_id)
            .is_some_and(|batch| batch.apply(status, message, result, Utc::now())))
    }

    async fn last_completed_start(
        &self,
        pipeline: &str,
    ) -> Result<Option<DateTime<Utc>>, LedgerError> {
        Ok(lock(&self.batches, LedgerError::LockPoisoned)?
            .values()
            .filter(|b| b.pipeline == pipeline && b.status == BatchStatus::Completed)
            .filter_map(|b| b.started_at)
            .max())
    }
}

#[derive(Debug, Default)]
struct StagingState {
    next_id: i64,
    records: Vec<StagedRecord>,
    chunks: Vec<usize>,
}

#[derive(Debug, Default)]
pub struct MemoryStaging {
    state: Mutex<StagingState>,
}

impl MemoryStaging {
    /// Sizes of the chunks passed to `insert`
    pub fn chunks(&self) -> Vec<usize> {
        self.state
            .lock()
            .map(|state| state.chunks.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl StagingStore for MemoryStaging {
    async fn insert(&self, records: Vec<NewStagedRecord>) -> Result<usize, StagingError> {
        let mut state = lock(&self.state, StagingError::LockPoisoned)?;
        let count = records.len();
        state.chunks.push(count);

        for record in records {
            state.next_id += 1;
            let id = state.next_id;
            state.records.push(StagedRecord {
                id,
                batch_id: record.batch_id,
                source: record.source,
                payload: record.payload,
                extracted_at: record.extracted_at,
                status: StagingStatus::Pending,
                error: None,
            });
        }

        Ok(count)
    }

    async fn load(&self, batch_id: &str) -> Result<Vec<StagedRecord>, StagingError> {
        Ok(lock(&self.state, StagingError::LockPoisoned)?
            .records
            .iter()
            .filter(|r| r.batch_id == batch_id)
            .cloned()
            .collect())
    }

    async fn mark(
        &self,
        id: i64,
        status: StagingStatus,
        error: Option<String>,
    ) -> Result<bool, StagingError> {
        let mut state = lock(&self.state, StagingError::LockPoisoned)?;
        let Some(record) = state.records.iter_mut().find(|r| r.id == id) else {
            return Ok(false);
        };
        if !record.status.can_transition_to(status) {
            return Ok(false);
        }

        record.status = status;
        record.error = error;
        Ok(true)
    }
}

/// A call received by [`MemoryWarehouse`]
#[derive(Debug, Clone, PartialEq)]
pub enum WarehouseCall {
    Select {
        query: String,
        params: Vec<Value>,
    },
    Insert {
        table: String,
        rows: usize,
    },
    Delete {
        table: String,
        column: String,
        keys: Vec<Value>,
    },
}

#[derive(Debug, Default)]
struct WarehouseState {
    tables: HashMap<String, Vec<Record>>,
    calls: Vec<WarehouseCall>,
}

#[derive(Debug, Default)]
pub struct MemoryWarehouse {
    state: Mutex<WarehouseState>,
    select_rows: Vec<Record>,
    reject: Option<(String, Value)>,
}

impl MemoryWarehouse {
    /// Rows returned by every `select`
    pub fn with_select_rows(mut self, rows: Vec<Record>) -> Self {
        self.select_rows = rows;
        self
    }

    /// Fail every insert containing a row whose `column` equals `value`
    pub fn rejecting(mut self, column: impl Into<String>, value: Value) -> Self {
        self.reject = Some((column.into(), value));
        self
    }

    pub fn calls(&self) -> Vec<WarehouseCall> {
        self.state
            .lock()
            .map(|state| state.calls.clone())
            .unwrap_or_default()
    }

    pub fn rows(&self, table: &str) -> Vec<Record> {
        self.state
            .lock()
            .ok()
            .and_then(|state| state.tables.get(table).cloned())
            .unwrap_or_default()
    }

    fn rejects(&self, rows: &[Record]) -> bool {
        self.reject.as_ref().is_some_and(|(column, value)| {
            rows.iter().any(|row| row.get(column) == Some(value))
        })
    }
}

#[async_trait]
impl Warehouse for MemoryWarehouse {
    async fn select(&self, query: &str, params: &[Value]) -> Result<Vec<Record>, WarehouseError> {
        lock(&self.state, WarehouseError::LockPoisoned)?
            .calls
            .push(WarehouseCall::Select {
                query: query.to_string(),
                params: params.to_vec(),
            });
        Ok(self.select_rows.clone())
    }

    async fn insert(&self, table: &str, rows: &[Record]) -> Result<usize, WarehouseError> {
        let mut state = lock(&self.state, WarehouseError::LockPoisoned)?;
        state.calls.push(WarehouseCall::Insert {
            table: table.to_string(),
            rows: rows.len(),
        });

        if self.rejects(rows) {
            return Err(WarehouseError::backend(format!(
                "insert into '{table}' rejected"
            )));
        }

        state
            .tables
            .entry(table.to_string())
            .or_default()
            .extend(rows.iter().cloned());
        Ok(rows.len())
    }

    async fn delete_where_in(
        &self,
        table: &str,
        column: &str,
        keys: &[Value],
    ) -> Result<usize, WarehouseError> {
        let mut state = lock(&self.state, WarehouseError::LockPoisoned)?;
        state.calls.push(WarehouseCall::Delete {
            table: table.to_string(),
            column: column.to_string(),
            keys: keys.to_vec(),
        });

        let Some(rows) = state.tables.get_mut(table) else {
            return Ok(0);
        };
        let before = rows.len();
        rows.retain(|row| !row.get(column).is_some_and(|value| keys.contains(value)));
        Ok(before - rows.len())
    }
}

/// Key/value cache namespace store
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: Mutex<BTreeMap<String, Value>>,
    invalidated: Mutex<Vec<String>>,
}

impl MemoryCache {
    pub fn put(&self, key: impl Into<String>, value: Value) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.insert(key.into(), value);
        }
    }

    /// Remaining keys in order
    pub fn keys(&self) -> Vec<String> {
        self.entries
            .lock()
            .map(|entries| entries.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Patterns received by `invalidate_pattern`
    pub fn invalidated(&self) -> Vec<String> {
        self.invalidated
            .lock()
            .map(|patterns| patterns.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl CacheInvalidator for MemoryCache {
    async fn invalidate_pattern(&self, pattern: &str) -> Result<usize, AggregateError> {
        let regex = glob_to_regex(pattern)?;
        lock(&self.invalidated, AggregateError::LockPoisoned)?.push(pattern.to_string());

        let mut entries = lock(&self.entries, AggregateError::LockPoisoned)?;
        let before = entries.len();
        entries.retain(|key, _| !regex.is_match(key));
        Ok(before - entries.len())
    }
}

/// Refresher recording the pipelines it was asked to refresh
#[derive(Debug, Default)]
pub struct RecordingRefresher {
    calls: Mutex<Vec<String>>,
    fail: bool,
}

impl RecordingRefresher {
    /// A refresher failing every call
    pub fn failing() -> Self {
        Self {
            calls: Mutex::default(),
            fail: true,
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls
            .lock()
            .map(|calls| calls.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl AggregationRefresher for RecordingRefresher {
    async fn refresh(&self, pipeline: &str, _batch_id: &str) -> Result<(), AggregateError> {
        lock(&self.calls, AggregateError::LockPoisoned)?.push(pipeline.to_string());

        if self.fail {
            return Err(AggregateError::Refresh {
                pipeline: pipeline.to_string(),
                reason: "refresh failed".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn ledger_enforces_transitions() {
        let ledger = MemoryLedger::default();
        ledger.create("b-1", "orders").await.unwrap();

        assert!(matches!(
            ledger.create("b-1", "orders").await,
            Err(LedgerError::AlreadyExists(_))
        ));
        assert!(!ledger
            .update_status("missing", BatchStatus::Running, None, None)
            .await
            .unwrap());

        assert!(ledger
            .update_status("b-1", BatchStatus::Running, None, None)
            .await
            .unwrap());
        assert!(ledger
            .update_status("b-1", BatchStatus::Completed, None, Some(RunSummary::default()))
            .await
            .unwrap());
        assert!(!ledger
            .update_status("b-1", BatchStatus::Running, None, None)
            .await
            .unwrap());

        let batch = ledger.find("b-1").await.unwrap().unwrap();
        assert_eq!(batch.status, BatchStatus::Completed);
        assert_eq!(
            ledger.last_completed_start("orders").await.unwrap(),
            batch.started_at
        );
        assert_eq!(ledger.last_completed_start("customers").await.unwrap(), None);
    }

    #[tokio::test]
    async fn warehouse_deletes_by_key_set() {
        let warehouse = MemoryWarehouse::default();
        let rows = (1..=3)
            .map(|id| Record::from_iter([("id".to_string(), Value::from(id))]))
            .collect::<Vec<_>>();
        warehouse.insert("dim", &rows).await.unwrap();

        let deleted = warehouse
            .delete_where_in("dim", "id", &[Value::from(1), Value::from(3)])
            .await
            .unwrap();

        assert_eq!(deleted, 2);
        assert_eq!(warehouse.rows("dim"), vec![rows[1].clone()]);
    }
}
