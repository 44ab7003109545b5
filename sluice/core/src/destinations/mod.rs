//! Loading of validated records into destination tables.
//!
//! Each destination's load type selects a [`DestinationWriter`] from a
//! [`WriterRegistry`]. Records are written in chunks of the destination's
//! `batch_size`; a failing chunk is counted and logged without stopping the
//! load. Configuration errors abort it.

use async_trait::async_trait;
use serde_json::Value;
use sluice_schemas::{DestinationDescriptor, DestinationLoad, LoadResult, ProgressEvent, Record};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, instrument};

use crate::progress_tracker::ProgressTracker;
use crate::transform::TransformedRecord;
use crate::warehouse::{check_identifier, Connections, Warehouse, WarehouseError};

mod append;
pub(crate) mod error;
mod upsert;

pub use append::AppendWriter;
pub use error::LoadError;
pub use upsert::UpsertWriter;

/// Column holding the batch id when `include_metadata` is set
pub const BATCH_ID_COLUMN: &str = "etl_batch_id";
/// Column holding the validation score when `include_metadata` is set
pub const SCORE_COLUMN: &str = "validation_score";

/// Writes chunks of rows for one load type
#[async_trait]
pub trait DestinationWriter: Send + Sync {
    /// Load type handled by this writer
    fn load_type(&self) -> &str;

    /// Reject destination configurations this writer cannot serve
    fn check(&self, _name: &str, _destination: &DestinationDescriptor) -> Result<(), LoadError> {
        Ok(())
    }

    /// Write one chunk, returning the number of rows written
    async fn write_chunk(
        &self,
        warehouse: &dyn Warehouse,
        destination: &DestinationDescriptor,
        rows: &[Record],
    ) -> Result<usize, WarehouseError>;
}

/// Writers keyed by load type
#[derive(Clone, Default)]
pub struct WriterRegistry {
    writers: HashMap<String, Arc<dyn DestinationWriter>>,
}

impl WriterRegistry {
    /// Registry with the `append` and `upsert` writers
    pub fn with_defaults() -> Self {
        let mut registry = Self::default();
        registry.register(Arc::new(AppendWriter));
        registry.register(Arc::new(UpsertWriter));
        registry
    }

    pub fn register(&mut self, writer: Arc<dyn DestinationWriter>) {
        self.writers.insert(writer.load_type().to_string(), writer);
    }

    pub fn get(&self, load_type: &str) -> Option<&Arc<dyn DestinationWriter>> {
        self.writers.get(load_type)
    }
}

#[derive(Clone, derive_new::new)]
pub struct Loader {
    registry: WriterRegistry,
    connections: Connections,
}

impl Loader {
    /// Load `records` into every destination in order
    #[instrument(skip_all, fields(records = records.len()), err)]
    pub async fn load(
        &self,
        batch_id: &str,
        records: &[TransformedRecord],
        destinations: &[(String, DestinationDescriptor)],
        tracker: Option<&Arc<dyn ProgressTracker>>,
    ) -> Result<LoadResult, LoadError> {
        let mut result = LoadResult::default();

        for (name, destination) in destinations {
            let time = Instant::now();
            let load = self.load_destination(batch_id, records, name, destination).await?;

            debug!(
                destination = %name,
                successful = load.records_successful,
                failed = load.records_failed,
                "Loaded destination ... Elapsed time: {:.2?}",
                time.elapsed()
            );

            if let Some(tracker) = tracker {
                tracker.on_progress(ProgressEvent::DestinationLoaded {
                    name: name.clone(),
                    successful: load.records_successful,
                    failed: load.records_failed,
                });
            }

            result.absorb(name.clone(), load);
        }

        Ok(result)
    }

    async fn load_destination(
        &self,
        batch_id: &str,
        records: &[TransformedRecord],
        name: &str,
        destination: &DestinationDescriptor,
    ) -> Result<DestinationLoad, LoadError> {
        let connection_error = |error: WarehouseError| LoadError::Connection {
            destination: name.to_string(),
            error,
        };

        let writer = self
            .registry
            .get(&destination.load_type)
            .ok_or_else(|| LoadError::UnknownLoadType {
                destination: name.to_string(),
                load_type: destination.load_type.clone(),
            })?;
        writer.check(name, destination)?;
        check_identifier(&destination.table).map_err(connection_error)?;

        let warehouse = self
            .connections
            .get(destination.connection.as_deref())
            .map_err(connection_error)?;

        let rows = records
            .iter()
            .map(|record| row(batch_id, record, destination.include_metadata))
            .collect::<Vec<_>>();

        let mut load = DestinationLoad {
            table: destination.table.clone(),
            records_processed: rows.len(),
            ..Default::default()
        };

        for (position, chunk) in rows.chunks(destination.batch_size.max(1)).enumerate() {
            match writer.write_chunk(warehouse.as_ref(), destination, chunk).await {
                Ok(_) => load.records_successful += chunk.len(),
                Err(e) => {
                    error!(
                        destination = name,
                        table = %destination.table,
                        chunk = position,
                        rows = chunk.len(),
                        "Failed to write chunk: {e}"
                    );
                    load.records_failed += chunk.len();
                }
            }
        }

        Ok(load)
    }
}

fn row(batch_id: &str, record: &TransformedRecord, include_metadata: bool) -> Record {
    let mut row = record.fields.clone();
    if include_metadata {
        row.insert(BATCH_ID_COLUMN.to_string(), Value::from(batch_id));
        row.insert(
            SCORE_COLUMN.to_string(),
            record.validation_score.map(Value::from).unwrap_or(Value::Null),
        );
    }
    row
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{MemoryWarehouse, WarehouseCall};
    use serde_json::json;
    use sluice_schemas::destinations::{APPEND, UPSERT};

    fn records(ids: &[i64]) -> Vec<TransformedRecord> {
        ids.iter()
            .enumerate()
            .map(|(position, id)| TransformedRecord {
                staging_id: position as i64 + 1,
                batch_id: "b-1".to_string(),
                source: "crm".to_string(),
                fields: json!({ "customer_id": id, "name": format!("c{id}") })
                    .as_object()
                    .cloned()
                    .unwrap(),
                validation_score: Some(1.0),
            })
            .collect()
    }

    fn loader(warehouse: Arc<MemoryWarehouse>) -> Loader {
        Loader::new(WriterRegistry::with_defaults(), Connections::new(warehouse))
    }

    fn destination(load_type: &str, batch_size: usize) -> DestinationDescriptor {
        DestinationDescriptor::builder()
            .table("dim_customer".to_string())
            .load_type(load_type.to_string())
            .batch_size(batch_size)
            .build()
    }

    #[tokio::test]
    async fn append_writes_in_chunks() {
        let warehouse = Arc::new(MemoryWarehouse::default());
        let destinations = vec![("dim".to_string(), destination(APPEND, 2))];

        let result = loader(warehouse.clone())
            .load("b-1", &records(&[1, 2, 3, 4, 5]), &destinations, None)
            .await
            .unwrap();

        let inserts = warehouse
            .calls()
            .into_iter()
            .map(|call| match call {
                WarehouseCall::Insert { rows, .. } => rows,
                other => panic!("unexpected call {other:?}"),
            })
            .collect::<Vec<_>>();

        assert_eq!(inserts, vec![2, 2, 1]);
        assert_eq!(result.records_processed, 5);
        assert_eq!(result.records_successful, 5);
        assert!(result.success);
    }

    #[tokio::test]
    async fn failed_chunk_is_counted_and_loading_continues() {
        let warehouse =
            Arc::new(MemoryWarehouse::default().rejecting("customer_id", json!(3)));
        let destinations = vec![("dim".to_string(), destination(APPEND, 2))];

        let result = loader(warehouse.clone())
            .load("b-1", &records(&[1, 2, 3, 4, 5]), &destinations, None)
            .await
            .unwrap();

        assert_eq!(result.records_failed, 2);
        assert_eq!(result.records_successful, 3);
        assert!(!result.success);
        assert_eq!(warehouse.rows("dim_customer").len(), 3);
    }

    #[tokio::test]
    async fn upsert_replaces_existing_keys() {
        let warehouse = Arc::new(MemoryWarehouse::default());
        warehouse
            .insert(
                "dim_customer",
                &[json!({ "customer_id": 2, "name": "old" }).as_object().cloned().unwrap()],
            )
            .await
            .unwrap();

        let mut upsert = destination(UPSERT, 1000);
        upsert.merge_key = Some("customer_id".to_string());
        let destinations = vec![("dim".to_string(), upsert)];

        let result = loader(warehouse.clone())
            .load("b-1", &records(&[1, 2, 3]), &destinations, None)
            .await
            .unwrap();

        assert!(result.success);
        assert_eq!(
            warehouse.calls()[1..],
            [
                WarehouseCall::Delete {
                    table: "dim_customer".to_string(),
                    column: "customer_id".to_string(),
                    keys: vec![json!(1), json!(2), json!(3)],
                },
                WarehouseCall::Insert {
                    table: "dim_customer".to_string(),
                    rows: 3,
                },
            ]
        );

        let names = warehouse
            .rows("dim_customer")
            .into_iter()
            .map(|row| row["name"].clone())
            .collect::<Vec<_>>();
        assert_eq!(names, vec![json!("c1"), json!("c2"), json!("c3")]);
    }

    #[tokio::test]
    async fn configuration_errors_are_fatal() {
        let warehouse = Arc::new(MemoryWarehouse::default());
        let loader = loader(warehouse.clone());

        let result = loader
            .load("b-1", &records(&[1]), &[("dim".to_string(), destination("merge", 10))], None)
            .await;
        assert!(matches!(result, Err(LoadError::UnknownLoadType { .. })));

        let result = loader
            .load("b-1", &records(&[1]), &[("dim".to_string(), destination(UPSERT, 10))], None)
            .await;
        assert!(matches!(result, Err(LoadError::MissingMergeKey(name)) if name == "dim"));

        let mut elsewhere = destination(APPEND, 10);
        elsewhere.connection = Some("reporting".to_string());
        let result = loader
            .load("b-1", &records(&[1]), &[("dim".to_string(), elsewhere)], None)
            .await;
        assert!(matches!(
            result,
            Err(LoadError::Connection {
                error: WarehouseError::UnknownConnection(_),
                ..
            })
        ));

        assert!(warehouse.calls().is_empty());
    }

    #[tokio::test]
    async fn metadata_columns() {
        let warehouse = Arc::new(MemoryWarehouse::default());
        let mut with_metadata = destination(APPEND, 10);
        with_metadata.include_metadata = true;

        loader(warehouse.clone())
            .load("b-9", &records(&[1]), &[("dim".to_string(), with_metadata)], None)
            .await
            .unwrap();

        let row = &warehouse.rows("dim_customer")[0];
        assert_eq!(row[BATCH_ID_COLUMN], json!("b-9"));
        assert_eq!(row[SCORE_COLUMN], json!(1.0));
    }
}
