use async_trait::async_trait;
use serde_json::Value;
use sluice_schemas::{destinations::UPSERT, DestinationDescriptor, Record};

use super::{DestinationWriter, LoadError};
use crate::warehouse::{check_identifier, Warehouse, WarehouseError};

/// Deletes the rows matching the chunk's merge keys, then inserts the chunk
#[derive(Debug, Clone, Copy, Default)]
pub struct UpsertWriter;

#[async_trait]
impl DestinationWriter for UpsertWriter {
    fn load_type(&self) -> &str {
        UPSERT
    }

    fn check(&self, name: &str, destination: &DestinationDescriptor) -> Result<(), LoadError> {
        match destination.merge_key.as_deref() {
            Some(key) => check_identifier(key)
                .map(|_| ())
                .map_err(|error| LoadError::Connection {
                    destination: name.to_string(),
                    error,
                }),
            None => Err(LoadError::MissingMergeKey(name.to_string())),
        }
    }

    async fn write_chunk(
        &self,
        warehouse: &dyn Warehouse,
        destination: &DestinationDescriptor,
        rows: &[Record],
    ) -> Result<usize, WarehouseError> {
        let Some(merge_key) = destination.merge_key.as_deref() else {
            return Err(WarehouseError::Unsupported(format!(
                "upsert into '{}' without merge key",
                destination.table
            )));
        };

        let keys = merge_keys(rows, merge_key);
        warehouse
            .replace_where_in(&destination.table, merge_key, &keys, rows)
            .await
    }
}

/// Distinct non-null merge key values in first-seen order
fn merge_keys(rows: &[Record], merge_key: &str) -> Vec<Value> {
    let mut keys: Vec<Value> = Vec::with_capacity(rows.len());
    for key in rows.iter().filter_map(|row| row.get(merge_key)) {
        if !key.is_null() && !keys.contains(key) {
            keys.push(key.clone());
        }
    }
    keys
}
