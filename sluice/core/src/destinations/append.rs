use async_trait::async_trait;
use sluice_schemas::{destinations::APPEND, DestinationDescriptor, Record};

use super::DestinationWriter;
use crate::warehouse::{Warehouse, WarehouseError};

/// Inserts every chunk as-is
///
/// Re-running a batch appends its rows again.
#[derive(Debug, Clone, Copy, Default)]
pub struct AppendWriter;

#[async_trait]
impl DestinationWriter for AppendWriter {
    fn load_type(&self) -> &str {
        APPEND
    }

    async fn write_chunk(
        &self,
        warehouse: &dyn Warehouse,
        destination: &DestinationDescriptor,
        rows: &[Record],
    ) -> Result<usize, WarehouseError> {
        warehouse.insert(&destination.table, rows).await
    }
}
