use async_trait::async_trait;
use serde_json::Value;
use sluice_schemas::{sources::DATABASE, DatabaseSource, Record, SourceDescriptor};
use tracing::{debug, instrument};

use super::{ExtractContext, SourceError, SourceReader, WATERMARK_FORMAT};
use crate::warehouse::{check_identifier, Connections, WarehouseError};

/// Reads a relational table, newest rows after the watermark first
#[derive(Debug, Clone, derive_new::new)]
pub struct DatabaseReader {
    connections: Connections,
}

#[async_trait]
impl SourceReader for DatabaseReader {
    fn kind(&self) -> &str {
        DATABASE
    }

    #[instrument(skip(self, source, ctx), err)]
    async fn read(
        &self,
        name: &str,
        source: &SourceDescriptor,
        ctx: &ExtractContext,
    ) -> Result<Vec<Record>, SourceError> {
        let options: DatabaseSource = source.options().map_err(|error| SourceError::Options {
            name: name.to_string(),
            error,
        })?;

        let warehouse_error = |error: WarehouseError| SourceError::Warehouse {
            name: name.to_string(),
            error,
        };

        let (query, params) = table_query(&options, source, ctx).map_err(warehouse_error)?;
        debug!(%query, "Reading table");

        let warehouse = self
            .connections
            .get(options.connection.as_deref())
            .map_err(warehouse_error)?;

        warehouse
            .select(&query, &params)
            .await
            .map_err(warehouse_error)
    }
}

/// `SELECT * FROM t [WHERE f > ?] [AND (where)] [ORDER BY f] LIMIT ?`
fn table_query(
    options: &DatabaseSource,
    source: &SourceDescriptor,
    ctx: &ExtractContext,
) -> Result<(String, Vec<Value>), WarehouseError> {
    let table = check_identifier(&options.table)?;
    let field = source
        .incremental_field
        .as_deref()
        .map(check_identifier)
        .transpose()?;

    let mut conditions = Vec::new();
    let mut params = Vec::new();

    if let (Some(field), Some(watermark)) = (field, ctx.watermark) {
        conditions.push(format!("{field} > ?"));
        params.push(Value::String(
            watermark.format(WATERMARK_FORMAT).to_string(),
        ));
    }

    if let Some(filter) = &options.filter {
        conditions.push(format!("({filter})"));
    }

    let mut query = format!("SELECT * FROM {table}");
    if !conditions.is_empty() {
        query.push_str(" WHERE ");
        query.push_str(&conditions.join(" AND "));
    }
    if let Some(field) = field {
        query.push_str(&format!(" ORDER BY {field}"));
    }
    query.push_str(" LIMIT ?");
    params.push(Value::from(source.batch_size));

    Ok((query, params))
}
