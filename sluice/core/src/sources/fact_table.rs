use async_trait::async_trait;
use chrono::{
    format::{Item, StrftimeItems},
    DateTime, Duration, Utc,
};
use serde_json::Value;
use sluice_schemas::{sources::FACT_TABLE, FactTableSource, Record, SourceDescriptor};
use tracing::{debug, instrument};

use super::{ExtractContext, SourceError, SourceReader};
use crate::warehouse::Connections;

/// Runs a precomputed aggregate query for the previous day
#[derive(Debug, Clone, derive_new::new)]
pub struct FactTableReader {
    connections: Connections,
}

#[async_trait]
impl SourceReader for FactTableReader {
    fn kind(&self) -> &str {
        FACT_TABLE
    }

    #[instrument(skip(self, source, ctx), err)]
    async fn read(
        &self,
        name: &str,
        source: &SourceDescriptor,
        ctx: &ExtractContext,
    ) -> Result<Vec<Record>, SourceError> {
        let options: FactTableSource = source.options().map_err(|error| SourceError::Options {
            name: name.to_string(),
            error,
        })?;

        let params = date_key_params(name, &options, ctx.run_started)?;
        debug!(placeholders = params.len(), "Running fact query");

        let warehouse = self
            .connections
            .get(options.connection.as_deref())
            .map_err(|error| SourceError::Warehouse {
                name: name.to_string(),
                error,
            })?;

        warehouse
            .select(&options.query, &params)
            .await
            .map_err(|error| SourceError::Warehouse {
                name: name.to_string(),
                error,
            })
    }
}

/// Whether `format` only holds strftime items chrono can render
pub(crate) fn is_valid_date_key_format(format: &str) -> bool {
    !StrftimeItems::new(format).any(|item| matches!(item, Item::Error))
}

/// Yesterday's date key for every `?` in the query
fn date_key_params(
    name: &str,
    options: &FactTableSource,
    run_started: DateTime<Utc>,
) -> Result<Vec<Value>, SourceError> {
    if !is_valid_date_key_format(&options.date_key_format) {
        return Err(SourceError::DateKeyFormat {
            name: name.to_string(),
            format: options.date_key_format.clone(),
        });
    }

    let yesterday = (run_started - Duration::days(1)).date_naive();
    let key = yesterday.format(&options.date_key_format).to_string();

    Ok(vec![Value::String(key); options.query.matches('?').count()])
}
