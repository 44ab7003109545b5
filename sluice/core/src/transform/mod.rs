//! Mapping of staged raw records onto the canonical schema.

use async_trait::async_trait;
use serde_json::Value;
use sluice_schemas::{FieldType, PipelineConfig, Record, StagedRecord, StagingStatus};
use tracing::{debug, instrument, warn};

use crate::staging::{StagingError, StagingStore};

pub(crate) mod field_mapper;

pub use field_mapper::FieldMapper;

/// Per record transformation failure, recorded on the staged row
#[derive(Debug, thiserror::Error)]
pub enum TransformError {
    #[error("payload is not valid JSON: {0}")]
    Decode(#[source] serde_json::Error),

    #[error("expected a JSON object, got {0}")]
    NotAnObject(&'static str),

    #[error("missing required field '{0}'")]
    MissingField(String),

    #[error("cannot convert field '{field}' to {expected:?}: {value}")]
    Coerce {
        field: String,
        expected: FieldType,
        value: String,
    },

    #[error("{0}")]
    Invalid(String),
}

/// Maps one raw record of `source` onto the canonical schema
#[async_trait]
pub trait RecordTransformer: Send + Sync {
    async fn transform(
        &self,
        raw: &Value,
        source: &str,
        config: &PipelineConfig,
    ) -> Result<Record, TransformError>;
}

/// A canonical record on its way to the destinations
#[derive(Debug, Clone, PartialEq)]
pub struct TransformedRecord {
    pub staging_id: i64,
    pub batch_id: String,
    pub source: String,
    pub fields: Record,
    /// Set once the record passed validation
    pub validation_score: Option<f64>,
}

#[derive(Debug, Default)]
pub struct TransformOutput {
    pub records: Vec<TransformedRecord>,
    pub failed: usize,
}

/// Transform every pending staged record.
///
/// Records that fail are marked `failed` with the error and skipped, the rest
/// are marked `transformed`. Rows left behind by an earlier attempt of the
/// batch are not pending and are ignored. Only staging store errors abort.
#[instrument(skip_all, fields(staged = staged.len()), err)]
pub async fn transform_staged(
    transformer: &dyn RecordTransformer,
    store: &dyn StagingStore,
    staged: Vec<StagedRecord>,
    config: &PipelineConfig,
) -> Result<TransformOutput, StagingError> {
    let mut output = TransformOutput::default();

    for record in staged {
        if record.status != StagingStatus::Pending {
            debug!(staging_id = record.id, status = %record.status, "Skipping staged record");
            continue;
        }

        let result = match serde_json::from_slice::<Value>(&record.payload) {
            Ok(raw) => transformer.transform(&raw, &record.source, config).await,
            Err(error) => Err(TransformError::Decode(error)),
        };

        match result {
            Ok(fields) => {
                mark(store, record.id, StagingStatus::Transformed, None).await?;
                output.records.push(TransformedRecord {
                    staging_id: record.id,
                    batch_id: record.batch_id,
                    source: record.source,
                    fields,
                    validation_score: None,
                });
            }
            Err(error) => {
                warn!(
                    staging_id = record.id,
                    source = %record.source,
                    "Failed to transform record: {error}"
                );
                mark(store, record.id, StagingStatus::Failed, Some(error.to_string())).await?;
                output.failed += 1;
            }
        }
    }

    if output.failed > 0 {
        warn!(
            failed = output.failed,
            transformed = output.records.len(),
            "Some records failed to transform"
        );
    }

    Ok(output)
}

pub(crate) async fn mark(
    store: &dyn StagingStore,
    id: i64,
    status: StagingStatus,
    error: Option<String>,
) -> Result<(), StagingError> {
    if !store.mark(id, status, error).await? {
        warn!(staging_id = id, %status, "Staged record rejected status update");
    }
    Ok(())
}
