//! Rule based validation of transformed records.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sluice_schemas::{Record, RuleSet, Severity, StagingStatus};
use tracing::{instrument, warn};

use crate::staging::{StagingError, StagingStore};
use crate::transform::{mark, TransformedRecord};

mod rule_validator;

pub use rule_validator::RuleValidator;

/// The validator itself failed, as opposed to the record breaking a rule
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("invalid rule '{rule}' for field '{field}': {reason}")]
    InvalidRule {
        field: String,
        rule: String,
        reason: String,
    },

    #[error("{0}")]
    Other(String),
}

/// A failed check
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Violation {
    pub field: String,
    pub rule: String,
    pub message: String,
    pub severity: Severity,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ValidationOutcome {
    pub valid: bool,
    /// Share of passed checks, 1.0 without checks
    pub score: f64,
    pub errors: Vec<Violation>,
}

/// Checks a canonical record against a rule set
#[async_trait]
pub trait RecordValidator: Send + Sync {
    async fn validate(
        &self,
        record: &Record,
        rules: &RuleSet,
    ) -> Result<ValidationOutcome, ValidationError>;
}

#[derive(Debug, Default)]
pub struct ValidationOutput {
    pub records: Vec<TransformedRecord>,
    pub failed: usize,
}

/// Validate transformed records.
///
/// Valid records get their score attached. Invalid records, and records the
/// validator could not check, are dropped and their staged row is marked
/// `failed` with the violations as a JSON array.
#[instrument(skip_all, fields(records = records.len()), err)]
pub async fn validate_transformed(
    validator: &dyn RecordValidator,
    store: &dyn StagingStore,
    records: Vec<TransformedRecord>,
    rules: &RuleSet,
) -> Result<ValidationOutput, StagingError> {
    let mut output = ValidationOutput::default();

    for mut record in records {
        let rejection = match validator.validate(&record.fields, rules).await {
            Ok(outcome) if outcome.valid => {
                record.validation_score = Some(outcome.score);
                output.records.push(record);
                continue;
            }
            Ok(outcome) => serde_json::to_string(&outcome.errors),
            Err(error) => serde_json::to_string(&[error.to_string()]),
        }
        .unwrap_or_else(|error| format!("[\"unserializable violations: {error}\"]"));

        mark(store, record.staging_id, StagingStatus::Failed, Some(rejection)).await?;
        output.failed += 1;
    }

    if output.failed > 0 {
        warn!(
            failed = output.failed,
            valid = output.records.len(),
            "Some records failed validation"
        );
    }

    Ok(output)
}
