//! Batch ledger boundary.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sluice_schemas::{Batch, BatchStatus, RunSummary};

/// Errors produced by [`BatchLedger`] implementations
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("batch '{0}' already exists")]
    AlreadyExists(String),

    #[error("ledger backend error: {0}")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("ledger lock poisoned")]
    LockPoisoned,
}

impl LedgerError {
    pub fn backend(error: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        LedgerError::Backend(error.into())
    }
}

/// Durable record of every batch: identity, status and outcome.
///
/// Implementations must enforce [`BatchStatus::can_transition_to`] and must
/// never delete batches.
#[async_trait]
pub trait BatchLedger: Send + Sync {
    /// Register a new `pending` batch
    async fn create(&self, batch_id: &str, pipeline: &str) -> Result<Batch, LedgerError>;

    async fn find(&self, batch_id: &str) -> Result<Option<Batch>, LedgerError>;

    /// Move a batch to `status`.
    ///
    /// Returns `false` when the batch does not exist or the transition is
    /// not allowed. `result` replaces the stored summary when present.
    async fn update_status(
        &self,
        batch_id: &str,
        status: BatchStatus,
        message: Option<String>,
        result: Option<RunSummary>,
    ) -> Result<bool, LedgerError>;

    /// `started_at` of the most recently completed batch of `pipeline`
    async fn last_completed_start(
        &self,
        pipeline: &str,
    ) -> Result<Option<DateTime<Utc>>, LedgerError>;
}
