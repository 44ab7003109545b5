//! Staging store boundary.

use async_trait::async_trait;
use sluice_schemas::{NewStagedRecord, StagedRecord, StagingStatus};

#[derive(Debug, thiserror::Error)]
pub enum StagingError {
    #[error("failed to encode raw record from source '{source_name}': {error}")]
    Encode {
        source_name: String,
        #[source]
        error: serde_json::Error,
    },

    #[error("staging backend error: {0}")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("staging lock poisoned")]
    LockPoisoned,
}

impl StagingError {
    pub fn backend(error: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        StagingError::Backend(error.into())
    }
}

/// Durable buffer of raw records between extraction and transformation
#[async_trait]
pub trait StagingStore: Send + Sync {
    /// Persist a chunk of records as `pending`, returning the number written
    async fn insert(&self, records: Vec<NewStagedRecord>) -> Result<usize, StagingError>;

    /// Every staged record of a batch in insertion order
    async fn load(&self, batch_id: &str) -> Result<Vec<StagedRecord>, StagingError>;

    /// Move a staged record to `status`.
    ///
    /// Returns `false` when the record does not exist or the move would go
    /// backwards.
    async fn mark(
        &self,
        id: i64,
        status: StagingStatus,
        error: Option<String>,
    ) -> Result<bool, StagingError>;
}
