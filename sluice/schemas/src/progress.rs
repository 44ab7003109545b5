//! Progress event types for tracking pipeline runs

use serde::{Deserialize, Serialize};

/// Progress events emitted while a batch runs
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressEvent {
    /// Batch moved to `running`
    Started {
        batch_id: String,
        pipeline: String,
        attempt: u32,
    },
    /// A source has been read
    SourceExtracted {
        /// Name of the source
        name: String,
        records: usize,
    },
    /// Raw records were written to the staging store
    Staged { records: usize },
    /// Staged records were mapped onto the canonical schema
    Transformed { records: usize, failed: usize },
    /// Transformed records were checked against the rule set
    Validated { records: usize, failed: usize },
    /// A destination has been loaded
    DestinationLoaded {
        /// Name of the destination
        name: String,
        successful: usize,
        failed: usize,
    },
    /// Aggregates refreshed and cache namespaces invalidated
    Aggregated { patterns: usize },
    /// Batch completed
    Completed {
        /// Total duration of the run
        duration_ms: u64,
    },
    /// Run aborted
    Failed { error: String, will_retry: bool },
}
