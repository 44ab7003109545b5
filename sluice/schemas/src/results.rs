//! Load results and run summaries stored on the batch.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Counts of a single destination
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DestinationLoad {
    pub table: String,
    pub records_processed: usize,
    pub records_successful: usize,
    pub records_failed: usize,
}

/// Outcome of loading a batch into all destinations
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadResult {
    pub records_processed: usize,
    pub records_successful: usize,
    pub records_failed: usize,
    #[serde(default)]
    pub destinations: BTreeMap<String, DestinationLoad>,
    pub success: bool,
}

impl Default for LoadResult {
    fn default() -> Self {
        Self {
            records_processed: 0,
            records_successful: 0,
            records_failed: 0,
            destinations: BTreeMap::new(),
            success: true,
        }
    }
}

impl LoadResult {
    /// Fold the counts of one destination into the totals
    pub fn absorb(&mut self, name: impl Into<String>, load: DestinationLoad) {
        self.records_processed += load.records_processed;
        self.records_successful += load.records_successful;
        self.records_failed += load.records_failed;
        self.success = self.records_failed == 0;
        self.destinations.insert(name.into(), load);
    }
}

/// Counts of a single pipeline run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    /// Raw records per source
    pub extracted: BTreeMap<String, usize>,
    pub staged: usize,
    pub transformed: usize,
    pub transform_failed: usize,
    pub validated: usize,
    pub validation_failed: usize,
    pub load: LoadResult,
    /// Whether aggregation refresh and cache invalidation completed
    pub aggregated: bool,
    pub attempt: u32,
}
