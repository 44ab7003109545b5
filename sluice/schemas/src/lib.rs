//! # Sluice Schemas
//!
//! Configuration and data model types shared by the sluice crates. Pipeline
//! definitions, source and destination descriptors, rule sets and the batch
//! ledger model live here so that storage backends and the executor do not
//! need to depend on the pipeline implementation.

use bon::Builder;
use serde::{Deserialize, Serialize};

pub mod batch;
pub mod destinations;
pub mod ordered;
pub mod progress;
pub mod results;
pub mod rules;
pub mod sources;
pub mod transform;

mod serde_helpers;

// Re-export the main types for convenience
pub use batch::{Batch, BatchStatus, NewStagedRecord, StagedRecord, StagingStatus, UnknownStatus};
pub use destinations::DestinationDescriptor;
pub use ordered::OrderedMap;
pub use progress::ProgressEvent;
pub use results::{DestinationLoad, LoadResult, RunSummary};
pub use rules::{FieldRule, Rule, RuleSet, Severity};
pub use sources::{ApiAuth, ApiSource, DatabaseSource, FactTableSource, SourceDescriptor};
pub use transform::{FieldMapping, FieldType, TransformConfig};

/// A raw or canonical record
pub type Record = serde_json::Map<String, serde_json::Value>;

/// Configuration of a single pipeline run
///
/// # Examples
///
/// ```
/// use sluice_schemas::{DestinationDescriptor, PipelineConfig};
///
/// let config = PipelineConfig::builder()
///     .table("fact_orders".to_string())
///     .build();
///
/// let destinations = config.effective_destinations();
/// assert_eq!(destinations, vec![("fact_orders".to_string(), DestinationDescriptor::append("fact_orders"))]);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Builder)]
#[serde(rename_all = "snake_case")]
pub struct PipelineConfig {
    /// Sources extracted in declaration order
    #[serde(default)]
    #[builder(default)]
    pub sources: OrderedMap<SourceDescriptor>,

    /// Destinations loaded in declaration order
    #[serde(default)]
    #[builder(default)]
    pub destinations: OrderedMap<DestinationDescriptor>,

    /// Rules applied to transformed records
    #[serde(default)]
    #[builder(default)]
    pub validations: RuleSet,

    /// Append target used when no destinations are configured
    #[serde(default)]
    pub table: Option<String>,

    /// Mapping of raw records onto the canonical schema
    #[serde(default)]
    #[builder(default)]
    pub transform: TransformConfig,
}

impl PipelineConfig {
    /// Configured destinations, or an append destination for `table`
    pub fn effective_destinations(&self) -> Vec<(String, DestinationDescriptor)> {
        if !self.destinations.is_empty() {
            return self
                .destinations
                .iter()
                .map(|(name, destination)| (name.to_string(), destination.clone()))
                .collect();
        }

        self.table
            .iter()
            .map(|table| (table.clone(), DestinationDescriptor::append(table.clone())))
            .collect()
    }
}

/// A named pipeline as stored in a definition file
///
/// ```yaml
/// name: shipments_realtime
/// invalidates: ["dashboard:*", "operational:*"]
/// refresh:
///   - DELETE FROM agg_daily_shipments WHERE day >= date('now', '-1 day')
/// sources:
///   carrier:
///     type: api
///     url: https://carrier.example.com/v1/shipments
/// table: fact_shipments
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Builder)]
#[serde(rename_all = "snake_case")]
pub struct PipelineDefinition {
    /// Pipeline name recorded on every batch
    pub name: String,

    /// Cache namespace patterns invalidated after a successful load
    #[serde(default)]
    #[builder(default)]
    pub invalidates: Vec<String>,

    /// SQL statements recomputing the aggregates fed by this pipeline
    #[serde(default)]
    #[builder(default)]
    pub refresh: Vec<String>,

    #[serde(flatten)]
    #[builder(default)]
    pub config: PipelineConfig,
}
