//! # Sluice Core
//!
//! A staged batch ETL pipeline. Every run of a pipeline is tracked as a
//! batch in a [`ledger::BatchLedger`] and moves through six stages:
//!
//! 1. **Extract** raw records from the configured sources
//! 2. **Stage** them as opaque envelopes in a [`staging::StagingStore`]
//! 3. **Transform** staged records onto the canonical schema
//! 4. **Validate** them against the pipeline's rule set
//! 5. **Load** them into warehouse destinations (append or upsert)
//! 6. **Aggregate**: refresh aggregates and invalidate cache namespaces
//!
//! Per-record failures are recorded on the staged row and never abort a
//! batch. Source, destination configuration and store failures abort the
//! attempt, which the [`job::EtlJob`] reports as `retry` or `failed`.
//!
//! Storage is accessed through async traits so that backends can be swapped;
//! [`memory`] provides in-process implementations.
//!
//! ## Loading a definition
//!
//! ```rust
//! use sluice_core::templating::{TemplateFormat, TemplateLoader};
//! use sluice_schemas::PipelineDefinition;
//! use std::collections::HashMap;
//!
//! let yaml = r#"
//! name: orders
//! sources:
//!   shop:
//!     type: database
//!     table: ${table}
//! table: fact_orders
//! "#;
//!
//! let params = HashMap::from([("table".to_string(), "orders".to_string())]);
//! let definition = PipelineDefinition::from_str(yaml, TemplateFormat::Yaml, params).unwrap();
//! assert_eq!(definition.name, "orders");
//! ```

pub mod aggregate;
pub mod destinations;
pub mod error;
pub mod job;
pub mod ledger;
pub mod memory;
pub mod progress_tracker;
pub mod sources;
pub mod stager;
pub mod staging;
pub mod templating;
pub mod transform;
pub mod validate;
pub mod warehouse;

pub use error::{Error, Result};
pub use job::{EtlJob, JobOutcome, RetryPolicy};

/// Prelude to import all relevant models and functions
pub mod prelude {
    pub use super::aggregate::{
        AggregateError, AggregationRefresher, Aggregator, CacheInvalidator, Namespaces,
        NoopRefresher,
    };
    pub use super::destinations::{
        AppendWriter, DestinationWriter, LoadError, Loader, UpsertWriter, WriterRegistry,
    };
    pub use super::job::{EtlJob, JobOutcome, RetryPolicy};
    pub use super::ledger::{BatchLedger, LedgerError};
    pub use super::memory::{
        MemoryCache, MemoryLedger, MemoryStaging, MemoryWarehouse, RecordingRefresher,
    };
    pub use super::progress_tracker::{LoggingProgressTracker, ProgressTracker};
    pub use super::sources::{
        ApiReader, DatabaseReader, ExtractContext, Extractor, FactTableReader, SourceError,
        SourceReader, SourceRegistry,
    };
    pub use super::staging::{StagingError, StagingStore};
    pub use super::templating::{format_from_path, TemplateError, TemplateFormat, TemplateLoader};
    pub use super::transform::{FieldMapper, RecordTransformer, TransformError};
    pub use super::validate::{RecordValidator, RuleValidator, ValidationError};
    pub use super::warehouse::{Connections, Warehouse, WarehouseError};

    pub use sluice_schemas::*;
}
