//! Extraction of raw records from configured sources.
//!
//! Readers are looked up by the source's `type` tag in a [`SourceRegistry`].
//! The registry built by [`SourceRegistry::with_defaults`] knows the `api`,
//! `database` and `fact_table` kinds; applications may register more.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sluice_schemas::{OrderedMap, ProgressEvent, Record, SourceDescriptor};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, instrument, warn};

use crate::progress_tracker::ProgressTracker;
use crate::warehouse::Connections;

mod api;
mod database;
pub(crate) mod error;
mod fact_table;

pub use api::ApiReader;
pub use database::DatabaseReader;
pub use error::SourceError;
pub use fact_table::FactTableReader;
pub(crate) use fact_table::is_valid_date_key_format;

/// Timestamp format used to bind watermarks in table queries
pub const WATERMARK_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Per run inputs shared by all readers
#[derive(Debug, Clone, derive_new::new)]
pub struct ExtractContext {
    pub batch_id: String,
    pub pipeline: String,
    /// `started_at` of the last completed batch of the pipeline
    pub watermark: Option<DateTime<Utc>>,
    /// Start of this run, the reference point for relative dates
    pub run_started: DateTime<Utc>,
}

/// Reads the raw records of one source kind
#[async_trait]
pub trait SourceReader: Send + Sync {
    /// Type tag handled by this reader
    fn kind(&self) -> &str;

    async fn read(
        &self,
        name: &str,
        source: &SourceDescriptor,
        ctx: &ExtractContext,
    ) -> Result<Vec<Record>, SourceError>;
}

/// Readers keyed by source type tag
#[derive(Clone, Default)]
pub struct SourceRegistry {
    readers: HashMap<String, Arc<dyn SourceReader>>,
}

impl SourceRegistry {
    /// Registry with the `api`, `database` and `fact_table` readers
    pub fn with_defaults(connections: Connections) -> Self {
        let mut registry = Self::default();
        registry.register(Arc::new(ApiReader::new(reqwest::Client::new())));
        registry.register(Arc::new(DatabaseReader::new(connections.clone())));
        registry.register(Arc::new(FactTableReader::new(connections)));
        registry
    }

    /// Register a reader, replacing any reader of the same kind
    pub fn register(&mut self, reader: Arc<dyn SourceReader>) {
        self.readers.insert(reader.kind().to_string(), reader);
    }

    pub fn get(&self, kind: &str) -> Option<&Arc<dyn SourceReader>> {
        self.readers.get(kind)
    }
}

/// Runs every configured source through its reader
#[derive(Clone, derive_new::new)]
pub struct Extractor {
    registry: SourceRegistry,
}

impl Extractor {
    /// Read all sources in declaration order.
    ///
    /// Sources of an unknown kind yield no records. The first failing source
    /// aborts extraction.
    #[instrument(skip_all, fields(batch_id = %ctx.batch_id, pipeline = %ctx.pipeline), err)]
    pub async fn extract(
        &self,
        sources: &OrderedMap<SourceDescriptor>,
        ctx: &ExtractContext,
        tracker: Option<&Arc<dyn ProgressTracker>>,
    ) -> Result<OrderedMap<Vec<Record>>, SourceError> {
        let mut extracted = OrderedMap::new();

        for (name, source) in sources.iter() {
            let time = Instant::now();

            let records = match self.registry.get(&source.kind) {
                Some(reader) => reader.read(name, source, ctx).await.inspect_err(|e| {
                    error!(source = name, kind = %source.kind, "Extraction failed: {e}");
                })?,
                None => {
                    warn!(
                        source = name,
                        kind = %source.kind,
                        "Unknown source type ... skipping"
                    );
                    Vec::new()
                }
            };

            debug!(
                source = name,
                records = records.len(),
                "Extracted source ... Elapsed time: {:.2?}",
                time.elapsed()
            );

            if let Some(tracker) = tracker {
                tracker.on_progress(ProgressEvent::SourceExtracted {
                    name: name.to_string(),
                    records: records.len(),
                });
            }

            extracted.insert(name, records);
        }

        Ok(extracted)
    }
}
