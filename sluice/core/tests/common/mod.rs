#![allow(dead_code)]

use serde_json::Value;
use sluice_core::prelude::*;
use std::collections::HashMap;
use std::sync::Arc;

pub const SHIPMENTS: &str = r#"
name: shipments
sources:
  legacy:
    type: database
    connection: source
    table: shipments
    incremental_field: updated_at
destinations:
  fact:
    table: fact_shipments
    load_type: ${load_type}
    merge_key: tracking_number
    batch_size: 2
validations:
  tracking_number:
    - regex: "^TRK[0-9]+$"
transform:
  fields:
    - target: tracking_number
      source: tracking.number
      required: true
    - target: weight_kg
      source: weight
      type: float
"#;

/// Pipeline stores wired to in-memory backends
pub struct Harness {
    pub ledger: Arc<MemoryLedger>,
    pub staging: Arc<MemoryStaging>,
    pub source: Arc<MemoryWarehouse>,
    pub warehouse: Arc<MemoryWarehouse>,
    pub refresher: Arc<RecordingRefresher>,
    pub cache: Arc<MemoryCache>,
    pub job: EtlJob,
}

impl Harness {
    pub fn new(source_rows: Vec<Record>) -> Self {
        Self::with_warehouse(source_rows, MemoryWarehouse::default())
    }

    pub fn with_warehouse(source_rows: Vec<Record>, warehouse: MemoryWarehouse) -> Self {
        let ledger = Arc::new(MemoryLedger::default());
        let staging = Arc::new(MemoryStaging::default());
        let source = Arc::new(MemoryWarehouse::default().with_select_rows(source_rows));
        let warehouse = Arc::new(warehouse);
        let refresher = Arc::new(RecordingRefresher::default());
        let cache = Arc::new(MemoryCache::default());
        cache.put("dashboard:kpis", Value::from(1));
        cache.put("finance:daily", Value::from(2));

        let connections = Connections::new(warehouse.clone()).with("source", source.clone());
        let namespaces = HashMap::from([(
            "shipments".to_string(),
            vec!["dashboard:*".to_string()],
        )]);

        let job = EtlJob::builder()
            .ledger(ledger.clone())
            .staging(staging.clone())
            .extractor(Extractor::new(SourceRegistry::with_defaults(
                connections.clone(),
            )))
            .loader(Loader::new(WriterRegistry::with_defaults(), connections))
            .aggregator(Aggregator::new(
                refresher.clone(),
                cache.clone(),
                namespaces,
            ))
            .tracker(Arc::new(LoggingProgressTracker))
            .build();

        Self {
            ledger,
            staging,
            source,
            warehouse,
            refresher,
            cache,
            job,
        }
    }

    /// Register a batch and run its first attempt
    pub async fn run_new(
        &self,
        batch_id: &str,
        definition: &PipelineDefinition,
    ) -> sluice_core::Result<JobOutcome> {
        self.ledger.create(batch_id, &definition.name).await?;
        self.job
            .run(batch_id, &definition.name, &definition.config, 1)
            .await
    }

    pub async fn staged_statuses(&self, batch_id: &str) -> Vec<StagingStatus> {
        self.staging
            .load(batch_id)
            .await
            .unwrap()
            .into_iter()
            .map(|record| record.status)
            .collect()
    }
}

pub fn shipments(load_type: &str) -> PipelineDefinition {
    definition(SHIPMENTS, &[("load_type", load_type)])
}

pub fn definition(yaml: &str, params: &[(&str, &str)]) -> PipelineDefinition {
    let params = params
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    PipelineDefinition::from_str(yaml, TemplateFormat::Yaml, params).unwrap()
}

pub fn records(value: Value) -> Vec<Record> {
    value
        .as_array()
        .unwrap()
        .iter()
        .map(|record| record.as_object().cloned().unwrap())
        .collect()
}
