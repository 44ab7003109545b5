//! Runs pipelines end to end against a SQLite database file

use serde_json::{json, Value};
use sluice_core::prelude::*;
use sluice_sqlite::{SqlRefresher, SqliteStore};
use std::collections::HashMap;
use std::sync::Arc;

const CUSTOMERS: &str = r#"
name: customers
invalidates:
  - "customers:*"
refresh:
  - CREATE TABLE IF NOT EXISTS agg_tiers (tier, customers)
  - DELETE FROM agg_tiers
  - INSERT INTO agg_tiers SELECT tier, COUNT(*) FROM dim_customer GROUP BY tier
sources:
  crm:
    type: database
    table: crm_customers
    incremental_field: updated_at
destinations:
  dim:
    table: dim_customer
    load_type: upsert
    merge_key: customer_id
    include_metadata: true
validations:
  email:
    - required
    - regex: "^[^@]+@[^@]+$"
transform:
  fields:
    - target: customer_id
      source: id
      type: integer
      required: true
    - target: email
    - target: tier
      default: basic
"#;

fn job(store: &SqliteStore, definition: &PipelineDefinition) -> EtlJob {
    let connections = Connections::new(Arc::new(store.clone()));
    let refresher = SqlRefresher::new(
        store.clone(),
        HashMap::from([(definition.name.clone(), definition.refresh.clone())]),
    );
    let namespaces = HashMap::from([(definition.name.clone(), definition.invalidates.clone())]);

    EtlJob::builder()
        .ledger(Arc::new(store.clone()))
        .staging(Arc::new(store.clone()))
        .extractor(Extractor::new(SourceRegistry::with_defaults(
            connections.clone(),
        )))
        .loader(Loader::new(WriterRegistry::with_defaults(), connections))
        .aggregator(Aggregator::new(
            Arc::new(refresher),
            Arc::new(store.clone()),
            namespaces,
        ))
        .build()
}

async fn seed(store: &SqliteStore, rows: Value) {
    let rows = rows
        .as_array()
        .unwrap()
        .iter()
        .map(|row| row.as_object().cloned().unwrap())
        .collect::<Vec<_>>();
    Warehouse::insert(store, "crm_customers", &rows)
        .await
        .unwrap();
}

#[tokio::test]
#[tracing_test::traced_test]
async fn test_customers_pipeline() {
    let dir = tempfile::tempdir().unwrap();
    let store = SqliteStore::open(dir.path().join("sluice.db")).unwrap();
    let definition =
        PipelineDefinition::from_str(CUSTOMERS, TemplateFormat::Yaml, HashMap::new()).unwrap();
    let job = job(&store, &definition);

    seed(
        &store,
        json!([
            { "id": 1, "email": "ada@example.com", "tier": "gold", "updated_at": "2024-01-01 00:00:00" },
            { "id": 2, "email": "grace@example.com", "updated_at": "2024-01-01 00:00:00" },
            { "id": 3, "email": "not-an-email", "updated_at": "2024-01-01 00:00:00" },
            { "id": "x", "email": "bad@example.com", "updated_at": "2024-01-01 00:00:00" }
        ]),
    )
    .await;
    store.put_cache("customers:list", &json!([1, 2])).unwrap();
    store.put_cache("orders:list", &json!([])).unwrap();

    store.create("b-1", "customers").await.unwrap();
    let outcome = job
        .run("b-1", "customers", &definition.config, 1)
        .await
        .unwrap();

    let JobOutcome::Completed(summary) = outcome else {
        panic!("expected a completed run, got {outcome:?}");
    };
    assert_eq!(summary.staged, 4);
    assert_eq!(summary.transform_failed, 1);
    assert_eq!(summary.validation_failed, 1);
    assert_eq!(summary.load.records_successful, 2);
    assert!(summary.aggregated);

    let loaded = store
        .select(
            "SELECT customer_id, tier, etl_batch_id FROM dim_customer ORDER BY customer_id",
            &[],
        )
        .await
        .unwrap();
    assert_eq!(
        Value::Array(loaded.into_iter().map(Value::Object).collect()),
        json!([
            { "customer_id": 1, "tier": "gold", "etl_batch_id": "b-1" },
            { "customer_id": 2, "tier": "basic", "etl_batch_id": "b-1" }
        ])
    );

    let tiers = store
        .select("SELECT tier, customers FROM agg_tiers ORDER BY tier", &[])
        .await
        .unwrap();
    assert_eq!(tiers.len(), 2);
    assert_eq!(store.cache_keys().unwrap(), vec!["orders:list".to_string()]);

    let staged = store.load("b-1").await.unwrap();
    let failed = staged
        .iter()
        .filter(|r| r.status == StagingStatus::Failed)
        .count();
    assert_eq!(failed, 2);

    let batch = store.find("b-1").await.unwrap().unwrap();
    assert_eq!(batch.status, BatchStatus::Completed);
    assert_eq!(batch.result, Some(summary));
}

#[tokio::test]
async fn test_rerun_is_incremental_and_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let store = SqliteStore::open(dir.path().join("sluice.db")).unwrap();
    let definition =
        PipelineDefinition::from_str(CUSTOMERS, TemplateFormat::Yaml, HashMap::new()).unwrap();
    let job = job(&store, &definition);

    seed(
        &store,
        json!([
            { "id": 1, "email": "ada@example.com", "updated_at": "2000-01-01 00:00:00" }
        ]),
    )
    .await;

    store.create("b-1", "customers").await.unwrap();
    job.run("b-1", "customers", &definition.config, 1)
        .await
        .unwrap();

    // changed after the first batch started
    seed(
        &store,
        json!([
            { "id": 1, "email": "ada@lovelace.dev", "updated_at": "2999-01-01 00:00:00" }
        ]),
    )
    .await;

    store.create("b-2", "customers").await.unwrap();
    let outcome = job
        .run("b-2", "customers", &definition.config, 1)
        .await
        .unwrap();

    let JobOutcome::Completed(summary) = outcome else {
        panic!("expected a completed run, got {outcome:?}");
    };
    assert_eq!(summary.extracted["crm"], 1);

    let customers = store
        .select("SELECT customer_id, email FROM dim_customer", &[])
        .await
        .unwrap();
    assert_eq!(customers.len(), 1);
    assert_eq!(customers[0]["email"], "ada@lovelace.dev");
}
