use std::{collections::HashMap, sync::Arc};

use sluice_core::prelude::*;
use sluice_sqlite::{SqlRefresher, SqliteStore};

/// Build the job running `definition` against `store`.
///
/// `store` holds the ledger, staging rows, cache entries and the default
/// warehouse connection; `connections` adds named source or destination
/// databases.
pub fn sqlite_job(
    store: &SqliteStore,
    connections: &[(String, SqliteStore)],
    definition: &PipelineDefinition,
    retry: RetryPolicy,
) -> EtlJob {
    let connections = connections.iter().fold(
        Connections::new(Arc::new(store.clone())),
        |connections, (name, warehouse)| {
            connections.with(name.clone(), Arc::new(warehouse.clone()))
        },
    );

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
        .retry(retry)
        .tracker(Arc::new(LoggingProgressTracker))
        .build()
}
