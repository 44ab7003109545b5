use async_trait::async_trait;
use sluice_core::aggregate::{AggregateError, AggregationRefresher};
use std::collections::HashMap;
use tracing::{debug, instrument};

use crate::store::SqliteStore;

/// Parameter bound to the batch id in refresh statements
pub const BATCH_ID_PARAM: &str = ":batch_id";

/// Runs the refresh statements configured for a pipeline in one transaction
#[derive(Debug, Clone)]
pub struct SqlRefresher {
    store: SqliteStore,
    statements: HashMap<String, Vec<String>>,
}

impl SqlRefresher {
    pub fn new(store: SqliteStore, statements: HashMap<String, Vec<String>>) -> Self {
        Self { store, statements }
    }
}

#[async_trait]
impl AggregationRefresher for SqlRefresher {
    #[instrument(skip(self), err)]
    async fn refresh(&self, pipeline: &str, batch_id: &str) -> Result<(), AggregateError> {
        let Some(statements) = self.statements.get(pipeline).filter(|s| !s.is_empty()) else {
            debug!("No refresh statements configured");
            return Ok(());
        };

        let refresh_error = |error: rusqlite::Error| AggregateError::Refresh {
            pipeline: pipeline.to_string(),
            reason: error.to_string(),
        };

        let mut conn = self.store.lock_conn(AggregateError::LockPoisoned)?;
        let tx = conn.transaction().map_err(refresh_error)?;

        for sql in statements {
            let mut stmt = tx.prepare(sql).map_err(refresh_error)?;
            match stmt.parameter_index(BATCH_ID_PARAM).map_err(refresh_error)? {
                Some(idx) => {
                    stmt.raw_bind_parameter(idx, batch_id)
                        .map_err(refresh_error)?;
                    stmt.raw_execute().map_err(refresh_error)?;
                }
                None => {
                    stmt.execute([]).map_err(refresh_error)?;
                }
            }
        }

        tx.commit().map_err(refresh_error)?;
        debug!(statements = statements.len(), "Refreshed aggregates");

        Ok(())
    }
}
