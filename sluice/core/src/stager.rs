//! Persisting extracted records in the staging store.

use chrono::{DateTime, Utc};
use sluice_schemas::{NewStagedRecord, OrderedMap, Record, StagedRecord, StagingStatus};
use std::collections::HashSet;
use tracing::{debug, instrument, warn};

use crate::staging::{StagingError, StagingStore};
use crate::transform::mark;

/// Records inserted per staging write
pub const STAGING_CHUNK_SIZE: usize = 1000;

/// Error recorded on pending rows left behind by an interrupted attempt
pub const SUPERSEDED: &str = "superseded by a later attempt";

/// Stage every extracted record as `pending` and return the rows of this attempt.
///
/// Rows an interrupted attempt of the same batch left `pending` are marked
/// `failed` first, they were extracted again and must not be loaded twice.
#[instrument(skip(store, extracted, extracted_at), err)]
pub async fn stage_extracted(
    store: &dyn StagingStore,
    batch_id: &str,
    extracted: &OrderedMap<Vec<Record>>,
    extracted_at: DateTime<Utc>,
) -> Result<Vec<StagedRecord>, StagingError> {
    let earlier = store.load(batch_id).await?;
    let superseded = earlier
        .iter()
        .filter(|r| r.status == StagingStatus::Pending)
        .map(|r| r.id)
        .collect::<Vec<_>>();
    if !superseded.is_empty() {
        warn!(
            records = superseded.len(),
            "Discarding pending records of an interrupted attempt"
        );
    }
    for id in superseded {
        mark(store, id, StagingStatus::Failed, Some(SUPERSEDED.to_string())).await?;
    }
    let earlier = earlier.into_iter().map(|r| r.id).collect::<HashSet<_>>();

    let mut envelopes = Vec::new();

    for (source, records) in extracted.iter() {
        for record in records {
            let payload = serde_json::to_vec(record).map_err(|error| StagingError::Encode {
                source_name: source.to_string(),
                error,
            })?;

            envelopes.push(NewStagedRecord {
                batch_id: batch_id.to_string(),
                source: source.to_string(),
                payload,
                extracted_at,
            });
        }
    }

    let mut staged = 0;
    while !envelopes.is_empty() {
        let rest = envelopes.split_off(envelopes.len().min(STAGING_CHUNK_SIZE));
        staged += store.insert(envelopes).await?;
        envelopes = rest;
    }

    debug!(staged, "Staged extracted records");

    Ok(store
        .load(batch_id)
        .await?
        .into_iter()
        .filter(|r| !earlier.contains(&r.id))
        .collect())
}
