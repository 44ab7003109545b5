//! A single attempt of a pipeline run against one batch.

use bon::Builder;
use chrono::Utc;
use sluice_schemas::{BatchStatus, PipelineConfig, ProgressEvent, RunSummary};
use std::collections::BTreeMap;
use std::{sync::Arc, time::Duration, time::Instant};
use tracing::{error, info, instrument, warn};

use crate::{
    aggregate::Aggregator,
    destinations::Loader,
    error::Result,
    ledger::BatchLedger,
    progress_tracker::ProgressTracker,
    sources::{ExtractContext, Extractor},
    stager::stage_extracted,
    staging::StagingStore,
    transform::{transform_staged, FieldMapper, RecordTransformer},
    validate::{validate_transformed, RecordValidator, RuleValidator},
};

/// Bounded retries with a fixed backoff schedule
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    /// Delay before attempt `n + 1`, indexed by `n - 1`; the last entry repeats
    pub schedule: Vec<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            schedule: vec![
                Duration::from_secs(60),
                Duration::from_secs(300),
                Duration::from_secs(900),
            ],
        }
    }
}

impl RetryPolicy {
    /// Delay after the failure of `attempt` (1-based)
    pub fn backoff(&self, attempt: u32) -> Duration {
        let index = (attempt.max(1) - 1) as usize;
        self.schedule
            .get(index)
            .or(self.schedule.last())
            .copied()
            .unwrap_or_default()
    }

    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    /// The batch does not exist, already reached a terminal status, or was
    /// finished elsewhere while this attempt ran
    Skipped,
    Completed(RunSummary),
}

fn default_transformer() -> Arc<dyn RecordTransformer> {
    Arc::new(FieldMapper)
}

fn default_validator() -> Arc<dyn RecordValidator> {
    Arc::new(RuleValidator::default())
}

/// Runs extract, stage, transform, validate, load and aggregate for a batch
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use sluice_core::prelude::*;
///
/// let connections = Connections::new(Arc::new(MemoryWarehouse::default()));
///
/// let job = EtlJob::builder()
///     .ledger(Arc::new(MemoryLedger::default()))
///     .staging(Arc::new(MemoryStaging::default()))
///     .extractor(Extractor::new(SourceRegistry::with_defaults(connections.clone())))
///     .loader(Loader::new(WriterRegistry::with_defaults(), connections))
///     .tracker(Arc::new(LoggingProgressTracker))
///     .build();
///
/// assert_eq!(job.retry_policy().max_attempts, 3);
/// ```
#[derive(Clone, Builder)]
pub struct EtlJob {
    ledger: Arc<dyn BatchLedger>,
    staging: Arc<dyn StagingStore>,
    extractor: Extractor,
    loader: Loader,
    #[builder(default = default_transformer())]
    transformer: Arc<dyn RecordTransformer>,
    #[builder(default = default_validator())]
    validator: Arc<dyn RecordValidator>,
    aggregator: Option<Aggregator>,
    #[builder(default)]
    retry: RetryPolicy,
    tracker: Option<Arc<dyn ProgressTracker>>,
}

impl EtlJob {
    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    pub fn ledger(&self) -> &Arc<dyn BatchLedger> {
        &self.ledger
    }

    /// Run one attempt of `pipeline` for `batch_id`.
    ///
    /// A missing or terminal batch is skipped without side effects. When a
    /// stage fails fatally the batch moves to `retry` while attempts remain,
    /// to `failed` otherwise, and the error is returned.
    #[instrument(skip(self, config), err)]
    pub async fn run(
        &self,
        batch_id: &str,
        pipeline: &str,
        config: &PipelineConfig,
        attempt: u32,
    ) -> Result<JobOutcome> {
        let Some(batch) = self.ledger.find(batch_id).await? else {
            warn!("Batch not found ... skipping");
            return Ok(JobOutcome::Skipped);
        };

        if batch.status.is_terminal() {
            warn!(status = %batch.status, "Batch already finished ... skipping");
            return Ok(JobOutcome::Skipped);
        }

        if !self
            .ledger
            .update_status(batch_id, BatchStatus::Running, None, None)
            .await?
        {
            warn!(status = %batch.status, "Batch cannot start ... skipping");
            return Ok(JobOutcome::Skipped);
        }

        self.progress(ProgressEvent::Started {
            batch_id: batch_id.to_string(),
            pipeline: pipeline.to_string(),
            attempt,
        });

        let time = Instant::now();
        let result: Result<(RunSummary, bool)> = async {
            let summary = self.execute(batch_id, pipeline, config, attempt).await?;
            let recorded = self
                .ledger
                .update_status(
                    batch_id,
                    BatchStatus::Completed,
                    None,
                    Some(summary.clone()),
                )
                .await?;
            Ok((summary, recorded))
        }
        .await;

        match result {
            Ok((summary, true)) => {
                self.progress(ProgressEvent::Completed {
                    duration_ms: time.elapsed().as_millis() as u64,
                });
                Ok(JobOutcome::Completed(summary))
            }
            Ok((_, false)) => {
                let status = self
                    .ledger
                    .find(batch_id)
                    .await?
                    .map(|batch| batch.status.to_string())
                    .unwrap_or_else(|| "missing".to_string());
                warn!(%status, "Ledger rejected batch completion ... skipping");
                Ok(JobOutcome::Skipped)
            }
            Err(error) => {
                let will_retry = self.retry.should_retry(attempt);
                let status = if will_retry {
                    BatchStatus::Retry
                } else {
                    BatchStatus::Failed
                };

                error!(%status, "Batch attempt failed: {error}");

                if let Err(ledger_error) = self
                    .ledger
                    .update_status(batch_id, status, Some(error.to_string()), None)
                    .await
                {
                    error!("Failed to record batch status {status}: {ledger_error}");
                }

                self.progress(ProgressEvent::Failed {
                    error: error.to_string(),
                    will_retry,
                });

                Err(error)
            }
        }
    }

    async fn execute(
        &self,
        batch_id: &str,
        pipeline: &str,
        config: &PipelineConfig,
        attempt: u32,
    ) -> Result<RunSummary> {
        let watermark = self.ledger.last_completed_start(pipeline).await?;
        let run_started = Utc::now();
        let ctx = ExtractContext::new(
            batch_id.to_string(),
            pipeline.to_string(),
            watermark,
            run_started,
        );

        let extracted = self
            .extractor
            .extract(&config.sources, &ctx, self.tracker.as_ref())
            .await?;
        let counts = extracted
            .iter()
            .map(|(name, records)| (name.to_string(), records.len()))
            .collect::<BTreeMap<_, _>>();
        let staged_count = counts.values().sum();

        let staged = stage_extracted(self.staging.as_ref(), batch_id, &extracted, run_started).await?;
        self.progress(ProgressEvent::Staged {
            records: staged_count,
        });

        let transformed =
            transform_staged(self.transformer.as_ref(), self.staging.as_ref(), staged, config)
                .await?;
        self.progress(ProgressEvent::Transformed {
            records: transformed.records.len(),
            failed: transformed.failed,
        });
        let transform_failed = transformed.failed;

        let validated = validate_transformed(
            self.validator.as_ref(),
            self.staging.as_ref(),
            transformed.records,
            &config.validations,
        )
        .await?;
        self.progress(ProgressEvent::Validated {
            records: validated.records.len(),
            failed: validated.failed,
        });

        let destinations = config.effective_destinations();
        if destinations.is_empty() {
            warn!("No destinations configured ... nothing will be loaded");
        }

        let load = self
            .loader
            .load(
                batch_id,
                &validated.records,
                &destinations,
                self.tracker.as_ref(),
            )
            .await?;

        let aggregated = if load.success {
            self.aggregate(pipeline, batch_id).await
        } else {
            info!(
                failed = load.records_failed,
                "Load incomplete ... skipping aggregation"
            );
            false
        };

        Ok(RunSummary {
            extracted: counts,
            staged: staged_count,
            transformed: validated.records.len() + validated.failed,
            transform_failed,
            validated: validated.records.len(),
            validation_failed: validated.failed,
            load,
            aggregated,
            attempt,
        })
    }

    async fn aggregate(&self, pipeline: &str, batch_id: &str) -> bool {
        let Some(aggregator) = &self.aggregator else {
            return false;
        };

        match aggregator.run(pipeline, batch_id).await {
            Ok(patterns) => {
                self.progress(ProgressEvent::Aggregated { patterns });
                true
            }
            Err(error) => {
                warn!("Aggregation failed, loaded data is kept: {error}");
                false
            }
        }
    }

    fn progress(&self, event: ProgressEvent) {
        if let Some(tracker) = &self.tracker {
            tracker.on_progress(event);
        }
    }
}
