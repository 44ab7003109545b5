//! Runs batches on a bounded pool of worker slots.
//!
//! Every submitted batch is queued as an [`Execution`] of its next attempt.
//! The [`ExecutionManager`] takes executions off the queue in FIFO order while
//! a worker slot is free, runs the pipeline under a wall-clock timeout and
//! re-queues failed or timed-out attempts after the retry backoff. Each
//! submission gets a stream of [`JobEvent`]s ending with
//! [`JobEvent::Finished`].

use std::{sync::Arc, time::Duration};

use sluice_core::{EtlJob, JobOutcome};
use sluice_schemas::{PipelineConfig, RunSummary};
use tracing::instrument;
use uuid::Uuid;

use crate::error::ExecutorError;

pub use manager::ExecutionManager;

mod manager;
mod queue;

/// Position of a queued attempt, broadcast whenever the queue changes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueUpdate {
    pub job_id: Uuid,
    pub batch_id: String,
    /// Attempt waiting in the queue, above 1 for a scheduled retry
    pub attempt: u32,
    /// Current position in the queue (0 = next to execute)
    pub position: usize,
}

/// A batch to run
#[derive(Debug, Clone)]
pub struct BatchJob {
    pub batch_id: String,
    pub pipeline: String,
    pub config: Arc<PipelineConfig>,
}

/// One queued attempt of a submitted batch
#[derive(Debug)]
pub struct Execution {
    pub id: Uuid,
    pub job: BatchJob,
    /// 1-based attempt number
    pub attempt: u32,
}

/// Lifecycle events of a submitted batch
#[derive(Debug, Clone, PartialEq)]
pub enum JobEvent {
    AttemptStarted {
        attempt: u32,
    },
    RetryScheduled {
        attempt: u32,
        delay: Duration,
        error: String,
    },
    Finished(FinalStatus),
}

/// How a submitted batch ended
#[derive(Debug, Clone, PartialEq)]
pub enum FinalStatus {
    Completed(RunSummary),
    /// The batch was missing or already finished
    Skipped,
    Failed {
        attempts: u32,
        error: String,
    },
    Cancelled,
}

impl FinalStatus {
    pub fn is_failure(&self) -> bool {
        matches!(self, FinalStatus::Failed { .. } | FinalStatus::Cancelled)
    }
}

/// Run one attempt of `job`, giving up after `timeout`.
///
/// On timeout the pipeline future is dropped mid-stage; the batch is left in
/// `running` for the caller to settle.
#[instrument(skip(etl, job), fields(batch_id = %job.batch_id, pipeline = %job.pipeline), err)]
pub async fn execute_attempt(
    etl: &EtlJob,
    job: &BatchJob,
    attempt: u32,
    timeout: Duration,
) -> Result<JobOutcome, ExecutorError> {
    match tokio::time::timeout(
        timeout,
        etl.run(&job.batch_id, &job.pipeline, &job.config, attempt),
    )
    .await
    {
        Ok(result) => Ok(result?),
        Err(_) => Err(ExecutorError::Timeout(timeout)),
    }
}
