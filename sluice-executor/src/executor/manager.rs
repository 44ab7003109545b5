use std::{collections::HashMap, sync::Arc, time::Duration};

use sluice_core::{EtlJob, JobOutcome};
use sluice_schemas::BatchStatus;
use tokio::sync::{broadcast, mpsc, Mutex, OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn, Instrument};
use uuid::Uuid;

use super::{
    execute_attempt, queue::ExecutionQueue, BatchJob, Execution, FinalStatus, JobEvent,
    QueueUpdate,
};
use crate::{config::ExecutorConfig, error::ExecutorError};

/// Cancellation and event channel of a submitted batch
struct JobHandle {
    token: CancellationToken,
    events: mpsc::Sender<JobEvent>,
}

type Jobs = Arc<Mutex<HashMap<Uuid, JobHandle>>>;

/// Runs queued batches on `worker_slots` concurrent workers
pub struct ExecutionManager {
    semaphore: Arc<Semaphore>,
    worker: Worker,
}

/// State shared by the background loop and the spawned attempts
#[derive(Clone)]
struct Worker {
    queue: Arc<Mutex<ExecutionQueue>>,
    jobs: Jobs,
    etl: EtlJob,
    config: ExecutorConfig,
}

impl ExecutionManager {
    /// The retry policy of `etl` bounds the attempts, `config.retry` is
    /// replaced when it differs.
    pub fn new(etl: EtlJob, mut config: ExecutorConfig) -> Self {
        if config.retry != *etl.retry_policy() {
            warn!(
                configured = config.retry.max_attempts,
                pipeline = etl.retry_policy().max_attempts,
                "Executor retry policy differs from the pipeline's ... using the pipeline's"
            );
            config.retry = etl.retry_policy().clone();
        }

        Self {
            semaphore: Arc::new(Semaphore::new(config.worker_slots)),
            worker: Worker {
                queue: Arc::new(Mutex::new(ExecutionQueue::new(config.queue_capacity))),
                jobs: Arc::new(Mutex::new(HashMap::new())),
                etl,
                config,
            },
        }
    }

    /// Submit a batch, returning queue updates and lifecycle events
    pub async fn submit(
        &self,
        job: BatchJob,
    ) -> (
        Uuid,
        broadcast::Receiver<QueueUpdate>,
        mpsc::Receiver<JobEvent>,
    ) {
        let id = Uuid::new_v4();
        let (events_tx, events_rx) = mpsc::channel::<JobEvent>(16);

        {
            let mut jobs = self.worker.jobs.lock().await;
            jobs.insert(
                id,
                JobHandle {
                    token: CancellationToken::new(),
                    events: events_tx,
                },
            );
        }

        debug!(execution_id = %id, batch_id = %job.batch_id, "Submitting batch to queue");
        let mut q = self.worker.queue.lock().await;
        let queue_rx = q.enqueue(Execution {
            id,
            job,
            attempt: 1,
        });
        info!(execution_id = %id, "Batch submitted to queue");
        (id, queue_rx, events_rx)
    }

    /// Cancel a queued, running or backing-off batch
    pub async fn cancel(&self, job_id: Uuid) {
        debug!(execution_id = %job_id, "Attempting to cancel execution");
        if let Some(handle) = self.worker.jobs.lock().await.get(&job_id) {
            handle.token.cancel();
            info!(execution_id = %job_id, "Execution cancelled");
        } else {
            warn!(execution_id = %job_id, "Cancellation requested for unknown execution");
        }
    }

    /// Background loop: dequeue attempts while a worker slot is free
    pub async fn start(&self) {
        info!(
            worker_slots = self.worker.config.worker_slots,
            "Starting execution manager background loop"
        );
        loop {
            let permit = match self.semaphore.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(e) => {
                    error!("Failed to acquire worker slot: {}", e);
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    continue;
                }
            };

            let next = {
                let mut q = self.worker.queue.lock().await;
                q.dequeue()
            };

            if let Some(execution) = next {
                let execution_id = execution.id;
                let span = tracing::info_span!(
                    "execution",
                    execution_id = %execution_id,
                    batch_id = %execution.job.batch_id,
                    attempt = execution.attempt
                );

                debug!(execution_id = %execution_id, "Dequeued execution for processing");
                tokio::spawn(self.worker.clone().run(execution, permit).instrument(span));
            } else {
                drop(permit);
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        }
    }
}

impl Worker {
    async fn run(self, execution: Execution, permit: OwnedSemaphorePermit) {
        let Execution { id, job, attempt } = execution;

        let Some((token, events)) = self.handle(id).await else {
            warn!("Dequeued execution has no handle ... dropping");
            return;
        };

        let result = if token.is_cancelled() {
            Err(ExecutorError::Cancelled)
        } else {
            let _ = events.send(JobEvent::AttemptStarted { attempt }).await;
            let task = {
                let (etl, job) = (self.etl.clone(), job.clone());
                let timeout = self.config.attempt_timeout;
                tokio::spawn(
                    async move { execute_attempt(&etl, &job, attempt, timeout).await }
                        .in_current_span(),
                )
            };
            let abort = task.abort_handle();
            tokio::select! {
                biased;
                _ = token.cancelled() => {
                    abort.abort();
                    Err(ExecutorError::Cancelled)
                }
                joined = task => joined.unwrap_or_else(|e| Err(ExecutorError::from_join(e))),
            }
        };
        drop(permit);

        let error = match result {
            Ok(JobOutcome::Completed(summary)) => {
                info!("Batch completed");
                return self.finish(id, FinalStatus::Completed(summary)).await;
            }
            Ok(JobOutcome::Skipped) => return self.finish(id, FinalStatus::Skipped).await,
            Err(ExecutorError::Cancelled) => return self.cancelled(id, &job).await,
            Err(error) => error,
        };

        let will_retry = self.config.retry.should_retry(attempt);

        // a dropped or panicked attempt leaves the batch running
        if matches!(error, ExecutorError::Timeout(_) | ExecutorError::Panicked(_)) {
            let status = if will_retry {
                BatchStatus::Retry
            } else {
                BatchStatus::Failed
            };
            self.mark(&job, status, &error.to_string()).await;
        }

        if !will_retry {
            error!("Batch failed after {attempt} attempts: {error}");
            return self
                .finish(
                    id,
                    FinalStatus::Failed {
                        attempts: attempt,
                        error: error.to_string(),
                    },
                )
                .await;
        }

        let delay = self.config.retry.backoff(attempt);
        warn!(delay = ?delay, "Attempt {attempt} failed, retrying: {error}");
        let _ = events
            .send(JobEvent::RetryScheduled {
                attempt,
                delay,
                error: error.to_string(),
            })
            .await;

        tokio::select! {
            biased;
            _ = token.cancelled() => self.cancelled(id, &job).await,
            _ = tokio::time::sleep(delay) => {
                let mut q = self.queue.lock().await;
                let _ = q.enqueue(Execution {
                    id,
                    job,
                    attempt: attempt + 1,
                });
            }
        }
    }

    async fn handle(&self, id: Uuid) -> Option<(CancellationToken, mpsc::Sender<JobEvent>)> {
        self.jobs
            .lock()
            .await
            .get(&id)
            .map(|handle| (handle.token.clone(), handle.events.clone()))
    }

    async fn cancelled(&self, id: Uuid, job: &BatchJob) {
        warn!("Execution cancelled");
        self.mark(job, BatchStatus::Failed, "cancelled").await;
        self.finish(id, FinalStatus::Cancelled).await;
    }

    async fn mark(&self, job: &BatchJob, status: BatchStatus, message: &str) {
        match self
            .etl
            .ledger()
            .update_status(&job.batch_id, status, Some(message.to_string()), None)
            .await
        {
            Ok(true) => debug!(%status, "Batch status recorded"),
            Ok(false) => debug!(%status, "Batch status unchanged"),
            Err(e) => error!("Failed to record batch status {status}: {e}"),
        }
    }

    /// Send the final event and forget the job
    async fn finish(&self, id: Uuid, status: FinalStatus) {
        if let Some(handle) = self.jobs.lock().await.remove(&id) {
            let _ = handle.events.send(JobEvent::Finished(status)).await;
        }
        debug!("Execution resources cleaned up");
    }
}
