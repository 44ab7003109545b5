use sluice_core::RetryPolicy;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur during configuration validation
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Worker slots must be at least 1")]
    InvalidWorkerSlots,

    #[error("Max attempts must be at least 1")]
    InvalidMaxAttempts,

    #[error("Attempt timeout must be at least 1 second")]
    InvalidAttemptTimeout,
}

/// Configuration for the executor
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Batches running concurrently
    pub worker_slots: usize,
    /// Wall-clock limit of a single attempt
    pub attempt_timeout: Duration,
    pub retry: RetryPolicy,
    /// Buffered queue position updates
    pub queue_capacity: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            worker_slots: 4,
            attempt_timeout: Duration::from_secs(3600),
            retry: RetryPolicy::default(),
            queue_capacity: 100,
        }
    }
}

impl ExecutorConfig {
    /// Create a new config with validation
    pub fn try_new(
        worker_slots: usize,
        max_attempts: u32,
        attempt_timeout_secs: u64,
    ) -> Result<Self, ConfigError> {
        if worker_slots == 0 {
            return Err(ConfigError::InvalidWorkerSlots);
        }
        if max_attempts == 0 {
            return Err(ConfigError::InvalidMaxAttempts);
        }
        if attempt_timeout_secs == 0 {
            return Err(ConfigError::InvalidAttemptTimeout);
        }

        Ok(Self {
            worker_slots,
            attempt_timeout: Duration::from_secs(attempt_timeout_secs),
            retry: RetryPolicy {
                max_attempts,
                ..RetryPolicy::default()
            },
            ..Self::default()
        })
    }
}
