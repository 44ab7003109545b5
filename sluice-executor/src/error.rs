use std::time::Duration;
use thiserror::Error;

/// Why an attempt did not complete
#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error(transparent)]
    Pipeline(#[from] sluice_core::Error),

    #[error("attempt timed out after {0:?}")]
    Timeout(Duration),

    #[error("attempt panicked: {0}")]
    Panicked(String),

    #[error("batch was cancelled")]
    Cancelled,
}

impl ExecutorError {
    /// An attempt task that did not run to completion
    pub(crate) fn from_join(error: tokio::task::JoinError) -> Self {
        if !error.is_panic() {
            return ExecutorError::Cancelled;
        }

        let payload = error.into_panic();
        let message = payload
            .downcast_ref::<&str>()
            .map(|message| message.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic payload".to_string());
        ExecutorError::Panicked(message)
    }
}
