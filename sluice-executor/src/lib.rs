//! # Sluice Executor
//!
//! Runs sluice batches on a worker queue and exposes the `sluice` CLI.
//!
//! ## Crate Organization
//!
//! - **executor/**: bounded worker pool
//!   - **manager.rs**: worker slots, timeouts, retries and cancellation
//!   - **queue.rs**: FIFO queue of pending attempts
//! - **wiring.rs**: builds an [`EtlJob`](sluice_core::EtlJob) backed by SQLite
//! - **config.rs**: executor settings
//! - **error.rs**: attempt errors

pub mod config;
pub mod error;
pub mod executor;
pub mod wiring;

pub use config::{ConfigError, ExecutorConfig};
pub use error::ExecutorError;
pub use executor::{BatchJob, ExecutionManager, FinalStatus, JobEvent, QueueUpdate};
