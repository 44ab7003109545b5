//! Batch ledger and staging data model.

use crate::results::RunSummary;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Lifecycle of a batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    Pending,
    Running,
    Retry,
    Completed,
    Failed,
}

impl BatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchStatus::Pending => "pending",
            BatchStatus::Running => "running",
            BatchStatus::Retry => "retry",
            BatchStatus::Completed => "completed",
            BatchStatus::Failed => "failed",
        }
    }

    /// `completed` and `failed` batches accept no further updates
    pub fn is_terminal(&self) -> bool {
        matches!(self, BatchStatus::Completed | BatchStatus::Failed)
    }

    /// Whether a batch in this status may move to `next`
    ///
    /// Rewriting the current status of a non-terminal batch is allowed.
    pub fn can_transition_to(&self, next: BatchStatus) -> bool {
        use BatchStatus::*;

        if self.is_terminal() {
            return false;
        }
        if *self == next {
            return true;
        }

        matches!(
            (self, next),
            (Pending, Running)
                | (Pending, Failed)
                | (Running, Completed)
                | (Running, Failed)
                | (Running, Retry)
                | (Retry, Running)
                | (Retry, Failed)
        )
    }
}

impl fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error parsing a status column
#[derive(Debug, thiserror::Error)]
#[error("unknown status '{0}'")]
pub struct UnknownStatus(pub String);

impl FromStr for BatchStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(BatchStatus::Pending),
            "running" => Ok(BatchStatus::Running),
            "retry" => Ok(BatchStatus::Retry),
            "completed" => Ok(BatchStatus::Completed),
            "failed" => Ok(BatchStatus::Failed),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

/// One execution of a named pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Batch {
    pub id: String,
    pub pipeline: String,
    pub status: BatchStatus,
    /// Last status message, typically the error of a failed attempt
    pub message: Option<String>,
    /// Summary of the last completed run
    pub result: Option<RunSummary>,
    /// Number of times the batch entered `running`
    pub attempts: u32,
    pub started_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Batch {
    /// A new `pending` batch
    pub fn new(id: impl Into<String>, pipeline: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            pipeline: pipeline.into(),
            status: BatchStatus::Pending,
            message: None,
            result: None,
            attempts: 0,
            started_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Apply a status update in place
    ///
    /// Returns `false` and leaves the batch untouched when the transition is
    /// not allowed. `started_at` is only set on the first move into `running`.
    pub fn apply(
        &mut self,
        status: BatchStatus,
        message: Option<String>,
        result: Option<RunSummary>,
        now: DateTime<Utc>,
    ) -> bool {
        if !self.status.can_transition_to(status) {
            return false;
        }

        if status == BatchStatus::Running && self.status != BatchStatus::Running {
            self.attempts += 1;
            if self.started_at.is_none() {
                self.started_at = Some(now);
            }
        }

        self.status = status;
        self.message = message;
        if result.is_some() {
            self.result = result;
        }
        self.updated_at = now;
        true
    }
}

/// Processing status of a staged record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StagingStatus {
    Pending,
    Transformed,
    Failed,
}

impl StagingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StagingStatus::Pending => "pending",
            StagingStatus::Transformed => "transformed",
            StagingStatus::Failed => "failed",
        }
    }

    /// Staged records only move forward
    pub fn can_transition_to(&self, next: StagingStatus) -> bool {
        matches!(
            (self, next),
            (StagingStatus::Pending, StagingStatus::Transformed)
                | (StagingStatus::Pending, StagingStatus::Failed)
                | (StagingStatus::Transformed, StagingStatus::Failed)
        )
    }
}

impl fmt::Display for StagingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StagingStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(StagingStatus::Pending),
            "transformed" => Ok(StagingStatus::Transformed),
            "failed" => Ok(StagingStatus::Failed),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

/// A raw record waiting to be staged
#[derive(Debug, Clone, PartialEq)]
pub struct NewStagedRecord {
    pub batch_id: String,
    pub source: String,
    /// JSON encoded raw record
    pub payload: Vec<u8>,
    pub extracted_at: DateTime<Utc>,
}

/// A raw record persisted in the staging store
#[derive(Debug, Clone, PartialEq)]
pub struct StagedRecord {
    pub id: i64,
    pub batch_id: String,
    pub source: String,
    pub payload: Vec<u8>,
    pub extracted_at: DateTime<Utc>,
    pub status: StagingStatus,
    pub error: Option<String>,
}
