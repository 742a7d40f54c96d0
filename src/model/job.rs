//! Job state: the single live descriptor of the current or last extraction run.

use std::fmt;

use jiff::Timestamp;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Where a job stands in its lifecycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum JobStatus {
    #[default]
    Idle,
    Running,
    Paused,
    Stopped,
    Done,
    Failed,
}

impl JobStatus {
    /// A job exists and owns the state: running or paused.
    pub fn is_active(self) -> bool {
        matches!(self, Self::Running | Self::Paused)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Stopped => "stopped",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Items processed so far. `total` is unknown until the source reports it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Progress {
    pub done: u64,
    pub total: Option<u64>,
}

impl Progress {
    /// Whole-number percentage, when the total is known and non-zero.
    pub fn percentage(&self) -> Option<u64> {
        match self.total {
            Some(total) if total > 0 => Some((self.done.min(total) * 100) / total),
            _ => None,
        }
    }
}

/// The persisted job descriptor observers poll.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobState {
    pub job_id: Option<Uuid>,
    pub status: JobStatus,
    pub progress: Progress,

    /// Label of the item in flight.
    pub current_item: Option<String>,

    pub started_at: Option<Timestamp>,
    pub elapsed_secs: u64,

    /// Linear estimate from the rate so far. Absent until progress is known.
    pub estimated_remaining_secs: Option<u64>,

    pub error: Option<String>,

    /// When the last job finished, whatever its outcome.
    pub last_run: Option<Timestamp>,

    /// When the scheduler will next start a job on its own.
    pub next_run: Option<Timestamp>,
}
