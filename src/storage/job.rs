//! Job state storage: the single live descriptor observers poll.

use std::fs;

use tracing::warn;

use crate::model::JobState;

use super::{Result, Storage, read_json, write_json};

/// Exclusive claim on running jobs in one data directory.
///
/// The OS releases it when the holder exits, so a held lock means the job
/// process is still alive whatever `job.json` says.
#[derive(Debug)]
pub struct JobLock {
    _file: fs::File,
}

impl Storage {
    /// Loads the persisted job state.
    ///
    /// A missing or unreadable file is an idle job: observers should never
    /// be locked out by a bad write from a dead process.
    pub fn load_job_state(&self) -> JobState {
        match read_json(&self.root.join("job.json")) {
            Ok(state) => state.unwrap_or_default(),
            Err(e) => {
                warn!(error = %e, "job state unreadable, treating as idle");
                JobState::default()
            }
        }
    }

    /// Replaces the persisted job state.
    ///
    /// Only the process running jobs calls this.
    pub fn save_job_state(&self, state: &JobState) -> Result<()> {
        write_json(&self.root.join("job.json"), state)
    }

    /// Claims `job.lock`. `None` while another handle holds it.
    pub fn try_lock_jobs(&self) -> Result<Option<JobLock>> {
        let file = fs::OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(self.root.join("job.lock"))?;
        match file.try_lock() {
            Ok(()) => Ok(Some(JobLock { _file: file })),
            Err(fs::TryLockError::WouldBlock) => Ok(None),
            Err(fs::TryLockError::Error(e)) => Err(e.into()),
        }
    }
}
