//! Job state machine and the controller-facing API.
//!
//! ```text
//! idle ──run──▶ running ──pause──▶ paused
//!                 │  ▲               │
//!                 │  └────resume─────┘
//!                 ├──▶ done / failed
//!                 └──▶ stopped ◀──stop── paused
//! ```
//!
//! Terminal states (`done`, `failed`, `stopped`) only leave through a new
//! `run`. A [`JobMachine`] owns the state for the duration of one job and
//! persists it on every change; a [`Controller`] in any other process only
//! reads that state and queues signals.
//!
//! The machine holds the data directory's [`JobLock`] for its whole life.
//! An active state with no lock holder was left behind by a dead process.

use jiff::Timestamp;
use tracing::{info, warn};
use uuid::Uuid;

use crate::extract::ExtractionError;
use crate::model::{
    ChangeSet, ChangeTag, ControlSignal, HistoryEntry, JobState, JobStatus, Outcome, Progress,
};
use crate::storage::{JobLock, Storage, StorageError};

/// A control signal that makes no sense in the current state.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{signal} rejected while {status}: {reason}")]
pub struct ControlRejected {
    pub signal: ControlSignal,
    pub status: JobStatus,
    pub reason: &'static str,
}

/// Errors from driving a job.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error(transparent)]
    Rejected(#[from] ControlRejected),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("job not started: {0}")]
    NotStarted(#[from] ExtractionError),

    #[error("job thread panicked")]
    Panicked,
}

/// Acknowledgement that a signal was queued for the job process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Accepted {
    pub signal: ControlSignal,
}

/// Whether `signal` is valid while the job is in `status`.
pub fn check_signal(signal: ControlSignal, status: JobStatus) -> Result<(), ControlRejected> {
    let reason = match (signal, status) {
        (ControlSignal::Run, s) if s.is_active() => "a job is already running",
        (ControlSignal::Pause, JobStatus::Running)
        | (ControlSignal::Resume, JobStatus::Paused)
        | (ControlSignal::Stop, JobStatus::Running | JobStatus::Paused)
        | (ControlSignal::Run, _) => return Ok(()),
        (ControlSignal::Pause, JobStatus::Paused) => "already paused",
        (ControlSignal::Resume, JobStatus::Running) => "not paused",
        (ControlSignal::Pause | ControlSignal::Resume | ControlSignal::Stop, _) => {
            "no job is running"
        }
    };
    Err(ControlRejected {
        signal,
        status,
        reason,
    })
}

/// The state of one running job, persisted on every change.
#[derive(Debug)]
pub struct JobMachine {
    storage: Storage,
    state: JobState,
    stop_requested: bool,
    _lock: JobLock,
}

impl JobMachine {
    /// Starts a new job.
    ///
    /// Rejected, with nothing written, while another job is running or paused.
    pub fn start(storage: Storage) -> Result<Self, JobError> {
        let Some(lock) = storage.try_lock_jobs()? else {
            return Err(ControlRejected {
                signal: ControlSignal::Run,
                status: storage.load_job_state().status,
                reason: "a job is already running",
            }
            .into());
        };
        let previous = storage.load_job_state();
        check_signal(ControlSignal::Run, previous.status)?;

        let job_id = Uuid::new_v4();
        let state = JobState {
            job_id: Some(job_id),
            status: JobStatus::Running,
            progress: Progress::default(),
            current_item: None,
            started_at: Some(Timestamp::now()),
            elapsed_secs: 0,
            estimated_remaining_secs: None,
            error: None,
            last_run: previous.last_run,
            next_run: previous.next_run,
        };
        storage.save_job_state(&state)?;
        info!(%job_id, "job started");

        Ok(Self {
            storage,
            state,
            stop_requested: false,
            _lock: lock,
        })
    }

    /// Marks a job left running by a dead process as failed.
    ///
    /// A job whose process still holds the lock is left alone. Returns the
    /// history entry recorded for an interrupted job, if there was one.
    pub fn recover(storage: &Storage, history_cap: usize) -> Result<Option<HistoryEntry>, JobError> {
        let Some(lock) = storage.try_lock_jobs()? else {
            return Ok(None);
        };
        let state = storage.load_job_state();
        if !state.status.is_active() {
            return Ok(None);
        }
        warn!(status = %state.status, "found a job left behind by a previous process");

        let machine = Self {
            storage: storage.clone(),
            state,
            stop_requested: false,
            _lock: lock,
        };
        let done = machine.state.progress.done;
        let entry = machine.fail(done, "interrupted: the job process exited mid-run")?;
        storage.append_history(&entry, history_cap)?;
        Ok(Some(entry))
    }

    /// Records when the scheduler will next start a job on its own.
    ///
    /// Only valid while no job is active; a running job keeps its state.
    pub fn schedule(storage: &Storage, next_run: Option<Timestamp>) -> Result<(), JobError> {
        let mut state = storage.load_job_state();
        if state.status.is_active() {
            return Ok(());
        }
        state.next_run = next_run;
        storage.save_job_state(&state)?;
        Ok(())
    }

    pub fn state(&self) -> &JobState {
        &self.state
    }

    pub fn job_id(&self) -> Uuid {
        self.state.job_id.unwrap_or_default()
    }

    pub fn status(&self) -> JobStatus {
        self.state.status
    }

    pub fn stop_requested(&self) -> bool {
        self.stop_requested
    }

    /// Applies a control signal, persisting any state change.
    pub fn apply(&mut self, signal: ControlSignal) -> Result<JobStatus, JobError> {
        check_signal(signal, self.state.status)?;
        match signal {
            ControlSignal::Run => {}
            ControlSignal::Pause => {
                self.state.status = JobStatus::Paused;
                self.refresh_elapsed();
                self.persist()?;
                info!("job paused");
            }
            ControlSignal::Resume => {
                self.state.status = JobStatus::Running;
                self.persist()?;
                info!("job resumed");
            }
            ControlSignal::Stop => {
                self.stop_requested = true;
                info!("stop requested");
            }
        }
        Ok(self.state.status)
    }

    /// Records progress after a batch.
    pub fn update_progress(
        &mut self,
        done: u64,
        total: Option<u64>,
        current_item: Option<String>,
    ) -> Result<(), JobError> {
        self.state.progress = Progress { done, total };
        if current_item.is_some() {
            self.state.current_item = current_item;
        }
        self.refresh_elapsed();
        self.state.estimated_remaining_secs = match total {
            Some(total) if done > 0 && total >= done => {
                Some(self.state.elapsed_secs.saturating_mul(total - done) / done)
            }
            _ => None,
        };
        self.persist()
    }

    /// Ends the job successfully.
    pub fn complete(self, item_count: u64, changes: &ChangeSet) -> Result<HistoryEntry, JobError> {
        let new_count = changes.count(ChangeTag::New) as u64;
        let modified_count = changes.count(ChangeTag::Modified) as u64;
        self.finish(Outcome::Done, item_count, new_count, modified_count, None)
    }

    /// Ends the job with an error.
    pub fn fail(self, item_count: u64, error: &str) -> Result<HistoryEntry, JobError> {
        self.finish(Outcome::Failed, item_count, 0, 0, Some(error.to_string()))
    }

    /// Ends the job after a stop request, keeping the partial count.
    pub fn finish_stopped(self, item_count: u64) -> Result<HistoryEntry, JobError> {
        self.finish(Outcome::Stopped, item_count, 0, 0, None)
    }

    fn finish(
        mut self,
        outcome: Outcome,
        item_count: u64,
        new_count: u64,
        modified_count: u64,
        error: Option<String>,
    ) -> Result<HistoryEntry, JobError> {
        let finished_at = Timestamp::now();
        let started_at = self.state.started_at.unwrap_or(finished_at);

        self.refresh_elapsed();
        self.state.status = match outcome {
            Outcome::Done => JobStatus::Done,
            Outcome::Failed => JobStatus::Failed,
            Outcome::Stopped => JobStatus::Stopped,
        };
        self.state.progress.done = item_count;
        self.state.current_item = None;
        self.state.estimated_remaining_secs = None;
        self.state.error.clone_from(&error);
        self.state.last_run = Some(finished_at);
        self.persist()?;

        let job_id = self.job_id();
        info!(%job_id, outcome = outcome.as_str(), item_count, "job finished");

        Ok(HistoryEntry {
            job_id,
            started_at,
            finished_at,
            duration_secs: secs_between(started_at, finished_at),
            outcome,
            item_count,
            new_count,
            modified_count,
            error,
        })
    }

    fn refresh_elapsed(&mut self) {
        if let Some(started) = self.state.started_at {
            self.state.elapsed_secs = secs_between(started, Timestamp::now());
        }
    }

    fn persist(&self) -> Result<(), JobError> {
        self.storage.save_job_state(&self.state)?;
        Ok(())
    }
}

fn secs_between(from: Timestamp, to: Timestamp) -> u64 {
    u64::try_from(to.duration_since(from).as_secs()).unwrap_or(0)
}

/// Read access and signal submission for processes that don't run jobs.
#[derive(Debug, Clone)]
pub struct Controller {
    storage: Storage,
}

impl Controller {
    pub fn new(storage: Storage) -> Self {
        Self { storage }
    }

    pub fn job_state(&self) -> JobState {
        self.storage.load_job_state()
    }

    /// Queues `signal` for the job process if it is valid right now.
    ///
    /// Never writes job state; the job process applies the signal at its
    /// next batch boundary.
    pub fn submit(&self, signal: ControlSignal) -> Result<Accepted, JobError> {
        let status = self.storage.load_job_state().status;
        check_signal(signal, status)?;
        self.storage.enqueue_signal(signal)?;
        info!(%signal, "signal queued");
        Ok(Accepted { signal })
    }

    /// Finished jobs, most recent first.
    pub fn history(&self, limit: usize) -> Result<Vec<HistoryEntry>, StorageError> {
        self.storage.load_history(limit)
    }

    /// Change set from the most recent committed job.
    pub fn latest_changes(&self) -> Result<ChangeSet, StorageError> {
        self.storage.load_latest_changes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use tempfile::TempDir;

    fn test_storage() -> (TempDir, Storage) {
        let dir = TempDir::new().unwrap();
        let storage = Storage::new(dir.path().join("data")).unwrap();
        (dir, storage)
    }

    #[test]
    fn start_persists_running_state() {
        let (_dir, storage) = test_storage();
        let machine = JobMachine::start(storage.clone()).unwrap();

        let persisted = storage.load_job_state();
        assert_eq!(persisted.status, JobStatus::Running);
        assert_eq!(persisted.job_id, machine.state().job_id);
        assert!(persisted.started_at.is_some());
    }

    #[test]
    fn run_while_running_is_rejected_without_change() {
        let (_dir, storage) = test_storage();
        let _machine = JobMachine::start(storage.clone()).unwrap();
        let before = storage.load_job_state();

        let err = JobMachine::start(storage.clone()).unwrap_err();
        assert!(matches!(
            err,
            JobError::Rejected(ControlRejected {
                signal: ControlSignal::Run,
                status: JobStatus::Running,
                ..
            })
        ));
        assert_eq!(storage.load_job_state(), before);
    }

    #[test]
    fn run_while_paused_is_rejected() {
        let (_dir, storage) = test_storage();
        let mut machine = JobMachine::start(storage.clone()).unwrap();
        machine.apply(ControlSignal::Pause).unwrap();

        assert!(JobMachine::start(storage.clone()).is_err());
        assert!(matches!(
            machine.apply(ControlSignal::Run).unwrap_err(),
            JobError::Rejected(_)
        ));
        assert_eq!(storage.load_job_state().status, JobStatus::Paused);
    }

    #[test]
    fn pause_and_resume_persist_immediately() {
        let (_dir, storage) = test_storage();
        let mut machine = JobMachine::start(storage.clone()).unwrap();

        machine.apply(ControlSignal::Pause).unwrap();
        assert_eq!(storage.load_job_state().status, JobStatus::Paused);

        machine.apply(ControlSignal::Resume).unwrap();
        assert_eq!(storage.load_job_state().status, JobStatus::Running);
    }

    #[test]
    fn invalid_signals_are_rejected() {
        let (_dir, storage) = test_storage();
        let mut machine = JobMachine::start(storage).unwrap();

        assert!(machine.apply(ControlSignal::Resume).is_err());
        machine.apply(ControlSignal::Pause).unwrap();
        assert!(machine.apply(ControlSignal::Pause).is_err());
        assert_eq!(machine.status(), JobStatus::Paused);
    }

    #[test]
    fn stop_is_a_request_until_finished() {
        let (_dir, storage) = test_storage();
        let mut machine = JobMachine::start(storage.clone()).unwrap();

        machine.apply(ControlSignal::Stop).unwrap();
        assert!(machine.stop_requested());
        assert_eq!(storage.load_job_state().status, JobStatus::Running);

        let entry = machine.finish_stopped(7).unwrap();
        assert_eq!(entry.outcome, Outcome::Stopped);
        assert_eq!(entry.item_count, 7);
        assert_eq!(storage.load_job_state().status, JobStatus::Stopped);
    }

    #[test]
    fn terminal_states_accept_a_new_run() {
        let (_dir, storage) = test_storage();
        let machine = JobMachine::start(storage.clone()).unwrap();
        machine.fail(0, "boom").unwrap();
        assert_eq!(storage.load_job_state().status, JobStatus::Failed);
        assert_eq!(storage.load_job_state().error.as_deref(), Some("boom"));

        let machine = JobMachine::start(storage.clone()).unwrap();
        assert_eq!(storage.load_job_state().error, None);
        machine.complete(3, &ChangeSet::default()).unwrap();
        assert_eq!(storage.load_job_state().status, JobStatus::Done);
        assert!(storage.load_job_state().last_run.is_some());
    }

    #[test]
    fn progress_is_persisted() {
        let (_dir, storage) = test_storage();
        let mut machine = JobMachine::start(storage.clone()).unwrap();

        machine
            .update_progress(4, Some(10), Some("Widget".into()))
            .unwrap();

        let state = storage.load_job_state();
        assert_eq!(
            state.progress,
            Progress {
                done: 4,
                total: Some(10)
            }
        );
        assert_eq!(state.current_item.as_deref(), Some("Widget"));
        assert!(state.estimated_remaining_secs.is_some());
    }

    #[test]
    fn recover_fails_orphaned_job() {
        let (_dir, storage) = test_storage();
        let mut machine = JobMachine::start(storage.clone()).unwrap();
        machine.update_progress(2, None, None).unwrap();
        drop(machine);

        let entry = JobMachine::recover(&storage, 50).unwrap().unwrap();
        assert_eq!(entry.outcome, Outcome::Failed);
        assert_eq!(entry.item_count, 2);
        assert_eq!(storage.load_job_state().status, JobStatus::Failed);
        assert_eq!(storage.load_history(5).unwrap().len(), 1);

        assert!(JobMachine::recover(&storage, 50).unwrap().is_none());
    }

    #[test]
    fn recover_leaves_live_job_alone() {
        let (_dir, storage) = test_storage();
        let machine = JobMachine::start(storage.clone()).unwrap();

        assert!(JobMachine::recover(&storage, 50).unwrap().is_none());
        assert_eq!(storage.load_job_state().status, JobStatus::Running);
        assert!(storage.load_history(5).unwrap().is_empty());

        machine.complete(1, &ChangeSet::default()).unwrap();
        assert_eq!(storage.load_job_state().status, JobStatus::Done);
    }

    #[test]
    fn controller_rejects_run_while_running() {
        let (_dir, storage) = test_storage();
        let controller = Controller::new(storage.clone());
        let _machine = JobMachine::start(storage.clone()).unwrap();

        let err = controller.submit(ControlSignal::Run).unwrap_err();
        assert!(matches!(err, JobError::Rejected(_)));
        assert_eq!(controller.job_state().status, JobStatus::Running);
        assert!(storage.drain_signals().unwrap().is_empty());
    }

    #[test]
    fn controller_queues_valid_signals() {
        let (_dir, storage) = test_storage();
        let controller = Controller::new(storage.clone());

        assert!(controller.submit(ControlSignal::Pause).is_err());
        controller.submit(ControlSignal::Run).unwrap();

        let _machine = JobMachine::start(storage.clone()).unwrap();
        controller.submit(ControlSignal::Pause).unwrap();

        assert_eq!(
            storage.drain_signals().unwrap(),
            vec![ControlSignal::Run, ControlSignal::Pause]
        );
    }

    #[test]
    fn signal_rules() {
        use ControlSignal::{Pause, Resume, Run, Stop};
        use JobStatus::{Done, Failed, Idle, Paused, Running, Stopped};

        for status in [Idle, Done, Failed, Stopped] {
            assert!(check_signal(Run, status).is_ok());
            assert!(check_signal(Pause, status).is_err());
            assert!(check_signal(Resume, status).is_err());
            assert!(check_signal(Stop, status).is_err());
        }
        assert!(check_signal(Run, Running).is_err());
        assert!(check_signal(Pause, Running).is_ok());
        assert!(check_signal(Stop, Running).is_ok());
        assert!(check_signal(Resume, Paused).is_ok());
        assert!(check_signal(Stop, Paused).is_ok());
    }
}
