//! One job from start to finish.
//!
//! Extraction, comparison, commit, report, history. The snapshot store is
//! only touched once extraction has completed; a stopped or failed job
//! leaves both generations exactly as they were. Once the commit lands the
//! job is done; what follows it can only warn.

use std::sync::mpsc::Receiver;

use jiff::Timestamp;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::diff::{DiffStats, diff};
use crate::driver::{Driver, DriverOutcome, DriverSettings};
use crate::extract::Extractor;
use crate::job::{JobError, JobMachine};
use crate::model::{
    ChangeSet, ControlSignal, EventKind, HistoryEntry, LogLevel, Observer, ProgressEvent, Snapshot,
};
use crate::report::{ReportInput, Reporter};
use crate::storage::{Storage, StorageError};

/// Runs one job and records it in the history.
///
/// Fails without side effects if another job is already active. Otherwise
/// every path ends with the job in a terminal state and a history entry,
/// which is returned.
pub fn run_job(
    storage: &Storage,
    config: &Config,
    extractor: &mut dyn Extractor,
    reporter: &mut dyn Reporter,
    signals: &Receiver<ControlSignal>,
    observer: &mut dyn Observer,
) -> Result<HistoryEntry, JobError> {
    let mut machine = JobMachine::start(storage.clone())?;
    let driver = Driver::new(DriverSettings::from(&config.extraction), signals);

    let outcome = match driver.run(extractor, &mut machine, observer) {
        Ok(outcome) => outcome,
        Err(e) => {
            error!(error = %e, "job state could not be saved");
            let done = machine.state().progress.done;
            if let Ok(entry) = machine.fail(done, &e.to_string())
                && let Err(e) = storage.append_history(&entry, config.history_cap)
            {
                warn!(error = %e, "failed to record history");
            }
            return Err(e);
        }
    };

    let entry = match outcome {
        DriverOutcome::Completed { records, .. } => {
            let current = Snapshot::from_records(Timestamp::now(), records);
            let count = current.len() as u64;
            match commit(storage, &current, observer) {
                Ok(Committed {
                    past,
                    changes,
                    stats,
                }) => {
                    if let Err(e) = storage.save_latest_changes(&changes) {
                        warn!(error = %e, "change set not saved; snapshot is committed");
                        observer.on_event(&ProgressEvent::log(
                            LogLevel::Warning,
                            format!("Could not save change set: {e}"),
                        ));
                    }
                    let input = ReportInput {
                        job_id: machine.job_id(),
                        past: &past,
                        current: &current,
                        changes: &changes,
                        stats: &stats,
                        report_file: None,
                    };
                    if let Err(e) = reporter.report(&input) {
                        warn!(error = %e, "report failed; snapshot is committed");
                        observer.on_event(&ProgressEvent::log(
                            LogLevel::Warning,
                            format!("Report failed: {e}"),
                        ));
                    }
                    machine.complete(count, &changes)?
                }
                Err(e) => {
                    error!(error = %e, "commit failed");
                    observer.on_event(&ProgressEvent::log(
                        LogLevel::Error,
                        format!("Could not save snapshot: {e}"),
                    ));
                    machine.fail(count, &format!("commit failed: {e}"))?
                }
            }
        }
        DriverOutcome::Stopped { collected } => machine.finish_stopped(collected)?,
        DriverOutcome::Failed { error, collected } => {
            machine.fail(collected, &error.to_string())?
        }
    };

    storage.append_history(&entry, config.history_cap)?;
    Ok(entry)
}

/// What the store looked like before the commit, and how the new snapshot
/// differs from it.
struct Committed {
    past: Snapshot,
    changes: ChangeSet,
    stats: DiffStats,
}

fn commit(
    storage: &Storage,
    current: &Snapshot,
    observer: &mut dyn Observer,
) -> Result<Committed, StorageError> {
    let past = match storage.load_current() {
        Ok(past) => past,
        Err(StorageError::Corrupt(reason)) => {
            warn!(%reason, "previous snapshot unreadable, comparing against empty");
            observer.on_event(&ProgressEvent::log(
                LogLevel::Warning,
                "Previous snapshot is unreadable; treating every record as new",
            ));
            Snapshot::empty()
        }
        Err(e) => return Err(e),
    };

    let changes = diff(&past, current);
    let stats = DiffStats::compute(&past, current, &changes);
    storage.commit(current)?;

    info!(
        new = stats.new_count,
        modified = stats.modified_count,
        removed = stats.removed_count,
        total = stats.total_current,
        "snapshot committed"
    );
    observer.on_event(&ProgressEvent::log(
        LogLevel::Info,
        format!(
            "Found {} new and {} modified of {} records",
            stats.new_count, stats.modified_count, stats.total_current
        ),
    ));

    Ok(Committed {
        past,
        changes,
        stats,
    })
}

/// Observer that appends every event to the activity log and mirrors it
/// to tracing.
pub struct ActivityLog {
    storage: Storage,
    max_bytes: u64,
}

impl ActivityLog {
    pub fn new(storage: Storage, config: &Config) -> Self {
        Self {
            storage,
            max_bytes: config.activity_max_bytes,
        }
    }
}

impl Observer for ActivityLog {
    fn on_event(&mut self, event: &ProgressEvent) {
        match &event.kind {
            EventKind::Log { message, level } => match level {
                LogLevel::Info => info!("{message}"),
                LogLevel::Warning => warn!("{message}"),
                LogLevel::Error => error!("{message}"),
            },
            EventKind::Progress {
                done,
                total,
                current_item,
            } => debug!(done, ?total, ?current_item, "progress"),
        }
        if let Err(e) = self.storage.append_activity(event, self.max_bytes) {
            warn!(error = %e, "failed to append to activity log");
        }
    }
}
