//! Daemon loop: starts jobs on schedule or on request, and relays control
//! signals to the job in flight.
//!
//! The job runs on its own thread. This loop is the only reader of the
//! signal queue; it drains the queue every tick and forwards what it finds
//! over a channel the driver polls between batches.

use std::{
    sync::mpsc::{self, Sender},
    thread::{self, JoinHandle},
};

use jiff::Timestamp;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::extract::FeedExtractor;
use crate::job::{JobError, JobMachine, check_signal};
use crate::model::{ControlSignal, HistoryEntry, LogLevel, Observer, ProgressEvent};
use crate::pipeline::{ActivityLog, run_job};
use crate::report::{FanOut, JsonReport, NotifyCommand};
use crate::storage::Storage;

struct RunningJob {
    handle: JoinHandle<Result<HistoryEntry, JobError>>,
    signals: Sender<ControlSignal>,
}

pub struct Scheduler {
    storage: Storage,
    config: Config,
    job: Option<RunningJob>,
}

impl Scheduler {
    pub fn new(storage: Storage, config: Config) -> Self {
        Self {
            storage,
            config,
            job: None,
        }
    }

    /// Whether a job thread is alive.
    pub fn is_busy(&self) -> bool {
        self.job.is_some()
    }

    /// Runs forever, ticking every poll interval.
    pub fn run(mut self) -> Result<(), JobError> {
        self.start(Timestamp::now())?;
        info!(
            root = %self.storage.root().display(),
            enabled = self.config.enabled,
            interval_days = self.config.interval_days,
            "scheduler started"
        );
        loop {
            self.tick(Timestamp::now())?;
            thread::sleep(self.config.poll_interval());
        }
    }

    /// Runs a single job in the foreground, relaying queued signals to it.
    ///
    /// Rejected while another process has a job running or paused.
    pub fn run_once(mut self) -> Result<HistoryEntry, JobError> {
        if let Some(entry) = JobMachine::recover(&self.storage, self.config.history_cap)? {
            warn!(job_id = %entry.job_id, "marked interrupted job as failed");
        }
        check_signal(ControlSignal::Run, self.storage.load_job_state().status)?;
        let extractor = FeedExtractor::from_config(&self.config.extraction)?;
        self.spawn(extractor);
        loop {
            if let Some(result) = self.reap(Timestamp::now())? {
                return result;
            }
            self.relay()?;
            thread::sleep(self.config.poll_interval());
        }
    }

    /// Settles what a previous process left behind and makes sure a next
    /// run is on the calendar.
    pub fn start(&mut self, now: Timestamp) -> Result<(), JobError> {
        if let Some(entry) = JobMachine::recover(&self.storage, self.config.history_cap)? {
            warn!(job_id = %entry.job_id, "marked interrupted job as failed");
        }
        if self.storage.load_job_state().next_run.is_none() {
            self.schedule_next(now)?;
        }
        Ok(())
    }

    /// One pass of the loop.
    pub fn tick(&mut self, now: Timestamp) -> Result<(), JobError> {
        self.reap(now)?;
        let run_requested = self.relay()?;
        if self.job.is_some() {
            return Ok(());
        }

        self.reload_config(now)?;
        let due = self.config.enabled
            && self
                .storage
                .load_job_state()
                .next_run
                .is_some_and(|at| at <= now);
        if run_requested || due {
            if due {
                info!("scheduled run is due");
            }
            self.launch(now)?;
        }
        Ok(())
    }

    /// Drains the queue. Signals go to the running job; with no job, only
    /// `run` means anything. Returns whether a run was requested.
    fn relay(&mut self) -> Result<bool, JobError> {
        let mut run_requested = false;
        for signal in self.storage.drain_signals()? {
            match &self.job {
                Some(job) => {
                    if job.signals.send(signal).is_err() {
                        warn!(%signal, "job is finishing, signal dropped");
                    }
                }
                None if signal == ControlSignal::Run => run_requested = true,
                None => warn!(%signal, "no job running, signal dropped"),
            }
        }
        Ok(run_requested)
    }

    /// Starts a job thread. Without a usable extractor the run is skipped
    /// and pushed to the next interval.
    fn launch(&mut self, now: Timestamp) -> Result<(), JobError> {
        let extractor = match FeedExtractor::from_config(&self.config.extraction) {
            Ok(extractor) => extractor,
            Err(e) => {
                error!(error = %e, "cannot start job");
                let mut log = ActivityLog::new(self.storage.clone(), &self.config);
                log.on_event(&ProgressEvent::log(
                    LogLevel::Error,
                    format!("Job not started: {e}"),
                ));
                return self.schedule_next(now);
            }
        };
        self.spawn(extractor);
        Ok(())
    }

    fn spawn(&mut self, mut extractor: FeedExtractor) {
        let mut reporter = reporters(&self.storage, &self.config);
        let (tx, rx) = mpsc::channel();
        let storage = self.storage.clone();
        let config = self.config.clone();
        info!(feed = %extractor.path().display(), "starting job");

        let handle = thread::spawn(move || {
            let mut observer = ActivityLog::new(storage.clone(), &config);
            run_job(
                &storage,
                &config,
                &mut extractor,
                &mut reporter,
                &rx,
                &mut observer,
            )
        });
        self.job = Some(RunningJob {
            handle,
            signals: tx,
        });
    }

    /// Joins a finished job thread and books the next run.
    ///
    /// `None` while the job is still going or when there is no job.
    fn reap(
        &mut self,
        now: Timestamp,
    ) -> Result<Option<Result<HistoryEntry, JobError>>, JobError> {
        if !self.job.as_ref().is_some_and(|j| j.handle.is_finished()) {
            return Ok(None);
        }
        let Some(job) = self.job.take() else {
            return Ok(None);
        };

        let result = match job.handle.join() {
            Ok(Ok(entry)) => {
                info!(
                    job_id = %entry.job_id,
                    outcome = entry.outcome.as_str(),
                    items = entry.item_count,
                    "job ended"
                );
                Ok(entry)
            }
            Ok(Err(e)) => {
                error!(error = %e, "job did not run");
                Err(e)
            }
            Err(_) => {
                error!("job thread panicked");
                JobMachine::recover(&self.storage, self.config.history_cap)?;
                Err(JobError::Panicked)
            }
        };

        self.reload_config(now)?;
        self.schedule_next(now)?;
        Ok(Some(result))
    }

    /// Picks up edits from `catwatch schedule` and friends.
    ///
    /// A bad file keeps the previous config. A changed interval reschedules
    /// from the last run.
    fn reload_config(&mut self, now: Timestamp) -> Result<(), JobError> {
        let config = match Config::load(&self.storage.config_path()) {
            Ok(config) => config,
            Err(e) => {
                warn!(error = %e, "keeping previous config");
                return Ok(());
            }
        };
        if config == self.config {
            return Ok(());
        }

        let interval_changed = config.interval() != self.config.interval();
        self.config = config;
        info!("config reloaded");
        if interval_changed {
            let from = self.storage.load_job_state().last_run.unwrap_or(now);
            self.schedule_next(from)?;
        }
        Ok(())
    }

    fn schedule_next(&self, from: Timestamp) -> Result<(), JobError> {
        let next_run = from.checked_add(self.config.interval()).ok();
        if let Some(at) = next_run {
            info!(next_run = %at, "next run scheduled");
        }
        JobMachine::schedule(&self.storage, next_run)
    }
}

/// The report file always; the notify command when configured.
fn reporters(storage: &Storage, config: &Config) -> FanOut {
    let fan_out = FanOut::default().with(JsonReport::new(config.reports_dir(storage.root())));
    match config
        .report
        .notify_command
        .as_deref()
        .and_then(NotifyCommand::from_argv)
    {
        Some(command) => fan_out.with(command),
        None => fan_out,
    }
}
