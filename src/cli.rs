//! CLI interface for catwatch.
//!
//! Control commands (`run`, `pause`, `stop`, `resume`) only queue a signal;
//! the daemon applies it at the job's next batch boundary. Everything else
//! reads the data directory directly and works whether or not a daemon is
//! running.

mod format;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use jiff::Timestamp;

use crate::config::Config;
use crate::job::{Controller, JobError};
use crate::model::{ControlSignal, Outcome};
use crate::scheduler::Scheduler;
use crate::storage::Storage;

use format::{format_change, format_event, format_history_entry, format_status};

/// Catwatch: watch a resource catalog for new and updated entries.
#[derive(Debug, Parser)]
#[command(name = "catwatch", after_long_help = WORKFLOW_HELP)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

const WORKFLOW_HELP: &str = r#"Workflow:
  1. catwatch schedule --interval-days 7 --enable
  2. catwatch daemon                 (leave running)
  3. catwatch run                    (or wait for the schedule)
  4. catwatch status / catwatch log --tail 20
  5. catwatch changes

One-off run without a daemon:
  catwatch once --feed ./listing.json"#;

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Ask the daemon to start a job now.
    Run,

    /// Pause the running job before its next batch.
    Pause,

    /// Resume a paused job.
    Resume,

    /// Stop the job at its next batch boundary. Nothing is committed.
    Stop,

    /// Show the current job state.
    Status,

    /// List finished jobs, most recent first.
    History {
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },

    /// Show the changes found by the last successful job.
    Changes {
        /// Print the change set as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Show recent activity.
    Log {
        /// Number of events to show.
        #[arg(long, default_value_t = 20)]
        tail: usize,
    },

    /// Show or change the schedule.
    Schedule {
        /// Days between scheduled jobs. Fractions are allowed.
        #[arg(long)]
        interval_days: Option<f64>,

        /// Let the daemon start jobs on its own.
        #[arg(long, conflicts_with = "disable")]
        enable: bool,

        /// Only run jobs on request.
        #[arg(long)]
        disable: bool,
    },

    /// Run one job in the foreground and print its summary.
    ///
    /// Control commands from other terminals still apply while it runs.
    Once {
        /// JSON feed of raw records. Defaults to `extraction.feed`.
        #[arg(long)]
        feed: Option<PathBuf>,
    },

    /// Run the scheduler loop.
    Daemon,
}

/// Run the CLI, returning an error message on failure.
pub fn run(config: Config, storage: &Storage) -> Result<(), String> {
    let cli = Cli::parse();

    match cli.command {
        Command::Run => cmd_signal(storage, ControlSignal::Run),
        Command::Pause => cmd_signal(storage, ControlSignal::Pause),
        Command::Resume => cmd_signal(storage, ControlSignal::Resume),
        Command::Stop => cmd_signal(storage, ControlSignal::Stop),
        Command::Status => {
            cmd_status(storage);
            Ok(())
        }
        Command::History { limit } => cmd_history(storage, limit),
        Command::Changes { json } => cmd_changes(storage, json),
        Command::Log { tail } => cmd_log(storage, tail),
        Command::Schedule {
            interval_days,
            enable,
            disable,
        } => {
            let enabled = match (enable, disable) {
                (true, _) => Some(true),
                (_, true) => Some(false),
                _ => None,
            };
            cmd_schedule(config, storage, interval_days, enabled)
        }
        Command::Once { feed } => cmd_once(config, storage, feed),
        Command::Daemon => Scheduler::new(storage.clone(), config)
            .run()
            .map_err(|e| format!("scheduler stopped: {e}")),
    }
}

fn cmd_signal(storage: &Storage, signal: ControlSignal) -> Result<(), String> {
    match Controller::new(storage.clone()).submit(signal) {
        Ok(accepted) => {
            eprintln!("Queued {}", accepted.signal);
            Ok(())
        }
        Err(JobError::Rejected(rejected)) => Err(rejected.to_string()),
        Err(e) => Err(format!("failed to queue {signal}: {e}")),
    }
}

fn cmd_status(storage: &Storage) {
    let state = Controller::new(storage.clone()).job_state();
    println!("{}", format_status(&state, Timestamp::now()));
}

fn cmd_history(storage: &Storage, limit: usize) -> Result<(), String> {
    let entries = Controller::new(storage.clone())
        .history(limit)
        .map_err(|e| format!("failed to read history: {e}"))?;

    if entries.is_empty() {
        println!("No jobs yet");
        return Ok(());
    }
    for entry in &entries {
        println!("{}", format_history_entry(entry));
    }
    Ok(())
}

fn cmd_changes(storage: &Storage, json: bool) -> Result<(), String> {
    let changes = Controller::new(storage.clone())
        .latest_changes()
        .map_err(|e| format!("failed to read changes: {e}"))?;

    if json {
        let json = serde_json::to_string_pretty(&changes)
            .map_err(|e| format!("failed to serialize changes: {e}"))?;
        println!("{json}");
        return Ok(());
    }

    if changes.is_empty() {
        println!("No changes");
        return Ok(());
    }
    for change in changes.changes() {
        println!("{}", format_change(change));
    }
    Ok(())
}

fn cmd_log(storage: &Storage, tail: usize) -> Result<(), String> {
    let events = storage
        .load_activity(tail)
        .map_err(|e| format!("failed to read activity log: {e}"))?;

    for event in &events {
        println!("{}", format_event(event));
    }
    Ok(())
}

fn cmd_schedule(
    mut config: Config,
    storage: &Storage,
    interval_days: Option<f64>,
    enabled: Option<bool>,
) -> Result<(), String> {
    let changed = interval_days.is_some() || enabled.is_some();
    if let Some(days) = interval_days {
        config.interval_days = days;
    }
    if let Some(enabled) = enabled {
        config.enabled = enabled;
    }
    if changed {
        config
            .save(&storage.config_path())
            .map_err(|e| e.to_string())?;
    }

    let state = storage.load_job_state();
    println!(
        "Scheduled runs: {}",
        if config.enabled { "enabled" } else { "disabled" }
    );
    println!("Interval:       {} day(s)", config.interval_days);
    if let Some(next_run) = state.next_run {
        println!("Next run:       {next_run}");
    }
    if changed {
        eprintln!("Saved {}", storage.config_path().display());
    }
    Ok(())
}

fn cmd_once(mut config: Config, storage: &Storage, feed: Option<PathBuf>) -> Result<(), String> {
    if feed.is_some() {
        config.extraction.feed = feed;
    }

    let entry = Scheduler::new(storage.clone(), config)
        .run_once()
        .map_err(|e| e.to_string())?;

    println!("{}", format_history_entry(&entry));
    match entry.outcome {
        Outcome::Done => Ok(()),
        Outcome::Stopped => {
            eprintln!("Stopped; nothing committed");
            Ok(())
        }
        Outcome::Failed => Err(entry.error.unwrap_or_else(|| "job failed".to_string())),
    }
}
