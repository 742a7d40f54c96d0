//! Report and notification boundary.
//!
//! Runs once per successful job, after the new snapshot is committed.
//! Failures here are logged by the caller and never undo the commit.

use std::{
    fs,
    path::{Path, PathBuf},
    process::Command,
};

use jiff::Timestamp;
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::diff::DiffStats;
use crate::model::{ChangeSet, Snapshot};
use crate::storage::write_atomic;

/// Best-effort downstream failure after a successful commit.
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{program} failed: {reason}")]
    Command { program: String, reason: String },
}

/// Everything a reporter gets to look at.
#[derive(Debug, Clone)]
pub struct ReportInput<'a> {
    pub job_id: Uuid,
    pub past: &'a Snapshot,
    pub current: &'a Snapshot,
    pub changes: &'a ChangeSet,
    pub stats: &'a DiffStats,

    /// Report file written by an earlier reporter in the same run.
    pub report_file: Option<PathBuf>,
}

/// Consumes the outcome of a successful job.
pub trait Reporter: Send {
    /// Returns the path of any file it wrote, for reporters that follow.
    fn report(&mut self, input: &ReportInput<'_>) -> Result<Option<PathBuf>, NotifyError>;
}

/// Writes a JSON report file per job into a directory.
pub struct JsonReport {
    dir: PathBuf,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ReportFile<'a> {
    job_id: Uuid,
    generated_at: Timestamp,
    past_taken_at: Option<Timestamp>,
    current_taken_at: Option<Timestamp>,
    stats: &'a DiffStats,
    changes: &'a ChangeSet,
}

impl JsonReport {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// File name for a report generated at `at`, e.g. `changes-20240131-221500.json`.
    pub fn file_name(at: Timestamp) -> String {
        format!("changes-{}.json", at.strftime("%Y%m%d-%H%M%S"))
    }
}

impl Reporter for JsonReport {
    fn report(&mut self, input: &ReportInput<'_>) -> Result<Option<PathBuf>, NotifyError> {
        fs::create_dir_all(&self.dir)?;
        let generated_at = Timestamp::now();
        let file = ReportFile {
            job_id: input.job_id,
            generated_at,
            past_taken_at: input.past.taken_at(),
            current_taken_at: input.current.taken_at(),
            stats: input.stats,
            changes: input.changes,
        };
        let path = self.dir.join(Self::file_name(generated_at));
        write_atomic(&path, serde_json::to_string_pretty(&file)?.as_bytes())?;
        info!(path = %path.display(), "report written");
        Ok(Some(path))
    }
}

/// Runs an external program to fan the summary out to chat, push, etc.
///
/// The summary is passed in `CATWATCH_*` environment variables.
pub struct NotifyCommand {
    program: String,
    args: Vec<String>,
}

impl NotifyCommand {
    /// Builds from `[program, args...]`. `None` if the list is empty.
    pub fn from_argv(argv: &[String]) -> Option<Self> {
        let (program, args) = argv.split_first()?;
        Some(Self {
            program: program.clone(),
            args: args.to_vec(),
        })
    }
}

impl Reporter for NotifyCommand {
    fn report(&mut self, input: &ReportInput<'_>) -> Result<Option<PathBuf>, NotifyError> {
        let report = input
            .report_file
            .as_deref()
            .map(Path::to_string_lossy)
            .unwrap_or_default();

        let output = Command::new(&self.program)
            .args(&self.args)
            .env("CATWATCH_JOB_ID", input.job_id.to_string())
            .env("CATWATCH_NEW", input.stats.new_count.to_string())
            .env("CATWATCH_MODIFIED", input.stats.modified_count.to_string())
            .env("CATWATCH_REMOVED", input.stats.removed_count.to_string())
            .env("CATWATCH_TOTAL", input.stats.total_current.to_string())
            .env("CATWATCH_REPORT", &*report)
            .output()
            .map_err(|e| NotifyError::Command {
                program: self.program.clone(),
                reason: e.to_string(),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(NotifyError::Command {
                program: self.program.clone(),
                reason: format!("{}: {}", output.status, stderr.trim()),
            });
        }
        info!(program = %self.program, "notification sent");
        Ok(None)
    }
}

/// Runs reporters in order, carrying the latest report file forward.
///
/// Every reporter runs even if an earlier one fails; the first failure is
/// returned once all have had their turn.
#[derive(Default)]
pub struct FanOut {
    reporters: Vec<Box<dyn Reporter>>,
}

impl FanOut {
    #[must_use]
    pub fn with(mut self, reporter: impl Reporter + 'static) -> Self {
        self.reporters.push(Box::new(reporter));
        self
    }
}

impl Reporter for FanOut {
    fn report(&mut self, input: &ReportInput<'_>) -> Result<Option<PathBuf>, NotifyError> {
        let mut input = input.clone();
        let mut first_error = None;
        for reporter in &mut self.reporters {
            match reporter.report(&input) {
                Ok(Some(path)) => input.report_file = Some(path),
                Ok(None) => {}
                Err(e) => {
                    warn!(error = %e, "reporter failed");
                    first_error.get_or_insert(e);
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(input.report_file),
        }
    }
}
