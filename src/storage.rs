//! Local persistence for the watcher's data directory.
//!
//! Everything lives under one root:
//!
//! ```text
//! <root>/
//!   config.toml       # Interval, enablement, extraction tuning
//!   job.json          # Live job state, written only by the job process
//!   job.lock          # Held by the job process while a job is active
//!   history.json      # Bounded list of finished jobs
//!   changes.json      # Change set of the last committed job
//!   signals.jsonl     # Pending control signals, appended by controllers
//!   activity.jsonl    # Append-only progress and log events
//!   activity.1.jsonl  # Older events, replaced on each rollover
//!   snapshots/
//!     manifest.json   # Names the past and current generations
//!     <sha256>.json   # One file per snapshot generation
//!   reports/          # Report files written after each successful job
//! ```
//!
//! Whole-file records are replaced with [`write_atomic`]: readers in other
//! processes see either the old or the new file, never a torn write.

mod activity;
mod changes;
mod history;
mod job;
mod signals;
mod snapshot;

pub use job::JobLock;

use std::{
    fs, io,
    io::Write,
    path::{Path, PathBuf},
};

/// Errors that can occur during storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("corrupt store: {0}")]
    Corrupt(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = core::result::Result<T, StorageError>;

/// File-based storage rooted at one data directory.
///
/// Cheap to clone; every operation goes straight to disk.
#[derive(Debug, Clone)]
pub struct Storage {
    root: PathBuf,
}

impl Storage {
    /// Creates a new storage instance rooted at the given directory.
    ///
    /// The directory is created if it doesn't exist.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(root.join("snapshots"))?;
        Ok(Self { root })
    }

    /// Returns the default storage root: `$CATWATCH_HOME`, else `~/.catwatch/`.
    pub fn default_root() -> Option<PathBuf> {
        if let Ok(home) = std::env::var("CATWATCH_HOME")
            && !home.is_empty()
        {
            return Some(PathBuf::from(home));
        }
        dirs::home_dir().map(|h| h.join(".catwatch"))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config_path(&self) -> PathBuf {
        self.root.join("config.toml")
    }

    fn snapshots_dir(&self) -> PathBuf {
        self.root.join("snapshots")
    }
}

/// Replace `path` with `contents` atomically.
///
/// Writes a sibling temp file, syncs it, then renames it over the target.
pub(crate) fn write_atomic(path: &Path, contents: &[u8]) -> io::Result<()> {
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "path has no file name"))?;
    let tmp = path.with_file_name(format!(".{file_name}.tmp"));

    let mut file = fs::File::create(&tmp)?;
    file.write_all(contents)?;
    file.sync_all()?;
    drop(file);

    fs::rename(&tmp, path)?;

    // Persist the rename itself. Not every platform can open directories.
    if let Some(dir) = path.parent()
        && let Ok(dir) = fs::File::open(dir)
    {
        let _ = dir.sync_all();
    }
    Ok(())
}

/// Read a JSON record, or `None` if the file doesn't exist.
///
/// Unparseable contents are reported as [`StorageError::Corrupt`].
pub(crate) fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let json = match fs::read_to_string(path) {
        Ok(json) => json,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    serde_json::from_str(&json)
        .map(Some)
        .map_err(|e| StorageError::Corrupt(format!("{}: {e}", path.display())))
}

/// Write a JSON record atomically.
pub(crate) fn write_json<T: serde::Serialize>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    write_atomic(path, json.as_bytes())?;
    Ok(())
}
