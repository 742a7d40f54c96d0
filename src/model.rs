//! Core data model for catwatch.
//!
//! These types describe the catalog and the job that watches it:
//! resource records, snapshots, change sets, job state, history entries,
//! control signals, and progress events.

mod change;
mod control;
mod event;
mod history;
mod job;
mod record;
mod snapshot;

pub use change::{Change, ChangeSet, ChangeTag};
pub use control::ControlSignal;
pub use event::{EventKind, LogLevel, Observer, ProgressEvent};
#[cfg(test)]
pub use event::Recorder;
pub use history::{HistoryEntry, Outcome};
pub use job::{JobState, JobStatus, Progress};
pub use record::{IdentityKey, ResourceRecord, format_version, resource_id_from_url};
pub use snapshot::Snapshot;
