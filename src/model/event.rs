//! Progress events streamed from the driver to observers.

use jiff::Timestamp;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LogLevel {
    Info,
    Warning,
    Error,
}

/// What happened, as seen by an observer.
///
/// Tagged so each line of the activity log is self-describing when read back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum EventKind {
    Log {
        message: String,
        level: LogLevel,
    },
    Progress {
        done: u64,
        total: Option<u64>,
        current_item: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEvent {
    pub at: Timestamp,

    #[serde(flatten)]
    pub kind: EventKind,
}

impl ProgressEvent {
    pub fn log(level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            at: Timestamp::now(),
            kind: EventKind::Log {
                message: message.into(),
                level,
            },
        }
    }

    pub fn progress(done: u64, total: Option<u64>, current_item: Option<String>) -> Self {
        Self {
            at: Timestamp::now(),
            kind: EventKind::Progress {
                done,
                total,
                current_item,
            },
        }
    }
}

/// Consumes progress events as a job runs.
pub trait Observer {
    fn on_event(&mut self, event: &ProgressEvent);
}

/// Keeps every event in memory.
#[cfg(test)]
#[derive(Debug, Default)]
pub struct Recorder {
    pub events: Vec<ProgressEvent>,
}

#[cfg(test)]
impl Observer for Recorder {
    fn on_event(&mut self, event: &ProgressEvent) {
        self.events.push(event.clone());
    }
}
