//! Signal queue: control signals waiting for the job process.
//!
//! Controllers append one JSON line per signal to `signals.jsonl`. The job
//! process drains the queue by renaming the file aside before reading it, so
//! each signal is handed out at most once even if a controller appends
//! concurrently.

use std::{fs, io};

// Traits must be in scope for `.lines()` on `BufReader` and `.write_all()` on `File`.
use io::{BufRead, Write};

use jiff::Timestamp;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::model::ControlSignal;

use super::{Result, Storage};

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueuedSignal {
    signal: ControlSignal,
    queued_at: Timestamp,
}

impl Storage {
    /// Appends a signal to the queue.
    pub fn enqueue_signal(&self, signal: ControlSignal) -> Result<()> {
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.root.join("signals.jsonl"))?;
        let mut line = serde_json::to_string(&QueuedSignal {
            signal,
            queued_at: Timestamp::now(),
        })?;
        line.push('\n');
        file.write_all(line.as_bytes())?;
        Ok(())
    }

    /// Takes every queued signal, oldest first, leaving the queue empty.
    pub fn drain_signals(&self) -> Result<Vec<ControlSignal>> {
        let queue = self.root.join("signals.jsonl");
        let draining = self.root.join(".signals.draining.jsonl");

        // Left over from a drain that died mid-way; it may have been acted on.
        if draining.exists() {
            warn!("discarding signals from an interrupted drain");
            fs::remove_file(&draining)?;
        }

        match fs::rename(&queue, &draining) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        }

        let reader = io::BufReader::new(fs::File::open(&draining)?);
        let mut signals = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if line.is_empty() {
                continue;
            }
            match serde_json::from_str::<QueuedSignal>(&line) {
                Ok(queued) => signals.push(queued.signal),
                Err(e) => warn!(error = %e, "skipping malformed signal"),
            }
        }
        fs::remove_file(&draining)?;
        Ok(signals)
    }
}
