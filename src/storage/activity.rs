//! Activity log: progress and log events for observers.
//!
//! Events are appended to `activity.jsonl`. Once that file reaches the
//! configured size it is renamed to `activity.1.jsonl`, replacing the
//! previous one, so the log never holds much more than twice the limit.

use std::{fs, io, path::Path};

// Traits must be in scope for `.lines()` on `BufReader` and `.write_all()` on `File`.
use io::{BufRead, Write};

use crate::model::ProgressEvent;

use super::{Result, Storage};

const ACTIVITY: &str = "activity.jsonl";
const ROLLED: &str = "activity.1.jsonl";

impl Storage {
    /// Appends an event, rolling the file over first if it has reached
    /// `max_bytes`.
    pub fn append_activity(&self, event: &ProgressEvent, max_bytes: u64) -> Result<()> {
        let path = self.root.join(ACTIVITY);
        if let Ok(meta) = fs::metadata(&path)
            && meta.len() >= max_bytes
        {
            fs::rename(&path, self.root.join(ROLLED))?;
        }

        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)?;
        let mut line = serde_json::to_string(event)?;
        line.push('\n');
        file.write_all(line.as_bytes())?;
        Ok(())
    }

    /// Loads the last `tail` events, oldest first, reaching into the
    /// rolled-over file when the live one is short.
    ///
    /// Lines that don't parse are skipped; the log is advisory.
    pub fn load_activity(&self, tail: usize) -> Result<Vec<ProgressEvent>> {
        let mut events = read_events(&self.root.join(ACTIVITY))?;
        if events.len() < tail {
            let mut older = read_events(&self.root.join(ROLLED))?;
            older.append(&mut events);
            events = older;
        }
        let skip = events.len().saturating_sub(tail);
        Ok(events.split_off(skip))
    }
}

fn read_events(path: &Path) -> Result<Vec<ProgressEvent>> {
    let file = match fs::File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };
    let mut events = Vec::new();
    for line in io::BufReader::new(file).lines() {
        let line = line?;
        if let Ok(event) = serde_json::from_str(&line) {
            events.push(event);
        }
    }
    Ok(events)
}
