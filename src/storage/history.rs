//! History storage: a bounded list of finished jobs.

use tracing::warn;

use crate::model::HistoryEntry;

use super::{Result, Storage, StorageError, read_json, write_json};

impl Storage {
    /// Appends a history entry, evicting the oldest beyond `cap`.
    pub fn append_history(&self, entry: &HistoryEntry, cap: usize) -> Result<()> {
        let mut history = match self.read_history() {
            Ok(h) => h,
            Err(StorageError::Corrupt(reason)) => {
                warn!(%reason, "history unreadable, starting a new one");
                Vec::new()
            }
            Err(e) => return Err(e),
        };
        history.push(entry.clone());
        if history.len() > cap {
            history.drain(..history.len() - cap);
        }
        write_json(&self.history_path(), &history)
    }

    /// Loads up to `limit` entries, most recent first.
    pub fn load_history(&self, limit: usize) -> Result<Vec<HistoryEntry>> {
        let history = self.read_history()?;
        Ok(history.into_iter().rev().take(limit).collect())
    }

    /// Oldest first, as stored.
    fn read_history(&self) -> Result<Vec<HistoryEntry>> {
        Ok(read_json(&self.history_path())?.unwrap_or_default())
    }

    fn history_path(&self) -> std::path::PathBuf {
        self.root.join("history.json")
    }
}
