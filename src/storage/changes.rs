//! Latest change set: what the most recent committed job found.

use crate::model::ChangeSet;

use super::{Result, Storage, read_json, write_json};

impl Storage {
    pub fn save_latest_changes(&self, changes: &ChangeSet) -> Result<()> {
        write_json(&self.root.join("changes.json"), changes)
    }

    /// Empty until the first successful job.
    pub fn load_latest_changes(&self) -> Result<ChangeSet> {
        Ok(read_json(&self.root.join("changes.json"))?.unwrap_or_default())
    }
}
