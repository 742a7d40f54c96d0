//! Snapshot storage: the past and current generations.
//!
//! Each generation is written once to a content-addressed file. The manifest
//! names which file is `past` and which is `current`, so a commit is a single
//! atomic manifest replacement: a crash before it leaves the old pair, a crash
//! after it leaves the new pair.

use std::fs;

use jiff::Timestamp;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::model::Snapshot;

use super::{Result, Storage, StorageError, read_json, write_atomic, write_json};

const MANIFEST: &str = "manifest.json";

/// Which generation file fills each slot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Manifest {
    past: Option<Slot>,
    current: Option<Slot>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Slot {
    file: String,
    sha256: String,
    records: usize,
    taken_at: Option<Timestamp>,
}

impl Storage {
    /// Loads the past generation. Empty if never written.
    pub fn load_past(&self) -> Result<Snapshot> {
        let manifest = self.load_manifest()?;
        self.load_slot(manifest.past.as_ref())
    }

    /// Loads the current generation. Empty if never written.
    pub fn load_current(&self) -> Result<Snapshot> {
        let manifest = self.load_manifest()?;
        self.load_slot(manifest.current.as_ref())
    }

    /// Demotes current to past and installs `snapshot` as current.
    pub fn commit(&self, snapshot: &Snapshot) -> Result<()> {
        let previous = match self.load_manifest() {
            Ok(m) => m,
            Err(StorageError::Corrupt(reason)) => {
                warn!(%reason, "snapshot manifest unreadable, committing without a past generation");
                Manifest::default()
            }
            Err(e) => return Err(e),
        };

        let slot = self.stage(snapshot)?;
        let manifest = Manifest {
            past: previous.current,
            current: Some(slot),
        };
        write_json(&self.snapshots_dir().join(MANIFEST), &manifest)?;
        debug!(records = snapshot.len(), "snapshot committed");

        self.prune(&manifest);
        Ok(())
    }

    /// Writes a generation file without making it visible.
    fn stage(&self, snapshot: &Snapshot) -> Result<Slot> {
        let bytes = serde_json::to_vec_pretty(snapshot)?;
        let sha256 = hex::encode(Sha256::digest(&bytes));
        let file = format!("{sha256}.json");
        write_atomic(&self.snapshots_dir().join(&file), &bytes)?;
        Ok(Slot {
            file,
            sha256,
            records: snapshot.len(),
            taken_at: snapshot.taken_at(),
        })
    }

    fn load_manifest(&self) -> Result<Manifest> {
        Ok(read_json(&self.snapshots_dir().join(MANIFEST))?.unwrap_or_default())
    }

    fn load_slot(&self, slot: Option<&Slot>) -> Result<Snapshot> {
        let Some(slot) = slot else {
            return Ok(Snapshot::empty());
        };
        let path = self.snapshots_dir().join(&slot.file);
        let bytes = fs::read(&path).map_err(|e| {
            StorageError::Corrupt(format!("missing generation {}: {e}", slot.file))
        })?;
        if hex::encode(Sha256::digest(&bytes)) != slot.sha256 {
            return Err(StorageError::Corrupt(format!(
                "checksum mismatch in {}",
                slot.file
            )));
        }
        serde_json::from_slice(&bytes)
            .map_err(|e| StorageError::Corrupt(format!("{}: {e}", path.display())))
    }

    /// Removes generation files no slot refers to. Best effort.
    fn prune(&self, manifest: &Manifest) {
        let keep: Vec<&str> = [&manifest.past, &manifest.current]
            .into_iter()
            .flatten()
            .map(|s| s.file.as_str())
            .collect();

        let Ok(entries) = fs::read_dir(self.snapshots_dir()) else {
            return;
        };
        for entry in entries.flatten() {
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            if name == MANIFEST || name.starts_with('.') || keep.contains(&name) {
                continue;
            }
            if let Err(e) = fs::remove_file(entry.path()) {
                warn!(file = name, error = %e, "failed to prune snapshot generation");
            }
        }
    }
}
