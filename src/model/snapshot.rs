//! Snapshots: the full catalog as seen by one completed extraction.

use std::collections::HashMap;

use jiff::Timestamp;
use serde::{Deserialize, Serialize};

use super::record::{IdentityKey, ResourceRecord};

/// An immutable, ordered set of records taken at one point in time.
///
/// Identity keys are unique within a snapshot. There are no mutators:
/// a new extraction always produces a new snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    taken_at: Option<Timestamp>,
    records: Vec<ResourceRecord>,
}

impl Snapshot {
    /// Builds a snapshot, collapsing duplicate identities.
    ///
    /// The last record seen for an identity wins; it takes the position of
    /// the first occurrence. Records with no identity at all are dropped.
    pub fn from_records(
        taken_at: Timestamp,
        records: impl IntoIterator<Item = ResourceRecord>,
    ) -> Self {
        let mut positions: HashMap<IdentityKey, usize> = HashMap::new();
        let mut unique: Vec<ResourceRecord> = Vec::new();
        for record in records {
            let Some(key) = record.identity() else {
                continue;
            };
            match positions.get(&key) {
                Some(&i) => unique[i] = record,
                None => {
                    positions.insert(key, unique.len());
                    unique.push(record);
                }
            }
        }
        Self {
            taken_at: Some(taken_at),
            records: unique,
        }
    }

    /// The empty snapshot, as seen before the first successful job.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn taken_at(&self) -> Option<Timestamp> {
        self.taken_at
    }

    pub fn records(&self) -> &[ResourceRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Identity-keyed view of the records.
    pub fn lookup(&self) -> HashMap<IdentityKey, &ResourceRecord> {
        self.records
            .iter()
            .filter_map(|r| r.identity().map(|k| (k, r)))
            .collect()
    }
}
