//! Change sets: what is new or different since the previous snapshot.

use serde::{Deserialize, Serialize};

use super::record::ResourceRecord;

/// Why a record appears in a change set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ChangeTag {
    /// Identity not present in the past snapshot.
    New,

    /// Present before, but version or updated date differs.
    Modified,
}

/// One entry of a change set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Change {
    pub tag: ChangeTag,

    /// The record as it is now.
    pub record: ResourceRecord,

    /// The record as it was, for `Modified` entries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous: Option<ResourceRecord>,
}

/// New and modified records between two snapshots, in report order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChangeSet {
    changes: Vec<Change>,
}

impl ChangeSet {
    pub fn new(changes: Vec<Change>) -> Self {
        Self { changes }
    }

    pub fn changes(&self) -> &[Change] {
        &self.changes
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn count(&self, tag: ChangeTag) -> usize {
        self.changes.iter().filter(|c| c.tag == tag).count()
    }
}
