//! Change detection between two snapshots.
//!
//! A record in the current snapshot is `New` when its identity is absent from
//! the past snapshot and `Modified` when its version or updated date differs.
//! Unchanged records are omitted. Records that disappeared upstream are not
//! part of the change set; they only show up in [`DiffStats`].

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::model::{Change, ChangeSet, ChangeTag, IdentityKey, Snapshot};

/// Compute the new and modified records of `current` relative to `past`.
///
/// Ordered by numeric resource id ascending; records without a numeric id
/// come last in scan order.
pub fn diff(past: &Snapshot, current: &Snapshot) -> ChangeSet {
    let lookup = past.lookup();

    let mut changes: Vec<Change> = current
        .records()
        .iter()
        .filter_map(|record| {
            let key = record.identity()?;
            match lookup.get(&key) {
                None => Some(Change {
                    tag: ChangeTag::New,
                    record: record.clone(),
                    previous: None,
                }),
                Some(&before)
                    if before.version != record.version
                        || before.updated_date != record.updated_date =>
                {
                    Some(Change {
                        tag: ChangeTag::Modified,
                        record: record.clone(),
                        previous: Some(before.clone()),
                    })
                }
                Some(_) => None,
            }
        })
        .collect();

    // Stable: equal keys (all the non-numeric ids) keep scan order.
    changes.sort_by_key(|c| match c.record.numeric_id() {
        Some(id) => (false, id),
        None => (true, 0),
    });

    ChangeSet::new(changes)
}

/// Summary counts for a comparison, including removals.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiffStats {
    pub total_current: usize,
    pub total_past: usize,
    pub new_count: usize,
    pub modified_count: usize,
    pub removed_count: usize,

    /// Display labels of identities present before and gone now.
    pub removed: Vec<String>,
}

impl DiffStats {
    pub fn compute(past: &Snapshot, current: &Snapshot, changes: &ChangeSet) -> Self {
        let present: HashSet<IdentityKey> =
            current.records().iter().filter_map(|r| r.identity()).collect();

        let removed: Vec<String> = past
            .records()
            .iter()
            .filter_map(|r| r.identity())
            .filter(|k| !present.contains(k))
            .map(|k| k.to_string())
            .collect();

        Self {
            total_current: current.len(),
            total_past: past.len(),
            new_count: changes.count(ChangeTag::New),
            modified_count: changes.count(ChangeTag::Modified),
            removed_count: removed.len(),
            removed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use jiff::Timestamp;

    use crate::model::ResourceRecord;

    fn record(id: Option<&str>, title: &str, version: &str, date: &str) -> ResourceRecord {
        ResourceRecord {
            resource_id: id.map(String::from),
            title: Some(title.into()),
            url: id.map_or_else(
                || format!("https://example.com/exchange/{title}"),
                |id| format!("https://example.com/exchange/{id}/overview"),
            ),
            version: Some(version.into()),
            updated_date: Some(date.into()),
            developer_id: None,
            contributor: None,
            tagline: None,
        }
    }

    fn snapshot(records: Vec<ResourceRecord>) -> Snapshot {
        Snapshot::from_records(Timestamp::now(), records)
    }

    fn ids(changes: &ChangeSet) -> Vec<Option<String>> {
        changes
            .changes()
            .iter()
            .map(|c| c.record.resource_id.clone())
            .collect()
    }

    #[test]
    fn worked_example() {
        let past = snapshot(vec![record(Some("1"), "A", "1.0.0", "01/01/2024")]);
        let current = snapshot(vec![
            record(Some("1"), "A", "1.1.0", "01/01/2024"),
            record(Some("2"), "B", "1.0.0", "02/02/2024"),
        ]);

        let changes = diff(&past, &current);

        assert_eq!(changes.len(), 2);
        assert_eq!(changes.changes()[0].tag, ChangeTag::Modified);
        assert_eq!(changes.changes()[0].record.resource_id.as_deref(), Some("1"));
        assert_eq!(
            changes.changes()[0]
                .previous
                .as_ref()
                .and_then(|p| p.version.as_deref()),
            Some("1.0.0")
        );
        assert_eq!(changes.changes()[1].tag, ChangeTag::New);
        assert_eq!(changes.changes()[1].record.resource_id.as_deref(), Some("2"));
    }

    #[test]
    fn identical_snapshots_have_no_changes() {
        let s = snapshot(vec![
            record(Some("3"), "C", "1.0.0", "d"),
            record(None, "Untitled", "2.0.0", "d"),
            record(Some("1"), "A", "1.0.0", "d"),
        ]);

        assert!(diff(&s, &s).is_empty());
    }

    #[test]
    fn date_change_alone_is_a_modification() {
        let past = snapshot(vec![record(Some("5"), "E", "1.0.0", "01/01/2024")]);
        let current = snapshot(vec![record(Some("5"), "E", "1.0.0", "03/03/2024")]);

        let changes = diff(&past, &current);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes.changes()[0].tag, ChangeTag::Modified);
    }

    #[test]
    fn other_field_changes_are_ignored() {
        let past = snapshot(vec![record(Some("5"), "Old title", "1.0.0", "d")]);
        let mut renamed = record(Some("5"), "New title", "1.0.0", "d");
        renamed.tagline = Some("now with a tagline".into());
        let current = snapshot(vec![renamed]);

        assert!(diff(&past, &current).is_empty());
    }

    #[test]
    fn removed_records_are_not_in_change_set() {
        let past = snapshot(vec![
            record(Some("1"), "A", "1.0.0", "d"),
            record(Some("2"), "B", "1.0.0", "d"),
        ]);
        let current = snapshot(vec![record(Some("1"), "A", "1.0.0", "d")]);

        let changes = diff(&past, &current);
        assert!(changes.is_empty());

        let stats = DiffStats::compute(&past, &current, &changes);
        assert_eq!(stats.removed_count, 1);
        assert_eq!(stats.removed, vec!["#2".to_string()]);
    }

    #[test]
    fn ordered_by_numeric_id_with_non_numeric_last() {
        let current = snapshot(vec![
            record(None, "Zeta", "1", "d"),
            record(Some("10"), "J", "1", "d"),
            record(Some("abc"), "Odd", "1", "d"),
            record(Some("2"), "B", "1", "d"),
            record(None, "Alpha", "1", "d"),
            record(Some("9"), "I", "1", "d"),
        ]);

        let changes = diff(&Snapshot::empty(), &current);

        assert_eq!(
            ids(&changes),
            vec![
                Some("2".into()),
                Some("9".into()),
                Some("10".into()),
                None,
                Some("abc".into()),
                None,
            ]
        );
        // Non-numeric entries keep scan order: Zeta, Odd, Alpha.
        let labels: Vec<&str> = changes.changes()[3..]
            .iter()
            .map(|c| c.record.label())
            .collect();
        assert_eq!(labels, vec!["Zeta", "Odd", "Alpha"]);
    }

    #[test]
    fn membership_matches_definition() {
        let past = snapshot(vec![
            record(Some("1"), "A", "1.0.0", "d1"),
            record(Some("2"), "B", "1.0.0", "d1"),
            record(Some("3"), "C", "1.0.0", "d1"),
            record(Some("4"), "D", "1.0.0", "d1"),
        ]);
        let current = snapshot(vec![
            record(Some("1"), "A", "1.0.0", "d1"),
            record(Some("2"), "B", "2.0.0", "d1"),
            record(Some("3"), "C", "1.0.0", "d2"),
            record(Some("5"), "E", "1.0.0", "d1"),
        ]);

        let changes = diff(&past, &current);
        let lookup = past.lookup();

        let expected: Vec<&ResourceRecord> = current
            .records()
            .iter()
            .filter(|r| match lookup.get(&r.identity().unwrap()) {
                None => true,
                Some(p) => p.version != r.version || p.updated_date != r.updated_date,
            })
            .collect();

        assert_eq!(changes.len(), expected.len());
        for change in changes.changes() {
            assert!(expected.contains(&&change.record));
        }
        assert_eq!(ids(&changes), vec![Some("2".into()), Some("3".into()), Some("5".into())]);
    }

    #[test]
    fn title_fallback_matches_by_title() {
        let past = snapshot(vec![record(None, "Widget", "1.0.0", "d")]);
        let same = snapshot(vec![record(None, "Widget", "1.0.0", "d")]);

        assert!(diff(&past, &same).is_empty());
    }

    #[test]
    fn title_fallback_reports_new_when_id_scheme_changes() {
        // Known edge case: the same resource keyed by title before and by id
        // now does not match, so it is classified as new.
        let past = snapshot(vec![record(None, "Widget", "1.0.0", "d")]);
        let current = snapshot(vec![record(Some("42"), "Widget", "1.0.0", "d")]);

        let changes = diff(&past, &current);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes.changes()[0].tag, ChangeTag::New);
    }

    #[test]
    fn stats_count_new_and_modified() {
        let past = snapshot(vec![record(Some("1"), "A", "1.0.0", "d")]);
        let current = snapshot(vec![
            record(Some("1"), "A", "1.1.0", "d"),
            record(Some("2"), "B", "1.0.0", "d"),
            record(Some("3"), "C", "1.0.0", "d"),
        ]);

        let changes = diff(&past, &current);
        let stats = DiffStats::compute(&past, &current, &changes);

        assert_eq!(stats.total_past, 1);
        assert_eq!(stats.total_current, 3);
        assert_eq!(stats.new_count, 2);
        assert_eq!(stats.modified_count, 1);
        assert_eq!(stats.removed_count, 0);
    }
}
