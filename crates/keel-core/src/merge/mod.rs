//! Record-level merge of independently evolved collections.
//!
//! Every function here is pure: no I/O, no clocks, no errors. Records with an
//! empty id are ignored rather than rejected.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use serde_json::Value;

use crate::models::{
    CollectionKind, ConflictKind, ConflictRecord, Record, Snapshot, Tombstone, TombstoneLog,
};

/// Which side keeps a shared record when the comparison is a tie.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TieBreak {
    #[default]
    Local,
    Remote,
}

/// Tuning for [`merge_with_conflicts`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConflictPolicy {
    /// `updatedAt` differences up to this value are treated as equal
    pub tolerance: Duration,
    pub tie_break: TieBreak,
}

impl Default for ConflictPolicy {
    fn default() -> Self {
        Self {
            tolerance: Duration::seconds(1),
            tie_break: TieBreak::Local,
        }
    }
}

/// Result of a conflict-aware merge.
#[derive(Debug, Clone, PartialEq)]
pub struct MergeOutcome<R> {
    pub records: Vec<R>,
    pub conflicts: Vec<ConflictRecord>,
}

/// Insertion-ordered map keyed by record id.
struct Keyed<R> {
    order: Vec<String>,
    records: HashMap<String, R>,
}

impl<R: Record + Clone> Keyed<R> {
    fn seed(records: &[R]) -> Self {
        let mut keyed = Self {
            order: Vec::with_capacity(records.len()),
            records: HashMap::with_capacity(records.len()),
        };
        for record in records {
            keyed.put(record.clone());
        }
        keyed
    }

    fn put(&mut self, record: R) {
        let id = record.id().to_string();
        if id.is_empty() {
            return;
        }
        if self.records.insert(id.clone(), record).is_none() {
            self.order.push(id);
        }
    }

    fn get(&self, id: &str) -> Option<&R> {
        self.records.get(id)
    }

    fn into_vec(mut self) -> Vec<R> {
        self.order
            .iter()
            .filter_map(|id| self.records.remove(id))
            .collect()
    }
}

/// Merge two collections by id.
///
/// Remote-only records are added. For shared ids, when `compare_field` is
/// given and both sides define it, the greater timestamp wins and ties keep
/// the local record; otherwise the remote record wins. Local records come
/// first in the result, followed by new remote ids.
pub fn merge_list<R: Record + Clone>(
    local: &[R],
    remote: &[R],
    compare_field: Option<&str>,
) -> Vec<R> {
    let mut merged = Keyed::seed(local);
    for incoming in remote {
        let remote_wins = match merged.get(incoming.id()) {
            None => true,
            Some(existing) => match compare_field.map(|field| {
                (existing.timestamp(field), incoming.timestamp(field))
            }) {
                Some((Some(local_ts), Some(remote_ts))) => remote_ts > local_ts,
                _ => true,
            },
        };
        if remote_wins {
            merged.put(incoming.clone());
        }
    }
    merged.into_vec()
}

/// Merge every collection with its fixed comparison field.
///
/// Settings are shallow-merged with remote values overriding local ones.
/// Deletions from both sides are carried into the result.
pub fn merge_collections(local: &Snapshot, remote: &Snapshot) -> Snapshot {
    let mut merged = Snapshot::new();
    for kind in CollectionKind::ALL {
        let (ours, theirs) = (local.collections.get(&kind), remote.collections.get(&kind));
        if ours.is_none() && theirs.is_none() {
            continue;
        }
        merged.set_collection(
            kind,
            merge_list(
                local.collection(kind),
                remote.collection(kind),
                kind.compare_field(),
            ),
        );
    }

    merged.settings = local.settings.clone();
    for (key, value) in &remote.settings {
        merged.settings.insert(key.clone(), value.clone());
    }

    merged.deletions = union_deletions(&local.deletions, &remote.deletions);
    merged
}

fn union_deletions(left: &[Tombstone], right: &[Tombstone]) -> Vec<Tombstone> {
    let mut all = left.to_vec();
    for tombstone in right {
        if !all.contains(tombstone) {
            all.push(tombstone.clone());
        }
    }
    all
}

/// True when `record` is deleted by a tombstone at `deleted_at`.
fn is_dominated<R: Record>(record: &R, deleted_at: DateTime<Utc>) -> bool {
    match record.updated_at() {
        Some(updated_at) => deleted_at >= updated_at,
        None => true,
    }
}

/// Drop records deleted by a tombstone.
///
/// A record survives only if its `updatedAt` is strictly later than the
/// latest deletion of the same `(type, id)`. Records without `updatedAt` never
/// survive a matching tombstone.
pub fn apply_tombstones<R: Record + Clone>(
    kind: CollectionKind,
    records: &[R],
    log: &TombstoneLog,
) -> Vec<R> {
    if log.is_empty() {
        return records.to_vec();
    }
    let index = log.index();
    records
        .iter()
        .filter(|record| match index.get(&(kind.record_type(), record.id())) {
            Some(deleted_at) => !is_dominated(*record, *deleted_at),
            None => true,
        })
        .cloned()
        .collect()
}

/// Apply tombstones to every collection of a snapshot.
pub fn apply_tombstones_to_snapshot(snapshot: &Snapshot, log: &TombstoneLog) -> Snapshot {
    let mut result = snapshot.clone();
    for (kind, records) in &mut result.collections {
        *records = apply_tombstones(*kind, records, log);
    }
    result
}

/// Like [`apply_tombstones`] but also reports tombstoned records that
/// survived because they were edited after the deletion.
pub fn apply_tombstones_reporting<R: Record + Clone + Serialize>(
    kind: CollectionKind,
    records: &[R],
    log: &TombstoneLog,
) -> MergeOutcome<R> {
    let index = log.index();
    let mut outcome = MergeOutcome {
        records: Vec::with_capacity(records.len()),
        conflicts: Vec::new(),
    };
    for record in records {
        match index.get(&(kind.record_type(), record.id())) {
            Some(deleted_at) if is_dominated(record, *deleted_at) => {}
            Some(_) => {
                outcome.conflicts.push(ConflictRecord {
                    id: record.id().to_string(),
                    kind: ConflictKind::Delete,
                    local_data: None,
                    server_data: serde_json::to_value(record).ok(),
                    timestamp: Utc::now(),
                });
                outcome.records.push(record.clone());
            }
            None => outcome.records.push(record.clone()),
        }
    }
    outcome
}

/// Conflict-aware merge used by per-collection sync.
///
/// Shared records whose `updatedAt` differ by more than the policy tolerance
/// are conflicts: the newer one wins and a [`ConflictRecord`] is produced.
/// Smaller differences resolve by the tie break. Records lacking `updatedAt`
/// on either side are never compared and the local copy is kept.
pub fn merge_with_conflicts<R: Record + Clone + Serialize>(
    local: &[R],
    remote: &[R],
    policy: &ConflictPolicy,
) -> MergeOutcome<R> {
    let mut merged = Keyed::seed(local);
    let mut conflicts = Vec::new();

    for incoming in remote {
        let Some(existing) = merged.get(incoming.id()) else {
            merged.put(incoming.clone());
            continue;
        };
        let (Some(local_ts), Some(remote_ts)) = (existing.updated_at(), incoming.updated_at())
        else {
            continue;
        };

        if (remote_ts - local_ts).abs() > policy.tolerance {
            conflicts.push(ConflictRecord {
                id: incoming.id().to_string(),
                kind: ConflictKind::Update,
                local_data: serde_json::to_value(existing).ok(),
                server_data: serde_json::to_value(incoming).ok(),
                timestamp: Utc::now(),
            });
            if remote_ts > local_ts {
                merged.put(incoming.clone());
            }
        } else if policy.tie_break == TieBreak::Remote {
            merged.put(incoming.clone());
        }
    }

    MergeOutcome {
        records: merged.into_vec(),
        conflicts,
    }
}

/// True when pushing `merged` would change what the server holds.
///
/// Differences are a different length, an id the server lacks, or a shared id
/// with a different `updatedAt`.
pub fn differs_from_remote<R: Record>(merged: &[R], remote: &[R]) -> bool {
    if merged.len() != remote.len() {
        return true;
    }
    let remote_index: HashMap<&str, Option<DateTime<Utc>>> = remote
        .iter()
        .map(|record| (record.id(), record.updated_at()))
        .collect();
    merged.iter().any(|record| match remote_index.get(record.id()) {
        None => true,
        Some(updated_at) => *updated_at != record.updated_at(),
    })
}

/// Convert typed records to JSON values, skipping any that fail to serialize.
pub fn to_values<R: Serialize>(records: &[R]) -> Vec<Value> {
    records
        .iter()
        .filter_map(|record| serde_json::to_value(record).ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    const T0: &str = "2024-01-01T00:00:00Z";
    const T1: &str = "2024-01-01T00:00:10Z";
    const T2: &str = "2024-01-01T00:00:20Z";

    fn rec(id: &str, updated_at: &str, title: &str) -> Value {
        json!({"id": id, "updatedAt": updated_at, "title": title})
    }

    fn ts(raw: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(raw).unwrap().with_timezone(&Utc)
    }

    fn ids(records: &[Value]) -> Vec<&str> {
        records.iter().map(Record::id).collect()
    }

    #[test]
    fn remote_only_records_are_added() {
        let local = vec![rec("a", T0, "a")];
        let remote = vec![rec("b", T0, "b")];
        let merged = merge_list(&local, &remote, Some("updatedAt"));
        assert_eq!(ids(&merged), vec!["a", "b"]);
    }

    #[test]
    fn newer_timestamp_wins_and_tie_keeps_local() {
        let local = vec![rec("a", T1, "local"), rec("b", T1, "local")];
        let remote = vec![rec("a", T2, "remote"), rec("b", T1, "remote")];
        let merged = merge_list(&local, &remote, Some("updatedAt"));
        assert_eq!(merged[0]["title"], "remote");
        assert_eq!(merged[1]["title"], "local");

        let older_remote = vec![rec("a", T0, "remote")];
        let merged = merge_list(&local, &older_remote, Some("updatedAt"));
        assert_eq!(merged[0]["title"], "local");
    }

    #[test]
    fn without_compare_field_remote_wins() {
        let local = vec![json!({"id": "s1", "label": "local"})];
        let remote = vec![json!({"id": "s1", "label": "remote"})];
        let merged = merge_list(&local, &remote, None);
        assert_eq!(merged, remote);
    }

    #[test]
    fn merge_list_is_idempotent() {
        let cases = [
            (vec![rec("a", T0, "l"), rec("b", T2, "l")], vec![rec("a", T1, "r"), rec("c", T0, "r")]),
            (vec![rec("a", T2, "l")], vec![rec("a", T2, "r")]),
            (vec![], vec![rec("a", T0, "r")]),
            (vec![json!({"id": "a"})], vec![rec("a", T0, "r")]),
        ];
        for (a, b) in cases {
            for field in [Some("updatedAt"), None] {
                let once = merge_list(&a, &b, field);
                let twice = merge_list(&once, &b, field);
                assert_eq!(twice, once);
            }
        }
    }

    #[test]
    fn records_without_id_are_ignored() {
        let local = vec![json!({"title": "orphan"}), rec("a", T0, "a")];
        let merged = merge_list(&local, &[json!({"id": ""})], Some("updatedAt"));
        assert_eq!(ids(&merged), vec!["a"]);
    }

    #[test]
    fn tombstone_dominates_older_or_equal_records() {
        let records = vec![rec("a", T0, "old"), rec("b", T1, "equal"), rec("c", T0, "kept")];
        let log: TombstoneLog = vec![
            Tombstone::at(CollectionKind::Tasks, "a", ts(T1)),
            Tombstone::at(CollectionKind::Tasks, "b", ts(T1)),
            Tombstone::at(CollectionKind::Notes, "c", ts(T2)),
        ]
        .into();
        let remaining = apply_tombstones(CollectionKind::Tasks, &records, &log);
        assert_eq!(ids(&remaining), vec!["c"]);
    }

    #[test]
    fn edit_after_delete_is_an_undelete() {
        let records = vec![rec("a", T2, "edited later")];
        let log: TombstoneLog = vec![Tombstone::at(CollectionKind::Tasks, "a", ts(T1))].into();
        let remaining = apply_tombstones(CollectionKind::Tasks, &records, &log);
        assert_eq!(remaining, records);
    }

    #[test]
    fn latest_tombstone_is_authoritative() {
        let records = vec![rec("a", T1, "x")];
        let log: TombstoneLog = vec![
            Tombstone::at(CollectionKind::Tasks, "a", ts(T0)),
            Tombstone::at(CollectionKind::Tasks, "a", ts(T2)),
        ]
        .into();
        assert!(apply_tombstones(CollectionKind::Tasks, &records, &log).is_empty());
    }

    #[test]
    fn records_without_updated_at_are_always_deleted() {
        let sessions = vec![json!({"id": "s1", "startedAt": T2})];
        let log: TombstoneLog = vec![Tombstone::at(CollectionKind::Sessions, "s1", ts(T0))].into();
        assert!(apply_tombstones(CollectionKind::Sessions, &sessions, &log).is_empty());
    }

    #[test]
    fn surviving_tombstoned_record_reports_delete_conflict() {
        let records = vec![rec("a", T2, "edited"), rec("b", T0, "gone")];
        let log: TombstoneLog = vec![
            Tombstone::at(CollectionKind::Tasks, "a", ts(T1)),
            Tombstone::at(CollectionKind::Tasks, "b", ts(T1)),
        ]
        .into();
        let outcome = apply_tombstones_reporting(CollectionKind::Tasks, &records, &log);
        assert_eq!(ids(&outcome.records), vec!["a"]);
        assert_eq!(outcome.conflicts.len(), 1);
        assert_eq!(outcome.conflicts[0].kind, ConflictKind::Delete);
        assert_eq!(outcome.conflicts[0].local_data, None);
    }

    #[test]
    fn merge_collections_overrides_settings_and_unions_deletions() {
        let deletion = Tombstone::at(CollectionKind::Notes, "n1", ts(T0));
        let mut local = Snapshot::new().with_collection(CollectionKind::Tasks, vec![rec("a", T0, "l")]);
        local.settings.insert("theme".into(), json!("light"));
        local.settings.insert("lang".into(), json!("en"));
        local.deletions.push(deletion.clone());

        let mut remote = Snapshot::new()
            .with_collection(CollectionKind::Tasks, vec![rec("a", T1, "r")])
            .with_collection(CollectionKind::Habits, vec![rec("h", T0, "r")]);
        remote.settings.insert("theme".into(), json!("dark"));
        remote.deletions.push(deletion);

        let merged = merge_collections(&local, &remote);
        assert_eq!(merged.collection(CollectionKind::Tasks)[0]["title"], "r");
        assert_eq!(merged.collection(CollectionKind::Habits).len(), 1);
        assert_eq!(merged.settings["theme"], "dark");
        assert_eq!(merged.settings["lang"], "en");
        assert_eq!(merged.deletions.len(), 1);
    }

    #[test]
    fn conflicts_only_beyond_tolerance() {
        let policy = ConflictPolicy::default();
        let local = vec![
            rec("a", "2024-01-01T00:00:00.000Z", "local"),
            rec("b", T0, "local"),
            rec("c", T2, "local"),
        ];
        let remote = vec![
            rec("a", "2024-01-01T00:00:00.500Z", "remote"),
            rec("b", T1, "remote"),
            rec("c", T1, "remote"),
        ];

        let outcome = merge_with_conflicts(&local, &remote, &policy);
        assert_eq!(outcome.records[0]["title"], "local");
        assert_eq!(outcome.records[1]["title"], "remote");
        assert_eq!(outcome.records[2]["title"], "local");

        let conflicted: Vec<&str> = outcome.conflicts.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(conflicted, vec!["b", "c"]);
        assert!(outcome.conflicts.iter().all(|c| c.kind == ConflictKind::Update));
    }

    #[test]
    fn remote_tie_break_prefers_remote_within_tolerance() {
        let policy = ConflictPolicy {
            tie_break: TieBreak::Remote,
            ..ConflictPolicy::default()
        };
        let outcome = merge_with_conflicts(&[rec("a", T0, "l")], &[rec("a", T0, "r")], &policy);
        assert_eq!(outcome.records[0]["title"], "r");
        assert!(outcome.conflicts.is_empty());
    }

    #[test]
    fn records_without_updated_at_keep_local() {
        let local = vec![json!({"id": "s1", "label": "local"})];
        let remote = vec![json!({"id": "s1", "label": "remote"}), json!({"id": "s2"})];
        let outcome = merge_with_conflicts(&local, &remote, &ConflictPolicy::default());
        assert_eq!(outcome.records[0]["label"], "local");
        assert_eq!(outcome.records.len(), 2);
        assert!(outcome.conflicts.is_empty());
    }

    #[test]
    fn differs_from_remote_detects_changes() {
        let remote = vec![rec("a", T0, "x"), rec("b", T0, "x")];
        assert!(!differs_from_remote(&remote.clone(), &remote));
        assert!(differs_from_remote(&remote[..1], &remote));
        assert!(differs_from_remote(&[rec("a", T0, "x"), rec("c", T0, "x")], &remote));
        assert!(differs_from_remote(&[rec("a", T1, "x"), rec("b", T0, "x")], &remote));
    }
}
