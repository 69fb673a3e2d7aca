//! Diff Engine and CREATE/EDIT classification helpers.

pub mod classify;

use std::collections::BTreeSet;

use crate::models::{ChangeEntry, ChangeOp};
use crate::snapshot::{FieldValue, Snapshot};

pub use classify::{infer_operation, sample_label};

/// Symmetric difference of two snapshots.
///
/// A key appears in the result iff its serialized values differ (absence counts
/// as a value). Output is key-ordered, but callers should not rely on it.
pub fn diff(before: &Snapshot, after: &Snapshot) -> Vec<ChangeEntry> {
    let keys: BTreeSet<&String> = before.keys().chain(after.keys()).collect();

    keys.into_iter()
        .filter_map(|key| {
            let old_value = before.get(key);
            let new_value = after.get(key);
            if serialized(old_value) == serialized(new_value) {
                return None;
            }
            Some(ChangeEntry {
                field: key.clone(),
                op: change_op(old_value, new_value),
                old_value: old_value.cloned(),
                new_value: new_value.cloned(),
            })
        })
        .collect()
}

fn serialized(value: Option<&FieldValue>) -> Option<String> {
    value.map(FieldValue::canonical_json)
}

fn change_op(old_value: Option<&FieldValue>, new_value: Option<&FieldValue>) -> ChangeOp {
    let absent_or_empty = |value: Option<&FieldValue>| value.map_or(true, FieldValue::is_empty);

    if absent_or_empty(old_value) {
        ChangeOp::Add
    } else if absent_or_empty(new_value) {
        ChangeOp::Remove
    } else {
        ChangeOp::Set
    }
}
