//! Diff engine
//!
//! Pure functions over record snapshots. [`compute_diff`] reports the delta
//! between two snapshots at top-level field granularity; nested values are
//! compared by deep value equality and reported whole when they differ.
//! Equality is exact: a numeric `5` and a string `"5"` are different values.
//! Arrays are opaque, order-sensitive values; a reordered array reports as a
//! single changed field.

use serde_json::Value;

use crate::models::{FieldChange, FieldDiff, Snapshot};

/// Field-level delta from `old` to `new`.
///
/// Fields present in `new` but absent or differing in `old` are reported
/// with their new value; fields present only in `old` are reported as
/// removed. Structurally equal snapshots yield the empty diff.
pub fn compute_diff(old: &Snapshot, new: &Snapshot) -> FieldDiff {
    let mut diff = FieldDiff::new();

    for (field, new_value) in new {
        match old.get(field) {
            Some(old_value) if old_value == new_value => {}
            Some(old_value) => diff.insert(
                field.clone(),
                FieldChange {
                    old: Some(old_value.clone()),
                    new: Some(new_value.clone()),
                },
            ),
            None => diff.insert(
                field.clone(),
                FieldChange {
                    old: None,
                    new: Some(new_value.clone()),
                },
            ),
        }
    }

    for (field, old_value) in old {
        if !new.contains_key(field) {
            diff.insert(
                field.clone(),
                FieldChange {
                    old: Some(old_value.clone()),
                    new: None,
                },
            );
        }
    }

    diff
}

/// Apply a diff's new values to `base`, reconstructing the after-state the
/// diff was computed against.
pub fn apply_diff(base: &Snapshot, diff: &FieldDiff) -> Snapshot {
    let mut result = base.clone();
    for (field, change) in diff.iter() {
        match &change.new {
            Some(value) => {
                result.insert(field.clone(), value.clone());
            }
            None => {
                result.remove(field);
            }
        }
    }
    result
}

/// Overwrite the listed fields with the sentinel value, leaving all other
/// fields untouched. Fields absent from the snapshot are not added.
pub fn anonymize_snapshot(snapshot: &Snapshot, fields: &[String], sentinel: &str) -> Snapshot {
    let mut result = snapshot.clone();
    for field in fields {
        if result.contains_key(field) {
            result.insert(field.clone(), Value::String(sentinel.to_string()));
        }
    }
    result
}
