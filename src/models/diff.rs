//! Field-level diff types
//!
//! A [`FieldDiff`] describes the delta between two snapshots of one record as
//! a mapping from top-level field name to an old/new value pair. It is owned
//! by the audit record that embeds it and is never mutated after construction.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A point-in-time representation of one record's field values.
pub type Snapshot = serde_json::Map<String, Value>;

/// The old/new value pair for a single field.
///
/// `None` is the absent-marker: `old: None` means the field was added,
/// `new: None` means it was removed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldChange {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new: Option<Value>,
}

/// Mapping from field name to the change observed for that field.
///
/// Covers changed, added, and removed top-level fields. Nested values are
/// compared as whole values and reported in full when they differ.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FieldDiff(BTreeMap<String, FieldChange>);

impl FieldDiff {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn get(&self, field: &str) -> Option<&FieldChange> {
        self.0.get(field)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &FieldChange)> {
        self.0.iter()
    }

    pub(crate) fn insert(&mut self, field: String, change: FieldChange) {
        self.0.insert(field, change);
    }
}
