//! Point-in-time views of a record's fields.

pub mod normalize;
pub mod value;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

pub use normalize::{normalize_fields, normalize_value, RawField, RawValue};
pub use value::FieldValue;

pub type FieldKey = String;

/// Flat key -> value view of a record.
///
/// Backed by a `BTreeMap` so serialization is key-ordered; two snapshots are
/// the same state iff their canonical JSON matches.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Snapshot(BTreeMap<FieldKey, FieldValue>);

impl Snapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&FieldValue> {
        self.0.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn insert(&mut self, key: impl Into<FieldKey>, value: FieldValue) -> Option<FieldValue> {
        self.0.insert(key.into(), value)
    }

    pub fn remove(&mut self, key: &str) -> Option<FieldValue> {
        self.0.remove(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &FieldKey> {
        self.0.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&FieldKey, &FieldValue)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Every value is empty or `false` (or there are no values at all).
    pub fn is_blank(&self) -> bool {
        self.0
            .values()
            .all(|value| value.is_empty() || matches!(value, FieldValue::Bool(false)))
    }

    pub fn canonical_json(&self) -> String {
        serde_json::to_string(&self.0).unwrap_or_default()
    }

    pub fn same_state(&self, other: &Snapshot) -> bool {
        self.canonical_json() == other.canonical_json()
    }
}

impl<K, V> FromIterator<(K, V)> for Snapshot
where
    K: Into<FieldKey>,
    V: Into<FieldValue>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(key, value)| (key.into(), value.into()))
                .collect(),
        )
    }
}

impl IntoIterator for Snapshot {
    type Item = (FieldKey, FieldValue);
    type IntoIter = std::collections::btree_map::IntoIter<FieldKey, FieldValue>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

/// Builds a [`Snapshot`] from `key => value` pairs; values go through
/// `FieldValue::from`.
#[macro_export]
macro_rules! snapshot {
    () => {
        $crate::snapshot::Snapshot::default()
    };
    ($($key:expr => $value:expr),+ $(,)?) => {{
        let mut snapshot = $crate::snapshot::Snapshot::default();
        $(
            snapshot.insert($key, $crate::snapshot::FieldValue::from($value));
        )+
        snapshot
    }};
}
