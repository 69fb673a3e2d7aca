use serde::{Deserialize, Serialize};
use serde_json::Number;

/// A single typed field value as seen in a [`super::Snapshot`].
///
/// Absence is modelled by the key being missing from the snapshot, so there is
/// no `Undefined` variant here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Bool(bool),
    Number(Number),
    Text(String),
    List(Vec<String>),
}

impl FieldValue {
    /// Empty text or an empty list. Booleans and numbers are never empty.
    pub fn is_empty(&self) -> bool {
        match self {
            FieldValue::Text(text) => text.is_empty(),
            FieldValue::List(items) => items.is_empty(),
            FieldValue::Bool(_) | FieldValue::Number(_) => false,
        }
    }

    /// True for values that cannot stand in for an existing record's identity:
    /// empty, zero, the literal `"0"`, or `false`.
    pub fn is_default_like(&self) -> bool {
        match self {
            FieldValue::Text(text) => text.is_empty() || text == "0",
            FieldValue::Number(number) => number.as_f64().map_or(true, |n| n == 0.0),
            FieldValue::List(items) => items.is_empty(),
            FieldValue::Bool(flag) => !flag,
        }
    }

    /// Serialized form used for every equality decision in the tracker.
    pub fn canonical_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(text) => Some(text),
            _ => None,
        }
    }

    /// Flattens the value into whitespace-free tokens for text features.
    pub fn tokens(&self) -> Vec<String> {
        match self {
            FieldValue::Bool(flag) => vec![flag.to_string()],
            FieldValue::Number(number) => vec![number.to_string()],
            FieldValue::Text(text) => vec![text.clone()],
            FieldValue::List(items) => items.clone(),
        }
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Text(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::Text(value)
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        FieldValue::Bool(value)
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        FieldValue::Number(Number::from(value))
    }
}

impl From<i32> for FieldValue {
    fn from(value: i32) -> Self {
        FieldValue::Number(Number::from(value))
    }
}

impl From<Vec<String>> for FieldValue {
    fn from(value: Vec<String>) -> Self {
        FieldValue::List(value)
    }
}

impl From<Vec<&str>> for FieldValue {
    fn from(value: Vec<&str>) -> Self {
        FieldValue::List(value.into_iter().map(str::to_string).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_disqualifiers() {
        assert!(FieldValue::from("").is_default_like());
        assert!(FieldValue::from("0").is_default_like());
        assert!(FieldValue::from(0).is_default_like());
        assert!(FieldValue::from(false).is_default_like());
        assert!(!FieldValue::from("42").is_default_like());
        assert!(!FieldValue::from(7).is_default_like());
        assert!(!FieldValue::from("00").is_default_like());
    }

    #[test]
    fn untagged_serialization_is_plain_json() {
        assert_eq!(FieldValue::from("port1").canonical_json(), "\"port1\"");
        assert_eq!(FieldValue::from(3).canonical_json(), "3");
        assert_eq!(FieldValue::from(vec!["a", "b"]).canonical_json(), "[\"a\",\"b\"]");

        let parsed: FieldValue = serde_json::from_str("true").unwrap();
        assert_eq!(parsed, FieldValue::Bool(true));
    }

    #[test]
    fn empty_only_applies_to_text_and_lists() {
        assert!(FieldValue::from("").is_empty());
        assert!(FieldValue::List(Vec::new()).is_empty());
        assert!(!FieldValue::from(false).is_empty());
        assert!(!FieldValue::from(0).is_empty());
    }
}
