//! Training sample data model handed to storage and the inference boundary.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::snapshot::{FieldKey, FieldValue, Snapshot};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ChangeOp {
    Add,
    Remove,
    Set,
}

impl ChangeOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeOp::Add => "add",
            ChangeOp::Remove => "remove",
            ChangeOp::Set => "set",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeEntry {
    pub field: FieldKey,
    pub old_value: Option<FieldValue>,
    pub new_value: Option<FieldValue>,
    pub op: ChangeOp,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum Operation {
    Create,
    Edit,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Create => "CREATE",
            Operation::Edit => "EDIT",
        }
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleMetadata {
    pub timestamp: DateTime<Utc>,
    pub operation: Operation,
}

/// Raw-keyed before/after/changes record produced by a successful commit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalSample {
    pub metadata: SampleMetadata,
    pub before: Snapshot,
    pub after: Snapshot,
    pub changes: Vec<ChangeEntry>,
}
