//! Canonical Mapper boundary: renames vendor field keys into the shared
//! vocabulary and drops keys that are not canonical, before persistence.

use std::{
    collections::{BTreeSet, HashMap},
    fs,
    path::Path,
};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::diff::sample_label;
use crate::models::{CanonicalSample, ChangeEntry, Operation};
use crate::snapshot::Snapshot;

const ENABLE_LOGS: bool = true;
const LOG_TARGET: &str = "formtrace::mapper";

use crate::log_debug;

pub trait CanonicalMapper: Send + Sync {
    fn map_sample(
        &self,
        vendor: &str,
        object_type: Option<&str>,
        sample: &CanonicalSample,
    ) -> MappedSample;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MappedMetadata {
    pub timestamp: DateTime<Utc>,
    pub operation: Operation,
    pub vendor: String,
    pub object_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleData {
    pub before: Snapshot,
    pub after: Snapshot,
}

/// Canonical-keyed sample in the layout the training export expects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MappedSample {
    pub metadata: MappedMetadata,
    pub data: SampleData,
    pub changes: Vec<ChangeEntry>,
}

impl MappedSample {
    pub fn label(&self) -> String {
        sample_label(self.metadata.object_type.as_deref(), self.metadata.operation)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ObjectMapping {
    #[serde(default)]
    pub identity_field: Option<String>,
    /// Whitelist of canonical keys. Empty keeps every (renamed) key.
    #[serde(default)]
    pub canonical_fields: Vec<String>,
    /// Raw key -> canonical key.
    #[serde(default)]
    pub field_map: HashMap<String, String>,
}

impl ObjectMapping {
    fn canonical_key(&self, raw: &str) -> Option<String> {
        let key = self
            .field_map
            .get(raw)
            .cloned()
            .unwrap_or_else(|| raw.to_string());
        if self.canonical_fields.is_empty() || self.canonical_fields.contains(&key) {
            Some(key)
        } else {
            None
        }
    }

    fn map_snapshot(&self, snapshot: &Snapshot) -> Snapshot {
        snapshot
            .iter()
            .filter_map(|(key, value)| self.canonical_key(key).map(|key| (key, value.clone())))
            .collect()
    }

    fn map_changes(&self, changes: &[ChangeEntry]) -> Vec<ChangeEntry> {
        changes
            .iter()
            .filter_map(|change| {
                self.canonical_key(&change.field).map(|field| ChangeEntry {
                    field,
                    ..change.clone()
                })
            })
            .collect()
    }
}

/// vendor -> object type -> mapping, loaded from JSON.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VendorFieldMap(HashMap<String, HashMap<String, ObjectMapping>>);

/// Canonical fields a mapping whitelists that the model has no feature for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlignmentGap {
    pub vendor: String,
    pub object_type: String,
    pub missing: BTreeSet<String>,
}

impl VendorFieldMap {
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read field map {}", path.display()))?;
        Self::from_json(&contents)
            .with_context(|| format!("failed to parse field map {}", path.display()))
    }

    pub fn from_json(contents: &str) -> Result<Self> {
        Ok(serde_json::from_str(contents)?)
    }

    pub fn object(&self, vendor: &str, object_type: &str) -> Option<&ObjectMapping> {
        self.0.get(vendor).and_then(|objects| objects.get(object_type))
    }

    /// (object type, identity field) pairs configured for `vendor`.
    pub fn identity_fields(&self, vendor: &str) -> Vec<(String, String)> {
        self.0
            .get(vendor)
            .map(|objects| {
                objects
                    .iter()
                    .filter_map(|(object_type, mapping)| {
                        mapping
                            .identity_field
                            .clone()
                            .map(|field| (object_type.clone(), field))
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn alignment_report(&self, model_keys: &BTreeSet<String>) -> Vec<AlignmentGap> {
        let mut gaps = Vec::new();
        for (vendor, objects) in &self.0 {
            for (object_type, mapping) in objects {
                let missing: BTreeSet<String> = mapping
                    .canonical_fields
                    .iter()
                    .filter(|field| !model_keys.contains(*field))
                    .cloned()
                    .collect();
                if !missing.is_empty() {
                    gaps.push(AlignmentGap {
                        vendor: vendor.clone(),
                        object_type: object_type.clone(),
                        missing,
                    });
                }
            }
        }
        gaps.sort_by(|a, b| (&a.vendor, &a.object_type).cmp(&(&b.vendor, &b.object_type)));
        gaps
    }
}

impl CanonicalMapper for VendorFieldMap {
    fn map_sample(
        &self,
        vendor: &str,
        object_type: Option<&str>,
        sample: &CanonicalSample,
    ) -> MappedSample {
        let fallback = ObjectMapping::default();
        let mapping = match object_type.and_then(|object_type| self.object(vendor, object_type)) {
            Some(mapping) => mapping,
            None => {
                log_debug!(
                    "no mapping for {}.{}; keeping raw keys",
                    vendor,
                    object_type.unwrap_or("unknown")
                );
                &fallback
            }
        };

        MappedSample {
            metadata: MappedMetadata {
                timestamp: sample.metadata.timestamp,
                operation: sample.metadata.operation,
                vendor: vendor.to_string(),
                object_type: object_type.map(str::to_string),
            },
            data: SampleData {
                before: mapping.map_snapshot(&sample.before),
                after: mapping.map_snapshot(&sample.after),
            },
            changes: mapping.map_changes(&sample.changes),
        }
    }
}
