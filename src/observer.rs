//! Field Observer boundary.
//!
//! The concrete extraction for any UI toolkit lives outside this crate; the
//! tracker only needs the current container's status and a list of field reads.

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::snapshot::{normalize_fields, normalize_value, FieldValue, RawField, RawValue, Snapshot};

const ENABLE_LOGS: bool = true;
const LOG_TARGET: &str = "formtrace::observer";

use crate::log_warn;

/// Status of the live record container the observer is attached to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerInfo {
    /// Stable for the lifetime of one rendered container instance.
    pub id: String,
    #[serde(default)]
    pub record_type: Option<String>,
    #[serde(default = "default_visible")]
    pub visible: bool,
    #[serde(default)]
    pub validation_errors: bool,
}

fn default_visible() -> bool {
    true
}

/// Reads the record currently on screen. Calls must be side-effect free and
/// may return a partial view while the form is still hydrating.
pub trait FieldObserver: Send + Sync {
    /// `None` when no record container is attached.
    fn container(&self) -> Option<ContainerInfo>;

    /// One entry per field; an `Err` is a single field that could not be read.
    fn read_fields(&self) -> Vec<Result<RawField>>;

    /// Live value of one field, used when an edit signal arrives.
    fn read_field(&self, key: &str) -> Option<RawValue> {
        self.read_fields()
            .into_iter()
            .filter_map(Result::ok)
            .find(|field| field.key == key)
            .map(|field| field.value)
    }
}

/// Normalized snapshot of the observer's current fields. Unreadable fields are
/// logged and skipped; they never abort the snapshot.
pub fn observe(observer: &dyn FieldObserver) -> Snapshot {
    let mut skipped = 0usize;
    let fields: Vec<RawField> = observer
        .read_fields()
        .into_iter()
        .filter_map(|read| match read {
            Ok(field) => Some(field),
            Err(err) => {
                skipped += 1;
                log_warn!("skipping unreadable field: {err:#}");
                None
            }
        })
        .collect();

    if skipped > 0 {
        log_warn!("snapshot taken with {skipped} unreadable field(s)");
    }
    normalize_fields(fields)
}

/// Normalized live value of `key`, if the observer can read it.
pub fn observe_field(observer: &dyn FieldObserver, key: &str) -> Option<FieldValue> {
    observer.read_field(key).map(|raw| normalize_value(&raw))
}
