use crate::settings::TrackerSettings;
use crate::snapshot::{FieldValue, Snapshot};

const ENABLE_LOGS: bool = true;
const LOG_TARGET: &str = "formtrace::tracker";

use crate::log_debug;

/// Which keys may prove that the record already existed.
///
/// An explicit per-record-type field, when configured, is the only key
/// consulted; the generic keys are a fallback for record types without one.
#[derive(Debug, Clone, PartialEq)]
pub struct IdentityPolicy {
    explicit_field: Option<String>,
    generic_keys: Vec<String>,
}

/// A qualifying identity value found in a snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct IdentityMatch<'a> {
    pub field: &'a str,
    pub value: &'a FieldValue,
}

impl IdentityPolicy {
    pub fn new(explicit_field: Option<String>, generic_keys: Vec<String>) -> Self {
        Self {
            explicit_field,
            generic_keys,
        }
    }

    pub fn for_record_type(settings: &TrackerSettings, record_type: Option<&str>) -> Self {
        let explicit_field = record_type
            .and_then(|record_type| settings.identity_fields.get(record_type))
            .cloned();
        Self::new(explicit_field, settings.generic_identity_keys.clone())
    }

    pub fn explicit_field(&self) -> Option<&str> {
        self.explicit_field.as_deref()
    }

    pub fn identity_value<'a>(&'a self, snapshot: &'a Snapshot) -> Option<IdentityMatch<'a>> {
        if let Some(field) = self.explicit_field.as_deref() {
            let found = qualifying(snapshot, field);
            if found.is_none() {
                if let Some(generic) = self.first_generic(snapshot) {
                    log_debug!(
                        "explicit identity '{}' unset while generic '{}' carries {}; not freezing",
                        field,
                        generic.field,
                        generic.value.canonical_json()
                    );
                }
            }
            return found;
        }
        self.first_generic(snapshot)
    }

    fn first_generic<'a>(&'a self, snapshot: &'a Snapshot) -> Option<IdentityMatch<'a>> {
        self.generic_keys
            .iter()
            .find_map(|field| qualifying(snapshot, field))
    }
}

fn qualifying<'a>(snapshot: &'a Snapshot, field: &'a str) -> Option<IdentityMatch<'a>> {
    snapshot
        .get(field)
        .filter(|value| !value.is_default_like())
        .map(|value| IdentityMatch { field, value })
}
