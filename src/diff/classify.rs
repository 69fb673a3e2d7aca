use crate::models::Operation;
use crate::snapshot::{FieldValue, Snapshot};

/// Recovers the operation for samples recorded without one.
///
/// With an identity field present in `before`, a falsy identity means CREATE.
/// Otherwise a `before` whose values are all falsy (empty, `false` or `0`)
/// means CREATE.
pub fn infer_operation(before: &Snapshot, identity_field: Option<&str>) -> Operation {
    let identity = identity_field.and_then(|field| before.get(field));

    let is_create = match identity {
        Some(value) => is_falsy(value),
        None => before.iter().all(|(_, value)| is_falsy(value)),
    };

    if is_create {
        Operation::Create
    } else {
        Operation::Edit
    }
}

/// Training label, e.g. `FIREWALL_POLICY EDIT`.
pub fn sample_label(object_type: Option<&str>, operation: Operation) -> String {
    let object_type = object_type
        .filter(|value| !value.trim().is_empty())
        .unwrap_or("unknown");
    format!("{} {}", object_type.to_uppercase(), operation)
}

fn is_falsy(value: &FieldValue) -> bool {
    match value {
        FieldValue::Number(number) => number.as_f64().map_or(true, |n| n == 0.0),
        FieldValue::Bool(flag) => !flag,
        other => other.is_empty(),
    }
}
