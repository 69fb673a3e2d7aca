//! Model-agnostic feature extraction shared by training export and live
//! inference. Token rendering follows the training pipeline so features built
//! here line up with what the model saw.

use serde::Serialize;

use crate::models::ChangeEntry;
use crate::snapshot::{FieldValue, Snapshot};

use super::InferenceRequest;

/// Width of the hashed changed-field vector.
pub const DIFF_DIM: usize = 200;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeatureVector {
    /// Space-joined field names and values of `after`, in feature-key order.
    pub text: String,
    /// 1.0 where `after` carries a non-empty value for the feature key.
    pub presence: Vec<f32>,
    /// Bit `|stable_hash(field)| % DIFF_DIM` set for every changed field.
    pub diff_bits: Vec<f32>,
}

impl FeatureVector {
    pub fn from_request(request: &InferenceRequest, feature_keys: &[String]) -> Self {
        Self::build(&request.after, &request.changes, feature_keys)
    }

    pub fn build(after: &Snapshot, changes: &[ChangeEntry], feature_keys: &[String]) -> Self {
        let mut keys: Vec<&String> = feature_keys.iter().collect();
        keys.sort();
        keys.dedup();

        let mut tokens = Vec::new();
        for key in &keys {
            if let Some(value) = after.get(key) {
                tokens.push((*key).clone());
                tokens.extend(render_tokens(value));
            }
        }

        let presence = keys
            .iter()
            .map(|key| match after.get(key) {
                Some(value) if is_present(value) => 1.0,
                _ => 0.0,
            })
            .collect();

        Self {
            text: tokens.join(" "),
            presence,
            diff_bits: diff_bits(changes),
        }
    }
}

/// 32-bit `h = h * 31 + unit` over UTF-16 code units, wrapping.
pub fn stable_hash(s: &str) -> i32 {
    s.encode_utf16().fold(0i32, |h, unit| {
        h.wrapping_shl(5).wrapping_sub(h).wrapping_add(i32::from(unit))
    })
}

pub fn diff_bits(changes: &[ChangeEntry]) -> Vec<f32> {
    let mut bits = vec![0.0; DIFF_DIM];
    for change in changes {
        if change.field.is_empty() {
            continue;
        }
        let slot = stable_hash(&change.field).unsigned_abs() as usize % DIFF_DIM;
        bits[slot] = 1.0;
    }
    bits
}

fn render_tokens(value: &FieldValue) -> Vec<String> {
    match value {
        FieldValue::Bool(true) => vec!["True".into()],
        FieldValue::Bool(false) => vec!["False".into()],
        other => other.tokens(),
    }
}

fn is_present(value: &FieldValue) -> bool {
    match value {
        FieldValue::Bool(flag) => *flag,
        FieldValue::Number(number) => number.as_f64().map_or(false, |n| n != 0.0),
        other => !other.is_empty(),
    }
}
