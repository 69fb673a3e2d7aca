//! Streaming Emitter: speculative diffs handed to the inference boundary while
//! the user is still editing. Never touches the authoritative baseline and
//! never waits on validation.

pub mod emitter;

use chrono::{DateTime, Utc};

use crate::diff::diff;
use crate::inference::InferenceRequest;
use crate::snapshot::Snapshot;

pub use emitter::StreamingEmitter;

/// Builds the speculative request for the current form state, or `None` when
/// nothing differs from the inference baseline yet.
pub fn speculative_request(
    inference_baseline: &Snapshot,
    current: &Snapshot,
    now: DateTime<Utc>,
) -> Option<InferenceRequest> {
    let changes = diff(inference_baseline, current);
    if changes.is_empty() {
        return None;
    }
    Some(InferenceRequest {
        before: inference_baseline.clone(),
        after: current.clone(),
        changes,
        timestamp: now,
    })
}
