//! Inference Engine boundary. The model behind it is not this crate's concern;
//! requests go out, advisory predictions may come back.

pub mod features;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{CanonicalSample, ChangeEntry};
use crate::snapshot::Snapshot;

pub use features::{stable_hash, FeatureVector, DIFF_DIM};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferenceRequest {
    pub before: Snapshot,
    pub after: Snapshot,
    pub changes: Vec<ChangeEntry>,
    pub timestamp: DateTime<Utc>,
}

impl From<&CanonicalSample> for InferenceRequest {
    fn from(sample: &CanonicalSample) -> Self {
        Self {
            before: sample.before.clone(),
            after: sample.after.clone(),
            changes: sample.changes.clone(),
            timestamp: sample.metadata.timestamp,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub label: String,
    pub confidence: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PredictionStage {
    /// Speculative, while the user is still typing.
    Streaming,
    /// On an emitted sample.
    Final,
}

/// Synchronous by contract; the controller always calls it from a blocking
/// worker so a slow model never stalls tracking.
pub trait InferenceEngine: Send + Sync {
    fn predict(&self, request: &InferenceRequest) -> Option<Prediction>;
}

/// Engine that never answers. Used when no model is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopEngine;

impl InferenceEngine for NoopEngine {
    fn predict(&self, _request: &InferenceRequest) -> Option<Prediction> {
        None
    }
}
