use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::commit::SuppressReason;
use crate::inference::{Prediction, PredictionStage};
use crate::models::CanonicalSample;

/// Everything the controller publishes. Consumers (storage, UI glue) read
/// these off the channel returned by `RecordController::new`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum TrackerEvent {
    SessionStarted {
        session_id: Uuid,
        container_id: Option<String>,
        record_type: Option<String>,
    },
    Frozen {
        session_id: Uuid,
        field_count: usize,
    },
    SampleEmitted {
        commit_id: Uuid,
        record_type: Option<String>,
        sample: CanonicalSample,
    },
    SampleSuppressed {
        commit_id: Uuid,
        record_type: Option<String>,
        reason: SuppressReason,
    },
    StuckCommitReleased {
        commit_id: Uuid,
    },
    Prediction {
        stage: PredictionStage,
        prediction: Prediction,
        timestamp: DateTime<Utc>,
    },
}
