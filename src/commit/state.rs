use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::snapshot::Snapshot;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum CommitPhase {
    Idle,
    CandidateCaptured,
    Finalizing,
    Emitted,
    Suppressed,
}

impl Default for CommitPhase {
    fn default() -> Self {
        CommitPhase::Idle
    }
}

impl CommitPhase {
    /// Whether a new save-intent may start a commit.
    pub fn accepts_save_intent(&self) -> bool {
        matches!(
            self,
            CommitPhase::Idle | CommitPhase::Emitted | CommitPhase::Suppressed
        )
    }
}

/// What moved a captured commit into `Finalizing`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum FinalizeTrigger {
    GraceElapsed,
    /// Page teardown: finalize now and skip the validation check.
    Unload,
}

/// A save-intent whose `after` snapshot was captured synchronously.
#[derive(Debug, Clone)]
pub struct PendingCommit {
    pub id: Uuid,
    pub container_id: Option<String>,
    pub record_type: Option<String>,
    pub candidate_after: Snapshot,
    pub captured_at: DateTime<Utc>,
}

/// Why a save-intent did not start a commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveIgnored {
    CommitInFlight,
    TrivialContent,
}
