//! Commit (save) protocol: candidate capture, validation gate, integrity
//! check and emission.

pub mod machine;
pub mod state;

use serde::Serialize;
use thiserror::Error;

use crate::models::CanonicalSample;

pub use machine::CommitStateMachine;
pub use state::{CommitPhase, FinalizeTrigger, PendingCommit, SaveIgnored};

/// Reasons a commit ends without a sample. None of these reach the user; each
/// is logged once and recorded alongside emitted samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SuppressReason {
    #[error("record shows validation errors at finalize")]
    ValidationBlocked,
    #[error("EDIT commit with an empty authoritative baseline")]
    IntegrityViolation,
    #[error("save produced no changes")]
    NoOpCommit,
    #[error("commit did not finalize before the watchdog timeout")]
    StuckCommit,
}

impl SuppressReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SuppressReason::ValidationBlocked => "validation_blocked",
            SuppressReason::IntegrityViolation => "integrity_violation",
            SuppressReason::NoOpCommit => "no_op_commit",
            SuppressReason::StuckCommit => "stuck_commit",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CommitOutcome {
    Emitted(CanonicalSample),
    Suppressed(SuppressReason),
}

impl CommitOutcome {
    pub fn sample(&self) -> Option<&CanonicalSample> {
        match self {
            CommitOutcome::Emitted(sample) => Some(sample),
            CommitOutcome::Suppressed(_) => None,
        }
    }

    pub fn phase(&self) -> CommitPhase {
        match self {
            CommitOutcome::Emitted(_) => CommitPhase::Emitted,
            CommitOutcome::Suppressed(_) => CommitPhase::Suppressed,
        }
    }
}
