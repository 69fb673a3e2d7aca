use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::diff::diff;
use crate::models::{CanonicalSample, Operation, SampleMetadata};
use crate::observer::ContainerInfo;
use crate::snapshot::Snapshot;
use crate::tracker::RecordSession;

use super::{CommitOutcome, CommitPhase, FinalizeTrigger, PendingCommit, SaveIgnored, SuppressReason};

const ENABLE_LOGS: bool = true;
const LOG_TARGET: &str = "formtrace::commit";

use crate::{log_info, log_warn};

/// `Idle -> CandidateCaptured -> Finalizing -> {Emitted | Suppressed}`.
///
/// At most one commit is pending. Finalize takes the pending commit out, so a
/// second finalize for the same id (grace timer racing an unload) is a no-op.
#[derive(Debug, Default)]
pub struct CommitStateMachine {
    phase: CommitPhase,
    pending: Option<PendingCommit>,
}

impl CommitStateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(&self) -> CommitPhase {
        self.phase
    }

    pub fn pending(&self) -> Option<&PendingCommit> {
        self.pending.as_ref()
    }

    /// Save-intent: stores the synchronously captured `candidate` and raises
    /// `saveInProgress` on the session.
    pub fn begin(
        &mut self,
        session: &mut RecordSession,
        candidate: Snapshot,
        now: DateTime<Utc>,
    ) -> Result<Uuid, SaveIgnored> {
        if self.pending.is_some() || !self.phase.accepts_save_intent() {
            return Err(SaveIgnored::CommitInFlight);
        }
        if candidate.is_blank() {
            return Err(SaveIgnored::TrivialContent);
        }

        let commit = PendingCommit {
            id: Uuid::new_v4(),
            container_id: session.container_id().map(str::to_string),
            record_type: session.record_type().map(str::to_string),
            candidate_after: candidate,
            captured_at: now,
        };
        let id = commit.id;

        session.set_save_in_progress(true);
        self.pending = Some(commit);
        self.phase = CommitPhase::CandidateCaptured;
        Ok(id)
    }

    /// Runs the finalize steps for `commit_id`. Returns `None` if that commit
    /// is not pending (already finalized or force-released).
    pub fn finalize(
        &mut self,
        session: &mut RecordSession,
        commit_id: Uuid,
        trigger: FinalizeTrigger,
        container: Option<&ContainerInfo>,
        now: DateTime<Utc>,
    ) -> Option<CommitOutcome> {
        if self.pending.as_ref().map(|commit| commit.id) != Some(commit_id) {
            return None;
        }
        let commit = self.pending.take()?;
        self.phase = CommitPhase::Finalizing;

        let outcome = evaluate(session, &commit, trigger, container, now);
        match &outcome {
            CommitOutcome::Emitted(sample) => log_info!(
                "commit {} emitted {} sample with {} change(s)",
                commit.id,
                sample.metadata.operation,
                sample.changes.len()
            ),
            CommitOutcome::Suppressed(SuppressReason::IntegrityViolation) => {
                log_warn!("commit {} dropped: {}", commit.id, SuppressReason::IntegrityViolation)
            }
            CommitOutcome::Suppressed(reason) => {
                log_info!("commit {} suppressed: {}", commit.id, reason)
            }
        }

        session.set_save_in_progress(false);
        self.phase = outcome.phase();
        Some(outcome)
    }

    /// Watchdog path: releases `saveInProgress` if `commit_id` never finalized.
    pub fn force_release(&mut self, session: &mut RecordSession, commit_id: Uuid) -> bool {
        if self.pending.as_ref().map(|commit| commit.id) != Some(commit_id) {
            return false;
        }
        self.pending = None;
        session.set_save_in_progress(false);
        self.phase = CommitPhase::Suppressed;
        log_warn!("commit {} force-released: {}", commit_id, SuppressReason::StuckCommit);
        true
    }
}

fn evaluate(
    session: &RecordSession,
    commit: &PendingCommit,
    trigger: FinalizeTrigger,
    container: Option<&ContainerInfo>,
    now: DateTime<Utc>,
) -> CommitOutcome {
    if trigger != FinalizeTrigger::Unload && shows_validation_errors(commit, container) {
        return CommitOutcome::Suppressed(SuppressReason::ValidationBlocked);
    }

    let operation = if session.is_frozen() {
        Operation::Edit
    } else {
        Operation::Create
    };

    if operation == Operation::Edit && session.authoritative_baseline().is_empty() {
        return CommitOutcome::Suppressed(SuppressReason::IntegrityViolation);
    }

    let before = match operation {
        Operation::Edit => session.authoritative_baseline().clone(),
        Operation::Create => Snapshot::new(),
    };

    let changes = diff(&before, &commit.candidate_after);
    if changes.is_empty() {
        return CommitOutcome::Suppressed(SuppressReason::NoOpCommit);
    }

    CommitOutcome::Emitted(CanonicalSample {
        metadata: SampleMetadata {
            timestamp: now,
            operation,
        },
        before,
        after: commit.candidate_after.clone(),
        changes,
    })
}

/// The commit's own container is still on screen and flags errors.
fn shows_validation_errors(commit: &PendingCommit, container: Option<&ContainerInfo>) -> bool {
    let Some(container) = container else {
        return false;
    };
    let same_container = match commit.container_id.as_deref() {
        Some(id) => id == container.id,
        None => true,
    };
    same_container && container.visible && container.validation_errors
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ChangeOp;
    use crate::snapshot;
    use crate::tracker::IdentityPolicy;

    fn session() -> RecordSession {
        RecordSession::new(
            Some("dialog-1".into()),
            Some("firewall_policy".into()),
            IdentityPolicy::new(None, vec!["id".into()]),
            2,
        )
    }

    fn frozen_session(baseline: &Snapshot) -> RecordSession {
        let mut session = session();
        for _ in 0..3 {
            session.observe_poll(baseline);
        }
        assert!(session.is_frozen());
        session
    }

    fn container(validation_errors: bool) -> ContainerInfo {
        ContainerInfo {
            id: "dialog-1".into(),
            record_type: Some("firewall_policy".into()),
            visible: true,
            validation_errors,
        }
    }

    #[test]
    fn create_when_never_frozen() {
        let mut session = session();
        session.observe_poll(&snapshot! {});
        session.observe_poll(&snapshot! {});

        let mut machine = CommitStateMachine::new();
        let after = snapshot! { "name" => "Allow HTTPS", "srcintf" => "port1" };
        let id = machine.begin(&mut session, after.clone(), Utc::now()).unwrap();
        assert!(session.save_in_progress());
        assert_eq!(machine.phase(), CommitPhase::CandidateCaptured);

        let outcome = machine
            .finalize(&mut session, id, FinalizeTrigger::GraceElapsed, Some(&container(false)), Utc::now())
            .unwrap();
        let sample = outcome.sample().unwrap();
        assert_eq!(sample.metadata.operation, Operation::Create);
        assert!(sample.before.is_empty());
        assert_eq!(sample.after, after);
        assert_eq!(sample.changes.len(), 2);
        assert!(sample.changes.iter().all(|change| change.op == ChangeOp::Add));
        assert!(!session.save_in_progress());
        assert_eq!(machine.phase(), CommitPhase::Emitted);
    }

    #[test]
    fn edit_after_freeze() {
        let baseline = snapshot! { "id" => "42", "name" => "Allow HTTP" };
        let mut session = frozen_session(&baseline);
        let mut machine = CommitStateMachine::new();

        let after = snapshot! { "id" => "42", "name" => "Allow HTTPS" };
        let id = machine.begin(&mut session, after, Utc::now()).unwrap();
        let outcome = machine
            .finalize(&mut session, id, FinalizeTrigger::GraceElapsed, Some(&container(false)), Utc::now())
            .unwrap();

        let sample = outcome.sample().unwrap();
        assert_eq!(sample.metadata.operation, Operation::Edit);
        assert_eq!(sample.before, baseline);
        assert_eq!(sample.changes.len(), 1);
        assert_eq!(sample.changes[0].field, "name");
        assert_eq!(sample.changes[0].op, ChangeOp::Set);
    }

    #[test]
    fn validation_errors_suppress_unless_unloading() {
        let mut session = session();
        let mut machine = CommitStateMachine::new();
        let after = snapshot! { "name" => "x" };

        let id = machine.begin(&mut session, after.clone(), Utc::now()).unwrap();
        let outcome = machine.finalize(
            &mut session,
            id,
            FinalizeTrigger::GraceElapsed,
            Some(&container(true)),
            Utc::now(),
        );
        assert_eq!(outcome, Some(CommitOutcome::Suppressed(SuppressReason::ValidationBlocked)));
        assert!(!session.save_in_progress());

        let id = machine.begin(&mut session, after, Utc::now()).unwrap();
        let outcome = machine
            .finalize(&mut session, id, FinalizeTrigger::Unload, Some(&container(true)), Utc::now())
            .unwrap();
        assert!(outcome.sample().is_some());
    }

    #[test]
    fn validation_check_ignores_hidden_or_foreign_containers() {
        let mut session = session();
        let mut machine = CommitStateMachine::new();

        let hidden = ContainerInfo {
            visible: false,
            ..container(true)
        };
        let id = machine.begin(&mut session, snapshot! { "name" => "x" }, Utc::now()).unwrap();
        let outcome = machine
            .finalize(&mut session, id, FinalizeTrigger::GraceElapsed, Some(&hidden), Utc::now())
            .unwrap();
        assert!(outcome.sample().is_some());

        let foreign = ContainerInfo {
            id: "list-view".into(),
            ..container(true)
        };
        let id = machine.begin(&mut session, snapshot! { "name" => "x" }, Utc::now()).unwrap();
        let outcome = machine
            .finalize(&mut session, id, FinalizeTrigger::GraceElapsed, Some(&foreign), Utc::now())
            .unwrap();
        assert!(outcome.sample().is_some());
    }

    #[test]
    fn finalize_is_one_shot() {
        let mut session = session();
        let mut machine = CommitStateMachine::new();
        let id = machine.begin(&mut session, snapshot! { "name" => "x" }, Utc::now()).unwrap();

        assert!(machine
            .finalize(&mut session, id, FinalizeTrigger::Unload, None, Utc::now())
            .is_some());
        assert!(machine
            .finalize(&mut session, id, FinalizeTrigger::GraceElapsed, None, Utc::now())
            .is_none());
    }

    #[test]
    fn edit_with_empty_baseline_is_dropped() {
        let mut session = session();
        session.force_frozen(Snapshot::new());
        let mut machine = CommitStateMachine::new();

        let id = machine.begin(&mut session, snapshot! { "name" => "x" }, Utc::now()).unwrap();
        let outcome = machine.finalize(&mut session, id, FinalizeTrigger::GraceElapsed, None, Utc::now());
        assert_eq!(outcome, Some(CommitOutcome::Suppressed(SuppressReason::IntegrityViolation)));
        assert!(!session.save_in_progress());
    }

    #[test]
    fn no_op_edit_is_suppressed() {
        let baseline = snapshot! { "id" => "42", "name" => "Allow HTTP" };
        let mut session = frozen_session(&baseline);
        let mut machine = CommitStateMachine::new();

        let id = machine.begin(&mut session, baseline.clone(), Utc::now()).unwrap();
        let outcome = machine.finalize(&mut session, id, FinalizeTrigger::GraceElapsed, None, Utc::now());
        assert_eq!(outcome, Some(CommitOutcome::Suppressed(SuppressReason::NoOpCommit)));
    }

    #[test]
    fn second_save_intent_is_ignored_while_pending() {
        let mut session = session();
        let mut machine = CommitStateMachine::new();
        machine.begin(&mut session, snapshot! { "name" => "x" }, Utc::now()).unwrap();
        assert_eq!(
            machine.begin(&mut session, snapshot! { "name" => "y" }, Utc::now()),
            Err(SaveIgnored::CommitInFlight)
        );
    }

    #[test]
    fn blank_form_is_not_a_save() {
        let mut session = session();
        let mut machine = CommitStateMachine::new();
        assert_eq!(
            machine.begin(&mut session, snapshot! { "name" => "" }, Utc::now()),
            Err(SaveIgnored::TrivialContent)
        );
        assert!(!session.save_in_progress());
        assert_eq!(machine.phase(), CommitPhase::Idle);
    }

    #[test]
    fn watchdog_release_only_hits_pending_commit() {
        let mut session = session();
        let mut machine = CommitStateMachine::new();
        let id = machine.begin(&mut session, snapshot! { "name" => "x" }, Utc::now()).unwrap();

        assert!(!machine.force_release(&mut session, Uuid::new_v4()));
        assert!(session.save_in_progress());
        assert!(machine.force_release(&mut session, id));
        assert!(!session.save_in_progress());
        assert_eq!(machine.phase(), CommitPhase::Suppressed);
        assert!(machine
            .finalize(&mut session, id, FinalizeTrigger::GraceElapsed, None, Utc::now())
            .is_none());
    }
}
