//! Dual Baseline Tracker: one current [`RecordSession`] plus the commit state
//! machine that reads from it.

pub mod identity;
pub mod session;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::commit::{CommitOutcome, CommitStateMachine, FinalizeTrigger, SaveIgnored};
use crate::observer::ContainerInfo;
use crate::settings::TrackerSettings;
use crate::snapshot::{FieldValue, Snapshot};

pub use identity::{IdentityMatch, IdentityPolicy};
pub use session::{FreezeProgress, RecordSession};

const ENABLE_LOGS: bool = true;
const LOG_TARGET: &str = "formtrace::tracker";

use crate::{log_debug, log_info};

/// What a container status update did to the current session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerChange {
    Unchanged,
    /// A fresh session was created for a new container.
    Superseded,
    /// New container while a commit is in flight: inference state moved to the
    /// new container, authoritative reset postponed until the commit releases.
    SupersedeDeferred,
    /// Container went away; inference state cleared, authoritative kept.
    Detached,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetOutcome {
    Applied,
    /// A commit is in flight; only inference state was cleared.
    Deferred,
}

/// Owns the single current session. Every mutation goes through here so the
/// `saveInProgress` rules are applied in one place.
#[derive(Debug)]
pub struct BaselineTracker {
    settings: TrackerSettings,
    session: RecordSession,
    commits: CommitStateMachine,
    deferred_reset: bool,
}

impl BaselineTracker {
    pub fn new(settings: TrackerSettings) -> Self {
        let session = fresh_session(&settings, None);
        Self {
            settings,
            session,
            commits: CommitStateMachine::new(),
            deferred_reset: false,
        }
    }

    pub fn settings(&self) -> &TrackerSettings {
        &self.settings
    }

    pub fn session(&self) -> &RecordSession {
        &self.session
    }

    pub fn commits(&self) -> &CommitStateMachine {
        &self.commits
    }

    pub fn reset_pending(&self) -> bool {
        self.deferred_reset
    }

    pub fn sync_container(&mut self, container: Option<&ContainerInfo>) -> ContainerChange {
        match container {
            Some(info) if self.session.container_id() == Some(info.id.as_str()) => {
                ContainerChange::Unchanged
            }
            Some(info) => {
                if self.session.save_in_progress() {
                    self.session.rebind(
                        Some(info.id.clone()),
                        info.record_type.clone(),
                        IdentityPolicy::for_record_type(&self.settings, info.record_type.as_deref()),
                    );
                    self.deferred_reset = true;
                    log_info!("container {} appeared mid-commit; authoritative reset deferred", info.id);
                    ContainerChange::SupersedeDeferred
                } else {
                    self.session = fresh_session(&self.settings, Some(info));
                    self.deferred_reset = false;
                    log_info!(
                        "session {} bound to container {} ({})",
                        self.session.id(),
                        info.id,
                        info.record_type.as_deref().unwrap_or("unknown type")
                    );
                    ContainerChange::Superseded
                }
            }
            None if self.session.container_id().is_none() => ContainerChange::Unchanged,
            None if self.session.save_in_progress() => ContainerChange::Unchanged,
            None => {
                log_debug!(
                    "container {:?} detached; clearing inference state",
                    self.session.container_id()
                );
                self.session.rebind(None, None, self.session.identity().clone());
                ContainerChange::Detached
            }
        }
    }

    /// Freeze-cadence poll: enrichment plus one freeze step.
    pub fn poll(&mut self, snapshot: &Snapshot) -> FreezeProgress {
        let progress = self.session.observe_poll(snapshot);
        if progress == FreezeProgress::Frozen {
            log_info!(
                "session {} froze authoritative baseline ({} field(s))",
                self.session.id(),
                self.session.authoritative_baseline().len()
            );
        }
        progress
    }

    pub fn enrich(&mut self, snapshot: &Snapshot) -> usize {
        self.session.enrich(snapshot)
    }

    pub fn touch(&mut self, key: &str, original: Option<FieldValue>, live: Option<FieldValue>) -> bool {
        self.session.touch_field(key, original, live)
    }

    /// Route-change reset. Never discards the authoritative baseline from
    /// under an in-flight commit.
    pub fn reset(&mut self) -> ResetOutcome {
        if self.session.save_in_progress() {
            self.session.clear_inference();
            self.deferred_reset = true;
            log_info!("reset during commit; authoritative baseline kept until release");
            return ResetOutcome::Deferred;
        }

        let container_id = self.session.container_id().map(str::to_string);
        let record_type = self.session.record_type().map(str::to_string);
        let identity = self.session.identity().clone();
        self.session = RecordSession::new(
            container_id,
            record_type,
            identity,
            self.settings.stability_threshold,
        );
        self.deferred_reset = false;
        ResetOutcome::Applied
    }

    pub fn begin_commit(&mut self, candidate: Snapshot, now: DateTime<Utc>) -> Result<Uuid, SaveIgnored> {
        self.commits.begin(&mut self.session, candidate, now)
    }

    pub fn finalize_commit(
        &mut self,
        commit_id: Uuid,
        trigger: FinalizeTrigger,
        container: Option<&ContainerInfo>,
        now: DateTime<Utc>,
    ) -> Option<CommitOutcome> {
        let outcome = self
            .commits
            .finalize(&mut self.session, commit_id, trigger, container, now);
        if outcome.is_some() {
            self.apply_deferred_reset();
        }
        outcome
    }

    pub fn force_release(&mut self, commit_id: Uuid) -> bool {
        let released = self.commits.force_release(&mut self.session, commit_id);
        if released {
            self.apply_deferred_reset();
        }
        released
    }

    fn apply_deferred_reset(&mut self) {
        if self.deferred_reset && !self.session.save_in_progress() {
            self.session.restart();
            self.deferred_reset = false;
            log_debug!("applied deferred reset; session {} started", self.session.id());
        }
    }
}

fn fresh_session(settings: &TrackerSettings, container: Option<&ContainerInfo>) -> RecordSession {
    let record_type = container.and_then(|info| info.record_type.clone());
    RecordSession::new(
        container.map(|info| info.id.clone()),
        record_type.clone(),
        IdentityPolicy::for_record_type(settings, record_type.as_deref()),
        settings.stability_threshold,
    )
}
