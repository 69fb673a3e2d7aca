use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::snapshot::{FieldKey, FieldValue, Snapshot};

use super::identity::IdentityPolicy;

/// Result of feeding one poll into the freeze algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FreezeProgress {
    AlreadyFrozen,
    /// A commit is in flight; the form may hold user input and must not
    /// become the authoritative baseline.
    CommitInFlight,
    /// No qualifying identity value; counters untouched.
    NoIdentity,
    /// Snapshot differs from the previous candidate; counter restarted.
    NewCandidate,
    Stable { count: u32 },
    Frozen,
}

/// Monitoring state bound to one live record container.
#[derive(Debug, Clone)]
pub struct RecordSession {
    id: Uuid,
    container_id: Option<String>,
    record_type: Option<String>,
    identity: IdentityPolicy,
    stability_threshold: u32,
    started_at: DateTime<Utc>,

    authoritative_baseline: Snapshot,
    authoritative_frozen: bool,
    inference_baseline: Snapshot,
    modified_fields: BTreeSet<FieldKey>,
    stability_count: u32,
    last_candidate_state: Option<Snapshot>,
    save_in_progress: bool,
}

impl RecordSession {
    pub fn new(
        container_id: Option<String>,
        record_type: Option<String>,
        identity: IdentityPolicy,
        stability_threshold: u32,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            container_id,
            record_type,
            identity,
            stability_threshold: stability_threshold.max(1),
            started_at: Utc::now(),
            authoritative_baseline: Snapshot::new(),
            authoritative_frozen: false,
            inference_baseline: Snapshot::new(),
            modified_fields: BTreeSet::new(),
            stability_count: 0,
            last_candidate_state: None,
            save_in_progress: false,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn container_id(&self) -> Option<&str> {
        self.container_id.as_deref()
    }

    pub fn record_type(&self) -> Option<&str> {
        self.record_type.as_deref()
    }

    pub fn identity(&self) -> &IdentityPolicy {
        &self.identity
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn authoritative_baseline(&self) -> &Snapshot {
        &self.authoritative_baseline
    }

    pub fn is_frozen(&self) -> bool {
        self.authoritative_frozen
    }

    pub fn inference_baseline(&self) -> &Snapshot {
        &self.inference_baseline
    }

    pub fn modified_fields(&self) -> &BTreeSet<FieldKey> {
        &self.modified_fields
    }

    pub fn stability_count(&self) -> u32 {
        self.stability_count
    }

    pub fn save_in_progress(&self) -> bool {
        self.save_in_progress
    }

    pub(crate) fn set_save_in_progress(&mut self, value: bool) {
        self.save_in_progress = value;
    }

    /// Seeds every key the inference baseline has not seen yet. Touched keys
    /// are never re-seeded. Returns how many keys were added.
    pub fn enrich(&mut self, snapshot: &Snapshot) -> usize {
        let mut added = 0;
        for (key, value) in snapshot.iter() {
            if self.inference_baseline.contains_key(key) || self.modified_fields.contains(key) {
                continue;
            }
            self.inference_baseline.insert(key.clone(), value.clone());
            added += 1;
        }
        added
    }

    /// One step of the freeze algorithm. The baseline freezes once the same
    /// identity-bearing snapshot has been seen `stability_threshold` more times
    /// after first becoming the candidate.
    pub fn consider_freeze(&mut self, snapshot: &Snapshot) -> FreezeProgress {
        if self.authoritative_frozen {
            return FreezeProgress::AlreadyFrozen;
        }
        if self.save_in_progress {
            return FreezeProgress::CommitInFlight;
        }
        if self.identity.identity_value(snapshot).is_none() {
            return FreezeProgress::NoIdentity;
        }

        let unchanged = self
            .last_candidate_state
            .as_ref()
            .is_some_and(|candidate| candidate.same_state(snapshot));
        if !unchanged {
            self.stability_count = 0;
            self.last_candidate_state = Some(snapshot.clone());
            return FreezeProgress::NewCandidate;
        }

        self.stability_count += 1;
        if self.stability_count < self.stability_threshold {
            return FreezeProgress::Stable {
                count: self.stability_count,
            };
        }

        self.authoritative_baseline = snapshot.clone();
        self.authoritative_frozen = true;
        FreezeProgress::Frozen
    }

    /// Enrichment followed by a freeze step, as run on every fresh poll.
    pub fn observe_poll(&mut self, snapshot: &Snapshot) -> FreezeProgress {
        self.enrich(snapshot);
        self.consider_freeze(snapshot)
    }

    /// Locks `key` on its first edit signal.
    ///
    /// The locked original prefers an explicit original-value signal, then a
    /// value already seeded by enrichment, then the live value. Returns false
    /// if the field was already locked.
    pub fn touch_field(
        &mut self,
        key: &str,
        original: Option<FieldValue>,
        live: Option<FieldValue>,
    ) -> bool {
        if self.modified_fields.contains(key) {
            return false;
        }

        let locked = original
            .or_else(|| self.inference_baseline.get(key).cloned())
            .or(live);
        if let Some(value) = locked {
            self.inference_baseline.insert(key, value);
        }
        self.modified_fields.insert(key.to_string());
        true
    }

    /// Drops speculative state. The authoritative side is left alone.
    pub fn clear_inference(&mut self) {
        self.inference_baseline = Snapshot::new();
        self.modified_fields.clear();
    }

    /// Forgets the authoritative baseline and freeze counters.
    pub fn reset_authoritative(&mut self) {
        self.authoritative_baseline = Snapshot::new();
        self.authoritative_frozen = false;
        self.stability_count = 0;
        self.last_candidate_state = None;
    }

    /// Starts a new session on the same container: fresh id, no
    /// authoritative baseline.
    pub fn restart(&mut self) {
        self.id = Uuid::new_v4();
        self.started_at = Utc::now();
        self.reset_authoritative();
    }

    #[cfg(test)]
    pub(crate) fn force_frozen(&mut self, baseline: Snapshot) {
        self.authoritative_baseline = baseline;
        self.authoritative_frozen = true;
    }

    /// Points the session at a different container while keeping the
    /// authoritative side intact for an in-flight commit.
    pub fn rebind(
        &mut self,
        container_id: Option<String>,
        record_type: Option<String>,
        identity: IdentityPolicy,
    ) {
        self.id = Uuid::new_v4();
        self.container_id = container_id;
        self.record_type = record_type;
        self.identity = identity;
        self.started_at = Utc::now();
        self.clear_inference();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot;

    fn session() -> RecordSession {
        RecordSession::new(
            Some("dialog-1".into()),
            Some("firewall_policy".into()),
            IdentityPolicy::new(None, vec!["id".into()]),
            2,
        )
    }

    #[test]
    fn freezes_after_two_stable_polls() {
        let mut session = session();
        let a = snapshot! { "name" => "" };
        let b = snapshot! { "id" => "42", "name" => "Allow HTTP" };

        assert_eq!(session.observe_poll(&a), FreezeProgress::NoIdentity);
        assert_eq!(session.observe_poll(&a), FreezeProgress::NoIdentity);
        assert_eq!(session.observe_poll(&b), FreezeProgress::NewCandidate);
        assert_eq!(session.observe_poll(&b), FreezeProgress::Stable { count: 1 });
        assert!(!session.is_frozen());
        assert_eq!(session.observe_poll(&b), FreezeProgress::Frozen);
        assert!(session.is_frozen());
        assert_eq!(session.authoritative_baseline(), &b);
    }

    #[test]
    fn changing_snapshot_restarts_stability() {
        let mut session = session();
        let b1 = snapshot! { "id" => "42" };
        let b2 = snapshot! { "id" => "42", "srcintf" => "port1" };

        session.consider_freeze(&b1);
        session.consider_freeze(&b1);
        assert_eq!(session.consider_freeze(&b2), FreezeProgress::NewCandidate);
        assert_eq!(session.stability_count(), 0);
        session.consider_freeze(&b2);
        assert_eq!(session.consider_freeze(&b2), FreezeProgress::Frozen);
        assert_eq!(session.authoritative_baseline(), &b2);
    }

    #[test]
    fn identity_less_polls_leave_counters_alone() {
        let mut session = session();
        let b = snapshot! { "id" => "42" };

        session.consider_freeze(&b);
        session.consider_freeze(&b);
        assert_eq!(session.consider_freeze(&snapshot! { "id" => "" }), FreezeProgress::NoIdentity);
        assert_eq!(session.stability_count(), 1);
        assert_eq!(session.consider_freeze(&b), FreezeProgress::Frozen);
    }

    #[test]
    fn frozen_baseline_never_moves() {
        let mut session = session();
        let b = snapshot! { "id" => "42", "name" => "a" };
        for _ in 0..3 {
            session.consider_freeze(&b);
        }
        assert!(session.is_frozen());

        let later = snapshot! { "id" => "42", "name" => "b" };
        for _ in 0..5 {
            assert_eq!(session.consider_freeze(&later), FreezeProgress::AlreadyFrozen);
        }
        assert_eq!(session.authoritative_baseline(), &b);
    }

    #[test]
    fn no_freeze_while_commit_in_flight() {
        let mut session = session();
        session.set_save_in_progress(true);
        let b = snapshot! { "id" => "42" };
        for _ in 0..4 {
            assert_eq!(session.consider_freeze(&b), FreezeProgress::CommitInFlight);
        }
        assert!(!session.is_frozen());
    }

    #[test]
    fn enrichment_only_adds_unseen_unlocked_keys() {
        let mut session = session();
        assert_eq!(session.enrich(&snapshot! { "name" => "web" }), 1);
        assert_eq!(session.enrich(&snapshot! { "name" => "changed", "comments" => "" }), 1);
        assert_eq!(session.inference_baseline().get("name"), Some(&FieldValue::from("web")));
        assert!(session.inference_baseline().contains_key("comments"));
    }

    #[test]
    fn touch_locks_original_value() {
        let mut session = session();
        session.enrich(&snapshot! { "name" => "Allow HTTP" });

        assert!(session.touch_field("name", None, Some(FieldValue::from("Allow HTTPS"))));
        assert!(!session.touch_field("name", Some(FieldValue::from("other")), None));
        assert_eq!(
            session.inference_baseline().get("name"),
            Some(&FieldValue::from("Allow HTTP"))
        );

        // A field that rendered late and was touched before any enrichment
        // keeps the explicit original signal.
        session.touch_field("srcintf", Some(FieldValue::from("port1")), Some(FieldValue::from("port2")));
        session.enrich(&snapshot! { "srcintf" => "port9" });
        assert_eq!(
            session.inference_baseline().get("srcintf"),
            Some(&FieldValue::from("port1"))
        );
    }

    #[test]
    fn touch_without_any_signal_falls_back_to_live_value() {
        let mut session = session();
        session.touch_field("vip", None, Some(FieldValue::from("x")));
        assert_eq!(session.inference_baseline().get("vip"), Some(&FieldValue::from("x")));
        assert!(session.modified_fields().contains("vip"));
    }

    #[test]
    fn rebind_keeps_authoritative_side() {
        let mut session = session();
        let b = snapshot! { "id" => "42" };
        for _ in 0..3 {
            session.observe_poll(&b);
        }
        session.touch_field("id", None, None);

        session.rebind(Some("dialog-2".into()), None, IdentityPolicy::new(None, vec![]));
        assert!(session.is_frozen());
        assert!(session.inference_baseline().is_empty());
        assert!(session.modified_fields().is_empty());
        assert_eq!(session.container_id(), Some("dialog-2"));

        session.reset_authoritative();
        assert!(!session.is_frozen());
        assert!(session.authoritative_baseline().is_empty());
    }
}
