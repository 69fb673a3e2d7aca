//! Async driver around the [`BaselineTracker`]: observation cadences, the
//! commit grace timer and watchdog, streaming emission and inference calls.

pub mod events;
mod observation;

use std::{sync::Arc, time::Duration};

use anyhow::{bail, Context, Result};
use chrono::Utc;
use serde::Serialize;
use tokio::{
    sync::{mpsc, Mutex},
    task::JoinHandle,
    time,
};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::commit::{CommitOutcome, CommitPhase, FinalizeTrigger, SaveIgnored};
use crate::inference::{InferenceEngine, InferenceRequest, PredictionStage};
use crate::observer::{observe, observe_field, ContainerInfo, FieldObserver};
use crate::settings::TrackerSettings;
use crate::snapshot::{normalize_value, RawValue, Snapshot};
use crate::streaming::{speculative_request, StreamingEmitter};
use crate::tracker::{BaselineTracker, ContainerChange, FreezeProgress, ResetOutcome};

pub use events::TrackerEvent;

use observation::observation_loop;

const ENABLE_LOGS: bool = true;
const LOG_TARGET: &str = "formtrace::controller";

use crate::{log_debug, log_error, log_info, log_warn};

/// Read-only view of the tracker for callers and tests.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackerStatus {
    pub session_id: Uuid,
    pub container_id: Option<String>,
    pub record_type: Option<String>,
    pub frozen: bool,
    pub authoritative_baseline: Snapshot,
    pub inference_baseline: Snapshot,
    pub modified_fields: Vec<String>,
    pub save_in_progress: bool,
    pub commit_phase: CommitPhase,
    pub reset_pending: bool,
}

struct ObservationTask {
    handle: JoinHandle<()>,
    cancel_token: CancellationToken,
}

struct CommitTimers {
    commit_id: Uuid,
    grace_token: CancellationToken,
    watchdog: JoinHandle<()>,
}

/// State shared with the spawned tasks.
#[derive(Clone)]
pub(crate) struct Shared {
    tracker: Arc<Mutex<BaselineTracker>>,
    observer: Arc<dyn FieldObserver>,
    engine: Arc<dyn InferenceEngine>,
    events: mpsc::UnboundedSender<TrackerEvent>,
    commit_timers: Arc<Mutex<Option<CommitTimers>>>,
}

impl Shared {
    fn publish(&self, event: TrackerEvent) {
        if let Err(err) = self.events.send(event) {
            log_warn!("event dropped, no consumer: {:?}", err.0);
        }
    }

    fn sync_container(&self, tracker: &mut BaselineTracker, container: Option<&ContainerInfo>) {
        if tracker.sync_container(container) == ContainerChange::Superseded {
            self.publish_session_started(tracker);
        }
    }

    fn publish_session_started(&self, tracker: &BaselineTracker) {
        self.publish(session_started(tracker));
    }

    /// Freeze-cadence observation. `None` when no container is attached.
    pub(crate) async fn poll_once(&self) -> Option<FreezeProgress> {
        let container = self.observer.container();
        let snapshot = observe(self.observer.as_ref());

        let mut tracker = self.tracker.lock().await;
        self.sync_container(&mut tracker, container.as_ref());
        container.as_ref()?;

        let progress = tracker.poll(&snapshot);
        if progress == FreezeProgress::Frozen {
            self.publish(TrackerEvent::Frozen {
                session_id: tracker.session().id(),
                field_count: tracker.session().authoritative_baseline().len(),
            });
        }
        Some(progress)
    }

    pub(crate) async fn enrich_once(&self) -> usize {
        let container = self.observer.container();
        let snapshot = observe(self.observer.as_ref());

        let mut tracker = self.tracker.lock().await;
        self.sync_container(&mut tracker, container.as_ref());
        if container.is_none() {
            return 0;
        }
        tracker.enrich(&snapshot)
    }

    async fn finalize(&self, commit_id: Uuid, trigger: FinalizeTrigger) -> Option<CommitOutcome> {
        let container = self.observer.container();
        let (outcome, record_type, restarted) = {
            let mut tracker = self.tracker.lock().await;
            let record_type = tracker
                .commits()
                .pending()
                .filter(|commit| commit.id == commit_id)
                .and_then(|commit| commit.record_type.clone());
            let session_id = tracker.session().id();
            let outcome = tracker.finalize_commit(commit_id, trigger, container.as_ref(), Utc::now())?;
            let restarted = (tracker.session().id() != session_id).then(|| session_started(&tracker));
            (outcome, record_type, restarted)
        };

        if let Some(timers) = self.take_commit_timers(commit_id).await {
            timers.grace_token.cancel();
            timers.watchdog.abort();
        }

        match &outcome {
            CommitOutcome::Emitted(sample) => {
                self.publish(TrackerEvent::SampleEmitted {
                    commit_id,
                    record_type,
                    sample: sample.clone(),
                });
                self.spawn_prediction(PredictionStage::Final, InferenceRequest::from(sample));
            }
            CommitOutcome::Suppressed(reason) => {
                self.publish(TrackerEvent::SampleSuppressed {
                    commit_id,
                    record_type,
                    reason: *reason,
                });
            }
        }
        if let Some(event) = restarted {
            self.publish(event);
        }
        Some(outcome)
    }

    async fn release_stuck_commit(&self, commit_id: Uuid) {
        let restarted = {
            let mut tracker = self.tracker.lock().await;
            let session_id = tracker.session().id();
            if !tracker.force_release(commit_id) {
                return;
            }
            (tracker.session().id() != session_id).then(|| session_started(&tracker))
        };
        // Runs inside the watchdog task itself, so only the grace timer is stopped.
        if let Some(timers) = self.take_commit_timers(commit_id).await {
            timers.grace_token.cancel();
        }
        self.publish(TrackerEvent::StuckCommitReleased { commit_id });
        if let Some(event) = restarted {
            self.publish(event);
        }
    }

    async fn take_commit_timers(&self, commit_id: Uuid) -> Option<CommitTimers> {
        let mut guard = self.commit_timers.lock().await;
        if guard.as_ref().map(|timers| timers.commit_id) == Some(commit_id) {
            guard.take()
        } else {
            None
        }
    }

    async fn stream_prediction(&self) {
        let baseline = self
            .tracker
            .lock()
            .await
            .session()
            .inference_baseline()
            .clone();
        let current = observe(self.observer.as_ref());
        if let Some(request) = speculative_request(&baseline, &current, Utc::now()) {
            self.predict(PredictionStage::Streaming, request).await;
        }
    }

    fn spawn_prediction(&self, stage: PredictionStage, request: InferenceRequest) {
        let shared = self.clone();
        tokio::spawn(async move {
            shared.predict(stage, request).await;
        });
    }

    async fn predict(&self, stage: PredictionStage, request: InferenceRequest) {
        let engine = self.engine.clone();
        let timestamp = request.timestamp;
        match tokio::task::spawn_blocking(move || engine.predict(&request)).await {
            Ok(Some(prediction)) => self.publish(TrackerEvent::Prediction {
                stage,
                prediction,
                timestamp,
            }),
            Ok(None) => log_debug!("engine returned no {:?} prediction", stage),
            Err(err) => log_error!("inference worker failed: {err}"),
        }
    }
}

fn session_started(tracker: &BaselineTracker) -> TrackerEvent {
    let session = tracker.session();
    TrackerEvent::SessionStarted {
        session_id: session.id(),
        container_id: session.container_id().map(str::to_string),
        record_type: session.record_type().map(str::to_string),
    }
}

async fn grace_timer(shared: Shared, commit_id: Uuid, delay: Duration, token: CancellationToken) {
    tokio::select! {
        _ = time::sleep(delay) => {
            shared.finalize(commit_id, FinalizeTrigger::GraceElapsed).await;
        }
        _ = token.cancelled() => {}
    }
}

async fn watchdog(shared: Shared, commit_id: Uuid, timeout: Duration) {
    time::sleep(timeout).await;
    shared.release_stuck_commit(commit_id).await;
}

/// Drives one tracker against one observer. Cloning shares the same tracker.
#[derive(Clone)]
pub struct RecordController {
    shared: Shared,
    settings: TrackerSettings,
    emitter: StreamingEmitter,
    observation: Arc<Mutex<Option<ObservationTask>>>,
}

impl RecordController {
    pub fn new(
        settings: TrackerSettings,
        observer: Arc<dyn FieldObserver>,
        engine: Arc<dyn InferenceEngine>,
    ) -> (Self, mpsc::UnboundedReceiver<TrackerEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let controller = Self {
            shared: Shared {
                tracker: Arc::new(Mutex::new(BaselineTracker::new(settings.clone()))),
                observer,
                engine,
                events,
                commit_timers: Arc::new(Mutex::new(None)),
            },
            emitter: StreamingEmitter::new(settings.stream_debounce()),
            settings,
            observation: Arc::new(Mutex::new(None)),
        };
        (controller, rx)
    }

    pub fn settings(&self) -> &TrackerSettings {
        &self.settings
    }

    pub fn streaming(&self) -> &StreamingEmitter {
        &self.emitter
    }

    pub async fn status(&self) -> TrackerStatus {
        let tracker = self.shared.tracker.lock().await;
        let session = tracker.session();
        TrackerStatus {
            session_id: session.id(),
            container_id: session.container_id().map(str::to_string),
            record_type: session.record_type().map(str::to_string),
            frozen: session.is_frozen(),
            authoritative_baseline: session.authoritative_baseline().clone(),
            inference_baseline: session.inference_baseline().clone(),
            modified_fields: session.modified_fields().iter().cloned().collect(),
            save_in_progress: session.save_in_progress(),
            commit_phase: tracker.commits().phase(),
            reset_pending: tracker.reset_pending(),
        }
    }

    /// Spawns the background observation loop.
    pub async fn start(&self) -> Result<()> {
        let mut guard = self.observation.lock().await;
        if guard.is_some() {
            bail!("observation already running");
        }

        let cancel_token = CancellationToken::new();
        let handle = tokio::spawn(observation_loop(
            self.shared.clone(),
            self.settings.poll_interval(),
            self.settings.enrich_interval(),
            cancel_token.clone(),
        ));
        *guard = Some(ObservationTask {
            handle,
            cancel_token,
        });
        log_info!(
            "observation started (poll {:?}, enrich {:?})",
            self.settings.poll_interval(),
            self.settings.enrich_interval()
        );
        Ok(())
    }

    /// Stops the observation loop and drops any pending streaming emission.
    /// A pending commit is left to its own timers; call [`Self::page_unload`]
    /// first to flush it.
    pub async fn shutdown(&self) -> Result<()> {
        self.emitter.cancel().await;
        let task = self.observation.lock().await.take();
        if let Some(task) = task {
            task.cancel_token.cancel();
            task.handle
                .await
                .context("observation loop task failed to join")?;
        }
        Ok(())
    }

    pub async fn poll_once(&self) -> Option<FreezeProgress> {
        self.shared.poll_once().await
    }

    pub async fn enrich_once(&self) -> usize {
        self.shared.enrich_once().await
    }

    /// First-edit signal for `key`. `original` is the pre-edit value when the
    /// UI can report it; otherwise the enriched or live value is locked.
    pub async fn field_touched(&self, key: &str, original: Option<RawValue>) -> bool {
        let live = observe_field(self.shared.observer.as_ref(), key);
        let original = original.as_ref().map(normalize_value);
        let locked = self.shared.tracker.lock().await.touch(key, original, live);
        self.field_changed().await;
        locked
    }

    /// Any mutation of the form. Only feeds the streaming emitter.
    pub async fn field_changed(&self) {
        let shared = self.shared.clone();
        self.emitter
            .notify(move || async move { shared.stream_prediction().await })
            .await;
    }

    /// Save-intent: captures the candidate `after` snapshot now, then arms the
    /// grace timer and watchdog. Returns the commit id, or `None` if ignored.
    pub async fn save_intent(&self) -> Option<Uuid> {
        let container = self.shared.observer.container();
        let candidate = observe(self.shared.observer.as_ref());

        // Held across begin so a racing finalize cannot miss the timers.
        let mut timers = self.shared.commit_timers.lock().await;
        let begun = {
            let mut tracker = self.shared.tracker.lock().await;
            self.shared.sync_container(&mut tracker, container.as_ref());
            tracker.begin_commit(candidate, Utc::now())
        };

        let commit_id = match begun {
            Ok(commit_id) => commit_id,
            Err(SaveIgnored::CommitInFlight) => {
                log_debug!("save-intent ignored: commit already in flight");
                return None;
            }
            Err(SaveIgnored::TrivialContent) => {
                log_debug!("save-intent ignored: form is blank");
                return None;
            }
        };

        let grace_token = CancellationToken::new();
        tokio::spawn(grace_timer(
            self.shared.clone(),
            commit_id,
            self.settings.grace_delay(),
            grace_token.clone(),
        ));
        let watchdog = tokio::spawn(watchdog(
            self.shared.clone(),
            commit_id,
            self.settings.watchdog_timeout(),
        ));

        if let Some(stale) = timers.replace(CommitTimers {
            commit_id,
            grace_token,
            watchdog,
        }) {
            log_warn!("replacing timers of commit {}", stale.commit_id);
            stale.grace_token.cancel();
            stale.watchdog.abort();
        }
        log_debug!("commit {} captured; finalizing in {:?}", commit_id, self.settings.grace_delay());
        Some(commit_id)
    }

    /// Page teardown: finalizes any pending commit immediately.
    pub async fn page_unload(&self) -> Option<CommitOutcome> {
        self.emitter.cancel().await;
        let commit_id = self
            .shared
            .tracker
            .lock()
            .await
            .commits()
            .pending()
            .map(|commit| commit.id)?;

        if let Some(timers) = self.shared.commit_timers.lock().await.as_ref() {
            if timers.commit_id == commit_id {
                timers.grace_token.cancel();
            }
        }
        self.shared.finalize(commit_id, FinalizeTrigger::Unload).await
    }

    /// Route change within the same container.
    pub async fn reset(&self) -> ResetOutcome {
        self.emitter.cancel().await;
        let mut tracker = self.shared.tracker.lock().await;
        let outcome = tracker.reset();
        if outcome == ResetOutcome::Applied {
            self.shared.publish_session_started(&tracker);
        }
        outcome
    }
}
