//! Consumes controller events: maps emitted samples into the canonical
//! vocabulary, persists them and records every commit outcome.

use std::{collections::BTreeMap, sync::Arc};

use anyhow::Result;
use serde::Serialize;
use tokio::sync::mpsc;

use crate::commit::SuppressReason;
use crate::controller::TrackerEvent;
use crate::diff::infer_operation;
use crate::mapper::{CanonicalMapper, MappedSample, VendorFieldMap};
use crate::store::{OutcomeKind, SampleStore};

const ENABLE_LOGS: bool = true;
const LOG_TARGET: &str = "formtrace::recorder";

use crate::{log_debug, log_error, log_info, log_warn};

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecorderSummary {
    pub emitted: usize,
    pub suppressed: BTreeMap<String, usize>,
    pub predictions: usize,
    pub samples: Vec<MappedSample>,
}

pub struct SampleRecorder {
    vendor: String,
    field_map: Arc<VendorFieldMap>,
    store: Option<SampleStore>,
    summary: RecorderSummary,
}

impl SampleRecorder {
    pub fn new(vendor: impl Into<String>, field_map: Arc<VendorFieldMap>, store: Option<SampleStore>) -> Self {
        Self {
            vendor: vendor.into(),
            field_map,
            store,
            summary: RecorderSummary::default(),
        }
    }

    pub fn summary(&self) -> &RecorderSummary {
        &self.summary
    }

    /// Drains `events` until every sender is gone.
    pub async fn run(mut self, mut events: mpsc::UnboundedReceiver<TrackerEvent>) -> RecorderSummary {
        while let Some(event) = events.recv().await {
            if let Err(err) = self.handle(event).await {
                log_error!("failed to record event: {err:#}");
            }
        }
        self.summary
    }

    pub async fn handle(&mut self, event: TrackerEvent) -> Result<()> {
        match event {
            TrackerEvent::SampleEmitted {
                commit_id,
                record_type,
                sample,
            } => {
                let mapping = record_type
                    .as_deref()
                    .and_then(|object_type| self.field_map.object(&self.vendor, object_type));
                let identity_field = mapping.and_then(|mapping| mapping.identity_field.as_deref());
                if identity_field.is_some() {
                    let inferred = infer_operation(&sample.before, identity_field);
                    if inferred != sample.metadata.operation {
                        log_warn!(
                            "commit {} classified {} but its before-state reads as {}",
                            commit_id,
                            sample.metadata.operation,
                            inferred
                        );
                    }
                }

                let mapped = self.field_map.map_sample(&self.vendor, record_type.as_deref(), &sample);
                log_info!("{} sample with {} change(s)", mapped.label(), mapped.changes.len());
                if let Some(store) = &self.store {
                    store.insert_sample(commit_id, &mapped).await?;
                    store
                        .record_outcome(commit_id, record_type, OutcomeKind::Emitted)
                        .await?;
                }
                self.summary.emitted += 1;
                self.summary.samples.push(mapped);
            }
            TrackerEvent::SampleSuppressed {
                commit_id,
                record_type,
                reason,
            } => {
                self.count_suppressed(reason);
                if let Some(store) = &self.store {
                    store
                        .record_outcome(commit_id, record_type, OutcomeKind::Suppressed(reason))
                        .await?;
                }
            }
            TrackerEvent::StuckCommitReleased { commit_id } => {
                self.count_suppressed(SuppressReason::StuckCommit);
                if let Some(store) = &self.store {
                    store
                        .record_outcome(commit_id, None, OutcomeKind::Suppressed(SuppressReason::StuckCommit))
                        .await?;
                }
            }
            TrackerEvent::Prediction { stage, prediction, .. } => {
                self.summary.predictions += 1;
                log_debug!(
                    "{:?} prediction {} ({:.2})",
                    stage,
                    prediction.label,
                    prediction.confidence
                );
            }
            TrackerEvent::SessionStarted { .. } | TrackerEvent::Frozen { .. } => {}
        }
        Ok(())
    }

    fn count_suppressed(&mut self, reason: SuppressReason) {
        *self
            .summary
            .suppressed
            .entry(reason.as_str().to_string())
            .or_default() += 1;
    }
}
