//! Scripted replay: drives a [`RecordController`] from a JSONL script against an
//! in-memory form, the way a UI binding would drive it from DOM events.

pub mod observer;
pub mod script;

use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};

use crate::controller::RecordController;
use crate::inference::{InferenceEngine, NoopEngine};
use crate::mapper::VendorFieldMap;
use crate::observer::ContainerInfo;
use crate::recorder::{RecorderSummary, SampleRecorder};
use crate::settings::TrackerSettings;
use crate::store::SampleStore;

pub use observer::ScriptedObserver;
pub use script::{parse_script, ScriptStep};

const ENABLE_LOGS: bool = true;
const LOG_TARGET: &str = "formtrace::replay";

use crate::{log_debug, log_info};

pub struct ReplayOptions {
    pub settings: TrackerSettings,
    pub field_map: Arc<VendorFieldMap>,
    pub store: Option<SampleStore>,
    pub engine: Arc<dyn InferenceEngine>,
    /// Run the background observation loop instead of relying on explicit
    /// `poll`/`enrich` steps.
    pub live: bool,
}

impl Default for ReplayOptions {
    fn default() -> Self {
        Self {
            settings: TrackerSettings::default(),
            field_map: Arc::new(VendorFieldMap::default()),
            store: None,
            engine: Arc::new(NoopEngine),
            live: false,
        }
    }
}

/// Runs `steps` to completion. The end of the script is treated as a page
/// unload, so a commit still inside its grace delay is flushed.
pub async fn run_script(steps: &[ScriptStep], options: ReplayOptions) -> Result<RecorderSummary> {
    let observer = Arc::new(ScriptedObserver::new());
    let (controller, events) =
        RecordController::new(options.settings.clone(), observer.clone(), options.engine);
    let recorder = SampleRecorder::new(
        options.settings.vendor.clone(),
        options.field_map,
        options.store,
    );
    let recording = tokio::spawn(recorder.run(events));

    if options.live {
        controller.start().await?;
    }

    for (index, step) in steps.iter().enumerate() {
        log_debug!("step {}: {:?}", index + 1, step);
        apply_step(&controller, &observer, step).await;
    }

    controller.page_unload().await;
    controller.shutdown().await?;
    drop(controller);

    let summary = recording.await.context("recorder task failed to join")?;
    log_info!(
        "replay finished: {} emitted, {} suppressed",
        summary.emitted,
        summary.suppressed.values().sum::<usize>()
    );
    Ok(summary)
}

async fn apply_step(controller: &RecordController, observer: &ScriptedObserver, step: &ScriptStep) {
    match step {
        ScriptStep::Render {
            container,
            record_type,
            fields,
        } => observer.render(
            ContainerInfo {
                id: container.clone(),
                record_type: record_type.clone(),
                visible: true,
                validation_errors: false,
            },
            fields.clone(),
        ),
        ScriptStep::Set {
            key,
            value,
            original,
        } => {
            controller.field_touched(key, original.clone()).await;
            observer.set_field(key, value.clone());
            controller.field_changed().await;
        }
        ScriptStep::Hydrate { key, value } => {
            observer.set_field(key, value.clone());
            controller.field_changed().await;
        }
        ScriptStep::Remove { key } => {
            observer.remove_field(key);
            controller.field_changed().await;
        }
        ScriptStep::Poll { count } => {
            for _ in 0..*count {
                controller.poll_once().await;
            }
        }
        ScriptStep::Enrich => {
            controller.enrich_once().await;
        }
        ScriptStep::Save => {
            controller.save_intent().await;
        }
        ScriptStep::Wait { ms } => tokio::time::sleep(Duration::from_millis(*ms)).await,
        ScriptStep::Unload => {
            controller.page_unload().await;
        }
        ScriptStep::Reset => {
            controller.reset().await;
        }
        ScriptStep::Validation { errors } => observer.set_validation_errors(*errors),
        ScriptStep::Visibility { visible } => observer.set_visible(*visible),
        ScriptStep::Detach => observer.detach(),
    }
}
