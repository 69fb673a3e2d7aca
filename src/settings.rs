use std::{collections::HashMap, fs, path::PathBuf, sync::RwLock, time::Duration};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

const ENABLE_LOGS: bool = true;
const LOG_TARGET: &str = "formtrace::settings";

use crate::log_warn;

/// Minimum headroom the watchdog keeps over the grace delay.
const WATCHDOG_MARGIN_MS: u64 = 1_000;

/// Tunable timings and identity rules for the tracker.
///
/// The stability threshold and grace delay were picked empirically; nothing
/// downstream depends on their exact values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerSettings {
    pub vendor: String,
    pub poll_interval_ms: u64,
    pub enrich_interval_ms: u64,
    pub stability_threshold: u32,
    pub grace_delay_ms: u64,
    pub stream_debounce_ms: u64,
    pub watchdog_timeout_ms: u64,
    /// Consulted only when the record type has no explicit identity field.
    pub generic_identity_keys: Vec<String>,
    /// Record type -> explicit identity field.
    pub identity_fields: HashMap<String, String>,
}

impl Default for TrackerSettings {
    fn default() -> Self {
        Self {
            vendor: "fortigate".into(),
            poll_interval_ms: 500,
            enrich_interval_ms: 250,
            stability_threshold: 2,
            grace_delay_ms: 300,
            stream_debounce_ms: 400,
            watchdog_timeout_ms: 5_000,
            generic_identity_keys: ["id", "mkey", "policyid", "uuid", "q_origin_key"]
                .into_iter()
                .map(String::from)
                .collect(),
            identity_fields: HashMap::new(),
        }
    }
}

impl TrackerSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn enrich_interval(&self) -> Duration {
        Duration::from_millis(self.enrich_interval_ms.max(1))
    }

    pub fn grace_delay(&self) -> Duration {
        Duration::from_millis(self.grace_delay_ms)
    }

    pub fn stream_debounce(&self) -> Duration {
        Duration::from_millis(self.stream_debounce_ms)
    }

    /// Never fires before the grace timer has had its chance to finalize.
    pub fn watchdog_timeout(&self) -> Duration {
        Duration::from_millis(
            self.watchdog_timeout_ms
                .max(self.grace_delay_ms.saturating_add(WATCHDOG_MARGIN_MS)),
        )
    }

    fn watchdog_clamped(&self) -> bool {
        self.watchdog_timeout().as_millis() != u128::from(self.watchdog_timeout_ms)
    }

    /// Adds identity fields from another source without overriding ones
    /// already configured here.
    pub fn merge_identity_fields<I>(&mut self, fields: I)
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (record_type, field) in fields {
            self.identity_fields.entry(record_type).or_insert(field);
        }
    }
}

/// JSON-file backed settings, read once at startup and written on update.
pub struct SettingsStore {
    path: PathBuf,
    data: RwLock<TrackerSettings>,
}

impl SettingsStore {
    pub fn new(path: PathBuf) -> Result<Self> {
        let data = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read settings from {}", path.display()))?;
            match serde_json::from_str(&contents) {
                Ok(settings) => settings,
                Err(err) => {
                    log_warn!(
                        "Ignoring malformed settings at {} ({err}); using defaults",
                        path.display()
                    );
                    TrackerSettings::default()
                }
            }
        } else {
            TrackerSettings::default()
        };

        if data.watchdog_clamped() {
            log_warn!(
                "watchdog_timeout_ms {} does not leave room for grace_delay_ms {}; using {:?}",
                data.watchdog_timeout_ms,
                data.grace_delay_ms,
                data.watchdog_timeout()
            );
        }

        Ok(Self {
            path,
            data: RwLock::new(data),
        })
    }

    pub fn tracker(&self) -> TrackerSettings {
        match self.data.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn update_tracker(&self, settings: TrackerSettings) -> Result<()> {
        let mut guard = match self.data.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = settings;
        self.persist(&guard)
    }

    fn persist(&self, data: &TrackerSettings) -> Result<()> {
        let serialized = serde_json::to_string_pretty(data)?;
        fs::write(&self.path, serialized)
            .with_context(|| format!("Failed to write settings to {}", self.path.display()))
    }
}
