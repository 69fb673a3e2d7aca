use std::collections::BTreeMap;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::snapshot::RawValue;

/// One line of a replay script.
///
/// ```text
/// {"op": "render", "container": "dlg-1", "record_type": "address", "fields": {"name": "lan"}}
/// {"op": "set", "key": "name", "value": "lan2"}
/// {"op": "save"}
/// {"op": "wait", "ms": 400}
/// ```
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ScriptStep {
    Render {
        container: String,
        #[serde(default)]
        record_type: Option<String>,
        #[serde(default)]
        fields: BTreeMap<String, RawValue>,
    },
    /// User edit: first-edit signal, then the new value.
    Set {
        key: String,
        value: RawValue,
        #[serde(default)]
        original: Option<RawValue>,
    },
    /// Programmatic fill, e.g. late hydration. No edit signal.
    Hydrate { key: String, value: RawValue },
    Remove { key: String },
    Poll {
        #[serde(default = "default_count")]
        count: u32,
    },
    Enrich,
    Save,
    Wait { ms: u64 },
    Unload,
    Reset,
    Validation { errors: bool },
    Visibility { visible: bool },
    Detach,
}

fn default_count() -> u32 {
    1
}

/// Parses JSON lines. Blank lines and lines starting with `#` are skipped.
pub fn parse_script(contents: &str) -> Result<Vec<ScriptStep>> {
    contents
        .lines()
        .enumerate()
        .filter(|(_, line)| {
            let line = line.trim();
            !line.is_empty() && !line.starts_with('#')
        })
        .map(|(index, line)| {
            serde_json::from_str(line)
                .with_context(|| format!("invalid script step on line {}", index + 1))
        })
        .collect()
}
