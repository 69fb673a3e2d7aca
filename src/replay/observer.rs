use std::{
    collections::BTreeMap,
    sync::{Mutex, MutexGuard},
};

use anyhow::Result;

use crate::observer::{ContainerInfo, FieldObserver};
use crate::snapshot::{RawField, RawValue};

#[derive(Debug, Default)]
struct ScriptedForm {
    container: Option<ContainerInfo>,
    fields: BTreeMap<String, RawValue>,
}

/// In-memory form driven by a replay script instead of a live UI.
#[derive(Debug, Default)]
pub struct ScriptedObserver {
    form: Mutex<ScriptedForm>,
}

impl ScriptedObserver {
    pub fn new() -> Self {
        Self::default()
    }

    fn form(&self) -> MutexGuard<'_, ScriptedForm> {
        match self.form.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Replaces the container and its fields, as when a dialog opens.
    pub fn render(&self, container: ContainerInfo, fields: BTreeMap<String, RawValue>) {
        let mut form = self.form();
        form.container = Some(container);
        form.fields = fields;
    }

    pub fn set_field(&self, key: &str, value: RawValue) {
        self.form().fields.insert(key.to_string(), value);
    }

    pub fn remove_field(&self, key: &str) {
        self.form().fields.remove(key);
    }

    pub fn set_validation_errors(&self, errors: bool) {
        if let Some(container) = self.form().container.as_mut() {
            container.validation_errors = errors;
        }
    }

    pub fn set_visible(&self, visible: bool) {
        if let Some(container) = self.form().container.as_mut() {
            container.visible = visible;
        }
    }

    /// Container closes; fields go with it.
    pub fn detach(&self) {
        let mut form = self.form();
        form.container = None;
        form.fields.clear();
    }
}

impl FieldObserver for ScriptedObserver {
    fn container(&self) -> Option<ContainerInfo> {
        self.form().container.clone()
    }

    fn read_fields(&self) -> Vec<Result<RawField>> {
        self.form()
            .fields
            .iter()
            .map(|(key, value)| Ok(RawField::new(key.clone(), value.clone())))
            .collect()
    }

    fn read_field(&self, key: &str) -> Option<RawValue> {
        self.form().fields.get(key).cloned()
    }
}
