use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use uuid::Uuid;

use crate::models::Operation;

pub fn parse_datetime(value: &str, field: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .with_context(|| format!("failed to parse {field}"))
}

pub fn parse_uuid(value: &str, field: &str) -> Result<Uuid> {
    Uuid::parse_str(value).with_context(|| format!("failed to parse {field}"))
}

pub fn parse_operation(value: &str) -> Result<Operation> {
    match value {
        "CREATE" => Ok(Operation::Create),
        "EDIT" => Ok(Operation::Edit),
        other => Err(anyhow!("unknown operation {other}")),
    }
}

pub fn parse_json<T: DeserializeOwned>(value: &str, field: &str) -> Result<T> {
    serde_json::from_str(value).with_context(|| format!("failed to parse {field}"))
}
