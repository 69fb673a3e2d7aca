use std::path::Path;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Row};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::mapper::{MappedMetadata, MappedSample, SampleData};

use super::{
    helpers::{parse_datetime, parse_json, parse_operation, parse_uuid},
    SampleStore,
};

#[derive(Debug, Clone, PartialEq)]
pub struct StoredSample {
    pub id: i64,
    pub commit_id: Uuid,
    pub label: String,
    pub sample: MappedSample,
    pub created_at: DateTime<Utc>,
}

/// On-disk export layout: `{"samples": [...]}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleExport {
    pub samples: Vec<MappedSample>,
}

const SAMPLE_COLUMNS: &str = "id, commit_id, captured_at, operation, vendor, object_type, label,
     before_json, after_json, changes_json, created_at";

fn row_to_sample(row: &Row) -> Result<StoredSample> {
    let commit_id: String = row.get("commit_id")?;
    let captured_at: String = row.get("captured_at")?;
    let operation: String = row.get("operation")?;
    let before: String = row.get("before_json")?;
    let after: String = row.get("after_json")?;
    let changes: String = row.get("changes_json")?;
    let created_at: String = row.get("created_at")?;

    Ok(StoredSample {
        id: row.get("id")?,
        commit_id: parse_uuid(&commit_id, "commit_id")?,
        label: row.get("label")?,
        sample: MappedSample {
            metadata: MappedMetadata {
                timestamp: parse_datetime(&captured_at, "captured_at")?,
                operation: parse_operation(&operation)?,
                vendor: row.get("vendor")?,
                object_type: row.get("object_type")?,
            },
            data: SampleData {
                before: parse_json(&before, "before_json")?,
                after: parse_json(&after, "after_json")?,
            },
            changes: parse_json(&changes, "changes_json")?,
        },
        created_at: parse_datetime(&created_at, "created_at")?,
    })
}

impl SampleStore {
    /// Persists one emitted sample. A commit id is stored at most once.
    pub async fn insert_sample(&self, commit_id: Uuid, sample: &MappedSample) -> Result<i64> {
        let record = sample.clone();
        self.execute(move |conn| {
            let before = serde_json::to_string(&record.data.before)?;
            let after = serde_json::to_string(&record.data.after)?;
            let changes = serde_json::to_string(&record.changes)?;

            conn.execute(
                "INSERT INTO samples (commit_id, captured_at, operation, vendor, object_type, label,
                                      before_json, after_json, changes_json, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    commit_id.to_string(),
                    record.metadata.timestamp.to_rfc3339(),
                    record.metadata.operation.as_str(),
                    record.metadata.vendor,
                    record.metadata.object_type,
                    record.label(),
                    before,
                    after,
                    changes,
                    Utc::now().to_rfc3339(),
                ],
            )
            .with_context(|| format!("failed to insert sample for commit {commit_id}"))?;
            Ok(conn.last_insert_rowid())
        })
        .await
    }

    pub async fn get_sample(&self, commit_id: Uuid) -> Result<Option<StoredSample>> {
        self.execute(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {SAMPLE_COLUMNS} FROM samples WHERE commit_id = ?1"
            ))?;
            let mut rows = stmt.query(params![commit_id.to_string()])?;
            match rows.next()? {
                Some(row) => Ok(Some(row_to_sample(row)?)),
                None => Ok(None),
            }
        })
        .await
    }

    /// Samples in insertion order, optionally restricted to one vendor.
    pub async fn list_samples(&self, vendor: Option<String>) -> Result<Vec<StoredSample>> {
        self.execute(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {SAMPLE_COLUMNS} FROM samples
                 WHERE (?1 IS NULL OR vendor = ?1)
                 ORDER BY id ASC"
            ))?;
            let mut rows = stmt.query(params![vendor])?;
            let mut samples = Vec::new();
            while let Some(row) = rows.next()? {
                samples.push(row_to_sample(row)?);
            }
            Ok(samples)
        })
        .await
    }

    pub async fn count_samples(&self) -> Result<i64> {
        self.execute(|conn| {
            conn.query_row("SELECT COUNT(*) FROM samples", [], |row| row.get(0))
                .map_err(|err| anyhow!("failed to count samples: {err}"))
        })
        .await
    }

    /// Writes every stored sample to `path` as pretty JSON. Returns the count.
    pub async fn export_json(&self, path: &Path) -> Result<usize> {
        let samples = self
            .list_samples(None)
            .await?
            .into_iter()
            .map(|stored| stored.sample)
            .collect::<Vec<_>>();
        let count = samples.len();

        let body = serde_json::to_vec_pretty(&SampleExport { samples })
            .context("failed to serialize sample export")?;
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("failed to create export directory {}", parent.display()))?;
        }
        tokio::fs::write(path, body)
            .await
            .with_context(|| format!("failed to write export {}", path.display()))?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::diff;
    use crate::models::Operation;
    use crate::snapshot;

    fn mapped(object_type: &str, name: &str) -> MappedSample {
        let before = snapshot! { "name" => "old" };
        let after = snapshot! { "name" => name, "enabled" => true };
        MappedSample {
            metadata: MappedMetadata {
                timestamp: Utc::now(),
                operation: Operation::Edit,
                vendor: "fortigate".into(),
                object_type: Some(object_type.into()),
            },
            changes: diff(&before, &after),
            data: SampleData { before, after },
        }
    }

    #[tokio::test]
    async fn insert_and_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let store = SampleStore::open(dir.path().join("samples.db")).unwrap();

        let commit_id = Uuid::new_v4();
        let sample = mapped("firewall_policy", "new");
        store.insert_sample(commit_id, &sample).await.unwrap();

        let stored = store.get_sample(commit_id).await.unwrap().unwrap();
        assert_eq!(stored.label, "FIREWALL_POLICY EDIT");
        assert_eq!(stored.sample.data, sample.data);
        assert_eq!(stored.sample.changes, sample.changes);
        assert!(store.get_sample(Uuid::new_v4()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn duplicate_commit_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = SampleStore::open(dir.path().join("samples.db")).unwrap();
        let commit_id = Uuid::new_v4();

        store.insert_sample(commit_id, &mapped("address", "a")).await.unwrap();
        assert!(store.insert_sample(commit_id, &mapped("address", "b")).await.is_err());
        assert_eq!(store.count_samples().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn export_writes_samples_envelope() {
        let dir = tempfile::tempdir().unwrap();
        let store = SampleStore::open(dir.path().join("samples.db")).unwrap();
        store.insert_sample(Uuid::new_v4(), &mapped("address", "a")).await.unwrap();
        store.insert_sample(Uuid::new_v4(), &mapped("address", "b")).await.unwrap();

        let out = dir.path().join("export").join("samples.json");
        assert_eq!(store.export_json(&out).await.unwrap(), 2);

        let value: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&out).unwrap()).unwrap();
        let samples = value["samples"].as_array().unwrap();
        assert_eq!(samples.len(), 2);
        assert_eq!(samples[0]["metadata"]["operation"], "EDIT");
        assert_eq!(samples[1]["data"]["after"]["name"], "b");
        assert_eq!(samples[0]["changes"][0]["op"], "add");
    }

    #[tokio::test]
    async fn list_filters_by_vendor() {
        let dir = tempfile::tempdir().unwrap();
        let store = SampleStore::open(dir.path().join("samples.db")).unwrap();
        store.insert_sample(Uuid::new_v4(), &mapped("address", "a")).await.unwrap();

        assert_eq!(store.list_samples(Some("fortigate".into())).await.unwrap().len(), 1);
        assert!(store.list_samples(Some("paloalto".into())).await.unwrap().is_empty());
    }
}
