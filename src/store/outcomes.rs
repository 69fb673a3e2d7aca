use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::params;
use serde::Serialize;
use uuid::Uuid;

use crate::commit::SuppressReason;

use super::SampleStore;

/// How a commit ended, as recorded next to the samples table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutcomeKind {
    Emitted,
    Suppressed(SuppressReason),
}

impl OutcomeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutcomeKind::Emitted => "emitted",
            OutcomeKind::Suppressed(reason) => reason.as_str(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutcomeCount {
    pub outcome: String,
    pub count: i64,
}

impl SampleStore {
    pub async fn record_outcome(
        &self,
        commit_id: Uuid,
        record_type: Option<String>,
        outcome: OutcomeKind,
    ) -> Result<()> {
        self.execute(move |conn| {
            conn.execute(
                "INSERT INTO commit_outcomes (commit_id, record_type, outcome, recorded_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    commit_id.to_string(),
                    record_type,
                    outcome.as_str(),
                    Utc::now().to_rfc3339(),
                ],
            )
            .with_context(|| format!("failed to record outcome for commit {commit_id}"))?;
            Ok(())
        })
        .await
    }

    /// Totals per outcome, most frequent first.
    pub async fn outcome_counts(&self) -> Result<Vec<OutcomeCount>> {
        self.execute(|conn| {
            let mut stmt = conn.prepare(
                "SELECT outcome, COUNT(*) FROM commit_outcomes
                 GROUP BY outcome
                 ORDER BY COUNT(*) DESC, outcome ASC",
            )?;
            let mut rows = stmt.query([])?;
            let mut counts = Vec::new();
            while let Some(row) = rows.next()? {
                counts.push(OutcomeCount {
                    outcome: row.get(0)?,
                    count: row.get(1)?,
                });
            }
            Ok(counts)
        })
        .await
    }
}
