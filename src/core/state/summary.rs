use chrono::DateTime;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::core::backup::{duration_ms, rfc3339, ManifestStatus, RejectedTarget, RunManifest};

pub const ALREADY_RUNNING: &str = "already_running";
pub const NO_DATABASES: &str = "no databases configured";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Success,
    Partial,
    Failed,
}

impl RunStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Success => "success",
            RunStatus::Partial => "partial",
            RunStatus::Failed => "failed",
        }
    }

    pub fn from_counts(succeeded: usize, failed: usize) -> Self {
        if succeeded == 0 {
            RunStatus::Failed
        } else if failed == 0 {
            RunStatus::Success
        } else {
            RunStatus::Partial
        }
    }
}

/// One database's line in a run summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseResult {
    pub database_identifier: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    pub status: ManifestStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DatabaseResult {
    pub fn from_manifest(manifest: &RunManifest) -> Self {
        Self {
            database_identifier: manifest.database_identifier.clone(),
            run_id: Some(manifest.run_id.clone()),
            status: manifest.status,
            error: manifest.error.clone(),
        }
    }

    pub fn failed(identifier: &str, error: impl Into<String>) -> Self {
        Self {
            database_identifier: identifier.to_string(),
            run_id: None,
            status: ManifestStatus::Failed,
            error: Some(error.into()),
        }
    }

    pub fn rejected(target: &RejectedTarget) -> Self {
        Self::failed(&target.identifier, target.reason.clone())
    }
}

/// Outcome of one orchestrator run; the sole content of `latest.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: String,
    pub started_at: String,
    pub finished_at: String,
    pub duration_ms: i64,
    pub status: RunStatus,
    #[serde(default)]
    pub backups: Vec<DatabaseResult>,
    #[serde(default)]
    pub retention_cleanup: BTreeMap<String, usize>,
    #[serde(default)]
    pub databases_total: usize,
    #[serde(default)]
    pub databases_succeeded: usize,
    #[serde(default)]
    pub databases_failed: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// `run-YYYYMMDD-HHMMSS`
pub fn summary_run_id(at: &DateTime<Tz>) -> String {
    format!("run-{}", at.format("%Y%m%d-%H%M%S"))
}

impl RunSummary {
    pub fn completed(
        run_id: String,
        started: &DateTime<Tz>,
        finished: &DateTime<Tz>,
        backups: Vec<DatabaseResult>,
        retention_cleanup: BTreeMap<String, usize>,
    ) -> Self {
        let succeeded = backups
            .iter()
            .filter(|b| b.status == ManifestStatus::Success)
            .count();
        let failed = backups.len() - succeeded;
        Self {
            run_id,
            started_at: rfc3339(started),
            finished_at: rfc3339(finished),
            duration_ms: duration_ms(started, finished),
            status: RunStatus::from_counts(succeeded, failed),
            databases_total: backups.len(),
            databases_succeeded: succeeded,
            databases_failed: failed,
            backups,
            retention_cleanup: retention_cleanup.into_iter().filter(|(_, n)| *n > 0).collect(),
            error: None,
        }
    }

    /// A run that never reached any database.
    pub fn aborted(
        run_id: String,
        started: &DateTime<Tz>,
        finished: &DateTime<Tz>,
        error: impl Into<String>,
    ) -> Self {
        Self {
            run_id,
            started_at: rfc3339(started),
            finished_at: rfc3339(finished),
            duration_ms: duration_ms(started, finished),
            status: RunStatus::Failed,
            backups: Vec::new(),
            retention_cleanup: BTreeMap::new(),
            databases_total: 0,
            databases_succeeded: 0,
            databases_failed: 0,
            error: Some(error.into()),
        }
    }

    pub fn is_already_running(&self) -> bool {
        self.error.as_deref() == Some(ALREADY_RUNNING)
    }
}
