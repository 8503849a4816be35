mod promote;

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::core::backup::{
    backup_run_id, resolve_targets, DatabaseProbe, DatabaseTarget, DumpPipeline, HostPolicy,
    ManifestStatus, RejectedTarget, RunManifest,
};
use crate::core::clock::{date_key, Clock};
use crate::core::config::Config;
use crate::core::container::CommandRunner;
use crate::core::retention;
use crate::core::state::{
    summary_run_id, AcquireError, DatabaseResult, RunStateStore, RunSummary, StateError,
    ALREADY_RUNNING, NO_DATABASES,
};

use promote::promote;

/// Private staging area, kept under the backup root so promotion is a rename.
const STAGING_DIR: &str = ".tmp";

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("project not found: {0}")]
    UnknownTarget(String),

    #[error("project {identifier} is misconfigured: {reason}")]
    InvalidTarget { identifier: String, reason: String },

    #[error("backup job is already running")]
    AlreadyRunning,

    #[error("failed to persist run lock: {0}")]
    LockUnavailable(#[source] StateError),
}

impl From<AcquireError> for ServiceError {
    fn from(err: AcquireError) -> Self {
        match err {
            AcquireError::Busy => ServiceError::AlreadyRunning,
            AcquireError::Persist(source) => ServiceError::LockUnavailable(source),
        }
    }
}

/// Result of a single-database run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetReport {
    pub database_identifier: String,
    pub run_id: String,
    pub status: ManifestStatus,
    pub started_at: String,
    pub finished_at: String,
    pub duration_ms: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<RunManifest> for TargetReport {
    fn from(manifest: RunManifest) -> Self {
        Self {
            database_identifier: manifest.database_identifier,
            run_id: manifest.run_id,
            status: manifest.status,
            started_at: manifest.started_at,
            finished_at: manifest.finished_at,
            duration_ms: manifest.duration_ms,
            error: manifest.error,
        }
    }
}

/// Coordinates backup runs: one at a time, every configured database, then
/// retention and the run summary.
pub struct BackupService {
    root: PathBuf,
    targets: Vec<DatabaseTarget>,
    rejected: Vec<RejectedTarget>,
    pipeline: Arc<DumpPipeline>,
    state: RunStateStore,
    clock: Arc<dyn Clock>,
    retention_days: u32,
    max_concurrent: usize,
}

impl BackupService {
    pub fn new(
        config: &Config,
        runner: Arc<dyn CommandRunner>,
        probe: Arc<dyn DatabaseProbe>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let (targets, rejected) = resolve_targets(&config.databases);
        if targets.is_empty() && rejected.is_empty() {
            warn!("No databases configured. Set variables like BACKUP_PROJECTNAME=postgresql://...");
        } else {
            info!(
                "Configured {} database(s) for backup ({} rejected)",
                targets.len(),
                rejected.len()
            );
        }

        let pipeline = DumpPipeline::new(
            runner,
            probe,
            clock.clone(),
            HostPolicy::new(config.runtime.loopback_alias.clone()),
            config.runtime.image.clone(),
            config.runtime.default_pg_version.clone(),
        );

        Self {
            root: config.backup_dir.clone(),
            targets,
            rejected,
            pipeline: Arc::new(pipeline),
            state: RunStateStore::new(&config.backup_dir),
            clock,
            retention_days: config.retention_days,
            max_concurrent: config.max_concurrent_dumps.max(1),
        }
    }

    pub fn state(&self) -> &RunStateStore {
        &self.state
    }

    pub fn targets(&self) -> &[DatabaseTarget] {
        &self.targets
    }

    pub fn database_names(&self) -> Vec<String> {
        self.targets.iter().map(|t| t.identifier.clone()).collect()
    }

    pub fn has_target(&self, identifier: &str) -> bool {
        self.targets.iter().any(|t| t.identifier == identifier)
    }

    /// Why a configured identifier was rejected, if it was.
    pub fn rejection(&self, identifier: &str) -> Option<&str> {
        self.rejected
            .iter()
            .find(|r| r.identifier == identifier)
            .map(|r| r.reason.as_str())
    }

    pub fn is_running(&self) -> bool {
        self.state.is_running()
    }

    /// Current time in the configured timezone.
    pub fn now(&self) -> chrono::DateTime<chrono_tz::Tz> {
        self.clock.now()
    }

    /// Back up every configured database. Always returns a summary; only a
    /// run that actually took the lock writes `latest.json`. A lock that
    /// cannot be persisted aborts the run with that error.
    pub async fn run_backup_job(&self, cancel: &CancellationToken) -> RunSummary {
        let started = self.clock.now();
        let run_id = summary_run_id(&started);

        let lock = match self.state.try_acquire() {
            Ok(lock) => lock,
            Err(AcquireError::Busy) => {
                warn!("Backup job already running, skipping {}", run_id);
                return RunSummary::aborted(run_id, &started, &self.clock.now(), ALREADY_RUNNING);
            }
            Err(e) => {
                error!("Cannot start backup job {}: {}", run_id, e);
                return RunSummary::aborted(run_id, &started, &self.clock.now(), e.to_string());
            }
        };

        info!("Starting backup job {}", run_id);
        let summary = self.execute_job(run_id, &started, cancel).await;

        if let Err(e) = self.state.write_last_run(&summary) {
            warn!("Failed to write last run: {}", e);
        }
        if let Err(e) = lock.release() {
            warn!("Failed to release run lock: {}", e);
        }

        info!(
            "Backup job {} finished: {} ({} succeeded, {} failed, {} ms)",
            summary.run_id,
            summary.status.as_str(),
            summary.databases_succeeded,
            summary.databases_failed,
            summary.duration_ms
        );
        summary
    }

    async fn execute_job(
        &self,
        run_id: String,
        started: &chrono::DateTime<chrono_tz::Tz>,
        cancel: &CancellationToken,
    ) -> RunSummary {
        if self.targets.is_empty() && self.rejected.is_empty() {
            return RunSummary::aborted(run_id, started, &self.clock.now(), NO_DATABASES);
        }

        let today = self.clock.today();
        let date = date_key(today);

        let mut backups = self.backup_targets(&date, cancel).await;
        backups.extend(self.rejected.iter().map(DatabaseResult::rejected));
        backups.sort_by(|a, b| a.database_identifier.cmp(&b.database_identifier));

        let mut cleanup = BTreeMap::new();
        for target in &self.targets {
            let removed = match retention::sweep(&self.root, &target.identifier, self.retention_days, today) {
                Ok(removed) => removed,
                Err(e) => {
                    warn!("Retention cleanup failed for {}: {}", target.identifier, e);
                    e.removed()
                }
            };
            cleanup.insert(target.identifier.clone(), removed);
        }

        RunSummary::completed(run_id, started, &self.clock.now(), backups, cleanup)
    }

    /// Fan targets out over a bounded pool. A task that panics becomes a
    /// failed result and does not disturb its siblings.
    async fn backup_targets(&self, date: &str, cancel: &CancellationToken) -> Vec<DatabaseResult> {
        let permits = Arc::new(Semaphore::new(self.max_concurrent));
        let mut tasks = JoinSet::new();
        let mut identifiers = HashMap::new();

        for target in &self.targets {
            let job = TargetJob {
                pipeline: self.pipeline.clone(),
                clock: self.clock.clone(),
                root: self.root.clone(),
                date: date.to_string(),
                target: target.clone(),
            };
            let permits = permits.clone();
            let cancel = cancel.clone();
            let handle = tasks.spawn(async move {
                let _permit = permits.acquire_owned().await;
                job.run(&cancel).await
            });
            identifiers.insert(handle.id(), target.identifier.clone());
        }

        let mut results = Vec::with_capacity(self.targets.len());
        while let Some(joined) = tasks.join_next_with_id().await {
            match joined {
                Ok((id, manifest)) => {
                    identifiers.remove(&id);
                    results.push(DatabaseResult::from_manifest(&manifest));
                }
                Err(e) => {
                    let identifier = identifiers.remove(&e.id()).unwrap_or_default();
                    error!("Backup task for {} aborted: {}", identifier, e);
                    results.push(DatabaseResult::failed(&identifier, format!("backup task failed: {}", e)));
                }
            }
        }
        results
    }

    /// Back up one database under the same run lock. Does not sweep
    /// retention or touch `latest.json`.
    pub async fn run_single_target(
        &self,
        identifier: &str,
        cancel: &CancellationToken,
    ) -> Result<TargetReport, ServiceError> {
        let Some(target) = self.targets.iter().find(|t| t.identifier == identifier).cloned() else {
            return Err(match self.rejection(identifier) {
                Some(reason) => ServiceError::InvalidTarget {
                    identifier: identifier.to_string(),
                    reason: reason.to_string(),
                },
                None => ServiceError::UnknownTarget(identifier.to_string()),
            });
        };

        let lock = self.state.try_acquire()?;
        let date = date_key(self.clock.today());
        info!("Backing up single database {}", identifier);

        let job = TargetJob {
            pipeline: self.pipeline.clone(),
            clock: self.clock.clone(),
            root: self.root.clone(),
            date: date.clone(),
            target,
        };
        let token = cancel.clone();
        let manifest = match tokio::spawn(async move { job.run(&token).await }).await {
            Ok(manifest) => manifest,
            Err(e) => {
                error!("Backup task for {} aborted: {}", identifier, e);
                let now = self.clock.now();
                RunManifest::failed(
                    &backup_run_id(identifier, &date, &now),
                    identifier,
                    &now,
                    &now,
                    format!("backup task failed: {}", e),
                )
            }
        };

        if let Err(e) = lock.release() {
            warn!("Failed to release run lock: {}", e);
        }
        Ok(TargetReport::from(manifest))
    }
}

/// Everything one worker needs, owned so it can move onto the runtime.
struct TargetJob {
    pipeline: Arc<DumpPipeline>,
    clock: Arc<dyn Clock>,
    root: PathBuf,
    date: String,
    target: DatabaseTarget,
}

impl TargetJob {
    async fn run(self, cancel: &CancellationToken) -> RunManifest {
        let identifier = &self.target.identifier;
        let staging_root = self.root.join(STAGING_DIR);
        let staging = std::fs::create_dir_all(&staging_root).and_then(|_| {
            tempfile::Builder::new()
                .prefix(&format!("backup-{}-{}-", identifier, self.date))
                .tempdir_in(&staging_root)
        });
        let staging = match staging {
            Ok(dir) => dir,
            Err(e) => {
                error!("Failed to create staging directory for {}: {}", identifier, e);
                let now = self.clock.now();
                return RunManifest::failed(
                    &backup_run_id(identifier, &self.date, &now),
                    identifier,
                    &now,
                    &now,
                    format!("failed to create staging directory: {}", e),
                );
            }
        };

        let manifest = self
            .pipeline
            .create_backup(&self.target, staging.path(), &self.date, cancel)
            .await;

        let manifest = if manifest.is_success() {
            match promote(&self.root, &self.date, staging.path(), &manifest) {
                Ok(()) => {
                    info!("Stored {} under {}/{}", manifest.archive_name(), identifier, self.date);
                    manifest
                }
                Err(e) => {
                    error!("Failed to promote backup of {}: {}", identifier, e);
                    manifest.into_failed(format!("promotion failed: {}", e))
                }
            }
        } else {
            manifest
        };

        if let Err(e) = staging.close() {
            warn!("Failed to remove staging directory for {}: {}", identifier, e);
        }
        manifest
    }
}

#[cfg(test)]
mod tests;
