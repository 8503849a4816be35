use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::archive::{create_archive, describe_file};
use super::host::HostPolicy;
use super::manifest::{archive_file_name, backup_run_id, manifest_file_name, RunManifest};
use super::phases::DumpPhase;
use super::target::DatabaseTarget;
use super::version::DatabaseProbe;
use crate::core::clock::Clock;
use crate::core::container::CommandRunner;
use crate::core::state::write_atomic;

/// Produces one database's archive and manifest inside a staging directory.
pub struct DumpPipeline {
    runner: Arc<dyn CommandRunner>,
    probe: Arc<dyn DatabaseProbe>,
    clock: Arc<dyn Clock>,
    hosts: HostPolicy,
    image_repository: String,
    default_major: String,
}

struct ServerFacts {
    major: String,
    label: Option<String>,
    size_bytes: Option<i64>,
}

impl DumpPipeline {
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        probe: Arc<dyn DatabaseProbe>,
        clock: Arc<dyn Clock>,
        hosts: HostPolicy,
        image_repository: impl Into<String>,
        default_major: impl Into<String>,
    ) -> Self {
        Self {
            runner,
            probe,
            clock,
            hosts,
            image_repository: image_repository.into(),
            default_major: default_major.into(),
        }
    }

    /// Run every phase for `target`. Never fails: errors come back as a failed manifest.
    ///
    /// On success `staging_dir` holds `backup-<run-id>.tar.gz` and
    /// `manifest-<run-id>.json`; on failure it holds neither.
    pub async fn create_backup(
        &self,
        target: &DatabaseTarget,
        staging_dir: &Path,
        date_key: &str,
        cancel: &CancellationToken,
    ) -> RunManifest {
        let started = self.clock.now();
        let run_id = backup_run_id(&target.identifier, date_key, &started);
        info!("Starting backup of {} ({})", target.identifier, run_id);

        let facts = self.server_facts(target, cancel).await;
        let image = format!("{}:{}", self.image_repository, facts.major);

        let scratch = staging_dir.join(&run_id);
        let archive_path = staging_dir.join(archive_file_name(&run_id));

        let fail = |message: String| {
            error!("Backup of {} failed: {}", target.identifier, message);
            discard(&scratch);
            discard(&archive_path);
            RunManifest::failed(&run_id, &target.identifier, &started, &self.clock.now(), message)
        };

        if let Err(e) = std::fs::create_dir_all(&scratch) {
            return fail(format!("failed to create dump directory: {}", e));
        }

        for phase in DumpPhase::ALL {
            debug!("Running {} dump for {} with {}", phase.as_str(), target.identifier, image);
            let request = phase.request(&image, &target.connection, &self.hosts);
            let output = match self.runner.run(request, cancel).await {
                Ok(output) => output,
                Err(e) => return fail(format!("{} dump failed: {}", phase.as_str(), e)),
            };
            debug!(
                "{} dump for {} exited with {} ({} bytes, stderr: {})",
                phase.as_str(),
                target.identifier,
                output.exit_code,
                output.stdout.len(),
                String::from_utf8_lossy(&output.stderr).trim()
            );
            if let Err(e) = std::fs::write(scratch.join(phase.file_name()), &output.stdout) {
                return fail(format!(
                    "{} dump failed: failed to write output file: {}",
                    phase.as_str(),
                    e
                ));
            }
        }

        let names: Vec<&str> = DumpPhase::ALL.iter().map(|p| p.file_name()).collect();
        let archive = match create_archive(&scratch, &names, &archive_path)
            .and_then(|_| describe_file(&archive_path))
        {
            Ok(described) => described,
            Err(e) => return fail(format!("archive creation failed: {}", e)),
        };
        let archive_size = archive.size;

        let mut manifest =
            RunManifest::success(&run_id, &target.identifier, &started, &self.clock.now(), archive);
        manifest.pg_version = facts.label;
        manifest.database_size_bytes = facts.size_bytes;

        let manifest_path = staging_dir.join(manifest_file_name(&run_id));
        let written = serde_json::to_vec_pretty(&manifest)
            .map_err(std::io::Error::other)
            .and_then(|bytes| write_atomic(&manifest_path, &bytes));
        if let Err(e) = written {
            discard(&manifest_path);
            return fail(format!("manifest write failed: {}", e));
        }

        discard(&scratch);
        info!(
            "Backup of {} completed in {} ms ({} bytes)",
            target.identifier, manifest.duration_ms, archive_size
        );
        manifest
    }

    async fn server_facts(&self, target: &DatabaseTarget, cancel: &CancellationToken) -> ServerFacts {
        match self.probe.probe(&target.connection, cancel).await {
            Ok(info) => {
                let major = info.major().unwrap_or_else(|| {
                    warn!(
                        "Could not parse server version '{}', defaulting to {}",
                        info.version, self.default_major
                    );
                    self.default_major.clone()
                });
                debug!("Detected PostgreSQL {} for {}", major, target.identifier);
                ServerFacts {
                    major,
                    label: info.version_label(),
                    size_bytes: info.database_size_bytes,
                }
            }
            Err(e) => {
                warn!(
                    "Failed to detect PostgreSQL version for {}, defaulting to {}: {}",
                    target.identifier, self.default_major, e
                );
                ServerFacts {
                    major: self.default_major.clone(),
                    label: None,
                    size_bytes: None,
                }
            }
        }
    }
}

fn discard(path: &Path) {
    let result = if path.is_dir() {
        std::fs::remove_dir_all(path)
    } else if path.exists() {
        std::fs::remove_file(path)
    } else {
        return;
    };
    if let Err(e) = result {
        warn!("Failed to clean up {}: {}", path.display(), e);
    }
}
