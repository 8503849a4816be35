use chrono::{DateTime, SecondsFormat};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ManifestStatus {
    Success,
    Failed,
}

impl ManifestStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ManifestStatus::Success => "success",
            ManifestStatus::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestFile {
    pub name: String,
    pub size: u64,
    pub sha256: String,
}

/// Record of one database backup attempt.
///
/// A successful manifest lists the archive and carries no error; a failed
/// one carries an error and never lists an archive. The constructors are the
/// only way the pipeline builds one, so the pairing holds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunManifest {
    pub run_id: String,
    pub database_identifier: String,
    pub started_at: String,
    pub finished_at: String,
    pub duration_ms: i64,
    pub status: ManifestStatus,
    pub files: Vec<ManifestFile>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pg_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_size_bytes: Option<i64>,
}

pub fn rfc3339(at: &DateTime<Tz>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

pub fn duration_ms(started: &DateTime<Tz>, finished: &DateTime<Tz>) -> i64 {
    (*finished - *started).num_milliseconds().max(0)
}

impl RunManifest {
    pub fn success(
        run_id: &str,
        identifier: &str,
        started: &DateTime<Tz>,
        finished: &DateTime<Tz>,
        archive: ManifestFile,
    ) -> Self {
        Self {
            run_id: run_id.to_string(),
            database_identifier: identifier.to_string(),
            started_at: rfc3339(started),
            finished_at: rfc3339(finished),
            duration_ms: duration_ms(started, finished),
            status: ManifestStatus::Success,
            files: vec![archive],
            error: None,
            pg_version: None,
            database_size_bytes: None,
        }
    }

    pub fn failed(
        run_id: &str,
        identifier: &str,
        started: &DateTime<Tz>,
        finished: &DateTime<Tz>,
        error: impl Into<String>,
    ) -> Self {
        let mut error = error.into();
        if error.trim().is_empty() {
            error = "unknown error".to_string();
        }
        Self {
            run_id: run_id.to_string(),
            database_identifier: identifier.to_string(),
            started_at: rfc3339(started),
            finished_at: rfc3339(finished),
            duration_ms: duration_ms(started, finished),
            status: ManifestStatus::Failed,
            files: Vec::new(),
            error: Some(error),
            pg_version: None,
            database_size_bytes: None,
        }
    }

    /// Turn a success into a failure after the fact (promotion errors).
    pub fn into_failed(mut self, error: impl Into<String>) -> Self {
        self.status = ManifestStatus::Failed;
        self.files.clear();
        self.error = Some(error.into());
        self
    }

    pub fn is_success(&self) -> bool {
        self.status == ManifestStatus::Success
    }

    pub fn archive_name(&self) -> String {
        archive_file_name(&self.run_id)
    }

    pub fn file_name(&self) -> String {
        manifest_file_name(&self.run_id)
    }
}

/// `<identifier>-<YYYY-MM-DD>-<HHMMSS>`
pub fn backup_run_id(identifier: &str, date_key: &str, at: &DateTime<Tz>) -> String {
    format!("{}-{}-{}", identifier, date_key, at.format("%H%M%S"))
}

pub fn archive_file_name(run_id: &str) -> String {
    format!("backup-{}.tar.gz", run_id)
}

pub fn manifest_file_name(run_id: &str) -> String {
    format!("manifest-{}.json", run_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::clock::{Clock, FixedClock};

    fn archive() -> ManifestFile {
        ManifestFile {
            name: archive_file_name("acme-2026-03-07-003000"),
            size: 42,
            sha256: "ab".repeat(32),
        }
    }

    #[test]
    fn success_manifest_lists_archive_and_omits_error() {
        let clock = FixedClock::at("2026-03-07T00:30:00Z");
        let started = clock.now();
        clock.advance(chrono::Duration::milliseconds(1500));
        let manifest = RunManifest::success("acme-2026-03-07-003000", "acme", &started, &clock.now(), archive());

        assert!(manifest.is_success());
        assert_eq!(manifest.duration_ms, 1500);
        let json = serde_json::to_value(&manifest).unwrap();
        assert_eq!(json["status"], "success");
        assert_eq!(json["started_at"], "2026-03-07T00:30:00Z");
        assert!(json.get("error").is_none());
        assert_eq!(json["files"][0]["name"], "backup-acme-2026-03-07-003000.tar.gz");
    }

    #[test]
    fn failed_manifest_always_has_an_error() {
        let clock = FixedClock::at("2026-03-07T00:30:00Z");
        let now = clock.now();
        let manifest = RunManifest::failed("r", "acme", &now, &now, "  ");
        assert_eq!(manifest.error.as_deref(), Some("unknown error"));
        assert!(manifest.files.is_empty());
    }

    #[test]
    fn downgrade_drops_files() {
        let clock = FixedClock::at("2026-03-07T00:30:00Z");
        let now = clock.now();
        let manifest = RunManifest::success("r", "acme", &now, &now, archive())
            .into_failed("promotion failed: disk full");
        assert_eq!(manifest.status, ManifestStatus::Failed);
        assert!(manifest.files.is_empty());
        assert_eq!(manifest.error.as_deref(), Some("promotion failed: disk full"));
    }
}
