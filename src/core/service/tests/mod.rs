mod job_runs;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

use crate::core::backup::version::stub::StubProbe;
use crate::core::clock::FixedClock;
use crate::core::config::Config;
use crate::core::container::scripted::ScriptedRunner;
use crate::core::service::BackupService;

pub(super) const DAY: &str = "2026-03-07";

pub(super) struct Fixture {
    pub root: TempDir,
    pub clock: Arc<FixedClock>,
    pub runner: Arc<ScriptedRunner>,
    pub service: Arc<BackupService>,
}

impl Fixture {
    pub fn path(&self) -> &Path {
        self.root.path()
    }

    pub fn dated(&self, identifier: &str, date: &str) -> PathBuf {
        self.path().join(identifier).join(date)
    }

    pub fn file_names(&self, identifier: &str, date: &str) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(self.dated(identifier, date))
            .map(|entries| {
                entries
                    .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
                    .collect()
            })
            .unwrap_or_default();
        names.sort();
        names
    }

    pub fn staging_is_empty(&self) -> bool {
        match std::fs::read_dir(self.path().join(".tmp")) {
            Ok(mut entries) => entries.next().is_none(),
            Err(_) => true,
        }
    }
}

/// Config with one `BACKUP_<ID>` entry per identifier plus any extra vars.
pub(super) fn config(root: &Path, identifiers: &[&str], extra: &[(&str, &str)]) -> Config {
    let mut vars = vec![
        ("LOCAL_BACKUP_DIR".to_string(), root.display().to_string()),
        ("TZ".to_string(), "UTC".to_string()),
    ];
    for id in identifiers {
        vars.push((
            format!("BACKUP_{}", id.to_uppercase()),
            format!("postgresql://backup:pw@db-{}:5432/{}", id, id),
        ));
    }
    vars.extend(extra.iter().map(|(k, v)| (k.to_string(), v.to_string())));
    Config::from_vars(vars)
}

pub(super) fn fixture_with(identifiers: &[&str], extra: &[(&str, &str)], runner: ScriptedRunner) -> Fixture {
    let root = tempfile::tempdir().unwrap();
    let clock = Arc::new(FixedClock::at("2026-03-07T00:30:00Z"));
    let runner = Arc::new(runner);
    let service = BackupService::new(
        &config(root.path(), identifiers, extra),
        runner.clone(),
        Arc::new(StubProbe::version("PostgreSQL 16.4 on x86_64-pc-linux-gnu")),
        clock.clone(),
    );
    Fixture {
        root,
        clock,
        runner,
        service: Arc::new(service),
    }
}

pub(super) fn fixture(identifiers: &[&str], runner: ScriptedRunner) -> Fixture {
    fixture_with(identifiers, &[], runner)
}
