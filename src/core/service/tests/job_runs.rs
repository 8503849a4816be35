use tokio_util::sync::CancellationToken;

use super::{fixture, fixture_with, DAY};
use crate::core::backup::ManifestStatus;
use crate::core::container::scripted::{ok, phase_of, ScriptedRunner};
use crate::core::state::{RunStatus, ALREADY_RUNNING, NO_DATABASES};

#[tokio::test]
async fn zero_targets_write_a_failed_summary() {
    let fx = fixture(&[], ScriptedRunner::succeeding());

    let summary = fx.service.run_backup_job(&CancellationToken::new()).await;

    assert_eq!(summary.status, RunStatus::Failed);
    assert_eq!(summary.error.as_deref(), Some(NO_DATABASES));
    assert_eq!(summary.databases_total, 0);
    let stored = fx.service.state().read_last_run().unwrap().unwrap();
    assert_eq!(stored, summary);
    assert!(!fx.service.state().read_lock_state().unwrap());
}

#[tokio::test]
async fn all_targets_succeed_and_land_in_dated_directories() {
    let fx = fixture(&["acme", "billing"], ScriptedRunner::succeeding());

    let summary = fx.service.run_backup_job(&CancellationToken::new()).await;

    assert_eq!(summary.status, RunStatus::Success);
    assert_eq!(summary.run_id, "run-20260307-003000");
    assert_eq!(summary.databases_total, 2);
    assert_eq!(summary.databases_succeeded, 2);
    assert!(summary.retention_cleanup.is_empty());
    for id in ["acme", "billing"] {
        assert_eq!(
            fx.file_names(id, DAY),
            vec![
                format!("backup-{}-2026-03-07-003000.tar.gz", id),
                format!("manifest-{}-2026-03-07-003000.json", id),
            ]
        );
    }
    assert!(fx.staging_is_empty());
    assert_eq!(fx.runner.calls().len(), 6);
}

#[tokio::test]
async fn schema_failure_with_a_healthy_sibling_is_partial() {
    let fx = fixture(&["acme", "billing"], ScriptedRunner::failing_phase("schema", "billing"));

    let summary = fx.service.run_backup_job(&CancellationToken::new()).await;

    assert_eq!(summary.status, RunStatus::Partial);
    let billing = &summary.backups[1];
    assert_eq!(billing.database_identifier, "billing");
    assert_eq!(billing.status, ManifestStatus::Failed);
    assert!(billing.error.as_deref().unwrap().contains("schema"));
    assert!(!fx.dated("billing", DAY).exists());
    assert_eq!(fx.file_names("acme", DAY).len(), 2);
    assert!(fx.staging_is_empty());
}

#[tokio::test]
async fn schema_failure_of_the_only_target_is_failed() {
    let fx = fixture(&["billing"], ScriptedRunner::failing_phase("schema", "billing"));

    let summary = fx.service.run_backup_job(&CancellationToken::new()).await;

    assert_eq!(summary.status, RunStatus::Failed);
    assert_eq!(summary.databases_failed, 1);
    assert!(summary.error.is_none());
    assert!(fx.file_names("billing", DAY).is_empty());
}

#[tokio::test]
async fn overlapping_run_is_rejected_without_side_effects() {
    let (runner, gate) = ScriptedRunner::succeeding().gated();
    let fx = fixture(&["acme"], runner);

    let first = {
        let service = fx.service.clone();
        tokio::spawn(async move { service.run_backup_job(&CancellationToken::new()).await })
    };
    for _ in 0..1000 {
        if fx.service.is_running() {
            break;
        }
        tokio::task::yield_now().await;
    }
    assert!(fx.service.is_running());

    let second = fx.service.run_backup_job(&CancellationToken::new()).await;
    assert_eq!(second.status, RunStatus::Failed);
    assert_eq!(second.error.as_deref(), Some(ALREADY_RUNNING));
    assert!(fx.service.state().read_last_run().unwrap().is_none());

    gate.add_permits(1);
    let first = first.await.unwrap();
    assert_eq!(first.status, RunStatus::Success);
    assert_eq!(fx.service.state().read_last_run().unwrap().unwrap(), first);
    assert!(!fx.service.is_running());
}

#[tokio::test]
async fn panicking_worker_fails_only_its_target_and_releases_the_lock() {
    let runner = ScriptedRunner::with(|req| {
        if req.env_value("PGHOST") == Some("db-billing") {
            panic!("runner exploded");
        }
        ok(&format!("-- {}\n", phase_of(req)))
    });
    let fx = fixture(&["acme", "billing"], runner);

    let summary = fx.service.run_backup_job(&CancellationToken::new()).await;

    assert_eq!(summary.status, RunStatus::Partial);
    let billing = &summary.backups[1];
    assert_eq!(billing.status, ManifestStatus::Failed);
    assert!(billing.error.as_deref().unwrap().starts_with("backup task failed"));
    assert!(!fx.service.state().read_lock_state().unwrap());
    assert!(fx.service.state().try_acquire().is_ok());
}

#[tokio::test]
async fn rejected_targets_are_reported_as_failed() {
    let fx = fixture_with(
        &["acme"],
        &[("BACKUP_METADATA", "postgresql://backup@db/meta")],
        ScriptedRunner::succeeding(),
    );

    let summary = fx.service.run_backup_job(&CancellationToken::new()).await;

    assert_eq!(summary.status, RunStatus::Partial);
    assert_eq!(summary.databases_total, 2);
    let ids: Vec<&str> = summary.backups.iter().map(|b| b.database_identifier.as_str()).collect();
    assert_eq!(ids, vec!["acme", "metadata"]);
    assert!(summary.backups[1].error.as_deref().unwrap().contains("reserved"));
}

#[tokio::test]
async fn bounded_pool_keeps_results_in_identifier_order() {
    let fx = fixture_with(
        &["gamma", "alpha", "beta"],
        &[("MAX_CONCURRENT_DUMPS", "2")],
        ScriptedRunner::succeeding(),
    );

    let summary = fx.service.run_backup_job(&CancellationToken::new()).await;

    assert_eq!(summary.status, RunStatus::Success);
    let ids: Vec<&str> = summary.backups.iter().map(|b| b.database_identifier.as_str()).collect();
    assert_eq!(ids, vec!["alpha", "beta", "gamma"]);
}

#[tokio::test]
async fn cancelled_run_fails_every_target_but_still_records_the_summary() {
    let fx = fixture(&["acme"], ScriptedRunner::succeeding());
    let cancel = CancellationToken::new();
    cancel.cancel();

    let summary = fx.service.run_backup_job(&cancel).await;

    assert_eq!(summary.status, RunStatus::Failed);
    assert_eq!(summary.backups[0].error.as_deref(), Some("roles dump failed: cancelled"));
    assert!(fx.service.state().read_last_run().unwrap().is_some());
    assert!(!fx.service.is_running());
}

#[tokio::test]
async fn unpersistable_lock_aborts_without_touching_databases() {
    let fx = fixture(&["acme"], ScriptedRunner::succeeding());
    std::fs::write(fx.path().join("metadata"), b"not a directory").unwrap();

    let summary = fx.service.run_backup_job(&CancellationToken::new()).await;

    assert_eq!(summary.status, RunStatus::Failed);
    assert!(!summary.is_already_running());
    assert!(summary
        .error
        .as_deref()
        .unwrap()
        .starts_with("failed to persist run lock"));
    assert!(fx.runner.calls().is_empty());
    assert!(!fx.path().join("acme").exists());

    std::fs::remove_file(fx.path().join("metadata")).unwrap();
    assert!(fx.service.state().try_acquire().is_ok());
}
