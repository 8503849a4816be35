use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::core::backup::{ManifestStatus, PgProbe};
use crate::core::clock::SystemClock;
use crate::core::config::Config;
use crate::core::container::DockerRunner;
use crate::core::lifecycle::{BackupScheduler, LifecycleManager};
use crate::core::service::BackupService;
use crate::core::state::RunStatus;
use crate::core::terminal::{print_link, print_schedule, print_status, print_success, print_warn};
use crate::interfaces::web::{ApiServer, ApiServerConfig};

/// How long shutdown waits for an interrupted run to release the lock.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

fn build_service(config: &Config, runner: DockerRunner) -> Arc<BackupService> {
    Arc::new(BackupService::new(
        config,
        Arc::new(runner),
        Arc::new(PgProbe),
        Arc::new(SystemClock::new(config.timezone())),
    ))
}

pub async fn serve(config: Config) -> Result<()> {
    let runner = DockerRunner::new(&config.runtime);
    runner
        .check_available()
        .await
        .context("container runtime is not available")?;

    let service = build_service(&config, runner);
    if let Err(e) = service.state().recover_stale_lock() {
        warn!("Could not inspect the run lock: {}", e);
    }

    let cancel = CancellationToken::new();
    let mut manager = LifecycleManager::default();
    manager.attach(Box::new(
        BackupScheduler::new(
            &config.scheduler_cron(),
            config.timezone(),
            service.clone(),
            cancel.clone(),
        )
        .await?,
    ));
    manager.attach(Box::new(ApiServer::new(ApiServerConfig {
        service: service.clone(),
        cancel: cancel.clone(),
        host: config.service_host.clone(),
        port: config.service_port,
        scheduler_cron: config.backup_cron.clone(),
        timezone: config.timezone.clone(),
    })));

    if let Err(e) = manager.start().await {
        cancel.cancel();
        manager.shutdown().await;
        return Err(e);
    }

    print_success("pgbackup is running");
    if service.targets().is_empty() {
        print_warn("No databases configured; set BACKUP_<NAME>=postgresql://... to add one");
    } else {
        print_status("Databases", &service.database_names().join(", "));
    }
    print_schedule(&config.backup_cron, &config.timezone);
    print_link("API", &format!("http://{}:{}", config.service_host, config.service_port));

    wait_for_shutdown_signal().await;
    info!("Shutdown signal received, stopping");

    cancel.cancel();
    manager.shutdown().await;
    drain(&service).await;
    Ok(())
}

async fn drain(service: &BackupService) {
    let deadline = tokio::time::Instant::now() + DRAIN_TIMEOUT;
    while service.is_running() {
        if tokio::time::Instant::now() >= deadline {
            warn!("Backup run still active after {:?}; exiting anyway", DRAIN_TIMEOUT);
            return;
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
    }
}

async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
                return;
            }
            Err(e) => warn!("Failed to install SIGTERM handler: {}", e),
        }
    }
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for Ctrl+C: {}", e);
    }
}

/// One job in this process; prints JSON and maps a failed run to exit code 1.
pub async fn run_once(config: Config, project: Option<&str>) -> Result<i32> {
    let runner = DockerRunner::new(&config.runtime);
    let service = build_service(&config, runner.clone());

    let needs_runtime = match project {
        Some(id) => service.has_target(id),
        None => !service.targets().is_empty(),
    };
    if needs_runtime {
        runner
            .check_available()
            .await
            .context("container runtime is not available")?;
    }

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling backup");
            interrupt.cancel();
        }
    });

    match project {
        Some(id) => {
            let report = service.run_single_target(id, &cancel).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(if report.status == ManifestStatus::Failed { 1 } else { 0 })
        }
        None => {
            let summary = service.run_backup_job(&cancel).await;
            println!("{}", serde_json::to_string_pretty(&summary)?);
            Ok(if summary.status == RunStatus::Failed { 1 } else { 0 })
        }
    }
}
