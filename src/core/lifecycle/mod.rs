use anyhow::{Context, Result};
use chrono_tz::Tz;
use std::sync::Arc;
use tokio_cron_scheduler::{Job, JobScheduler};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::core::service::BackupService;

/// A long-lived part of the daemon, started and stopped in attach order.
#[async_trait::async_trait]
pub trait LifecycleComponent: Send {
    async fn on_start(&mut self) -> Result<()> {
        Ok(())
    }
    async fn on_shutdown(&mut self) -> Result<()> {
        Ok(())
    }
}

#[derive(Default)]
pub struct LifecycleManager {
    components: Vec<Box<dyn LifecycleComponent>>,
}

impl LifecycleManager {
    pub fn attach(&mut self, component: Box<dyn LifecycleComponent>) {
        self.components.push(component);
    }

    pub async fn start(&mut self) -> Result<()> {
        for comp in &mut self.components {
            comp.on_start().await?;
        }
        info!("All components started");
        Ok(())
    }

    /// Stops components in reverse order; errors are logged, not returned.
    pub async fn shutdown(&mut self) {
        for comp in self.components.iter_mut().rev() {
            if let Err(e) = comp.on_shutdown().await {
                warn!("Component shutdown error: {}", e);
            }
        }
    }
}

/// Fires the full backup job on the configured cron schedule.
pub struct BackupScheduler {
    scheduler: JobScheduler,
    cron: String,
    timezone: Tz,
    service: Arc<BackupService>,
    cancel: CancellationToken,
}

impl BackupScheduler {
    /// `cancel` is handed to every run so shutdown interrupts in-flight dumps.
    pub async fn new(
        cron: &str,
        timezone: Tz,
        service: Arc<BackupService>,
        cancel: CancellationToken,
    ) -> Result<Self> {
        let scheduler = JobScheduler::new()
            .await
            .context("failed to create scheduler")?;
        Ok(Self {
            scheduler,
            cron: cron.to_string(),
            timezone,
            service,
            cancel,
        })
    }

    fn backup_job(&self) -> Result<Job> {
        let service = self.service.clone();
        let cancel = self.cancel.clone();
        Job::new_async_tz(self.cron.as_str(), self.timezone, move |_uuid, _l| {
            let service = service.clone();
            let cancel = cancel.clone();
            Box::pin(async move {
                if cancel.is_cancelled() {
                    return;
                }
                info!("Scheduled backup job triggered");
                let summary = service.run_backup_job(&cancel).await;
                if summary.is_already_running() {
                    warn!("Scheduled backup skipped: a run is already in progress");
                } else {
                    info!(
                        "Scheduled backup {} finished with status {}",
                        summary.run_id,
                        summary.status.as_str()
                    );
                }
            })
        })
        .map_err(|e| anyhow::anyhow!("invalid cron expression '{}': {}", self.cron, e))
    }
}

#[async_trait::async_trait]
impl LifecycleComponent for BackupScheduler {
    async fn on_start(&mut self) -> Result<()> {
        let job = self.backup_job()?;
        self.scheduler
            .add(job)
            .await
            .context("failed to register backup job")?;
        self.scheduler
            .start()
            .await
            .context("failed to start scheduler")?;
        info!("Scheduled backups with cron '{}' ({})", self.cron, self.timezone);
        Ok(())
    }

    async fn on_shutdown(&mut self) -> Result<()> {
        info!("Stopping scheduler");
        if let Err(e) = self.scheduler.shutdown().await {
            error!("Scheduler shutdown error: {}", e);
        }
        Ok(())
    }
}
