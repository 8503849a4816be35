mod handlers;
mod router;

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::core::lifecycle::LifecycleComponent;
use crate::core::service::BackupService;

pub use router::build_api_router;

pub struct ApiServer {
    host: String,
    port: u16,
    state: AppState,
    handle: Option<JoinHandle<()>>,
}

pub struct ApiServerConfig {
    pub service: Arc<BackupService>,
    pub cancel: CancellationToken,
    pub host: String,
    pub port: u16,
    pub scheduler_cron: String,
    pub timezone: String,
}

#[derive(Clone)]
pub struct AppState {
    pub(crate) service: Arc<BackupService>,
    /// Shared with the scheduler; cancelling it interrupts triggered runs too.
    pub(crate) cancel: CancellationToken,
    pub(crate) scheduler_cron: String,
    pub(crate) timezone: String,
}

impl ApiServer {
    pub fn new(config: ApiServerConfig) -> Self {
        Self {
            host: config.host,
            port: config.port,
            state: AppState {
                service: config.service,
                cancel: config.cancel,
                scheduler_cron: config.scheduler_cron,
                timezone: config.timezone,
            },
            handle: None,
        }
    }
}

#[async_trait]
impl LifecycleComponent for ApiServer {
    async fn on_start(&mut self) -> Result<()> {
        let addr = format!("{}:{}", self.host, self.port);
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .with_context(|| format!("failed to bind API server to {}", addr))?;

        let app = build_api_router(self.state.clone());
        let shutdown = self.state.cancel.clone();
        info!("API Server running at http://{addr}");

        self.handle = Some(tokio::spawn(async move {
            let served = axum::serve(listener, app)
                .with_graceful_shutdown(shutdown.cancelled_owned())
                .await;
            if let Err(e) = served {
                tracing::error!("API Server crashed: {}", e);
            }
        }));
        Ok(())
    }

    async fn on_shutdown(&mut self) -> Result<()> {
        info!("API Server shutting down...");
        if let Some(handle) = self.handle.take() {
            self.state.cancel.cancel();
            if tokio::time::timeout(std::time::Duration::from_secs(10), handle)
                .await
                .is_err()
            {
                warn!("API Server did not stop within 10s");
            }
        }
        Ok(())
    }
}
