use async_trait::async_trait;
use regex::Regex;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use super::target::ConnectionDescriptor;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("invalid connection options: {0}")]
    Options(String),

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("query failed: {0}")]
    Query(String),

    #[error("cancelled")]
    Cancelled,
}

/// What a direct connection tells us about the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerInfo {
    /// Raw `SELECT version()` text.
    pub version: String,
    pub database_size_bytes: Option<i64>,
}

impl ServerInfo {
    pub fn major(&self) -> Option<String> {
        parse_major(&self.version)
    }

    pub fn version_label(&self) -> Option<String> {
        parse_version_label(&self.version)
    }
}

#[async_trait]
pub trait DatabaseProbe: Send + Sync {
    async fn probe(
        &self,
        connection: &ConnectionDescriptor,
        cancel: &CancellationToken,
    ) -> Result<ServerInfo, ProbeError>;
}

/// Probe backed by a one-connection sqlx pool.
pub struct PgProbe;

#[async_trait]
impl DatabaseProbe for PgProbe {
    async fn probe(
        &self,
        connection: &ConnectionDescriptor,
        cancel: &CancellationToken,
    ) -> Result<ServerInfo, ProbeError> {
        let options: PgConnectOptions = connection
            .url()
            .parse()
            .map_err(|e: sqlx::Error| ProbeError::Options(e.to_string()))?;

        let work = async {
            let pool = PgPoolOptions::new()
                .max_connections(1)
                .acquire_timeout(CONNECT_TIMEOUT)
                .connect_with(options)
                .await
                .map_err(|e| ProbeError::Connect(e.to_string()))?;

            let version: String = sqlx::query_scalar("SELECT version()")
                .fetch_one(&pool)
                .await
                .map_err(|e| ProbeError::Query(e.to_string()))?;

            let database_size_bytes =
                match sqlx::query_scalar::<_, i64>("SELECT pg_database_size(current_database())")
                    .fetch_one(&pool)
                    .await
                {
                    Ok(size) => Some(size),
                    Err(e) => {
                        tracing::warn!("Failed to read database size: {}", e);
                        None
                    }
                };

            pool.close().await;
            Ok(ServerInfo {
                version,
                database_size_bytes,
            })
        };

        tokio::select! {
            result = work => result,
            _ = cancel.cancelled() => Err(ProbeError::Cancelled),
        }
    }
}

/// Major version from `version()` output: "PostgreSQL 16.4 on x86_64..." -> "16".
pub fn parse_major(version: &str) -> Option<String> {
    let re = Regex::new(r"PostgreSQL (\d+)").ok()?;
    if let Some(caps) = re.captures(version) {
        return Some(caps[1].to_string());
    }
    let second = version.split_whitespace().nth(1)?;
    let major: String = second.chars().take_while(|c| c.is_ascii_digit()).collect();
    if major.is_empty() {
        None
    } else {
        Some(major)
    }
}

/// `major[.minor]` for the manifest.
pub fn parse_version_label(version: &str) -> Option<String> {
    let re = Regex::new(r"PostgreSQL (\d+(?:\.\d+)?)").ok()?;
    re.captures(version).map(|caps| caps[1].to_string())
}
