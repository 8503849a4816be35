use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::info;

/// Prefix that marks an environment variable as a database target.
const DATABASE_ENV_PREFIX: &str = "BACKUP_";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub retention_days: u32,
    pub backup_cron: String,
    pub timezone: String,
    pub backup_dir: PathBuf,
    pub log_level: String,
    pub log_format: String,
    pub service_host: String,
    pub service_port: u16,
    pub max_concurrent_dumps: usize,

    pub runtime: RuntimeConfig,

    /// Lowercase identifier -> connection URL.
    pub databases: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Docker-compatible CLI: "docker" or "podman".
    pub binary: String,
    /// Image repository; the tag is the detected server major version.
    pub image: String,
    pub network_mode: String,
    /// Replacement host used when a target points at loopback.
    pub loopback_alias: Option<String>,
    pub default_pg_version: String,
    /// Per-phase limit in seconds; 0 disables it.
    pub phase_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            retention_days: 30,
            backup_cron: "30 0 * * *".to_string(),
            timezone: "Europe/Berlin".to_string(),
            backup_dir: PathBuf::from("./backups"),
            log_level: "INFO".to_string(),
            log_format: "json".to_string(),
            service_host: "0.0.0.0".to_string(),
            service_port: 8080,
            max_concurrent_dumps: 1,
            runtime: RuntimeConfig::default(),
            databases: BTreeMap::new(),
        }
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            binary: "docker".to_string(),
            image: "postgres".to_string(),
            network_mode: "host".to_string(),
            loopback_alias: default_loopback_alias(),
            default_pg_version: "17".to_string(),
            phase_timeout_secs: 3600,
        }
    }
}

/// Docker Desktop cannot share the host network namespace, so containers reach
/// host services through its gateway name instead.
fn default_loopback_alias() -> Option<String> {
    if cfg!(target_os = "macos") {
        Some("host.docker.internal".to_string())
    } else {
        None
    }
}

impl Config {
    /// Defaults, then the optional TOML file named by `PGBACKUP_CONFIG`, then the process environment.
    pub fn load() -> Result<Self> {
        let vars: Vec<(String, String)> = std::env::vars().collect();
        let base = match vars.iter().find(|(k, _)| k == "PGBACKUP_CONFIG") {
            Some((_, path)) if !path.trim().is_empty() => Self::from_file(Path::new(path.trim()))?,
            _ => Self::default(),
        };
        let mut config = base.with_vars(vars);
        config.backup_dir = absolutize(&config.backup_dir)?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        info!("Loaded configuration file {}", path.display());
        Ok(config)
    }

    /// Apply environment-style overrides. Numbers that do not parse keep their previous value.
    pub fn with_vars<I>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (key, value) in vars {
            let value = value.trim().to_string();
            if value.is_empty() {
                continue;
            }
            match key.as_str() {
                "RETENTION_DAYS" => parse_into(&value, &mut self.retention_days),
                "BACKUP_CRON" => self.backup_cron = value,
                "TZ" => self.timezone = value,
                "LOCAL_BACKUP_DIR" => self.backup_dir = PathBuf::from(value),
                "LOG_LEVEL" => self.log_level = value,
                "LOG_FORMAT" => self.log_format = value,
                "SERVICE_HOST" => self.service_host = value,
                "SERVICE_PORT" => parse_into(&value, &mut self.service_port),
                "MAX_CONCURRENT_DUMPS" => parse_into(&value, &mut self.max_concurrent_dumps),
                "CONTAINER_RUNTIME" => self.runtime.binary = value,
                "DUMP_IMAGE" => self.runtime.image = value,
                "DOCKER_NETWORK" => self.runtime.network_mode = value,
                "LOOPBACK_HOST_ALIAS" => {
                    self.runtime.loopback_alias = match value.as_str() {
                        "none" | "off" => None,
                        _ => Some(value),
                    }
                }
                "DEFAULT_PG_VERSION" => self.runtime.default_pg_version = value,
                "PHASE_TIMEOUT_SECS" => parse_into(&value, &mut self.runtime.phase_timeout_secs),
                _ => {
                    if let Some(identifier) = database_identifier(&key, &value) {
                        self.databases.insert(identifier, value);
                    }
                }
            }
        }
        self.max_concurrent_dumps = self.max_concurrent_dumps.max(1);
        self
    }

    #[cfg(test)]
    pub fn from_vars<I>(vars: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        Self::default().with_vars(vars)
    }

    /// The scheduler wants a leading seconds field; classic five-field expressions get one.
    pub fn scheduler_cron(&self) -> String {
        let fields: Vec<&str> = self.backup_cron.split_whitespace().collect();
        if fields.len() == 5 {
            format!("0 {}", fields.join(" "))
        } else {
            fields.join(" ")
        }
    }

    pub fn timezone(&self) -> chrono_tz::Tz {
        match self.timezone.parse::<chrono_tz::Tz>() {
            Ok(tz) => tz,
            Err(_) => {
                tracing::warn!("Invalid timezone '{}', using UTC", self.timezone);
                chrono_tz::Tz::UTC
            }
        }
    }
}

impl RuntimeConfig {
    pub fn phase_timeout(&self) -> Option<std::time::Duration> {
        match self.phase_timeout_secs {
            0 => None,
            secs => Some(std::time::Duration::from_secs(secs)),
        }
    }
}

/// `BACKUP_<NAME>=postgres[ql]://...` names a target; everything else with the prefix is a setting.
fn database_identifier(key: &str, value: &str) -> Option<String> {
    let upper = key.to_ascii_uppercase();
    if !upper.starts_with(DATABASE_ENV_PREFIX) {
        return None;
    }
    if !(value.starts_with("postgresql://") || value.starts_with("postgres://")) {
        return None;
    }
    let name = &key[DATABASE_ENV_PREFIX.len()..];
    if name.is_empty() {
        return None;
    }
    Some(name.to_lowercase())
}

fn parse_into<T: std::str::FromStr>(value: &str, slot: &mut T) {
    if let Ok(parsed) = value.parse() {
        *slot = parsed;
    }
}

fn absolutize(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    let cwd = std::env::current_dir().context("failed to get working directory")?;
    Ok(cwd.join(path))
}
