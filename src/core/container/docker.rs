use async_trait::async_trait;
use std::process::{Output, Stdio};
use std::time::Duration;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::runner::{CommandRunner, RunOutput, RunRequest, RunnerError};
use crate::core::config::RuntimeConfig;

const CONTAINER_NAME_PREFIX: &str = "pgbackup-";

/// Drives a Docker-compatible CLI (`docker` or `podman`).
#[derive(Debug, Clone)]
pub struct DockerRunner {
    binary: String,
    network_mode: String,
    timeout: Option<Duration>,
}

impl DockerRunner {
    pub fn new(config: &RuntimeConfig) -> Self {
        Self {
            binary: config.binary.clone(),
            network_mode: config.network_mode.clone(),
            timeout: config.phase_timeout(),
        }
    }

    /// Fails when the CLI is missing or the daemon does not answer.
    pub async fn check_available(&self) -> Result<(), RunnerError> {
        let output = Command::new(&self.binary)
            .args(["version", "--format", "{{.Server.Version}}"])
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| RunnerError::Unavailable(format!("{}: {}", self.binary, e)))?;
        if !output.status.success() {
            return Err(RunnerError::Unavailable(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }
        info!(
            "Container runtime {} ready (server {})",
            self.binary,
            String::from_utf8_lossy(&output.stdout).trim()
        );
        Ok(())
    }

    async fn ensure_image(&self, image: &str, cancel: &CancellationToken) -> Result<(), RunnerError> {
        let inspect = self
            .exec(&["image", "inspect", image], &[], cancel, None)
            .await?;
        if inspect.status.success() {
            return Ok(());
        }

        info!("Pulling image {}", image);
        let pull = self.exec(&["pull", image], &[], cancel, None).await?;
        if pull.status.success() {
            Ok(())
        } else {
            Err(RunnerError::ImageUnavailable {
                image: image.to_string(),
                message: String::from_utf8_lossy(&pull.stderr).trim().to_string(),
            })
        }
    }

    /// Run one CLI invocation. `env` goes to the CLI process only.
    async fn exec(
        &self,
        args: &[&str],
        env: &[(String, String)],
        cancel: &CancellationToken,
        timeout: Option<Duration>,
    ) -> Result<Output, RunnerError> {
        let mut cmd = Command::new(&self.binary);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for (key, value) in env {
            cmd.env(key, value);
        }

        let child = cmd.output();
        let limit = async {
            match timeout {
                Some(t) => tokio::time::sleep(t).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            output = child => Ok(output?),
            _ = cancel.cancelled() => Err(RunnerError::Cancelled),
            _ = limit => Err(RunnerError::TimedOut(timeout.unwrap_or_default())),
        }
    }
}

/// Arguments for `create`. Only env names are passed; the CLI reads values
/// from its own environment, which keeps secrets off the process list.
pub(crate) fn create_args(name: &str, network_mode: &str, request: &RunRequest) -> Vec<String> {
    let mut args = vec![
        "create".to_string(),
        "--name".to_string(),
        name.to_string(),
        "--network".to_string(),
        network_mode.to_string(),
    ];
    for (key, _) in &request.env {
        args.push("-e".to_string());
        args.push(key.clone());
    }
    args.push(request.image.clone());
    args.push(request.command.clone());
    args.extend(request.args.iter().cloned());
    args
}

/// Removes the container if the run future is dropped before cleanup ran.
struct ContainerGuard {
    binary: String,
    name: String,
    armed: bool,
}

impl ContainerGuard {
    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for ContainerGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        warn!("Removing abandoned container {}", self.name);
        let _ = std::process::Command::new(&self.binary)
            .args(["rm", "-f", &self.name])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn();
    }
}

#[async_trait]
impl CommandRunner for DockerRunner {
    async fn run(
        &self,
        request: RunRequest,
        cancel: &CancellationToken,
    ) -> Result<RunOutput, RunnerError> {
        if cancel.is_cancelled() {
            return Err(RunnerError::Cancelled);
        }
        self.ensure_image(&request.image, cancel).await?;

        let name = format!("{}{}", CONTAINER_NAME_PREFIX, uuid::Uuid::new_v4());
        let args = create_args(&name, &self.network_mode, &request);
        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();

        let mut guard = ContainerGuard {
            binary: self.binary.clone(),
            name: name.clone(),
            armed: true,
        };

        let result = async {
            let created = self.exec(&arg_refs, &request.env, cancel, None).await?;
            if !created.status.success() {
                return Err(RunnerError::CreateFailed(
                    String::from_utf8_lossy(&created.stderr).trim().to_string(),
                ));
            }
            debug!("Starting container {} ({})", name, request.command);

            let started = self
                .exec(&["start", "--attach", &name], &[], cancel, self.timeout)
                .await?;
            let exit_code = started.status.code().unwrap_or(-1);
            if exit_code != 0 {
                return Err(RunnerError::non_zero_exit(
                    exit_code,
                    &started.stdout,
                    &started.stderr,
                ));
            }
            Ok(RunOutput {
                stdout: started.stdout,
                stderr: started.stderr,
                exit_code,
            })
        }
        .await;

        // Cleanup must not be skipped by a cancelled token.
        match self
            .exec(&["rm", "-f", &name], &[], &CancellationToken::new(), None)
            .await
        {
            Ok(out) if out.status.success() => guard.disarm(),
            Ok(out) => warn!(
                "Failed to remove container {}: {}",
                name,
                String::from_utf8_lossy(&out.stderr).trim()
            ),
            Err(e) => warn!("Failed to remove container {}: {}", name, e),
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_args_pass_env_names_only() {
        let request = RunRequest::new("postgres:16", "pg_dumpall")
            .arg("--roles-only")
            .env("PGHOST", "db.internal")
            .env("PGPASSWORD", "s3cret");
        let args = create_args("pgbackup-test", "host", &request);
        assert_eq!(
            args,
            vec![
                "create",
                "--name",
                "pgbackup-test",
                "--network",
                "host",
                "-e",
                "PGHOST",
                "-e",
                "PGPASSWORD",
                "postgres:16",
                "pg_dumpall",
                "--roles-only",
            ]
        );
        assert!(!args.iter().any(|a| a.contains("s3cret")));
    }

    #[tokio::test]
    async fn missing_binary_is_reported_unavailable() {
        let runner = DockerRunner::new(&RuntimeConfig {
            binary: "pgbackup-no-such-runtime".to_string(),
            ..RuntimeConfig::default()
        });
        let err = runner.check_available().await.unwrap_err();
        assert!(matches!(err, RunnerError::Unavailable(_)));
    }

    #[tokio::test]
    async fn cancelled_token_short_circuits() {
        let runner = DockerRunner::new(&RuntimeConfig::default());
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = runner
            .run(RunRequest::new("postgres:17", "true"), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, RunnerError::Cancelled));
    }
}
