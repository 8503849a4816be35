use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// One command to execute inside a fresh, throwaway container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunRequest {
    pub image: String,
    pub command: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
}

impl RunRequest {
    pub fn new(image: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            command: command.into(),
            args: Vec::new(),
            env: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    #[cfg(test)]
    pub fn env_value(&self, key: &str) -> Option<&str> {
        self.env
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

#[derive(Debug, Clone, Default)]
pub struct RunOutput {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub exit_code: i32,
}

#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("container runtime unavailable: {0}")]
    Unavailable(String),

    #[error("image {image} unavailable: {message}")]
    ImageUnavailable { image: String, message: String },

    #[error("failed to create container: {0}")]
    CreateFailed(String),

    #[error("container exited with code {code}{}", detail_suffix(.detail))]
    NonZeroExit { code: i32, detail: String },

    #[error("container timed out after {}s", .0.as_secs())]
    TimedOut(Duration),

    #[error("cancelled")]
    Cancelled,

    #[error("container runtime I/O error: {0}")]
    Io(#[from] std::io::Error),
}

fn detail_suffix(detail: &str) -> String {
    if detail.is_empty() {
        String::new()
    } else {
        format!(": {}", detail)
    }
}

impl RunnerError {
    /// Build the exit error from captured output: stderr first, then stdout.
    pub fn non_zero_exit(code: i32, stdout: &[u8], stderr: &[u8]) -> Self {
        let stderr = String::from_utf8_lossy(stderr).trim().to_string();
        let detail = if stderr.is_empty() {
            String::from_utf8_lossy(stdout).trim().to_string()
        } else {
            stderr
        };
        RunnerError::NonZeroExit { code, detail }
    }
}

/// Runs a command inside an isolated, image-pinned environment.
///
/// Implementations must tear the environment down on every exit path,
/// including cancellation and timeout.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(
        &self,
        request: RunRequest,
        cancel: &CancellationToken,
    ) -> Result<RunOutput, RunnerError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_zero_exit_prefers_stderr() {
        let err = RunnerError::non_zero_exit(1, b"ignored", b"pg_dump: error: connection refused\n");
        assert_eq!(
            err.to_string(),
            "container exited with code 1: pg_dump: error: connection refused"
        );
    }

    #[test]
    fn non_zero_exit_falls_back_to_stdout_then_code() {
        let err = RunnerError::non_zero_exit(2, b"partial output", b"  ");
        assert_eq!(err.to_string(), "container exited with code 2: partial output");

        let err = RunnerError::non_zero_exit(3, b"", b"");
        assert_eq!(err.to_string(), "container exited with code 3");
    }

    #[test]
    fn request_builder_keeps_order() {
        let req = RunRequest::new("postgres:16", "pg_dump")
            .arg("--schema-only")
            .args(["--no-owner", "--no-acl"])
            .env("PGPASSWORD", "secret");
        assert_eq!(req.args, vec!["--schema-only", "--no-owner", "--no-acl"]);
        assert_eq!(req.env_value("PGPASSWORD"), Some("secret"));
        assert_eq!(req.env_value("PGHOST"), None);
    }
}
