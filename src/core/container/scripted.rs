//! In-memory `CommandRunner` for tests: records every request and answers
//! through a closure, optionally waiting on a gate first.

use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use super::runner::{CommandRunner, RunOutput, RunRequest, RunnerError};

type Handler = dyn Fn(&RunRequest) -> Result<RunOutput, RunnerError> + Send + Sync;

pub struct ScriptedRunner {
    handler: Box<Handler>,
    calls: Mutex<Vec<RunRequest>>,
    gate: Option<Arc<Semaphore>>,
}

/// Which dump phase a request belongs to, judged by its command line.
pub fn phase_of(request: &RunRequest) -> &'static str {
    if request.command == "pg_dumpall" {
        "roles"
    } else if request.args.iter().any(|a| a == "--schema-only") {
        "schema"
    } else if request.args.iter().any(|a| a == "--data-only") {
        "data"
    } else {
        "other"
    }
}

pub fn ok(stdout: &str) -> Result<RunOutput, RunnerError> {
    Ok(RunOutput {
        stdout: stdout.as_bytes().to_vec(),
        stderr: Vec::new(),
        exit_code: 0,
    })
}

impl ScriptedRunner {
    pub fn with<F>(handler: F) -> Self
    where
        F: Fn(&RunRequest) -> Result<RunOutput, RunnerError> + Send + Sync + 'static,
    {
        Self {
            handler: Box::new(handler),
            calls: Mutex::new(Vec::new()),
            gate: None,
        }
    }

    /// Every phase succeeds and emits a small SQL comment naming itself.
    pub fn succeeding() -> Self {
        Self::with(|req| ok(&format!("-- {} dump\n", phase_of(req))))
    }

    /// Fails the given phase for databases whose dbname/PGHOST contains `needle`.
    pub fn failing_phase(phase: &'static str, needle: &'static str) -> Self {
        Self::with(move |req| {
            let targets_needle = req.args.iter().any(|a| a.contains(needle))
                || req.env_value("PGHOST").is_some_and(|h| h.contains(needle));
            if phase_of(req) == phase && targets_needle {
                Err(RunnerError::non_zero_exit(1, b"", b"permission denied for schema"))
            } else {
                ok(&format!("-- {} dump\n", phase_of(req)))
            }
        })
    }

    /// Calls block until the returned semaphore receives permits.
    pub fn gated(mut self) -> (Self, Arc<Semaphore>) {
        let gate = Arc::new(Semaphore::new(0));
        self.gate = Some(gate.clone());
        (self, gate)
    }

    pub fn calls(&self) -> Vec<RunRequest> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    async fn run(
        &self,
        request: RunRequest,
        cancel: &CancellationToken,
    ) -> Result<RunOutput, RunnerError> {
        if cancel.is_cancelled() {
            return Err(RunnerError::Cancelled);
        }
        if let Some(gate) = &self.gate {
            tokio::select! {
                permit = gate.acquire() => drop(permit),
                _ = cancel.cancelled() => return Err(RunnerError::Cancelled),
            }
        }
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(request.clone());
        }
        (self.handler)(&request)
    }
}
