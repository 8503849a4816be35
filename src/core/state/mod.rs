mod atomic;
mod summary;

pub use atomic::{sync_dir, write_atomic};
pub use summary::{summary_run_id, DatabaseResult, RunStatus, RunSummary, ALREADY_RUNNING, NO_DATABASES};

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, warn};

const METADATA_DIR: &str = "metadata";
const LATEST_RUN_FILE: &str = "latest.json";
const RUNNING_FILE: &str = "running.json";

#[derive(Debug, Error)]
pub enum StateError {
    #[error("failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to serialize state: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum AcquireError {
    #[error("backup job is already running")]
    Busy,

    /// The flag could not be written, so the lock would not survive a restart.
    #[error("failed to persist run lock: {0}")]
    Persist(#[source] StateError),
}

#[derive(Debug, Serialize, Deserialize)]
struct LockRecord {
    running: bool,
}

/// File-backed run history and run lock under `<root>/metadata/`.
///
/// The persisted flag is what other readers (the HTTP status endpoints, a
/// one-shot CLI run) see; the in-process gate makes acquisition race-free
/// within this process.
#[derive(Clone)]
pub struct RunStateStore {
    metadata_dir: PathBuf,
    gate: Arc<Mutex<()>>,
}

impl RunStateStore {
    pub fn new(backup_root: &Path) -> Self {
        Self {
            metadata_dir: backup_root.join(METADATA_DIR),
            gate: Arc::new(Mutex::new(())),
        }
    }

    #[cfg(test)]
    pub fn metadata_dir(&self) -> &Path {
        &self.metadata_dir
    }

    fn latest_path(&self) -> PathBuf {
        self.metadata_dir.join(LATEST_RUN_FILE)
    }

    fn running_path(&self) -> PathBuf {
        self.metadata_dir.join(RUNNING_FILE)
    }

    pub fn read_last_run(&self) -> Result<Option<RunSummary>, StateError> {
        read_json(&self.latest_path())
    }

    pub fn write_last_run(&self, summary: &RunSummary) -> Result<(), StateError> {
        write_json(&self.latest_path(), summary)
    }

    pub fn read_lock_state(&self) -> Result<bool, StateError> {
        Ok(read_json::<LockRecord>(&self.running_path())?
            .map(|r| r.running)
            .unwrap_or(false))
    }

    pub fn write_lock_state(&self, running: bool) -> Result<(), StateError> {
        write_json(&self.running_path(), &LockRecord { running })
    }

    /// True while a run holds the lock, in this process or per the persisted flag.
    pub fn is_running(&self) -> bool {
        if self.gate.try_lock().is_err() {
            return true;
        }
        self.read_lock_state().unwrap_or_else(|e| {
            warn!("Failed to read lock state: {}", e);
            false
        })
    }

    /// Take the run lock. Fails with `Busy` when a run is already active and
    /// with `Persist` when the flag cannot be recorded on disk.
    pub fn try_acquire(&self) -> Result<RunLock, AcquireError> {
        let permit = self
            .gate
            .clone()
            .try_lock_owned()
            .map_err(|_| AcquireError::Busy)?;
        match self.read_lock_state() {
            Ok(true) => {
                debug!("Lock flag already set in {}", self.running_path().display());
                return Err(AcquireError::Busy);
            }
            Ok(false) => {}
            Err(e) => warn!("Failed to read lock state, assuming idle: {}", e),
        }
        self.write_lock_state(true).map_err(AcquireError::Persist)?;
        Ok(RunLock {
            _permit: permit,
            store: self.clone(),
            released: false,
        })
    }

    /// Clear a `running: true` left behind by a process that died mid-run.
    /// Returns whether anything was cleared.
    pub fn recover_stale_lock(&self) -> Result<bool, StateError> {
        if self.gate.try_lock().is_err() {
            return Ok(false);
        }
        if !self.read_lock_state()? {
            return Ok(false);
        }
        warn!("Clearing stale run lock left by a previous process");
        self.write_lock_state(false)?;
        Ok(true)
    }
}

/// Scoped ownership of the run lock. Dropping it without `release` still
/// clears the persisted flag.
pub struct RunLock {
    _permit: OwnedMutexGuard<()>,
    store: RunStateStore,
    released: bool,
}

impl RunLock {
    pub fn release(mut self) -> Result<(), StateError> {
        self.released = true;
        self.store.write_lock_state(false)
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(e) = self.store.write_lock_state(false) {
            warn!("Failed to clear run lock: {}", e);
        }
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Option<T>, StateError> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(StateError::Io {
                path: path.to_path_buf(),
                source,
            });
        }
    };
    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|source| StateError::Parse {
            path: path.to_path_buf(),
            source,
        })
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), StateError> {
    let bytes = serde_json::to_vec_pretty(value)?;
    write_atomic(path, &bytes).map_err(|source| StateError::Io {
        path: path.to_path_buf(),
        source,
    })
}
