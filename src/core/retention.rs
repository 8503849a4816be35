use chrono::{Days, NaiveDate};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

use crate::core::clock::date_key;

#[derive(Debug, Error)]
pub enum RetentionError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to delete {path} after removing {removed}: {source}")]
    Delete {
        path: PathBuf,
        removed: usize,
        #[source]
        source: std::io::Error,
    },
}

impl RetentionError {
    /// Directories already removed when the sweep stopped.
    pub fn removed(&self) -> usize {
        match self {
            RetentionError::Read { .. } => 0,
            RetentionError::Delete { removed, .. } => *removed,
        }
    }
}

/// Oldest date key that survives a sweep on `today`.
pub fn cutoff_key(today: NaiveDate, retention_days: u32) -> String {
    let cutoff = today
        .checked_sub_days(Days::new(u64::from(retention_days)))
        .unwrap_or(NaiveDate::MIN);
    date_key(cutoff)
}

/// Remove dated directories of `identifier` whose name sorts before the cutoff.
///
/// Names are compared as strings. Dated directories are always created with
/// `date_key`, whose zero-padded form orders the same way as the dates.
pub fn sweep(
    root: &Path,
    identifier: &str,
    retention_days: u32,
    today: NaiveDate,
) -> Result<usize, RetentionError> {
    let db_dir = root.join(identifier);
    if !db_dir.is_dir() {
        return Ok(0);
    }
    let cutoff = cutoff_key(today, retention_days);

    let entries = std::fs::read_dir(&db_dir).map_err(|source| RetentionError::Read {
        path: db_dir.clone(),
        source,
    })?;
    let mut expired: Vec<(String, PathBuf)> = entries
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().map(|t| t.is_dir()).unwrap_or(false))
        .filter_map(|entry| {
            let name = entry.file_name().to_string_lossy().to_string();
            (name.as_str() < cutoff.as_str()).then(|| (name, entry.path()))
        })
        .collect();
    expired.sort();

    let mut removed = 0;
    for (name, path) in expired {
        std::fs::remove_dir_all(&path).map_err(|source| RetentionError::Delete {
            path: path.clone(),
            removed,
            source,
        })?;
        info!("Removed expired backup {}/{}", identifier, name);
        removed += 1;
    }
    Ok(removed)
}
