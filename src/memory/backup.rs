use chrono::Local;
use std::path::{Path, PathBuf};
use tracing::info;

use super::long_term::LongTermStore;
use super::{MemoryError, Result};
use crate::fs_util::ensure_private_dir;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackupOutcome {
    Created(PathBuf),
    AlreadyExists(PathBuf),
}

impl std::fmt::Display for BackupOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackupOutcome::Created(p) => write!(f, "Backup created: {}", p.display()),
            BackupOutcome::AlreadyExists(p) => {
                write!(f, "Backup already exists today: {}", p.display())
            }
        }
    }
}

/// Snapshot the long-term store into `dir` as `ltm_<YYYY-MM-DD>.sqlite`,
/// at most once per calendar day.
pub fn daily_backup(long_term: &LongTermStore, dir: &Path) -> Result<BackupOutcome> {
    ensure_private_dir(dir).map_err(|source| MemoryError::Io {
        path: dir.to_path_buf(),
        source,
    })?;

    let day = long_term.clock().now().with_timezone(&Local).format("%Y-%m-%d");
    let target = dir.join(format!("ltm_{day}.sqlite"));
    if target.exists() {
        return Ok(BackupOutcome::AlreadyExists(target));
    }

    long_term.snapshot_to(&target)?;
    info!(
        source = %long_term.path().display(),
        target = %target.display(),
        "long-term backup written"
    );
    Ok(BackupOutcome::Created(target))
}
