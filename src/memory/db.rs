use rusqlite::functions::FunctionFlags;
use rusqlite::{Connection, Transaction};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

use super::{MemoryError, Result};
use crate::fs_util::{ensure_private_dir, set_secure_file_permissions};

/// Case folding shared by the `fold_case` SQL function and query arguments.
pub(crate) fn fold_case(s: &str) -> String {
    s.to_lowercase()
}

/// One SQLite file behind a mutex. Every store owns exactly one of these,
/// which keeps the stores `Send + Sync` with a single writer at a time.
pub(crate) struct Database {
    conn: Mutex<Connection>,
    path: PathBuf,
}

impl Database {
    /// Open (or create) the file at `path` and apply `schema`.
    pub fn open(path: &Path, schema: &str) -> Result<Self> {
        if let Some(parent) = path.parent() {
            ensure_private_dir(parent).map_err(|source| MemoryError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let conn = Connection::open(path)?;
        if path.exists() {
            set_secure_file_permissions(path).map_err(MemoryError::Permissions)?;
        }
        Self::configure(&conn)?;
        conn.execute_batch(schema)?;

        debug!(path = %path.display(), "opened memory store");
        Ok(Self {
            conn: Mutex::new(conn),
            path: path.to_path_buf(),
        })
    }

    fn configure(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA busy_timeout = 5000;",
        )?;
        // SQLite's own lower() only folds ASCII.
        conn.create_scalar_function(
            "fold_case",
            1,
            FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
            |ctx| Ok(ctx.get::<Option<String>>(0)?.map(|s| fold_case(&s))),
        )?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| MemoryError::LockPoisoned)
    }

    /// Run `f` against the connection.
    pub fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> rusqlite::Result<T>) -> Result<T> {
        let conn = self.lock()?;
        Ok(f(&conn)?)
    }

    /// Run `f` inside one transaction; nothing is committed if it fails.
    pub fn with_tx<T>(&self, f: impl FnOnce(&Transaction<'_>) -> rusqlite::Result<T>) -> Result<T> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let out = f(&tx)?;
        tx.commit()?;
        Ok(out)
    }
}
