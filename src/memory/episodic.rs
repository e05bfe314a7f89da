use chrono::{DateTime, Utc};
use rusqlite::{Row, params};
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

use super::clock::{Clock, epoch_seconds, from_epoch_seconds};
use super::db::{Database, fold_case};
use super::{Result, check_factor};

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS episodic (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        ts REAL,
        role TEXT,
        text TEXT,
        priority REAL DEFAULT 1.0
    );
    CREATE INDEX IF NOT EXISTS episodic_rank ON episodic (priority DESC, ts DESC);
";

/// One conversational turn as it happened.
#[derive(Debug, Clone, PartialEq)]
pub struct EpisodicRecord {
    pub id: i64,
    pub timestamp: DateTime<Utc>,
    pub role: String,
    pub text: String,
    pub priority: f64,
}

impl EpisodicRecord {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            timestamp: from_epoch_seconds(row.get(1)?),
            role: row.get(2)?,
            text: row.get(3)?,
            priority: row.get(4)?,
        })
    }
}

/// Append-only event log. Records fade through [`EpisodicStore::decay`]
/// but are only ever removed by [`EpisodicStore::clear`].
pub struct EpisodicStore {
    db: Database,
    clock: Arc<dyn Clock>,
}

impl EpisodicStore {
    pub fn open(path: &Path, clock: Arc<dyn Clock>) -> Result<Self> {
        Ok(Self {
            db: Database::open(path, SCHEMA)?,
            clock,
        })
    }

    /// Append a turn. Blank text is ignored and yields `None`.
    pub fn add(&self, role: &str, text: &str, priority: f64) -> Result<Option<i64>> {
        if text.trim().is_empty() {
            return Ok(None);
        }
        let ts = epoch_seconds(self.clock.now());
        let priority = priority.max(0.0);
        let id = self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO episodic (ts, role, text, priority) VALUES (?1, ?2, ?3, ?4)",
                params![ts, role, text, priority],
            )?;
            Ok(conn.last_insert_rowid())
        })?;
        debug!(id, role, "episodic add");
        Ok(Some(id))
    }

    /// Case-insensitive substring recall, strongest then newest first.
    pub fn recall(&self, query: &str, limit: usize) -> Result<Vec<EpisodicRecord>> {
        let needle = fold_case(query);
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, ts, role, text, priority FROM episodic
                 WHERE instr(fold_case(text), ?1) > 0
                 ORDER BY priority DESC, ts DESC, id DESC
                 LIMIT ?2",
            )?;
            let rows = stmt.query_map(params![needle, limit as i64], EpisodicRecord::from_row)?;
            rows.collect()
        })
    }

    /// Newest records first.
    pub fn recent(&self, limit: usize) -> Result<Vec<EpisodicRecord>> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, ts, role, text, priority FROM episodic
                 ORDER BY ts DESC, id DESC LIMIT ?1",
            )?;
            let rows = stmt.query_map(params![limit as i64], EpisodicRecord::from_row)?;
            rows.collect()
        })
    }

    /// Multiply every priority by `factor`. Returns the number of rows touched.
    pub fn decay(&self, factor: f64) -> Result<usize> {
        check_factor(factor)?;
        let n = self.db.with_conn(|conn| {
            conn.execute("UPDATE episodic SET priority = priority * ?1", params![factor])
        })?;
        debug!(factor, rows = n, "episodic decay");
        Ok(n)
    }

    pub fn count(&self) -> Result<usize> {
        self.db.with_conn(|conn| {
            conn.query_row("SELECT COUNT(*) FROM episodic", [], |row| row.get::<_, i64>(0))
                .map(|n| n as usize)
        })
    }

    pub fn clear(&self) -> Result<()> {
        self.db
            .with_conn(|conn| conn.execute("DELETE FROM episodic", []))?;
        Ok(())
    }
}
