use chrono::{DateTime, Duration, Local, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};
use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, TryLockError};
use tracing::{debug, info};

use super::clock::{Clock, epoch_seconds, from_epoch_seconds};
use super::db::{Database, fold_case};
use super::text::{Taxonomy, compress_text, extract_keywords};
use super::{MemoryError, Result};

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS ltm (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        ts REAL,
        role TEXT,
        content TEXT,
        compressed TEXT,
        keywords TEXT,
        category TEXT,
        priority REAL DEFAULT 1.0
    );
";

const COLUMNS: &str = "id, ts, role, content, compressed, keywords, category, priority";

/// A categorised, compressed archival record.
#[derive(Debug, Clone, PartialEq)]
pub struct LongTermRecord {
    pub id: i64,
    pub timestamp: DateTime<Utc>,
    pub role: String,
    pub content: String,
    pub compressed: String,
    pub keywords: String,
    pub category: String,
    pub priority: f64,
}

impl LongTermRecord {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            timestamp: from_epoch_seconds(row.get::<_, Option<f64>>(1)?.unwrap_or_default()),
            role: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
            content: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
            compressed: row.get::<_, Option<String>>(4)?.unwrap_or_default(),
            keywords: row.get::<_, Option<String>>(5)?.unwrap_or_default(),
            category: row.get::<_, Option<String>>(6)?.unwrap_or_default(),
            priority: row.get::<_, Option<f64>>(7)?.unwrap_or(1.0),
        })
    }
}

/// Outcome of the decay + purge step of a dreaming cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Maintenance {
    pub decayed: usize,
    pub purged: usize,
}

/// Third persistence lane: every turn lands here with keywords, a category
/// and a priority that consolidation decays and eventually purges.
pub struct LongTermStore {
    db: Database,
    clock: Arc<dyn Clock>,
    taxonomy: Arc<Taxonomy>,
    cycle: Mutex<()>,
}

impl LongTermStore {
    pub fn open(path: &Path, clock: Arc<dyn Clock>, taxonomy: Arc<Taxonomy>) -> Result<Self> {
        let db = Database::open(path, SCHEMA)?;
        db.with_conn(migrate)?;
        Ok(Self {
            db,
            clock,
            taxonomy,
            cycle: Mutex::new(()),
        })
    }

    pub fn taxonomy(&self) -> &Taxonomy {
        &self.taxonomy
    }

    pub(crate) fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    pub(crate) fn path(&self) -> &Path {
        self.db.path()
    }

    /// Exclusive right to run a consolidation cycle on this store.
    pub(crate) fn try_begin_cycle(&self) -> Result<MutexGuard<'_, ()>> {
        match self.cycle.try_lock() {
            Ok(guard) => Ok(guard),
            Err(TryLockError::WouldBlock) => Err(MemoryError::ConsolidationBusy),
            Err(TryLockError::Poisoned(e)) => Ok(e.into_inner()),
        }
    }

    /// Archive a turn with priority 1.0. Blank content is ignored.
    pub fn add(&self, role: &str, content: &str) -> Result<Option<i64>> {
        if content.trim().is_empty() {
            return Ok(None);
        }
        let ts = epoch_seconds(self.clock.now());
        let keywords = extract_keywords(content).join(",");
        let category = self.taxonomy.detect(content).to_string();
        let compressed = compress_text(content);

        let id = self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO ltm (ts, role, content, compressed, keywords, category, priority)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, 1.0)",
                params![ts, role, content, compressed, keywords, category],
            )?;
            Ok(conn.last_insert_rowid())
        })?;
        debug!(id, role, category = %category, "long-term add");
        Ok(Some(id))
    }

    /// Substring match on raw content, newest first.
    pub fn search_keyword(&self, query: &str, limit: usize) -> Result<Vec<LongTermRecord>> {
        self.select(
            "WHERE instr(fold_case(content), ?1) > 0 ORDER BY ts DESC, id DESC LIMIT ?2",
            params![fold_case(query), limit as i64],
        )
    }

    /// Keyword search with duplicates (by compressed text) collapsed.
    pub fn recall(&self, query: &str, limit: usize) -> Result<Vec<LongTermRecord>> {
        let hits = self.search_keyword(query, limit)?;
        let mut seen = HashSet::new();
        Ok(hits
            .into_iter()
            .filter(|r| seen.insert(r.compressed.clone()))
            .take(limit)
            .collect())
    }

    /// Newest first.
    pub fn recent(&self, limit: usize) -> Result<Vec<LongTermRecord>> {
        self.select("ORDER BY ts DESC, id DESC LIMIT ?1", params![limit as i64])
    }

    /// Records at or after `since`, newest first, at most `limit`.
    pub fn window(&self, since: DateTime<Utc>, limit: usize) -> Result<Vec<LongTermRecord>> {
        self.select(
            "WHERE ts >= ?1 ORDER BY ts DESC, id DESC LIMIT ?2",
            params![epoch_seconds(since), limit as i64],
        )
    }

    pub fn get(&self, id: i64) -> Result<Option<LongTermRecord>> {
        let sql = format!("SELECT {COLUMNS} FROM ltm WHERE id = ?1");
        self.db.with_conn(|conn| {
            conn.query_row(&sql, params![id], LongTermRecord::from_row)
                .optional()
        })
    }

    fn select(&self, tail: &str, args: impl rusqlite::Params) -> Result<Vec<LongTermRecord>> {
        let sql = format!("SELECT {COLUMNS} FROM ltm {tail}");
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(args, LongTermRecord::from_row)?;
            rows.collect()
        })
    }

    /// Chronological `[date] role: compressed` lines for the newest `limit` records.
    pub fn narrative(&self, limit: usize) -> Result<Option<String>> {
        let mut rows = self.recent(limit)?;
        if rows.is_empty() {
            return Ok(None);
        }
        rows.reverse();
        let lines: Vec<String> = rows
            .iter()
            .map(|r| {
                let at = r.timestamp.with_timezone(&Local).format("%Y-%m-%d %H:%M");
                format!("[{at}] {}: {}", r.role, r.compressed)
            })
            .collect();
        Ok(Some(lines.join("\n")))
    }

    /// Hard-delete every record whose content contains `query`.
    pub fn forget(&self, query: &str) -> Result<usize> {
        if query.trim().is_empty() {
            return Ok(0);
        }
        let needle = fold_case(query.trim());
        let n = self.db.with_conn(|conn| {
            conn.execute(
                "DELETE FROM ltm WHERE instr(fold_case(content), ?1) > 0",
                params![needle],
            )
        })?;
        info!(rows = n, "forgot long-term records");
        Ok(n)
    }

    pub fn set_priority(&self, id: i64, priority: f64) -> Result<bool> {
        let priority = priority.max(0.0);
        let n = self.db.with_conn(|conn| {
            conn.execute("UPDATE ltm SET priority = ?1 WHERE id = ?2", params![priority, id])
        })?;
        Ok(n > 0)
    }

    /// Multiply the priority of rows whose keywords contain `keyword`,
    /// clamped to `[0, ceiling]`. Rows already above the ceiling never grow
    /// and are never pulled down by a boost.
    pub(crate) fn scale_matching(&self, keyword: &str, amount: f64, ceiling: f64) -> Result<usize> {
        self.db.with_conn(|conn| {
            conn.execute(
                "UPDATE ltm SET priority = MAX(0.0, MIN(MAX(priority, ?1), priority * ?2))
                 WHERE instr(fold_case(keywords), ?3) > 0",
                params![ceiling, amount, fold_case(keyword)],
            )
        })
    }

    /// Multiply every priority by `factor`.
    pub(crate) fn scale_all(&self, factor: f64) -> Result<usize> {
        self.db.with_conn(|conn| {
            conn.execute(
                "UPDATE ltm SET priority = MAX(0.0, priority * ?1)",
                params![factor],
            )
        })
    }

    /// Decay every row, then purge rows that are both older than
    /// `retention` and weaker than `threshold`, in one transaction.
    pub(crate) fn decay_and_purge(
        &self,
        decay_factor: f64,
        retention: Duration,
        threshold: f64,
    ) -> Result<Maintenance> {
        let cutoff = epoch_seconds(self.clock.now() - retention);
        self.db.with_tx(|tx| {
            let decayed = tx.execute(
                "UPDATE ltm SET priority = MAX(0.0, priority * ?1)",
                params![decay_factor],
            )?;
            let purged = tx.execute(
                "DELETE FROM ltm WHERE ts < ?1 AND priority < ?2",
                params![cutoff, threshold],
            )?;
            Ok(Maintenance { decayed, purged })
        })
    }

    pub fn count(&self) -> Result<usize> {
        self.db.with_conn(|conn| {
            conn.query_row("SELECT COUNT(*) FROM ltm", [], |row| row.get::<_, i64>(0))
                .map(|n| n as usize)
        })
    }

    pub fn clear(&self) -> Result<()> {
        self.db.with_conn(|conn| conn.execute("DELETE FROM ltm", []))?;
        Ok(())
    }

    /// Write a consistent copy of the store to `dest`.
    pub(crate) fn snapshot_to(&self, dest: &Path) -> Result<()> {
        let dest = dest.to_string_lossy().into_owned();
        self.db
            .with_conn(|conn| conn.execute("VACUUM INTO ?1", params![dest]))?;
        Ok(())
    }
}

/// Files written before priorities existed lack the column.
fn migrate(conn: &Connection) -> rusqlite::Result<()> {
    let mut stmt = conn.prepare("PRAGMA table_info(ltm)")?;
    let columns = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    if !columns.iter().any(|c| c == "priority") {
        info!("migrating ltm: adding priority column");
        conn.execute_batch("ALTER TABLE ltm ADD COLUMN priority REAL DEFAULT 1.0;")?;
    }
    Ok(())
}
