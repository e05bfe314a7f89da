use rusqlite::{OptionalExtension, params};
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

use super::Result;
use super::clock::Clock;
use super::db::Database;

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS semantic_memory (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        ts TEXT,
        text TEXT UNIQUE,
        vector REAL
    );
";

/// Human-readable timestamp format of the `ts` column.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Maps text to the scalar stored in the `vector` column. Must be a pure
/// function of the text.
pub trait Fingerprint: Send + Sync {
    fn fingerprint(&self, text: &str) -> f64;
}

/// Mean of per-token hash buckets. A coarse bag-of-words proxy, not an
/// embedding: unrelated texts can land close together.
#[derive(Debug, Default, Clone, Copy)]
pub struct HashMeanFingerprint;

const HASH_BUCKETS: u64 = 5000;

impl Fingerprint for HashMeanFingerprint {
    fn fingerprint(&self, text: &str) -> f64 {
        let lower = text.to_lowercase();
        let buckets: Vec<u64> = lower
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
            .map(|t| fnv1a(t.as_bytes()) % HASH_BUCKETS)
            .collect();
        if buckets.is_empty() {
            return 0.0;
        }
        buckets.iter().sum::<u64>() as f64 / buckets.len() as f64
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for b in bytes {
        hash ^= u64::from(*b);
        hash = hash.wrapping_mul(0x0100_0000_01b3);
    }
    hash
}

#[derive(Debug, Clone, PartialEq)]
pub struct SemanticRecord {
    pub id: i64,
    pub timestamp: String,
    pub text: String,
    pub vector: f64,
}

/// A search hit with its similarity score in `(0, 1]`.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredSemantic {
    pub record: SemanticRecord,
    pub score: f64,
}

/// Deduplicated knowledge snippets. Text is unique; re-adding is a no-op.
pub struct SemanticStore {
    db: Database,
    clock: Arc<dyn Clock>,
    fingerprint: Arc<dyn Fingerprint>,
}

impl SemanticStore {
    pub fn open(path: &Path, clock: Arc<dyn Clock>) -> Result<Self> {
        Self::with_fingerprint(path, clock, Arc::new(HashMeanFingerprint))
    }

    pub fn with_fingerprint(
        path: &Path,
        clock: Arc<dyn Clock>,
        fingerprint: Arc<dyn Fingerprint>,
    ) -> Result<Self> {
        Ok(Self {
            db: Database::open(path, SCHEMA)?,
            clock,
            fingerprint,
        })
    }

    fn stamp(&self) -> String {
        self.clock.now().format(TIMESTAMP_FORMAT).to_string()
    }

    /// Insert `text` unless it is blank or already stored.
    /// Returns whether a row was written.
    pub fn add(&self, text: &str) -> Result<bool> {
        Ok(self.add_many(&[text])? == 1)
    }

    /// Insert several texts in one transaction. Returns how many were new.
    pub fn add_many(&self, texts: &[&str]) -> Result<usize> {
        let ts = self.stamp();
        let rows: Vec<(&str, f64)> = texts
            .iter()
            .filter(|t| !t.trim().is_empty())
            .map(|t| (*t, self.fingerprint.fingerprint(t)))
            .collect();
        if rows.is_empty() {
            return Ok(0);
        }

        let inserted = self.db.with_tx(|tx| {
            let mut stmt = tx.prepare(
                "INSERT OR IGNORE INTO semantic_memory (ts, text, vector) VALUES (?1, ?2, ?3)",
            )?;
            let mut n = 0;
            for (text, vector) in &rows {
                n += stmt.execute(params![ts, text, vector])?;
            }
            Ok(n)
        })?;
        debug!(offered = rows.len(), inserted, "semantic add");
        Ok(inserted)
    }

    /// Linear scan scoring every record by `1 / (1 + |v - q|)`.
    pub fn search(&self, query: &str, limit: usize) -> Result<Vec<ScoredSemantic>> {
        let q = self.fingerprint.fingerprint(query);
        let records = self.db.with_conn(|conn| {
            let mut stmt =
                conn.prepare("SELECT id, ts, text, vector FROM semantic_memory ORDER BY id")?;
            let rows = stmt.query_map([], |row| {
                Ok(SemanticRecord {
                    id: row.get(0)?,
                    timestamp: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
                    text: row.get(2)?,
                    vector: row.get::<_, Option<f64>>(3)?.unwrap_or_default(),
                })
            })?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
        })?;

        let mut scored: Vec<ScoredSemantic> = records
            .into_iter()
            .map(|record| {
                let score = 1.0 / (1.0 + (record.vector - q).abs());
                ScoredSemantic { record, score }
            })
            .collect();
        scored.sort_by(|a, b| b.score.total_cmp(&a.score));
        scored.truncate(limit);
        Ok(scored)
    }

    /// Most recently inserted first.
    pub fn latest(&self, limit: usize) -> Result<Vec<SemanticRecord>> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, ts, text, vector FROM semantic_memory ORDER BY id DESC LIMIT ?1",
            )?;
            let rows = stmt.query_map(params![limit as i64], |row| {
                Ok(SemanticRecord {
                    id: row.get(0)?,
                    timestamp: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
                    text: row.get(2)?,
                    vector: row.get::<_, Option<f64>>(3)?.unwrap_or_default(),
                })
            })?;
            rows.collect()
        })
    }

    pub fn contains(&self, text: &str) -> Result<bool> {
        self.db.with_conn(|conn| {
            conn.query_row(
                "SELECT 1 FROM semantic_memory WHERE text = ?1",
                params![text],
                |_| Ok(()),
            )
            .optional()
            .map(|hit| hit.is_some())
        })
    }

    pub fn count(&self) -> Result<usize> {
        self.db.with_conn(|conn| {
            conn.query_row("SELECT COUNT(*) FROM semantic_memory", [], |row| {
                row.get::<_, i64>(0)
            })
            .map(|n| n as usize)
        })
    }

    pub fn clear(&self) -> Result<()> {
        self.db
            .with_conn(|conn| conn.execute("DELETE FROM semantic_memory", []))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_is_deterministic_and_case_insensitive() {
        let fp = HashMeanFingerprint;
        assert_eq!(fp.fingerprint("Long walks"), fp.fingerprint("long WALKS"));
        assert_eq!(fp.fingerprint("?!"), 0.0);
        let v = fp.fingerprint("python rocks");
        assert!((0.0..5000.0).contains(&v));
    }
}
