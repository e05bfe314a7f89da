pub mod anchor;
pub mod backup;
pub mod clock;
mod db;
pub mod dreaming;
pub mod episodic;
pub mod fusion;
pub mod long_term;
pub mod semantic;
pub mod text;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

use crate::types::Message;
use anchor::{ContextAnchor, DEFAULT_MAX_PRIORITY};
use backup::BackupOutcome;
use clock::{Clock, SystemClock};
use dreaming::{ConsolidationEngine, DreamParams, DreamReport};
use episodic::{EpisodicRecord, EpisodicStore};
use fusion::{BrainFusion, RecallHit};
use long_term::{LongTermRecord, LongTermStore};
use semantic::SemanticStore;
use text::Taxonomy;

pub const EPISODIC_FILE: &str = "episodic.db";
pub const SEMANTIC_FILE: &str = "semantic.db";
pub const LONG_TERM_FILE: &str = "long_term.db";

/// Role recorded for memories the user explicitly asked to keep.
pub const FORCED_ROLE: &str = "forced";

#[derive(Debug, thiserror::Error)]
pub enum MemoryError {
    #[error("storage unavailable: {0}")]
    StorageUnavailable(#[from] rusqlite::Error),
    #[error("storage unavailable at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("storage unavailable: {0}")]
    Permissions(anyhow::Error),
    #[error("invalid factor {0}: must be finite and non-negative")]
    InvalidFactor(f64),
    #[error("a consolidation cycle is already running")]
    ConsolidationBusy,
    #[error("memory store lock poisoned")]
    LockPoisoned,
}

pub type Result<T> = std::result::Result<T, MemoryError>;

/// Multipliers must keep priorities finite and non-negative.
pub(crate) fn check_factor(factor: f64) -> Result<()> {
    if factor.is_finite() && factor >= 0.0 {
        Ok(())
    } else {
        Err(MemoryError::InvalidFactor(factor))
    }
}

/// Row counts per store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MemoryStats {
    pub episodic: usize,
    pub semantic: usize,
    pub long_term: usize,
}

pub struct EngineOptions {
    pub clock: Arc<dyn Clock>,
    pub taxonomy: Taxonomy,
    pub max_priority: f64,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            clock: Arc::new(SystemClock),
            taxonomy: Taxonomy::default(),
            max_priority: DEFAULT_MAX_PRIORITY,
        }
    }
}

/// One session's memory: the three stores opened from a data directory,
/// plus fusion, dreaming and the context anchor wired over them.
///
/// Every turn goes through [`MemoryEngine::store`]; prompt context comes
/// back out of [`MemoryEngine::assemble_context`].
pub struct MemoryEngine {
    data_dir: PathBuf,
    episodic: Arc<EpisodicStore>,
    semantic: Arc<SemanticStore>,
    long_term: Arc<LongTermStore>,
    fusion: BrainFusion,
    dreaming: Arc<ConsolidationEngine>,
    anchor: ContextAnchor,
}

impl MemoryEngine {
    pub fn open(data_dir: &Path, options: EngineOptions) -> Result<Self> {
        let EngineOptions {
            clock,
            taxonomy,
            max_priority,
        } = options;

        let episodic = Arc::new(EpisodicStore::open(
            &data_dir.join(EPISODIC_FILE),
            Arc::clone(&clock),
        )?);
        let semantic = Arc::new(SemanticStore::open(
            &data_dir.join(SEMANTIC_FILE),
            Arc::clone(&clock),
        )?);
        let long_term = Arc::new(LongTermStore::open(
            &data_dir.join(LONG_TERM_FILE),
            Arc::clone(&clock),
            Arc::new(taxonomy),
        )?);
        // dreaming writes through its own handle on the semantic file
        let dream_semantic = Arc::new(SemanticStore::open(
            &data_dir.join(SEMANTIC_FILE),
            Arc::clone(&clock),
        )?);

        info!(data_dir = %data_dir.display(), "memory engine ready");

        Ok(Self {
            data_dir: data_dir.to_path_buf(),
            fusion: BrainFusion::new(Arc::clone(&episodic), Arc::clone(&semantic)),
            dreaming: Arc::new(ConsolidationEngine::new(
                Arc::clone(&long_term),
                dream_semantic,
            )),
            anchor: ContextAnchor::new(Arc::clone(&long_term), max_priority),
            episodic,
            semantic,
            long_term,
        })
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn episodic(&self) -> &EpisodicStore {
        &self.episodic
    }

    pub fn semantic(&self) -> &SemanticStore {
        &self.semantic
    }

    pub fn long_term(&self) -> &LongTermStore {
        &self.long_term
    }

    pub fn fusion(&self) -> &BrainFusion {
        &self.fusion
    }

    pub fn anchor(&self) -> &ContextAnchor {
        &self.anchor
    }

    /// Shared handle for the background scheduler.
    pub fn dreaming(&self) -> Arc<ConsolidationEngine> {
        Arc::clone(&self.dreaming)
    }

    /// Record a conversational turn: episodic (+ semantic) via fusion, and
    /// the long-term archive.
    pub fn store(&self, role: &str, text: &str) -> Result<()> {
        self.fusion.store(role, text)?;
        self.long_term.add(role, text)?;
        Ok(())
    }

    /// Keep `text` regardless of the knowledge heuristic.
    pub fn remember(&self, text: &str) -> Result<bool> {
        if text.trim().is_empty() {
            return Ok(false);
        }
        self.episodic.add(FORCED_ROLE, text, 1.0)?;
        self.semantic.add(text)?;
        self.long_term.add(FORCED_ROLE, text)?;
        Ok(true)
    }

    pub fn recall(&self, query: &str, limit: usize) -> Result<Vec<RecallHit>> {
        self.fusion.recall(query, limit)
    }

    pub fn search_long_term(&self, query: &str, limit: usize) -> Result<Vec<LongTermRecord>> {
        self.long_term.recall(query, limit)
    }

    pub fn recent_episodes(&self, limit: usize) -> Result<Vec<EpisodicRecord>> {
        self.episodic.recent(limit)
    }

    pub fn decay_episodic(&self, factor: f64) -> Result<usize> {
        self.episodic.decay(factor)
    }

    pub fn run_consolidation_cycle(&self, params: &DreamParams) -> Result<DreamReport> {
        self.dreaming.run_cycle(params)
    }

    pub fn reinforce(&self, keyword: &str, amount: f64) -> Result<usize> {
        self.anchor.reinforce(keyword, amount)
    }

    pub fn weaken_all(&self, factor: f64) -> Result<usize> {
        self.anchor.weaken_all(factor)
    }

    pub fn narrative(&self, limit: usize) -> Result<Option<String>> {
        self.long_term.narrative(limit)
    }

    pub fn forget(&self, query: &str) -> Result<usize> {
        self.long_term.forget(query)
    }

    pub fn backup(&self, dir: &Path) -> Result<BackupOutcome> {
        backup::daily_backup(&self.long_term, dir)
    }

    /// Wipe all three stores.
    pub fn clear(&self) -> Result<()> {
        self.episodic.clear()?;
        self.semantic.clear()?;
        self.long_term.clear()?;
        info!("cleared all memory stores");
        Ok(())
    }

    pub fn stats(&self) -> Result<MemoryStats> {
        Ok(MemoryStats {
            episodic: self.episodic.count()?,
            semantic: self.semantic.count()?,
            long_term: self.long_term.count()?,
        })
    }

    /// Build the system message injected ahead of the user's turn, or
    /// `None` when nothing relevant is remembered.
    pub fn assemble_context(&self, query: &str, limit: usize) -> Result<Option<Message>> {
        let hits = self.recall(query, limit)?;
        Ok(context_message(&hits))
    }
}

/// Render recall hits as a system message for the prompt.
pub fn context_message(hits: &[RecallHit]) -> Option<Message> {
    if hits.is_empty() {
        return None;
    }
    let lines: Vec<String> = hits
        .iter()
        .map(|h| format!("• {}", h.text.replace('\n', " ")))
        .collect();
    let text = format!(
        "You remember the following moments from earlier conversations:\n{}",
        lines.join("\n")
    );
    Some(Message::text("system", text))
}
