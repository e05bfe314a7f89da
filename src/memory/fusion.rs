use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use super::Result;
use super::episodic::EpisodicStore;
use super::semantic::{SemanticStore, TIMESTAMP_FORMAT};
use super::text::snippet;

/// Texts with fewer whitespace-separated words are not treated as knowledge.
pub const KNOWLEDGE_MIN_WORDS: usize = 3;

const SNIPPET_CHARS: usize = 120;

/// Which store a recall hit came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provenance {
    Episodic,
    Knowledge,
}

impl Provenance {
    pub fn as_str(self) -> &'static str {
        match self {
            Provenance::Episodic => "episodic",
            Provenance::Knowledge => "knowledge",
        }
    }
}

impl fmt::Display for Provenance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecallHit {
    pub provenance: Provenance,
    pub role: String,
    pub timestamp: String,
    pub text: String,
    pub snippet: String,
}

/// Whether a turn reads as a statement worth keeping as knowledge.
pub fn is_knowledge(text: &str) -> bool {
    text.split_whitespace().count() >= KNOWLEDGE_MIN_WORDS && !text.contains('?')
}

/// Single entry point for turn memory: writes fan out to the episodic and
/// semantic stores, recalls merge them back into one list.
#[derive(Clone)]
pub struct BrainFusion {
    episodic: Arc<EpisodicStore>,
    semantic: Arc<SemanticStore>,
}

impl BrainFusion {
    pub fn new(episodic: Arc<EpisodicStore>, semantic: Arc<SemanticStore>) -> Self {
        Self { episodic, semantic }
    }

    /// Always episodic; semantic too when [`is_knowledge`] holds.
    /// The two writes are not atomic: episodic may land without semantic.
    pub fn store(&self, role: &str, text: &str) -> Result<()> {
        self.episodic.add(role, text, 1.0)?;
        if is_knowledge(text) {
            self.semantic.add(text)?;
        }
        Ok(())
    }

    /// Episodic hits first, then semantic; exact-text duplicates collapse
    /// to their first occurrence.
    pub fn recall(&self, query: &str, limit: usize) -> Result<Vec<RecallHit>> {
        let episodes = self.episodic.recall(query, limit)?;
        let knowledge = self.semantic.search(query, limit)?;

        let episodic_hits = episodes.into_iter().map(|e| RecallHit {
            provenance: Provenance::Episodic,
            role: e.role,
            timestamp: e.timestamp.format(TIMESTAMP_FORMAT).to_string(),
            snippet: snippet(&e.text, SNIPPET_CHARS),
            text: e.text,
        });
        let knowledge_hits = knowledge.into_iter().map(|s| RecallHit {
            provenance: Provenance::Knowledge,
            role: "semantic".to_string(),
            timestamp: s.record.timestamp,
            snippet: snippet(&s.record.text, SNIPPET_CHARS),
            text: s.record.text,
        });

        let mut seen = HashSet::new();
        Ok(episodic_hits
            .chain(knowledge_hits)
            .filter(|hit| seen.insert(hit.text.clone()))
            .take(limit)
            .collect())
    }
}

