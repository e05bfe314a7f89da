//! Consolidation ("dreaming"): a single-shot batch job that folds a window of
//! long-term records into per-category semantic summaries, then ages and
//! prunes the long-term store.
//!
//! Cycle:
//! 1. select records newer than `hours_back`, newest first, at most `max_episodes`
//! 2. bucket them by category, re-derived from content
//! 3. write one `[Dream:<category>]` summary per bucket to semantic memory
//! 4. decay every long-term priority
//! 5. purge records that are old AND weak
//! 6. write a `[Dream:meta]` entry and report
//!
//! Step 3 commits before steps 4 and 5 (one transaction each), so decay is never
//! applied without its summaries. Summaries are idempotent under re-runs;
//! decay and purge are not.

use chrono::Duration;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::long_term::LongTermStore;
use super::semantic::SemanticStore;
use super::text::{compress_block, snippet};
use super::{Result, check_factor};

/// Bucket summaries are cut to this many characters.
pub const SUMMARY_MAX_CHARS: usize = 400;

const REPORT_SNIPPET_CHARS: usize = 80;

/// Tag prefixed to every summary written by a cycle.
pub fn dream_tag(category: &str) -> String {
    format!("[Dream:{category}]")
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DreamParams {
    pub hours_back: u32,
    pub max_episodes: usize,
    pub decay_factor: f64,
    pub delete_threshold: f64,
    pub retention_days: u32,
}

impl Default for DreamParams {
    fn default() -> Self {
        Self {
            hours_back: 24,
            max_episodes: 300,
            decay_factor: 0.997,
            delete_threshold: 0.02,
            retention_days: 7,
        }
    }
}

/// What one cycle did.
#[derive(Debug, Clone, PartialEq)]
pub struct DreamReport {
    pub hours_back: u32,
    pub selected: usize,
    /// `(category, summary)` in bucket order.
    pub summaries: Vec<(String, String)>,
    pub decayed: usize,
    pub purged: usize,
}

impl DreamReport {
    pub fn is_empty(&self) -> bool {
        self.selected == 0
    }

    pub fn categories(&self) -> impl Iterator<Item = &str> {
        self.summaries.iter().map(|(c, _)| c.as_str())
    }
}

impl fmt::Display for DreamReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return write!(
                f,
                "Nothing to consolidate: no episodes in the last {}h.",
                self.hours_back
            );
        }
        write!(
            f,
            "Dreaming complete ({} episodes, {} decayed, {} purged):",
            self.selected, self.decayed, self.purged
        )?;
        for (category, summary) in &self.summaries {
            write!(
                f,
                "\n  • {category}: {}",
                snippet(summary, REPORT_SNIPPET_CHARS)
            )?;
        }
        Ok(())
    }
}

/// Runs dreaming cycles against one long-term store, writing summaries into
/// its own semantic handle.
pub struct ConsolidationEngine {
    long_term: Arc<LongTermStore>,
    semantic: Arc<SemanticStore>,
}

impl ConsolidationEngine {
    pub fn new(long_term: Arc<LongTermStore>, semantic: Arc<SemanticStore>) -> Self {
        Self {
            long_term,
            semantic,
        }
    }

    /// Run one cycle. Fails with [`super::MemoryError::ConsolidationBusy`]
    /// if another cycle holds this long-term store.
    pub fn run_cycle(&self, params: &DreamParams) -> Result<DreamReport> {
        check_factor(params.decay_factor)?;
        let _cycle = self.long_term.try_begin_cycle()?;
        let started = Instant::now();

        let now = self.long_term.clock().now();
        let since = now - Duration::hours(i64::from(params.hours_back));
        let rows = self.long_term.window(since, params.max_episodes)?;

        let mut report = DreamReport {
            hours_back: params.hours_back,
            selected: rows.len(),
            summaries: Vec::new(),
            decayed: 0,
            purged: 0,
        };
        if rows.is_empty() {
            info!(hours_back = params.hours_back, "dreaming: nothing to consolidate");
            return Ok(report);
        }

        let taxonomy = self.long_term.taxonomy();
        let mut buckets: Vec<(String, Vec<&str>)> = Vec::new();
        for row in &rows {
            let category = taxonomy.detect(&row.content);
            match buckets.iter_mut().find(|(c, _)| c.as_str() == category) {
                Some((_, texts)) => texts.push(row.content.as_str()),
                None => buckets.push((category.to_string(), vec![row.content.as_str()])),
            }
        }

        for (category, texts) in buckets {
            let summary = compress_block(texts, SUMMARY_MAX_CHARS);
            if summary.is_empty() {
                continue;
            }
            let dream = format!("{} {summary}", dream_tag(&category));
            report.summaries.push((category, dream));
        }

        let dreams: Vec<&str> = report.summaries.iter().map(|(_, d)| d.as_str()).collect();
        let written = self.semantic.add_many(&dreams)?;
        debug!(buckets = dreams.len(), written, "dreaming: summaries stored");

        let maintenance = self.long_term.decay_and_purge(
            params.decay_factor,
            Duration::days(i64::from(params.retention_days)),
            params.delete_threshold,
        )?;
        report.decayed = maintenance.decayed;
        report.purged = maintenance.purged;

        let touched = report.categories().collect::<Vec<_>>().join(", ");
        let meta = format!(
            "{} Consolidation complete. Categories in the last {}h: {}.",
            dream_tag("meta"),
            params.hours_back,
            if touched.is_empty() { "none" } else { touched.as_str() }
        );
        self.semantic.add(&meta)?;

        info!(
            selected = report.selected,
            categories = report.summaries.len(),
            decayed = report.decayed,
            purged = report.purged,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "dreaming cycle complete"
        );
        Ok(report)
    }
}

/// Runs dreaming on a fixed interval until cancelled.
pub struct DreamScheduler {
    engine: Arc<ConsolidationEngine>,
    params: DreamParams,
    interval: std::time::Duration,
    shutdown: CancellationToken,
}

impl DreamScheduler {
    pub fn new(
        engine: Arc<ConsolidationEngine>,
        params: DreamParams,
        interval: std::time::Duration,
    ) -> Self {
        Self {
            engine,
            params,
            interval,
            shutdown: CancellationToken::new(),
        }
    }

    /// Handle that stops the loop when cancelled.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn start(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move { self.run().await })
    }

    async fn run(self) {
        info!(
            interval_secs = self.interval.as_secs(),
            hours_back = self.params.hours_back,
            "starting dream scheduler"
        );
        let mut tick = tokio::time::interval(self.interval);
        // the first tick fires immediately; dreaming starts one interval in
        tick.tick().await;

        loop {
            tokio::select! {
                _ = tick.tick() => {
                    let engine = Arc::clone(&self.engine);
                    let params = self.params;
                    match tokio::task::spawn_blocking(move || engine.run_cycle(&params)).await {
                        Ok(Ok(report)) => debug!(selected = report.selected, "scheduled dream finished"),
                        Ok(Err(e)) => warn!("scheduled dream failed: {e}"),
                        Err(e) => warn!("scheduled dream panicked: {e}"),
                    }
                }
                _ = self.shutdown.cancelled() => {
                    info!("dream scheduler stopped");
                    break;
                }
            }
        }
    }
}
