use std::sync::Arc;
use tracing::debug;

use super::long_term::LongTermStore;
use super::{Result, check_factor};

pub const DEFAULT_REINFORCE_AMOUNT: f64 = 1.1;
pub const DEFAULT_WEAKEN_FACTOR: f64 = 0.999;
pub const DEFAULT_MAX_PRIORITY: f64 = 10.0;

/// Manual, out-of-band priority adjustments on the long-term store.
pub struct ContextAnchor {
    long_term: Arc<LongTermStore>,
    max_priority: f64,
}

impl ContextAnchor {
    pub fn new(long_term: Arc<LongTermStore>, max_priority: f64) -> Self {
        Self {
            long_term,
            max_priority,
        }
    }

    /// Multiply the priority of every record whose keywords contain
    /// `keyword` (case-insensitive) by `amount`, capped at the configured
    /// maximum. A blank keyword touches nothing.
    pub fn reinforce(&self, keyword: &str, amount: f64) -> Result<usize> {
        check_factor(amount)?;
        let keyword = keyword.trim();
        if keyword.is_empty() {
            return Ok(0);
        }
        let n = self
            .long_term
            .scale_matching(keyword, amount, self.max_priority)?;
        debug!(keyword, amount, rows = n, "reinforced");
        Ok(n)
    }

    /// Multiply every long-term priority by `factor`.
    pub fn weaken_all(&self, factor: f64) -> Result<usize> {
        check_factor(factor)?;
        let n = self.long_term.scale_all(factor)?;
        debug!(factor, rows = n, "weakened all");
        Ok(n)
    }
}
