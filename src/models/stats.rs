// src/models/stats.rs

use std::ops::AddAssign;

use crate::error::Result;

/// Counters of one crawl, merged bottom-up from every sub-tree.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CrawlStats {
    /// Records handed to the queue
    pub records: usize,
    /// Artifacts skipped because their metadata is not published yet
    pub incomplete: usize,
    /// Artifacts dropped by record validation
    pub invalid: usize,
    /// Sub-trees abandoned after a fetch failure
    pub branch_failures: usize,
}

impl CrawlStats {
    /// Fold the outcome of one branch, logging it if it failed.
    pub fn absorb(&mut self, result: Result<CrawlStats>, context: &str) {
        match result {
            Ok(stats) => *self += stats,
            Err(error) => {
                self.branch_failures += 1;
                log::warn!("Crawl of {} failed: {}", context, error);
            }
        }
    }
}

impl AddAssign for CrawlStats {
    fn add_assign(&mut self, other: Self) {
        self.records += other.records;
        self.incomplete += other.incomplete;
        self.invalid += other.invalid;
        self.branch_failures += other.branch_failures;
    }
}
