use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use uuid::Uuid;

use crate::load::TableCounts;

/// Additive per-source counters. Conservation invariants:
/// read = accepted + rejected, and accepted = loaded + load_failed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SourceStats {
    pub read: u64,
    pub accepted: u64,
    pub rejected: u64,
    pub loaded: u64,
    pub load_failed: u64,
}

impl SourceStats {
    pub fn add(&mut self, other: &SourceStats) {
        self.read += other.read;
        self.accepted += other.accepted;
        self.rejected += other.rejected;
        self.loaded += other.loaded;
        self.load_failed += other.load_failed;
    }

    /// Records that never reached the store, whether the validator or the
    /// loader turned them away.
    pub fn total_rejected(&self) -> u64 {
        self.rejected + self.load_failed
    }
}

/// Observes every record outcome during a run and produces the end-of-run
/// summary. Single writer; only the orchestrator updates it.
pub struct RunReporter {
    run_id: Uuid,
    started: Instant,
    sources: BTreeMap<String, SourceStats>,
}

impl RunReporter {
    pub fn new() -> Self {
        Self {
            run_id: Uuid::now_v7(),
            started: Instant::now(),
            sources: BTreeMap::new(),
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn merge(&mut self, source: &str, stats: SourceStats) {
        self.sources.entry(source.to_owned()).or_default().add(&stats);
    }

    pub fn summarize(&self, table_counts: Option<TableCounts>) -> RunSummary {
        let mut totals = SourceStats::default();
        for stats in self.sources.values() {
            totals.add(stats);
        }

        RunSummary {
            run_id: self.run_id,
            duration: self.started.elapsed(),
            totals,
            sources: self.sources.clone(),
            table_counts,
        }
    }
}

impl Default for RunReporter {
    fn default() -> Self {
        Self::new()
    }
}

/// Counters and timing for one pipeline run. Recomputed fresh each run and
/// not persisted beyond the log.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub duration: Duration,
    pub totals: SourceStats,
    pub sources: BTreeMap<String, SourceStats>,
    pub table_counts: Option<TableCounts>,
}
