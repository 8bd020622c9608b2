//! Streaming counters and per-frame reports

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Timer names recorded by the engine
pub mod timers {
    pub const DESIRED_QUERY: &str = "desired_query";
    pub const SYNC_GENERATE: &str = "sync_generate_per_chunk";
    pub const DISPATCH: &str = "dispatch_per_chunk";
    pub const APPLY_MUTATIONS: &str = "apply_mutations";
}

/// Cumulative engine counters
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamingStats {
    /// Size of the most recent desired set
    pub desired: u64,
    pub dispatched_synced: u64,
    pub dispatched_pooled: u64,
    /// Desired locations already tracked when reached
    pub already_tracked: u64,
    /// Claimed locations handed back for a later frame
    pub deferred: u64,
    pub chunks_admitted: u64,
    pub chunks_rejected: u64,
    pub chunks_evicted: u64,
    pub empties_admitted: u64,
    pub empties_rejected: u64,
    pub empties_evicted: u64,
    pub blocks_admitted: u64,
    pub blocks_culled: u64,
    pub blocks_rejected: u64,
    /// Loads that panicked and had their claim released
    pub generation_failures: u64,
    pub mutations_applied: u64,
    pub uploads: u64,
}

/// Lock-free counterpart of [`StreamingStats`], shared with workers
#[derive(Debug, Default)]
pub(crate) struct StatCounters {
    pub desired: AtomicU64,
    pub dispatched_synced: AtomicU64,
    pub dispatched_pooled: AtomicU64,
    pub already_tracked: AtomicU64,
    pub deferred: AtomicU64,
    pub chunks_admitted: AtomicU64,
    pub chunks_rejected: AtomicU64,
    pub chunks_evicted: AtomicU64,
    pub empties_admitted: AtomicU64,
    pub empties_rejected: AtomicU64,
    pub empties_evicted: AtomicU64,
    pub blocks_admitted: AtomicU64,
    pub blocks_culled: AtomicU64,
    pub blocks_rejected: AtomicU64,
    pub generation_failures: AtomicU64,
    pub mutations_applied: AtomicU64,
    pub uploads: AtomicU64,
}

impl StatCounters {
    pub fn add(counter: &AtomicU64, n: usize) {
        if n > 0 {
            counter.fetch_add(n as u64, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> StreamingStats {
        let get = |c: &AtomicU64| c.load(Ordering::Relaxed);
        StreamingStats {
            desired: get(&self.desired),
            dispatched_synced: get(&self.dispatched_synced),
            dispatched_pooled: get(&self.dispatched_pooled),
            already_tracked: get(&self.already_tracked),
            deferred: get(&self.deferred),
            chunks_admitted: get(&self.chunks_admitted),
            chunks_rejected: get(&self.chunks_rejected),
            chunks_evicted: get(&self.chunks_evicted),
            empties_admitted: get(&self.empties_admitted),
            empties_rejected: get(&self.empties_rejected),
            empties_evicted: get(&self.empties_evicted),
            blocks_admitted: get(&self.blocks_admitted),
            blocks_culled: get(&self.blocks_culled),
            blocks_rejected: get(&self.blocks_rejected),
            generation_failures: get(&self.generation_failures),
            mutations_applied: get(&self.mutations_applied),
            uploads: get(&self.uploads),
        }
    }
}

/// What one loading-queue update did
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameReport {
    /// Whether the desired queue was rebuilt this update
    pub rebuilt_queue: bool,
    /// Locations still queued after the update
    pub queued: usize,
    pub dispatched_synced: usize,
    pub dispatched_pooled: usize,
    pub already_tracked: usize,
    /// Claimed but undispatched locations pushed back for the next update
    pub deferred: usize,
}

impl FrameReport {
    pub fn dispatched(&self) -> usize {
        self.dispatched_synced + self.dispatched_pooled
    }
}

/// Resident location counts, as tracked by the claim table and the pools
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResidentCounts {
    pub computing: usize,
    pub chunks: usize,
    pub empty_chunks: usize,
    pub blocks: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_snapshot() {
        let counters = StatCounters::default();
        StatCounters::add(&counters.chunks_admitted, 3);
        StatCounters::add(&counters.chunks_admitted, 2);
        StatCounters::add(&counters.deferred, 0);
        counters.desired.store(40, Ordering::Relaxed);

        let stats = counters.snapshot();
        assert_eq!(stats.chunks_admitted, 5);
        assert_eq!(stats.deferred, 0);
        assert_eq!(stats.desired, 40);
    }

    #[test]
    fn test_stats_serialize() {
        let stats = StreamingStats { uploads: 7, ..Default::default() };
        let json = serde_json::to_string(&stats).unwrap();
        assert!(json.contains("\"uploads\":7"));
        let back: StreamingStats = serde_json::from_str(&json).unwrap();
        assert_eq!(back, stats);
    }

    #[test]
    fn test_frame_report_dispatched() {
        let report = FrameReport { dispatched_synced: 2, dispatched_pooled: 5, ..Default::default() };
        assert_eq!(report.dispatched(), 7);
    }
}
