//! Claim table: which locations are tracked, and in what state
//!
//! The table is the single source of truth for "is this location in flight or
//! resident". A location is claimed as `Computing` before generation starts,
//! resolved to `NonEmpty`/`Empty` when a slot accepts it, and dropped when it
//! is evicted or its admission fails.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::voxel::{ChunkLocation, ChunkState};

/// Thread-safe map from chunk location to claim state
#[derive(Debug, Default)]
pub struct ClaimTable {
    entries: Mutex<HashMap<ChunkLocation, ChunkState>>,
}

impl ClaimTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(HashMap::with_capacity(capacity)),
        }
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<ChunkLocation, ChunkState>> {
        // A panicking holder cannot leave the map half-updated
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Claim `location` with `state` if nobody tracks it yet.
    ///
    /// Returns false and leaves the table unchanged when already present.
    pub fn try_claim(&self, location: ChunkLocation, state: ChunkState) -> bool {
        debug_assert!(state != ChunkState::Unclaimed, "cannot claim as Unclaimed");
        let mut entries = self.entries();
        if entries.contains_key(&location) {
            return false;
        }
        entries.insert(location, state);
        true
    }

    /// Current state, `Unclaimed` when absent
    pub fn state(&self, location: ChunkLocation) -> ChunkState {
        self.entries()
            .get(&location)
            .copied()
            .unwrap_or(ChunkState::Unclaimed)
    }

    pub fn contains(&self, location: ChunkLocation) -> bool {
        self.entries().contains_key(&location)
    }

    /// Drop a location regardless of state
    pub fn remove(&self, location: ChunkLocation) -> Option<ChunkState> {
        self.entries().remove(&location)
    }

    /// Drop a location only if it is still `Computing`.
    ///
    /// Used to hand back claims that were never dispatched or admitted.
    pub fn release(&self, location: ChunkLocation) -> bool {
        self.remove_if(location, ChunkState::Computing)
    }

    /// Drop a location only if it is tracked as `state`
    pub fn remove_if(&self, location: ChunkLocation, state: ChunkState) -> bool {
        let mut entries = self.entries();
        if entries.get(&location) == Some(&state) {
            entries.remove(&location);
            true
        } else {
            false
        }
    }

    /// Atomically retire `old` (if any) and record `new` as `state`.
    ///
    /// No other thread can observe the table with `old` gone but `new` not
    /// yet resolved.
    pub fn remove_and_insert(
        &self,
        old: Option<ChunkLocation>,
        new: ChunkLocation,
        state: ChunkState,
    ) {
        let mut entries = self.entries();
        if let Some(old) = old {
            if old != new {
                entries.remove(&old);
            }
        }
        entries.insert(new, state);
    }

    /// Number of tracked locations
    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    /// Copy of the whole table
    pub fn get_copy(&self) -> HashMap<ChunkLocation, ChunkState> {
        self.entries().clone()
    }

    /// Number of entries in each state: (computing, non_empty, empty)
    pub fn count_by_state(&self) -> (usize, usize, usize) {
        let entries = self.entries();
        let mut counts = (0, 0, 0);
        for state in entries.values() {
            match state {
                ChunkState::Computing => counts.0 += 1,
                ChunkState::NonEmpty => counts.1 += 1,
                ChunkState::Empty => counts.2 += 1,
                ChunkState::Unclaimed => {}
            }
        }
        counts
    }
}
