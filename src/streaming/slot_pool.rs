//! Sharded fixed-capacity slot pools with importance-based replacement
//!
//! The global capacity is split into one contiguous shard per worker thread.
//! A worker only admits into its own shard, so the hot insertion path never
//! contends with other workers; the per-shard mutex only guards against the
//! orchestrator's diagnostics reads.
//!
//! Admission scans at most `check_times` slots from the shard's rotating
//! cursor instead of the whole shard. Free and stale slots are taken on
//! sight; otherwise the [`OverrideMode`] decides which occupant, if any, to
//! replace. A successful admission swaps the claim table entry and writes the
//! slot under the same shard lock.

use std::ops::Range;
use std::sync::{Mutex, MutexGuard, PoisonError};

use super::claim_table::ClaimTable;
use super::config::OverrideMode;
use super::importance::NEAR_FIELD_IMPORTANCE;
use crate::voxel::{ChunkLocation, FrameStamp, PoolItem};

/// Outcome of an admission attempt
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AdmitResult {
    /// Written to `slot` (a global index), replacing `evicted` if the slot held a location
    Admitted {
        slot: usize,
        evicted: Option<ChunkLocation>,
    },
    /// No acceptable slot within the scan budget
    Rejected,
}

impl AdmitResult {
    pub fn is_admitted(&self) -> bool {
        matches!(self, AdmitResult::Admitted { .. })
    }

    pub fn slot(&self) -> Option<usize> {
        match self {
            AdmitResult::Admitted { slot, .. } => Some(*slot),
            AdmitResult::Rejected => None,
        }
    }
}

/// How a scan sees an existing slot
#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) enum Occupancy {
    /// Empty or stale, take it immediately
    Free,
    /// Held by an occupant of this importance
    Occupied(f32),
}

/// Pick a slot for a newcomer of `importance`.
///
/// Scans up to `check_times` slots starting at `cursor` and advances the
/// cursor past every slot examined.
pub(crate) fn find_slot<T>(
    slots: &[Option<T>],
    cursor: &mut usize,
    check_times: usize,
    importance: f32,
    mode: OverrideMode,
    mut classify: impl FnMut(&T) -> Occupancy,
) -> Option<usize> {
    let len = slots.len();
    if len == 0 {
        return None;
    }

    let budget = check_times.clamp(1, len);
    let mut best: Option<(usize, f32)> = None;
    let mut examined = 0;

    for step in 0..budget {
        let index = (*cursor + step) % len;
        examined = step + 1;

        let occupancy = match &slots[index] {
            None => Occupancy::Free,
            Some(occupant) => classify(occupant),
        };

        match occupancy {
            Occupancy::Free => {
                best = Some((index, f32::NEG_INFINITY));
                break;
            }
            Occupancy::Occupied(existing) => match mode {
                OverrideMode::FindLess => {
                    if existing < importance {
                        best = Some((index, existing));
                        break;
                    }
                }
                OverrideMode::FindMin => {
                    if existing < importance && best.is_none_or(|(_, b)| existing < b) {
                        best = Some((index, existing));
                    }
                }
                OverrideMode::OverrideMin => {
                    // Near-field occupants stay even when forced
                    if existing < NEAR_FIELD_IMPORTANCE && best.is_none_or(|(_, b)| existing < b) {
                        best = Some((index, existing));
                    }
                }
            },
        }
    }

    *cursor = (*cursor + examined) % len;
    best.map(|(index, _)| index)
}

/// Whether `stamp` predates the staleness floor
pub(crate) fn is_stale(stamp: FrameStamp, floor: Option<FrameStamp>) -> bool {
    floor.is_some_and(|floor| stamp.is_older_than(floor))
}

/// Split `capacity` slots into `shard_count` contiguous ranges
pub fn shard_ranges(capacity: usize, shard_count: usize) -> Vec<Range<usize>> {
    let n = shard_count.max(1);
    (0..n)
        .map(|i| capacity * i / n..capacity * (i + 1) / n)
        .collect()
}

pub(crate) struct Shard<T> {
    pub(crate) base: usize,
    pub(crate) slots: Vec<Option<T>>,
    pub(crate) cursor: usize,
}

impl<T> Shard<T> {
    pub(crate) fn new(range: Range<usize>) -> Self {
        let mut slots = Vec::with_capacity(range.len());
        slots.resize_with(range.len(), || None);
        Self {
            base: range.start,
            slots,
            cursor: 0,
        }
    }
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Read-only view of one locked shard, handed to admission callbacks
pub struct ShardView<'a, T> {
    base: usize,
    slots: &'a [Option<T>],
}

impl<T> ShardView<'_, T> {
    /// Item at a global slot index, if this shard owns the index and it is occupied
    pub fn get(&self, slot: usize) -> Option<&T> {
        slot.checked_sub(self.base)
            .and_then(|local| self.slots.get(local))
            .and_then(Option::as_ref)
    }

    /// Global slot range of the shard
    pub fn range(&self) -> Range<usize> {
        self.base..self.base + self.slots.len()
    }
}

/// What admission needs to know beyond the item itself
pub struct AdmitContext<'a> {
    pub claims: &'a ClaimTable,
    pub mode: OverrideMode,
    /// Occupants stamped before this are treated as free; `None` until the
    /// first invalidation
    pub stale_before: Option<FrameStamp>,
    /// Current importance of a resident location
    pub importance: &'a (dyn Fn(ChunkLocation) -> f32 + Sync),
}

/// Fixed-capacity pool of `T`, sharded by worker
pub struct ShardedSlotPool<T> {
    shards: Vec<Mutex<Shard<T>>>,
    ranges: Vec<Range<usize>>,
    capacity: usize,
    check_times: usize,
}

impl<T: PoolItem> ShardedSlotPool<T> {
    pub fn new(capacity: usize, shard_count: usize, check_times: usize) -> Self {
        let ranges = shard_ranges(capacity, shard_count);
        let shards = ranges
            .iter()
            .map(|r| Mutex::new(Shard::new(r.clone())))
            .collect();
        Self {
            shards,
            ranges,
            capacity,
            check_times: check_times.max(1),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    /// Global slot ranges, one per shard
    pub fn shard_ranges(&self) -> &[Range<usize>] {
        &self.ranges
    }

    fn shard(&self, shard: usize) -> MutexGuard<'_, Shard<T>> {
        assert!(
            shard < self.shards.len(),
            "shard {} out of range for pool with {} shards",
            shard,
            self.shards.len()
        );
        lock(&self.shards[shard])
    }

    /// Shard owning a global slot index.
    ///
    /// # Panics
    /// Panics if `slot` is past the pool capacity.
    pub fn shard_of(&self, slot: usize) -> usize {
        assert!(slot < self.capacity, "slot {} past pool capacity {}", slot, self.capacity);
        self.ranges
            .iter()
            .position(|r| r.contains(&slot))
            .unwrap_or(self.ranges.len() - 1)
    }

    /// Admit `item` into `shard`.
    ///
    /// On success the claim table entry moves from the evicted location to the
    /// item's location, the slot is written, and `on_written` runs with the
    /// shard still locked. On failure the item's `Computing` claim is released.
    pub fn try_admit<F>(
        &self,
        shard: usize,
        item: T,
        importance: f32,
        ctx: &AdmitContext<'_>,
        on_written: F,
    ) -> AdmitResult
    where
        F: FnOnce(usize, &ShardView<'_, T>),
    {
        let location = item.location();
        if !item.is_valid() {
            ctx.claims.release(location);
            return AdmitResult::Rejected;
        }

        let mut guard = self.shard(shard);
        let Shard { base, slots, cursor } = &mut *guard;

        let chosen = find_slot(slots, cursor, self.check_times, importance, ctx.mode, |occupant| {
            if is_stale(occupant.frame_stamp(), ctx.stale_before) {
                Occupancy::Free
            } else {
                Occupancy::Occupied((ctx.importance)(occupant.location()))
            }
        });

        let Some(local) = chosen else {
            drop(guard);
            ctx.claims.release(location);
            log::trace!("Rejected {:?} (importance {:.2}) in shard {}", location, importance, shard);
            return AdmitResult::Rejected;
        };

        let old = slots[local].as_ref().map(PoolItem::location);
        ctx.claims
            .remove_and_insert(old, location, item.resident_state());
        slots[local] = Some(item);

        let slot = *base + local;
        if let Some(evicted) = old {
            log::trace!("Evicted {:?} from slot {} for {:?}", evicted, slot, location);
        }

        let view = ShardView {
            base: *base,
            slots: slots.as_slice(),
        };
        on_written(slot, &view);

        AdmitResult::Admitted {
            slot,
            evicted: old.filter(|o| *o != location),
        }
    }

    /// Empty every slot stamped before `floor` and drop its claim.
    ///
    /// `on_evicted` runs with the shard still locked and receives the shard,
    /// the global slot and the evicted item. Returns the number of slots
    /// emptied.
    pub fn evict_stale(
        &self,
        floor: FrameStamp,
        claims: &ClaimTable,
        mut on_evicted: impl FnMut(usize, usize, &T),
    ) -> usize {
        let mut evicted = 0;
        for (index, shard) in self.shards.iter().enumerate() {
            let mut guard = lock(shard);
            let base = guard.base;
            for (local, slot) in guard.slots.iter_mut().enumerate() {
                if !slot
                    .as_ref()
                    .is_some_and(|item| item.frame_stamp().is_older_than(floor))
                {
                    continue;
                }
                if let Some(item) = slot.take() {
                    claims.remove_if(item.location(), item.resident_state());
                    on_evicted(index, base + local, &item);
                    evicted += 1;
                }
            }
        }
        evicted
    }

    /// Location and stamp held by a global slot
    pub fn slot_info(&self, slot: usize) -> Option<(ChunkLocation, FrameStamp)> {
        let guard = self.shard(self.shard_of(slot));
        guard.slots[slot - guard.base]
            .as_ref()
            .map(|item| (item.location(), item.frame_stamp()))
    }

    /// Run `f` against the item in a global slot
    pub fn with_slot<R>(&self, slot: usize, f: impl FnOnce(Option<&T>) -> R) -> R {
        let guard = self.shard(self.shard_of(slot));
        f(guard.slots[slot - guard.base].as_ref())
    }

    /// Occupied slot count per shard
    pub fn occupied_per_shard(&self) -> Vec<usize> {
        self.shards
            .iter()
            .map(|s| lock(s).slots.iter().filter(|slot| slot.is_some()).count())
            .collect()
    }

    /// Total occupied slots
    pub fn occupied(&self) -> usize {
        self.occupied_per_shard().iter().sum()
    }

    /// Every resident location with its slot and stamp
    pub fn resident(&self) -> Vec<(usize, ChunkLocation, FrameStamp)> {
        let mut out = Vec::new();
        for shard in &self.shards {
            let guard = lock(shard);
            for (i, slot) in guard.slots.iter().enumerate() {
                if let Some(item) = slot {
                    out.push((guard.base + i, item.location(), item.frame_stamp()));
                }
            }
        }
        out
    }

    #[cfg(test)]
    pub(crate) fn shard_len(&self, shard: usize) -> usize {
        self.shard(shard).slots.len()
    }
}
