//! GPU-facing block slots
//!
//! After a chunk lands in a slot, its visible blocks compete for slots in a
//! separate block pool sharded the same way as the chunk pool. An entry
//! remembers which chunk slot it came from and the stamp that chunk had, so a
//! block whose chunk has since been replaced is recognised as free without a
//! sweep.

use std::ops::Range;
use std::sync::Mutex;

use super::config::OverrideMode;
use super::gpu::GpuBlock;
use super::slot_pool::{Occupancy, Shard, ShardView, find_slot, is_stale, lock, shard_ranges};
use crate::voxel::{Block, Chunk, ChunkLocation, FrameStamp, PoolItem};

/// One resident block and the chunk generation it belongs to
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlockEntry {
    /// Global chunk slot the owning chunk occupied when the block was written
    pub chunk_slot: usize,
    pub chunk_location: ChunkLocation,
    pub chunk_stamp: FrameStamp,
    pub block: Block,
}

impl BlockEntry {
    /// Whether the owning chunk slot no longer holds the generation this block came from
    pub fn is_stale(&self, chunks: &ShardView<'_, Chunk>) -> bool {
        chunks.get(self.chunk_slot).is_none_or(|chunk| {
            chunk.location() != self.chunk_location || chunk.frame_stamp() != self.chunk_stamp
        })
    }

    pub fn to_gpu(&self) -> GpuBlock {
        GpuBlock::new(self.chunk_slot, &self.block, self.chunk_stamp)
    }
}

/// Counts from one chunk's block pass
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BlockPassReport {
    pub admitted: usize,
    pub culled: usize,
    pub rejected: usize,
}

/// Inputs a block pass shares with the chunk admission that triggered it
pub struct BlockPassContext<'a> {
    pub mode: OverrideMode,
    pub stale_before: Option<FrameStamp>,
    pub importance: &'a (dyn Fn(ChunkLocation) -> f32 + Sync),
}

pub struct BlockPool {
    shards: Vec<Mutex<Shard<BlockEntry>>>,
    ranges: Vec<Range<usize>>,
    capacity: usize,
    check_times: usize,
    cull_threshold: u32,
}

impl BlockPool {
    pub fn new(capacity: usize, shard_count: usize, check_times: usize, cull_threshold: u32) -> Self {
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
            cull_threshold,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn shard_ranges(&self) -> &[Range<usize>] {
        &self.ranges
    }

    /// Admit the visible blocks of the chunk now in `chunk_slot`.
    ///
    /// `chunks` is the locked chunk shard the slot belongs to. Interior blocks
    /// are culled. The pass stops at the first block that finds no slot, since
    /// every remaining block of the chunk has the same importance.
    /// `on_block` receives the global block slot and record for every write.
    pub fn admit_chunk_blocks(
        &self,
        shard: usize,
        chunk_slot: usize,
        chunks: &ShardView<'_, Chunk>,
        importance: f32,
        ctx: &BlockPassContext<'_>,
        mut on_block: impl FnMut(usize, GpuBlock),
    ) -> BlockPassReport {
        let mut report = BlockPassReport::default();
        if self.capacity == 0 {
            return report;
        }
        let Some(chunk) = chunks.get(chunk_slot) else {
            return report;
        };

        // Blocks of one chunk share an importance; forcing would evict siblings
        let mode = match ctx.mode {
            OverrideMode::OverrideMin => OverrideMode::FindMin,
            other => other,
        };

        let mut guard = lock(&self.shards[shard]);
        let Shard { base, slots, cursor } = &mut *guard;

        for block in &chunk.blocks {
            if chunk.is_interior(block.local(), self.cull_threshold) {
                report.culled += 1;
                continue;
            }

            let chosen = find_slot(slots, cursor, self.check_times, importance, mode, |entry| {
                if is_stale(entry.chunk_stamp, ctx.stale_before) || entry.is_stale(chunks) {
                    Occupancy::Free
                } else {
                    Occupancy::Occupied((ctx.importance)(entry.chunk_location))
                }
            });

            let Some(local) = chosen else {
                report.rejected += 1;
                break;
            };

            let entry = BlockEntry {
                chunk_slot,
                chunk_location: chunk.location(),
                chunk_stamp: chunk.frame_stamp(),
                block: *block,
            };
            slots[local] = Some(entry);
            on_block(*base + local, entry.to_gpu());
            report.admitted += 1;
        }

        if report.admitted > 0 || report.rejected > 0 {
            log::trace!(
                "Block pass for {:?}: {} admitted, {} culled, {} rejected",
                chunk.location(),
                report.admitted,
                report.culled,
                report.rejected
            );
        }
        report
    }

    /// Resident block entries per shard, stale ones included
    pub fn occupied(&self) -> usize {
        self.shards
            .iter()
            .map(|s| lock(s).slots.iter().filter(|e| e.is_some()).count())
            .sum()
    }

    /// Copy of the entry in a global block slot.
    ///
    /// # Panics
    /// Panics if `slot` is past the pool capacity.
    pub fn entry(&self, slot: usize) -> Option<BlockEntry> {
        assert!(slot < self.capacity, "block slot {} past capacity {}", slot, self.capacity);
        let shard = self
            .ranges
            .iter()
            .position(|r| r.contains(&slot))
            .unwrap_or(self.ranges.len() - 1);
        let guard = lock(&self.shards[shard]);
        guard.slots[slot - guard.base]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::streaming::claim_table::ClaimTable;
    use crate::streaming::slot_pool::{AdmitContext, ShardedSlotPool};
    use crate::voxel::ChunkState;
    use glam::IVec3;

    fn flat(scores: f32) -> impl Fn(ChunkLocation) -> f32 + Sync {
        move |_| scores
    }

    fn solid_chunk(location: IVec3, size: u8, stamp: u32) -> Chunk {
        let mut blocks = Vec::new();
        for x in 0..size {
            for y in 0..size {
                for z in 0..size {
                    blocks.push(Block::new(x, y, z));
                }
            }
        }
        let mut chunk = Chunk::new(location, blocks).with_frame_stamp(FrameStamp(stamp));
        chunk.build_occupancy(size as u32, 2);
        chunk
    }

    /// Admit `chunk` into a one-shard chunk pool and run the block pass inside the callback
    fn admit_with_blocks(
        chunks: &ShardedSlotPool<Chunk>,
        blocks: &BlockPool,
        claims: &ClaimTable,
        chunk: Chunk,
        written: &mut Vec<(usize, GpuBlock)>,
    ) -> BlockPassReport {
        let scores = flat(2.0);
        let ctx = AdmitContext {
            claims,
            mode: OverrideMode::FindMin,
            stale_before: None,
            importance: &scores,
        };
        let pass = BlockPassContext {
            mode: OverrideMode::FindMin,
            stale_before: None,
            importance: &scores,
        };
        claims.try_claim(chunk.location, ChunkState::Computing);
        let mut report = BlockPassReport::default();
        chunks.try_admit(0, chunk, 2.0, &ctx, |slot, view| {
            report = blocks.admit_chunk_blocks(0, slot, view, 2.0, &pass, |i, b| written.push((i, b)));
        });
        report
    }

    #[test]
    fn test_interior_blocks_culled() {
        let chunks = ShardedSlotPool::new(1, 1, 4);
        let blocks = BlockPool::new(1024, 1, 4, 1);
        let claims = ClaimTable::new();
        let mut written = Vec::new();

        let report = admit_with_blocks(&chunks, &blocks, &claims, solid_chunk(IVec3::ZERO, 4, 1), &mut written);

        // 4³ solid: the 2³ core survives one erosion
        assert_eq!(report.culled, 8);
        assert_eq!(report.admitted, 56);
        assert_eq!(written.len(), 56);
        assert!(written.iter().all(|(_, b)| b.chunk_index == 0 && b.frame_stamp == 1));
    }

    #[test]
    fn test_pass_stops_at_first_rejection() {
        let chunks = ShardedSlotPool::new(2, 1, 4);
        let blocks = BlockPool::new(10, 1, 4, 1);
        let claims = ClaimTable::new();
        let mut written = Vec::new();

        let first = admit_with_blocks(&chunks, &blocks, &claims, solid_chunk(IVec3::ZERO, 4, 1), &mut written);
        assert_eq!(first.admitted, 10);
        assert_eq!(first.rejected, 1);

        // Same importance: the second chunk cannot displace the first one's blocks
        let second = admit_with_blocks(&chunks, &blocks, &claims, solid_chunk(IVec3::X, 4, 1), &mut written);
        assert_eq!(second.admitted, 0);
        assert_eq!(second.rejected, 1);
    }

    #[test]
    fn test_replaced_chunk_blocks_are_free() {
        let chunks = ShardedSlotPool::new(1, 1, 4);
        let blocks = BlockPool::new(56, 1, 4, 1);
        let claims = ClaimTable::new();
        let mut written = Vec::new();

        admit_with_blocks(&chunks, &blocks, &claims, solid_chunk(IVec3::ZERO, 4, 1), &mut written);
        assert_eq!(blocks.occupied(), 56);

        // Same slot and location, newer stamp: every old block reads as stale
        claims.remove(IVec3::ZERO);
        let scores = flat(1.0);
        let ctx = AdmitContext {
            claims: &claims,
            mode: OverrideMode::FindMin,
            stale_before: Some(FrameStamp(2)),
            importance: &scores,
        };
        let pass = BlockPassContext {
            mode: OverrideMode::FindMin,
            stale_before: None,
            importance: &scores,
        };
        claims.try_claim(IVec3::ZERO, ChunkState::Computing);
        let mut report = BlockPassReport::default();
        let result = chunks.try_admit(0, solid_chunk(IVec3::ZERO, 4, 2), 1.0, &ctx, |slot, view| {
            if let Some(entry) = blocks.entry(0) {
                assert!(entry.is_stale(view));
            }
            report = blocks.admit_chunk_blocks(0, slot, view, 1.0, &pass, |_, _| {});
        });

        assert!(result.is_admitted());
        assert_eq!(report.admitted, 56);
        assert_eq!(report.rejected, 0);
        assert_eq!(blocks.entry(0).map(|e| e.chunk_stamp), Some(FrameStamp(2)));
    }

    #[test]
    fn test_zero_capacity_disables_pass() {
        let chunks = ShardedSlotPool::new(1, 1, 4);
        let blocks = BlockPool::new(0, 1, 4, 1);
        let claims = ClaimTable::new();
        let mut written = Vec::new();

        let report = admit_with_blocks(&chunks, &blocks, &claims, solid_chunk(IVec3::ZERO, 2, 1), &mut written);
        assert_eq!(report, BlockPassReport::default());
        assert!(written.is_empty());
    }
}
