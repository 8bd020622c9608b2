//! Mutation pipeline: worker slot writes to one consistent consumer snapshot
//!
//! Workers describe every slot write as a [`ModifyRecord`] and push it into
//! their shard's [`DoubleBufferQueue`]. Once per frame the consumer swaps and
//! drains every queue, applies the batch to the back copy of a
//! [`SnapshotMirror`], flips the copies and replays the batch onto the new
//! back copy. Readers only ever see the front copy, which always holds whole
//! batches.

use std::sync::atomic::{AtomicBool, Ordering};

use super::double_buffer::DoubleBufferQueue;
use super::gpu::{GpuBlock, GpuChunkData, GpuInstanceData, PoolPartitions, SnapshotUpload};
use crate::voxel::FrameStamp;

/// One slot write, as seen by the consumer
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ModifyRecord {
    /// Chunk slot `slot` now holds `chunk`
    Chunk {
        slot: usize,
        chunk: GpuChunkData,
        instance: GpuInstanceData,
    },
    /// Empty-chunk slot `slot` now holds the location in `instance`
    EmptyChunk {
        slot: usize,
        instance: GpuInstanceData,
    },
    /// Block slot `slot` now holds `block`
    Block { slot: usize, block: GpuBlock },
}

/// Flat arrays mirrored for upload
#[derive(Clone, Debug, PartialEq)]
pub struct MirrorBuffers {
    /// Chunk instances followed by empty-chunk instances
    pub instances: Vec<GpuInstanceData>,
    pub chunks: Vec<GpuChunkData>,
    pub blocks: Vec<GpuBlock>,
}

impl MirrorBuffers {
    fn new(chunk_capacity: usize, empty_capacity: usize, block_capacity: usize) -> Self {
        Self {
            instances: vec![GpuInstanceData::default(); chunk_capacity + empty_capacity],
            chunks: vec![GpuChunkData::INVALID; chunk_capacity],
            blocks: vec![GpuBlock::INVALID; block_capacity],
        }
    }

    /// # Panics
    /// Panics if the record addresses a slot outside its array.
    fn apply(&mut self, record: &ModifyRecord) {
        let chunk_capacity = self.chunks.len();
        match *record {
            ModifyRecord::Chunk { slot, chunk, instance } => {
                assert!(slot < chunk_capacity, "chunk slot {} past capacity {}", slot, chunk_capacity);
                self.chunks[slot] = chunk;
                self.instances[slot] = instance;
            }
            ModifyRecord::EmptyChunk { slot, instance } => {
                let index = chunk_capacity + slot;
                assert!(
                    index < self.instances.len(),
                    "empty chunk slot {} past capacity {}",
                    slot,
                    self.instances.len() - chunk_capacity
                );
                self.instances[index] = instance;
            }
            ModifyRecord::Block { slot, block } => {
                assert!(slot < self.blocks.len(), "block slot {} past capacity {}", slot, self.blocks.len());
                self.blocks[slot] = block;
            }
        }
    }
}

/// Consumer-owned double copy of the uploaded arrays
pub struct SnapshotMirror {
    front: MirrorBuffers,
    back: MirrorBuffers,
    partitions: PoolPartitions,
    frame: FrameStamp,
}

impl SnapshotMirror {
    pub fn new(
        chunk_capacity: usize,
        empty_capacity: usize,
        block_capacity: usize,
        partitions: PoolPartitions,
    ) -> Self {
        let buffers = MirrorBuffers::new(chunk_capacity, empty_capacity, block_capacity);
        Self {
            front: buffers.clone(),
            back: buffers,
            partitions,
            frame: FrameStamp::default(),
        }
    }

    /// Apply a whole batch and publish it as the front copy
    pub fn apply_batch(&mut self, records: &[ModifyRecord], frame: FrameStamp) {
        for record in records {
            self.back.apply(record);
        }
        std::mem::swap(&mut self.front, &mut self.back);
        for record in records {
            self.back.apply(record);
        }
        self.frame = frame;
    }

    /// Reader-visible copy
    pub fn front(&self) -> &MirrorBuffers {
        &self.front
    }

    /// Frame of the last published batch
    pub fn frame(&self) -> FrameStamp {
        self.frame
    }

    pub fn partitions(&self) -> &PoolPartitions {
        &self.partitions
    }

    /// Byte view of the front copy
    pub fn snapshot(&self) -> SnapshotUpload<'_> {
        SnapshotUpload {
            frame: self.frame,
            instances: bytemuck::cast_slice(&self.front.instances),
            chunks: bytemuck::cast_slice(&self.front.chunks),
            blocks: bytemuck::cast_slice(&self.front.blocks),
            partitions: &self.partitions,
        }
    }

    #[cfg(test)]
    fn copies_match(&self) -> bool {
        self.front == self.back
    }
}

/// Per-shard record queues plus a dirty flag
pub struct MutationPipeline {
    queues: Vec<DoubleBufferQueue<ModifyRecord>>,
    dirty: AtomicBool,
}

impl MutationPipeline {
    pub fn new(shard_count: usize) -> Self {
        Self {
            queues: (0..shard_count.max(1)).map(|_| DoubleBufferQueue::new()).collect(),
            dirty: AtomicBool::new(false),
        }
    }

    pub fn shard_count(&self) -> usize {
        self.queues.len()
    }

    /// Queue a record from `shard`'s worker.
    ///
    /// The dirty flag is raised after the push, so a consumer that sees the
    /// flag also sees the record.
    pub fn push(&self, shard: usize, record: ModifyRecord) {
        self.queues[shard].push(record);
        self.dirty.store(true, Ordering::Release);
    }

    /// Queue records that must be published together, such as a chunk and
    /// its blocks. A collect sees either all of them or none.
    pub fn push_batch(&self, shard: usize, records: Vec<ModifyRecord>) {
        if records.is_empty() {
            return;
        }
        self.queues[shard].push_many(records);
        self.dirty.store(true, Ordering::Release);
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    /// Swap and drain every queue if anything was pushed since the last collect.
    ///
    /// Records pushed during the drain stay queued and re-raise the flag.
    pub fn collect(&self) -> Option<Vec<ModifyRecord>> {
        if self
            .dirty
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return None;
        }

        let mut batch = Vec::new();
        for queue in &self.queues {
            batch.extend(queue.swap_and_drain());
        }
        Some(batch)
    }

    /// Collect and publish into `mirror`. Returns the number of records applied.
    pub fn apply(&self, mirror: &mut SnapshotMirror, frame: FrameStamp) -> Option<usize> {
        let batch = self.collect()?;
        mirror.apply_batch(&batch, frame);
        Some(batch.len())
    }
}
