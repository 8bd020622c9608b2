//! GPU-facing records and the upload interface
//!
//! These are the flat, `#[repr(C)]` layouts a renderer copies into storage
//! buffers. The streaming engine only produces them; uploading is the job of
//! an [`UploadSink`] supplied by the caller.

use std::ops::Range;

use bytemuck::{Pod, Zeroable};

use crate::voxel::{Block, ChunkLocation, FrameStamp};

/// Per-slot instance transform, used for chunk wireframes and debug views
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct GpuInstanceData {
    /// World-space position of the chunk's minimum corner
    pub position: [f32; 3],
    /// Uniform scale
    pub scale: f32,
    /// Chunk grid location
    pub chunk_location: [i32; 3],
    /// Free-form marker (0 = chunk, 1 = empty chunk)
    pub marker: f32,
    /// Rotation quaternion (w, x, y, z)
    pub rotation: [f32; 4],
}

impl GpuInstanceData {
    /// Instance for a resident location
    pub fn for_location(location: ChunkLocation, chunk_size: f32, marker: f32) -> Self {
        Self {
            position: (location.as_vec3() * chunk_size).to_array(),
            scale: chunk_size,
            chunk_location: location.to_array(),
            marker,
            rotation: [1.0, 0.0, 0.0, 0.0],
        }
    }
}

impl Default for GpuInstanceData {
    fn default() -> Self {
        Self {
            position: [0.0; 3],
            scale: 0.0,
            chunk_location: [i32::MAX; 3],
            marker: 0.0,
            rotation: [1.0, 0.0, 0.0, 0.0],
        }
    }
}

/// Chunk table entry: which location a chunk slot holds, and since when
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Pod, Zeroable)]
pub struct GpuChunkData {
    pub chunk_location: [i32; 3],
    pub frame_stamp: u32,
}

impl GpuChunkData {
    /// Marks a slot that has never held a chunk
    pub const INVALID: Self = Self {
        chunk_location: [i32::MAX; 3],
        frame_stamp: 0,
    };

    pub fn new(location: ChunkLocation, stamp: FrameStamp) -> Self {
        Self {
            chunk_location: location.to_array(),
            frame_stamp: stamp.value(),
        }
    }
}

impl Default for GpuChunkData {
    fn default() -> Self {
        Self::INVALID
    }
}

/// Block table entry.
///
/// A consumer treats the entry as stale when `frame_stamp` differs from the
/// chunk table entry at `chunk_index`.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Pod, Zeroable)]
pub struct GpuBlock {
    /// Global chunk slot index of the owning chunk
    pub chunk_index: u32,
    /// Local block coordinate packed as x | y << 8 | z << 16
    pub block_location: u32,
    /// Frame stamp of the owning chunk when the block was written
    pub frame_stamp: u32,
}

impl GpuBlock {
    pub const INVALID: Self = Self {
        chunk_index: u32::MAX,
        block_location: u32::MAX,
        frame_stamp: 0,
    };

    pub fn new(chunk_index: usize, block: &Block, stamp: FrameStamp) -> Self {
        Self {
            chunk_index: chunk_index as u32,
            block_location: block.packed_location(),
            frame_stamp: stamp.value(),
        }
    }
}

impl Default for GpuBlock {
    fn default() -> Self {
        Self::INVALID
    }
}

/// Byte ranges of each shard within the three uploaded arrays
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PoolPartitions {
    /// Instance array: chunk shards, then empty-chunk shards
    pub instances: Vec<Range<usize>>,
    /// Chunk table, one range per chunk shard
    pub chunks: Vec<Range<usize>>,
    /// Block table, one range per block shard
    pub blocks: Vec<Range<usize>>,
}

impl PoolPartitions {
    /// Convert slot ranges to byte ranges.
    ///
    /// Empty-chunk instances follow the `chunk_capacity` chunk instances.
    pub fn from_slot_ranges(
        chunk_ranges: &[Range<usize>],
        empty_ranges: &[Range<usize>],
        block_ranges: &[Range<usize>],
        chunk_capacity: usize,
    ) -> Self {
        let bytes = |ranges: &[Range<usize>], base: usize, size: usize| -> Vec<Range<usize>> {
            ranges
                .iter()
                .map(|r| (base + r.start) * size..(base + r.end) * size)
                .collect()
        };
        let instance_size = std::mem::size_of::<GpuInstanceData>();

        let mut instances = bytes(chunk_ranges, 0, instance_size);
        instances.extend(bytes(empty_ranges, chunk_capacity, instance_size));

        Self {
            instances,
            chunks: bytes(chunk_ranges, 0, std::mem::size_of::<GpuChunkData>()),
            blocks: bytes(block_ranges, 0, std::mem::size_of::<GpuBlock>()),
        }
    }
}

/// One consistent snapshot, as handed to an [`UploadSink`]
#[derive(Clone, Copy, Debug)]
pub struct SnapshotUpload<'a> {
    /// Frame the snapshot was published in
    pub frame: FrameStamp,
    /// `GpuInstanceData` array as bytes
    pub instances: &'a [u8],
    /// `GpuChunkData` array as bytes
    pub chunks: &'a [u8],
    /// `GpuBlock` array as bytes
    pub blocks: &'a [u8],
    pub partitions: &'a PoolPartitions,
}

/// Receives each published snapshot
pub trait UploadSink {
    fn upload(&mut self, snapshot: &SnapshotUpload<'_>);
}

/// Sink that discards snapshots
#[derive(Clone, Copy, Debug, Default)]
pub struct NullSink;

impl UploadSink for NullSink {
    fn upload(&mut self, _snapshot: &SnapshotUpload<'_>) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::IVec3;

    #[test]
    fn test_record_sizes() {
        assert_eq!(std::mem::size_of::<GpuInstanceData>(), 48);
        assert_eq!(std::mem::size_of::<GpuChunkData>(), 16);
        assert_eq!(std::mem::size_of::<GpuBlock>(), 12);
    }

    #[test]
    fn test_instance_for_location() {
        let inst = GpuInstanceData::for_location(IVec3::new(1, -2, 3), 16.0, 1.0);
        assert_eq!(inst.position, [16.0, -32.0, 48.0]);
        assert_eq!(inst.chunk_location, [1, -2, 3]);
        assert_eq!(inst.scale, 16.0);
        assert_eq!(inst.marker, 1.0);
    }

    #[test]
    fn test_gpu_block_packing() {
        let block = GpuBlock::new(7, &Block::new(1, 2, 3), FrameStamp(9));
        assert_eq!(block.chunk_index, 7);
        assert_eq!(block.block_location, 0x0003_0201);
        assert_eq!(block.frame_stamp, 9);
    }

    #[test]
    fn test_partitions() {
        let parts = PoolPartitions::from_slot_ranges(&[0..2, 2..4], &[0..3], &[0..5], 4);
        assert_eq!(parts.instances, vec![0..96, 96..192, 192..336]);
        assert_eq!(parts.chunks, vec![0..32, 32..64]);
        assert_eq!(parts.blocks, vec![0..60]);
    }

    struct CountingSink {
        uploads: usize,
        last_frame: Option<FrameStamp>,
    }

    impl UploadSink for CountingSink {
        fn upload(&mut self, snapshot: &SnapshotUpload<'_>) {
            self.uploads += 1;
            self.last_frame = Some(snapshot.frame);
        }
    }

    #[test]
    fn test_sink_receives_snapshot() {
        let partitions = PoolPartitions::default();
        let mut sink = CountingSink { uploads: 0, last_frame: None };
        sink.upload(&SnapshotUpload {
            frame: FrameStamp(3),
            instances: &[],
            chunks: &[],
            blocks: &[],
            partitions: &partitions,
        });
        NullSink.upload(&SnapshotUpload {
            frame: FrameStamp(4),
            instances: &[],
            chunks: &[],
            blocks: &[],
            partitions: &partitions,
        });
        assert_eq!(sink.uploads, 1);
        assert_eq!(sink.last_frame, Some(FrameStamp(3)));
    }
}
