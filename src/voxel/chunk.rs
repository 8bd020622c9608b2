//! Chunks: the unit of streaming
//!
//! A chunk is a cubic region of `chunk_resolution`³ blocks. Chunks that turn
//! out to contain no blocks are kept as [`EmptyChunk`] markers so repeated
//! "is this region empty" checks stay cheap.

use std::sync::Arc;

use glam::{IVec3, Vec3};

use super::block::Block;
use super::occupancy::OccupancyMipmap;

/// Integer coordinate identifying a chunk in the world grid
pub type ChunkLocation = IVec3;

/// Convert a world position to the location of the chunk containing it
pub fn world_to_chunk(pos: Vec3, chunk_size: f32) -> ChunkLocation {
    (pos / chunk_size).floor().as_ivec3()
}

/// World-space minimum corner of a chunk
pub fn chunk_world_origin(location: ChunkLocation, chunk_size: f32) -> Vec3 {
    location.as_vec3() * chunk_size
}

/// Frame counter truncated to 32 bits.
///
/// Ordering is wrap-safe: a stamp is newer than another when the wrapping
/// difference is positive, which holds for any two stamps less than 2³¹
/// frames apart.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct FrameStamp(pub u32);

impl FrameStamp {
    /// Truncate a 64-bit frame counter
    pub fn from_frame(frame: u64) -> Self {
        Self(frame as u32)
    }

    /// Raw value, as uploaded to the GPU
    pub fn value(self) -> u32 {
        self.0
    }

    /// Strictly newer than `other`
    pub fn is_newer_than(self, other: FrameStamp) -> bool {
        (self.0.wrapping_sub(other.0) as i32) > 0
    }

    /// Strictly older than `other`
    pub fn is_older_than(self, other: FrameStamp) -> bool {
        other.is_newer_than(self)
    }
}

/// Tracking state of a location in the claim table.
///
/// `Unclaimed` is never stored; it is what a lookup reports for an absent
/// location.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum ChunkState {
    Unclaimed,
    /// Claimed and queued for or undergoing generation
    Computing,
    /// Resident in the chunk pool
    NonEmpty,
    /// Resident in the empty-chunk pool
    Empty,
}

/// Something that can occupy a slot in a slot pool
pub trait PoolItem: Send + 'static {
    /// Location this item represents
    fn location(&self) -> ChunkLocation;

    /// Frame the item was generated in
    fn frame_stamp(&self) -> FrameStamp;

    /// Whether the item may be admitted at all
    fn is_valid(&self) -> bool {
        true
    }

    /// Claim state recorded once the item is resident
    fn resident_state(&self) -> ChunkState;
}

/// A generated chunk with at least one block
#[derive(Clone, Debug)]
pub struct Chunk {
    /// Location in the chunk grid
    pub location: ChunkLocation,
    /// Frame the chunk was generated in
    pub frame_stamp: FrameStamp,
    /// Occupied blocks, in generator order
    pub blocks: Vec<Block>,
    occupancy: Option<Arc<OccupancyMipmap>>,
}

impl Chunk {
    /// Create a chunk from generated blocks
    pub fn new(location: ChunkLocation, blocks: Vec<Block>) -> Self {
        Self {
            location,
            frame_stamp: FrameStamp::default(),
            blocks,
            occupancy: None,
        }
    }

    /// Set the generation frame
    pub fn with_frame_stamp(mut self, stamp: FrameStamp) -> Self {
        self.frame_stamp = stamp;
        self
    }

    /// Build the erosion mipmap for interior culling.
    ///
    /// Only the first call has an effect; the mipmap is immutable once built.
    pub fn build_occupancy(&mut self, resolution: u32, depth: u32) {
        if self.occupancy.is_none() {
            self.occupancy = Some(Arc::new(OccupancyMipmap::build(
                &self.blocks,
                resolution,
                depth,
            )));
        }
    }

    /// The erosion mipmap, if built
    pub fn occupancy(&self) -> Option<&OccupancyMipmap> {
        self.occupancy.as_deref()
    }

    /// Whether the block at `local` is buried at the given erosion level.
    ///
    /// Without a mipmap nothing counts as interior.
    pub fn is_interior(&self, local: IVec3, threshold: u32) -> bool {
        self.occupancy()
            .is_some_and(|mip| mip.is_interior(local, threshold))
    }

    /// Whether the generator produced no blocks
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}

impl PoolItem for Chunk {
    fn location(&self) -> ChunkLocation {
        self.location
    }

    fn frame_stamp(&self) -> FrameStamp {
        self.frame_stamp
    }

    fn is_valid(&self) -> bool {
        !self.blocks.is_empty()
    }

    fn resident_state(&self) -> ChunkState {
        ChunkState::NonEmpty
    }
}

/// Marker for a region known to contain no blocks
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EmptyChunk {
    pub location: ChunkLocation,
    pub frame_stamp: FrameStamp,
}

impl PoolItem for EmptyChunk {
    fn location(&self) -> ChunkLocation {
        self.location
    }

    fn frame_stamp(&self) -> FrameStamp {
        self.frame_stamp
    }

    fn resident_state(&self) -> ChunkState {
        ChunkState::Empty
    }
}

/// Generator output routed to the pool that will hold it
#[derive(Clone, Debug)]
pub enum SlotPayload {
    Chunk(Chunk),
    Empty(EmptyChunk),
}

impl SlotPayload {
    /// Classify a generated chunk, stamping it with the generation frame
    pub fn from_generated(chunk: Chunk, stamp: FrameStamp) -> Self {
        if chunk.is_empty() {
            SlotPayload::Empty(EmptyChunk {
                location: chunk.location,
                frame_stamp: stamp,
            })
        } else {
            SlotPayload::Chunk(chunk.with_frame_stamp(stamp))
        }
    }

    pub fn location(&self) -> ChunkLocation {
        match self {
            SlotPayload::Chunk(c) => c.location(),
            SlotPayload::Empty(e) => e.location(),
        }
    }

    pub fn frame_stamp(&self) -> FrameStamp {
        match self {
            SlotPayload::Chunk(c) => c.frame_stamp(),
            SlotPayload::Empty(e) => e.frame_stamp(),
        }
    }

    pub fn resident_state(&self) -> ChunkState {
        match self {
            SlotPayload::Chunk(c) => c.resident_state(),
            SlotPayload::Empty(e) => e.resident_state(),
        }
    }
}
