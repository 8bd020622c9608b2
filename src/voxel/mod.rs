//! Voxel data: blocks, chunks, occupancy and generators

pub mod block;
pub mod chunk;
pub mod occupancy;
pub mod generator;

pub use block::Block;
pub use chunk::{
    Chunk, ChunkLocation, ChunkState, EmptyChunk, FrameStamp, PoolItem, SlotPayload,
    chunk_world_origin, world_to_chunk,
};
pub use occupancy::{BinaryOccupancyVolume, OccupancyMipmap};
pub use generator::{Generator, HeightfieldGenerator};
