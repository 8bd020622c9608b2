//! Chunk content generators
//!
//! The streaming engine calls a [`Generator`] from arbitrary worker threads,
//! so implementations must be pure with respect to their inputs and safe to
//! share. Closures with the matching signature implement the trait directly.

use glam::DVec3;
use noise::{Fbm, MultiFractal, NoiseFn, Perlin};

use super::block::Block;
use super::chunk::{Chunk, ChunkLocation};

/// Produces the blocks of one chunk
pub trait Generator: Send + Sync {
    /// Generate the chunk at `location`.
    ///
    /// `mipmap_level` selects a coarser representation for distant chunks;
    /// generators that do not support it may ignore it.
    fn generate(
        &self,
        location: ChunkLocation,
        block_size: f32,
        chunk_resolution: u8,
        mipmap_level: u32,
    ) -> Chunk;
}

impl<F> Generator for F
where
    F: Fn(ChunkLocation, f32, u8, u32) -> Chunk + Send + Sync,
{
    fn generate(
        &self,
        location: ChunkLocation,
        block_size: f32,
        chunk_resolution: u8,
        mipmap_level: u32,
    ) -> Chunk {
        self(location, block_size, chunk_resolution, mipmap_level)
    }
}

/// Noise-displaced ground plane.
///
/// A block is solid when its centre lies below `ground_level` plus a fractal
/// Perlin displacement, which gives rolling terrain with occasional overhangs.
pub struct HeightfieldGenerator {
    noise: Fbm<Perlin>,
    /// World-space frequency of the displacement
    pub frequency: f64,
    /// Displacement amplitude in world units
    pub amplitude: f64,
    /// Height of the undisplaced ground plane
    pub ground_level: f64,
}

impl HeightfieldGenerator {
    /// Create a generator with default terrain parameters
    pub fn new(seed: u32) -> Self {
        let noise = Fbm::<Perlin>::new(seed)
            .set_octaves(5)
            .set_persistence(0.5)
            .set_lacunarity(2.0);

        Self {
            noise,
            frequency: 0.02,
            amplitude: 24.0,
            ground_level: 0.0,
        }
    }

    /// Signed density at a world position (negative = solid)
    pub fn density(&self, pos: DVec3) -> f64 {
        let p = pos * self.frequency;
        let displacement = self.noise.get([p.x, p.y * 0.5, p.z]);
        pos.y - self.ground_level + displacement * self.amplitude
    }
}

impl Default for HeightfieldGenerator {
    fn default() -> Self {
        Self::new(0)
    }
}

impl Generator for HeightfieldGenerator {
    fn generate(
        &self,
        location: ChunkLocation,
        block_size: f32,
        chunk_resolution: u8,
        mipmap_level: u32,
    ) -> Chunk {
        // Coarser levels sample every 2^level blocks
        let step = 1usize << mipmap_level.min(7);
        let block_size = block_size as f64;
        let origin = location.as_dvec3() * block_size * chunk_resolution as f64;

        let mut blocks = Vec::new();
        for x in (0..chunk_resolution).step_by(step) {
            for y in (0..chunk_resolution).step_by(step) {
                for z in (0..chunk_resolution).step_by(step) {
                    let center = origin
                        + (DVec3::new(x as f64, y as f64, z as f64) + 0.5) * block_size;
                    if self.density(center) < 0.0 {
                        blocks.push(Block::new(x, y, z));
                    }
                }
            }
        }

        Chunk::new(location, blocks)
    }
}
