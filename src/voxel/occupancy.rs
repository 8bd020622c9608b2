//! Binary occupancy volumes and the erosion mipmap used for interior culling
//!
//! Level 0 of an [`OccupancyMipmap`] is the raw block occupancy of a chunk.
//! Level k keeps a cell only if the cell and all 26 of its neighbours are set
//! at level k-1. Cells within one cell of the chunk boundary always erode to
//! empty, since their outside neighbours live in another chunk.
//!
//! A block set at level `t` is buried under at least `t` layers of solid
//! blocks and can never be seen from outside.

use glam::IVec3;

use super::block::Block;

/// Dense cubic bit volume
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BinaryOccupancyVolume {
    bits: Vec<u64>,
    resolution: u32,
}

impl BinaryOccupancyVolume {
    /// Create an all-empty volume of `resolution`³ cells
    pub fn new(resolution: u32) -> Self {
        let cells = (resolution as usize).pow(3);
        Self {
            bits: vec![0; cells.div_ceil(64)],
            resolution,
        }
    }

    /// Cells per side
    pub fn resolution(&self) -> u32 {
        self.resolution
    }

    /// Whether a coordinate lies inside the volume
    pub fn in_bounds(&self, location: IVec3) -> bool {
        let r = self.resolution as i32;
        location.cmpge(IVec3::ZERO).all() && location.cmplt(IVec3::splat(r)).all()
    }

    fn index(&self, location: IVec3) -> usize {
        let r = self.resolution as usize;
        location.x as usize + location.y as usize * r + location.z as usize * r * r
    }

    /// Read a cell.
    ///
    /// # Panics
    /// Panics if `location` is outside the volume.
    pub fn get(&self, location: IVec3) -> bool {
        assert!(
            self.in_bounds(location),
            "occupancy read at {:?} outside resolution {}",
            location,
            self.resolution
        );
        let i = self.index(location);
        self.bits[i / 64] & (1 << (i % 64)) != 0
    }

    /// Read a cell, clamping the coordinate onto the volume
    pub fn get_clamped(&self, location: IVec3) -> bool {
        if self.resolution == 0 {
            return false;
        }
        let max = IVec3::splat(self.resolution as i32 - 1);
        self.get(location.clamp(IVec3::ZERO, max))
    }

    /// Read a cell, returning `boundary` for coordinates outside the volume
    pub fn get_or(&self, location: IVec3, boundary: bool) -> bool {
        if self.in_bounds(location) {
            self.get(location)
        } else {
            boundary
        }
    }

    /// Write a cell.
    ///
    /// # Panics
    /// Panics if `location` is outside the volume.
    pub fn set(&mut self, location: IVec3, value: bool) {
        assert!(
            self.in_bounds(location),
            "occupancy write at {:?} outside resolution {}",
            location,
            self.resolution
        );
        let i = self.index(location);
        if value {
            self.bits[i / 64] |= 1 << (i % 64);
        } else {
            self.bits[i / 64] &= !(1 << (i % 64));
        }
    }

    /// Number of set cells
    pub fn count_ones(&self) -> usize {
        self.bits.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// Build a volume from a chunk's block list.
    ///
    /// Blocks outside the volume are skipped.
    pub fn from_blocks(blocks: &[Block], resolution: u32) -> Self {
        let mut volume = Self::new(resolution);
        let mut skipped = 0;
        for block in blocks {
            let local = block.local();
            if volume.in_bounds(local) {
                volume.set(local, true);
            } else {
                skipped += 1;
            }
        }
        if skipped > 0 {
            log::warn!(
                "Skipped {} blocks outside occupancy resolution {}",
                skipped,
                resolution
            );
        }
        volume
    }

    /// One step of 26-neighbour erosion
    pub fn eroded(&self) -> Self {
        let mut out = Self::new(self.resolution);
        let r = self.resolution as i32;
        // Boundary shell erodes to empty, so only the interior is visited
        for z in 1..r - 1 {
            for y in 1..r - 1 {
                for x in 1..r - 1 {
                    let center = IVec3::new(x, y, z);
                    if self.get(center) && moore_neighbourhood().all(|o| self.get(center + o)) {
                        out.set(center, true);
                    }
                }
            }
        }
        out
    }
}

/// The 26 offsets of the Moore neighbourhood
fn moore_neighbourhood() -> impl Iterator<Item = IVec3> {
    (-1..=1).flat_map(|z| {
        (-1..=1).flat_map(move |y| (-1..=1).map(move |x| IVec3::new(x, y, z)))
    })
    .filter(|o| *o != IVec3::ZERO)
}

/// Stack of successively eroded occupancy volumes for one chunk
///
/// Built once when a chunk is generated and never modified afterwards.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct OccupancyMipmap {
    levels: Vec<BinaryOccupancyVolume>,
}

impl OccupancyMipmap {
    /// Build `depth` erosion levels on top of the raw occupancy
    pub fn build(blocks: &[Block], resolution: u32, depth: u32) -> Self {
        let mut levels = Vec::with_capacity(depth as usize + 1);
        levels.push(BinaryOccupancyVolume::from_blocks(blocks, resolution));
        for _ in 0..depth {
            let next = match levels.last() {
                Some(prev) if prev.count_ones() > 0 => prev.eroded(),
                _ => BinaryOccupancyVolume::new(resolution),
            };
            levels.push(next);
        }
        Self { levels }
    }

    /// Number of stored levels (raw occupancy included)
    pub fn level_count(&self) -> usize {
        self.levels.len()
    }

    /// Volume at a level
    pub fn level(&self, level: usize) -> Option<&BinaryOccupancyVolume> {
        self.levels.get(level)
    }

    /// Whether the cell at `location` survives `threshold` erosion steps.
    ///
    /// Thresholds beyond the built depth never count as interior.
    pub fn is_interior(&self, location: IVec3, threshold: u32) -> bool {
        self.levels
            .get(threshold as usize)
            .is_some_and(|level| level.get_or(location, false))
    }
}
