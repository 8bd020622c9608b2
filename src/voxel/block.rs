//! Blocks: occupied sub-cells of a chunk

use glam::IVec3;

/// An occupied cell inside a chunk, addressed by its local coordinate.
///
/// Coordinates are bytes, which caps the chunk resolution at 255.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Block {
    /// Local coordinate within the owning chunk
    pub location: [u8; 3],
}

impl Block {
    /// Create a block at local coordinates
    pub fn new(x: u8, y: u8, z: u8) -> Self {
        Self { location: [x, y, z] }
    }

    /// Local coordinate as an integer vector
    pub fn local(&self) -> IVec3 {
        IVec3::new(
            self.location[0] as i32,
            self.location[1] as i32,
            self.location[2] as i32,
        )
    }

    /// Local coordinate packed into one word (x | y << 8 | z << 16)
    pub fn packed_location(&self) -> u32 {
        let [x, y, z] = self.location;
        x as u32 | (y as u32) << 8 | (z as u32) << 16
    }
}
