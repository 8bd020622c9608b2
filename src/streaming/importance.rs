//! Importance scoring for candidate chunk locations
//!
//! Importance only needs to order locations for admission and eviction; it is
//! not a distance metric. Locations in the near-field cube around the camera
//! saturate at [`NEAR_FIELD_IMPORTANCE`] so they win every comparison.

use std::cmp::Ordering;

use glam::{IVec3, Vec3};

use crate::voxel::ChunkLocation;

/// Score of any location within the near-field cube
pub const NEAR_FIELD_IMPORTANCE: f32 = 1.0e6;

/// Half extent of the near-field cube, in chunks
pub const NEAR_FIELD_RADIUS: i32 = 2;

/// Distance at which the distance term bottoms out
pub const IMPORTANCE_FAR: f32 = 64.0;

/// Camera state needed to score locations
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ImportanceComputeInfo {
    /// Chunk containing the camera
    pub camera_chunk: ChunkLocation,
    /// Unit view direction
    pub camera_forward: Vec3,
}

impl ImportanceComputeInfo {
    pub fn new(camera_chunk: ChunkLocation, camera_forward: Vec3) -> Self {
        Self {
            camera_chunk,
            camera_forward,
        }
    }

    /// Score a location against this camera state
    pub fn score(&self, location: ChunkLocation) -> f32 {
        score(self.camera_chunk, self.camera_forward, location)
    }
}

impl Default for ImportanceComputeInfo {
    fn default() -> Self {
        Self::new(IVec3::ZERO, Vec3::NEG_Z)
    }
}

/// Whether `offset` lies in the cube of half extent `radius`
pub fn within_cube(offset: IVec3, radius: i32) -> bool {
    offset.abs().max_element() <= radius
}

/// Score `location` for a camera in `camera_chunk` looking along `camera_forward`.
///
/// Behind-camera locations keep 3/4 of the forward weight so recently passed
/// regions are not starved.
pub fn score(camera_chunk: ChunkLocation, camera_forward: Vec3, location: ChunkLocation) -> f32 {
    let offset = location - camera_chunk;
    if within_cube(offset, NEAR_FIELD_RADIUS) {
        return NEAR_FIELD_IMPORTANCE;
    }

    let offset = offset.as_vec3();
    let distance = offset.length();
    let direction = offset / distance;

    let angle_term = ((direction.dot(camera_forward).max(0.0) - 0.5) * 2.0).max(0.75);
    let distance_term = (IMPORTANCE_FAR - distance).max(0.25);
    angle_term * distance_term
}

/// A location paired with its importance.
///
/// Ordered by importance alone, so it can live in a max-heap or be sorted.
#[derive(Clone, Copy, Debug)]
pub struct ScoredLocation {
    pub importance: f32,
    pub location: ChunkLocation,
}

impl ScoredLocation {
    pub fn new(importance: f32, location: ChunkLocation) -> Self {
        Self {
            importance,
            location,
        }
    }
}

impl PartialEq for ScoredLocation {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for ScoredLocation {}

impl Ord for ScoredLocation {
    fn cmp(&self, other: &Self) -> Ordering {
        self.importance.total_cmp(&other.importance)
    }
}

impl PartialOrd for ScoredLocation {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Stable sort into descending importance
pub fn sort_descending(locations: &mut [ScoredLocation]) {
    locations.sort_by(|a, b| b.cmp(a));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_near_field_saturates() {
        let info = ImportanceComputeInfo::new(IVec3::ZERO, Vec3::X);
        assert_eq!(info.score(IVec3::new(1, 0, 0)), NEAR_FIELD_IMPORTANCE);
        assert_eq!(info.score(IVec3::ZERO), NEAR_FIELD_IMPORTANCE);
        assert_eq!(info.score(IVec3::new(-2, 2, -2)), NEAR_FIELD_IMPORTANCE);
        assert!(info.score(IVec3::new(3, 0, 0)) < NEAR_FIELD_IMPORTANCE);
    }

    #[test]
    fn test_forward_and_behind_scores() {
        let info = ImportanceComputeInfo::new(IVec3::ZERO, Vec3::X);

        let ahead = info.score(IVec3::new(10, 0, 0));
        let behind = info.score(IVec3::new(-10, 0, 0));

        assert!((ahead - 54.0).abs() < 1e-4);
        assert!((behind - 40.5).abs() < 1e-4);
        assert!(ahead > behind);
    }

    #[test]
    fn test_relative_to_camera_chunk() {
        let camera = IVec3::new(1000, -50, 7);
        let a = score(camera, Vec3::X, camera + IVec3::new(10, 0, 0));
        let b = score(IVec3::ZERO, Vec3::X, IVec3::new(10, 0, 0));
        assert_eq!(a, b);
    }

    #[test]
    fn test_distance_floor() {
        let far = score(IVec3::ZERO, Vec3::X, IVec3::new(500, 0, 0));
        assert!((far - 0.25).abs() < 1e-6);
    }

    #[test]
    fn test_near_field_beats_everything_outside() {
        for forward in [Vec3::X, Vec3::NEG_Y, Vec3::new(0.6, 0.0, 0.8)] {
            let camera = IVec3::new(3, -4, 5);
            let mut outside_max = 0.0f32;
            for x in -8..=8 {
                for y in -8..=8 {
                    for z in -8..=8 {
                        let offset = IVec3::new(x, y, z);
                        if !within_cube(offset, NEAR_FIELD_RADIUS) {
                            outside_max = outside_max.max(score(camera, forward, camera + offset));
                        }
                    }
                }
            }
            assert!(outside_max < score(camera, forward, camera + IVec3::new(2, -2, 1)));
        }
    }

    #[test]
    fn test_sort_descending_is_stable() {
        let mut list = vec![
            ScoredLocation::new(1.0, IVec3::new(0, 0, 1)),
            ScoredLocation::new(5.0, IVec3::new(0, 0, 2)),
            ScoredLocation::new(1.0, IVec3::new(0, 0, 3)),
        ];
        sort_descending(&mut list);
        let order: Vec<i32> = list.iter().map(|s| s.location.z).collect();
        assert_eq!(order, vec![2, 1, 3]);
    }
}
