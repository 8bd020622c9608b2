//! Desired-set computation and visibility baking
//!
//! The desired set is every chunk offset (relative to the camera chunk) that
//! should be resident, ordered by descending importance. Computing it is a
//! scan over a (2R+1)³ cube, so for the view cone it is baked ahead of time
//! for a Fibonacci-sphere sample of directions and looked up by nearest
//! direction at runtime.

use std::time::Instant;

use glam::{IVec3, Vec3};
use rayon::prelude::*;

use super::config::{StreamingConfig, VisibilityShape};
use super::importance::{
    ImportanceComputeInfo, NEAR_FIELD_IMPORTANCE, ScoredLocation, sort_descending, within_cube,
};
use crate::math::{NearestMap, fibonacci_sphere};

/// Offsets always desired regardless of facing
const ALWAYS_LOADED_RADIUS: i32 = 1;

/// Minimum cosine for the view cone, keeps wide angles from dividing by zero
const MIN_VIEW_THRESHOLD: f32 = 0.01;

/// Offsets within the view cone around `forward`, plus a shorter backward shell.
///
/// Offsets inside the cone are accepted up to the forward radius. Outside it
/// the accepted distance falls linearly from the forward to the backward
/// radius as alignment drops to zero.
pub fn cone_scan(forward: Vec3, config: &StreamingConfig) -> Vec<ScoredLocation> {
    let forward_radius = config.view_forward_load_chunk_size as i32;
    let forward_len = forward_radius as f32;
    let backward_len = config.view_backward_load_chunk_size as f32;
    let view_threshold = (config.view_chunk_angle.to_radians() * 0.5)
        .cos()
        .max(MIN_VIEW_THRESHOLD);
    let forward = forward.normalize_or_zero();
    let info = ImportanceComputeInfo::new(IVec3::ZERO, forward);

    let mut result = Vec::new();
    for_each_offset_in_sphere(forward_radius, |offset| {
        let accepted = if within_cube(offset, ALWAYS_LOADED_RADIUS) {
            true
        } else {
            let offset_f = offset.as_vec3();
            let distance = offset_f.length();
            let alignment = forward.dot(offset_f / distance).max(0.0);
            if alignment > view_threshold {
                true
            } else {
                let alpha = (alignment / view_threshold).clamp(0.0, 1.0);
                let distance_threshold = alpha * forward_len + (1.0 - alpha) * backward_len;
                distance < distance_threshold
            }
        };

        if accepted {
            result.push(ScoredLocation::new(info.score(offset), offset));
        }
    });

    sort_descending(&mut result);
    result
}

/// Every offset strictly within the forward radius, scored by inverse distance
pub fn sphere_scan(config: &StreamingConfig) -> Vec<ScoredLocation> {
    let radius = config.view_forward_load_chunk_size as i32;
    let radius_len = radius as f32;

    let mut result = Vec::new();
    for_each_offset_in_sphere(radius, |offset| {
        if within_cube(offset, ALWAYS_LOADED_RADIUS) {
            result.push(ScoredLocation::new(NEAR_FIELD_IMPORTANCE, offset));
        } else {
            let distance = offset.as_vec3().length();
            if distance < radius_len {
                result.push(ScoredLocation::new(1.0 / distance, offset));
            }
        }
    });

    sort_descending(&mut result);
    result
}

/// Desired offsets for the configured shape
pub fn desired_offsets(forward: Vec3, config: &StreamingConfig) -> Vec<ScoredLocation> {
    match config.visibility_shape {
        VisibilityShape::ViewCone => cone_scan(forward, config),
        VisibilityShape::Sphere => sphere_scan(config),
    }
}

fn for_each_offset_in_sphere(radius: i32, mut f: impl FnMut(IVec3)) {
    let limit = radius as f32 + 1e-6;
    for x in -radius..=radius {
        for y in -radius..=radius {
            for z in -radius..=radius {
                let offset = IVec3::new(x, y, z);
                if offset.as_vec3().length() <= limit {
                    f(offset);
                }
            }
        }
    }
}

/// Result of a desired-set lookup
#[derive(Clone, Copy, Debug)]
pub struct DesiredSet<'a> {
    /// Index of the baked direction used, if the set came from a bake
    pub direction_index: Option<usize>,
    /// Offsets in descending importance
    pub offsets: &'a [ScoredLocation],
}

/// Precomputed desired sets keyed by view direction
pub struct BakedVisibility {
    map: NearestMap<Vec<ScoredLocation>>,
}

impl BakedVisibility {
    /// Bake `config.bake_visibility_view_num` directions in parallel
    pub fn bake(config: &StreamingConfig) -> Self {
        let start = Instant::now();
        let directions = fibonacci_sphere(config.bake_visibility_view_num);

        let map: NearestMap<_> = directions
            .into_par_iter()
            .map(|dir| (dir, desired_offsets(dir, config)))
            .collect::<Vec<_>>()
            .into_iter()
            .collect();

        log::info!(
            "Baked visibility for {} directions in {:.1}ms",
            map.len(),
            start.elapsed().as_secs_f64() * 1000.0
        );

        Self { map }
    }

    /// Number of baked directions
    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Desired set of the baked direction nearest to `forward`
    pub fn query(&self, forward: Vec3) -> Option<DesiredSet<'_>> {
        let hit = self.map.nearest(forward.normalize_or_zero())?;
        Some(DesiredSet {
            direction_index: Some(hit.index),
            offsets: hit.value,
        })
    }
}

/// Where the orchestrator gets its desired set from
pub enum VisibilitySource {
    /// Nearest baked direction
    Baked(BakedVisibility),
    /// Direction-independent set computed once
    Fixed(Vec<ScoredLocation>),
    /// Cone scan on every query
    Live {
        config: StreamingConfig,
        scratch: Vec<ScoredLocation>,
    },
}

impl VisibilitySource {
    /// Choose the cheapest source that matches the configuration
    pub fn from_config(config: &StreamingConfig) -> Self {
        match config.visibility_shape {
            VisibilityShape::Sphere => VisibilitySource::Fixed(sphere_scan(config)),
            VisibilityShape::ViewCone if config.bake_visibility_view_num > 0 => {
                VisibilitySource::Baked(BakedVisibility::bake(config))
            }
            VisibilityShape::ViewCone => VisibilitySource::Live {
                config: config.clone(),
                scratch: Vec::new(),
            },
        }
    }

    /// Desired offsets for a camera looking along `forward`
    pub fn query(&mut self, forward: Vec3) -> DesiredSet<'_> {
        match self {
            VisibilitySource::Baked(baked) => baked.query(forward).unwrap_or(DesiredSet {
                direction_index: None,
                offsets: &[],
            }),
            VisibilitySource::Fixed(offsets) => DesiredSet {
                direction_index: Some(0),
                offsets: &offsets[..],
            },
            VisibilitySource::Live { config, scratch } => {
                *scratch = cone_scan(forward, config);
                DesiredSet {
                    direction_index: None,
                    offsets: &scratch[..],
                }
            }
        }
    }

    /// Number of precomputed directions (0 for live scanning)
    pub fn baked_directions(&self) -> usize {
        match self {
            VisibilitySource::Baked(baked) => baked.len(),
            VisibilitySource::Fixed(_) => 1,
            VisibilitySource::Live { .. } => 0,
        }
    }
}
