//! Streaming configuration
//!
//! Loaded once at engine construction and immutable afterwards. Every field
//! has a default, so a JSON file only needs to name what it overrides.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::core::error::Error;
use crate::core::types::Result;

/// How a full shard chooses an occupant to replace
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum OverrideMode {
    /// First occupant less important than the newcomer
    FindLess,
    /// Least important occupant in the scan window, if below the newcomer
    #[default]
    FindMin,
    /// Least important occupant in the scan window, unconditionally
    OverrideMin,
}

/// Shape of the desired region around the camera
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum VisibilityShape {
    /// Forward cone with a shorter backward radius
    #[default]
    ViewCone,
    /// Distance-only sphere
    Sphere,
}

/// Engine configuration
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamingConfig {
    /// Voxels per block side, carried through to consumers
    pub block_resolution: u8,
    /// World size of one block
    pub block_size: f32,
    /// Blocks per chunk side
    pub chunk_resolution: u8,

    pub max_chunk_count: u32,
    pub max_empty_chunk_count: u32,
    /// Block record capacity; 0 disables the block pass
    pub max_block_count: u32,

    pub max_chunk_check_times: u32,
    pub max_empty_chunk_check_times: u32,
    pub max_block_check_times: u32,

    /// Number of baked view directions; 0 scans live every update
    pub bake_visibility_view_num: u32,
    pub view_forward_load_chunk_size: u32,
    pub view_backward_load_chunk_size: u32,
    /// Full view cone angle in degrees
    pub view_chunk_angle: f32,
    pub visibility_shape: VisibilityShape,

    /// Chunks generated on the calling thread per update
    pub max_synced_load_chunk_count: u32,
    /// Chunks handed to workers per update; also caps the worker count
    pub max_unsynced_load_chunk_count: u32,
    /// Locations batched into one worker task
    pub chunk_task_per_core: u32,
    pub chunk_override_mode: OverrideMode,

    /// Erosion levels built per chunk
    pub chunk_occupancy_depth: u32,
    /// Erosion level at which a block is culled as interior.
    ///
    /// At least 1, since level 0 is the raw occupancy and would cull every
    /// block. A depth of 0 disables culling.
    pub chunk_inner_voxel_cull_depth_threshold: u32,

    /// Explicit worker count, overriding hardware detection
    pub worker_threads: Option<usize>,
    /// Cores left free when sizing from hardware parallelism
    pub worker_reserve_threads: usize,
    /// Treat every resident chunk as stale when the camera changes chunk
    pub invalidate_on_camera_move: bool,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            block_resolution: 8,
            block_size: 1.0,
            chunk_resolution: 16,
            max_chunk_count: 8192 * 2,
            max_empty_chunk_count: 8192 * 4,
            max_block_count: 65536 * 16,
            max_chunk_check_times: 128,
            max_empty_chunk_check_times: 128,
            max_block_check_times: 4,
            bake_visibility_view_num: 256,
            view_forward_load_chunk_size: 24,
            view_backward_load_chunk_size: 6,
            view_chunk_angle: 120.0,
            visibility_shape: VisibilityShape::ViewCone,
            max_synced_load_chunk_count: 0,
            max_unsynced_load_chunk_count: 256,
            chunk_task_per_core: 8,
            chunk_override_mode: OverrideMode::FindMin,
            chunk_occupancy_depth: 4,
            chunk_inner_voxel_cull_depth_threshold: 1,
            worker_threads: None,
            worker_reserve_threads: 4,
            invalidate_on_camera_move: false,
        }
    }
}

impl StreamingConfig {
    /// Parse from JSON; missing fields keep their defaults
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Load from a JSON file
    pub fn load_sync(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    /// Save as pretty-printed JSON, creating parent directories
    pub fn save_sync(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        std::fs::write(path, json)?;
        Ok(())
    }

    /// Reject configurations the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.chunk_resolution == 0 {
            return Err(Error::Config("chunk_resolution must be at least 1".into()));
        }
        if !(self.block_size > 0.0) {
            return Err(Error::Config(format!(
                "block_size must be positive, got {}",
                self.block_size
            )));
        }
        if self.view_backward_load_chunk_size > self.view_forward_load_chunk_size {
            return Err(Error::Config(format!(
                "backward load radius {} exceeds forward load radius {}",
                self.view_backward_load_chunk_size, self.view_forward_load_chunk_size
            )));
        }
        if !(self.view_chunk_angle > 0.0 && self.view_chunk_angle <= 360.0) {
            return Err(Error::Config(format!(
                "view_chunk_angle must be in (0, 360], got {}",
                self.view_chunk_angle
            )));
        }
        if self.max_chunk_count == 0 {
            return Err(Error::Config("max_chunk_count must be at least 1".into()));
        }
        Ok(())
    }

    /// Clamp values that are usable but out of range, logging each change
    pub fn sanitized(mut self) -> Self {
        if self.chunk_inner_voxel_cull_depth_threshold == 0 {
            log::warn!("Cull threshold 0 would cull every block, clamping to 1");
            self.chunk_inner_voxel_cull_depth_threshold = 1;
        }
        if self.chunk_occupancy_depth > 0
            && self.chunk_inner_voxel_cull_depth_threshold > self.chunk_occupancy_depth
        {
            log::warn!(
                "Cull threshold {} exceeds occupancy depth {}, clamping",
                self.chunk_inner_voxel_cull_depth_threshold,
                self.chunk_occupancy_depth
            );
            self.chunk_inner_voxel_cull_depth_threshold = self.chunk_occupancy_depth;
        }
        for (name, value) in [
            ("max_chunk_check_times", &mut self.max_chunk_check_times),
            ("max_empty_chunk_check_times", &mut self.max_empty_chunk_check_times),
            ("max_block_check_times", &mut self.max_block_check_times),
            ("chunk_task_per_core", &mut self.chunk_task_per_core),
        ] {
            if *value == 0 {
                log::warn!("{} is 0, clamping to 1", name);
                *value = 1;
            }
        }
        self
    }

    /// World size of one chunk
    pub fn chunk_size(&self) -> f32 {
        self.chunk_resolution as f32 * self.block_size
    }

    /// Number of worker threads the engine will start.
    ///
    /// Hardware parallelism minus the reserve, at least one, and never more
    /// than the pooled load budget.
    pub fn worker_thread_count(&self) -> usize {
        let count = match self.worker_threads {
            Some(n) => n,
            None => {
                let hw = std::thread::available_parallelism()
                    .map(|n| n.get())
                    .unwrap_or(1);
                hw.saturating_sub(self.worker_reserve_threads)
            }
        };
        count
            .max(1)
            .min(self.max_unsynced_load_chunk_count.max(1) as usize)
    }
}
