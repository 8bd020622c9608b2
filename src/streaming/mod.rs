//! Chunk streaming and eviction
//!
//! Decides which chunks should be resident around the camera, generates them
//! on worker threads, admits them into fixed-capacity sharded pools by
//! importance, and publishes the resulting slot tables once per frame.

pub mod config;
pub mod importance;
pub mod visibility;
pub mod claim_table;
pub mod slot_pool;
pub mod block_pool;
pub mod double_buffer;
pub mod gpu;
pub mod mutation;
pub mod worker_pool;
pub mod stats;
pub mod orchestrator;

pub use config::{OverrideMode, StreamingConfig, VisibilityShape};
pub use importance::{
    IMPORTANCE_FAR, ImportanceComputeInfo, NEAR_FIELD_IMPORTANCE, NEAR_FIELD_RADIUS,
    ScoredLocation, score,
};
pub use visibility::{BakedVisibility, DesiredSet, VisibilitySource, cone_scan, desired_offsets, sphere_scan};
pub use claim_table::ClaimTable;
pub use slot_pool::{AdmitContext, AdmitResult, ShardView, ShardedSlotPool, shard_ranges};
pub use block_pool::{BlockEntry, BlockPassContext, BlockPassReport, BlockPool};
pub use double_buffer::DoubleBufferQueue;
pub use gpu::{GpuBlock, GpuChunkData, GpuInstanceData, NullSink, PoolPartitions, SnapshotUpload, UploadSink};
pub use mutation::{MirrorBuffers, ModifyRecord, MutationPipeline, SnapshotMirror};
pub use worker_pool::GeneratorPool;
pub use stats::{FrameReport, ResidentCounts, StreamingStats};
pub use orchestrator::StreamingEngine;
