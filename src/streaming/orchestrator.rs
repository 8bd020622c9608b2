//! Streaming engine: per-frame desired-set queries, claims and dispatch
//!
//! The engine owns every shared structure (claim table, slot pools, mutation
//! pipeline) behind one `Arc` that worker tasks clone. The calling thread
//! drives it once per frame:
//!
//! 1. [`StreamingEngine::update_view`] records the camera.
//! 2. [`StreamingEngine::update_loading_queue`] claims desired locations in
//!    descending importance and hands them to workers, or generates them in
//!    place within the synchronous budget.
//! 3. [`StreamingEngine::apply_mutations`] publishes everything workers wrote
//!    since the last call to an [`UploadSink`].
//!
//! [`StreamingEngine::tick`] runs steps 2 and 3 and advances the frame counter.

use std::collections::{HashMap, HashSet, VecDeque};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use glam::Vec3;

use super::block_pool::{BlockPassContext, BlockPassReport, BlockPool};
use super::claim_table::ClaimTable;
use super::config::StreamingConfig;
use super::gpu::{GpuChunkData, GpuInstanceData, PoolPartitions, UploadSink};
use super::importance::{ImportanceComputeInfo, ScoredLocation};
use super::mutation::{ModifyRecord, MutationPipeline, SnapshotMirror};
use super::slot_pool::{AdmitContext, AdmitResult, ShardedSlotPool};
use super::stats::{FrameReport, ResidentCounts, StatCounters, StreamingStats, timers};
use super::visibility::VisibilitySource;
use super::worker_pool::GeneratorPool;
use crate::core::error::Error;
use crate::core::time::TimerSet;
use crate::core::types::Result;
use crate::voxel::{
    Chunk, ChunkLocation, ChunkState, EmptyChunk, FrameStamp, Generator, SlotPayload, world_to_chunk,
};

/// Instance marker for chunks holding blocks
const MARKER_CHUNK: f32 = 0.0;
/// Instance marker for known-empty chunks
const MARKER_EMPTY: f32 = 1.0;
/// Instance marker for locations still being generated
const MARKER_COMPUTING: f32 = 2.0;

/// State shared between the engine and its worker tasks
struct EngineShared {
    config: StreamingConfig,
    generator: Arc<dyn Generator>,
    claims: ClaimTable,
    chunks: ShardedSlotPool<Chunk>,
    empties: ShardedSlotPool<EmptyChunk>,
    blocks: BlockPool,
    mutations: MutationPipeline,
    camera: Mutex<ImportanceComputeInfo>,
    frame: AtomicU64,
    /// Frame of the last invalidation, 0 when there was none
    stale_floor: AtomicU64,
    /// Set when a claim was dropped in a way the queue cannot see
    requeue: AtomicBool,
    stats: StatCounters,
}

impl EngineShared {
    fn stamp(&self) -> FrameStamp {
        FrameStamp::from_frame(self.frame.load(Ordering::Acquire))
    }

    fn stale_floor(&self) -> Option<FrameStamp> {
        match self.stale_floor.load(Ordering::Acquire) {
            0 => None,
            frame => Some(FrameStamp::from_frame(frame)),
        }
    }

    fn camera(&self) -> ImportanceComputeInfo {
        *self.camera.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Generate and admit one location, releasing its claim if anything panics
    fn load(&self, shard: usize, location: ChunkLocation) {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.generate_and_admit(shard, location)));
        if outcome.is_err() {
            log::error!("Loading {:?} panicked, releasing its claim", location);
            self.claims.release(location);
            StatCounters::add(&self.stats.generation_failures, 1);
        }
    }

    /// Generate `location` and admit the result into `shard`
    fn generate_and_admit(&self, shard: usize, location: ChunkLocation) {
        let config = &self.config;
        let mut chunk = self
            .generator
            .generate(location, config.block_size, config.chunk_resolution, 0);
        if chunk.location != location {
            log::warn!(
                "Generator returned chunk {:?} for location {:?}, relocating",
                chunk.location,
                location
            );
            chunk.location = location;
        }

        let resolution = config.chunk_resolution;
        let before = chunk.blocks.len();
        chunk
            .blocks
            .retain(|b| b.location.iter().all(|&c| c < resolution));
        if chunk.blocks.len() < before {
            log::warn!(
                "Dropped {} blocks of {:?} outside resolution {}",
                before - chunk.blocks.len(),
                location,
                resolution
            );
        }

        let payload = SlotPayload::from_generated(chunk, self.stamp());
        self.admit(shard, payload);
    }

    fn admit(&self, shard: usize, payload: SlotPayload) {
        let config = &self.config;
        let camera = self.camera();
        let score = move |location: ChunkLocation| camera.score(location);
        let importance = score(payload.location());
        let stale_before = self.stale_floor();

        // Generated before an invalidation: regenerate instead of admitting
        if stale_before.is_some_and(|floor| payload.frame_stamp().is_older_than(floor)) {
            self.claims.release(payload.location());
            self.requeue.store(true, Ordering::Release);
            return;
        }

        let ctx = AdmitContext {
            claims: &self.claims,
            mode: config.chunk_override_mode,
            stale_before,
            importance: &score,
        };
        let chunk_size = config.chunk_size();

        match payload {
            SlotPayload::Chunk(mut chunk) => {
                chunk.build_occupancy(config.chunk_resolution as u32, config.chunk_occupancy_depth);
                let location = chunk.location;
                let stamp = chunk.frame_stamp;
                let pass = BlockPassContext {
                    mode: config.chunk_override_mode,
                    stale_before,
                    importance: &score,
                };

                let mut blocks = BlockPassReport::default();
                let result = self.chunks.try_admit(shard, chunk, importance, &ctx, |slot, view| {
                    // A chunk and its blocks are published in the same batch
                    let mut records = vec![ModifyRecord::Chunk {
                        slot,
                        chunk: GpuChunkData::new(location, stamp),
                        instance: GpuInstanceData::for_location(location, chunk_size, MARKER_CHUNK),
                    }];
                    blocks = self.blocks.admit_chunk_blocks(shard, slot, view, importance, &pass, |block_slot, block| {
                        records.push(ModifyRecord::Block { slot: block_slot, block });
                    });
                    self.mutations.push_batch(shard, records);
                });

                Self::count_admission(
                    result,
                    &self.stats.chunks_admitted,
                    &self.stats.chunks_rejected,
                    &self.stats.chunks_evicted,
                );
                StatCounters::add(&self.stats.blocks_admitted, blocks.admitted);
                StatCounters::add(&self.stats.blocks_culled, blocks.culled);
                StatCounters::add(&self.stats.blocks_rejected, blocks.rejected);
            }
            SlotPayload::Empty(empty) => {
                let location = empty.location;
                let result = self.empties.try_admit(shard, empty, importance, &ctx, |slot, _| {
                    self.mutations.push(
                        shard,
                        ModifyRecord::EmptyChunk {
                            slot,
                            instance: GpuInstanceData::for_location(location, chunk_size, MARKER_EMPTY),
                        },
                    );
                });

                Self::count_admission(
                    result,
                    &self.stats.empties_admitted,
                    &self.stats.empties_rejected,
                    &self.stats.empties_evicted,
                );
            }
        }
    }

    fn count_admission(result: AdmitResult, admitted: &AtomicU64, rejected: &AtomicU64, evicted: &AtomicU64) {
        match result {
            AdmitResult::Admitted { evicted: old, .. } => {
                StatCounters::add(admitted, 1);
                StatCounters::add(evicted, old.is_some() as usize);
            }
            AdmitResult::Rejected => StatCounters::add(rejected, 1),
        }
    }
}

/// Chunk streaming and eviction engine
pub struct StreamingEngine {
    shared: Arc<EngineShared>,
    workers: GeneratorPool,
    visibility: VisibilitySource,
    mirror: SnapshotMirror,
    /// Desired locations not yet claimed, most important first
    queue: VecDeque<ChunkLocation>,
    /// Locations handed back after a refused dispatch
    deferred: HashSet<ChunkLocation>,
    /// Camera chunk and baked direction the queue was built for
    queue_key: Option<(ChunkLocation, Option<usize>)>,
    sync_shard: Option<usize>,
    /// Floor raised since the last loading-queue update
    pending_sweep: Option<FrameStamp>,
    timers: TimerSet,
    warned_capacity: bool,
}

impl StreamingEngine {
    /// Build an engine, start its workers and bake visibility
    pub fn new(config: StreamingConfig, generator: impl Generator + 'static) -> Result<Self> {
        Self::with_shared_generator(config, Arc::new(generator))
    }

    pub fn with_shared_generator(config: StreamingConfig, generator: Arc<dyn Generator>) -> Result<Self> {
        config.validate()?;
        let config = config.sanitized();

        let threads = config.worker_thread_count();
        let workers = GeneratorPool::new(threads)?;
        let sync_shard = (config.max_synced_load_chunk_count > 0).then_some(threads);
        let shard_count = threads + usize::from(sync_shard.is_some());

        let chunk_capacity = config.max_chunk_count as usize;
        if chunk_capacity < shard_count {
            return Err(Error::Streaming(format!(
                "max_chunk_count {} leaves some of the {} shards without chunk slots",
                chunk_capacity, shard_count
            )));
        }
        let empty_capacity = config.max_empty_chunk_count as usize;
        let block_capacity = config.max_block_count as usize;

        let chunks = ShardedSlotPool::new(chunk_capacity, shard_count, config.max_chunk_check_times as usize);
        let empties = ShardedSlotPool::new(
            empty_capacity,
            shard_count,
            config.max_empty_chunk_check_times as usize,
        );
        let blocks = BlockPool::new(
            block_capacity,
            shard_count,
            config.max_block_check_times as usize,
            config.chunk_inner_voxel_cull_depth_threshold,
        );

        let partitions = PoolPartitions::from_slot_ranges(
            chunks.shard_ranges(),
            empties.shard_ranges(),
            blocks.shard_ranges(),
            chunk_capacity,
        );
        let mirror = SnapshotMirror::new(chunk_capacity, empty_capacity, block_capacity, partitions);
        let visibility = VisibilitySource::from_config(&config);

        log::info!(
            "Streaming engine: {} workers, {} shards{}, {} chunk / {} empty / {} block slots, {} baked directions",
            threads,
            shard_count,
            if sync_shard.is_some() { " (incl. sync)" } else { "" },
            chunk_capacity,
            empty_capacity,
            block_capacity,
            visibility.baked_directions()
        );

        let shared = Arc::new(EngineShared {
            claims: ClaimTable::with_capacity(chunk_capacity + empty_capacity),
            chunks,
            empties,
            blocks,
            mutations: MutationPipeline::new(shard_count),
            camera: Mutex::new(ImportanceComputeInfo::default()),
            frame: AtomicU64::new(1),
            stale_floor: AtomicU64::new(0),
            requeue: AtomicBool::new(false),
            stats: StatCounters::default(),
            generator,
            config,
        });

        Ok(Self {
            shared,
            workers,
            visibility,
            mirror,
            queue: VecDeque::new(),
            deferred: HashSet::new(),
            queue_key: None,
            sync_shard,
            pending_sweep: None,
            timers: TimerSet::new(),
            warned_capacity: false,
        })
    }

    pub fn config(&self) -> &StreamingConfig {
        &self.shared.config
    }

    /// Current frame counter
    pub fn frame(&self) -> u64 {
        self.shared.frame.load(Ordering::Acquire)
    }

    /// Stamp given to chunks generated this frame
    pub fn frame_stamp(&self) -> FrameStamp {
        self.shared.stamp()
    }

    pub fn camera(&self) -> ImportanceComputeInfo {
        self.shared.camera()
    }

    /// Record the camera for this frame
    pub fn update_view(&mut self, camera_chunk: ChunkLocation, camera_forward: Vec3) {
        let forward = camera_forward.normalize_or(Vec3::NEG_Z);
        let previous = {
            let mut camera = self.shared.camera.lock().unwrap_or_else(PoisonError::into_inner);
            let previous = camera.camera_chunk;
            *camera = ImportanceComputeInfo::new(camera_chunk, forward);
            previous
        };

        if previous != camera_chunk && self.shared.config.invalidate_on_camera_move {
            self.invalidate_resident();
        }
    }

    /// Record the camera from a world-space position
    pub fn update_camera(&mut self, position: Vec3, camera_forward: Vec3) {
        let chunk = world_to_chunk(position, self.shared.config.chunk_size());
        self.update_view(chunk, camera_forward);
    }

    /// Regenerate everything generated before this frame.
    ///
    /// Stale residents are treated as free slots immediately. The next
    /// loading-queue update evicts them, drops their claims and requests the
    /// desired set again.
    pub fn invalidate_resident(&mut self) {
        let frame = self.frame();
        self.shared.stale_floor.store(frame, Ordering::Release);
        self.pending_sweep = Some(FrameStamp::from_frame(frame));
        self.queue_key = None;
        log::debug!("Resident chunks before frame {} marked stale", frame);
    }

    /// Evict residents older than `floor` and clear their published slots
    fn sweep_stale(&self, floor: FrameStamp) {
        let shared = &self.shared;
        let chunks = shared.chunks.evict_stale(floor, &shared.claims, |shard, slot, _| {
            shared.mutations.push(
                shard,
                ModifyRecord::Chunk {
                    slot,
                    chunk: GpuChunkData::INVALID,
                    instance: GpuInstanceData::default(),
                },
            );
        });
        let empties = shared.empties.evict_stale(floor, &shared.claims, |shard, slot, _| {
            shared.mutations.push(
                shard,
                ModifyRecord::EmptyChunk {
                    slot,
                    instance: GpuInstanceData::default(),
                },
            );
        });
        StatCounters::add(&shared.stats.chunks_evicted, chunks);
        StatCounters::add(&shared.stats.empties_evicted, empties);
        log::debug!(
            "Evicted {} stale chunks and {} stale empty chunks before frame {}",
            chunks,
            empties,
            floor.value()
        );
    }

    /// Claim and dispatch desired locations for this frame
    pub fn update_loading_queue(&mut self) -> FrameReport {
        if let Some(floor) = self.pending_sweep.take() {
            self.sweep_stale(floor);
        }
        let mut report = FrameReport {
            rebuilt_queue: self.refresh_queue(),
            ..Default::default()
        };

        let config = &self.shared.config;
        let mut synced_budget = config.max_synced_load_chunk_count as usize;
        let mut pooled_budget = config.max_unsynced_load_chunk_count as usize;
        let batch_size = config.chunk_task_per_core.max(1) as usize;
        let mut batch = Vec::with_capacity(batch_size);
        let dispatch_start = Instant::now();

        while synced_budget > 0 || pooled_budget > 0 {
            let Some(location) = self.queue.pop_front() else {
                break;
            };
            if !self.shared.claims.try_claim(location, ChunkState::Computing) {
                report.already_tracked += 1;
                continue;
            }
            self.deferred.remove(&location);

            if synced_budget > 0 {
                if let Some(shard) = self.sync_shard {
                    synced_budget -= 1;
                    let start = Instant::now();
                    self.shared.load(shard, location);
                    self.timers.record_sample(timers::SYNC_GENERATE, start.elapsed());
                    report.dispatched_synced += 1;
                    continue;
                }
            }

            batch.push(location);
            pooled_budget -= 1;
            if (batch.len() == batch_size || pooled_budget == 0)
                && !self.dispatch(std::mem::take(&mut batch), &mut report)
            {
                break;
            }
        }

        if !batch.is_empty() {
            self.dispatch(batch, &mut report);
        }

        if report.dispatched_pooled > 0 {
            let per_chunk = dispatch_start.elapsed() / report.dispatched_pooled as u32;
            self.timers.record_sample(timers::DISPATCH, per_chunk);
        }

        report.queued = self.queue.len();
        let stats = &self.shared.stats;
        StatCounters::add(&stats.dispatched_synced, report.dispatched_synced);
        StatCounters::add(&stats.dispatched_pooled, report.dispatched_pooled);
        StatCounters::add(&stats.already_tracked, report.already_tracked);
        StatCounters::add(&stats.deferred, report.deferred);

        if report.dispatched() > 0 || report.deferred > 0 {
            log::debug!(
                "Frame {}: {} synced, {} pooled, {} deferred, {} queued",
                self.frame(),
                report.dispatched_synced,
                report.dispatched_pooled,
                report.deferred,
                report.queued
            );
        }
        report
    }

    /// Hand a batch to a worker, or give its claims back and requeue it.
    ///
    /// Returns false when the pool refused the batch.
    fn dispatch(&mut self, batch: Vec<ChunkLocation>, report: &mut FrameReport) -> bool {
        let count = batch.len();
        let shared = Arc::clone(&self.shared);
        let refused = self.workers.try_spawn(batch, move |batch| {
            let shard = GeneratorPool::current_worker().unwrap_or(0);
            for location in batch {
                shared.load(shard, location);
            }
        });

        match refused {
            Ok(()) => {
                report.dispatched_pooled += count;
                true
            }
            Err(batch) => {
                for &location in batch.iter().rev() {
                    self.shared.claims.release(location);
                    self.queue.push_front(location);
                    self.deferred.insert(location);
                }
                report.deferred += count;
                false
            }
        }
    }

    /// Rebuild the queue when the camera chunk or the desired set changed.
    ///
    /// Deferred locations go ahead of others of equal importance.
    fn refresh_queue(&mut self) -> bool {
        let camera = self.shared.camera();
        let start = Instant::now();
        let set = self.visibility.query(camera.camera_forward);
        let key = (camera.camera_chunk, set.direction_index);
        let requeue = self.shared.requeue.swap(false, Ordering::AcqRel);
        if !requeue && set.direction_index.is_some() && self.queue_key == Some(key) {
            return false;
        }

        let mut desired: Vec<(ScoredLocation, bool)> = set
            .offsets
            .iter()
            .map(|s| {
                let location = camera.camera_chunk + s.location;
                (
                    ScoredLocation::new(s.importance, location),
                    self.deferred.contains(&location),
                )
            })
            .collect();
        desired.sort_by(|a, b| b.0.cmp(&a.0).then(b.1.cmp(&a.1)));
        self.timers.record_sample(timers::DESIRED_QUERY, start.elapsed());

        let capacity = self.shared.config.max_chunk_count as usize;
        if desired.len() > capacity && !self.warned_capacity {
            log::warn!(
                "Desired set of {} locations exceeds chunk capacity {}",
                desired.len(),
                capacity
            );
            self.warned_capacity = true;
        }

        self.queue = desired.into_iter().map(|(s, _)| s.location).collect();
        self.deferred.clear();
        self.queue_key = Some(key);
        self.shared.stats.desired.store(self.queue.len() as u64, Ordering::Relaxed);
        true
    }

    /// Publish pending slot writes to `sink`.
    ///
    /// Returns the number of records applied; idle frames skip the sink.
    pub fn apply_mutations<S: UploadSink + ?Sized>(&mut self, sink: &mut S) -> usize {
        let start = Instant::now();
        let Some(applied) = self.shared.mutations.apply(&mut self.mirror, self.shared.stamp()) else {
            return 0;
        };
        sink.upload(&self.mirror.snapshot());
        self.timers.record_sample(timers::APPLY_MUTATIONS, start.elapsed());

        let stats = &self.shared.stats;
        StatCounters::add(&stats.mutations_applied, applied);
        StatCounters::add(&stats.uploads, 1);
        log::debug!("Applied {} mutations at frame {}", applied, self.frame());
        applied
    }

    /// Queue update, mutation upload and frame advance in one call
    pub fn tick<S: UploadSink + ?Sized>(&mut self, sink: &mut S) -> FrameReport {
        let report = self.update_loading_queue();
        self.apply_mutations(sink);
        self.shared.frame.fetch_add(1, Ordering::AcqRel);
        report
    }

    /// Block until all dispatched generation has been admitted
    pub fn wait_for_workers(&self) {
        self.workers.wait_idle();
    }

    /// Desired locations not yet claimed, most important first
    pub fn queued(&self) -> &VecDeque<ChunkLocation> {
        &self.queue
    }

    /// Copy of the claim table
    pub fn claim_snapshot(&self) -> HashMap<ChunkLocation, ChunkState> {
        self.shared.claims.get_copy()
    }

    pub fn claim_state(&self, location: ChunkLocation) -> ChunkState {
        self.shared.claims.state(location)
    }

    /// One wireframe instance per tracked location.
    ///
    /// Clamped to the combined chunk and empty-chunk capacity.
    pub fn debug_instances(&self) -> Vec<GpuInstanceData> {
        let config = &self.shared.config;
        let limit = (config.max_chunk_count + config.max_empty_chunk_count) as usize;
        let claims = self.shared.claims.get_copy();
        if claims.len() > limit {
            log::warn!(
                "{} tracked locations exceed debug instance capacity {}, truncating",
                claims.len(),
                limit
            );
        }

        let chunk_size = config.chunk_size();
        claims
            .into_iter()
            .take(limit)
            .map(|(location, state)| {
                let marker = match state {
                    ChunkState::NonEmpty => MARKER_CHUNK,
                    ChunkState::Empty => MARKER_EMPTY,
                    ChunkState::Computing | ChunkState::Unclaimed => MARKER_COMPUTING,
                };
                GpuInstanceData::for_location(location, chunk_size, marker)
            })
            .collect()
    }

    pub fn resident_counts(&self) -> ResidentCounts {
        let (computing, chunks, empty_chunks) = self.shared.claims.count_by_state();
        ResidentCounts {
            computing,
            chunks,
            empty_chunks,
            blocks: self.shared.blocks.occupied(),
        }
    }

    pub fn stats(&self) -> StreamingStats {
        self.shared.stats.snapshot()
    }

    pub fn timers(&self) -> &TimerSet {
        &self.timers
    }

    /// Consumer-visible snapshot mirror
    pub fn mirror(&self) -> &SnapshotMirror {
        &self.mirror
    }

    pub fn worker_count(&self) -> usize {
        self.workers.thread_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::streaming::config::{OverrideMode, VisibilityShape};
    use crate::streaming::gpu::SnapshotUpload;
    use crate::streaming::visibility::sphere_scan;
    use crate::voxel::Block;
    use glam::IVec3;
    use std::sync::Condvar;

    #[derive(Default)]
    struct RecordingSink {
        uploads: usize,
        last_frame: Option<FrameStamp>,
        chunk_bytes: usize,
    }

    impl UploadSink for RecordingSink {
        fn upload(&mut self, snapshot: &SnapshotUpload<'_>) {
            self.uploads += 1;
            self.last_frame = Some(snapshot.frame);
            self.chunk_bytes = snapshot.chunks.len();
        }
    }

    /// Solid below y = 0, empty above
    fn layered(location: ChunkLocation, _block_size: f32, resolution: u8, _level: u32) -> Chunk {
        let blocks = if location.y < 0 {
            let mut blocks = Vec::new();
            for x in 0..resolution {
                for y in 0..resolution {
                    for z in 0..resolution {
                        blocks.push(Block::new(x, y, z));
                    }
                }
            }
            blocks
        } else {
            Vec::new()
        };
        Chunk::new(location, blocks)
    }

    fn test_config() -> StreamingConfig {
        StreamingConfig {
            chunk_resolution: 4,
            max_chunk_count: 512,
            max_empty_chunk_count: 512,
            max_block_count: 4096,
            view_forward_load_chunk_size: 3,
            view_backward_load_chunk_size: 2,
            visibility_shape: VisibilityShape::Sphere,
            bake_visibility_view_num: 8,
            max_unsynced_load_chunk_count: 32,
            chunk_task_per_core: 4,
            chunk_occupancy_depth: 2,
            worker_threads: Some(2),
            ..Default::default()
        }
    }

    fn settle(engine: &mut StreamingEngine, sink: &mut RecordingSink) {
        for _ in 0..200 {
            let report = engine.tick(sink);
            engine.wait_for_workers();
            if report.queued == 0 && report.dispatched() == 0 && report.deferred == 0 {
                break;
            }
        }
        engine.apply_mutations(sink);
    }

    #[test]
    fn test_streams_desired_set() {
        crate::core::logging::try_init_for_tests();
        let config = test_config();
        let desired = sphere_scan(&config);
        let mut engine = StreamingEngine::new(config, layered).unwrap();
        let mut sink = RecordingSink::default();

        engine.update_view(IVec3::ZERO, Vec3::X);
        settle(&mut engine, &mut sink);

        for offset in &desired {
            let expected = if offset.location.y < 0 {
                ChunkState::NonEmpty
            } else {
                ChunkState::Empty
            };
            assert_eq!(engine.claim_state(offset.location), expected, "{:?}", offset.location);
        }

        let counts = engine.resident_counts();
        assert_eq!(counts.computing, 0);
        assert_eq!(counts.chunks + counts.empty_chunks, desired.len());

        let stats = engine.stats();
        assert_eq!(stats.chunks_admitted as usize, counts.chunks);
        assert_eq!(stats.empties_admitted as usize, counts.empty_chunks);
        assert_eq!(stats.chunks_rejected + stats.empties_rejected, 0);
        assert!(stats.blocks_admitted > 0);
        assert!(sink.uploads > 0);
        assert_eq!(sink.chunk_bytes, 512 * 16);

        // Every resident chunk is visible in the published chunk table
        let front = engine.mirror().front();
        let published = front
            .chunks
            .iter()
            .filter(|c| **c != GpuChunkData::INVALID)
            .count();
        assert_eq!(published, counts.chunks);
    }

    #[test]
    fn test_idle_frames_skip_upload() {
        let mut engine = StreamingEngine::new(test_config(), layered).unwrap();
        let mut sink = RecordingSink::default();
        engine.update_view(IVec3::ZERO, Vec3::X);
        settle(&mut engine, &mut sink);

        let uploads = sink.uploads;
        assert_eq!(engine.apply_mutations(&mut sink), 0);
        let report = engine.tick(&mut sink);
        assert!(!report.rebuilt_queue);
        assert_eq!(report.dispatched(), 0);
        assert_eq!(sink.uploads, uploads);
    }

    #[test]
    fn test_synchronous_loading() {
        let config = StreamingConfig {
            max_synced_load_chunk_count: 10_000,
            max_unsynced_load_chunk_count: 0,
            ..test_config()
        };
        let desired = sphere_scan(&config).len();
        let mut engine = StreamingEngine::new(config, layered).unwrap();
        let mut sink = RecordingSink::default();

        engine.update_view(IVec3::new(5, 0, 5), Vec3::Z);
        let report = engine.tick(&mut sink);

        assert!(report.rebuilt_queue);
        assert_eq!(report.dispatched_synced, desired);
        assert_eq!(report.dispatched_pooled, 0);
        assert_eq!(report.queued, 0);
        assert_eq!(engine.resident_counts().computing, 0);
        assert_eq!(sink.uploads, 1);
        assert_eq!(engine.claim_state(IVec3::new(5, -1, 5)), ChunkState::NonEmpty);
        assert!(engine.timers().stats(timers::SYNC_GENERATE).is_some());
    }

    #[test]
    fn test_saturated_pool_defers_and_requeues() {
        let gate = Arc::new((Mutex::new(false), Condvar::new()));
        let generator_gate = Arc::clone(&gate);
        let generator = move |location: ChunkLocation, _: f32, _: u8, _: u32| {
            let (open, cvar) = &*generator_gate;
            let mut open = open.lock().unwrap();
            while !*open {
                open = cvar.wait(open).unwrap();
            }
            Chunk::new(location, Vec::new())
        };

        let config = StreamingConfig {
            worker_threads: Some(1),
            chunk_task_per_core: 1,
            max_unsynced_load_chunk_count: 16,
            ..test_config()
        };
        let desired = sphere_scan(&config);
        let mut engine = StreamingEngine::new(config, generator).unwrap();
        let mut sink = RecordingSink::default();
        engine.update_view(IVec3::ZERO, Vec3::X);

        let report = engine.tick(&mut sink);
        assert_eq!(report.dispatched_pooled, 1);
        assert_eq!(report.deferred, 1);
        assert_eq!(report.queued, desired.len() - 1);

        // The refused location is unclaimed and first in line
        let first = desired[0].location;
        let second = desired[1].location;
        assert_eq!(engine.claim_state(first), ChunkState::Computing);
        assert_eq!(engine.claim_state(second), ChunkState::Unclaimed);
        assert_eq!(engine.queued().front(), Some(&second));

        // Still saturated: deferred again without losing its place
        let report = engine.tick(&mut sink);
        assert_eq!(report.dispatched_pooled, 0);
        assert_eq!(report.deferred, 1);
        assert_eq!(engine.queued().front(), Some(&second));

        {
            let (open, cvar) = &*gate;
            *open.lock().unwrap() = true;
            cvar.notify_all();
        }
        settle(&mut engine, &mut sink);

        assert_eq!(engine.claim_state(second), ChunkState::Empty);
        assert_eq!(engine.resident_counts().empty_chunks, desired.len());
        assert!(engine.stats().deferred >= 2);
    }

    #[test]
    fn test_capacity_pressure_keeps_claims_consistent() {
        let config = StreamingConfig {
            max_chunk_count: 24,
            max_empty_chunk_count: 24,
            max_block_count: 0,
            chunk_override_mode: OverrideMode::FindMin,
            ..test_config()
        };
        let generator = |location: ChunkLocation, _: f32, _: u8, _: u32| {
            Chunk::new(location, vec![Block::new(0, 0, 0)])
        };
        let mut engine = StreamingEngine::new(config, generator).unwrap();
        let mut sink = RecordingSink::default();

        engine.update_view(IVec3::ZERO, Vec3::X);
        settle(&mut engine, &mut sink);
        engine.update_view(IVec3::new(4, 0, 0), Vec3::X);
        settle(&mut engine, &mut sink);

        let counts = engine.resident_counts();
        assert_eq!(counts.computing, 0);
        assert_eq!(counts.empty_chunks, 0);
        assert!(counts.chunks <= 24);

        let stats = engine.stats();
        assert!(stats.chunks_rejected > 0);
        assert!(stats.chunks_evicted > 0);

        // Claim table and pool agree on which locations are resident
        let claims = engine.claim_snapshot();
        let resident = engine.shared.chunks.resident();
        assert_eq!(resident.len(), claims.len());
        for (_, location, _) in resident {
            assert_eq!(claims.get(&location), Some(&ChunkState::NonEmpty));
        }
    }

    #[test]
    fn test_camera_move_rebuilds_queue() {
        let mut engine = StreamingEngine::new(test_config(), layered).unwrap();
        let mut sink = RecordingSink::default();

        engine.update_view(IVec3::ZERO, Vec3::X);
        assert!(engine.tick(&mut sink).rebuilt_queue);
        engine.wait_for_workers();
        assert!(!engine.tick(&mut sink).rebuilt_queue);

        engine.update_camera(Vec3::new(100.0, 0.0, 0.0), Vec3::X);
        assert_eq!(engine.camera().camera_chunk, IVec3::new(25, 0, 0));
        let report = engine.tick(&mut sink);
        assert!(report.rebuilt_queue);
        engine.wait_for_workers();
    }

    #[test]
    fn test_invalidate_on_camera_move() {
        let config = StreamingConfig {
            invalidate_on_camera_move: true,
            ..test_config()
        };
        let mut engine = StreamingEngine::new(config, layered).unwrap();
        let mut sink = RecordingSink::default();

        engine.update_view(IVec3::ZERO, Vec3::X);
        settle(&mut engine, &mut sink);
        assert_eq!(engine.shared.stale_floor(), None);

        engine.update_view(IVec3::new(1, 0, 0), Vec3::X);
        assert_eq!(engine.shared.stale_floor(), Some(engine.frame_stamp()));
    }

    #[test]
    fn test_invalidation_regenerates_near_field() {
        let config = StreamingConfig {
            max_chunk_count: 64,
            max_empty_chunk_count: 64,
            worker_threads: Some(1),
            invalidate_on_camera_move: true,
            ..test_config()
        };
        let mut engine = StreamingEngine::new(config, layered).unwrap();
        let mut sink = RecordingSink::default();

        engine.update_view(IVec3::ZERO, Vec3::X);
        settle(&mut engine, &mut sink);
        let camera = IVec3::new(1, 0, 0);
        engine.update_view(camera, Vec3::X);
        settle(&mut engine, &mut sink);

        let floor = engine.shared.stale_floor().unwrap();
        let resident: HashMap<ChunkLocation, FrameStamp> = engine
            .shared
            .chunks
            .resident()
            .into_iter()
            .chain(engine.shared.empties.resident())
            .map(|(_, location, stamp)| (location, stamp))
            .collect();

        let mut holes = Vec::new();
        for x in -1..=1 {
            for y in -1..=1 {
                for z in -1..=1 {
                    let location = camera + IVec3::new(x, y, z);
                    let expected = if location.y < 0 {
                        ChunkState::NonEmpty
                    } else {
                        ChunkState::Empty
                    };
                    let fresh = resident
                        .get(&location)
                        .is_some_and(|stamp| !stamp.is_older_than(floor));
                    if engine.claim_state(location) != expected || !fresh {
                        holes.push(location);
                    }
                }
            }
        }
        assert!(holes.is_empty(), "near-field holes after move: {:?}", holes);

        // Nothing stale survives the sweep, and claims match the pools
        assert!(resident.values().all(|stamp| !stamp.is_older_than(floor)));
        assert_eq!(engine.claim_snapshot().len(), resident.len());
        assert_eq!(engine.resident_counts().computing, 0);
    }

    #[test]
    fn test_invalidate_resident_clears_published_slots() {
        let mut engine = StreamingEngine::new(test_config(), layered).unwrap();
        let mut sink = RecordingSink::default();
        engine.update_view(IVec3::ZERO, Vec3::X);
        settle(&mut engine, &mut sink);
        let resident = engine.shared.chunks.occupied();
        assert!(resident > 0);

        engine.tick(&mut sink);
        engine.invalidate_resident();
        let report = engine.update_loading_queue();
        engine.wait_for_workers();
        assert!(report.rebuilt_queue);
        assert!(report.dispatched() > 0);
        assert!(engine.stats().chunks_evicted as usize >= resident);
        settle(&mut engine, &mut sink);

        assert_eq!(engine.resident_counts().computing, 0);
        let front = engine.mirror().front();
        let published = front
            .chunks
            .iter()
            .filter(|c| **c != GpuChunkData::INVALID)
            .count();
        assert_eq!(published, engine.shared.chunks.occupied());
    }

    #[test]
    fn test_panicking_generator_releases_claims() {
        let generator = |location: ChunkLocation, _: f32, _: u8, _: u32| {
            if location == IVec3::ZERO {
                panic!("generator failure at {:?}", location);
            }
            Chunk::new(location, vec![Block::new(0, 0, 0)])
        };
        let config = StreamingConfig {
            worker_threads: Some(1),
            chunk_task_per_core: 8,
            ..test_config()
        };
        let desired = sphere_scan(&config).len();
        let mut engine = StreamingEngine::new(config, generator).unwrap();
        let mut sink = RecordingSink::default();

        engine.update_view(IVec3::ZERO, Vec3::X);
        settle(&mut engine, &mut sink);

        assert_eq!(engine.resident_counts().computing, 0);
        assert_eq!(engine.claim_state(IVec3::ZERO), ChunkState::Unclaimed);
        assert_eq!(engine.stats().generation_failures, 1);
        // The rest of the panicking batch still landed
        assert_eq!(engine.resident_counts().chunks, desired - 1);
    }

    #[test]
    fn test_panicking_synchronous_load_releases_claim() {
        let generator = |location: ChunkLocation, _: f32, _: u8, _: u32| {
            if location == IVec3::ZERO {
                panic!("generator failure at {:?}", location);
            }
            Chunk::new(location, vec![Block::new(0, 0, 0)])
        };
        let config = StreamingConfig {
            max_synced_load_chunk_count: 10_000,
            max_unsynced_load_chunk_count: 0,
            ..test_config()
        };
        let mut engine = StreamingEngine::new(config, generator).unwrap();
        let mut sink = RecordingSink::default();

        engine.update_view(IVec3::ZERO, Vec3::X);
        engine.tick(&mut sink);

        assert_eq!(engine.resident_counts().computing, 0);
        assert_eq!(engine.claim_state(IVec3::ZERO), ChunkState::Unclaimed);
        assert_eq!(engine.claim_state(IVec3::X), ChunkState::NonEmpty);
    }

    #[test]
    fn test_out_of_range_blocks_dropped() {
        let generator = |location: ChunkLocation, _: f32, resolution: u8, _: u32| {
            Chunk::new(location, vec![Block::new(resolution, 0, 0), Block::new(0, 0, 0)])
        };
        let config = StreamingConfig {
            worker_threads: Some(1),
            ..test_config()
        };
        let desired = sphere_scan(&config).len();
        let mut engine = StreamingEngine::new(config, generator).unwrap();
        let mut sink = RecordingSink::default();

        engine.update_view(IVec3::ZERO, Vec3::X);
        settle(&mut engine, &mut sink);

        let counts = engine.resident_counts();
        assert_eq!(counts.computing, 0);
        assert_eq!(counts.chunks, desired);
        assert_eq!(counts.blocks, desired);
        assert_eq!(engine.stats().generation_failures, 0);
    }

    #[test]
    fn test_debug_instances() {
        let mut engine = StreamingEngine::new(test_config(), layered).unwrap();
        let mut sink = RecordingSink::default();
        engine.update_view(IVec3::ZERO, Vec3::X);
        settle(&mut engine, &mut sink);

        let instances = engine.debug_instances();
        assert_eq!(instances.len(), engine.claim_snapshot().len());
        let below = instances
            .iter()
            .find(|i| i.chunk_location == [0, -1, 0])
            .unwrap();
        assert_eq!(below.marker, MARKER_CHUNK);
        assert_eq!(below.position, [0.0, -4.0, 0.0]);
    }

    #[test]
    fn test_rejects_invalid_config() {
        let config = StreamingConfig {
            max_chunk_count: 0,
            ..test_config()
        };
        assert!(StreamingEngine::new(config, layered).is_err());

        let too_small = StreamingConfig {
            max_chunk_count: 1,
            worker_threads: Some(2),
            ..test_config()
        };
        assert!(matches!(
            StreamingEngine::new(too_small, layered),
            Err(Error::Streaming(_))
        ));
    }
}
