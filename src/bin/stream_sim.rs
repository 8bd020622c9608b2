//! Headless streaming simulation: flies a camera over generated terrain.
//!
//! Usage: cargo run --release --bin stream_sim -- [OPTIONS]
//!
//! Options:
//!   --frames <N>       Frames to simulate (default: 600)
//!   --threads <N>      Worker threads (default: hardware parallelism minus reserve)
//!   --radius <CHUNKS>  Forward load radius (default: from config)
//!   --seed <SEED>      Terrain seed (default: 12345)
//!   --speed <M>        Camera speed in world units per frame (default: 2.0)
//!   --config <PATH>    Streaming config JSON (default: built-in defaults)

use std::path::PathBuf;
use std::time::Instant;

use glam::Vec3;

use voxstream::core::logging;
use voxstream::streaming::stats::timers;
use voxstream::streaming::{NullSink, StreamingConfig, StreamingEngine};
use voxstream::voxel::HeightfieldGenerator;

fn main() {
    logging::init();

    let args: Vec<String> = std::env::args().collect();
    let frames = parse_arg::<u64>(&args, "--frames").unwrap_or(600);
    let threads = parse_arg::<usize>(&args, "--threads");
    let radius = parse_arg::<u32>(&args, "--radius");
    let seed = parse_arg::<u32>(&args, "--seed").unwrap_or(12345);
    let speed = parse_arg::<f32>(&args, "--speed").unwrap_or(2.0);
    let config_path = parse_arg::<PathBuf>(&args, "--config");

    let mut config = match &config_path {
        Some(path) => match StreamingConfig::load_sync(path) {
            Ok(config) => config,
            Err(e) => {
                log::error!("Failed to load config {}: {}", path.display(), e);
                std::process::exit(1);
            }
        },
        None => StreamingConfig::default(),
    };
    if threads.is_some() {
        config.worker_threads = threads;
    }
    if let Some(radius) = radius {
        config.view_forward_load_chunk_size = radius;
        config.view_backward_load_chunk_size = config.view_backward_load_chunk_size.min(radius);
    }

    let mut engine = match StreamingEngine::new(config, HeightfieldGenerator::new(seed)) {
        Ok(engine) => engine,
        Err(e) => {
            log::error!("Failed to start streaming engine: {}", e);
            std::process::exit(1);
        }
    };

    println!("=== Voxstream Simulation ===");
    println!("Frames:  {}", frames);
    println!("Workers: {}", engine.worker_count());
    println!("Radius:  {} chunks", engine.config().view_forward_load_chunk_size);
    println!("Seed:    {}", seed);
    println!();

    let mut sink = NullSink;
    let start = Instant::now();

    for frame in 0..frames {
        // Slow circle so the view direction sweeps through every heading
        let t = frame as f32 * 0.01;
        let forward = Vec3::new(t.cos(), -0.2, t.sin()).normalize();
        let position = Vec3::new(0.0, 8.0, 0.0) + forward * (frame as f32 * speed);

        engine.update_camera(position, forward);
        let report = engine.tick(&mut sink);

        if frame % 60 == 0 {
            let counts = engine.resident_counts();
            log::info!(
                "Frame {}: {} chunks, {} empty, {} computing, {} blocks, {} queued, {} dispatched",
                frame,
                counts.chunks,
                counts.empty_chunks,
                counts.computing,
                counts.blocks,
                report.queued,
                report.dispatched()
            );
        }
    }

    engine.wait_for_workers();
    engine.apply_mutations(&mut sink);

    let elapsed = start.elapsed().as_secs_f64();
    let stats = engine.stats();
    println!();
    println!("Done in {:.2}s ({:.1} frames/sec)", elapsed, frames as f64 / elapsed);
    println!(
        "Chunks:  {} admitted, {} evicted, {} rejected",
        stats.chunks_admitted, stats.chunks_evicted, stats.chunks_rejected
    );
    println!(
        "Empty:   {} admitted, {} evicted, {} rejected",
        stats.empties_admitted, stats.empties_evicted, stats.empties_rejected
    );
    println!(
        "Blocks:  {} admitted, {} culled, {} rejected",
        stats.blocks_admitted, stats.blocks_culled, stats.blocks_rejected
    );
    println!("Uploads: {} ({} mutations)", stats.uploads, stats.mutations_applied);

    for name in [
        timers::DESIRED_QUERY,
        timers::SYNC_GENERATE,
        timers::DISPATCH,
        timers::APPLY_MUTATIONS,
    ] {
        if let Some(t) = engine.timers().stats(name) {
            println!("  {:<24} avg {:.3}ms  max {:.3}ms", name, t.avg * 1000.0, t.max * 1000.0);
        }
    }

    match serde_json::to_string_pretty(&stats) {
        Ok(json) => log::debug!("Final stats: {}", json),
        Err(e) => log::warn!("Failed to serialize stats: {}", e),
    }
}

fn parse_arg<T: std::str::FromStr>(args: &[String], flag: &str) -> Option<T> {
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .and_then(|s| s.parse().ok())
}
