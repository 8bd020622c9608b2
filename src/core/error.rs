//! Error types for the streaming engine

use thiserror::Error;

/// Main error type for the engine
///
/// Only construction-time operations fail. Per-frame scarcity (full shards,
/// saturated workers, stale entries) is reported through return values and
/// statistics instead.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Thread pool error: {0}")]
    ThreadPool(String),

    #[error("Streaming error: {0}")]
    Streaming(String),
}
