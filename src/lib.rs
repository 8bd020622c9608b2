//! Voxstream - importance-driven chunk streaming for infinite voxel worlds

pub mod core;
pub mod math;
pub mod voxel;
pub mod streaming;
