//! Mathematical utilities and data structures

pub mod sphere;
pub mod nearest;

pub use sphere::fibonacci_sphere;
pub use nearest::{Nearest, NearestMap};
