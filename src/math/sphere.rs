//! Quasi-uniform direction sampling on the unit sphere

use glam::Vec3;

/// Generate `samples` directions on the unit sphere using the Fibonacci lattice.
///
/// The first point is the north pole (+Y) and the last the south pole (-Y);
/// consecutive points advance by the golden angle around the Y axis.
pub fn fibonacci_sphere(samples: u32) -> Vec<Vec3> {
    match samples {
        0 => return Vec::new(),
        1 => return vec![Vec3::Y],
        _ => {}
    }

    let golden_angle = std::f32::consts::PI * (5.0f32.sqrt() - 1.0);
    let last = (samples - 1) as f32;

    (0..samples)
        .map(|i| {
            let y = 1.0 - (i as f32 / last) * 2.0;
            let radius = (1.0 - y * y).max(0.0).sqrt();
            let theta = golden_angle * i as f32;
            Vec3::new(theta.cos() * radius, y, theta.sin() * radius).normalize()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_counts() {
        assert!(fibonacci_sphere(0).is_empty());
        assert_eq!(fibonacci_sphere(1), vec![Vec3::Y]);
        assert_eq!(fibonacci_sphere(64).len(), 64);
    }

    #[test]
    fn test_points_are_unit_length() {
        for p in fibonacci_sphere(100) {
            assert!((p.length() - 1.0).abs() < 1e-5, "{:?} not normalized", p);
        }
    }

    #[test]
    fn test_poles() {
        let points = fibonacci_sphere(32);
        assert!((points[0] - Vec3::Y).length() < 1e-5);
        assert!((points[31] + Vec3::Y).length() < 1e-5);
    }

    #[test]
    fn test_roughly_uniform() {
        // Every axis direction should have a sample within ~20 degrees
        let points = fibonacci_sphere(256);
        for axis in [Vec3::X, Vec3::NEG_X, Vec3::Z, Vec3::NEG_Z, Vec3::Y, Vec3::NEG_Y] {
            let best = points.iter().map(|p| p.dot(axis)).fold(f32::MIN, f32::max);
            assert!(best > 20.0f32.to_radians().cos(), "axis {:?} best dot {}", axis, best);
        }
    }
}
