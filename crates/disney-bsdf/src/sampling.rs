//! Random stream and sample warps shared with `shaders/rng.wgsl`.

use glam::Vec3;
use std::f32::consts::{PI, TAU};

/// PCG output permutation (RXS-M-XS), identical to `pcg_hash` in WGSL.
#[inline]
pub fn pcg_hash(v: u32) -> u32 {
    let state = v.wrapping_mul(747796405).wrapping_add(2891336453);
    let word = ((state >> ((state >> 28) + 4)) ^ state).wrapping_mul(277803737);
    (word >> 22) ^ word
}

/// Per-pixel PCG stream.
///
/// Seeding and stepping mirror `rng_seed` / `rand` so CPU and GPU paths draw
/// the same sequence for the same pixel, frame seed and salt.
#[derive(Clone, Copy, Debug)]
pub struct Pcg {
    state: u32,
}

impl Pcg {
    pub fn new(pixel: u32, frame_seed: u32, salt: u32) -> Self {
        Self { state: pcg_hash(pixel ^ pcg_hash(frame_seed ^ pcg_hash(salt))) }
    }

    /// Uniform float in [0, 1).
    #[inline]
    pub fn next_f32(&mut self) -> f32 {
        let state = self.state;
        self.state = state.wrapping_mul(747796405).wrapping_add(2891336453);
        let word = ((state >> ((state >> 28) + 4)) ^ state).wrapping_mul(277803737);
        (((word >> 22) ^ word) >> 8) as f32 * (1.0 / 16777216.0)
    }
}

pub fn importance_sample_gtr1(rgh: f32, r1: f32, r2: f32) -> Vec3 {
    let a = rgh.max(0.001);
    let a2 = a * a;
    let phi = r1 * TAU;
    let cos_theta = ((1.0 - a2.powf(1.0 - r2)) / (1.0 - a2)).sqrt();
    let sin_theta = (1.0 - cos_theta * cos_theta).sqrt().clamp(0.0, 1.0);
    Vec3::new(sin_theta * phi.cos(), sin_theta * phi.sin(), cos_theta)
}

pub fn importance_sample_gtr2(rgh: f32, r1: f32, r2: f32) -> Vec3 {
    let a = rgh.max(0.001);
    let phi = r1 * TAU;
    let cos_theta = ((1.0 - r2) / (1.0 + (a * a - 1.0) * r2)).sqrt();
    let sin_theta = (1.0 - cos_theta * cos_theta).sqrt().clamp(0.0, 1.0);
    Vec3::new(sin_theta * phi.cos(), sin_theta * phi.sin(), cos_theta)
}

pub fn importance_sample_gtr2_aniso(ax: f32, ay: f32, r1: f32, r2: f32) -> Vec3 {
    let phi = r1 * TAU;
    let tan_theta = (r2 / (1.0 - r2)).sqrt();
    Vec3::new(tan_theta * ax * phi.cos(), tan_theta * ay * phi.sin(), 1.0).normalize()
}

pub fn cosine_sample_hemisphere(r1: f32, r2: f32) -> Vec3 {
    let r = r1.sqrt();
    let phi = TAU * r2;
    let (x, y) = (r * phi.cos(), r * phi.sin());
    Vec3::new(x, y, (1.0 - x * x - y * y).max(0.0).sqrt())
}

pub fn uniform_sample_hemisphere(r1: f32, r2: f32) -> Vec3 {
    let r = (1.0 - r1 * r1).max(0.0).sqrt();
    let phi = TAU * r2;
    Vec3::new(r * phi.cos(), r * phi.sin(), r1)
}

pub fn uniform_sample_sphere(r1: f32, r2: f32) -> Vec3 {
    let z = 1.0 - 2.0 * r1;
    let r = (1.0 - z * z).max(0.0).sqrt();
    let phi = TAU * r2;
    Vec3::new(r * phi.cos(), r * phi.sin(), z)
}

/// Power heuristic with beta = 2.
#[inline]
pub fn power_heuristic(a: f32, b: f32) -> f32 {
    let t = a * a;
    t / (b * b + t)
}

/// Solid angle of a cone with the given half angle.
pub fn cone_solid_angle(half_angle: f32) -> f32 {
    2.0 * PI * (1.0 - half_angle.cos())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pcg_range_and_determinism() {
        let mut a = Pcg::new(17, 99, 3);
        let mut b = Pcg::new(17, 99, 3);
        for _ in 0..1000 {
            let x = a.next_f32();
            assert!((0.0..1.0).contains(&x));
            assert_eq!(x, b.next_f32());
        }
    }

    #[test]
    fn test_pcg_streams_differ_by_salt() {
        let mut a = Pcg::new(17, 99, 0);
        let mut b = Pcg::new(17, 99, 1);
        let same = (0..32).filter(|_| a.next_f32() == b.next_f32()).count();
        assert!(same < 4);
    }

    #[test]
    fn test_pcg_mean() {
        let mut rng = Pcg::new(1, 2, 3);
        let n = 20_000;
        let mean: f32 = (0..n).map(|_| rng.next_f32()).sum::<f32>() / n as f32;
        assert!((mean - 0.5).abs() < 0.01, "mean {mean}");
    }

    #[test]
    fn test_warps_are_unit() {
        let mut rng = Pcg::new(5, 6, 7);
        for _ in 0..256 {
            let (r1, r2) = (rng.next_f32(), rng.next_f32());
            assert!((cosine_sample_hemisphere(r1, r2).length() - 1.0).abs() < 1e-4);
            assert!((uniform_sample_sphere(r1, r2).length() - 1.0).abs() < 1e-4);
            assert!(uniform_sample_hemisphere(r1, r2).z >= 0.0);
            assert!(importance_sample_gtr2(0.3, r1, r2).z > 0.0);
            assert!(importance_sample_gtr2_aniso(0.2, 0.6, r1, r2).z > 0.0);
        }
    }

    #[test]
    fn test_power_heuristic() {
        assert_eq!(power_heuristic(1.0, 0.0), 1.0);
        assert!((power_heuristic(1.0, 1.0) - 0.5).abs() < 1e-6);
        assert!(power_heuristic(10.0, 1.0) > 0.99);
    }
}
