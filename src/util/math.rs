//! Math type re-exports and small ray/box helpers.
//!
//! Euler rotations are in degrees and apply X, then Y, then Z. The WGSL
//! counterparts live in the geometry template and must stay in sync.

pub use glam::{UVec2, Vec2, Vec3, Vec4};

/// Offset applied along normals when spawning secondary rays.
pub const RAY_EPSILON: f32 = 0.001;

/// Distance reported for rays that leave the scene.
pub const FAR_DISTANCE: f32 = 10_000.0;

fn rotate_axis(a: f32, b: f32, deg: f32) -> (f32, f32) {
    let (s, c) = deg.to_radians().sin_cos();
    (a * c - b * s, a * s + b * c)
}

/// Rotate `p` by XYZ Euler angles given in degrees.
pub fn rotate_euler(p: Vec3, deg: Vec3) -> Vec3 {
    let mut p = p;
    (p.y, p.z) = rotate_axis(p.y, p.z, deg.x);
    (p.z, p.x) = rotate_axis(p.z, p.x, deg.y);
    (p.x, p.y) = rotate_axis(p.x, p.y, deg.z);
    p
}

/// Inverse of [`rotate_euler`].
pub fn rotate_euler_inv(p: Vec3, deg: Vec3) -> Vec3 {
    let mut p = p;
    (p.x, p.y) = rotate_axis(p.x, p.y, -deg.z);
    (p.z, p.x) = rotate_axis(p.z, p.x, -deg.y);
    (p.y, p.z) = rotate_axis(p.y, p.z, -deg.x);
    p
}

/// Axis-aligned box in object space.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BBox3f {
    pub min: Vec3,
    pub max: Vec3,
}

impl BBox3f {
    /// Create a new bounding box from min and max points.
    #[inline]
    pub const fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    /// Box centered at the origin with the given half extents.
    #[inline]
    pub fn from_half_extents(half: Vec3) -> Self {
        Self { min: -half, max: half }
    }

    /// Check if a point is inside the box.
    #[inline]
    pub fn contains(&self, p: Vec3) -> bool {
        p.cmpge(self.min).all() && p.cmple(self.max).all()
    }

    /// Slab test. Returns the nearest positive hit distance and the outward
    /// face normal at that hit.
    pub fn intersect_ray(&self, ro: Vec3, rd: Vec3) -> Option<(f32, Vec3)> {
        let inv = rd.recip();
        let t0 = (self.min - ro) * inv;
        let t1 = (self.max - ro) * inv;
        let tmin = t0.min(t1);
        let tmax = t0.max(t1);
        let near = tmin.max_element();
        let far = tmax.min_element();
        if near > far || far <= 0.0 {
            return None;
        }
        let (t, pick) = if near > 0.0 { (near, tmin) } else { (far, tmax) };
        let normal = if pick.x == t {
            Vec3::new(-rd.x.signum(), 0.0, 0.0)
        } else if pick.y == t {
            Vec3::new(0.0, -rd.y.signum(), 0.0)
        } else {
            Vec3::new(0.0, 0.0, -rd.z.signum())
        };
        // exit hits face the other way
        let normal = if near > 0.0 { normal } else { -normal };
        Some((t, normal))
    }
}

/// Nearest positive intersection of a ray with a sphere.
pub fn intersect_sphere(ro: Vec3, rd: Vec3, center: Vec3, radius: f32) -> Option<f32> {
    let oc = ro - center;
    let b = oc.dot(rd);
    let c = oc.length_squared() - radius * radius;
    let h = b * b - c;
    if h < 0.0 {
        return None;
    }
    let h = h.sqrt();
    let t = -b - h;
    if t > 0.0 {
        return Some(t);
    }
    let t = -b + h;
    (t > 0.0).then_some(t)
}

/// Intersection with the plane `dot(p, normal) = offset`.
pub fn intersect_plane(ro: Vec3, rd: Vec3, normal: Vec3, offset: f32) -> Option<f32> {
    let denom = rd.dot(normal);
    if denom.abs() < 1e-6 {
        return None;
    }
    let t = (offset - ro.dot(normal)) / denom;
    (t > 0.0).then_some(t)
}
