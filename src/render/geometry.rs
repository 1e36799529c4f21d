//! Depth/normal pass seam.
//!
//! The sample passes only need the nearest hit (distance, normal, material
//! id) along a ray. [`GeometryPass`] is that seam for the CPU backend;
//! [`AnalyticGeometry`] traces the bundled sphere/box/plane primitives and
//! sphere lights exactly like the WGSL geometry template.

use glam::{Vec3, Vec4};

use crate::graph::{CompiledScene, LightKind, PrimitiveKind};
use crate::graph::context::PrimitiveRecord;
use crate::util::{intersect_plane, intersect_sphere, rotate_euler, rotate_euler_inv, BBox3f, FAR_DISTANCE};

/// Material id of rays that leave the scene.
pub const MISS_ID: f32 = -1.0;
/// Material id written for terminated paths.
pub const DEAD_ID: f32 = -100.0;

/// Nearest intersection along a ray.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Hit {
    pub t: f32,
    pub normal: Vec3,
    /// Material index as float, negative for misses
    pub material: f32,
    /// Secondary material id plus the weight of `material` in its
    /// fraction; 0 when the hit is not blended.
    pub blend: f32,
}

impl Hit {
    pub const fn miss() -> Self {
        Self { t: FAR_DISTANCE, normal: Vec3::ZERO, material: MISS_ID, blend: 0.0 }
    }

    pub fn new(t: f32, normal: Vec3, material: i32) -> Self {
        Self { t, normal, material: material as f32, blend: 0.0 }
    }

    /// Blend this hit's material with `secondary`. `weight` is the share of
    /// the primary material: 0 resolves to `secondary`, 1 to the primary.
    pub fn blended(self, secondary: i32, weight: f32) -> Self {
        // a code of exactly 0 reads as unblended
        let weight = weight.clamp(1e-4, 0.999);
        Self { blend: secondary.max(0) as f32 + weight, ..self }
    }

    pub fn is_hit(&self) -> bool {
        self.material >= 0.0
    }
}

/// Source of primary, bounce and shadow ray hits.
pub trait GeometryPass: Send + Sync {
    /// Nearest hit from `ro` along unit direction `rd`; `data` is the
    /// scene's constant-data array.
    fn trace(&self, ro: Vec3, rd: Vec3, data: &[Vec4]) -> Hit;
}

/// Unit sphere at the origin used for material previews.
pub fn preview_hit(ro: Vec3, rd: Vec3, material: i32) -> Hit {
    match intersect_sphere(ro, rd, Vec3::ZERO, 1.0) {
        Some(t) => Hit::new(t, (ro + rd * t).normalize(), material),
        None => Hit::miss(),
    }
}

/// Analytic primitives and sphere lights of a compiled scene.
#[derive(Clone, Debug, Default)]
pub struct AnalyticGeometry {
    primitives: Vec<PrimitiveRecord>,
    /// (data slot, material)
    light_spheres: Vec<(usize, i32)>,
}

impl AnalyticGeometry {
    pub fn from_scene(scene: &CompiledScene) -> Self {
        let light_spheres = scene
            .entities
            .lights
            .iter()
            .filter(|l| l.kind == LightKind::Sphere)
            .map(|l| (l.data, l.material))
            .collect();
        Self { primitives: scene.entities.primitives.clone(), light_spheres }
    }

    fn primitive(p: &PrimitiveRecord, ro: Vec3, rd: Vec3, data: &[Vec4]) -> Option<(f32, Vec3)> {
        let pos = data[p.object].truncate();
        let rot = data[p.object + 1].truncate();
        let scale = data[p.object + 2].x;
        let lro = rotate_euler_inv(ro - pos, rot) / scale;
        let lrd = rotate_euler_inv(rd, rot);
        let d = data[p.data];
        let (t, n) = match p.kind {
            PrimitiveKind::Sphere => {
                let t = intersect_sphere(lro, lrd, d.truncate(), d.w)?;
                (t, (lro + lrd * t - d.truncate()).normalize())
            }
            PrimitiveKind::Box => {
                let half = data[p.data + 1].truncate();
                BBox3f::new(d.truncate() - half, d.truncate() + half).intersect_ray(lro, lrd)?
            }
            PrimitiveKind::Plane => (intersect_plane(lro, lrd, d.truncate(), d.w)?, d.truncate()),
        };
        Some((t * scale, rotate_euler(n, rot)))
    }
}

impl GeometryPass for AnalyticGeometry {
    fn trace(&self, ro: Vec3, rd: Vec3, data: &[Vec4]) -> Hit {
        let mut best = Hit::miss();
        for p in &self.primitives {
            if let Some((t, normal)) = Self::primitive(p, ro, rd, data) {
                if t < best.t {
                    best = Hit::new(t, normal, p.material);
                }
            }
        }
        for &(slot, material) in &self.light_spheres {
            let d = data[slot];
            if let Some(t) = intersect_sphere(ro, rd, d.truncate(), d.w) {
                if t < best.t {
                    best = Hit::new(t, (ro + rd * t - d.truncate()).normalize(), material);
                }
            }
        }
        best
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{compile, GraphBuilder};

    fn scene() -> CompiledScene {
        let graph = GraphBuilder::new()
            .material("A", |m| m.set("albedo", "1, 1, 1"))
            .material("B", |m| m.set("albedo", "0, 1, 0"))
            .material("Lamp", |m| m.set("emission", "1, 1, 1"))
            .render(&[], |r| {
                r.camera(&[])
                    .object(&[("Material", "A"), ("Position", "0, 0, 2"), ("Scale", "2")], |o| o.sphere(&[("Radius", "0.5")]))
                    .object(&[("Material", "B"), ("Rotation", "0, 0, 90")], |o| {
                        o.cube(&[("Position", "0, -3, 0"), ("Size", "1, 1, 1")])
                    })
                    .sphere_light(&[("Position", "0, 0, -3"), ("Radius", "0.25"), ("Material", "Lamp")])
            })
            .build();
        compile(&graph).unwrap()
    }

    #[test]
    fn test_scaled_sphere() {
        let s = scene();
        let g = AnalyticGeometry::from_scene(&s);
        // world radius 1 at z = 2
        let hit = g.trace(Vec3::new(0.0, 0.0, -10.0), Vec3::Z, &s.data);
        assert!(hit.is_hit());
        // the light sphere at z = -3 is nearer
        assert_eq!(hit.material, 2.0);
        let hit = g.trace(Vec3::new(0.0, 0.0, -2.0), Vec3::Z, &s.data);
        assert_eq!(hit.material, 0.0);
        assert!((hit.t - 3.0).abs() < 1e-4);
        assert!((hit.normal - Vec3::NEG_Z).length() < 1e-4);
    }

    #[test]
    fn test_rotated_box() {
        let s = scene();
        let g = AnalyticGeometry::from_scene(&s);
        // box at local (0, -3, 0) rotated 90 degrees about Z lands at world (3, 0, 0)
        let hit = g.trace(Vec3::new(10.0, 0.0, 0.0), Vec3::NEG_X, &s.data);
        assert_eq!(hit.material, 1.0);
        assert!((hit.t - 6.0).abs() < 1e-3);
        assert!((hit.normal - Vec3::X).length() < 1e-3);
    }

    #[test]
    fn test_blend_code() {
        let hit = Hit::new(2.0, Vec3::NEG_Z, 3);
        assert_eq!(hit.blend, 0.0);
        let b = hit.blended(5, 0.25);
        assert_eq!((b.material, b.blend), (3.0, 5.25));
        // secondary 0 at weight 0 must still read as a blend
        assert!(hit.blended(0, 0.0).blend > 0.0);
        assert!(hit.blended(2, 1.0).blend < 3.0);
    }

    #[test]
    fn test_miss_and_preview() {
        let s = scene();
        let g = AnalyticGeometry::from_scene(&s);
        let hit = g.trace(Vec3::new(0.0, 50.0, 0.0), Vec3::Y, &s.data);
        assert!(!hit.is_hit());
        assert_eq!(hit.t, FAR_DISTANCE);
        let p = preview_hit(Vec3::new(0.0, 0.0, -3.0), Vec3::Z, 4);
        assert_eq!(p.material, 4.0);
        assert!((p.t - 2.0).abs() < 1e-5);
    }
}
