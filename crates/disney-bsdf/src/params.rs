//! Principled material parameters
//!
//! Field set and defaults match `BsdfMaterial` / `default_material()` in
//! `shaders/disney.wgsl`.

use glam::Vec3;

/// Disney principled BSDF parameters.
///
/// All colors are linear.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BsdfParams {
    pub albedo: Vec3,
    pub specular: f32,
    pub emission: Vec3,
    pub anisotropic: f32,
    pub metallic: f32,
    pub roughness: f32,
    pub subsurface: f32,
    pub specular_tint: f32,
    pub sheen: f32,
    pub sheen_tint: f32,
    pub clearcoat: f32,
    pub clearcoat_gloss: f32,
    pub transmission: f32,
    pub ior: f32,
    pub extinction: Vec3,
}

impl Default for BsdfParams {
    fn default() -> Self {
        Self {
            albedo: Vec3::ZERO,
            specular: 0.0,
            emission: Vec3::ZERO,
            anisotropic: 0.0,
            metallic: 0.0,
            roughness: 0.5,
            subsurface: 0.0,
            specular_tint: 0.0,
            sheen: 0.0,
            sheen_tint: 0.0,
            clearcoat: 0.0,
            clearcoat_gloss: 0.0,
            transmission: 0.0,
            ior: 1.45,
            extinction: Vec3::ONE,
        }
    }
}

impl BsdfParams {
    /// Pure diffuse surface
    pub fn diffuse(albedo: Vec3) -> Self {
        Self { albedo, ..Default::default() }
    }

    /// Metallic conductor
    pub fn metal(albedo: Vec3, roughness: f32) -> Self {
        Self { albedo, metallic: 1.0, roughness, ..Default::default() }
    }

    /// Rough dielectric (glass-like)
    pub fn glass(albedo: Vec3, roughness: f32, ior: f32) -> Self {
        Self { albedo, transmission: 1.0, roughness, ior, ..Default::default() }
    }

    /// Emitter with no reflective response
    pub fn emitter(emission: Vec3) -> Self {
        Self { emission, ..Default::default() }
    }

    /// Whether this material emits light.
    pub fn is_emitter(&self) -> bool {
        self.emission.max_element() > 0.0
    }

    /// Componentwise lerp of all parameters, exact at `k = 0` and `k = 1`.
    pub fn lerp(&self, other: &Self, k: f32) -> Self {
        let m = |a: f32, b: f32| a * (1.0 - k) + b * k;
        let v = |a: Vec3, b: Vec3| a * (1.0 - k) + b * k;
        Self {
            albedo: v(self.albedo, other.albedo),
            specular: m(self.specular, other.specular),
            emission: v(self.emission, other.emission),
            anisotropic: m(self.anisotropic, other.anisotropic),
            metallic: m(self.metallic, other.metallic),
            roughness: m(self.roughness, other.roughness),
            subsurface: m(self.subsurface, other.subsurface),
            specular_tint: m(self.specular_tint, other.specular_tint),
            sheen: m(self.sheen, other.sheen),
            sheen_tint: m(self.sheen_tint, other.sheen_tint),
            clearcoat: m(self.clearcoat, other.clearcoat),
            clearcoat_gloss: m(self.clearcoat_gloss, other.clearcoat_gloss),
            transmission: m(self.transmission, other.transmission),
            ior: m(self.ior, other.ior),
            extinction: v(self.extinction, other.extinction),
        }
    }

    /// Pack into the six G-buffer parameter channels.
    ///
    /// Layout: albedo+specular, emission+anisotropic,
    /// metallic/roughness/subsurface/specular_tint,
    /// sheen/sheen_tint/clearcoat/clearcoat_gloss,
    /// (light direction)+transmission, ior+extinction.
    pub fn pack(&self, light_dir: Vec3) -> [[f32; 4]; 6] {
        [
            [self.albedo.x, self.albedo.y, self.albedo.z, self.specular],
            [self.emission.x, self.emission.y, self.emission.z, self.anisotropic],
            [self.metallic, self.roughness, self.subsurface, self.specular_tint],
            [self.sheen, self.sheen_tint, self.clearcoat, self.clearcoat_gloss],
            [light_dir.x, light_dir.y, light_dir.z, self.transmission],
            [self.ior, self.extinction.x, self.extinction.y, self.extinction.z],
        ]
    }

    /// Inverse of [`BsdfParams::pack`]; returns the parameters and the light direction.
    pub fn unpack(p: &[[f32; 4]; 6]) -> (Self, Vec3) {
        let params = Self {
            albedo: Vec3::new(p[0][0], p[0][1], p[0][2]),
            specular: p[0][3],
            emission: Vec3::new(p[1][0], p[1][1], p[1][2]),
            anisotropic: p[1][3],
            metallic: p[2][0],
            roughness: p[2][1],
            subsurface: p[2][2],
            specular_tint: p[2][3],
            sheen: p[3][0],
            sheen_tint: p[3][1],
            clearcoat: p[3][2],
            clearcoat_gloss: p[3][3],
            transmission: p[4][3],
            ior: p[5][0],
            extinction: Vec3::new(p[5][1], p[5][2], p[5][3]),
        };
        (params, Vec3::new(p[4][0], p[4][1], p[4][2]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let m = BsdfParams::default();
        assert_eq!(m.roughness, 0.5);
        assert_eq!(m.ior, 1.45);
        assert_eq!(m.extinction, Vec3::ONE);
        assert!(!m.is_emitter());
    }

    #[test]
    fn test_pack_layout() {
        let m = BsdfParams { transmission: 0.25, ior: 1.5, ..BsdfParams::metal(Vec3::new(1.0, 0.5, 0.2), 0.3) };
        let packed = m.pack(Vec3::Y);
        assert_eq!(packed[2][0], 1.0);
        assert_eq!(packed[2][1], 0.3);
        assert_eq!(packed[4], [0.0, 1.0, 0.0, 0.25]);
        let (back, dir) = BsdfParams::unpack(&packed);
        assert_eq!(back, m);
        assert_eq!(dir, Vec3::Y);
    }

    #[test]
    fn test_lerp_endpoints() {
        let a = BsdfParams::diffuse(Vec3::splat(0.8));
        let b = BsdfParams::metal(Vec3::new(1.0, 0.7, 0.3), 0.1);
        assert_eq!(a.lerp(&b, 0.0), a);
        let end = a.lerp(&b, 1.0);
        assert!((end.metallic - 1.0).abs() < 1e-6);
        assert!((end.roughness - 0.1).abs() < 1e-6);
    }
}
