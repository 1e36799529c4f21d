//! Command/uniform builder.
//!
//! Packs everything one sample dispatch reads besides the G-buffer: camera,
//! background, bounce depth, light list and the per-call random values.
//! Thumbnails use a fixed camera and sun so they look the same whatever the
//! live view is doing.

use bytemuck::{Pod, Zeroable};
use glam::{Vec3, Vec4};
use rand::Rng;
use std::sync::Arc;

use super::kit::Extent;
use super::settings::RenderSettings;
use crate::graph::{CameraRecord, CompiledScene, LightKind, LightRecord};
use crate::util::{CompileError, CompileErrorKind, Error, Result};

/// Uniform block matching the WGSL `RenderUniforms` struct (96 bytes).
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct RenderUniforms {
    /// Camera position; w is the image plane scale.
    pub camera_origin: [f32; 4],
    /// Look-at point; w is 1 for orthographic cameras.
    pub camera_look_at: [f32; 4],
    pub background: [f32; 4],
    /// Per-call random values, xy jitter the camera ray.
    pub random_vector: [f32; 4],
    pub size: [u32; 2],
    pub sample_index: u32,
    pub max_depth: u32,
    pub num_lights: u32,
    /// Material traced on the preview sphere, -1 for the scene.
    pub preview_material: i32,
    pub no_shadows: u32,
    pub frame_seed: u32,
}

/// Light list entry matching the WGSL `LightEntry` struct.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct LightEntry {
    /// type (0 sun, 1 sphere), data slot, material, radius
    pub params: [f32; 4],
    /// sun radiance, precomputed area
    pub emission: [f32; 4],
}

impl LightEntry {
    pub const SUN: f32 = 0.0;
    pub const SPHERE: f32 = 1.0;

    pub fn from_record(light: &LightRecord) -> Self {
        let kind = match light.kind {
            LightKind::Sun => Self::SUN,
            LightKind::Sphere => Self::SPHERE,
        };
        Self {
            params: [kind, light.data as f32, light.material as f32, light.radius],
            emission: [light.emission.x, light.emission.y, light.emission.z, light.area()],
        }
    }

    pub fn is_sun(&self) -> bool {
        self.params[0] < 0.5
    }

    pub fn slot(&self) -> usize {
        self.params[1] as usize
    }

    pub fn material(&self) -> i32 {
        self.params[2].round() as i32
    }

    pub fn area(&self) -> f32 {
        self.emission[3]
    }
}

/// Everything one sample dispatch reads besides the G-buffer.
#[derive(Debug, Clone)]
pub struct FrameInputs {
    pub uniforms: RenderUniforms,
    /// Never empty: a zeroed entry pads an empty list for binding.
    pub lights: Vec<LightEntry>,
    pub data: Arc<Vec<Vec4>>,
}

impl FrameInputs {
    /// Lights actually in use (excludes padding).
    pub fn active_lights(&self) -> &[LightEntry] {
        &self.lights[..self.uniforms.num_lights as usize]
    }

    pub fn extent(&self) -> Extent {
        Extent::new(self.uniforms.size[0], self.uniforms.size[1])
    }
}

/// Fixed thumbnail camera.
pub const ICON_CAMERA_ORIGIN: Vec3 = Vec3::new(0.0, 0.0, -3.2);
pub const ICON_FOV: f32 = 40.0;
/// Fixed thumbnail sun radiance.
pub const ICON_SUN_EMISSION: f32 = 4.0;

pub fn icon_sun_direction() -> Vec3 {
    Vec3::new(0.3, 0.5, -1.0).normalize()
}

/// Incremental builder for [`FrameInputs`].
#[derive(Debug, Clone)]
pub struct FrameBuilder {
    uniforms: RenderUniforms,
    lights: Vec<LightEntry>,
    data: Arc<Vec<Vec4>>,
}

impl FrameBuilder {
    pub fn new(extent: Extent, data: Arc<Vec<Vec4>>) -> Self {
        let uniforms = RenderUniforms {
            size: [extent.width, extent.height],
            max_depth: 1,
            preview_material: -1,
            ..Zeroable::zeroed()
        };
        Self { uniforms, lights: Vec::new(), data }
    }

    pub fn camera(mut self, camera: &CameraRecord) -> Self {
        let o = camera.origin;
        let l = camera.look_at;
        self.uniforms.camera_origin = [o.x, o.y, o.z, camera.scale()];
        self.uniforms.camera_look_at = [l.x, l.y, l.z, if camera.ortho { 1.0 } else { 0.0 }];
        self
    }

    pub fn background(mut self, color: Vec3) -> Self {
        self.uniforms.background = [color.x, color.y, color.z, 1.0];
        self
    }

    pub fn max_depth(mut self, depth: u32) -> Self {
        self.uniforms.max_depth = depth.max(1);
        self
    }

    pub fn sample_index(mut self, index: u32) -> Self {
        self.uniforms.sample_index = index;
        self
    }

    pub fn light(mut self, entry: LightEntry) -> Self {
        self.lights.push(entry);
        self
    }

    pub fn preview(mut self, material: i32) -> Self {
        self.uniforms.preview_material = material;
        self
    }

    pub fn no_shadows(mut self, on: bool) -> Self {
        self.uniforms.no_shadows = on as u32;
        self
    }

    /// Draw the frame seed and random vector.
    pub fn randomize(mut self, rng: &mut impl Rng) -> Self {
        self.uniforms.frame_seed = rng.gen();
        self.uniforms.random_vector = [rng.gen(), rng.gen(), rng.gen(), rng.gen()];
        self
    }

    pub fn build(mut self) -> FrameInputs {
        self.uniforms.num_lights = self.lights.len() as u32;
        if self.lights.is_empty() {
            self.lights.push(LightEntry::zeroed());
        }
        FrameInputs { uniforms: self.uniforms, lights: self.lights, data: self.data }
    }
}

/// Inputs for one sample of the main view.
pub fn main_frame(
    scene: &CompiledScene,
    settings: &RenderSettings,
    extent: Extent,
    sample_index: u32,
    rng: &mut impl Rng,
) -> Result<FrameInputs> {
    let camera = scene.entities.camera.as_ref().ok_or_else(|| {
        Error::Compile(CompileError::new(CompileErrorKind::MissingCamera, 0))
    })?;
    let background = scene.render.background.unwrap_or(Vec3::from_array(settings.background));
    let depth = scene.render.depth.unwrap_or(settings.max_depth);
    let frame = scene
        .entities
        .lights
        .iter()
        .fold(FrameBuilder::new(extent, scene.data.clone()), |b, l| b.light(LightEntry::from_record(l)));
    Ok(frame
        .camera(camera)
        .background(background)
        .max_depth(depth)
        .sample_index(sample_index)
        .randomize(rng)
        .build())
}

/// Inputs for one thumbnail sample.
///
/// `preview_material` renders that material on a unit sphere, -1 renders
/// the scene geometry. Camera, sun and background are fixed.
pub fn icon_frame(
    scene: &CompiledScene,
    preview_material: i32,
    settings: &RenderSettings,
    extent: Extent,
    sample_index: u32,
    rng: &mut impl Rng,
) -> FrameInputs {
    let mut data = Vec::with_capacity(scene.data.len() + 1);
    data.extend_from_slice(&scene.data);
    let sun_slot = data.len();
    data.push(icon_sun_direction().extend(0.0));

    let camera = CameraRecord { origin: ICON_CAMERA_ORIGIN, look_at: Vec3::ZERO, fov: ICON_FOV, ortho: false };
    let sun = LightRecord {
        kind: LightKind::Sun,
        data: sun_slot,
        material: -1,
        radius: 0.0,
        emission: Vec3::splat(ICON_SUN_EMISSION),
    };
    FrameBuilder::new(extent, Arc::new(data))
        .camera(&camera)
        .background(Vec3::from_array(settings.icon_background))
        .max_depth(settings.icon_max_depth)
        .light(LightEntry::from_record(&sun))
        .preview(preview_material)
        .no_shadows(true)
        .sample_index(sample_index)
        .randomize(rng)
        .build()
}
