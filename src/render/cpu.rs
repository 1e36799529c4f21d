//! Rayon reference backend.
//!
//! Runs the same passes as the WGSL program on the same per-pixel channel
//! layout, with the same random streams: every pass reseeds a
//! [`Pcg`] from (pixel, frame seed, salt) exactly as the shader does. Pixels
//! are independent, so each one runs its bounce loop to completion inside a
//! parallel iterator.

use disney_bsdf::{cone_solid_angle, disney_eval, disney_sample, pcg_hash, power_heuristic, uniform_sample_sphere, BsdfParams, Pcg, ShadingState};
use glam::{Vec2, Vec3, Vec4};
use image::{Rgba, Rgba32FImage};
use rayon::prelude::*;

use super::backend::RenderBackend;
use super::geometry::{preview_hit, AnalyticGeometry, GeometryPass, Hit, DEAD_ID, MISS_ID};
use super::kit::{Channel, Extent, RenderKit, RenderTarget, CHANNEL_COUNT};
use super::settings::RenderSettings;
use super::uniforms::{FrameInputs, LightEntry, RenderUniforms};
use crate::graph::CompiledScene;
use crate::shader::{MaterialInputs, MaterialProgram};
use crate::util::{Error, Result, FAR_DISTANCE, RAY_EPSILON};

/// Angular radius of the sun disk in radians.
pub const SUN_ANGLE: f32 = 0.0047;

/// Shadow distances at or beyond this count as unoccluded for the sun.
const SUN_VISIBLE: f32 = 1000.0;

type PixelChannels = [Vec4; CHANNEL_COUNT];

/// G-buffer of one target, one channel array per pixel.
#[derive(Debug)]
pub struct CpuKit {
    target: RenderTarget,
    extent: Extent,
    pixels: Vec<PixelChannels>,
}

impl RenderKit for CpuKit {
    fn extent(&self) -> Extent {
        self.extent
    }
}

impl CpuKit {
    pub fn target(&self) -> RenderTarget {
        self.target
    }

    pub fn channel(&self, channel: Channel, x: u32, y: u32) -> Vec4 {
        self.pixels[(y * self.extent.width + x) as usize][channel.index()]
    }
}

/// Materials, environment and geometry for one generated program.
pub struct CpuProgram {
    pub hash: u64,
    materials: Vec<MaterialProgram>,
    environment: Option<MaterialProgram>,
    geometry: Box<dyn GeometryPass>,
}

impl CpuProgram {
    /// Program over a custom geometry pass.
    pub fn with_geometry(scene: &CompiledScene, geometry: Box<dyn GeometryPass>) -> Self {
        Self {
            hash: scene.program.hash,
            materials: scene.materials.clone(),
            environment: scene.environment.clone(),
            geometry,
        }
    }

    fn resolve_material(&self, id: i32, inp: &MaterialInputs) -> BsdfParams {
        usize::try_from(id)
            .ok()
            .and_then(|i| self.materials.get(i))
            .map(|m| m.evaluate(inp))
            .unwrap_or_default()
    }

    fn environment(&self, inp: &MaterialInputs, background: Vec3) -> Vec3 {
        match &self.environment {
            Some(env) => env.evaluate_environment(inp, background),
            None => background,
        }
    }
}

/// CPU backend.
pub struct CpuBackend {
    pool: Option<rayon::ThreadPool>,
    max_pixels: usize,
}

impl CpuBackend {
    pub fn new(settings: &RenderSettings) -> Result<Self> {
        let pool = match settings.workers {
            0 => None,
            n => Some(
                rayon::ThreadPoolBuilder::new()
                    .num_threads(n)
                    .thread_name(|i| format!("signed-render-{i}"))
                    .build()
                    .map_err(|e| Error::other(e.to_string()))?,
            ),
        };
        Ok(Self { pool, max_pixels: usize::MAX })
    }

    /// Refuse kits larger than `pixels`, reported as resource exhaustion.
    pub fn with_max_pixels(mut self, pixels: usize) -> Self {
        self.max_pixels = pixels;
        self
    }
}

impl RenderBackend for CpuBackend {
    type Kit = CpuKit;
    type Program = CpuProgram;

    fn name(&self) -> &'static str {
        "cpu"
    }

    fn build_program(&mut self, scene: &CompiledScene) -> Result<CpuProgram> {
        Ok(CpuProgram::with_geometry(scene, Box::new(AnalyticGeometry::from_scene(scene))))
    }

    fn allocate_kit(&mut self, target: RenderTarget, extent: Extent) -> Result<CpuKit> {
        let exhausted = || Error::ResourceExhausted { target: target.to_string(), width: extent.width, height: extent.height };
        let n = extent.pixels();
        if extent.is_empty() || n > self.max_pixels {
            return Err(exhausted());
        }
        let mut pixels = Vec::new();
        pixels.try_reserve_exact(n).map_err(|_| exhausted())?;
        pixels.resize(n, [Vec4::ZERO; CHANNEL_COUNT]);
        Ok(CpuKit { target, extent, pixels })
    }

    fn clear_kit(&mut self, kit: &mut CpuKit) -> Result<()> {
        kit.pixels.par_iter_mut().for_each(|p| *p = [Vec4::ZERO; CHANNEL_COUNT]);
        Ok(())
    }

    fn render_sample(&mut self, program: &CpuProgram, kit: &mut CpuKit, frame: &FrameInputs) -> Result<()> {
        if frame.extent() != kit.extent {
            return Err(Error::InvalidState(format!(
                "frame is {:?} but {} kit is {:?}",
                frame.extent(),
                kit.target,
                kit.extent
            )));
        }
        let pixels = &mut kit.pixels;
        let mut job = move || {
            pixels.par_iter_mut().enumerate().for_each(|(px, channels)| {
                PixelPasses { program, frame, u: &frame.uniforms, px: px as u32, g: channels }.run();
            })
        };
        match &self.pool {
            Some(pool) => pool.install(job),
            None => job(),
        }
        Ok(())
    }

    fn read_output(&mut self, kit: &CpuKit) -> Result<Rgba32FImage> {
        let Extent { width, height } = kit.extent;
        Ok(Rgba32FImage::from_fn(width, height, |x, y| {
            let a = kit.pixels[(y * width + x) as usize][Channel::Accum.index()];
            Rgba([a.x, a.y, a.z, 1.0])
        }))
    }
}

/// Blend of two materials by `smoothstep(0, 1, k)`: `a` at 0, `b` at 1.
pub fn blend_materials(a: &BsdfParams, b: &BsdfParams, k: f32) -> BsdfParams {
    a.lerp(b, smoothstep(0.0, 1.0, k))
}

fn smoothstep(e0: f32, e1: f32, x: f32) -> f32 {
    let t = ((x - e0) / (e1 - e0)).clamp(0.0, 1.0);
    t * t * (3.0 - 2.0 * t)
}

fn pixel_hash(px: u32) -> f32 {
    pcg_hash(px) as f32 / 4_294_967_296.0
}

/// `n` flipped to the side of `l`.
fn toward(n: Vec3, l: Vec3) -> Vec3 {
    if n.dot(l) > 0.0 { n } else { -n }
}

fn is_equal(a: f32, b: f32) -> bool {
    (a - b).abs() < 0.1
}

fn basis(n: Vec3) -> (Vec3, Vec3) {
    let up = if n.z.abs() < 0.999 { Vec3::Z } else { Vec3::X };
    let t = up.cross(n).normalize();
    (t, n.cross(t))
}

fn sample_cone(axis: Vec3, half_angle: f32, rng: &mut Pcg) -> Vec3 {
    let r1 = rng.next_f32();
    let r2 = rng.next_f32();
    let cos_t = 1.0 - r1 * (1.0 - half_angle.cos());
    let sin_t = (1.0 - cos_t * cos_t).max(0.0).sqrt();
    let phi = std::f32::consts::TAU * r2;
    let (t, b) = basis(axis);
    (t * (phi.cos() * sin_t) + b * (phi.sin() * sin_t) + axis * cos_t).normalize()
}

/// Camera ray through the (fractional) pixel coordinate.
pub fn camera_ray(u: &RenderUniforms, coord: Vec2) -> (Vec3, Vec3) {
    let size = Vec2::new(u.size[0] as f32, u.size[1] as f32);
    let ndc = Vec2::new(coord.x / size.x * 2.0 - 1.0, 1.0 - coord.y / size.y * 2.0);
    let origin = Vec3::from_slice(&u.camera_origin[..3]);
    let fwd = (Vec3::from_slice(&u.camera_look_at[..3]) - origin).normalize();
    let right = Vec3::Y.cross(fwd);
    let right = if right.length() < 1e-4 { Vec3::X } else { right.normalize() };
    let up = fwd.cross(right);
    let scale = u.camera_origin[3];
    let offset = right * (ndc.x * scale * size.x / size.y) + up * (ndc.y * scale);
    if u.camera_look_at[3] > 0.5 {
        (origin + offset, fwd)
    } else {
        (origin, (fwd + offset).normalize())
    }
}

/// The sample passes for one pixel.
struct PixelPasses<'a> {
    program: &'a CpuProgram,
    frame: &'a FrameInputs,
    u: &'a RenderUniforms,
    px: u32,
    g: &'a mut PixelChannels,
}

impl PixelPasses<'_> {
    #[inline]
    fn load(&self, ch: Channel) -> Vec4 {
        self.g[ch.index()]
    }

    #[inline]
    fn store(&mut self, ch: Channel, v: Vec4) {
        self.g[ch.index()] = v;
    }

    fn run(&mut self) {
        for bounce in 0..self.u.max_depth.max(1) {
            if bounce == 0 {
                self.geometry_primary();
            } else {
                self.geometry_bounce();
            }
            self.material_resolve();
            self.geometry_shadow();
            self.direct_light();
            self.path_trace();
        }
        self.accumulate();
    }

    fn material_input(&self, pos: Vec3, dir: Vec3, normal: Vec3, hash: f32) -> MaterialInputs {
        let w = self.u.size[0];
        let size = Vec2::new(w as f32, self.u.size[1] as f32);
        let coord = Vec2::new((self.px % w) as f32, (self.px / w) as f32);
        let uv = (coord + 0.5) / size;
        MaterialInputs { ray_position: pos, ray_direction: dir, normal, uv, view_size: size, hash, gradient: uv.y }
    }

    fn trace(&self, ro: Vec3, rd: Vec3) -> Hit {
        if self.u.preview_material >= 0 {
            preview_hit(ro, rd, self.u.preview_material)
        } else {
            self.program.geometry.trace(ro, rd, &self.frame.data)
        }
    }

    fn write_hit(&mut self, hit: Hit) {
        self.store(Channel::Depth, Vec4::new(hit.t, pixel_hash(self.px), hit.blend, hit.material));
        self.store(Channel::Normal, hit.normal.extend(0.0));
    }

    fn geometry_primary(&mut self) {
        let mut rng = Pcg::new(self.px, self.u.frame_seed, 0);
        let jitter = Vec2::new(rng.next_f32(), rng.next_f32()) + Vec2::new(self.u.random_vector[0], self.u.random_vector[1]);
        let jitter = jitter - jitter.floor();
        let w = self.u.size[0];
        let coord = Vec2::new((self.px % w) as f32, (self.px / w) as f32) + jitter;
        let (ro, rd) = camera_ray(self.u, coord);
        self.store(Channel::CamOrigin, ro.extend(0.0));
        self.store(Channel::CamDir, rd.extend(0.0));
        self.store(Channel::Radiance, Vec4::ZERO);
        self.store(Channel::Throughput, Vec4::new(1.0, 1.0, 1.0, 0.0));
        self.store(Channel::Absorption, Vec4::ZERO);
        self.store(Channel::Direct, Vec4::ZERO);
        let hit = self.trace(ro, rd);
        self.write_hit(hit);
    }

    fn geometry_bounce(&mut self) {
        if self.load(Channel::Normal).w < 0.0 {
            self.store(Channel::Depth, Vec4::new(FAR_DISTANCE, 0.0, 0.0, DEAD_ID));
            return;
        }
        let hit = self.trace(self.load(Channel::CamOrigin).truncate(), self.load(Channel::CamDir).truncate());
        self.write_hit(hit);
    }

    fn hit_material(&self, depth: Vec4, inp: &MaterialInputs) -> BsdfParams {
        let m = self.program.resolve_material(depth.w.round() as i32, inp);
        if depth.z > 0.0 {
            let other = self.program.resolve_material(depth.z.floor() as i32, inp);
            return blend_materials(&other, &m, depth.z - depth.z.floor());
        }
        m
    }

    fn light_material(&self, light: &LightEntry, p: Vec3, n: Vec3) -> BsdfParams {
        let inp = MaterialInputs {
            ray_position: p,
            ray_direction: -n,
            normal: n,
            uv: Vec2::splat(0.5),
            view_size: Vec2::new(self.u.size[0] as f32, self.u.size[1] as f32),
            hash: 0.0,
            gradient: 0.5,
        };
        self.program.resolve_material(light.material(), &inp)
    }

    fn pack(&mut self, m: &BsdfParams, light_dir: Vec3) {
        for (ch, p) in Channel::PARAMS.into_iter().zip(m.pack(light_dir)) {
            self.store(ch, Vec4::from_array(p));
        }
    }

    fn unpack(&self) -> BsdfParams {
        let p = Channel::PARAMS.map(|ch| self.load(ch).to_array());
        BsdfParams::unpack(&p).0
    }

    fn material_resolve(&mut self) {
        let depth = self.load(Channel::Depth);
        if depth.w < 0.0 {
            self.store(Channel::LightOrigin, Vec4::new(0.0, 0.0, 0.0, -1.0));
            return;
        }
        let bounce = self.load(Channel::Absorption).w as u32;
        let mut rng = Pcg::new(self.px, self.u.frame_seed, bounce * 8 + 1);
        let ro = self.load(Channel::CamOrigin).truncate();
        let rd = self.load(Channel::CamDir).truncate();
        let n = self.load(Channel::Normal).truncate();
        let pos = ro + rd * depth.x;
        let m = self.hit_material(depth, &self.material_input(pos, rd, n, depth.y));

        let mut light_dir = Vec3::ZERO;
        let count = self.u.num_lights;
        if count == 0 {
            self.store(Channel::LightOrigin, Vec4::new(0.0, 0.0, 0.0, -1.0));
        } else {
            let li = ((rng.next_f32() * count as f32) as u32).min(count - 1);
            let light = self.frame.lights[li as usize];
            let slot = self.frame.data[light.slot()];
            let mut dist = FAR_DISTANCE;
            if light.is_sun() {
                light_dir = sample_cone(slot.truncate(), SUN_ANGLE, &mut rng);
            } else {
                let r1 = rng.next_f32();
                let r2 = rng.next_f32();
                let target_point = slot.truncate() + uniform_sample_sphere(r1, r2) * slot.w;
                let origin = pos + toward(n, target_point - pos) * RAY_EPSILON;
                dist = (target_point - origin).length();
                light_dir = (target_point - origin) / dist.max(1e-6);
            }
            let origin = pos + toward(n, light_dir) * RAY_EPSILON;
            self.store(Channel::LightOrigin, origin.extend(li as f32));
            self.store(Channel::LightDir, light_dir.extend(dist));
        }
        self.pack(&m, light_dir);
    }

    fn geometry_shadow(&mut self) {
        let lo = self.load(Channel::LightOrigin);
        if lo.w < 0.0 || self.load(Channel::Depth).w < 0.0 {
            self.store(Channel::LightDepth, Vec4::new(0.0, 0.0, 0.0, MISS_ID));
            return;
        }
        let ld = self.load(Channel::LightDir);
        if self.u.no_shadows != 0 {
            let light = self.frame.lights[lo.w as usize];
            let dist = if light.is_sun() { FAR_DISTANCE } else { ld.w };
            self.store(Channel::LightDepth, Vec4::new(dist, 0.0, 0.0, light.params[2]));
            return;
        }
        let hit = self.trace(lo.truncate(), ld.truncate());
        self.store(Channel::LightDepth, Vec4::new(hit.t, 0.0, 0.0, hit.material));
    }

    fn direct_light(&mut self) {
        self.store(Channel::Direct, Vec4::ZERO);
        let lo = self.load(Channel::LightOrigin);
        if lo.w < 0.0 || self.load(Channel::Depth).w < 0.0 {
            return;
        }
        if let Some(direct) = self.direct_contribution(lo) {
            self.store(Channel::Direct, direct.extend(0.0));
        }
    }

    fn direct_contribution(&self, lo: Vec4) -> Option<Vec3> {
        let light = self.frame.lights[lo.w as usize];
        let ld = self.load(Channel::LightDir);
        let shadow = self.load(Channel::LightDepth);
        let l = ld.truncate();
        let rd = self.load(Channel::CamDir).truncate();
        let s = ShadingState::new(self.unpack(), self.load(Channel::Normal).truncate(), rd);
        if l.dot(s.ffnormal) <= 0.0 {
            return None;
        }
        let e = disney_eval(&s, -rd, s.ffnormal, l);
        if e.pdf <= 0.0 {
            return None;
        }
        let lights = self.u.num_lights as f32;
        let (light_pdf, emission, mis) = if light.is_sun() {
            if shadow.x < SUN_VISIBLE {
                return None;
            }
            // Delta-like sun: BSDF sampling never lands on the disk, so no MIS.
            let pdf = 1.0 / cone_solid_angle(SUN_ANGLE);
            (pdf, Vec3::from_slice(&light.emission[..3]) * pdf, 1.0)
        } else {
            if !is_equal(shadow.w, light.params[2]) {
                return None;
            }
            let c = self.frame.data[light.slot()].truncate();
            let p = lo.truncate() + l * ld.w;
            let ln = (p - c).normalize();
            let cos_l = l.dot(ln);
            if cos_l >= 0.0 {
                return None;
            }
            let pdf = ld.w * ld.w / (light.area() * cos_l.abs());
            let emission = self.light_material(&light, p, ln).emission;
            (pdf, emission, power_heuristic(pdf / lights, e.pdf))
        };
        let pdf_l = light_pdf / lights;
        Some(mis * e.f * s.ffnormal.dot(l).abs() * emission / pdf_l)
    }

    fn terminate(&mut self, radiance: Vec3) {
        self.store(Channel::Radiance, radiance.extend(0.0));
        let n = self.load(Channel::Normal);
        self.store(Channel::Normal, n.truncate().extend(-1.0));
    }

    fn find_light(&self, id: f32) -> Option<&LightEntry> {
        self.frame.active_lights().iter().find(|l| !l.is_sun() && is_equal(l.params[2], id))
    }

    fn path_trace(&mut self) {
        let normal = self.load(Channel::Normal);
        if normal.w < 0.0 {
            return;
        }
        let depth = self.load(Channel::Depth);
        let ro = self.load(Channel::CamOrigin).truncate();
        let rd = self.load(Channel::CamDir).truncate();
        let absorption = self.load(Channel::Absorption);
        let bounce = absorption.w as u32;
        let mut rng = Pcg::new(self.px, self.u.frame_seed, bounce * 8 + 3);

        let mut radiance = self.load(Channel::Radiance).truncate();
        let throughput = self.load(Channel::Throughput);

        if depth.w < 0.0 {
            let background = Vec3::from_slice(&self.u.background[..3]);
            let inp = self.material_input(ro, rd, Vec3::ZERO, depth.y);
            let env = self.program.environment(&inp, background);
            self.terminate(radiance + env * throughput.truncate());
            return;
        }

        let n = normal.truncate();
        let pos = ro + rd * depth.x;
        let mut sigma = absorption.truncate();
        let fog = (-sigma * depth.x).exp();
        let tp = throughput.truncate() * fog;
        if n.dot(rd) > 0.0 {
            sigma = Vec3::ZERO;
        }

        let m = self.unpack();
        if m.emission.cmpgt(Vec3::ZERO).any() {
            let mut w = 1.0;
            if throughput.w > 0.0 {
                if let Some(light) = self.find_light(depth.w) {
                    let cos_l = n.dot(rd).abs().max(1e-6);
                    let light_pdf = depth.x * depth.x / (light.area() * cos_l) / self.u.num_lights as f32;
                    w = power_heuristic(throughput.w, light_pdf);
                }
            }
            self.terminate(radiance + m.emission * tp * w);
            return;
        }

        radiance += self.load(Channel::Direct).truncate() * tp;

        let s = ShadingState::new(m, n, rd);
        let smp = disney_sample(&s, -rd, s.ffnormal, &mut rng);
        if smp.pdf <= 0.0 {
            self.terminate(radiance);
            return;
        }
        if smp.l.dot(s.ffnormal) < 0.0 && n.dot(rd) < 0.0 {
            sigma = -(s.mat.extinction.max(Vec3::splat(1e-6))).ln() / 0.2;
        }
        let weight = smp.f * s.ffnormal.dot(smp.l).abs() / smp.pdf;
        self.store(Channel::Radiance, radiance.extend(0.0));
        self.store(Channel::Throughput, (tp * weight).extend(smp.pdf));
        self.store(Channel::Absorption, sigma.extend((bounce + 1) as f32));
        self.store(Channel::CamOrigin, (pos + toward(n, smp.l) * RAY_EPSILON).extend(0.0));
        self.store(Channel::CamDir, smp.l.extend(0.0));
    }

    fn accumulate(&mut self) {
        let mut c = self.load(Channel::Radiance).truncate();
        if !c.is_finite() || c.cmplt(Vec3::ZERO).any() || c.cmpgt(Vec3::splat(1e30)).any() {
            c = Vec3::ZERO;
        }
        let n = self.u.sample_index as f32;
        let avg = if self.u.sample_index > 0 { (self.load(Channel::Accum).truncate() * n + c) / (n + 1.0) } else { c };
        self.store(Channel::Accum, avg.extend(1.0));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{compile, GraphBuilder};
    use crate::render::uniforms::main_frame;
    use rand::SeedableRng;

    #[test]
    fn test_allocation_limit() {
        let mut backend = CpuBackend::new(&RenderSettings::default()).unwrap().with_max_pixels(100);
        assert!(backend.allocate_kit(RenderTarget::Main, Extent::new(10, 10)).is_ok());
        let err = backend.allocate_kit(RenderTarget::Main, Extent::new(11, 10)).unwrap_err();
        assert!(err.is_resource());
        assert!(backend.allocate_kit(RenderTarget::Icon, Extent::new(0, 4)).unwrap_err().is_resource());
    }

    #[test]
    fn test_camera_ray_center() {
        let mut u: RenderUniforms = bytemuck::Zeroable::zeroed();
        u.size = [4, 4];
        u.camera_origin = [0.0, 0.0, -5.0, 1.0];
        let (ro, rd) = camera_ray(&u, Vec2::new(2.0, 2.0));
        assert_eq!(ro, Vec3::new(0.0, 0.0, -5.0));
        assert!((rd - Vec3::Z).length() < 1e-6);
        // top row looks up
        let (_, rd) = camera_ray(&u, Vec2::new(2.0, 0.0));
        assert!(rd.y > 0.0);
    }

    #[test]
    fn test_background_only() {
        let graph = GraphBuilder::new()
            .render(&[("Background", "0.25, 0.5, 1")], |r| r.camera(&[]))
            .build();
        let scene = compile(&graph).unwrap();
        let mut backend = CpuBackend::new(&RenderSettings::default()).unwrap();
        let program = backend.build_program(&scene).unwrap();
        let mut kit = backend.allocate_kit(RenderTarget::Main, Extent::new(8, 8)).unwrap();
        let mut rng = rand::rngs::StdRng::seed_from_u64(0);
        for i in 0..3 {
            let frame = main_frame(&scene, &RenderSettings::default(), Extent::new(8, 8), i, &mut rng).unwrap();
            backend.render_sample(&program, &mut kit, &frame).unwrap();
        }
        let img = backend.read_output(&kit).unwrap();
        assert_eq!(img.get_pixel(3, 5).0, [0.25, 0.5, 1.0, 1.0]);
    }

    #[test]
    fn test_extent_mismatch_is_rejected() {
        let graph = GraphBuilder::new().render(&[], |r| r.camera(&[])).build();
        let scene = compile(&graph).unwrap();
        let mut backend = CpuBackend::new(&RenderSettings::default()).unwrap();
        let program = backend.build_program(&scene).unwrap();
        let mut kit = backend.allocate_kit(RenderTarget::Main, Extent::new(4, 4)).unwrap();
        let mut rng = rand::rngs::StdRng::seed_from_u64(0);
        let frame = main_frame(&scene, &RenderSettings::default(), Extent::new(8, 8), 0, &mut rng).unwrap();
        assert!(matches!(backend.render_sample(&program, &mut kit, &frame), Err(Error::InvalidState(_))));
    }

    fn render_with(scene: &CompiledScene, program: &CpuProgram, extent: Extent, samples: u32) -> CpuKit {
        let settings = RenderSettings { seed: Some(3), ..Default::default() };
        let mut backend = CpuBackend::new(&settings).unwrap();
        let mut kit = backend.allocate_kit(RenderTarget::Main, extent).unwrap();
        let mut rng = rand::rngs::StdRng::seed_from_u64(3);
        for i in 0..samples {
            let frame = main_frame(scene, &settings, extent, i, &mut rng).unwrap();
            backend.render_sample(program, &mut kit, &frame).unwrap();
        }
        kit
    }

    fn render_scene(scene: &CompiledScene, extent: Extent, samples: u32) -> CpuKit {
        let program = CpuBackend::new(&RenderSettings::default()).unwrap().build_program(scene).unwrap();
        render_with(scene, &program, extent, samples)
    }

    fn each_pixel(kit: &CpuKit) -> impl Iterator<Item = (u32, u32)> + '_ {
        let Extent { width, height } = kit.extent();
        (0..height).flat_map(move |y| (0..width).map(move |x| (x, y)))
    }

    /// Camera rays see a card at z = 0 facing -Z; all other rays only see
    /// the optional lamp sphere.
    struct Card {
        material: i32,
        blend: Option<(i32, f32)>,
        lamp: Option<(Vec3, f32, i32)>,
    }

    impl Card {
        fn new(material: i32) -> Self {
            Self { material, blend: None, lamp: None }
        }
    }

    impl GeometryPass for Card {
        fn trace(&self, ro: Vec3, rd: Vec3, _data: &[Vec4]) -> Hit {
            if ro.z < -4.0 && rd.z > 0.0 {
                let hit = Hit::new(-ro.z / rd.z, Vec3::NEG_Z, self.material);
                return match self.blend {
                    Some((other, weight)) => hit.blended(other, weight),
                    None => hit,
                };
            }
            match self.lamp {
                Some((c, r, id)) => match crate::util::intersect_sphere(ro, rd, c, r) {
                    Some(t) => Hit::new(t, (ro + rd * t - c).normalize(), id),
                    None => Hit::miss(),
                },
                None => Hit::miss(),
            }
        }
    }

    #[test]
    fn test_blended_hit_resolves_both_materials() {
        let graph = GraphBuilder::new()
            .material("Red", |m| m.set("albedo", "1, 0, 0"))
            .material("Blue", |m| m.set("albedo", "0, 0, 1"))
            .render(&[("Depth", "1"), ("Background", "0, 0, 0")], |r| r.camera(&[]))
            .build();
        let scene = compile(&graph).unwrap();
        // weight is the share of the primary (Red)
        for (weight, expected) in [(0.0, Vec3::Z), (0.5, Vec3::new(0.5, 0.0, 0.5)), (1.0, Vec3::X)] {
            let card = Card { blend: Some((1, weight)), ..Card::new(0) };
            let program = CpuProgram::with_geometry(&scene, Box::new(card));
            let kit = render_with(&scene, &program, Extent::new(4, 4), 1);
            let depth = kit.channel(Channel::Depth, 2, 2);
            assert_eq!(depth.w, 0.0);
            assert_eq!(depth.z.floor(), 1.0);
            let albedo = kit.channel(Channel::Params0, 2, 2).truncate();
            assert!((albedo - expected).abs().max_element() < 1e-3, "weight {weight}: {albedo}");
        }

        let program = CpuProgram::with_geometry(&scene, Box::new(Card::new(1)));
        let kit = render_with(&scene, &program, Extent::new(4, 4), 1);
        assert_eq!(kit.channel(Channel::Depth, 2, 2).z, 0.0);
        assert_eq!(kit.channel(Channel::Params0, 2, 2).truncate(), Vec3::Z);
    }

    fn sun_scene(occluder: bool) -> CompiledScene {
        let graph = GraphBuilder::new()
            .material("White", |m| m.set("albedo", "0.8, 0.8, 0.8"))
            .material("Black", |m| m.set("albedo", "0, 0, 0"))
            .render(&[("Depth", "1"), ("Background", "0, 0, 0")], |r| {
                let r = r
                    .camera(&[("Origin", "0, 0, -5"), ("Fov", "30")])
                    .sun(&[("Direction", "0, 1, -1"), ("Emission", "4, 4, 4")])
                    .analytical(&[("Material", "White")], |o| o.sphere(&[("Radius", "1")]));
                if occluder {
                    // slab between the sphere and the sun, above the view
                    r.analytical(&[("Material", "Black")], |o| o.cube(&[("Position", "0, 3, -4"), ("Size", "3, 0.05, 3")]))
                } else {
                    r
                }
            })
            .build();
        compile(&graph).unwrap()
    }

    #[test]
    fn test_sun_needs_clear_shadow_ray() {
        let kit = render_scene(&sun_scene(false), Extent::new(16, 16), 1);
        assert!(kit.channel(Channel::LightDepth, 8, 8).x >= SUN_VISIBLE);
        assert!(kit.channel(Channel::Direct, 8, 8).x > 0.0);

        let kit = render_scene(&sun_scene(true), Extent::new(16, 16), 1);
        assert!(kit.channel(Channel::LightDepth, 8, 8).x < SUN_VISIBLE);
        assert!(kit.channel(Channel::LightDepth, 8, 8).w == 1.0);
        for (x, y) in each_pixel(&kit) {
            assert_eq!(kit.channel(Channel::Direct, x, y), Vec4::ZERO, "pixel {x},{y}");
        }
    }

    fn lamp_scene(occluder: bool) -> CompiledScene {
        let graph = GraphBuilder::new()
            .material("White", |m| m.set("albedo", "0.8, 0.8, 0.8"))
            .material("Black", |m| m.set("albedo", "0, 0, 0"))
            .material("Lamp", |m| m.set("emission", "4, 4, 4"))
            .render(&[("Depth", "1"), ("Background", "0, 0, 0")], |r| {
                let r = r
                    .camera(&[("Origin", "0, 0, -5"), ("Fov", "30")])
                    .sphere_light(&[("Position", "0, 3, -3"), ("Radius", "0.5"), ("Material", "Lamp")])
                    .analytical(&[("Material", "White")], |o| o.sphere(&[("Radius", "1")]));
                if occluder {
                    r.analytical(&[("Material", "Black")], |o| {
                        o.cube(&[("Position", "0, 1.8, -2"), ("Size", "3, 0.05, 2.5")])
                    })
                } else {
                    r
                }
            })
            .build();
        compile(&graph).unwrap()
    }

    #[test]
    fn test_sphere_light_needs_matching_shadow_id() {
        let kit = render_scene(&lamp_scene(false), Extent::new(32, 32), 1);
        let mut lit = 0;
        for (x, y) in each_pixel(&kit) {
            if kit.channel(Channel::Direct, x, y).x > 0.0 {
                lit += 1;
                assert!(is_equal(kit.channel(Channel::LightDepth, x, y).w, 2.0), "pixel {x},{y}");
            }
        }
        assert!(lit > 0);

        let kit = render_scene(&lamp_scene(true), Extent::new(32, 32), 1);
        let mut blocked = 0;
        for (x, y) in each_pixel(&kit) {
            assert_eq!(kit.channel(Channel::Direct, x, y), Vec4::ZERO, "pixel {x},{y}");
            if is_equal(kit.channel(Channel::LightDepth, x, y).w, 1.0) {
                blocked += 1;
            }
        }
        assert!(blocked > 0);
    }

    fn card_scene(sun: Option<&str>, depth: &str) -> CompiledScene {
        let graph = GraphBuilder::new()
            .material("White", |m| m.set("albedo", "0.5, 0.5, 0.5"))
            .material("Glass", |m| m.set("albedo", "1, 1, 1").set("transmission", "1"))
            .material("Lamp", |m| m.set("emission", "4, 4, 4"))
            .render(&[("Depth", depth), ("Background", "0, 0, 0")], |r| {
                let r = r.camera(&[("Fov", "5")]);
                match sun {
                    Some(dir) => r.sun(&[("Direction", dir)]),
                    None => r.sphere_light(&[("Position", "0, 0, -2"), ("Radius", "0.5"), ("Material", "Lamp")]),
                }
            })
            .build();
        compile(&graph).unwrap()
    }

    #[test]
    fn test_light_behind_surface_is_skipped() {
        let behind = card_scene(Some("0, 0, 1"), "1");
        for material in [0, 1] {
            let program = CpuProgram::with_geometry(&behind, Box::new(Card::new(material)));
            let kit = render_with(&behind, &program, Extent::new(4, 4), 1);
            for (x, y) in each_pixel(&kit) {
                // the shadow ray is clear, only the facing test rejects it
                assert!(kit.channel(Channel::LightDepth, x, y).x >= SUN_VISIBLE);
                assert_eq!(kit.channel(Channel::Direct, x, y), Vec4::ZERO, "material {material} pixel {x},{y}");
            }
        }

        let front = card_scene(Some("0, 0, -1"), "1");
        let program = CpuProgram::with_geometry(&front, Box::new(Card::new(0)));
        let kit = render_with(&front, &program, Extent::new(4, 4), 1);
        assert!(kit.channel(Channel::Direct, 2, 2).x > 0.0);
    }

    #[test]
    fn test_light_sample_facing_away_is_skipped() {
        let scene = card_scene(None, "1");
        let center = Vec3::new(0.0, 0.0, -2.0);
        let card = Card { lamp: Some((center, 0.5, 2)), ..Card::new(0) };
        let program = CpuProgram::with_geometry(&scene, Box::new(card));
        let kit = render_with(&scene, &program, Extent::new(16, 16), 1);

        let (mut front, mut back) = (0, 0);
        for (x, y) in each_pixel(&kit) {
            let lo = kit.channel(Channel::LightOrigin, x, y);
            let ld = kit.channel(Channel::LightDir, x, y);
            let l = ld.truncate();
            let p = lo.truncate() + l * ld.w;
            let cos_l = l.dot((p - center).normalize());
            let direct = kit.channel(Channel::Direct, x, y).x;
            if cos_l < -1e-3 {
                front += 1;
                assert!(direct > 0.0, "pixel {x},{y}");
            } else if cos_l > 1e-3 {
                back += 1;
                assert_eq!(direct, 0.0, "pixel {x},{y}");
            }
        }
        assert!(front > 0 && back > 0, "{front} {back}");
    }

    #[test]
    fn test_sphere_light_converges_to_reference() {
        let scene = card_scene(None, "2");
        let center = Vec3::new(0.0, 0.0, -2.0);
        let card = Card { lamp: Some((center, 0.5, 2)), ..Card::new(0) };
        let program = CpuProgram::with_geometry(&scene, Box::new(card));
        let kit = render_with(&scene, &program, Extent::new(16, 16), 256);

        // Radiance leaving the card center: integral of f * cos * L over the
        // lamp's cone, midpoint rule.
        let params = scene.material(0).unwrap().evaluate(&MaterialInputs::default());
        let s = ShadingState::new(params, Vec3::NEG_Z, Vec3::Z);
        let half = (0.5f32 / 2.0).asin();
        let (t, b) = basis(Vec3::NEG_Z);
        let steps = 256;
        let mut sum = 0.0;
        for i in 0..steps {
            for j in 0..steps {
                let cos_t = 1.0 - (i as f32 + 0.5) / steps as f32 * (1.0 - half.cos());
                let sin_t = (1.0 - cos_t * cos_t).sqrt();
                let phi = std::f32::consts::TAU * (j as f32 + 0.5) / steps as f32;
                let l = t * (phi.cos() * sin_t) + b * (phi.sin() * sin_t) + Vec3::NEG_Z * cos_t;
                sum += disney_eval(&s, Vec3::NEG_Z, s.ffnormal, l).f.x * s.ffnormal.dot(l).abs();
            }
        }
        let reference = 4.0 * sum * cone_solid_angle(half) / (steps * steps) as f32;

        let mut mean = 0.0;
        for y in 4..12 {
            for x in 4..12 {
                mean += kit.channel(Channel::Accum, x, y).x;
            }
        }
        mean /= 64.0;
        assert!(reference > 0.0);
        assert!((mean - reference).abs() / reference < 0.05, "{mean} vs {reference}");
    }

    #[test]
    fn test_blend_endpoints() {
        let a = BsdfParams::diffuse(Vec3::ONE);
        let b = BsdfParams::metal(Vec3::new(1.0, 0.5, 0.0), 0.1);
        assert_eq!(blend_materials(&a, &b, 0.0), a);
        assert_eq!(blend_materials(&a, &b, 1.0), b);
    }
}
