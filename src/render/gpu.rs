//! wgpu compute backend.
//!
//! Every pass of the generated program is a compute entry point sharing one
//! bind group layout:
//!
//! | binding | resource                                  |
//! |---------|-------------------------------------------|
//! | 0       | `RenderUniforms` uniform buffer           |
//! | 1       | scene data (`array<vec4<f32>>`)           |
//! | 2       | light table                               |
//! | 3       | G-buffer, 18 channels of `vec4` per pixel |
//! | 4       | `rgba32float` output storage texture      |
//!
//! A sample is recorded into a single encoder and submitted once; the
//! backend waits for the queue before returning so at most one batch is in
//! flight.

use image::Rgba32FImage;
use tracing::{debug, info};
use wgpu::util::DeviceExt;

use super::backend::RenderBackend;
use super::kit::{Channel, Extent, RenderKit, RenderTarget, CHANNEL_COUNT};
use super::uniforms::{FrameInputs, LightEntry, RenderUniforms};
use crate::graph::CompiledScene;
use crate::shader::ENTRY_POINTS;
use crate::util::{Error, Result};

/// Workgroup edge, matches `@workgroup_size(8, 8, 1)` in the passes.
const WG_SIZE: u32 = 8;
const VEC4_BYTES: u64 = 16;

/// Headless device and queue.
pub struct GpuContext {
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
    pub adapter_name: String,
}

impl GpuContext {
    /// Open the default adapter without a surface.
    pub fn new_headless() -> Result<Self> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::PRIMARY,
            ..Default::default()
        });

        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: None,
            force_fallback_adapter: false,
        }))
        .map_err(|e| Error::gpu(format!("no adapter: {e}")))?;

        let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
            label: Some("signed_render_device"),
            required_features: wgpu::Features::empty(),
            // Large G-buffers need whatever the adapter offers.
            required_limits: adapter.limits(),
            memory_hints: Default::default(),
            trace: Default::default(),
            experimental_features: Default::default(),
        }))
        .map_err(|e| Error::gpu(format!("device request failed: {e}")))?;

        let adapter_name = adapter.get_info().name;
        info!(adapter = %adapter_name, "gpu context ready");
        Ok(Self { device, queue, adapter_name })
    }
}

/// Compute pipelines for one generated program, one per entry point.
pub struct GpuProgram {
    pub hash: u64,
    geometry_primary: wgpu::ComputePipeline,
    geometry_bounce: wgpu::ComputePipeline,
    material_resolve: wgpu::ComputePipeline,
    geometry_shadow: wgpu::ComputePipeline,
    direct_light: wgpu::ComputePipeline,
    path_trace: wgpu::ComputePipeline,
    accumulate: wgpu::ComputePipeline,
}

/// Device resources of one render target.
pub struct GpuKit {
    target: RenderTarget,
    extent: Extent,
    uniforms: wgpu::Buffer,
    scene_data: wgpu::Buffer,
    /// Capacity of `scene_data` in `vec4`s.
    data_capacity: usize,
    lights: wgpu::Buffer,
    light_capacity: usize,
    gbuf: wgpu::Buffer,
    output: wgpu::Texture,
    output_view: wgpu::TextureView,
    bind_group: wgpu::BindGroup,
}

impl RenderKit for GpuKit {
    fn extent(&self) -> Extent {
        self.extent
    }
}

impl GpuKit {
    pub fn target(&self) -> RenderTarget {
        self.target
    }

    /// Running average as a sampleable texture, for presentation.
    pub fn output_texture(&self) -> &wgpu::Texture {
        &self.output
    }

    pub fn output_view(&self) -> &wgpu::TextureView {
        &self.output_view
    }

    fn accum_offset(&self) -> u64 {
        Channel::Accum.index() as u64 * self.extent.pixels() as u64 * VEC4_BYTES
    }
}

pub struct GpuBackend {
    ctx: GpuContext,
    layout: wgpu::BindGroupLayout,
    pipeline_layout: wgpu::PipelineLayout,
}

impl GpuBackend {
    pub fn new(ctx: GpuContext) -> Self {
        let layout = ctx.device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("sr_bind_group_layout"),
            entries: &[
                // @binding(0) uniforms
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
                // @binding(1) scene data
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Storage { read_only: true },
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
                // @binding(2) lights
                wgpu::BindGroupLayoutEntry {
                    binding: 2,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Storage { read_only: true },
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
                // @binding(3) G-buffer
                wgpu::BindGroupLayoutEntry {
                    binding: 3,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Storage { read_only: false },
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
                // @binding(4) output storage texture
                wgpu::BindGroupLayoutEntry {
                    binding: 4,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::StorageTexture {
                        access: wgpu::StorageTextureAccess::WriteOnly,
                        format: wgpu::TextureFormat::Rgba32Float,
                        view_dimension: wgpu::TextureViewDimension::D2,
                    },
                    count: None,
                },
            ],
        });

        let pipeline_layout = ctx.device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("sr_pipeline_layout"),
            bind_group_layouts: &[&layout],
            push_constant_ranges: &[],
        });

        Self { ctx, layout, pipeline_layout }
    }

    /// Shortcut for [`GpuContext::new_headless`] plus [`GpuBackend::new`].
    pub fn headless() -> Result<Self> {
        Ok(Self::new(GpuContext::new_headless()?))
    }

    pub fn context(&self) -> &GpuContext {
        &self.ctx
    }

    fn device(&self) -> &wgpu::Device {
        &self.ctx.device
    }

    fn storage_buffer(&self, label: &str, len: usize, elem: u64) -> wgpu::Buffer {
        self.device().create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size: len.max(1) as u64 * elem,
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        })
    }

    fn bind_group(
        &self,
        uniforms: &wgpu::Buffer,
        scene_data: &wgpu::Buffer,
        lights: &wgpu::Buffer,
        gbuf: &wgpu::Buffer,
        output_view: &wgpu::TextureView,
    ) -> wgpu::BindGroup {
        self.device().create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("sr_bind_group"),
            layout: &self.layout,
            entries: &[
                wgpu::BindGroupEntry { binding: 0, resource: uniforms.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 1, resource: scene_data.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 2, resource: lights.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 3, resource: gbuf.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 4, resource: wgpu::BindingResource::TextureView(output_view) },
            ],
        })
    }

    fn rebind(&self, kit: &mut GpuKit) {
        kit.bind_group = self.bind_group(&kit.uniforms, &kit.scene_data, &kit.lights, &kit.gbuf, &kit.output_view);
    }

    /// Upload scene data and lights, growing the buffers when needed.
    fn upload(&self, kit: &mut GpuKit, frame: &FrameInputs) {
        let queue = &self.ctx.queue;
        let mut grown = false;
        if frame.data.len() > kit.data_capacity {
            kit.data_capacity = frame.data.len().next_power_of_two();
            kit.scene_data = self.storage_buffer("sr_scene_data", kit.data_capacity, VEC4_BYTES);
            grown = true;
        }
        if frame.lights.len() > kit.light_capacity {
            kit.light_capacity = frame.lights.len().next_power_of_two();
            kit.lights = self.storage_buffer("sr_lights", kit.light_capacity, std::mem::size_of::<LightEntry>() as u64);
            grown = true;
        }
        if grown {
            debug!(kit = %kit.target, data = kit.data_capacity, lights = kit.light_capacity, "grew scene buffers");
            self.rebind(kit);
        }

        queue.write_buffer(&kit.uniforms, 0, bytemuck::bytes_of(&frame.uniforms));
        if !frame.data.is_empty() {
            queue.write_buffer(&kit.scene_data, 0, bytemuck::cast_slice(frame.data.as_slice()));
        }
        queue.write_buffer(&kit.lights, 0, bytemuck::cast_slice(&frame.lights));
    }

    fn wait_idle(&self) -> Result<()> {
        poll_result(self.device().poll(wgpu::PollType::wait_indefinitely()))
    }
}

/// A failed wait means the submitted work may not have run.
fn poll_result(r: std::result::Result<wgpu::PollStatus, wgpu::PollError>) -> Result<()> {
    r.map(|_| ()).map_err(|e| Error::gpu(format!("device poll failed: {e}")))
}

impl RenderBackend for GpuBackend {
    type Kit = GpuKit;
    type Program = GpuProgram;

    fn name(&self) -> &'static str {
        "wgpu"
    }

    fn build_program(&mut self, scene: &CompiledScene) -> Result<GpuProgram> {
        let device = self.device();
        device.push_error_scope(wgpu::ErrorFilter::Validation);

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("sr_program"),
            source: wgpu::ShaderSource::Wgsl(scene.program.source.as_str().into()),
        });

        let make = |entry: &str| {
            device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some(entry),
                layout: Some(&self.pipeline_layout),
                module: &shader,
                entry_point: Some(entry),
                compilation_options: Default::default(),
                cache: None,
            })
        };
        let [primary, bounce, resolve, shadow, direct, path, accumulate] = ENTRY_POINTS;
        let program = GpuProgram {
            hash: scene.program.hash,
            geometry_primary: make(primary),
            geometry_bounce: make(bounce),
            material_resolve: make(resolve),
            geometry_shadow: make(shadow),
            direct_light: make(direct),
            path_trace: make(path),
            accumulate: make(accumulate),
        };

        if let Some(err) = pollster::block_on(device.pop_error_scope()) {
            return Err(Error::gpu(format!("program {:016x} rejected: {err}", scene.program.hash)));
        }
        debug!(hash = format_args!("{:016x}", scene.program.hash), "built compute pipelines");
        Ok(program)
    }

    fn allocate_kit(&mut self, target: RenderTarget, extent: Extent) -> Result<GpuKit> {
        let exhausted = || Error::ResourceExhausted { target: target.to_string(), width: extent.width, height: extent.height };
        if extent.is_empty() {
            return Err(exhausted());
        }

        let limits = self.device().limits();
        let gbuf_size = extent.pixels() as u64 * CHANNEL_COUNT as u64 * VEC4_BYTES;
        if gbuf_size > limits.max_storage_buffer_binding_size as u64
            || gbuf_size > limits.max_buffer_size
            || extent.width > limits.max_texture_dimension_2d
            || extent.height > limits.max_texture_dimension_2d
        {
            return Err(exhausted());
        }

        let device = self.device();
        device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);

        let uniforms = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("sr_uniforms"),
            contents: bytemuck::bytes_of(&<RenderUniforms as bytemuck::Zeroable>::zeroed()),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        });
        let scene_data = self.storage_buffer("sr_scene_data", 1, VEC4_BYTES);
        let lights = self.storage_buffer("sr_lights", 1, std::mem::size_of::<LightEntry>() as u64);
        // Fresh buffers are zero-initialized.
        let gbuf = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("sr_gbuf"),
            size: gbuf_size,
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let output = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("sr_output"),
            size: wgpu::Extent3d { width: extent.width, height: extent.height, depth_or_array_layers: 1 },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rgba32Float,
            usage: wgpu::TextureUsages::STORAGE_BINDING
                | wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });

        if pollster::block_on(device.pop_error_scope()).is_some() {
            return Err(exhausted());
        }

        let output_view = output.create_view(&wgpu::TextureViewDescriptor::default());
        let bind_group = self.bind_group(&uniforms, &scene_data, &lights, &gbuf, &output_view);
        debug!(kit = %target, width = extent.width, height = extent.height, bytes = gbuf_size, "allocated gpu kit");
        Ok(GpuKit {
            target,
            extent,
            uniforms,
            scene_data,
            data_capacity: 1,
            lights,
            light_capacity: 1,
            gbuf,
            output,
            output_view,
            bind_group,
        })
    }

    fn clear_kit(&mut self, kit: &mut GpuKit) -> Result<()> {
        let mut encoder = self.device().create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("sr_clear") });
        encoder.clear_buffer(&kit.gbuf, 0, None);
        self.ctx.queue.submit(Some(encoder.finish()));
        self.wait_idle()?;
        Ok(())
    }

    fn render_sample(&mut self, program: &GpuProgram, kit: &mut GpuKit, frame: &FrameInputs) -> Result<()> {
        if frame.extent() != kit.extent {
            return Err(Error::InvalidState(format!(
                "frame is {:?} but {} kit is {:?}",
                frame.extent(),
                kit.target,
                kit.extent
            )));
        }
        self.upload(kit, frame);

        let wx = kit.extent.width.div_ceil(WG_SIZE);
        let wy = kit.extent.height.div_ceil(WG_SIZE);
        let mut encoder = self.device().create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("sr_sample") });
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("sr_sample_pass"),
                timestamp_writes: None,
            });
            pass.set_bind_group(0, &kit.bind_group, &[]);
            for bounce in 0..frame.uniforms.max_depth.max(1) {
                let geometry = if bounce == 0 { &program.geometry_primary } else { &program.geometry_bounce };
                for pipeline in [
                    geometry,
                    &program.material_resolve,
                    &program.geometry_shadow,
                    &program.direct_light,
                    &program.path_trace,
                ] {
                    pass.set_pipeline(pipeline);
                    pass.dispatch_workgroups(wx, wy, 1);
                }
            }
            pass.set_pipeline(&program.accumulate);
            pass.dispatch_workgroups(wx, wy, 1);
        }
        self.ctx.queue.submit(Some(encoder.finish()));
        self.wait_idle()?;
        Ok(())
    }

    fn read_output(&mut self, kit: &GpuKit) -> Result<Rgba32FImage> {
        let size = kit.extent.pixels() as u64 * VEC4_BYTES;
        let staging = self.device().create_buffer(&wgpu::BufferDescriptor {
            label: Some("sr_readback"),
            size,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let mut encoder = self.device().create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("sr_readback") });
        encoder.copy_buffer_to_buffer(&kit.gbuf, kit.accum_offset(), &staging, 0, size);
        self.ctx.queue.submit(Some(encoder.finish()));

        let slice = staging.slice(..);
        let (tx, rx) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |r| {
            let _ = tx.send(r);
        });
        self.wait_idle()?;
        rx.recv()
            .map_err(|_| Error::gpu("readback map callback dropped"))?
            .map_err(|e| Error::gpu(format!("readback map failed: {e}")))?;

        let texels: Vec<f32> = {
            let data = slice.get_mapped_range();
            bytemuck::cast_slice::<u8, [f32; 4]>(&data)
                .iter()
                .flat_map(|p| [p[0], p[1], p[2], 1.0])
                .collect()
        };
        staging.unmap();

        Rgba32FImage::from_raw(kit.extent.width, kit.extent.height, texels)
            .ok_or_else(|| Error::gpu("readback size mismatch"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{compile, GraphBuilder};
    use crate::render::uniforms::main_frame;
    use crate::render::RenderSettings;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    // Skips silently on machines without an adapter.
    fn backend() -> Option<GpuBackend> {
        GpuBackend::headless().ok()
    }

    #[test]
    fn test_background_sample_matches_cpu() {
        let Some(mut gpu) = backend() else { return };
        let graph = GraphBuilder::new()
            .render(&[("Background", "0.25, 0.5, 1")], |r| r.camera(&[("Origin", "0, 0, -5")]))
            .build();
        let scene = compile(&graph).expect("compile");
        let program = gpu.build_program(&scene).expect("program");
        let extent = Extent::new(16, 8);
        let mut kit = gpu.allocate_kit(RenderTarget::Main, extent).expect("kit");
        let mut rng = StdRng::seed_from_u64(3);
        let frame = main_frame(&scene, &RenderSettings::default(), extent, 0, &mut rng).expect("frame");
        gpu.render_sample(&program, &mut kit, &frame).expect("sample");
        let img = gpu.read_output(&kit).expect("readback");
        let p = img.get_pixel(3, 3).0;
        assert!((p[0] - 0.25).abs() < 1e-4 && (p[1] - 0.5).abs() < 1e-4 && (p[2] - 1.0).abs() < 1e-4);
    }

    #[test]
    fn test_poll_failure_is_reported() {
        assert!(poll_result(Ok(wgpu::PollStatus::QueueEmpty)).is_ok());
        let err = poll_result(Err(wgpu::PollError::Timeout)).unwrap_err();
        assert!(matches!(err, Error::Gpu(_)));
        assert!(!err.is_resource());
    }

    #[test]
    fn test_oversized_kit_is_resource_error() {
        let Some(mut gpu) = backend() else { return };
        let err = gpu.allocate_kit(RenderTarget::Main, Extent::new(1 << 16, 1 << 16)).err().expect("too large");
        assert!(err.is_resource());
    }
}
