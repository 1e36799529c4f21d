//! Backend seam between the pipeline state machine and the device.

use image::Rgba32FImage;

use super::kit::{Extent, RenderKit, RenderTarget};
use super::uniforms::FrameInputs;
use crate::graph::CompiledScene;
use crate::util::Result;

/// Executes the sample passes for the pipeline.
///
/// One call to [`RenderBackend::render_sample`] runs every bounce of one
/// sample (geometry, material resolve, shadow, direct light, path trace) and
/// the final accumulation, submitted as a single batch.
pub trait RenderBackend {
    /// Per-target resources.
    type Kit: RenderKit;
    /// Compiled passes for one generated program.
    type Program;

    fn name(&self) -> &'static str;

    /// Build passes for `scene.program`. Called once per distinct program hash.
    fn build_program(&mut self, scene: &CompiledScene) -> Result<Self::Program>;

    /// Allocate a cleared kit. Fails with `Error::ResourceExhausted` when
    /// the device cannot hold it.
    fn allocate_kit(&mut self, target: RenderTarget, extent: Extent) -> Result<Self::Kit>;

    /// Zero the accumulation and G-buffer of an existing kit.
    fn clear_kit(&mut self, kit: &mut Self::Kit) -> Result<()>;

    /// Render and accumulate one sample.
    fn render_sample(&mut self, program: &Self::Program, kit: &mut Self::Kit, frame: &FrameInputs) -> Result<()>;

    /// Current running average of `kit`.
    fn read_output(&mut self, kit: &Self::Kit) -> Result<Rgba32FImage>;
}
