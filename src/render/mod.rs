//! Progressive rendering.
//!
//! - [`settings`] - persisted render settings
//! - [`kit`] - per-target resources and the kit arena
//! - [`uniforms`] - per-sample uniform/light assembly
//! - [`backend`] - the device seam
//! - [`geometry`] - analytic intersection used by the CPU passes
//! - [`cpu`] - multi-threaded CPU backend
//! - `gpu` - wgpu compute backend (feature `gpu`)
//! - [`pipeline`] - restart/resize/accumulate/icon state machine

pub mod backend;
pub mod cpu;
pub mod geometry;
pub mod kit;
pub mod pipeline;
pub mod settings;
pub mod uniforms;

#[cfg(feature = "gpu")]
pub mod gpu;

pub use backend::RenderBackend;
pub use cpu::{CpuBackend, CpuKit, CpuProgram};
pub use geometry::{AnalyticGeometry, GeometryPass, Hit};
pub use kit::{Channel, Extent, KitArena, RenderKit, RenderTarget, CHANNEL_COUNT};
pub use pipeline::{
    IconCommand, IconId, IconPhase, IconSubject, MainPhase, PipelineEvent, PipelineHandle, RenderPipeline, TickReport,
};
pub use settings::RenderSettings;
pub use uniforms::{icon_frame, main_frame, FrameBuilder, FrameInputs, LightEntry, RenderUniforms};

#[cfg(feature = "gpu")]
pub use gpu::{GpuBackend, GpuContext, GpuKit, GpuProgram};
