//! # signed-render
//!
//! Scene graphs of signed-distance/analytic primitives compiled into WGSL
//! programs and rendered by a progressive multi-pass path tracer.
//!
//! ## Modules
//!
//! - [`util`] - errors and math helpers
//! - [`graph`] - scene graph, options, expressions and compilation
//! - [`shader`] - shader IR, WGSL emission and the generated program
//! - [`render`] - render settings, backends and the progressive pipeline
//!
//! ## Example
//!
//! ```ignore
//! use signed_render::prelude::*;
//!
//! let graph = GraphBuilder::new()
//!     .material("White", |m| m.set("albedo", "0.8, 0.8, 0.8"))
//!     .render(&[], |r| {
//!         r.camera(&[("Origin", "0, 0, -5")])
//!             .sun(&[("Direction", "0, 1, -1")])
//!             .analytical(&[("Material", "White")], |o| o.sphere(&[]))
//!     })
//!     .build();
//!
//! let settings = RenderSettings::default();
//! let (mut pipeline, events) = RenderPipeline::new(CpuBackend::new(&settings)?, settings);
//! pipeline.set_graph(&graph)?;
//! pipeline.run_until_converged(64)?;
//! let image = pipeline.read_main()?;
//! ```

pub mod graph;
pub mod render;
pub mod shader;
pub mod util;

pub use util::{CompileError, CompileErrorKind, Error, Result};

/// Environment variable read by [`init_logging`].
pub const LOG_ENV: &str = "SIGNED_LOG";

/// Install a `fmt` subscriber filtered by `SIGNED_LOG` (default `info`).
///
/// Safe to call more than once; later calls are ignored.
pub fn init_logging() {
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .try_init();
}

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::graph::{compile, compile_at, CompiledScene, GraphBuilder, SceneGraph};
    pub use crate::render::{
        CpuBackend, Extent, IconSubject, PipelineEvent, RenderBackend, RenderPipeline, RenderSettings, RenderTarget,
    };
    #[cfg(feature = "gpu")]
    pub use crate::render::GpuBackend;
    pub use crate::util::{Error, Result};
}
