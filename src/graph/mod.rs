//! Scene graph: nodes, options, expressions and compilation.
//!
//! - [`expr`] - typed option/statement expressions
//! - [`options`] - keyed (optionally animated) node options
//! - [`node`] - node kinds and their compile/execute behavior
//! - [`context`] - transform stack, data slots and material registry
//! - [`builder`] - programmatic graph construction
//! - [`compile`] - whole-graph compilation into a [`CompiledScene`]

pub mod builder;
pub mod compile;
pub mod context;
pub mod expr;
pub mod node;
pub mod options;

pub use builder::{GraphBuilder, MaterialBuilder};
pub use compile::{compile, compile_at, CompiledScene, RenderOptions, SceneGraph};
pub use context::{CameraRecord, GraphContext, LightKind, LightRecord, PrimitiveKind, SceneEntities};
pub use expr::{Expr, Value, ValueType};
pub use node::{GraphNode, NodeKind};
pub use options::{Keyframe, NodeOptions, OptionValue};
