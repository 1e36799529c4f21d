//! Graph compilation: validation, material indexing and scene traversal.

use glam::{Vec3, Vec4};
use std::sync::Arc;

use super::context::{GraphContext, SceneEntities};
use super::node::{GraphNode, MaterialRole, NodeKind, Statement};
use crate::shader::compiler::{generate, MaterialProgram, ShaderProgram};
use crate::shader::ir::Stmt;
use crate::util::{CompileError, CompileErrorKind};

/// Root of a scene: top-level materials, environment and render nodes.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SceneGraph {
    pub nodes: Vec<GraphNode>,
}

impl SceneGraph {
    /// Pre-order walk over every node.
    pub fn walk<'a>(&'a self, mut f: impl FnMut(&'a GraphNode)) {
        for node in &self.nodes {
            node.walk(&mut f);
        }
    }

    pub fn is_animated(&self) -> bool {
        let mut animated = false;
        self.walk(|n| animated |= n.options.is_animated());
        animated
    }

    /// Look up a node by its `Name`.
    pub fn find(&self, name: &str) -> Option<&GraphNode> {
        let mut found = None;
        self.walk(|n| {
            if found.is_none() && n.explicit_name() == Some(name) {
                found = Some(n);
            }
        });
        found
    }
}

/// Per-scene overrides from the render node.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RenderOptions {
    pub name: String,
    pub samples: Option<u32>,
    pub depth: Option<u32>,
    pub background: Option<Vec3>,
}

/// Output of a successful compile.
#[derive(Clone, Debug)]
pub struct CompiledScene {
    pub program: ShaderProgram,
    /// Surface materials, position equals index
    pub materials: Vec<MaterialProgram>,
    pub environment: Option<MaterialProgram>,
    pub entities: SceneEntities,
    /// Constant-data array read by the geometry and light code
    pub data: Arc<Vec<Vec4>>,
    pub render: RenderOptions,
    pub time: f32,
}

impl CompiledScene {
    pub fn material_index(&self, name: &str) -> Option<usize> {
        self.materials.iter().position(|m| m.name == name)
    }

    pub fn material(&self, index: i32) -> Option<&MaterialProgram> {
        usize::try_from(index).ok().and_then(|i| self.materials.get(i))
    }

    /// Re-evaluate option values at `time`. The generated program is kept
    /// when the data layout is unchanged, otherwise the graph is recompiled.
    #[tracing::instrument(skip_all, fields(time = time))]
    pub fn refresh(&mut self, graph: &SceneGraph, time: f32) -> Result<(), CompileError> {
        let definitions = material_definitions(graph)?;
        let render = find_render(graph)?;
        let mut ctx = GraphContext::new(time);
        for (node, _) in &definitions {
            ctx.register_material(&node.given_name);
        }
        render.execute(&mut ctx);
        if let Some(err) = ctx.take_error() {
            return Err(err);
        }
        let (data, entities) = ctx.into_parts();
        let same_layout = data.len() == self.data.len()
            && entities.primitives == self.entities.primitives
            && entities.lights.len() == self.entities.lights.len();
        if !same_layout {
            tracing::debug!("data layout changed, recompiling");
            *self = compile_at(graph, time)?;
            return Ok(());
        }
        self.data = Arc::new(data);
        self.entities = entities;
        self.time = time;
        Ok(())
    }
}

/// Surface material definitions in declaration order.
///
/// A material node defines a material when it has statements or sits at the
/// graph root. Nested empty material nodes only reference one.
fn material_definitions(graph: &SceneGraph) -> Result<Vec<(&GraphNode, &[Statement])>, CompileError> {
    let mut defs: Vec<(&GraphNode, &[Statement])> = Vec::new();
    let mut error = None;
    for root in &graph.nodes {
        root.walk(&mut |n| {
            let NodeKind::Material { role: MaterialRole::Surface, statements } = &n.kind else { return };
            if !statements.is_empty() || std::ptr::eq(n, root) {
                if n.explicit_name().is_none() {
                    error.get_or_insert(CompileError::new(CompileErrorKind::MissingName("Material".into()), n.line));
                } else if defs.iter().any(|(d, _)| d.given_name == n.given_name) {
                    tracing::warn!(name = %n.given_name, line = n.line, "duplicate material, keeping the first");
                } else {
                    defs.push((n, statements.as_slice()));
                }
            }
        });
    }
    match error {
        Some(e) => Err(e),
        None => Ok(defs),
    }
}

fn find_render(graph: &SceneGraph) -> Result<&GraphNode, CompileError> {
    let mut renders = graph.nodes.iter().filter(|n| n.kind == NodeKind::Render);
    let first = renders.next().ok_or_else(|| CompileError::new(CompileErrorKind::MissingRender, 0))?;
    if let Some(dup) = renders.next() {
        return Err(CompileError::new(CompileErrorKind::DuplicateRender, dup.line));
    }
    Ok(first)
}

fn find_environment(graph: &SceneGraph) -> Result<Option<(&GraphNode, &[Statement])>, CompileError> {
    let mut found: Option<(&GraphNode, &[Statement])> = None;
    let mut error = None;
    graph.walk(|n| {
        if let NodeKind::Material { role: MaterialRole::Environment, statements } = &n.kind {
            if found.is_some() {
                error.get_or_insert(CompileError::new(CompileErrorKind::DuplicateEnvironment, n.line));
            } else {
                found = Some((n, statements.as_slice()));
            }
        }
    });
    match error {
        Some(e) => Err(e),
        None => Ok(found),
    }
}

fn render_options(render: &GraphNode) -> Result<RenderOptions, CompileError> {
    let err = |e| CompileError::new(e, render.line);
    let opts = &render.options;
    let count = |name: &str| -> Result<Option<u32>, CompileError> {
        if !opts.contains(name) {
            return Ok(None);
        }
        Ok(Some(opts.float1(name, 0.0, 0.0).map_err(err)?.max(1.0) as u32))
    };
    let background = if opts.contains("Background") { Some(opts.float3("Background", Vec3::ZERO, 0.0).map_err(err)?) } else { None };
    Ok(RenderOptions {
        name: render.given_name.clone(),
        samples: count("Samples")?,
        depth: count("Depth")?,
        background,
    })
}

/// Compile a scene graph at time zero.
pub fn compile(graph: &SceneGraph) -> Result<CompiledScene, CompileError> {
    compile_at(graph, 0.0)
}

/// Compile a scene graph with animated options evaluated at `time`.
///
/// The result is a pure function of the graph and `time`: identical graphs
/// produce byte-identical shader source and identical material indices.
#[tracing::instrument(skip_all, fields(nodes = graph.nodes.len(), time = time))]
pub fn compile_at(graph: &SceneGraph, time: f32) -> Result<CompiledScene, CompileError> {
    let render = find_render(graph)?;
    let definitions = material_definitions(graph)?;
    let environment = find_environment(graph)?;

    let mut ctx = GraphContext::new(time);
    let mut materials = Vec::with_capacity(definitions.len());
    for (node, statements) in &definitions {
        let index = ctx.register_material(&node.given_name);
        match MaterialProgram::build(&node.given_name, index, MaterialRole::Surface, statements) {
            Ok(program) => materials.push(program),
            Err(e) => ctx.error(e),
        }
    }
    let environment = match environment {
        Some((node, statements)) => match MaterialProgram::build(&node.given_name, 0, MaterialRole::Environment, statements) {
            Ok(program) => Some(program),
            Err(e) => {
                ctx.error(e);
                None
            }
        },
        None => None,
    };

    let mut scene_stmts: Vec<Stmt> = Vec::new();
    render.compile(&mut ctx, &mut scene_stmts);
    debug_assert_eq!(ctx.depth(), 0);

    if let Some(err) = ctx.take_error() {
        return Err(err);
    }
    if ctx.entities.camera.is_none() {
        return Err(CompileError::new(CompileErrorKind::MissingCamera, render.line));
    }
    let render_opts = render_options(render)?;
    let program = generate(&materials, environment.as_ref(), &scene_stmts)?;
    let (data, entities) = ctx.into_parts();

    tracing::debug!(
        materials = materials.len(),
        lights = entities.lights.len(),
        primitives = entities.primitives.len(),
        hash = program.hash,
        "compiled scene"
    );

    Ok(CompiledScene {
        program,
        materials,
        environment,
        entities,
        data: Arc::new(data),
        render: render_opts,
        time,
    })
}
