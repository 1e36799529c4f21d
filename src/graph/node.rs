//! Scene graph node model.
//!
//! Nodes form a closed set of variants dispatched by `match`. Every variant
//! supports the same three capabilities: [`GraphNode::compile`] (traverse and
//! emit shader statements), [`GraphNode::execute`] (traverse and refresh
//! data only) and [`GraphNode::describe_options`].

use glam::{Vec3, Vec4};
use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};

use super::context::{CameraRecord, GraphContext, LightKind, LightRecord, ObjectRecord, PrimitiveKind, PrimitiveRecord};
use super::options::NodeOptions;
use crate::shader::ir::{Expr, Stmt};
use crate::util::{CompileError, CompileErrorKind};

/// Stable node identifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u64);

impl NodeId {
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        NodeId(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    /// Ray-marched object
    Object,
    /// Container of analytic primitives
    Analytical,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MaterialRole {
    Surface,
    /// Background evaluated on camera and path misses
    Environment,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CameraKind {
    Pinhole,
    Isometric,
}

/// One `target = expression` line of a material body.
#[derive(Clone, Debug, PartialEq)]
pub struct Statement {
    pub target: String,
    pub source: String,
    pub line: usize,
}

#[derive(Clone, Debug, PartialEq)]
pub enum NodeKind {
    Transformation(ObjectKind),
    Material { role: MaterialRole, statements: Vec<Statement> },
    Render,
    Light(LightKind),
    Camera(CameraKind),
    Primitive(PrimitiveKind),
}

/// Option documentation entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OptionDescriptor {
    pub name: &'static str,
    pub default: &'static str,
    pub help: &'static str,
}

const fn opt(name: &'static str, default: &'static str, help: &'static str) -> OptionDescriptor {
    OptionDescriptor { name, default, help }
}

const TRANSFORM_OPTIONS: [OptionDescriptor; 3] = [
    opt("Position", "0, 0, 0", "The position of the object."),
    opt("Rotation", "0, 0, 0", "The rotation of the object in degrees."),
    opt("Scale", "1", "The scale of the object."),
];

#[derive(Clone, Debug, PartialEq)]
pub struct GraphNode {
    pub id: NodeId,
    pub given_name: String,
    pub leaves: Vec<GraphNode>,
    pub options: NodeOptions,
    /// Source line for editor round trips
    pub line: usize,
    pub kind: NodeKind,
}

impl GraphNode {
    pub fn new(kind: NodeKind, options: NodeOptions, line: usize) -> Self {
        let mut node = Self { id: NodeId::next(), given_name: String::new(), leaves: Vec::new(), options, line, kind };
        node.given_name = node.options.text("Name").map_or_else(|| node.kind_name().to_string(), str::to_string);
        node
    }

    pub fn with_leaves(mut self, leaves: Vec<GraphNode>) -> Self {
        self.leaves = leaves;
        self
    }

    /// Node keyword as written in a project.
    pub fn kind_name(&self) -> &'static str {
        match &self.kind {
            NodeKind::Transformation(ObjectKind::Object) => "Object",
            NodeKind::Transformation(ObjectKind::Analytical) => "AnalyticalObject",
            NodeKind::Material { role: MaterialRole::Surface, .. } => "Material",
            NodeKind::Material { role: MaterialRole::Environment, .. } => "Environment",
            NodeKind::Render => "Render",
            NodeKind::Light(LightKind::Sun) => "Sun",
            NodeKind::Light(LightKind::Sphere) => "SphereLight",
            NodeKind::Camera(CameraKind::Pinhole) => "Camera",
            NodeKind::Camera(CameraKind::Isometric) => "IsometricCamera",
            NodeKind::Primitive(kind) => kind.name(),
        }
    }

    /// Name given by the `Name` option, if any.
    pub fn explicit_name(&self) -> Option<&str> {
        self.options.text("Name")
    }

    pub fn help(&self) -> &'static str {
        match &self.kind {
            NodeKind::Transformation(ObjectKind::Object) => {
                "Defines an SDF object. Objects contain primitives and can also contain child objects."
            }
            NodeKind::Transformation(ObjectKind::Analytical) => {
                "Defines an analytical object containing analytical primitives and child objects."
            }
            NodeKind::Material { role: MaterialRole::Surface, .. } => "Defines a material.",
            NodeKind::Material { role: MaterialRole::Environment, .. } => {
                "Defines the background color seen by rays that leave the scene."
            }
            NodeKind::Render => "Renders the scene.",
            NodeKind::Light(LightKind::Sun) => "A directional light with a small solar disk.",
            NodeKind::Light(LightKind::Sphere) => "A spherical area light emitting through its material.",
            NodeKind::Camera(CameraKind::Pinhole) => "A perspective camera.",
            NodeKind::Camera(CameraKind::Isometric) => "An orthographic camera.",
            NodeKind::Primitive(PrimitiveKind::Sphere) => "An analytical sphere.",
            NodeKind::Primitive(PrimitiveKind::Box) => "An analytical box.",
            NodeKind::Primitive(PrimitiveKind::Plane) => "An infinite analytical plane.",
        }
    }

    pub fn describe_options(&self) -> Vec<OptionDescriptor> {
        let mut out = Vec::new();
        match &self.kind {
            NodeKind::Transformation(kind) => {
                out.push(opt("Name", "Object", "The name of the object."));
                if *kind == ObjectKind::Object {
                    out.push(opt("Steps", "70", "The amount of ray-marching steps for this object."));
                    out.push(opt("StepSize", "1", "The ray-marching step size, between 0 and 1."));
                    out.push(opt("MaxBox", "none", "Half extents bounding the ray-marching."));
                }
                out.push(opt("Material", "none", "The material applied to contained primitives."));
                out.extend(TRANSFORM_OPTIONS);
            }
            NodeKind::Material { role: MaterialRole::Surface, .. } => {
                out.push(opt("Name", "Material", "The name of the material."));
            }
            NodeKind::Material { role: MaterialRole::Environment, .. } => {
                out.push(opt("Name", "Environment", "The name of the environment."));
            }
            NodeKind::Render => {
                out.push(opt("Name", "Render", "The name of the render node."));
                out.push(opt("Samples", "10000", "Maximum samples per pixel."));
                out.push(opt("Depth", "6", "Maximum path bounces."));
                out.push(opt("Background", "0.02, 0.02, 0.02", "Background color without an environment."));
            }
            NodeKind::Light(LightKind::Sun) => {
                out.push(opt("Direction", "0, 1, -1", "Direction toward the sun."));
                out.push(opt("Emission", "4, 4, 4", "Radiance of the sun."));
            }
            NodeKind::Light(LightKind::Sphere) => {
                out.push(opt("Position", "0, 0, 0", "Center of the light."));
                out.push(opt("Radius", "1", "Radius of the light."));
                out.push(opt("Material", "required", "Emissive material of the light."));
            }
            NodeKind::Camera(kind) => {
                out.push(opt("Origin", "0, 0, -5", "The camera position."));
                out.push(opt("LookAt", "0, 0, 0", "The point the camera looks at."));
                if *kind == CameraKind::Pinhole {
                    out.push(opt("Fov", "60", "Vertical field of view in degrees."));
                } else {
                    out.push(opt("Fov", "6", "Visible height in world units."));
                }
            }
            NodeKind::Primitive(PrimitiveKind::Sphere) => {
                out.push(opt("Position", "0, 0, 0", "Center in object space."));
                out.push(opt("Radius", "1", "Radius in object space."));
            }
            NodeKind::Primitive(PrimitiveKind::Box) => {
                out.push(opt("Position", "0, 0, 0", "Center in object space."));
                out.push(opt("Size", "1, 1, 1", "Half extents in object space."));
            }
            NodeKind::Primitive(PrimitiveKind::Plane) => {
                out.push(opt("Normal", "0, 1, 0", "Plane normal in object space."));
                out.push(opt("Offset", "0", "Distance from the origin along the normal."));
            }
        }
        out
    }

    /// Markdown help block for editor context panes.
    pub fn help_text(&self) -> String {
        let mut help = format!("## {}\n{}\n", self.kind_name(), self.help());
        let options = self.describe_options();
        if !options.is_empty() {
            help.push_str("\nOptional Parameters\n");
            for o in options {
                let _ = writeln!(help, "* **{}** ({}) - {}", o.name, o.default, o.help);
            }
        }
        help
    }

    fn fail(&self, ctx: &mut GraphContext, kind: CompileErrorKind) {
        ctx.error(CompileError::new(kind, self.line));
    }

    fn float1(&self, ctx: &mut GraphContext, name: &str, default: f32) -> f32 {
        self.options.float1(name, default, ctx.time()).unwrap_or_else(|e| {
            self.fail(ctx, e);
            default
        })
    }

    fn float3(&self, ctx: &mut GraphContext, name: &str, default: Vec3) -> Vec3 {
        self.options.float3(name, default, ctx.time()).unwrap_or_else(|e| {
            self.fail(ctx, e);
            default
        })
    }

    /// Traverse the subtree, recording data and entities and appending the
    /// scene intersection statements to `out`.
    pub fn compile(&self, ctx: &mut GraphContext, out: &mut Vec<Stmt>) {
        self.visit(ctx, Some(out));
    }

    /// Traverse the subtree refreshing data slots only (e.g. at a new time).
    pub fn execute(&self, ctx: &mut GraphContext) {
        self.visit(ctx, None);
    }

    fn visit(&self, ctx: &mut GraphContext, mut out: Option<&mut Vec<Stmt>>) {
        match &self.kind {
            NodeKind::Transformation(kind) => {
                let position = self.float3(ctx, "Position", Vec3::ZERO);
                let rotation = self.float3(ctx, "Rotation", Vec3::ZERO);
                let scale = self.float1(ctx, "Scale", 1.0);
                let frame = ctx.check_in(position, rotation, scale);
                if let Some(name) = self.options.text("Material") {
                    if let Some(index) = ctx.resolve_material(name, self.line) {
                        ctx.set_active_material(index);
                    }
                }
                if *kind == ObjectKind::Object {
                    let steps = self.float1(ctx, "Steps", 70.0).max(1.0) as u32;
                    let step_size = self.float1(ctx, "StepSize", 1.0).clamp(0.0, 1.0);
                    let max_box = match self.options.float3("MaxBox", Vec3::ZERO, ctx.time()) {
                        Ok(v) if self.options.contains("MaxBox") => Some(v),
                        Ok(_) => None,
                        Err(e) => {
                            self.fail(ctx, e);
                            None
                        }
                    };
                    ctx.entities.objects.push(ObjectRecord {
                        name: self.given_name.clone(),
                        slot: ctx.object(),
                        steps,
                        step_size,
                        max_box,
                    });
                }
                if let Some(out) = out.as_deref_mut() {
                    out.push(Stmt::Comment(format!("{} '{}'", self.kind_name(), self.given_name)));
                }
                for leaf in &self.leaves {
                    leaf.visit(ctx, out.as_deref_mut());
                }
                ctx.check_out(frame);
            }
            NodeKind::Material { role: MaterialRole::Surface, .. } => {
                // a material in a scope becomes active for what follows it
                if let Some(name) = self.explicit_name() {
                    if let Some(index) = ctx.resolve_material(name, self.line) {
                        ctx.set_active_material(index);
                    }
                }
            }
            NodeKind::Material { role: MaterialRole::Environment, .. } => {}
            NodeKind::Render => {
                for leaf in &self.leaves {
                    leaf.visit(ctx, out.as_deref_mut());
                }
            }
            NodeKind::Light(LightKind::Sun) => {
                let key = if self.options.contains("Direction") { "Direction" } else { "Position" };
                let direction = self.float3(ctx, key, Vec3::new(0.0, 1.0, -1.0));
                let direction = direction.try_normalize().unwrap_or_else(|| {
                    self.fail(ctx, CompileErrorKind::MalformedOption {
                        option: key.to_string(),
                        reason: "direction must not be zero".into(),
                    });
                    Vec3::Y
                });
                let emission = self.float3(ctx, "Emission", Vec3::splat(4.0));
                let data = ctx.slot(direction.extend(0.0));
                ctx.entities.lights.push(LightRecord { kind: LightKind::Sun, data, material: -1, radius: 0.0, emission });
            }
            NodeKind::Light(LightKind::Sphere) => {
                let position = self.float3(ctx, "Position", Vec3::ZERO);
                let radius = self.float1(ctx, "Radius", 1.0);
                let material = match self.options.text("Material") {
                    Some(name) => ctx.resolve_material(name, self.line),
                    None => {
                        self.fail(ctx, CompileErrorKind::MissingLightMaterial);
                        None
                    }
                };
                let Some(material) = material else { return };
                let center = ctx.to_world(position);
                let radius = radius * ctx.world_scale();
                let data = ctx.slot(center.extend(radius));
                ctx.entities.lights.push(LightRecord {
                    kind: LightKind::Sphere,
                    data,
                    material: material as i32,
                    radius,
                    emission: Vec3::ZERO,
                });
                if let Some(out) = out {
                    out.push(hit_call("prim_light_sphere", vec![Expr::Uint(data as u32), Expr::Int(material as i32)]));
                }
            }
            NodeKind::Camera(kind) => {
                let ortho = *kind == CameraKind::Isometric;
                let (origin_default, fov_default) =
                    if ortho { (Vec3::new(8.0, 8.0, -8.0), 6.0) } else { (Vec3::new(0.0, 0.0, -5.0), 60.0) };
                let camera = CameraRecord {
                    origin: self.float3(ctx, "Origin", origin_default),
                    look_at: self.float3(ctx, "LookAt", Vec3::ZERO),
                    fov: self.float1(ctx, "Fov", fov_default),
                    ortho,
                };
                if ctx.entities.camera.is_some() {
                    tracing::warn!(line = self.line, "multiple cameras, using the last one");
                }
                ctx.entities.camera = Some(camera);
            }
            NodeKind::Primitive(kind) => {
                let object = ctx.object();
                let material = ctx.active_material();
                let data = match kind {
                    PrimitiveKind::Sphere => {
                        let position = self.float3(ctx, "Position", Vec3::ZERO);
                        let radius = self.float1(ctx, "Radius", 1.0);
                        ctx.slot(position.extend(radius))
                    }
                    PrimitiveKind::Box => {
                        let position = self.float3(ctx, "Position", Vec3::ZERO);
                        let size = self.float3(ctx, "Size", Vec3::ONE);
                        let slot = ctx.slot(position.extend(0.0));
                        ctx.slot(size.abs().extend(0.0));
                        slot
                    }
                    PrimitiveKind::Plane => {
                        let normal = self.float3(ctx, "Normal", Vec3::Y).try_normalize().unwrap_or(Vec3::Y);
                        let offset = self.float1(ctx, "Offset", 0.0);
                        ctx.slot(Vec4::from((normal, offset)))
                    }
                };
                ctx.entities.primitives.push(PrimitiveRecord { kind: *kind, object, data, material });
                if let Some(out) = out {
                    let func = match kind {
                        PrimitiveKind::Sphere => "prim_sphere",
                        PrimitiveKind::Box => "prim_box",
                        PrimitiveKind::Plane => "prim_plane",
                    };
                    out.push(hit_call(func, vec![Expr::Uint(object as u32), Expr::Uint(data as u32), Expr::Int(material)]));
                }
            }
        }
    }

    /// Pre-order walk over this node and all descendants.
    pub fn walk<'a>(&'a self, f: &mut impl FnMut(&'a GraphNode)) {
        f(self);
        for leaf in &self.leaves {
            leaf.walk(f);
        }
    }
}

/// `hit = func(ro, rd, args.., hit);`
fn hit_call(func: &str, args: Vec<Expr>) -> Stmt {
    let mut all = vec![Expr::ident("ro"), Expr::ident("rd")];
    all.extend(args);
    all.push(Expr::ident("hit"));
    Stmt::assign(Expr::ident("hit"), Expr::call(func, all))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(kind: NodeKind, opts: &[(&str, &str)]) -> GraphNode {
        let mut o = NodeOptions::new();
        for (k, v) in opts {
            o.set(k, *v);
        }
        GraphNode::new(kind, o, 1)
    }

    #[test]
    fn test_help_text_lists_options() {
        let n = node(NodeKind::Transformation(ObjectKind::Object), &[]);
        let help = n.help_text();
        assert!(help.starts_with("## Object\n"));
        assert!(help.contains("* **Steps** (70)"));
        assert!(help.contains("* **Rotation**"));
    }

    #[test]
    fn test_given_name_defaults_to_kind() {
        let n = node(NodeKind::Render, &[]);
        assert_eq!(n.given_name, "Render");
        let mut o = NodeOptions::new();
        o.set_text("Name", "Main");
        assert_eq!(GraphNode::new(NodeKind::Render, o, 1).given_name, "Main");
    }

    #[test]
    fn test_primitive_emits_hit_call() {
        let mut ctx = GraphContext::new(0.0);
        let sphere = node(NodeKind::Primitive(PrimitiveKind::Sphere), &[("Radius", "2")]);
        let mut out = Vec::new();
        sphere.compile(&mut ctx, &mut out);
        assert_eq!(out.len(), 1);
        let rec = &ctx.entities.primitives[0];
        assert_eq!(rec.material, -1);
        assert_eq!(ctx.data()[rec.data].w, 2.0);
    }

    #[test]
    fn test_sphere_light_requires_material() {
        let mut ctx = GraphContext::new(0.0);
        node(NodeKind::Light(LightKind::Sphere), &[]).execute(&mut ctx);
        assert_eq!(ctx.take_error().unwrap().kind, CompileErrorKind::MissingLightMaterial);
        assert!(ctx.entities.lights.is_empty());
    }

    #[test]
    fn test_sun_direction_normalized() {
        let mut ctx = GraphContext::new(0.0);
        node(NodeKind::Light(LightKind::Sun), &[("Direction", "0, 2, 0")]).execute(&mut ctx);
        let light = &ctx.entities.lights[0];
        assert_eq!(ctx.data()[light.data].truncate(), Vec3::Y);
        assert_eq!(light.emission, Vec3::splat(4.0));
    }

    #[test]
    fn test_malformed_option_reports_line() {
        let mut ctx = GraphContext::new(0.0);
        let mut o = NodeOptions::new();
        o.set("Radius", "1, 2");
        GraphNode::new(NodeKind::Primitive(PrimitiveKind::Sphere), o, 42).execute(&mut ctx);
        let err = ctx.take_error().unwrap();
        assert_eq!(err.line, 42);
        assert!(matches!(err.kind, CompileErrorKind::MalformedOption { .. }));
    }
}
