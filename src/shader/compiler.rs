//! Material and environment shader compiler.
//!
//! Every surface material becomes `material_{index}`; a single
//! `resolve_material(id, inp)` cascade dispatches by index and is the only
//! place the fixed passes look materials up. The optional environment node
//! becomes `environment(inp)`, wired into every miss branch.

use disney_bsdf::BsdfParams;
use glam::{Vec2, Vec3};
use std::collections::BTreeMap;
use std::hash::{DefaultHasher, Hash, Hasher};

use super::ir::{if_chain, Expr as Ir, Param, ShaderFunction, Stmt, Ty};
use super::{wgsl, COMMON_SOURCE, GEOMETRY_SOURCE, PASSES_SOURCE};
use crate::graph::expr::{Expr, LowerScope, TypeScope, Value, ValueScope, ValueType};
use crate::graph::node::{MaterialRole, Statement};
use crate::util::{CompileError, CompileErrorKind};

/// Variables visible to surface material bodies, with their shader fields.
pub const SURFACE_VARIABLES: [(&str, &str, ValueType); 6] = [
    ("rayPosition", "ray_position", ValueType::Float3),
    ("normal", "normal", ValueType::Float3),
    ("viewSize", "view_size", ValueType::Float2),
    ("uv", "uv", ValueType::Float2),
    ("hash", "hash", ValueType::Float1),
    ("gradient", "gradient", ValueType::Float1),
];

/// Extra variable visible to the environment body.
pub const ENVIRONMENT_VARIABLE: (&str, &str, ValueType) = ("rayDirection", "ray_direction", ValueType::Float3);

/// Assignable BSDF fields: (lowercase target, shader field, type).
const MATERIAL_FIELDS: [(&str, &str, ValueType); 15] = [
    ("albedo", "albedo", ValueType::Float3),
    ("specular", "specular", ValueType::Float1),
    ("emission", "emission", ValueType::Float3),
    ("anisotropic", "anisotropic", ValueType::Float1),
    ("metallic", "metallic", ValueType::Float1),
    ("roughness", "roughness", ValueType::Float1),
    ("subsurface", "subsurface", ValueType::Float1),
    ("speculartint", "specular_tint", ValueType::Float1),
    ("sheen", "sheen", ValueType::Float1),
    ("sheentint", "sheen_tint", ValueType::Float1),
    ("clearcoat", "clearcoat", ValueType::Float1),
    ("clearcoatgloss", "clearcoat_gloss", ValueType::Float1),
    ("transmission", "transmission", ValueType::Float1),
    ("ior", "ior", ValueType::Float1),
    ("extinction", "extinction", ValueType::Float3),
];

/// CPU mirror of the shader `MaterialInput` struct.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct MaterialInputs {
    pub ray_position: Vec3,
    pub ray_direction: Vec3,
    pub normal: Vec3,
    pub uv: Vec2,
    pub view_size: Vec2,
    pub hash: f32,
    pub gradient: f32,
}

impl MaterialInputs {
    fn system_value(&self, name: &str) -> Option<Value> {
        Some(match name {
            "rayPosition" => Value::float3(self.ray_position),
            "rayDirection" => Value::float3(self.ray_direction),
            "normal" => Value::float3(self.normal),
            "viewSize" => Value::float2(self.view_size),
            "uv" => Value::float2(self.uv),
            "hash" => Value::float1(self.hash),
            "gradient" => Value::float1(self.gradient),
            _ => return None,
        })
    }
}

#[derive(Clone, Debug, PartialEq)]
enum Target {
    /// BSDF field (or the environment color)
    Field(&'static str, ValueType),
    /// User local; `declare` marks its first assignment
    Local { name: String, ty: ValueType, declare: bool },
}

#[derive(Clone, Debug, PartialEq)]
struct TypedStatement {
    target: Target,
    expr: Expr,
    line: usize,
}

/// Type environment while checking and lowering one body.
struct BodyScope {
    role: MaterialRole,
    locals: BTreeMap<String, ValueType>,
}

impl BodyScope {
    fn new(role: MaterialRole) -> Self {
        Self { role, locals: BTreeMap::new() }
    }

    fn system(&self, name: &str) -> Option<(&'static str, ValueType)> {
        let env = (self.role == MaterialRole::Environment).then_some(ENVIRONMENT_VARIABLE);
        SURFACE_VARIABLES.iter().chain(env.iter()).find(|(n, _, _)| *n == name).map(|(_, f, t)| (*f, *t))
    }
}

impl TypeScope for BodyScope {
    fn var_type(&self, name: &str) -> Option<ValueType> {
        self.locals.get(name).copied().or_else(|| self.system(name).map(|(_, t)| t))
    }
}

impl LowerScope for BodyScope {
    fn var_expr(&self, name: &str) -> Ir {
        match self.system(name) {
            Some((field, _)) if !self.locals.contains_key(name) => Ir::ident("inp").field(field),
            _ => Ir::ident(local_name(name)),
        }
    }
}

fn local_name(name: &str) -> String {
    format!("v_{name}")
}

/// Value environment for CPU evaluation.
struct EvalScope<'a> {
    inputs: &'a MaterialInputs,
    locals: BTreeMap<String, Value>,
}

impl ValueScope for EvalScope<'_> {
    fn var_value(&self, name: &str) -> Option<Value> {
        self.locals.get(name).copied().or_else(|| self.inputs.system_value(name))
    }
}

/// Type-checked material or environment body.
#[derive(Clone, Debug, PartialEq)]
pub struct MaterialProgram {
    pub name: String,
    pub index: usize,
    pub role: MaterialRole,
    body: Vec<TypedStatement>,
}

impl MaterialProgram {
    /// Parse and type-check a body. Errors carry the statement's line.
    pub fn build(name: &str, index: usize, role: MaterialRole, statements: &[Statement]) -> Result<Self, CompileError> {
        let mut scope = BodyScope::new(role);
        let mut body = Vec::with_capacity(statements.len());
        for st in statements {
            let at = |kind| CompileError::new(kind, st.line);
            let expr = Expr::parse(&st.source).map_err(|reason| {
                at(CompileErrorKind::MalformedOption { option: st.target.clone(), reason })
            })?;
            let ty = expr.infer(&scope).map_err(at)?;
            let key = st.target.to_lowercase();
            let field = match role {
                MaterialRole::Surface => MATERIAL_FIELDS.iter().find(|(k, _, _)| *k == key).map(|(_, f, t)| (*f, *t)),
                MaterialRole::Environment => (key == "color").then_some(("color", ValueType::Float3)),
            };
            let target = match field {
                Some((field, want)) => {
                    if !ty.assignable_to(want) {
                        return Err(at(CompileErrorKind::TypeMismatch { expected: want.name().into(), actual: ty.name().into() }));
                    }
                    Target::Field(field, want)
                }
                None => {
                    if !is_identifier(&st.target) {
                        return Err(at(CompileErrorKind::MalformedOption {
                            option: st.target.clone(),
                            reason: "not a valid variable name".into(),
                        }));
                    }
                    match scope.locals.get(&st.target) {
                        Some(&prev) if !ty.assignable_to(prev) => {
                            return Err(at(CompileErrorKind::TypeMismatch { expected: prev.name().into(), actual: ty.name().into() }));
                        }
                        Some(&prev) => Target::Local { name: st.target.clone(), ty: prev, declare: false },
                        None => {
                            scope.locals.insert(st.target.clone(), ty);
                            Target::Local { name: st.target.clone(), ty, declare: true }
                        }
                    }
                }
            };
            body.push(TypedStatement { target, expr, line: st.line });
        }
        Ok(Self { name: name.to_string(), index, role, body })
    }

    pub fn function_name(&self) -> String {
        match self.role {
            MaterialRole::Surface => format!("material_{}", self.index),
            MaterialRole::Environment => "environment".into(),
        }
    }

    /// Lower the body to a shader function.
    pub fn function(&self) -> Result<ShaderFunction, CompileError> {
        let (ret, result, init) = match self.role {
            MaterialRole::Surface => (Ty::named("BsdfMaterial"), "m", Ir::call("default_material", vec![])),
            MaterialRole::Environment => (Ty::Vec3, "color", Ir::ident("uniforms").field("background").field("xyz")),
        };
        let mut f = ShaderFunction::new(self.function_name(), vec![Param::new("inp", Ty::named("MaterialInput"))], Some(ret.clone()));
        f.body.push(Stmt::Comment(self.name.clone()));
        f.body.push(Stmt::Var { name: result.into(), ty: ret, value: Some(init) });
        let mut scope = BodyScope::new(self.role);
        for st in &self.body {
            let (value, ty) = st.expr.lower(&scope).map_err(|k| CompileError::new(k, st.line))?;
            match &st.target {
                Target::Field(field, want) => {
                    let target = if self.role == MaterialRole::Environment { Ir::ident(result) } else { Ir::ident(result).field(*field) };
                    f.body.push(Stmt::assign(target, splat(value, ty, *want)));
                }
                Target::Local { name, ty: want, declare } => {
                    let value = splat(value, ty, *want);
                    if *declare {
                        scope.locals.insert(name.clone(), *want);
                        f.body.push(Stmt::Var { name: local_name(name), ty: want.shader_ty(), value: Some(value) });
                    } else {
                        f.body.push(Stmt::assign(Ir::ident(local_name(name)), value));
                    }
                }
            }
        }
        f.body.push(Stmt::Return(Some(Ir::ident(result))));
        Ok(f)
    }

    fn run(&self, inputs: &MaterialInputs, mut store: impl FnMut(&str, Value)) {
        let mut scope = EvalScope { inputs, locals: BTreeMap::new() };
        for st in &self.body {
            // bodies are type-checked at build time
            let Ok(value) = st.expr.eval(&scope) else { continue };
            match &st.target {
                Target::Field(field, _) => store(field, value),
                Target::Local { name, ty, .. } => {
                    let value = if value.ty() == *ty { value } else { Value::splat(*ty, value.x()) };
                    scope.locals.insert(name.clone(), value);
                }
            }
        }
    }

    /// Evaluate a surface body on the CPU.
    pub fn evaluate(&self, inputs: &MaterialInputs) -> BsdfParams {
        let mut m = BsdfParams::default();
        self.run(inputs, |field, v| match field {
            "albedo" => m.albedo = v.as_vec3(),
            "specular" => m.specular = v.x(),
            "emission" => m.emission = v.as_vec3(),
            "anisotropic" => m.anisotropic = v.x(),
            "metallic" => m.metallic = v.x(),
            "roughness" => m.roughness = v.x(),
            "subsurface" => m.subsurface = v.x(),
            "specular_tint" => m.specular_tint = v.x(),
            "sheen" => m.sheen = v.x(),
            "sheen_tint" => m.sheen_tint = v.x(),
            "clearcoat" => m.clearcoat = v.x(),
            "clearcoat_gloss" => m.clearcoat_gloss = v.x(),
            "transmission" => m.transmission = v.x(),
            "ior" => m.ior = v.x(),
            "extinction" => m.extinction = v.as_vec3(),
            _ => {}
        });
        m
    }

    /// Evaluate an environment body on the CPU.
    pub fn evaluate_environment(&self, inputs: &MaterialInputs, background: Vec3) -> Vec3 {
        let mut color = background;
        self.run(inputs, |_, v| color = v.as_vec3());
        color
    }
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    chars.next().is_some_and(|c| c.is_alphabetic() || c == '_') && chars.all(|c| c.is_alphanumeric() || c == '_')
}

fn splat(value: Ir, ty: ValueType, want: ValueType) -> Ir {
    if ty == want || want == ValueType::Float1 {
        value
    } else {
        Ir::Construct(want.shader_ty(), vec![value])
    }
}

/// Generated shader source with its cache key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ShaderProgram {
    pub source: String,
    pub hash: u64,
}

impl ShaderProgram {
    pub fn new(source: String) -> Self {
        let mut hasher = DefaultHasher::new();
        source.hash(&mut hasher);
        Self { hash: hasher.finish(), source }
    }
}

/// `resolve_material(id, inp)`: index cascade with a default fallback.
fn dispatch_function(materials: &[MaterialProgram]) -> ShaderFunction {
    let mut f = ShaderFunction::new(
        "resolve_material",
        vec![Param::new("id", Ty::I32), Param::new("inp", Ty::named("MaterialInput"))],
        Some(Ty::named("BsdfMaterial")),
    );
    let arms = materials
        .iter()
        .map(|m| {
            let call = Ir::call(m.function_name(), vec![Ir::ident("inp")]);
            (Ir::ident("id").eq(Ir::Int(m.index as i32)), vec![Stmt::Return(Some(call))])
        })
        .collect();
    f.body = if_chain(arms);
    f.body.push(Stmt::Return(Some(Ir::call("default_material", vec![]))));
    f
}

fn default_environment() -> ShaderFunction {
    let mut f = ShaderFunction::new("environment", vec![Param::new("inp", Ty::named("MaterialInput"))], Some(Ty::Vec3));
    f.body.push(Stmt::Return(Some(Ir::ident("uniforms").field("background").field("xyz"))));
    f
}

/// `scene_hit(ro, rd)`: nearest hit over all emitted primitives.
fn scene_function(scene: &[Stmt]) -> ShaderFunction {
    let mut f = ShaderFunction::new(
        "scene_hit",
        vec![Param::new("ro", Ty::Vec3), Param::new("rd", Ty::Vec3)],
        Some(Ty::named("Hit")),
    );
    f.body.push(Stmt::Var { name: "hit".into(), ty: Ty::named("Hit"), value: Some(Ir::call("no_hit", vec![])) });
    f.body.extend(scene.iter().cloned());
    f.body.push(Stmt::Return(Some(Ir::ident("hit"))));
    f
}

/// Assemble the complete program: BSDF library, common bindings, generated
/// functions, geometry pass and the material/light/path/accumulate passes.
#[tracing::instrument(skip_all, fields(materials = materials.len(), environment = environment.is_some()))]
pub fn generate(materials: &[MaterialProgram], environment: Option<&MaterialProgram>, scene: &[Stmt]) -> Result<ShaderProgram, CompileError> {
    let mut functions = Vec::with_capacity(materials.len() + 3);
    for m in materials {
        functions.push(m.function()?);
    }
    functions.push(dispatch_function(materials));
    functions.push(match environment {
        Some(env) => env.function()?,
        None => default_environment(),
    });
    functions.push(scene_function(scene));

    let source = [
        disney_bsdf::library_source(),
        COMMON_SOURCE.to_string(),
        "// generated\n".to_string() + &wgsl::module(&functions),
        GEOMETRY_SOURCE.to_string(),
        PASSES_SOURCE.to_string(),
    ]
    .join("\n");
    Ok(ShaderProgram::new(source))
}
