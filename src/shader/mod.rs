//! Shader generation.
//!
//! - [`ir`] - small statement/expression tree for generated functions
//! - [`wgsl`] - WGSL text backend
//! - [`compiler`] - material, environment and scene functions plus the full program
//!
//! The fixed passes live in `shaders/` and are concatenated after the BSDF
//! library and the generated functions.

pub mod compiler;
pub mod ir;
pub mod wgsl;

pub use compiler::{generate, MaterialInputs, MaterialProgram, ShaderProgram};

/// Bindings, channel layout and camera helpers.
pub const COMMON_SOURCE: &str = include_str!("shaders/common.wgsl");
/// Analytic depth/normal passes.
pub const GEOMETRY_SOURCE: &str = include_str!("shaders/geometry.wgsl");
/// Material resolve, direct light, path trace and accumulate passes.
pub const PASSES_SOURCE: &str = include_str!("shaders/passes.wgsl");

/// Compute entry points, in per-bounce dispatch order.
pub const ENTRY_POINTS: [&str; 7] = [
    "geometry_primary",
    "geometry_bounce",
    "material_resolve",
    "geometry_shadow",
    "direct_light",
    "path_trace",
    "accumulate",
];

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{compile, GraphBuilder};

    fn validate(source: &str) -> naga::Module {
        let module = naga::front::wgsl::parse_str(source).unwrap_or_else(|e| panic!("{}", e.emit_to_string(source)));
        let mut validator = naga::valid::Validator::new(naga::valid::ValidationFlags::all(), naga::valid::Capabilities::all());
        if let Err(e) = validator.validate(&module) {
            panic!("{}", e.emit_to_string(source));
        }
        module
    }

    fn scene() -> crate::graph::SceneGraph {
        GraphBuilder::new()
            .material("Red", |m| m.set("albedo", "0.8, 0.1, 0.1").set("roughness", "0.3"))
            .material("Lamp", |m| m.set("emission", "5, 5, 5"))
            .material("Glass", |m| {
                m.set("tint", "mix(#80c0ff, vec3(1.0), gradient)")
                    .set("albedo", "tint")
                    .set("transmission", "1")
                    .set("extinction", "tint * 0.9")
            })
            .environment(|m| m.set("color", "mix(vec3(0.1), vec3(0.4, 0.6, 1.0), saturate(rayDirection.y))"))
            .render(&[("Samples", "16")], |r| {
                r.camera(&[("Origin", "0, 1, -6")])
                    .sun(&[("Direction", "0.3, 1, -0.5")])
                    .sphere_light(&[("Position", "0, 4, 0"), ("Radius", "0.5"), ("Material", "Lamp")])
                    .object(&[("Material", "Red"), ("Position", "0, 0, 1")], |o| {
                        o.sphere(&[("Radius", "1")]).cube(&[("Size", "0.5, 0.5, 0.5")])
                    })
                    .analytical(&[("Material", "Glass"), ("Rotation", "0, 45, 0")], |o| o.plane(&[]))
            })
            .build()
    }

    #[test]
    fn test_generated_program_validates() {
        let compiled = compile(&scene()).unwrap();
        let module = validate(&compiled.program.source);
        for name in ENTRY_POINTS {
            assert!(module.entry_points.iter().any(|e| e.name == name), "missing entry point {name}");
        }
    }

    #[test]
    fn test_minimal_program_validates() {
        let graph = GraphBuilder::new().render(&[], |r| r.camera(&[])).build();
        let compiled = compile(&graph).unwrap();
        validate(&compiled.program.source);
    }
}
