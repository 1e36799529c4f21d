//! Whole-graph compilation tests.

use glam::Vec3;
use signed_render::graph::{compile, GraphBuilder, SceneGraph};
use signed_render::shader::{MaterialInputs, ENTRY_POINTS};
use signed_render::CompileErrorKind;

fn studio() -> SceneGraph {
    GraphBuilder::new()
        .material("Floor", |m| {
            m.set("check", "step(0.5, fract(rayPosition.x)) * step(0.5, fract(rayPosition.z))")
                .set("albedo", "mix(vec3(0.2), vec3(0.8), check)")
        })
        .material("Gold", |m| m.set("albedo", "#ffcc33").set("metallic", "1").set("roughness", "0.3"))
        .material("Lamp", |m| m.set("emission", "8, 8, 6"))
        .environment(|e| e.set("color", "mix(vec3(1), vec3(0.3, 0.5, 0.9), saturate(rayDirection.y))"))
        .render(&[("Depth", "4")], |r| {
            r.camera(&[("Origin", "0, 2, -6"), ("LookAt", "0, 0.5, 0")])
                .sun(&[])
                .sphere_light(&[("Position", "2, 3, 0"), ("Radius", "0.3"), ("Material", "Lamp")])
                .analytical(&[("Material", "Floor")], |o| o.plane(&[]))
                .analytical(&[("Material", "Gold"), ("Position", "0, 1, 0"), ("Rotation", "0, 45, 0")], |o| {
                    o.cube(&[("Size", "0.5")]).sphere(&[("Position", "1.5, 0, 0"), ("Radius", "0.5")])
                })
        })
        .build()
}

#[test]
fn test_compile_is_deterministic() {
    let a = compile(&studio()).unwrap();
    let b = compile(&studio()).unwrap();
    assert_eq!(a.program, b.program);
    assert_eq!(a.data, b.data);
    for entry in ENTRY_POINTS {
        assert!(a.program.source.contains(&format!("fn {entry}(")), "missing {entry}");
    }
}

#[test]
fn test_scene_contents() {
    let scene = compile(&studio()).unwrap();
    assert_eq!(scene.materials.len(), 3);
    assert!(scene.environment.is_some());
    assert_eq!(scene.entities.lights.len(), 2);
    assert_eq!(scene.entities.primitives.len(), 3);
    assert_eq!(scene.render.depth, Some(4));

    let gold = scene.material_index("Gold").and_then(|i| scene.material(i as i32)).expect("gold");
    let p = gold.evaluate(&MaterialInputs::default());
    assert!((p.albedo - Vec3::new(1.0, 0.8, 0.2)).abs().max_element() < 0.01);
    assert_eq!(p.metallic, 1.0);

    let env = scene.environment.as_ref().expect("environment");
    let up = MaterialInputs { ray_direction: Vec3::Y, ..Default::default() };
    assert!((env.evaluate_environment(&up, Vec3::ZERO) - Vec3::new(0.3, 0.5, 0.9)).length() < 1e-5);
}

#[test]
fn test_material_edit_changes_hash() {
    let base = compile(&studio()).unwrap();
    let edited = GraphBuilder::new()
        .material("Floor", |m| m.set("albedo", "0.5"))
        .render(&[], |r| r.camera(&[]).analytical(&[("Material", "Floor")], |o| o.plane(&[])))
        .build();
    assert_ne!(compile(&edited).unwrap().program.hash, base.program.hash);
}

#[test]
fn test_errors_point_at_statement_line() {
    let graph = GraphBuilder::new()
        .material("Ok", |m| m.set("albedo", "0.5"))
        .material("Broken", |m| m.set("roughness", "0.2").set("albedo", "shimmer(uv)"))
        .render(&[], |r| r.camera(&[]))
        .build();
    let err = compile(&graph).unwrap_err();
    assert_eq!(err.kind, CompileErrorKind::UnknownFunction("shimmer".into()));
    assert_eq!(err.line, 5);
    assert!(err.to_string().starts_with("line 5:"));
}
