//! Transform stack balance over arbitrary object nesting.

use glam::Vec3;
use proptest::prelude::*;
use signed_render::graph::context::GraphContext;
use signed_render::graph::{compile, GraphBuilder};

#[derive(Clone, Debug)]
struct Node {
    position: [f32; 3],
    rotation: [f32; 3],
    scale: f32,
    children: Vec<Node>,
}

fn node() -> impl Strategy<Value = Node> {
    let leaf = (prop::array::uniform3(-10.0f32..10.0), prop::array::uniform3(-180.0f32..180.0), 0.25f32..4.0)
        .prop_map(|(position, rotation, scale)| Node { position, rotation, scale, children: Vec::new() });
    leaf.prop_recursive(4, 32, 4, |inner| {
        (
            prop::array::uniform3(-10.0f32..10.0),
            prop::array::uniform3(-180.0f32..180.0),
            0.25f32..4.0,
            prop::collection::vec(inner, 0..4),
        )
            .prop_map(|(position, rotation, scale, children)| Node { position, rotation, scale, children })
    })
}

fn visit(ctx: &mut GraphContext, node: &Node) -> Result<(), TestCaseError> {
    let before = ctx.transform_state();
    let frame = ctx.check_in(Vec3::from_array(node.position), Vec3::from_array(node.rotation), node.scale);
    for child in &node.children {
        visit(ctx, child)?;
    }
    ctx.check_out(frame);
    prop_assert_eq!(ctx.transform_state(), before);
    Ok(())
}

fn count(node: &Node) -> usize {
    1 + node.children.iter().map(count).sum::<usize>()
}

fn build(b: GraphBuilder, node: &Node) -> GraphBuilder {
    let fmt = |v: [f32; 3]| format!("{}, {}, {}", v[0], v[1], v[2]);
    let position = fmt(node.position);
    let rotation = fmt(node.rotation);
    let scale = node.scale.to_string();
    let options = [("Position", position.as_str()), ("Rotation", rotation.as_str()), ("Scale", scale.as_str())];
    b.analytical(&options, |o| node.children.iter().fold(o.sphere(&[]), build))
}

proptest! {
    #[test]
    fn check_in_out_restores_state(roots in prop::collection::vec(node(), 1..4)) {
        let mut ctx = GraphContext::new(0.0);
        let initial = ctx.transform_state();
        for root in &roots {
            visit(&mut ctx, root)?;
        }
        prop_assert_eq!(ctx.transform_state(), initial);
        prop_assert_eq!(ctx.depth(), 0);
    }

    #[test]
    fn nested_objects_compile_one_primitive_each(root in node()) {
        let graph = GraphBuilder::new().render(&[], |r| build(r.camera(&[]), &root)).build();
        let scene = compile(&graph).unwrap();
        prop_assert_eq!(scene.entities.primitives.len(), count(&root));
        // Root identity slots plus three per object.
        prop_assert_eq!(scene.data.len() >= 3 + 3 * count(&root), true);
    }
}
