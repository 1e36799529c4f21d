//! Programmatic scene graph construction.
//!
//! Source lines are assigned in call order, one per node or statement, so
//! diagnostics point somewhere meaningful for graphs built in code.
//!
//! ```ignore
//! let graph = GraphBuilder::new()
//!     .material("White", |m| m.set("albedo", "0.8, 0.8, 0.8"))
//!     .render(&[], |r| {
//!         r.camera(&[("Origin", "0, 0, -5")])
//!             .sun(&[("Direction", "0, 1, -1"), ("Emission", "4, 4, 4")])
//!             .analytical(&[("Material", "White")], |o| o.sphere(&[("Radius", "1")]))
//!     })
//!     .build();
//! ```

use super::compile::SceneGraph;
use super::context::{LightKind, PrimitiveKind};
use super::node::{CameraKind, GraphNode, MaterialRole, NodeKind, ObjectKind, Statement};
use super::options::NodeOptions;

/// Options holding names rather than values.
const TEXT_OPTIONS: [&str; 2] = ["name", "material"];

fn options_from(pairs: &[(&str, &str)]) -> NodeOptions {
    let mut options = NodeOptions::new();
    for (key, value) in pairs {
        if TEXT_OPTIONS.contains(&key.to_lowercase().as_str()) {
            options.set_text(key, value);
        } else {
            options.set(key, *value);
        }
    }
    options
}

/// Body of a material or environment node.
#[derive(Debug, Default)]
pub struct MaterialBuilder {
    statements: Vec<Statement>,
    line: usize,
}

impl MaterialBuilder {
    /// Append `target = source`.
    pub fn set(mut self, target: &str, source: &str) -> Self {
        self.line += 1;
        self.statements.push(Statement { target: target.to_string(), source: source.to_string(), line: self.line });
        self
    }
}

/// Builds one scope of nodes (the graph root or a node's leaves).
#[derive(Debug, Default)]
pub struct GraphBuilder {
    nodes: Vec<GraphNode>,
    line: usize,
}

impl GraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_line(&mut self) -> usize {
        self.line += 1;
        self.line
    }

    /// Add a node with prepared options and children built by `f`.
    pub fn node_with(mut self, kind: NodeKind, options: NodeOptions, f: impl FnOnce(GraphBuilder) -> GraphBuilder) -> Self {
        let line = self.next_line();
        let inner = f(GraphBuilder { nodes: Vec::new(), line });
        self.line = inner.line;
        self.nodes.push(GraphNode::new(kind, options, line).with_leaves(inner.nodes));
        self
    }

    fn leaf(self, kind: NodeKind, options: &[(&str, &str)]) -> Self {
        self.node_with(kind, options_from(options), |b| b)
    }

    fn material_node(mut self, role: MaterialRole, name: &str, f: impl FnOnce(MaterialBuilder) -> MaterialBuilder) -> Self {
        let line = self.next_line();
        let body = f(MaterialBuilder { statements: Vec::new(), line });
        self.line = body.line;
        let mut options = NodeOptions::new();
        options.set_text("Name", name);
        self.nodes.push(GraphNode::new(NodeKind::Material { role, statements: body.statements }, options, line));
        self
    }

    pub fn material(self, name: &str, f: impl FnOnce(MaterialBuilder) -> MaterialBuilder) -> Self {
        self.material_node(MaterialRole::Surface, name, f)
    }

    pub fn environment(self, f: impl FnOnce(MaterialBuilder) -> MaterialBuilder) -> Self {
        self.material_node(MaterialRole::Environment, "Environment", f)
    }

    pub fn render(self, options: &[(&str, &str)], f: impl FnOnce(GraphBuilder) -> GraphBuilder) -> Self {
        self.node_with(NodeKind::Render, options_from(options), f)
    }

    pub fn object(self, options: &[(&str, &str)], f: impl FnOnce(GraphBuilder) -> GraphBuilder) -> Self {
        self.node_with(NodeKind::Transformation(ObjectKind::Object), options_from(options), f)
    }

    pub fn analytical(self, options: &[(&str, &str)], f: impl FnOnce(GraphBuilder) -> GraphBuilder) -> Self {
        self.node_with(NodeKind::Transformation(ObjectKind::Analytical), options_from(options), f)
    }

    pub fn sphere(self, options: &[(&str, &str)]) -> Self {
        self.leaf(NodeKind::Primitive(PrimitiveKind::Sphere), options)
    }

    pub fn cube(self, options: &[(&str, &str)]) -> Self {
        self.leaf(NodeKind::Primitive(PrimitiveKind::Box), options)
    }

    pub fn plane(self, options: &[(&str, &str)]) -> Self {
        self.leaf(NodeKind::Primitive(PrimitiveKind::Plane), options)
    }

    pub fn sun(self, options: &[(&str, &str)]) -> Self {
        self.leaf(NodeKind::Light(LightKind::Sun), options)
    }

    pub fn sphere_light(self, options: &[(&str, &str)]) -> Self {
        self.leaf(NodeKind::Light(LightKind::Sphere), options)
    }

    pub fn camera(self, options: &[(&str, &str)]) -> Self {
        self.leaf(NodeKind::Camera(CameraKind::Pinhole), options)
    }

    pub fn isometric_camera(self, options: &[(&str, &str)]) -> Self {
        self.leaf(NodeKind::Camera(CameraKind::Isometric), options)
    }

    /// Reference a material inside a scope, making it active for what follows.
    pub fn use_material(mut self, name: &str) -> Self {
        let line = self.next_line();
        let mut options = NodeOptions::new();
        options.set_text("Name", name);
        let kind = NodeKind::Material { role: MaterialRole::Surface, statements: Vec::new() };
        self.nodes.push(GraphNode::new(kind, options, line));
        self
    }

    pub fn build(self) -> SceneGraph {
        SceneGraph { nodes: self.nodes }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lines_follow_call_order() {
        let graph = GraphBuilder::new()
            .material("A", |m| m.set("albedo", "1, 0, 0").set("roughness", "0.2"))
            .render(&[], |r| r.camera(&[]).sun(&[]))
            .build();
        assert_eq!(graph.nodes[0].line, 1);
        let NodeKind::Material { statements, .. } = &graph.nodes[0].kind else { panic!("material") };
        assert_eq!(statements[0].line, 2);
        assert_eq!(statements[1].line, 3);
        assert_eq!(graph.nodes[1].line, 4);
        assert_eq!(graph.nodes[1].leaves[0].line, 5);
        assert_eq!(graph.nodes[1].leaves[1].line, 6);
    }

    #[test]
    fn test_text_options() {
        let graph = GraphBuilder::new()
            .render(&[], |r| r.analytical(&[("Name", "Ball"), ("Material", "\"Gold\"")], |o| o))
            .build();
        let obj = &graph.nodes[0].leaves[0];
        assert_eq!(obj.given_name, "Ball");
        assert_eq!(obj.options.text("material"), Some("Gold"));
    }
}
