//! Explicit traversal state for one compile pass.
//!
//! A `GraphContext` is created per compile (or per data refresh), threaded
//! by `&mut` through every node visit and dropped afterwards. Transform
//! nesting uses explicit frames: [`GraphContext::check_in`] returns the
//! saved ancestor state and [`GraphContext::check_out`] restores it.

use glam::{Vec3, Vec4};
use std::collections::BTreeMap;

use crate::util::{rotate_euler, CompileError, CompileErrorKind};

/// Analytic primitive shapes traced by the bundled geometry pass.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PrimitiveKind {
    /// data: `[center, radius]`
    Sphere,
    /// data: `[center, 0]`, `[half size, 0]`
    Box,
    /// data: `[normal, offset]`
    Plane,
}

impl PrimitiveKind {
    pub fn name(self) -> &'static str {
        match self {
            PrimitiveKind::Sphere => "Sphere",
            PrimitiveKind::Box => "Box",
            PrimitiveKind::Plane => "Plane",
        }
    }
}

/// A primitive placed under an object transform.
#[derive(Clone, Debug, PartialEq)]
pub struct PrimitiveRecord {
    pub kind: PrimitiveKind,
    /// Slot of the owning object's transform
    pub object: usize,
    /// Slot of the primitive parameters
    pub data: usize,
    /// Material index, -1 when none is active
    pub material: i32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LightKind {
    /// Directional light with a small solar disk
    Sun,
    /// Spherical area light emitting through its material
    Sphere,
}

/// Entry of the flat light list.
#[derive(Clone, Debug, PartialEq)]
pub struct LightRecord {
    pub kind: LightKind,
    /// Sun: `[direction, 0]`. Sphere: `[world center, world radius]`.
    pub data: usize,
    pub material: i32,
    pub radius: f32,
    pub emission: Vec3,
}

impl LightRecord {
    pub fn area(&self) -> f32 {
        match self.kind {
            LightKind::Sun => 0.0,
            LightKind::Sphere => 4.0 * std::f32::consts::PI * self.radius * self.radius,
        }
    }
}

/// Resolved camera.
#[derive(Clone, Debug, PartialEq)]
pub struct CameraRecord {
    pub origin: Vec3,
    pub look_at: Vec3,
    /// Vertical field of view in degrees (orthographic: view height)
    pub fov: f32,
    pub ortho: bool,
}

impl CameraRecord {
    /// Image plane half height at unit distance.
    pub fn scale(&self) -> f32 {
        if self.ortho { self.fov * 0.5 } else { (self.fov.to_radians() * 0.5).tan() }
    }
}

/// Object node as seen by an external ray-marching geometry pass.
#[derive(Clone, Debug, PartialEq)]
pub struct ObjectRecord {
    pub name: String,
    /// Slot of the cumulative transform
    pub slot: usize,
    pub steps: u32,
    pub step_size: f32,
    /// Optional march bounds in object space
    pub max_box: Option<Vec3>,
}

/// Everything the traversal placed in the scene.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SceneEntities {
    pub objects: Vec<ObjectRecord>,
    pub primitives: Vec<PrimitiveRecord>,
    pub lights: Vec<LightRecord>,
    pub camera: Option<CameraRecord>,
}

/// Saved ancestor state returned by [`GraphContext::check_in`].
#[derive(Clone, Debug, PartialEq)]
#[must_use = "a transform frame must be checked out"]
pub struct TransformFrame {
    position: Vec3,
    rotation: Vec3,
    scale: f32,
    object: usize,
    material: Option<i32>,
    depth: usize,
}

/// Transform snapshot, used to verify stack balance.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TransformState {
    pub position: Vec3,
    pub rotation: Vec3,
    pub scale: f32,
    pub object: usize,
    pub material: Option<i32>,
}

/// Slot of the identity transform used by primitives outside any object.
pub const ROOT_OBJECT: usize = 0;

/// Per-compile traversal state.
#[derive(Debug)]
pub struct GraphContext {
    position: Vec3,
    rotation: Vec3,
    scale: f32,
    object: usize,
    active_material: Option<i32>,
    depth: usize,
    materials: BTreeMap<String, usize>,
    data: Vec<Vec4>,
    errors: Vec<CompileError>,
    time: f32,
    pub entities: SceneEntities,
}

impl GraphContext {
    pub fn new(time: f32) -> Self {
        let mut ctx = Self {
            position: Vec3::ZERO,
            rotation: Vec3::ZERO,
            scale: 1.0,
            object: ROOT_OBJECT,
            active_material: None,
            depth: 0,
            materials: BTreeMap::new(),
            data: Vec::new(),
            errors: Vec::new(),
            time,
            entities: SceneEntities::default(),
        };
        ctx.object = ctx.push_object_slots();
        ctx
    }

    pub fn time(&self) -> f32 {
        self.time
    }

    /// Append a value to the constant-data array and return its slot.
    pub fn slot(&mut self, value: Vec4) -> usize {
        self.data.push(value);
        self.data.len() - 1
    }

    pub fn data(&self) -> &[Vec4] {
        &self.data
    }

    fn push_object_slots(&mut self) -> usize {
        let base = self.slot(self.position.extend(0.0));
        self.slot(self.rotation.extend(0.0));
        self.slot(Vec4::new(self.scale, 0.0, 0.0, 0.0));
        base
    }

    /// Compose a node's transform with the running totals and record the
    /// cumulative values into three fresh data slots.
    pub fn check_in(&mut self, position: Vec3, rotation: Vec3, scale: f32) -> TransformFrame {
        let frame = TransformFrame {
            position: self.position,
            rotation: self.rotation,
            scale: self.scale,
            object: self.object,
            material: self.active_material,
            depth: self.depth,
        };
        self.position += position;
        self.rotation += rotation;
        self.scale *= scale;
        self.depth += 1;
        self.object = self.push_object_slots();
        frame
    }

    /// Restore the state saved by the matching [`check_in`](Self::check_in).
    pub fn check_out(&mut self, frame: TransformFrame) {
        debug_assert_eq!(self.depth, frame.depth + 1, "unbalanced transform frames");
        self.position = frame.position;
        self.rotation = frame.rotation;
        self.scale = frame.scale;
        self.object = frame.object;
        self.active_material = frame.material;
        self.depth = frame.depth;
    }

    pub fn transform_state(&self) -> TransformState {
        TransformState {
            position: self.position,
            rotation: self.rotation,
            scale: self.scale,
            object: self.object,
            material: self.active_material,
        }
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Current object's transform slot.
    pub fn object(&self) -> usize {
        self.object
    }

    /// Map a point from the current object's space to world space.
    pub fn to_world(&self, local: Vec3) -> Vec3 {
        self.position + rotate_euler(local * self.scale, self.rotation)
    }

    pub fn world_scale(&self) -> f32 {
        self.scale
    }

    pub fn rotation(&self) -> Vec3 {
        self.rotation
    }

    pub fn register_material(&mut self, name: &str) -> usize {
        let next = self.materials.len();
        *self.materials.entry(name.to_string()).or_insert(next)
    }

    pub fn material_index(&self, name: &str) -> Option<usize> {
        self.materials.get(name).copied()
    }

    pub fn set_active_material(&mut self, index: usize) {
        self.active_material = Some(index as i32);
    }

    /// Active material index or -1.
    pub fn active_material(&self) -> i32 {
        self.active_material.unwrap_or(-1)
    }

    /// Resolve a material reference, recording an error when it does not exist.
    pub fn resolve_material(&mut self, name: &str, line: usize) -> Option<usize> {
        let found = self.material_index(name);
        if found.is_none() {
            self.error(CompileError::new(CompileErrorKind::UnresolvedMaterial(name.to_string()), line));
        }
        found
    }

    pub fn error(&mut self, err: CompileError) {
        self.errors.push(err);
    }

    pub fn errors(&self) -> &[CompileError] {
        &self.errors
    }

    /// First recorded error, if any.
    pub fn take_error(&mut self) -> Option<CompileError> {
        if self.errors.is_empty() {
            None
        } else {
            Some(self.errors.remove(0))
        }
    }

    pub fn into_parts(self) -> (Vec<Vec4>, SceneEntities) {
        (self.data, self.entities)
    }
}
