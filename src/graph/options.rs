//! Node option maps and typed extraction.

use glam::{Vec2, Vec3};
use std::collections::BTreeMap;

use super::expr::{Expr, Value, ValueType};
use crate::util::CompileErrorKind;

/// One animation key: the value expression at `time`.
#[derive(Clone, Debug, PartialEq)]
pub struct Keyframe {
    pub time: f32,
    pub value: String,
}

/// Raw option value as written on a node.
#[derive(Clone, Debug, PartialEq)]
pub enum OptionValue {
    /// Quoted text (names, material references)
    Text(String),
    /// Constant expression source
    Expr(String),
    /// Keyframed expression, linearly interpolated over time
    Animated(Vec<Keyframe>),
}

impl From<&str> for OptionValue {
    fn from(s: &str) -> Self {
        OptionValue::Expr(s.to_string())
    }
}

impl From<f32> for OptionValue {
    fn from(x: f32) -> Self {
        OptionValue::Expr(format!("{x:?}"))
    }
}

impl From<Vec3> for OptionValue {
    fn from(v: Vec3) -> Self {
        OptionValue::Expr(format!("{:?}, {:?}, {:?}", v.x, v.y, v.z))
    }
}

/// Case-insensitive option map. Keys are stored lowercase.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct NodeOptions {
    map: BTreeMap<String, OptionValue>,
}

fn malformed(option: &str, reason: impl Into<String>) -> CompileErrorKind {
    CompileErrorKind::MalformedOption { option: option.to_string(), reason: reason.into() }
}

impl NodeOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, name: &str, value: impl Into<OptionValue>) {
        self.map.insert(name.to_lowercase(), value.into());
    }

    pub fn set_text(&mut self, name: &str, text: &str) {
        self.set(name, OptionValue::Text(text.trim_matches('"').to_string()));
    }

    pub fn get(&self, name: &str) -> Option<&OptionValue> {
        self.map.get(&name.to_lowercase())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &OptionValue)> {
        self.map.iter()
    }

    /// Text option. Expression options are returned verbatim.
    pub fn text(&self, name: &str) -> Option<&str> {
        match self.get(name)? {
            OptionValue::Text(s) | OptionValue::Expr(s) => Some(s.as_str()),
            OptionValue::Animated(_) => None,
        }
    }

    /// Evaluate an option at `time`. `Ok(None)` when the option is absent.
    pub fn value(&self, name: &str, time: f32) -> Result<Option<Value>, CompileErrorKind> {
        let Some(raw) = self.get(name) else { return Ok(None) };
        let eval = |src: &str| -> Result<Value, CompileErrorKind> {
            let expr = Expr::parse(src).map_err(|e| malformed(name, e))?;
            expr.eval_const().map_err(|e| malformed(name, e.to_string()))
        };
        match raw {
            OptionValue::Text(s) => Err(malformed(name, format!("expected a value, got text \"{s}\""))),
            OptionValue::Expr(src) => eval(src).map(Some),
            OptionValue::Animated(keys) => {
                let mut keys = keys.clone();
                keys.sort_by(|a, b| a.time.total_cmp(&b.time));
                let (Some(first), Some(last)) = (keys.first(), keys.last()) else {
                    return Err(malformed(name, "animation without keys"));
                };
                if time <= first.time {
                    return eval(&first.value).map(Some);
                }
                if time >= last.time {
                    return eval(&last.value).map(Some);
                }
                for pair in keys.windows(2) {
                    let (a, b) = (&pair[0], &pair[1]);
                    if time >= a.time && time <= b.time {
                        let (va, vb) = (eval(&a.value)?, eval(&b.value)?);
                        if va.ty() != vb.ty() {
                            return Err(malformed(name, format!("keys mix {} and {}", va.ty(), vb.ty())));
                        }
                        let span = b.time - a.time;
                        let t = if span > 0.0 { (time - a.time) / span } else { 0.0 };
                        return Ok(Some(va.lerp(&vb, t)));
                    }
                }
                eval(&last.value).map(Some)
            }
        }
    }

    fn typed(&self, name: &str, want: ValueType, time: f32) -> Result<Option<Value>, CompileErrorKind> {
        let Some(v) = self.value(name, time)? else { return Ok(None) };
        if v.ty().assignable_to(want) {
            Ok(Some(v))
        } else {
            Err(malformed(name, format!("expected {want}, got {}", v.ty())))
        }
    }

    pub fn float1(&self, name: &str, default: f32, time: f32) -> Result<f32, CompileErrorKind> {
        Ok(self.typed(name, ValueType::Float1, time)?.map_or(default, |v| v.x()))
    }

    pub fn float2(&self, name: &str, default: Vec2, time: f32) -> Result<Vec2, CompileErrorKind> {
        Ok(self.typed(name, ValueType::Float2, time)?.map_or(default, |v| v.as_vec2()))
    }

    /// Scalars broadcast to all three components.
    pub fn float3(&self, name: &str, default: Vec3, time: f32) -> Result<Vec3, CompileErrorKind> {
        Ok(self.typed(name, ValueType::Float3, time)?.map_or(default, |v| v.as_vec3()))
    }

    /// Whether any option is keyframed.
    pub fn is_animated(&self) -> bool {
        self.map.values().any(|v| matches!(v, OptionValue::Animated(_)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_case_insensitive() {
        let mut o = NodeOptions::new();
        o.set("Position", "1, 2, 3");
        o.set_text("Name", "\"Ball\"");
        assert_eq!(o.float3("position", Vec3::ZERO, 0.0).unwrap(), Vec3::new(1.0, 2.0, 3.0));
        assert_eq!(o.text("NAME"), Some("Ball"));
    }

    #[test]
    fn test_defaults_and_broadcast() {
        let mut o = NodeOptions::new();
        assert_eq!(o.float1("Steps", 70.0, 0.0).unwrap(), 70.0);
        o.set("Scale", 2.0);
        assert_eq!(o.float3("Scale", Vec3::ONE, 0.0).unwrap(), Vec3::splat(2.0));
    }

    #[test]
    fn test_malformed() {
        let mut o = NodeOptions::new();
        o.set("Radius", "1, 2");
        assert!(matches!(o.float1("radius", 1.0, 0.0), Err(CompileErrorKind::MalformedOption { .. })));
        o.set("Radius", "1 +");
        assert!(o.float1("radius", 1.0, 0.0).is_err());
        o.set_text("Radius", "big");
        assert!(o.float1("radius", 1.0, 0.0).is_err());
    }

    #[test]
    fn test_animated() {
        let mut o = NodeOptions::new();
        o.set(
            "Position",
            OptionValue::Animated(vec![
                Keyframe { time: 1.0, value: "2, 0, 0".into() },
                Keyframe { time: 0.0, value: "0, 0, 0".into() },
            ]),
        );
        assert!(o.is_animated());
        assert_eq!(o.float3("position", Vec3::ZERO, 0.5).unwrap(), Vec3::new(1.0, 0.0, 0.0));
        assert_eq!(o.float3("position", Vec3::ZERO, -3.0).unwrap(), Vec3::ZERO);
        assert_eq!(o.float3("position", Vec3::ZERO, 9.0).unwrap(), Vec3::new(2.0, 0.0, 0.0));
    }
}
