//! Expression/option evaluator.
//!
//! Option values and material statements are small typed expressions:
//!
//! ```text
//! 0.8, 0.8, 0.8                    comma list -> Float3
//! #ff8040                          hex color  -> Float3 (components / 255)
//! mix(albedo, vec3(1.0), 0.25)     calls, constructors
//! sin(rayPosition.y * 4.0) * 0.5   swizzles, arithmetic, scalar broadcast
//! ```
//!
//! Every expression has a static type (`Float1..Float4`). The same tree is
//! evaluated on the CPU with [`Expr::eval`] and lowered to shader IR with
//! [`Expr::lower`].

use glam::{Vec2, Vec3, Vec4};
use smallvec::SmallVec;
use std::collections::BTreeMap;
use std::fmt;

use crate::shader::ir;
use crate::util::CompileErrorKind;

/// Static type of an expression.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ValueType {
    Float1,
    Float2,
    Float3,
    Float4,
}

impl ValueType {
    pub fn components(self) -> usize {
        match self {
            ValueType::Float1 => 1,
            ValueType::Float2 => 2,
            ValueType::Float3 => 3,
            ValueType::Float4 => 4,
        }
    }

    pub fn from_components(n: usize) -> Option<Self> {
        match n {
            1 => Some(ValueType::Float1),
            2 => Some(ValueType::Float2),
            3 => Some(ValueType::Float3),
            4 => Some(ValueType::Float4),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ValueType::Float1 => "Float1",
            ValueType::Float2 => "Float2",
            ValueType::Float3 => "Float3",
            ValueType::Float4 => "Float4",
        }
    }

    pub fn shader_ty(self) -> ir::Ty {
        ir::Ty::float_n(self.components())
    }

    /// Result type of a componentwise operation with scalar broadcast.
    pub fn broadcast(self, other: Self) -> Option<Self> {
        if self == other || other == ValueType::Float1 {
            Some(self)
        } else if self == ValueType::Float1 {
            Some(other)
        } else {
            None
        }
    }

    /// Whether a value of type `self` may be stored where `target` is expected.
    pub fn assignable_to(self, target: Self) -> bool {
        self == target || self == ValueType::Float1
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Typed constant. Unused trailing components are zero.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Value {
    ty: ValueType,
    v: [f32; 4],
}

impl Value {
    pub fn float1(x: f32) -> Self {
        Self { ty: ValueType::Float1, v: [x, 0.0, 0.0, 0.0] }
    }

    pub fn float2(v: Vec2) -> Self {
        Self { ty: ValueType::Float2, v: [v.x, v.y, 0.0, 0.0] }
    }

    pub fn float3(v: Vec3) -> Self {
        Self { ty: ValueType::Float3, v: [v.x, v.y, v.z, 0.0] }
    }

    pub fn float4(v: Vec4) -> Self {
        Self { ty: ValueType::Float4, v: v.to_array() }
    }

    pub fn splat(ty: ValueType, x: f32) -> Self {
        let mut v = [0.0; 4];
        v[..ty.components()].fill(x);
        Self { ty, v }
    }

    pub fn from_slice(c: &[f32]) -> Option<Self> {
        let ty = ValueType::from_components(c.len())?;
        let mut v = [0.0; 4];
        v[..c.len()].copy_from_slice(c);
        Some(Self { ty, v })
    }

    pub fn ty(&self) -> ValueType {
        self.ty
    }

    pub fn components(&self) -> &[f32] {
        &self.v[..self.ty.components()]
    }

    pub fn x(&self) -> f32 {
        self.v[0]
    }

    /// Scalars broadcast, wider values truncate.
    pub fn as_vec3(&self) -> Vec3 {
        match self.ty {
            ValueType::Float1 => Vec3::splat(self.v[0]),
            _ => Vec3::new(self.v[0], self.v[1], self.v[2]),
        }
    }

    pub fn as_vec2(&self) -> Vec2 {
        match self.ty {
            ValueType::Float1 => Vec2::splat(self.v[0]),
            _ => Vec2::new(self.v[0], self.v[1]),
        }
    }

    /// Zero padded.
    pub fn to_vec4(&self) -> Vec4 {
        Vec4::from_array(self.v)
    }

    fn get(&self, i: usize) -> f32 {
        if self.ty == ValueType::Float1 { self.v[0] } else { self.v[i] }
    }

    fn map(self, f: impl Fn(f32) -> f32) -> Self {
        let mut out = self;
        for c in out.v.iter_mut().take(self.ty.components()) {
            *c = f(*c);
        }
        out
    }

    fn zip3(ty: ValueType, a: &Value, b: &Value, c: &Value, f: impl Fn(f32, f32, f32) -> f32) -> Self {
        let mut out = Value::splat(ty, 0.0);
        for i in 0..ty.components() {
            out.v[i] = f(a.get(i), b.get(i), c.get(i));
        }
        out
    }

    fn zip(ty: ValueType, a: &Value, b: &Value, f: impl Fn(f32, f32) -> f32) -> Self {
        Self::zip3(ty, a, b, b, |x, y, _| f(x, y))
    }

    pub fn to_ir(&self) -> ir::Expr {
        ir::Expr::vec(self.components())
    }

    /// Linear interpolation between equally typed values.
    pub fn lerp(&self, other: &Value, t: f32) -> Value {
        Value::zip(self.ty, self, other, |a, b| a + (b - a) * t)
    }
}

impl From<f32> for Value {
    fn from(x: f32) -> Self {
        Value::float1(x)
    }
}

impl From<Vec3> for Value {
    fn from(v: Vec3) -> Self {
        Value::float3(v)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
}

impl BinOp {
    fn apply(self, a: f32, b: f32) -> f32 {
        match self {
            BinOp::Add => a + b,
            BinOp::Sub => a - b,
            BinOp::Mul => a * b,
            BinOp::Div => a / b,
        }
    }

    fn to_ir(self) -> ir::BinOp {
        match self {
            BinOp::Add => ir::BinOp::Add,
            BinOp::Sub => ir::BinOp::Sub,
            BinOp::Mul => ir::BinOp::Mul,
            BinOp::Div => ir::BinOp::Div,
        }
    }
}

/// Parsed expression tree.
#[derive(Clone, Debug, PartialEq)]
pub enum Expr {
    Const(Value),
    Var(String),
    Neg(Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
    Call(String, Vec<Expr>),
    Swizzle(Box<Expr>, SmallVec<[u8; 4]>),
}

/// Variable types visible to an expression.
pub trait TypeScope {
    fn var_type(&self, name: &str) -> Option<ValueType>;
}

/// Variable values visible to an expression.
pub trait ValueScope {
    fn var_value(&self, name: &str) -> Option<Value>;
}

impl TypeScope for BTreeMap<String, ValueType> {
    fn var_type(&self, name: &str) -> Option<ValueType> {
        self.get(name).copied()
    }
}

impl ValueScope for BTreeMap<String, Value> {
    fn var_value(&self, name: &str) -> Option<Value> {
        self.get(name).copied()
    }
}

impl<T: ValueScope> TypeScope for T {
    fn var_type(&self, name: &str) -> Option<ValueType> {
        self.var_value(name).map(|v| v.ty())
    }
}

/// Maps variable names to shader expressions during lowering.
pub trait LowerScope: TypeScope {
    fn var_expr(&self, name: &str) -> ir::Expr;
}

#[derive(Clone, Copy)]
enum Builtin {
    Map1(fn(f32) -> f32),
    Map2(fn(f32, f32) -> f32),
    Clamp,
    Mix,
    Smoothstep,
    Length,
    Normalize,
    Dot,
    Cross,
    Construct(ValueType),
}

fn fract(x: f32) -> f32 {
    x - x.floor()
}

fn saturate(x: f32) -> f32 {
    x.clamp(0.0, 1.0)
}

fn step(edge: f32, x: f32) -> f32 {
    if x < edge { 0.0 } else { 1.0 }
}

fn smoothstep(e0: f32, e1: f32, x: f32) -> f32 {
    let t = ((x - e0) / (e1 - e0)).clamp(0.0, 1.0);
    t * t * (3.0 - 2.0 * t)
}

fn builtin(name: &str) -> Option<Builtin> {
    use Builtin::*;
    Some(match name {
        "sin" => Map1(f32::sin),
        "cos" => Map1(f32::cos),
        "tan" => Map1(f32::tan),
        "abs" => Map1(f32::abs),
        "floor" => Map1(f32::floor),
        "fract" => Map1(fract),
        "sqrt" => Map1(f32::sqrt),
        "exp" => Map1(f32::exp),
        "log" => Map1(f32::ln),
        "saturate" => Map1(saturate),
        "pow" => Map2(f32::powf),
        "min" => Map2(f32::min),
        "max" => Map2(f32::max),
        "step" => Map2(step),
        "clamp" => Clamp,
        "mix" => Mix,
        "smoothstep" => Smoothstep,
        "length" => Length,
        "normalize" => Normalize,
        "dot" => Dot,
        "cross" => Cross,
        "vec2" | "float2" => Construct(ValueType::Float2),
        "vec3" | "float3" => Construct(ValueType::Float3),
        "vec4" | "float4" => Construct(ValueType::Float4),
        _ => return None,
    })
}

fn mismatch(expected: impl Into<String>, actual: impl Into<String>) -> CompileErrorKind {
    CompileErrorKind::TypeMismatch { expected: expected.into(), actual: actual.into() }
}

fn arity(name: &str, args: usize, want: usize) -> Result<(), CompileErrorKind> {
    if args == want {
        Ok(())
    } else {
        Err(mismatch(format!("{want} arguments to {name}"), format!("{args}")))
    }
}

fn broadcast_all(types: &[ValueType]) -> Result<ValueType, CompileErrorKind> {
    let mut ty = types[0];
    for &t in &types[1..] {
        ty = ty.broadcast(t).ok_or_else(|| mismatch(ty.name(), t.name()))?;
    }
    Ok(ty)
}

/// Maps `xyzw` / `rgba` to component indices.
fn swizzle_indices(s: &str) -> Option<SmallVec<[u8; 4]>> {
    if s.is_empty() || s.len() > 4 {
        return None;
    }
    s.chars()
        .map(|c| match c {
            'x' | 'r' => Some(0),
            'y' | 'g' => Some(1),
            'z' | 'b' => Some(2),
            'w' | 'a' => Some(3),
            _ => None,
        })
        .collect()
}

impl Expr {
    /// Parse an expression from option or statement source text.
    pub fn parse(src: &str) -> Result<Expr, String> {
        let tokens = tokenize(src)?;
        let mut p = Parser { tokens, pos: 0 };
        let expr = p.list()?;
        if p.pos != p.tokens.len() {
            return Err(format!("unexpected '{}'", p.tokens[p.pos]));
        }
        Ok(expr)
    }

    /// Static type of the expression in `scope`.
    pub fn infer(&self, scope: &dyn TypeScope) -> Result<ValueType, CompileErrorKind> {
        match self {
            Expr::Const(v) => Ok(v.ty()),
            Expr::Var(name) => scope.var_type(name).ok_or_else(|| CompileErrorKind::UnknownVariable(name.clone())),
            Expr::Neg(e) => e.infer(scope),
            Expr::Binary(_, a, b) => {
                let (ta, tb) = (a.infer(scope)?, b.infer(scope)?);
                ta.broadcast(tb).ok_or_else(|| mismatch(ta.name(), tb.name()))
            }
            Expr::Swizzle(e, idx) => {
                let base = e.infer(scope)?;
                if idx.iter().any(|&i| i as usize >= base.components()) {
                    return Err(mismatch("swizzle within ".to_string() + base.name(), format!("{} components", idx.len())));
                }
                ValueType::from_components(idx.len()).ok_or_else(|| mismatch("1..4 components", idx.len().to_string()))
            }
            Expr::Call(name, args) => {
                let f = builtin(name).ok_or_else(|| CompileErrorKind::UnknownFunction(name.clone()))?;
                let types = args.iter().map(|a| a.infer(scope)).collect::<Result<SmallVec<[ValueType; 4]>, _>>()?;
                Self::call_type(name, f, &types)
            }
        }
    }

    fn call_type(name: &str, f: Builtin, types: &[ValueType]) -> Result<ValueType, CompileErrorKind> {
        match f {
            Builtin::Map1(_) | Builtin::Normalize => {
                arity(name, types.len(), 1)?;
                Ok(types[0])
            }
            Builtin::Map2(_) => {
                arity(name, types.len(), 2)?;
                broadcast_all(types)
            }
            Builtin::Clamp | Builtin::Smoothstep => {
                arity(name, types.len(), 3)?;
                broadcast_all(types)
            }
            Builtin::Mix => {
                arity(name, types.len(), 3)?;
                let ty = broadcast_all(&types[..2])?;
                if !types[2].assignable_to(ty) {
                    return Err(mismatch(ty.name(), types[2].name()));
                }
                Ok(ty)
            }
            Builtin::Length => {
                arity(name, types.len(), 1)?;
                Ok(ValueType::Float1)
            }
            Builtin::Dot => {
                arity(name, types.len(), 2)?;
                if types[0] != types[1] {
                    return Err(mismatch(types[0].name(), types[1].name()));
                }
                Ok(ValueType::Float1)
            }
            Builtin::Cross => {
                arity(name, types.len(), 2)?;
                for t in types {
                    if *t != ValueType::Float3 {
                        return Err(mismatch("Float3", t.name()));
                    }
                }
                Ok(ValueType::Float3)
            }
            Builtin::Construct(ty) => {
                let total: usize = types.iter().map(|t| t.components()).sum();
                let splat = types.len() == 1 && types[0] == ValueType::Float1;
                if total == ty.components() || splat {
                    Ok(ty)
                } else {
                    Err(mismatch(format!("{} components for {name}", ty.components()), total.to_string()))
                }
            }
        }
    }

    /// Evaluate on the CPU.
    pub fn eval(&self, scope: &dyn ValueScope) -> Result<Value, CompileErrorKind> {
        match self {
            Expr::Const(v) => Ok(*v),
            Expr::Var(name) => scope.var_value(name).ok_or_else(|| CompileErrorKind::UnknownVariable(name.clone())),
            Expr::Neg(e) => Ok(e.eval(scope)?.map(|x| -x)),
            Expr::Binary(op, a, b) => {
                let (va, vb) = (a.eval(scope)?, b.eval(scope)?);
                let ty = va.ty().broadcast(vb.ty()).ok_or_else(|| mismatch(va.ty().name(), vb.ty().name()))?;
                Ok(Value::zip(ty, &va, &vb, |x, y| op.apply(x, y)))
            }
            Expr::Swizzle(e, idx) => {
                let base = e.eval(scope)?;
                let comps: SmallVec<[f32; 4]> = idx.iter().map(|&i| base.v[i as usize]).collect();
                Value::from_slice(&comps).ok_or_else(|| mismatch("1..4 components", comps.len().to_string()))
            }
            Expr::Call(name, args) => {
                let f = builtin(name).ok_or_else(|| CompileErrorKind::UnknownFunction(name.clone()))?;
                let vals = args.iter().map(|a| a.eval(scope)).collect::<Result<SmallVec<[Value; 4]>, _>>()?;
                let types: SmallVec<[ValueType; 4]> = vals.iter().map(|v| v.ty()).collect();
                let ty = Self::call_type(name, f, &types)?;
                Ok(match f {
                    Builtin::Map1(g) => vals[0].map(g),
                    Builtin::Map2(g) => Value::zip(ty, &vals[0], &vals[1], g),
                    Builtin::Clamp => Value::zip3(ty, &vals[0], &vals[1], &vals[2], |x, lo, hi| x.max(lo).min(hi)),
                    Builtin::Smoothstep => Value::zip3(ty, &vals[0], &vals[1], &vals[2], smoothstep),
                    Builtin::Mix => Value::zip3(ty, &vals[0], &vals[1], &vals[2], |a, b, t| a + (b - a) * t),
                    Builtin::Length => Value::float1(vals[0].components().iter().map(|c| c * c).sum::<f32>().sqrt()),
                    Builtin::Normalize => {
                        let len = vals[0].components().iter().map(|c| c * c).sum::<f32>().sqrt();
                        vals[0].map(|c| c / len)
                    }
                    Builtin::Dot => Value::float1(
                        vals[0].components().iter().zip(vals[1].components()).map(|(a, b)| a * b).sum(),
                    ),
                    Builtin::Cross => Value::float3(vals[0].as_vec3().cross(vals[1].as_vec3())),
                    Builtin::Construct(ty) => {
                        if vals.len() == 1 && vals[0].ty() == ValueType::Float1 {
                            Value::splat(ty, vals[0].x())
                        } else {
                            let comps: SmallVec<[f32; 4]> = vals.iter().flat_map(|v| v.components().iter().copied()).collect();
                            Value::from_slice(&comps).ok_or_else(|| mismatch(ty.name(), comps.len().to_string()))?
                        }
                    }
                })
            }
        }
    }

    /// Evaluate a constant expression (no variables).
    pub fn eval_const(&self) -> Result<Value, CompileErrorKind> {
        self.eval(&BTreeMap::<String, Value>::new())
    }

    /// Lower to shader IR. Returns the expression and its static type.
    pub fn lower(&self, scope: &dyn LowerScope) -> Result<(ir::Expr, ValueType), CompileErrorKind> {
        Ok(match self {
            Expr::Const(v) => (v.to_ir(), v.ty()),
            Expr::Var(name) => {
                let ty = scope.var_type(name).ok_or_else(|| CompileErrorKind::UnknownVariable(name.clone()))?;
                (scope.var_expr(name), ty)
            }
            Expr::Neg(e) => {
                let (x, ty) = e.lower(scope)?;
                (ir::Expr::Neg(Box::new(x)), ty)
            }
            Expr::Binary(op, a, b) => {
                let ((xa, ta), (xb, tb)) = (a.lower(scope)?, b.lower(scope)?);
                let ty = ta.broadcast(tb).ok_or_else(|| mismatch(ta.name(), tb.name()))?;
                (ir::Expr::binary(op.to_ir(), xa, xb), ty)
            }
            Expr::Swizzle(e, idx) => {
                let ty = self.infer(scope)?;
                let (x, _) = e.lower(scope)?;
                let letters: String = idx.iter().map(|&i| ['x', 'y', 'z', 'w'][i as usize]).collect();
                (x.field(letters), ty)
            }
            Expr::Call(name, args) => {
                let f = builtin(name).ok_or_else(|| CompileErrorKind::UnknownFunction(name.clone()))?;
                let lowered = args.iter().map(|a| a.lower(scope)).collect::<Result<Vec<_>, _>>()?;
                let types: SmallVec<[ValueType; 4]> = lowered.iter().map(|(_, t)| *t).collect();
                let ty = Self::call_type(name, f, &types)?;
                let splat_to = |(x, t): (ir::Expr, ValueType), want: ValueType| {
                    if t == want || want == ValueType::Float1 {
                        x
                    } else {
                        ir::Expr::Construct(want.shader_ty(), vec![x])
                    }
                };
                let call = match f {
                    Builtin::Construct(ty) => {
                        ir::Expr::Construct(ty.shader_ty(), lowered.into_iter().map(|(x, _)| x).collect())
                    }
                    Builtin::Mix => {
                        let mut it = lowered.into_iter();
                        let (a, b, t) = match (it.next(), it.next(), it.next()) {
                            (Some(a), Some(b), Some(t)) => (a, b, t),
                            _ => return Err(mismatch("3 arguments to mix", "fewer")),
                        };
                        // scalar factor is valid WGSL for vector mix
                        ir::Expr::call("mix", vec![splat_to(a, ty), splat_to(b, ty), t.0])
                    }
                    Builtin::Map2(_) | Builtin::Clamp | Builtin::Smoothstep => {
                        ir::Expr::call(name.as_str(), lowered.into_iter().map(|a| splat_to(a, ty)).collect())
                    }
                    _ => ir::Expr::call(name.as_str(), lowered.into_iter().map(|(x, _)| x).collect()),
                };
                (call, ty)
            }
        })
    }

    /// Whether the expression references `name`.
    pub fn references(&self, name: &str) -> bool {
        match self {
            Expr::Const(_) => false,
            Expr::Var(v) => v == name,
            Expr::Neg(e) | Expr::Swizzle(e, _) => e.references(name),
            Expr::Binary(_, a, b) => a.references(name) || b.references(name),
            Expr::Call(_, args) => args.iter().any(|a| a.references(name)),
        }
    }
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq)]
enum Token {
    Num(f32),
    Ident(String),
    Hex(Value),
    Op(char),
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Num(n) => write!(f, "{n}"),
            Token::Ident(s) => f.write_str(s),
            Token::Hex(_) => f.write_str("#color"),
            Token::Op(c) => write!(f, "{c}"),
        }
    }
}

fn parse_hex(digits: &str) -> Result<Value, String> {
    if digits.len() != 6 && digits.len() != 8 {
        return Err(format!("hex color '#{digits}' needs 6 or 8 digits"));
    }
    let comps = (0..digits.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&digits[i..i + 2], 16).map(|b| b as f32 / 255.0))
        .collect::<Result<SmallVec<[f32; 4]>, _>>()
        .map_err(|_| format!("invalid hex color '#{digits}'"))?;
    Value::from_slice(&comps).ok_or_else(|| "invalid hex color".to_string())
}

/// `e5`, `E-3` or `e+2` starting at `i`.
fn exponent_at(chars: &[char], i: usize) -> bool {
    if !matches!(chars.get(i), Some('e' | 'E')) {
        return false;
    }
    let j = if matches!(chars.get(i + 1), Some('-' | '+')) { i + 2 } else { i + 1 };
    chars.get(j).is_some_and(|d| d.is_ascii_digit())
}

fn tokenize(src: &str) -> Result<Vec<Token>, String> {
    let chars: Vec<char> = src.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
        } else if c.is_ascii_digit() || (c == '.' && chars.get(i + 1).is_some_and(|d| d.is_ascii_digit())) {
            let start = i;
            while i < chars.len() && chars[i].is_ascii_digit() {
                i += 1;
            }
            if i < chars.len() && chars[i] == '.' && (exponent_at(&chars, i + 1) || !chars.get(i + 1).is_some_and(|d| d.is_alphabetic())) {
                i += 1;
                while i < chars.len() && chars[i].is_ascii_digit() {
                    i += 1;
                }
            }
            if i < chars.len() && (chars[i] == 'e' || chars[i] == 'E') {
                let mut j = i + 1;
                if j < chars.len() && (chars[j] == '-' || chars[j] == '+') {
                    j += 1;
                }
                if j < chars.len() && chars[j].is_ascii_digit() {
                    i = j;
                    while i < chars.len() && chars[i].is_ascii_digit() {
                        i += 1;
                    }
                }
            }
            let text: String = chars[start..i].iter().collect();
            let n = text.parse::<f32>().map_err(|_| format!("invalid number '{text}'"))?;
            tokens.push(Token::Num(n));
        } else if c == '#' {
            let start = i + 1;
            i = start;
            while i < chars.len() && chars[i].is_ascii_alphanumeric() {
                i += 1;
            }
            let digits: String = chars[start..i].iter().collect();
            tokens.push(Token::Hex(parse_hex(&digits)?));
        } else if c.is_alphabetic() || c == '_' {
            let start = i;
            while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                i += 1;
            }
            tokens.push(Token::Ident(chars[start..i].iter().collect()));
        } else if "+-*/(),.".contains(c) {
            tokens.push(Token::Op(c));
            i += 1;
        } else {
            return Err(format!("unexpected character '{c}'"));
        }
    }
    if tokens.is_empty() {
        return Err("empty expression".into());
    }
    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek_op(&self, c: char) -> bool {
        self.tokens.get(self.pos) == Some(&Token::Op(c))
    }

    fn expect_op(&mut self, c: char) -> Result<(), String> {
        if self.peek_op(c) {
            self.pos += 1;
            Ok(())
        } else {
            Err(format!("expected '{c}'"))
        }
    }

    /// Top level: comma separated components form a vector.
    fn list(&mut self) -> Result<Expr, String> {
        let first = self.sum()?;
        if !self.peek_op(',') {
            return Ok(first);
        }
        let mut items = Vec::with_capacity(4);
        items.push(first);
        while self.peek_op(',') {
            self.pos += 1;
            items.push(self.sum()?);
        }
        // constant lists fold to a literal
        let consts: Option<SmallVec<[f32; 4]>> = items
            .iter()
            .map(|e| match e {
                Expr::Const(v) if v.ty() == ValueType::Float1 => Some(v.x()),
                _ => None,
            })
            .collect();
        if let Some(c) = consts.as_deref().and_then(Value::from_slice) {
            return Ok(Expr::Const(c));
        }
        let name = match items.len() {
            2 => "vec2",
            3 => "vec3",
            4 => "vec4",
            n => return Err(format!("list of {n} components")),
        };
        Ok(Expr::Call(name.into(), items))
    }

    fn sum(&mut self) -> Result<Expr, String> {
        let mut lhs = self.product()?;
        loop {
            let op = if self.peek_op('+') {
                BinOp::Add
            } else if self.peek_op('-') {
                BinOp::Sub
            } else {
                return Ok(lhs);
            };
            self.pos += 1;
            let rhs = self.product()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
    }

    fn product(&mut self) -> Result<Expr, String> {
        let mut lhs = self.unary()?;
        loop {
            let op = if self.peek_op('*') {
                BinOp::Mul
            } else if self.peek_op('/') {
                BinOp::Div
            } else {
                return Ok(lhs);
            };
            self.pos += 1;
            let rhs = self.unary()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
    }

    fn unary(&mut self) -> Result<Expr, String> {
        if self.peek_op('-') {
            self.pos += 1;
            return Ok(match self.unary()? {
                Expr::Const(v) => Expr::Const(v.map(|x| -x)),
                e => Expr::Neg(Box::new(e)),
            });
        }
        self.postfix()
    }

    fn postfix(&mut self) -> Result<Expr, String> {
        let mut e = self.primary()?;
        while self.peek_op('.') {
            self.pos += 1;
            let Some(Token::Ident(s)) = self.tokens.get(self.pos).cloned() else {
                return Err("expected swizzle after '.'".into());
            };
            self.pos += 1;
            let idx = swizzle_indices(&s).ok_or_else(|| format!("invalid swizzle '{s}'"))?;
            e = Expr::Swizzle(Box::new(e), idx);
        }
        Ok(e)
    }

    fn primary(&mut self) -> Result<Expr, String> {
        let tok = self.tokens.get(self.pos).cloned().ok_or("unexpected end of expression")?;
        self.pos += 1;
        match tok {
            Token::Num(n) => Ok(Expr::Const(Value::float1(n))),
            Token::Hex(v) => Ok(Expr::Const(v)),
            Token::Ident(name) => {
                if !self.peek_op('(') {
                    return Ok(Expr::Var(name));
                }
                self.pos += 1;
                let mut args = Vec::new();
                if !self.peek_op(')') {
                    args.push(self.sum()?);
                    while self.peek_op(',') {
                        self.pos += 1;
                        args.push(self.sum()?);
                    }
                }
                self.expect_op(')')?;
                Ok(Expr::Call(name, args))
            }
            Token::Op('(') => {
                let e = self.sum()?;
                self.expect_op(')')?;
                Ok(e)
            }
            Token::Op(c) => Err(format!("unexpected '{c}'")),
        }
    }
}
