//! Shader intermediate representation.
//!
//! Generated code is built as typed function records and rendered to text by
//! a single backend ([`super::wgsl`]). Nothing in here knows WGSL syntax.

/// Shader value types used by generated code.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Ty {
    F32,
    Vec2,
    Vec3,
    Vec4,
    I32,
    U32,
    Bool,
    /// User or template struct
    Named(String),
}

impl Ty {
    /// Float vector type with `n` components (1 maps to scalar).
    pub fn float_n(n: usize) -> Self {
        match n {
            1 => Ty::F32,
            2 => Ty::Vec2,
            3 => Ty::Vec3,
            _ => Ty::Vec4,
        }
    }

    pub fn named(name: impl Into<String>) -> Self {
        Ty::Named(name.into())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Expr {
    Float(f32),
    Int(i32),
    Uint(u32),
    Ident(String),
    Field(Box<Expr>, String),
    Neg(Box<Expr>),
    Not(Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
    Call(String, Vec<Expr>),
    Construct(Ty, Vec<Expr>),
    Index(Box<Expr>, Box<Expr>),
}

impl Expr {
    pub fn ident(name: impl Into<String>) -> Self {
        Expr::Ident(name.into())
    }

    pub fn call(name: impl Into<String>, args: Vec<Expr>) -> Self {
        Expr::Call(name.into(), args)
    }

    pub fn field(self, name: impl Into<String>) -> Self {
        Expr::Field(Box::new(self), name.into())
    }

    pub fn index(self, idx: Expr) -> Self {
        Expr::Index(Box::new(self), Box::new(idx))
    }

    pub fn binary(op: BinOp, lhs: Expr, rhs: Expr) -> Self {
        Expr::Binary(op, Box::new(lhs), Box::new(rhs))
    }

    pub fn eq(self, rhs: Expr) -> Self {
        Expr::binary(BinOp::Eq, self, rhs)
    }

    pub fn vec(components: &[f32]) -> Self {
        if components.len() == 1 {
            return Expr::Float(components[0]);
        }
        Expr::Construct(Ty::float_n(components.len()), components.iter().map(|&c| Expr::Float(c)).collect())
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Stmt {
    /// Immutable binding
    Let { name: String, value: Expr },
    /// Mutable binding with explicit type
    Var { name: String, ty: Ty, value: Option<Expr> },
    Assign { target: Expr, value: Expr },
    If { cond: Expr, then: Vec<Stmt>, otherwise: Vec<Stmt> },
    Return(Option<Expr>),
    Comment(String),
}

impl Stmt {
    pub fn assign(target: Expr, value: Expr) -> Self {
        Stmt::Assign { target, value }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Param {
    pub name: String,
    pub ty: Ty,
}

impl Param {
    pub fn new(name: impl Into<String>, ty: Ty) -> Self {
        Self { name: name.into(), ty }
    }
}

/// One generated function.
#[derive(Clone, Debug, PartialEq)]
pub struct ShaderFunction {
    pub name: String,
    pub params: Vec<Param>,
    pub ret: Option<Ty>,
    pub body: Vec<Stmt>,
}

impl ShaderFunction {
    pub fn new(name: impl Into<String>, params: Vec<Param>, ret: Option<Ty>) -> Self {
        Self { name: name.into(), params, ret, body: Vec::new() }
    }
}

/// Build an `if / else if` chain from `(condition, body)` arms.
pub fn if_chain(arms: Vec<(Expr, Vec<Stmt>)>) -> Vec<Stmt> {
    let mut tail: Vec<Stmt> = Vec::new();
    for (cond, then) in arms.into_iter().rev() {
        tail = vec![Stmt::If { cond, then, otherwise: tail }];
    }
    tail
}
