//! WGSL text backend for the shader IR.

use std::fmt::Write as _;

use super::ir::{BinOp, Expr, ShaderFunction, Stmt, Ty};

const INDENT: &str = "    ";

pub fn ty(t: &Ty) -> String {
    match t {
        Ty::F32 => "f32".into(),
        Ty::Vec2 => "vec2<f32>".into(),
        Ty::Vec3 => "vec3<f32>".into(),
        Ty::Vec4 => "vec4<f32>".into(),
        Ty::I32 => "i32".into(),
        Ty::U32 => "u32".into(),
        Ty::Bool => "bool".into(),
        Ty::Named(name) => name.clone(),
    }
}

fn op(o: BinOp) -> &'static str {
    match o {
        BinOp::Add => "+",
        BinOp::Sub => "-",
        BinOp::Mul => "*",
        BinOp::Div => "/",
        BinOp::Eq => "==",
        BinOp::Ne => "!=",
        BinOp::Lt => "<",
        BinOp::Le => "<=",
        BinOp::Gt => ">",
        BinOp::Ge => ">=",
        BinOp::And => "&&",
        BinOp::Or => "||",
    }
}

/// Float literal that always reads back as an abstract float.
fn float(x: f32) -> String {
    if !x.is_finite() {
        return "0.0".into();
    }
    let s = format!("{x:?}");
    if x < 0.0 { format!("({s})") } else { s }
}

pub fn expr(e: &Expr) -> String {
    match e {
        Expr::Float(x) => float(*x),
        Expr::Int(i) if *i < 0 => format!("({i}i)"),
        Expr::Int(i) => format!("{i}i"),
        Expr::Uint(u) => format!("{u}u"),
        Expr::Ident(name) => name.clone(),
        Expr::Field(base, name) => format!("{}.{name}", expr(base)),
        Expr::Index(base, idx) => format!("{}[{}]", expr(base), expr(idx)),
        Expr::Neg(x) => format!("-({})", expr(x)),
        Expr::Not(x) => format!("!({})", expr(x)),
        Expr::Binary(o, a, b) => format!("({} {} {})", expr(a), op(*o), expr(b)),
        Expr::Call(name, args) => format!("{name}({})", list(args)),
        Expr::Construct(t, args) => format!("{}({})", ty(t), list(args)),
    }
}

fn list(args: &[Expr]) -> String {
    args.iter().map(expr).collect::<Vec<_>>().join(", ")
}

fn stmts(out: &mut String, body: &[Stmt], depth: usize) {
    for s in body {
        stmt(out, s, depth);
    }
}

fn stmt(out: &mut String, s: &Stmt, depth: usize) {
    let pad = INDENT.repeat(depth);
    match s {
        Stmt::Let { name, value } => {
            let _ = writeln!(out, "{pad}let {name} = {};", expr(value));
        }
        Stmt::Var { name, ty: t, value: Some(v) } => {
            let _ = writeln!(out, "{pad}var {name}: {} = {};", ty(t), expr(v));
        }
        Stmt::Var { name, ty: t, value: None } => {
            let _ = writeln!(out, "{pad}var {name}: {};", ty(t));
        }
        Stmt::Assign { target, value } => {
            let _ = writeln!(out, "{pad}{} = {};", expr(target), expr(value));
        }
        Stmt::Return(Some(v)) => {
            let _ = writeln!(out, "{pad}return {};", expr(v));
        }
        Stmt::Return(None) => {
            let _ = writeln!(out, "{pad}return;");
        }
        Stmt::Comment(text) => {
            let _ = writeln!(out, "{pad}// {text}");
        }
        Stmt::If { cond, then, otherwise } => {
            let _ = writeln!(out, "{pad}if ({}) {{", expr(cond));
            stmts(out, then, depth + 1);
            let mut rest = otherwise;
            loop {
                match rest.as_slice() {
                    [] => break,
                    [Stmt::If { cond, then, otherwise }] => {
                        let _ = writeln!(out, "{pad}}} else if ({}) {{", expr(cond));
                        stmts(out, then, depth + 1);
                        rest = otherwise;
                    }
                    other => {
                        let _ = writeln!(out, "{pad}}} else {{");
                        stmts(out, other, depth + 1);
                        break;
                    }
                }
            }
            let _ = writeln!(out, "{pad}}}");
        }
    }
}

/// Render one function.
pub fn function(f: &ShaderFunction) -> String {
    let params = f.params.iter().map(|p| format!("{}: {}", p.name, ty(&p.ty))).collect::<Vec<_>>().join(", ");
    let mut out = match &f.ret {
        Some(r) => format!("fn {}({params}) -> {} {{\n", f.name, ty(r)),
        None => format!("fn {}({params}) {{\n", f.name),
    };
    stmts(&mut out, &f.body, 1);
    out.push_str("}\n");
    out
}

/// Render a list of functions separated by blank lines.
pub fn module(functions: &[ShaderFunction]) -> String {
    functions.iter().map(function).collect::<Vec<_>>().join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shader::ir::{if_chain, Param};

    #[test]
    fn test_literals() {
        assert_eq!(expr(&Expr::Float(1.0)), "1.0");
        assert_eq!(expr(&Expr::Float(-0.5)), "(-0.5)");
        assert_eq!(expr(&Expr::Float(f32::NAN)), "0.0");
        assert_eq!(expr(&Expr::Int(-1)), "(-1i)");
        assert_eq!(expr(&Expr::Uint(3)), "3u");
        assert_eq!(expr(&Expr::vec(&[1.0, 0.0, 0.25])), "vec3<f32>(1.0, 0.0, 0.25)");
    }

    #[test]
    fn test_nested_expression() {
        let e = Expr::binary(BinOp::Mul, Expr::ident("inp").field("uv").field("x"), Expr::call("sin", vec![Expr::Float(2.0)]));
        assert_eq!(expr(&e), "(inp.uv.x * sin(2.0))");
    }

    #[test]
    fn test_function_with_cascade() {
        let mut f = ShaderFunction::new("pick", vec![Param::new("id", Ty::I32)], Some(Ty::F32));
        f.body = if_chain(vec![
            (Expr::ident("id").eq(Expr::Int(0)), vec![Stmt::Return(Some(Expr::Float(1.0)))]),
            (Expr::ident("id").eq(Expr::Int(1)), vec![Stmt::Return(Some(Expr::Float(2.0)))]),
        ]);
        f.body.push(Stmt::Return(Some(Expr::Float(0.0))));
        let text = function(&f);
        let expected = "fn pick(id: i32) -> f32 {\n    if ((id == 0i)) {\n        return 1.0;\n    } else if ((id == 1i)) {\n        return 2.0;\n    }\n    return 0.0;\n}\n";
        assert_eq!(text, expected);
    }

    #[test]
    fn test_var_and_else() {
        let body = vec![
            Stmt::Var { name: "c".into(), ty: Ty::Vec3, value: None },
            Stmt::If {
                cond: Expr::ident("flag"),
                then: vec![Stmt::assign(Expr::ident("c"), Expr::vec(&[1.0, 1.0, 1.0]))],
                otherwise: vec![Stmt::Comment("none".into())],
            },
        ];
        let mut out = String::new();
        stmts(&mut out, &body, 0);
        assert!(out.starts_with("var c: vec3<f32>;\nif (flag) {\n"));
        assert!(out.contains("} else {\n    // none\n}\n"));
    }
}
