//! Debug listing for lowered CFGs
//!
//! Produces the canonical dump read in verbose mode and by tests:
//! `Block <idx> '<info>'; Predecessors: … Successors: …` followed by
//! one indented line per statement. Block references render as
//! placement indices, names resolve through the interner.

use super::{Cfg, CfgBlock};
use crate::ast::{
    BinaryOp, BoolOpKind, CmpOp, Expr, ExprKind, Number, Stmt, StmtKind, UnaryOpKind,
};
use crate::interner::Interner;
use std::fmt::Write;

impl Cfg {
    /// Render the whole graph as a listing.
    pub fn pretty_print(&self, interner: &Interner) -> String {
        let mut out = String::new();
        writeln!(out, "CFG:").unwrap();
        writeln!(out, "{} blocks", self.block_count()).unwrap();
        for block in self.blocks() {
            out.push_str(&self.pretty_print_block(block, interner));
        }
        out
    }

    fn pretty_print_block(&self, block: &CfgBlock, interner: &Interner) -> String {
        let mut out = String::new();
        write!(out, "Block {}", block.idx).unwrap();
        if let Some(info) = block.info {
            write!(out, " '{info}'").unwrap();
        }
        write!(out, "; Predecessors:").unwrap();
        for &p in &block.predecessors {
            write!(out, " {}", self.block(p).idx).unwrap();
        }
        write!(out, " Successors:").unwrap();
        for &s in &block.successors {
            write!(out, " {}", self.block(s).idx).unwrap();
        }
        out.push('\n');
        for stmt in &block.body {
            writeln!(out, "    {}", fmt_stmt(self, interner, stmt)).unwrap();
        }
        out
    }
}

fn binop_str(op: BinaryOp) -> &'static str {
    match op {
        BinaryOp::Add => "+",
        BinaryOp::Sub => "-",
        BinaryOp::Mult => "*",
        BinaryOp::Div => "/",
        BinaryOp::FloorDiv => "//",
        BinaryOp::Mod => "%",
        BinaryOp::Pow => "**",
        BinaryOp::LShift => "<<",
        BinaryOp::RShift => ">>",
        BinaryOp::BitOr => "|",
        BinaryOp::BitXor => "^",
        BinaryOp::BitAnd => "&",
    }
}

fn cmpop_str(op: CmpOp) -> &'static str {
    match op {
        CmpOp::Eq => "==",
        CmpOp::NotEq => "!=",
        CmpOp::Lt => "<",
        CmpOp::LtE => "<=",
        CmpOp::Gt => ">",
        CmpOp::GtE => ">=",
        CmpOp::Is => "is",
        CmpOp::IsNot => "is not",
        CmpOp::In => "in",
        CmpOp::NotIn => "not in",
    }
}

fn unaryop_str(op: UnaryOpKind) -> &'static str {
    match op {
        UnaryOpKind::Invert => "~",
        UnaryOpKind::Not => "not ",
        UnaryOpKind::UAdd => "+",
        UnaryOpKind::USub => "-",
    }
}

fn join_exprs(interner: &Interner, exprs: &[Expr], sep: &str) -> String {
    exprs
        .iter()
        .map(|e| fmt_expr(interner, e))
        .collect::<Vec<_>>()
        .join(sep)
}

/// Render one expression.
pub fn fmt_expr(interner: &Interner, expr: &Expr) -> String {
    match &expr.kind {
        ExprKind::Attribute { value, attr, .. } => {
            format!("{}.{}", fmt_expr(interner, value), interner.resolve(*attr))
        }
        ExprKind::ClsAttribute { value, attr } => {
            format!("{}:{}", fmt_expr(interner, value), interner.resolve(*attr))
        }
        ExprKind::AugBinOp { op, left, right } => format!(
            "{} {}= {}",
            fmt_expr(interner, left),
            binop_str(*op),
            fmt_expr(interner, right)
        ),
        ExprKind::BinOp { op, left, right } => format!(
            "{} {} {}",
            fmt_expr(interner, left),
            binop_str(*op),
            fmt_expr(interner, right)
        ),
        ExprKind::BoolOp { op, values } => {
            let sep = match op {
                BoolOpKind::And => " and ",
                BoolOpKind::Or => " or ",
            };
            join_exprs(interner, values, sep)
        }
        ExprKind::Call {
            func,
            args,
            keywords,
            starargs,
            kwargs,
        } => {
            let mut parts: Vec<String> = args.iter().map(|a| fmt_expr(interner, a)).collect();
            for kw in keywords {
                parts.push(format!(
                    "{}={}",
                    interner.resolve(kw.arg),
                    fmt_expr(interner, &kw.value)
                ));
            }
            if let Some(sa) = starargs {
                parts.push(format!("*{}", fmt_expr(interner, sa)));
            }
            if let Some(kw) = kwargs {
                parts.push(format!("**{}", fmt_expr(interner, kw)));
            }
            format!("{}({})", fmt_expr(interner, func), parts.join(", "))
        }
        ExprKind::Compare {
            ops,
            left,
            comparators,
        } => {
            let mut out = fmt_expr(interner, left);
            for (op, right) in ops.iter().zip(comparators) {
                write!(out, " {} {}", cmpop_str(*op), fmt_expr(interner, right)).unwrap();
            }
            out
        }
        ExprKind::Dict { keys, values } => {
            let pairs: Vec<String> = keys
                .iter()
                .zip(values)
                .map(|(k, v)| format!("{}: {}", fmt_expr(interner, k), fmt_expr(interner, v)))
                .collect();
            format!("{{{}}}", pairs.join(", "))
        }
        ExprKind::DictComp { key, value, .. } => format!(
            "{{{}: {} for ...}}",
            fmt_expr(interner, key),
            fmt_expr(interner, value)
        ),
        ExprKind::GeneratorExp { elt, .. } => {
            format!("({} for ...)", fmt_expr(interner, elt))
        }
        ExprKind::IfExp { test, body, orelse } => format!(
            "{} if {} else {}",
            fmt_expr(interner, body),
            fmt_expr(interner, test),
            fmt_expr(interner, orelse)
        ),
        ExprKind::Index { value } => fmt_expr(interner, value),
        ExprKind::Lambda { .. } => "lambda".to_owned(),
        ExprKind::LangPrimitive { op, args } => {
            format!("{}({})", op.mnemonic(), join_exprs(interner, args, ", "))
        }
        ExprKind::List { elts, .. } => format!("[{}]", join_exprs(interner, elts, ", ")),
        ExprKind::ListComp { elt, .. } => format!("[{} for ...]", fmt_expr(interner, elt)),
        ExprKind::Name { sym, .. } => interner.resolve(*sym).to_owned(),
        ExprKind::Num(Number::Int(n)) => n.to_string(),
        ExprKind::Num(Number::Float(x)) => x.to_string(),
        ExprKind::Repr { value } => format!("`{}`", fmt_expr(interner, value)),
        ExprKind::Set { elts } => format!("{{{}}}", join_exprs(interner, elts, ", ")),
        ExprKind::SetComp { elt, .. } => format!("{{{} for ...}}", fmt_expr(interner, elt)),
        ExprKind::Slice { lower, upper, step } => {
            let part = |e: &Option<Box<Expr>>| {
                e.as_ref()
                    .map(|e| fmt_expr(interner, e))
                    .unwrap_or_default()
            };
            let mut out = format!("{}:{}", part(lower), part(upper));
            if let Some(step) = step {
                write!(out, ":{}", fmt_expr(interner, step)).unwrap();
            }
            out
        }
        ExprKind::Str(s) => format!("{s:?}"),
        ExprKind::Subscript { value, slice, .. } => format!(
            "{}[{}]",
            fmt_expr(interner, value),
            fmt_expr(interner, slice)
        ),
        ExprKind::Tuple { elts, .. } => format!("({})", join_exprs(interner, elts, ", ")),
        ExprKind::UnaryOp { op, operand } => {
            format!("{}{}", unaryop_str(*op), fmt_expr(interner, operand))
        }
        ExprKind::Yield { value } => match value {
            Some(v) => format!("yield {}", fmt_expr(interner, v)),
            None => "yield".to_owned(),
        },
    }
}

/// Render one statement, resolving block references to placement
/// indices.
pub fn fmt_stmt(cfg: &Cfg, interner: &Interner, stmt: &Stmt) -> String {
    match &stmt.kind {
        StmtKind::Assert { test, msg } => match msg {
            Some(m) => format!(
                "assert {}, {}",
                fmt_expr(interner, test),
                fmt_expr(interner, m)
            ),
            None => format!("assert {}", fmt_expr(interner, test)),
        },
        StmtKind::Assign { targets, value } => {
            let mut out = String::new();
            for t in targets {
                write!(out, "{} = ", fmt_expr(interner, t)).unwrap();
            }
            out.push_str(&fmt_expr(interner, value));
            out
        }
        StmtKind::AugAssign { target, op, value } => format!(
            "{} {}= {}",
            fmt_expr(interner, target),
            binop_str(*op),
            fmt_expr(interner, value)
        ),
        StmtKind::Branch {
            test,
            iftrue,
            iffalse,
        } => format!(
            "branch {} ? {} : {}",
            fmt_expr(interner, test),
            cfg.block(*iftrue).idx,
            cfg.block(*iffalse).idx
        ),
        StmtKind::Break => "break".to_owned(),
        StmtKind::ClassDef { name, bases, .. } => format!(
            "class {}({})",
            interner.resolve(*name),
            join_exprs(interner, bases, ", ")
        ),
        StmtKind::Continue => "continue".to_owned(),
        StmtKind::Delete { targets } => format!("del {}", join_exprs(interner, targets, ", ")),
        StmtKind::Exec { body, .. } => format!("exec {}", fmt_expr(interner, body)),
        StmtKind::Expr { value } => fmt_expr(interner, value),
        StmtKind::For { target, iter, .. } => format!(
            "for {} in {}: ...",
            fmt_expr(interner, target),
            fmt_expr(interner, iter)
        ),
        StmtKind::FunctionDef { name, .. } => format!("def {}(...)", interner.resolve(*name)),
        StmtKind::Global { names } => {
            let names: Vec<&str> = names.iter().map(|&n| interner.resolve(n)).collect();
            format!("global {}", names.join(", "))
        }
        StmtKind::If { test, .. } => format!("if {}: ...", fmt_expr(interner, test)),
        StmtKind::Import { .. } => "import ...".to_owned(),
        StmtKind::ImportFrom { module, .. } => {
            format!("from {} import ...", interner.resolve(*module))
        }
        StmtKind::Invoke {
            stmt,
            normal_dest,
            exc_dest,
        } => format!(
            "invoke [{}] normal: {} exc: {}",
            fmt_stmt(cfg, interner, stmt),
            cfg.block(*normal_dest).idx,
            cfg.block(*exc_dest).idx
        ),
        StmtKind::Jump { target } => format!("jump {}", cfg.block(*target).idx),
        StmtKind::Pass => "pass".to_owned(),
        StmtKind::Print { dest, values, nl } => {
            let mut out = "print".to_owned();
            if let Some(d) = dest {
                write!(out, " >>{}", fmt_expr(interner, d)).unwrap();
                if !values.is_empty() {
                    out.push(',');
                }
            }
            if !values.is_empty() {
                write!(out, " {}", join_exprs(interner, values, ", ")).unwrap();
            }
            if !nl {
                out.push(',');
            }
            out
        }
        StmtKind::Raise { arg0, arg1, arg2 } => {
            let mut out = "raise".to_owned();
            let args: Vec<String> = [arg0, arg1, arg2]
                .into_iter()
                .flatten()
                .map(|e| fmt_expr(interner, e))
                .collect();
            if !args.is_empty() {
                write!(out, " {}", args.join(", ")).unwrap();
            }
            out
        }
        StmtKind::Return { value } => match value {
            Some(v) => format!("return {}", fmt_expr(interner, v)),
            None => "return".to_owned(),
        },
        StmtKind::TryExcept { .. } => "try/except ...".to_owned(),
        StmtKind::TryFinally { .. } => "try/finally ...".to_owned(),
        StmtKind::While { test, .. } => format!("while {}: ...", fmt_expr(interner, test)),
        StmtKind::With { context_expr, .. } => {
            format!("with {}: ...", fmt_expr(interner, context_expr))
        }
    }
}
