//! Shared helpers for the integration tests: a small AST construction
//! kit (standing in for the parser) and a structural checker for the
//! properties the IR generator relies on.

#![allow(dead_code)]

use opal_frontend::ast::{
    Alias, Arguments, BinaryOp, BoolOpKind, CmpOp, Comprehension, ExceptHandler, Expr,
    ExprContext, ExprKind, Number, PrimitiveOp, Stmt, StmtKind,
};
use opal_frontend::cfg::Cfg;
use opal_frontend::{build_cfg, Interner, LowerError, RootKind, SourceInfo, Symbol};

/// One compilation unit under test.
pub struct TestUnit {
    pub source: SourceInfo,
}

impl TestUnit {
    pub fn new(root_kind: RootKind) -> Self {
        TestUnit {
            source: SourceInfo::new(root_kind),
        }
    }

    pub fn function() -> Self {
        Self::new(RootKind::FunctionDef)
    }

    pub fn module() -> Self {
        Self::new(RootKind::Module)
    }

    pub fn class_body() -> Self {
        Self::new(RootKind::ClassDef)
    }

    pub fn build(&mut self, body: Vec<Stmt>) -> Cfg {
        build_cfg(&mut self.source, body).expect("lowering failed")
    }

    pub fn try_build(&mut self, body: Vec<Stmt>) -> Result<Cfg, LowerError> {
        build_cfg(&mut self.source, body)
    }

    pub fn listing(&self, cfg: &Cfg) -> String {
        cfg.pretty_print(&self.source.interner)
    }

    // ---------- expressions ----------

    pub fn sym(&mut self, s: &str) -> Symbol {
        self.source.intern(s)
    }

    fn expr(&self, kind: ExprKind) -> Expr {
        self.source.nodes.expr(kind)
    }

    fn stmt(&self, kind: StmtKind) -> Stmt {
        self.source.nodes.stmt(kind)
    }

    pub fn load(&mut self, name: &str) -> Expr {
        let sym = self.sym(name);
        self.expr(ExprKind::Name {
            sym,
            ctx: ExprContext::Load,
        })
    }

    pub fn store(&mut self, name: &str) -> Expr {
        let sym = self.sym(name);
        self.expr(ExprKind::Name {
            sym,
            ctx: ExprContext::Store,
        })
    }

    pub fn num(&self, n: i64) -> Expr {
        self.expr(ExprKind::Num(Number::Int(n)))
    }

    pub fn str_(&self, s: &str) -> Expr {
        self.expr(ExprKind::Str(s.to_owned()))
    }

    pub fn bin(&self, op: BinaryOp, left: Expr, right: Expr) -> Expr {
        self.expr(ExprKind::BinOp {
            op,
            left: Box::new(left),
            right: Box::new(right),
        })
    }

    pub fn boolop(&self, op: BoolOpKind, values: Vec<Expr>) -> Expr {
        self.expr(ExprKind::BoolOp { op, values })
    }

    pub fn cmp(&self, ops: Vec<CmpOp>, left: Expr, comparators: Vec<Expr>) -> Expr {
        self.expr(ExprKind::Compare {
            ops,
            left: Box::new(left),
            comparators,
        })
    }

    pub fn if_exp(&self, test: Expr, body: Expr, orelse: Expr) -> Expr {
        self.expr(ExprKind::IfExp {
            test: Box::new(test),
            body: Box::new(body),
            orelse: Box::new(orelse),
        })
    }

    pub fn call(&mut self, func: &str, args: Vec<Expr>) -> Expr {
        let func = self.load(func);
        self.call_expr(func, args)
    }

    pub fn call_expr(&self, func: Expr, args: Vec<Expr>) -> Expr {
        self.expr(ExprKind::Call {
            func: Box::new(func),
            args,
            keywords: Vec::new(),
            starargs: None,
            kwargs: None,
        })
    }

    pub fn attr(&mut self, value: Expr, name: &str) -> Expr {
        let attr = self.sym(name);
        self.expr(ExprKind::Attribute {
            value: Box::new(value),
            attr,
            ctx: ExprContext::Load,
        })
    }

    pub fn subscript(&self, value: Expr, index: Expr) -> Expr {
        let index = self.expr(ExprKind::Index {
            value: Box::new(index),
        });
        self.expr(ExprKind::Subscript {
            value: Box::new(value),
            slice: Box::new(index),
            ctx: ExprContext::Load,
        })
    }

    pub fn tuple(&self, elts: Vec<Expr>) -> Expr {
        self.expr(ExprKind::Tuple {
            elts,
            ctx: ExprContext::Load,
        })
    }

    pub fn yield_(&self, value: Expr) -> Expr {
        self.expr(ExprKind::Yield {
            value: Some(Box::new(value)),
        })
    }

    pub fn comprehension(&mut self, target: &str, iter: Expr, ifs: Vec<Expr>) -> Comprehension {
        let target = self.store(target);
        Comprehension {
            id: self.source.nodes.next_id(),
            target,
            iter,
            ifs,
        }
    }

    pub fn list_comp(&self, elt: Expr, generators: Vec<Comprehension>) -> Expr {
        self.expr(ExprKind::ListComp {
            elt: Box::new(elt),
            generators,
        })
    }

    pub fn set_comp(&self, elt: Expr, generators: Vec<Comprehension>) -> Expr {
        self.expr(ExprKind::SetComp {
            elt: Box::new(elt),
            generators,
        })
    }

    pub fn dict_comp(&self, key: Expr, value: Expr, generators: Vec<Comprehension>) -> Expr {
        self.expr(ExprKind::DictComp {
            key: Box::new(key),
            value: Box::new(value),
            generators,
        })
    }

    pub fn generator_exp(&self, elt: Expr, generators: Vec<Comprehension>) -> Expr {
        self.expr(ExprKind::GeneratorExp {
            elt: Box::new(elt),
            generators,
        })
    }

    // ---------- statements ----------

    pub fn assign(&mut self, name: &str, value: Expr) -> Stmt {
        let target = self.store(name);
        self.assign_to(target, value)
    }

    pub fn assign_to(&self, target: Expr, value: Expr) -> Stmt {
        self.stmt(StmtKind::Assign {
            targets: vec![target],
            value,
        })
    }

    pub fn aug_assign(&mut self, name: &str, op: BinaryOp, value: Expr) -> Stmt {
        let target = self.store(name);
        self.stmt(StmtKind::AugAssign { target, op, value })
    }

    pub fn expr_stmt(&self, value: Expr) -> Stmt {
        self.stmt(StmtKind::Expr { value })
    }

    pub fn if_(&self, test: Expr, body: Vec<Stmt>, orelse: Vec<Stmt>) -> Stmt {
        self.stmt(StmtKind::If { test, body, orelse })
    }

    pub fn while_(&self, test: Expr, body: Vec<Stmt>, orelse: Vec<Stmt>) -> Stmt {
        self.stmt(StmtKind::While { test, body, orelse })
    }

    pub fn for_(&mut self, target: &str, iter: Expr, body: Vec<Stmt>, orelse: Vec<Stmt>) -> Stmt {
        let target = self.store(target);
        self.stmt(StmtKind::For {
            target,
            iter,
            body,
            orelse,
        })
    }

    pub fn ret(&self, value: Option<Expr>) -> Stmt {
        self.stmt(StmtKind::Return { value })
    }

    pub fn brk(&self) -> Stmt {
        self.stmt(StmtKind::Break)
    }

    pub fn cont(&self) -> Stmt {
        self.stmt(StmtKind::Continue)
    }

    pub fn pass_(&self) -> Stmt {
        self.stmt(StmtKind::Pass)
    }

    pub fn raise(&self, arg0: Option<Expr>) -> Stmt {
        self.stmt(StmtKind::Raise {
            arg0,
            arg1: None,
            arg2: None,
        })
    }

    pub fn handler(&self, ty: Option<Expr>, name: Option<Expr>, body: Vec<Stmt>) -> ExceptHandler {
        ExceptHandler { ty, name, body }
    }

    pub fn try_except(
        &self,
        body: Vec<Stmt>,
        handlers: Vec<ExceptHandler>,
        orelse: Vec<Stmt>,
    ) -> Stmt {
        self.stmt(StmtKind::TryExcept {
            body,
            handlers,
            orelse,
        })
    }

    pub fn try_finally(&self, body: Vec<Stmt>, finalbody: Vec<Stmt>) -> Stmt {
        self.stmt(StmtKind::TryFinally { body, finalbody })
    }

    pub fn with_(&self, context_expr: Expr, optional_vars: Option<Expr>, body: Vec<Stmt>) -> Stmt {
        self.stmt(StmtKind::With {
            context_expr,
            optional_vars,
            body,
        })
    }

    pub fn assert_(&self, test: Expr, msg: Option<Expr>) -> Stmt {
        self.stmt(StmtKind::Assert { test, msg })
    }

    pub fn print(&self, values: Vec<Expr>, nl: bool) -> Stmt {
        self.stmt(StmtKind::Print {
            dest: None,
            values,
            nl,
        })
    }

    pub fn del(&mut self, name: &str) -> Stmt {
        let sym = self.sym(name);
        let target = self.expr(ExprKind::Name {
            sym,
            ctx: ExprContext::Del,
        });
        self.stmt(StmtKind::Delete {
            targets: vec![target],
        })
    }

    pub fn global_(&mut self, name: &str) -> Stmt {
        let sym = self.sym(name);
        self.stmt(StmtKind::Global { names: vec![sym] })
    }

    pub fn import(&mut self, name: &str, asname: Option<&str>) -> Stmt {
        let name = self.sym(name);
        let asname = asname.map(|s| self.sym(s));
        let alias = Alias {
            id: self.source.nodes.next_id(),
            name,
            asname,
        };
        self.stmt(StmtKind::Import { names: vec![alias] })
    }

    pub fn import_from(&mut self, module: &str, names: &[&str]) -> Stmt {
        let module = self.sym(module);
        let names = names
            .iter()
            .map(|&n| {
                let name = self.sym(n);
                Alias {
                    id: self.source.nodes.next_id(),
                    name,
                    asname: None,
                }
            })
            .collect();
        self.stmt(StmtKind::ImportFrom {
            module,
            names,
            level: 0,
        })
    }

    pub fn func_def(&mut self, name: &str, body: Vec<Stmt>) -> Stmt {
        let name = self.sym(name);
        self.stmt(StmtKind::FunctionDef {
            name,
            args: Arguments::default(),
            body,
            decorator_list: Vec::new(),
        })
    }

    pub fn exec(&mut self, code: &str) -> Stmt {
        let body = self.str_(code);
        self.stmt(StmtKind::Exec {
            body,
            globals: None,
            locals: None,
        })
    }
}

// ---------- structural checks ----------

fn is_simple(e: &Expr) -> bool {
    match &e.kind {
        ExprKind::Name { .. } | ExprKind::Num(_) | ExprKind::Str(_) => true,
        ExprKind::Index { value } => matches!(value.kind, ExprKind::Num(_)),
        _ => false,
    }
}

fn assert_simple(e: &Expr, what: &str) {
    assert!(is_simple(e), "{what} is not in three-address form: {:?}", e.kind);
}

fn is_simple_compare(e: &Expr) -> bool {
    match &e.kind {
        ExprKind::Compare {
            ops,
            left,
            comparators,
        } => ops.len() == 1 && is_simple(left) && comparators.iter().all(is_simple),
        _ => false,
    }
}

fn check_branch_test(test: &Expr) {
    match &test.kind {
        ExprKind::Name { .. } | ExprKind::Num(_) => {}
        ExprKind::LangPrimitive {
            op: PrimitiveOp::Nonzero,
            args,
        } => {
            assert_eq!(args.len(), 1);
            assert!(
                is_simple(&args[0]) || is_simple_compare(&args[0]),
                "unflattened branch test operand: {:?}",
                args[0].kind
            );
        }
        other => panic!("unexpected branch test shape: {other:?}"),
    }
}

/// Check operand positions of one (possibly one-level-composite)
/// value expression. Lambdas are opaque nested scopes and skipped.
fn check_value_expr(e: &Expr) {
    match &e.kind {
        ExprKind::Name { .. } | ExprKind::Num(_) | ExprKind::Str(_) | ExprKind::Lambda { .. } => {}
        ExprKind::BinOp { left, right, .. } | ExprKind::AugBinOp { left, right, .. } => {
            assert_simple(left, "binop operand");
            assert_simple(right, "binop operand");
        }
        ExprKind::UnaryOp { operand, .. } => assert_simple(operand, "unary operand"),
        ExprKind::Compare {
            ops,
            left,
            comparators,
        } => {
            assert_eq!(ops.len(), 1, "chained comparison survived lowering");
            assert_simple(left, "comparison operand");
            for c in comparators {
                assert_simple(c, "comparison operand");
            }
        }
        ExprKind::Call {
            func,
            args,
            keywords,
            starargs,
            kwargs,
        } => {
            match &func.kind {
                ExprKind::Attribute { value, .. } | ExprKind::ClsAttribute { value, .. } => {
                    assert_simple(value, "callattr object")
                }
                _ => assert_simple(func, "callee"),
            }
            for a in args {
                assert_simple(a, "call argument");
            }
            for kw in keywords {
                assert_simple(&kw.value, "keyword argument");
            }
            if let Some(sa) = starargs {
                assert_simple(sa, "starargs");
            }
            if let Some(kw) = kwargs {
                assert_simple(kw, "kwargs");
            }
        }
        ExprKind::Attribute { value, .. } | ExprKind::ClsAttribute { value, .. } => {
            assert_simple(value, "attribute object")
        }
        ExprKind::Subscript { value, slice, .. } => {
            assert_simple(value, "subscript object");
            match &slice.kind {
                ExprKind::Index { value } => assert_simple(value, "subscript index"),
                ExprKind::Slice { lower, upper, step } => {
                    for part in [lower, upper, step].into_iter().flatten() {
                        assert_simple(part, "slice bound");
                    }
                }
                _ => assert_simple(slice, "subscript slice"),
            }
        }
        ExprKind::Tuple { elts, .. } | ExprKind::List { elts, .. } | ExprKind::Set { elts } => {
            for e in elts {
                assert_simple(e, "container element");
            }
        }
        ExprKind::Dict { keys, values } => {
            for e in keys.iter().chain(values) {
                assert_simple(e, "dict element");
            }
        }
        ExprKind::Repr { value } => assert_simple(value, "repr operand"),
        ExprKind::Yield { value } => {
            if let Some(v) = value {
                assert_simple(v, "yield operand");
            }
        }
        ExprKind::LangPrimitive {
            op: PrimitiveOp::Nonzero,
            args,
        } => {
            assert_eq!(args.len(), 1);
            assert!(
                is_simple(&args[0]) || is_simple_compare(&args[0]),
                "unflattened truth test: {:?}",
                args[0].kind
            );
        }
        ExprKind::LangPrimitive {
            op: PrimitiveOp::ImportName,
            args,
        } => {
            // (level, fromlist-or-none, name); the fromlist is a
            // tuple of string literals.
            assert_eq!(args.len(), 3);
            assert_simple(&args[0], "import level");
            assert_simple(&args[2], "import name");
        }
        ExprKind::LangPrimitive { args, .. } => {
            for a in args {
                assert_simple(a, "primitive operand");
            }
        }
        ExprKind::Index { value } => assert_simple(value, "index operand"),
        ExprKind::Slice { lower, upper, step } => {
            for part in [lower, upper, step].into_iter().flatten() {
                assert_simple(part, "slice bound");
            }
        }
        other => panic!("high-level expression survived lowering: {other:?}"),
    }
}

fn check_assign_target(t: &Expr) {
    match &t.kind {
        ExprKind::Name { .. } => {}
        ExprKind::Attribute { value, .. } => assert_simple(value, "store attribute object"),
        ExprKind::Subscript { value, slice, .. } => {
            assert_simple(value, "store subscript object");
            match &slice.kind {
                ExprKind::Index { value } => assert_simple(value, "store subscript index"),
                ExprKind::Slice { lower, upper, step } => {
                    for part in [lower, upper, step].into_iter().flatten() {
                        assert_simple(part, "store slice bound");
                    }
                }
                _ => assert_simple(slice, "store subscript slice"),
            }
        }
        ExprKind::Tuple { elts, .. } => {
            for e in elts {
                assert!(
                    matches!(e.kind, ExprKind::Name { .. }),
                    "compound target not flattened: {:?}",
                    e.kind
                );
            }
        }
        other => panic!("unexpected assignment target after lowering: {other:?}"),
    }
}

fn is_terminator(s: &Stmt) -> bool {
    matches!(
        s.kind,
        StmtKind::Jump { .. }
            | StmtKind::Branch { .. }
            | StmtKind::Invoke { .. }
            | StmtKind::Return { .. }
            | StmtKind::Raise { .. }
    )
}

fn check_stmt(s: &Stmt) {
    match &s.kind {
        StmtKind::Assign { targets, value } => {
            assert_eq!(targets.len(), 1, "multi-target assignment survived");
            check_assign_target(&targets[0]);
            check_value_expr(value);
        }
        StmtKind::Expr { value } => check_value_expr(value),
        StmtKind::Branch { test, .. } => check_branch_test(test),
        StmtKind::Jump { .. } => {}
        StmtKind::Return { value } => {
            if let Some(v) = value {
                assert!(
                    is_simple(v)
                        || matches!(
                            v.kind,
                            ExprKind::LangPrimitive {
                                op: PrimitiveOp::Locals,
                                ..
                            }
                        ),
                    "return operand not flattened: {:?}",
                    v.kind
                );
            }
        }
        StmtKind::Raise { arg0, arg1, arg2 } => {
            for a in [arg0, arg1, arg2].into_iter().flatten() {
                assert_simple(a, "raise operand");
            }
        }
        StmtKind::Invoke { stmt, .. } => {
            assert!(
                !matches!(stmt.kind, StmtKind::Invoke { .. }),
                "nested invoke"
            );
            check_stmt(stmt);
        }
        StmtKind::Delete { targets } => {
            assert_eq!(targets.len(), 1, "multi-target delete survived");
        }
        StmtKind::Print { dest, values, .. } => {
            if let Some(d) = dest {
                assert_simple(d, "print destination");
            }
            assert!(values.len() <= 1, "multi-value print survived");
            for v in values {
                assert_simple(v, "print operand");
            }
        }
        StmtKind::Assert { test, msg } => {
            assert_simple(test, "assert test");
            if let Some(m) = msg {
                assert_simple(m, "assert message");
            }
        }
        StmtKind::FunctionDef {
            args,
            decorator_list,
            ..
        } => {
            for d in args.defaults.iter().chain(decorator_list) {
                assert_simple(d, "definition operand");
            }
        }
        StmtKind::ClassDef {
            bases,
            decorator_list,
            ..
        } => {
            for d in bases.iter().chain(decorator_list) {
                assert_simple(d, "definition operand");
            }
        }
        StmtKind::Global { .. } | StmtKind::Pass => {}
        other => panic!("structured statement survived lowering: {other:?}"),
    }
}

/// Assert the structural properties the IR generator relies on, on a
/// finished (merged) CFG: entry uniqueness, termination, arity, mutual
/// adjacency, rough topological order, no critical edges, no node
/// aliasing, three-address form, and landing-pad shape.
pub fn check_invariants(cfg: &Cfg, _interner: &Interner) {
    let order = cfg.block_order();
    assert!(!order.is_empty());

    let entry = cfg.entry();
    assert!(cfg.block(entry).predecessors.is_empty(), "entry has predecessors");

    let position = |id| order.iter().position(|&b| b == id).unwrap();

    for &id in order {
        let b = cfg.block(id);
        assert!(!b.body.is_empty(), "{id} is empty");
        assert!(b.successors.len() <= 2, "{id} has too many successors");
        if id != entry {
            assert!(!b.predecessors.is_empty(), "{id} is unreachable");
            assert!(
                b.predecessors.iter().any(|&p| position(p) < position(id)),
                "{id} has no earlier predecessor"
            );
        }

        // Termination and single-terminator discipline.
        let last = b.body.last().unwrap();
        assert!(is_terminator(last), "{id} does not end in a terminator");
        for s in &b.body[..b.body.len() - 1] {
            assert!(
                !matches!(
                    s.kind,
                    StmtKind::Jump { .. } | StmtKind::Branch { .. } | StmtKind::Invoke { .. }
                ),
                "{id} has a mid-block terminator"
            );
        }
        if b.successors.is_empty() {
            assert!(
                matches!(last.kind, StmtKind::Return { .. } | StmtKind::Raise { .. }),
                "terminal {id} must end in return or raise"
            );
        }

        // Mutual adjacency.
        for &s in &b.successors {
            assert!(
                cfg.block(s).predecessors.contains(&id),
                "edge {id} -> {s} not mutual"
            );
        }
        for &p in &b.predecessors {
            assert!(
                cfg.block(p).successors.contains(&id),
                "edge {p} -> {id} not mutual"
            );
        }

        // No critical edges.
        if b.successors.len() >= 2 {
            for &s in &b.successors {
                assert!(
                    cfg.block(s).predecessors.len() < 2,
                    "critical edge {id} -> {s}"
                );
            }
        }

        for s in &b.body {
            check_stmt(s);
        }

        // Invoke landing pads capture the triple first. Nothing is
        // assumed about the pad's terminator: when a protected region
        // raises through exactly one invoke, the merge pass fuses the
        // handler into the pad, replacing the trampoline's jump with
        // the handler's own terminator.
        for s in &b.body {
            if let StmtKind::Invoke { exc_dest, .. } = &s.kind {
                let pad = cfg.block(*exc_dest);
                match &pad.body[0].kind {
                    StmtKind::Assign { targets, value } => {
                        assert!(
                            matches!(targets[0].kind, ExprKind::Tuple { .. }),
                            "landing pad must capture the exception triple"
                        );
                        assert!(
                            matches!(
                                value.kind,
                                ExprKind::LangPrimitive {
                                    op: PrimitiveOp::Landingpad,
                                    ..
                                }
                            ),
                            "landing pad capture must read LANDINGPAD"
                        );
                    }
                    other => panic!("landing pad starts with {other:?}"),
                }
            }
        }
    }

    // No reduced-AST node appears twice.
    let mut seen = std::collections::HashSet::new();
    for &id in order {
        for s in &cfg.block(id).body {
            opal_frontend::ast::for_each_stmt_id(s, &mut |node| {
                assert!(seen.insert(node), "node {node} appears in two places");
            });
        }
    }
}
