//! AST node definitions
//!
//! One closed vocabulary serves both sides of the pass: the parser's
//! high-level nodes (boolean operators, chained comparisons,
//! conditional expressions, comprehensions, structured statements) and
//! the reduced subset the lowering emits into CFG blocks (plus the
//! block-level terminators `Jump`, `Branch` and `Invoke`, which only
//! exist after lowering).
//!
//! Every node carries a [`NodeId`] assigned at construction by the
//! compilation unit's [`NodeFactory`]. Node identity is load-bearing:
//! temporary names are derived from it, scope-analysis results are
//! keyed by it, and the post-pass rejects any id that appears twice in
//! the finished graph. For that reason `Expr` and `Stmt` are not
//! `Clone` — the only way to duplicate a node is the builder's `dup`,
//! which allocates a fresh id.

use crate::cfg::BlockId;
use crate::interner::Symbol;
use std::cell::Cell;
use std::fmt;

/// Stable identity of an AST node within one compilation unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u32);

impl NodeId {
    /// Raw index, used when rendering temporary names.
    #[inline]
    pub fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Allocator for [`NodeId`]s, shared between the parser and the
/// lowering pass so synthesised nodes never collide with parsed ones.
#[derive(Debug, Default)]
pub struct NodeFactory {
    next: Cell<u32>,
}

impl NodeFactory {
    /// Create a factory starting at id 0.
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a fresh id.
    #[inline]
    pub fn next_id(&self) -> NodeId {
        let id = self.next.get();
        self.next.set(id + 1);
        NodeId(id)
    }

    /// Build an expression with a fresh id.
    #[inline]
    pub fn expr(&self, kind: ExprKind) -> Expr {
        Expr {
            id: self.next_id(),
            kind,
        }
    }

    /// Build a statement with a fresh id.
    #[inline]
    pub fn stmt(&self, kind: StmtKind) -> Stmt {
        Stmt {
            id: self.next_id(),
            kind,
        }
    }
}

/// How a name/attribute/subscript position is being used.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExprContext {
    /// Read the value
    Load,
    /// Write the value
    Store,
    /// Delete the binding
    Del,
    /// Formal parameter binding
    Param,
}

/// Short-circuit boolean operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoolOpKind {
    /// `and`: stop on the first falsy operand
    And,
    /// `or`: stop on the first truthy operand
    Or,
}

/// Binary arithmetic/bitwise operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum BinaryOp {
    Add,
    Sub,
    Mult,
    Div,
    FloorDiv,
    Mod,
    Pow,
    LShift,
    RShift,
    BitOr,
    BitXor,
    BitAnd,
}

/// Unary operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum UnaryOpKind {
    Invert,
    Not,
    UAdd,
    USub,
}

/// Comparison operator (a chained comparison carries several).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum CmpOp {
    Eq,
    NotEq,
    Lt,
    LtE,
    Gt,
    GtE,
    Is,
    IsNot,
    In,
    NotIn,
}

/// Numeric literal payload.
#[derive(Debug, Clone, PartialEq)]
pub enum Number {
    /// Integer literal
    Int(i64),
    /// Floating-point literal
    Float(f64),
}

/// Language-level primitives the lowering emits. These have no surface
/// syntax; the IR generator gives each one its runtime meaning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrimitiveOp {
    /// Obtain an iterator from a value
    GetIter,
    /// Fetch one name out of an imported module
    ImportFrom,
    /// `(level, fromlist_or_none, name)` module import
    ImportName,
    /// `from m import *`
    ImportStar,
    /// Exception-type match; third arg of 1 means "false for
    /// non-class types rather than raising"
    IsInstance,
    /// The current exception triple, on entry to a landing pad
    Landingpad,
    /// Snapshot local bindings as a mapping (end of a class body)
    Locals,
    /// The none singleton
    None,
    /// Truth-test under the language's truthiness rules
    Nonzero,
    /// Install the thread-local "current exception" for a handler body
    SetExcInfo,
    /// Invalidate cached exception info (emitted after every yield)
    UncacheExcInfo,
}

impl PrimitiveOp {
    /// Uppercase mnemonic used by the debug printer.
    pub fn mnemonic(self) -> &'static str {
        match self {
            PrimitiveOp::GetIter => "GET_ITER",
            PrimitiveOp::ImportFrom => "IMPORT_FROM",
            PrimitiveOp::ImportName => "IMPORT_NAME",
            PrimitiveOp::ImportStar => "IMPORT_STAR",
            PrimitiveOp::IsInstance => "ISINSTANCE",
            PrimitiveOp::Landingpad => "LANDINGPAD",
            PrimitiveOp::Locals => "LOCALS",
            PrimitiveOp::None => "NONE",
            PrimitiveOp::Nonzero => "NONZERO",
            PrimitiveOp::SetExcInfo => "SET_EXC_INFO",
            PrimitiveOp::UncacheExcInfo => "UNCACHE_EXC_INFO",
        }
    }
}

/// A keyword argument in a call.
#[derive(Debug)]
pub struct Keyword {
    /// Parameter name
    pub arg: Symbol,
    /// Argument value
    pub value: Expr,
}

/// One `name [as asname]` clause of an import statement.
#[derive(Debug)]
pub struct Alias {
    /// Node identity (temporaries for the import are derived from it)
    pub id: NodeId,
    /// Possibly-dotted imported name
    pub name: Symbol,
    /// Binding name, if `as` was given
    pub asname: Option<Symbol>,
}

/// One `for target in iter [if cond]*` clause of a comprehension.
#[derive(Debug)]
pub struct Comprehension {
    /// Node identity
    pub id: NodeId,
    /// Loop target (Name/Tuple/... in Store context)
    pub target: Expr,
    /// Iterable expression
    pub iter: Expr,
    /// Zero or more filter conditions
    pub ifs: Vec<Expr>,
}

/// Formal parameter list of a function or lambda.
#[derive(Debug, Default)]
pub struct Arguments {
    /// Positional parameters (Name nodes in Param context)
    pub args: Vec<Expr>,
    /// Defaults for the trailing parameters
    pub defaults: Vec<Expr>,
    /// `*args` name
    pub vararg: Option<Symbol>,
    /// `**kwargs` name
    pub kwarg: Option<Symbol>,
}

/// One `except [type [as name]]:` clause.
#[derive(Debug)]
pub struct ExceptHandler {
    /// Exception type to match; `None` for a bare `except:`
    pub ty: Option<Expr>,
    /// Target binding the caught value, if `as` was given
    pub name: Option<Expr>,
    /// Handler body
    pub body: Vec<Stmt>,
}

/// An expression node: identity plus kind.
#[derive(Debug)]
pub struct Expr {
    /// Stable identity
    pub id: NodeId,
    /// Payload
    pub kind: ExprKind,
}

/// Expression payloads.
#[derive(Debug)]
pub enum ExprKind {
    /// `value.attr` (instance lookup)
    Attribute {
        /// Object expression
        value: Box<Expr>,
        /// Attribute name (mangled during lowering)
        attr: Symbol,
        /// Usage context
        ctx: ExprContext,
    },
    /// In-place binary operator (`+=` family), produced by lowering
    AugBinOp {
        /// Operator
        op: BinaryOp,
        /// Left operand (the old value, pre-loaded)
        left: Box<Expr>,
        /// Right operand
        right: Box<Expr>,
    },
    /// `left op right`
    BinOp {
        /// Operator
        op: BinaryOp,
        /// Left operand
        left: Box<Expr>,
        /// Right operand
        right: Box<Expr>,
    },
    /// `a and b and ...` / `a or b or ...`; removed by lowering
    BoolOp {
        /// Which short-circuit operator
        op: BoolOpKind,
        /// Two or more operands
        values: Vec<Expr>,
    },
    /// A call. If the callee is an attribute access the attribute node
    /// is preserved so IR generation can fuse a call-attribute.
    Call {
        /// Callee
        func: Box<Expr>,
        /// Positional arguments
        args: Vec<Expr>,
        /// Keyword arguments
        keywords: Vec<Keyword>,
        /// `*args` expression
        starargs: Option<Box<Expr>>,
        /// `**kwargs` expression
        kwargs: Option<Box<Expr>>,
    },
    /// `value:attr` — class-slot-only attribute lookup, bypassing the
    /// instance; used for protocol methods (`__hasnext__`, `__exit__`)
    ClsAttribute {
        /// Object expression
        value: Box<Expr>,
        /// Attribute name
        attr: Symbol,
    },
    /// Comparison; after lowering always a single operator
    Compare {
        /// Operators (one per comparator)
        ops: Vec<CmpOp>,
        /// Leftmost operand
        left: Box<Expr>,
        /// Right-hand operands
        comparators: Vec<Expr>,
    },
    /// `{k: v, ...}`
    Dict {
        /// Keys
        keys: Vec<Expr>,
        /// Values, parallel to keys
        values: Vec<Expr>,
    },
    /// `{k: v for ...}`; removed by lowering
    DictComp {
        /// Key expression
        key: Box<Expr>,
        /// Value expression
        value: Box<Expr>,
        /// Generator clauses, outermost first
        generators: Vec<Comprehension>,
    },
    /// `(elt for ...)`; lowered to a synthesised generator function
    GeneratorExp {
        /// Element expression
        elt: Box<Expr>,
        /// Generator clauses, outermost first
        generators: Vec<Comprehension>,
    },
    /// `body if test else orelse`; removed by lowering
    IfExp {
        /// Condition
        test: Box<Expr>,
        /// Value when truthy
        body: Box<Expr>,
        /// Value when falsy
        orelse: Box<Expr>,
    },
    /// Plain subscript index wrapper
    Index {
        /// The index value
        value: Box<Expr>,
    },
    /// `lambda args: body`. Default expressions are rewritten in place
    /// by the lowering; the node itself survives.
    Lambda {
        /// Parameters
        args: Arguments,
        /// Body expression
        body: Box<Expr>,
    },
    /// Compiler primitive (see [`PrimitiveOp`])
    LangPrimitive {
        /// Which primitive
        op: PrimitiveOp,
        /// Operands
        args: Vec<Expr>,
    },
    /// `[a, b, ...]`
    List {
        /// Elements
        elts: Vec<Expr>,
        /// Usage context
        ctx: ExprContext,
    },
    /// `[elt for ...]`; removed by lowering
    ListComp {
        /// Element expression
        elt: Box<Expr>,
        /// Generator clauses, outermost first
        generators: Vec<Comprehension>,
    },
    /// An identifier
    Name {
        /// The interned name
        sym: Symbol,
        /// Usage context
        ctx: ExprContext,
    },
    /// Numeric literal
    Num(Number),
    /// `` `value` `` (repr)
    Repr {
        /// Operand
        value: Box<Expr>,
    },
    /// `{a, b, ...}`
    Set {
        /// Elements
        elts: Vec<Expr>,
    },
    /// `{elt for ...}`; removed by lowering
    SetComp {
        /// Element expression
        elt: Box<Expr>,
        /// Generator clauses, outermost first
        generators: Vec<Comprehension>,
    },
    /// `lower:upper:step` inside a subscript
    Slice {
        /// Start bound
        lower: Option<Box<Expr>>,
        /// Stop bound
        upper: Option<Box<Expr>>,
        /// Step
        step: Option<Box<Expr>>,
    },
    /// String literal
    Str(String),
    /// `value[slice]`
    Subscript {
        /// Object expression
        value: Box<Expr>,
        /// Index or slice
        slice: Box<Expr>,
        /// Usage context
        ctx: ExprContext,
    },
    /// `(a, b, ...)`
    Tuple {
        /// Elements
        elts: Vec<Expr>,
        /// Usage context
        ctx: ExprContext,
    },
    /// `op operand`
    UnaryOp {
        /// Operator
        op: UnaryOpKind,
        /// Operand
        operand: Box<Expr>,
    },
    /// `yield value` — a suspension point
    Yield {
        /// Yielded value, if any
        value: Option<Box<Expr>>,
    },
}

/// A statement node: identity plus kind.
#[derive(Debug)]
pub struct Stmt {
    /// Stable identity
    pub id: NodeId,
    /// Payload
    pub kind: StmtKind,
}

/// Statement payloads. `Jump`, `Branch` and `Invoke` only exist in
/// lowered block bodies; structured statements (`If`, `While`, `For`,
/// `TryExcept`, `TryFinally`, `With`) only in parser output.
#[derive(Debug)]
pub enum StmtKind {
    /// `assert test[, msg]`
    Assert {
        /// Condition
        test: Expr,
        /// Failure message
        msg: Option<Expr>,
    },
    /// `targets... = value`; after lowering, exactly one target
    Assign {
        /// Assignment targets
        targets: Vec<Expr>,
        /// Assigned value
        value: Expr,
    },
    /// `target op= value`; removed by lowering
    AugAssign {
        /// Target (Name/Subscript/Attribute)
        target: Expr,
        /// Operator
        op: BinaryOp,
        /// Right-hand side
        value: Expr,
    },
    /// Two-way branch terminator
    Branch {
        /// Truth-tested expression
        test: Expr,
        /// Successor when truthy
        iftrue: BlockId,
        /// Successor when falsy
        iffalse: BlockId,
    },
    /// `break`; removed by lowering
    Break,
    /// `class name(bases):` — the body is compiled separately; base
    /// and decorator expressions are rewritten in place
    ClassDef {
        /// Class name
        name: Symbol,
        /// Base-class expressions
        bases: Vec<Expr>,
        /// Decorators, outermost first
        decorator_list: Vec<Expr>,
        /// Class body (opaque to this pass)
        body: Vec<Stmt>,
    },
    /// `continue`; removed by lowering
    Continue,
    /// `del target` (one target per lowered statement)
    Delete {
        /// Deletion targets
        targets: Vec<Expr>,
    },
    /// `exec ...` — rejected by the pass
    Exec {
        /// Code operand
        body: Expr,
        /// Globals mapping
        globals: Option<Expr>,
        /// Locals mapping
        locals: Option<Expr>,
    },
    /// Expression evaluated for side effect
    Expr {
        /// The expression
        value: Expr,
    },
    /// `for target in iter: ... else: ...`; removed by lowering
    For {
        /// Loop target
        target: Expr,
        /// Iterable
        iter: Expr,
        /// Loop body
        body: Vec<Stmt>,
        /// Runs on natural exhaustion only
        orelse: Vec<Stmt>,
    },
    /// `def name(args): ...` — the body is compiled separately;
    /// decorator and default expressions are rewritten in place
    FunctionDef {
        /// Function name
        name: Symbol,
        /// Parameters
        args: Arguments,
        /// Function body (opaque to this pass)
        body: Vec<Stmt>,
        /// Decorators, outermost first
        decorator_list: Vec<Expr>,
    },
    /// `global names...`
    Global {
        /// Declared names
        names: Vec<Symbol>,
    },
    /// `if test: ... else: ...`; removed by lowering
    If {
        /// Condition
        test: Expr,
        /// True arm
        body: Vec<Stmt>,
        /// False arm
        orelse: Vec<Stmt>,
    },
    /// `import name [as asname], ...`; removed by lowering
    Import {
        /// Import clauses
        names: Vec<Alias>,
    },
    /// `from module import ...`; removed by lowering
    ImportFrom {
        /// Source module
        module: Symbol,
        /// Imported names
        names: Vec<Alias>,
        /// Relative-import level from the parser
        level: i64,
    },
    /// Two-successor terminator wrapping a statement that may raise
    Invoke {
        /// The wrapped statement
        stmt: Box<Stmt>,
        /// Successor on normal completion
        normal_dest: BlockId,
        /// Landing pad on the exception edge; starts with the
        /// triple capture
        exc_dest: BlockId,
    },
    /// Unconditional jump terminator
    Jump {
        /// Successor
        target: BlockId,
    },
    /// `pass`
    Pass,
    /// `print ...` (one value per lowered statement)
    Print {
        /// Destination stream, if `>> dest` was given
        dest: Option<Expr>,
        /// Values to print
        values: Vec<Expr>,
        /// Whether to emit the trailing newline
        nl: bool,
    },
    /// `raise [arg0[, arg1[, arg2]]]`
    Raise {
        /// Exception type or instance
        arg0: Option<Expr>,
        /// Exception value
        arg1: Option<Expr>,
        /// Traceback
        arg2: Option<Expr>,
    },
    /// `return value`
    Return {
        /// Returned value; absent on the synthesised final return
        value: Option<Expr>,
    },
    /// `try: ... except ...: ... else: ...`; removed by lowering
    TryExcept {
        /// Protected body
        body: Vec<Stmt>,
        /// Handler clauses in order
        handlers: Vec<ExceptHandler>,
        /// Runs only when the body raised nothing
        orelse: Vec<Stmt>,
    },
    /// `try: ... finally: ...`; removed by lowering
    TryFinally {
        /// Protected body
        body: Vec<Stmt>,
        /// Always-run epilogue
        finalbody: Vec<Stmt>,
    },
    /// `while test: ... else: ...`; removed by lowering
    While {
        /// Condition
        test: Expr,
        /// Loop body
        body: Vec<Stmt>,
        /// Runs on natural test-false exit only
        orelse: Vec<Stmt>,
    },
    /// `with expr [as var]: ...`; removed by lowering
    With {
        /// Context-manager expression
        context_expr: Expr,
        /// Optional `as` target
        optional_vars: Option<Expr>,
        /// Protected body
        body: Vec<Stmt>,
    },
}

/// Walk every node id in an expression subtree (the node itself and
/// all descendants), in no particular order.
pub fn for_each_expr_id(expr: &Expr, f: &mut impl FnMut(NodeId)) {
    f(expr.id);
    match &expr.kind {
        ExprKind::Attribute { value, .. }
        | ExprKind::ClsAttribute { value, .. }
        | ExprKind::Index { value }
        | ExprKind::Repr { value } => for_each_expr_id(value, f),
        ExprKind::AugBinOp { left, right, .. } | ExprKind::BinOp { left, right, .. } => {
            for_each_expr_id(left, f);
            for_each_expr_id(right, f);
        }
        ExprKind::BoolOp { values, .. } => {
            for v in values {
                for_each_expr_id(v, f);
            }
        }
        ExprKind::Call {
            func,
            args,
            keywords,
            starargs,
            kwargs,
        } => {
            for_each_expr_id(func, f);
            for a in args {
                for_each_expr_id(a, f);
            }
            for kw in keywords {
                for_each_expr_id(&kw.value, f);
            }
            if let Some(e) = starargs {
                for_each_expr_id(e, f);
            }
            if let Some(e) = kwargs {
                for_each_expr_id(e, f);
            }
        }
        ExprKind::Compare {
            left, comparators, ..
        } => {
            for_each_expr_id(left, f);
            for c in comparators {
                for_each_expr_id(c, f);
            }
        }
        ExprKind::Dict { keys, values } => {
            for k in keys {
                for_each_expr_id(k, f);
            }
            for v in values {
                for_each_expr_id(v, f);
            }
        }
        ExprKind::DictComp {
            key,
            value,
            generators,
        } => {
            for_each_expr_id(key, f);
            for_each_expr_id(value, f);
            for c in generators {
                for_each_comprehension_id(c, f);
            }
        }
        ExprKind::GeneratorExp { elt, generators }
        | ExprKind::ListComp { elt, generators }
        | ExprKind::SetComp { elt, generators } => {
            for_each_expr_id(elt, f);
            for c in generators {
                for_each_comprehension_id(c, f);
            }
        }
        ExprKind::IfExp { test, body, orelse } => {
            for_each_expr_id(test, f);
            for_each_expr_id(body, f);
            for_each_expr_id(orelse, f);
        }
        ExprKind::Lambda { args, body } => {
            for_each_arguments_id(args, f);
            for_each_expr_id(body, f);
        }
        ExprKind::LangPrimitive { args, .. } => {
            for a in args {
                for_each_expr_id(a, f);
            }
        }
        ExprKind::List { elts, .. } | ExprKind::Set { elts } | ExprKind::Tuple { elts, .. } => {
            for e in elts {
                for_each_expr_id(e, f);
            }
        }
        ExprKind::Slice { lower, upper, step } => {
            for e in [lower, upper, step].into_iter().flatten() {
                for_each_expr_id(e, f);
            }
        }
        ExprKind::Subscript { value, slice, .. } => {
            for_each_expr_id(value, f);
            for_each_expr_id(slice, f);
        }
        ExprKind::UnaryOp { operand, .. } => for_each_expr_id(operand, f),
        ExprKind::Yield { value } => {
            if let Some(v) = value {
                for_each_expr_id(v, f);
            }
        }
        ExprKind::Name { .. } | ExprKind::Num(_) | ExprKind::Str(_) => {}
    }
}

fn for_each_comprehension_id(c: &Comprehension, f: &mut impl FnMut(NodeId)) {
    f(c.id);
    for_each_expr_id(&c.target, f);
    for_each_expr_id(&c.iter, f);
    for e in &c.ifs {
        for_each_expr_id(e, f);
    }
}

fn for_each_arguments_id(args: &Arguments, f: &mut impl FnMut(NodeId)) {
    for a in &args.args {
        for_each_expr_id(a, f);
    }
    for d in &args.defaults {
        for_each_expr_id(d, f);
    }
}

/// Walk every node id in a statement subtree, including nested
/// statements and expressions.
pub fn for_each_stmt_id(stmt: &Stmt, f: &mut impl FnMut(NodeId)) {
    f(stmt.id);
    match &stmt.kind {
        StmtKind::Assert { test, msg } => {
            for_each_expr_id(test, f);
            if let Some(m) = msg {
                for_each_expr_id(m, f);
            }
        }
        StmtKind::Assign { targets, value } => {
            for t in targets {
                for_each_expr_id(t, f);
            }
            for_each_expr_id(value, f);
        }
        StmtKind::AugAssign { target, value, .. } => {
            for_each_expr_id(target, f);
            for_each_expr_id(value, f);
        }
        StmtKind::Branch { test, .. } => for_each_expr_id(test, f),
        StmtKind::Break | StmtKind::Continue | StmtKind::Pass | StmtKind::Global { .. } => {}
        StmtKind::ClassDef {
            bases,
            decorator_list,
            body,
            ..
        } => {
            for e in bases.iter().chain(decorator_list) {
                for_each_expr_id(e, f);
            }
            for s in body {
                for_each_stmt_id(s, f);
            }
        }
        StmtKind::Delete { targets } => {
            for t in targets {
                for_each_expr_id(t, f);
            }
        }
        StmtKind::Exec {
            body,
            globals,
            locals,
        } => {
            for_each_expr_id(body, f);
            for e in [globals, locals].into_iter().flatten() {
                for_each_expr_id(e, f);
            }
        }
        StmtKind::Expr { value } => for_each_expr_id(value, f),
        StmtKind::For {
            target,
            iter,
            body,
            orelse,
        } => {
            for_each_expr_id(target, f);
            for_each_expr_id(iter, f);
            for s in body.iter().chain(orelse) {
                for_each_stmt_id(s, f);
            }
        }
        StmtKind::FunctionDef {
            args,
            body,
            decorator_list,
            ..
        } => {
            for_each_arguments_id(args, f);
            for e in decorator_list {
                for_each_expr_id(e, f);
            }
            for s in body {
                for_each_stmt_id(s, f);
            }
        }
        StmtKind::If { test, body, orelse } => {
            for_each_expr_id(test, f);
            for s in body.iter().chain(orelse) {
                for_each_stmt_id(s, f);
            }
        }
        StmtKind::Import { names } => {
            for a in names {
                f(a.id);
            }
        }
        StmtKind::ImportFrom { names, .. } => {
            for a in names {
                f(a.id);
            }
        }
        StmtKind::Invoke { stmt, .. } => for_each_stmt_id(stmt, f),
        StmtKind::Jump { .. } => {}
        StmtKind::Print { dest, values, .. } => {
            if let Some(d) = dest {
                for_each_expr_id(d, f);
            }
            for v in values {
                for_each_expr_id(v, f);
            }
        }
        StmtKind::Raise { arg0, arg1, arg2 } => {
            for e in [arg0, arg1, arg2].into_iter().flatten() {
                for_each_expr_id(e, f);
            }
        }
        StmtKind::Return { value } => {
            if let Some(v) = value {
                for_each_expr_id(v, f);
            }
        }
        StmtKind::TryExcept {
            body,
            handlers,
            orelse,
        } => {
            for s in body.iter().chain(orelse) {
                for_each_stmt_id(s, f);
            }
            for h in handlers {
                if let Some(t) = &h.ty {
                    for_each_expr_id(t, f);
                }
                if let Some(n) = &h.name {
                    for_each_expr_id(n, f);
                }
                for s in &h.body {
                    for_each_stmt_id(s, f);
                }
            }
        }
        StmtKind::TryFinally { body, finalbody } => {
            for s in body.iter().chain(finalbody) {
                for_each_stmt_id(s, f);
            }
        }
        StmtKind::While { test, body, orelse } => {
            for_each_expr_id(test, f);
            for s in body.iter().chain(orelse) {
                for_each_stmt_id(s, f);
            }
        }
        StmtKind::With {
            context_expr,
            optional_vars,
            body,
        } => {
            for_each_expr_id(context_expr, f);
            if let Some(v) = optional_vars {
                for_each_expr_id(v, f);
            }
            for s in body {
                for_each_stmt_id(s, f);
            }
        }
    }
}
