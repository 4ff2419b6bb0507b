//! AST-to-CFG lowering
//!
//! [`build_cfg`] walks the statement AST once and emits basic blocks
//! over the reduced AST subset. The builder keeps a cursor to the
//! block currently being emitted into (`None` means the walk is in
//! unreachable code and emissions are silently discarded until a new
//! block is established), a stack of continuations for
//! `continue`/`break`/`return`, and a stack of active exception
//! handlers consulted on every emission.
//!
//! While a handler is active, any statement that can raise is pushed
//! as a two-successor `Invoke`; its exception edge goes through a
//! fresh trampoline block that captures the thrown triple and jumps to
//! the handler. The trampoline exists to break what would otherwise be
//! a critical edge into the shared handler block. When a protected
//! region turns out to raise through a single invoke, the merge pass
//! later fuses the handler into that trampoline; only the capture at
//! the top of the exception edge is a stable shape.

mod control_flow;
mod expr;
mod stmt;

use crate::ast::{
    CmpOp, Expr, ExprContext, ExprKind, NodeId, Number, PrimitiveOp, Stmt, StmtKind,
};
use crate::cfg::{BlockId, Cfg};
use crate::error::{LowerError, LowerResult};
use crate::interner::Symbol;
use crate::source::{RootKind, SourceInfo};
use control_flow::{ContInfo, ExcBlockInfo, Why};
use smallvec::SmallVec;
use std::sync::OnceLock;

/// Conventional name carrying a pending return value into a `finally`.
const RETURN_NAME: &str = "#rtnval";

fn verbosity() -> u8 {
    static LEVEL: OnceLock<u8> = OnceLock::new();
    *LEVEL.get_or_init(|| {
        std::env::var("OPAL_VERBOSE_CFG")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(0)
    })
}

struct CfgBuilder<'a> {
    source: &'a mut SourceInfo,
    cfg: Cfg,
    /// Block being emitted into; `None` while in unreachable code.
    curblock: Option<BlockId>,
    continuations: SmallVec<[ContInfo; 4]>,
    exc_handlers: SmallVec<[ExcBlockInfo; 4]>,
}

impl<'a> CfgBuilder<'a> {
    fn new(source: &'a mut SourceInfo) -> Self {
        let mut cfg = Cfg::new();
        let entry = cfg.add_block();
        cfg.set_info(entry, "entry");
        CfgBuilder {
            source,
            cfg,
            curblock: Some(entry),
            continuations: SmallVec::new(),
            exc_handlers: SmallVec::new(),
        }
    }

    fn root_kind(&self) -> RootKind {
        self.source.root_kind
    }

    fn intern(&mut self, s: &str) -> Symbol {
        self.source.intern(s)
    }

    // ---------- node construction ----------

    fn expr(&self, kind: ExprKind) -> Expr {
        self.source.nodes.expr(kind)
    }

    fn stmt(&self, kind: StmtKind) -> Stmt {
        self.source.nodes.stmt(kind)
    }

    fn make_name(&self, sym: Symbol, ctx: ExprContext) -> Expr {
        self.expr(ExprKind::Name { sym, ctx })
    }

    fn make_load(&self, sym: Symbol) -> Expr {
        self.make_name(sym, ExprContext::Load)
    }

    fn make_store(&self, sym: Symbol) -> Expr {
        self.make_name(sym, ExprContext::Store)
    }

    fn make_num(&self, n: i64) -> Expr {
        self.expr(ExprKind::Num(Number::Int(n)))
    }

    fn make_str(&self, s: String) -> Expr {
        self.expr(ExprKind::Str(s))
    }

    fn make_load_attribute(&self, base: Expr, attr: Symbol, clsonly: bool) -> Expr {
        if clsonly {
            self.expr(ExprKind::ClsAttribute {
                value: Box::new(base),
                attr,
            })
        } else {
            self.expr(ExprKind::Attribute {
                value: Box::new(base),
                attr,
                ctx: ExprContext::Load,
            })
        }
    }

    fn make_call(&self, func: Expr, args: Vec<Expr>) -> Expr {
        self.expr(ExprKind::Call {
            func: Box::new(func),
            args,
            keywords: Vec::new(),
            starargs: None,
            kwargs: None,
        })
    }

    fn make_compare_eq(&self, left: Expr, right: Expr) -> Expr {
        self.expr(ExprKind::Compare {
            ops: vec![CmpOp::Eq],
            left: Box::new(left),
            comparators: vec![right],
        })
    }

    fn make_expr_stmt(&self, value: Expr) -> Stmt {
        self.stmt(StmtKind::Expr { value })
    }

    // ---------- temporaries ----------

    fn node_name(&mut self, node: NodeId) -> Symbol {
        self.source.intern(&format!("#{node}"))
    }

    fn node_name_sfx(&mut self, node: NodeId, suffix: &str) -> Symbol {
        self.source.intern(&format!("#{node}_{suffix}"))
    }

    fn node_name_idx(&mut self, node: NodeId, suffix: &str, i: usize) -> Symbol {
        self.source.intern(&format!("#{node}_{suffix}_{i}"))
    }

    fn is_temp(&self, sym: Symbol) -> bool {
        self.source.interner.is_temporary(sym)
    }

    /// Structural copy of a primitive operand (temp names and
    /// constants), with a fresh node id. The same output node must
    /// never appear in two places, so values needed twice are
    /// duplicated rather than aliased.
    fn dup(&self, val: &Expr) -> Expr {
        match &val.kind {
            ExprKind::Name { sym, ctx } => self.make_name(*sym, *ctx),
            ExprKind::Num(n) => self.expr(ExprKind::Num(n.clone())),
            ExprKind::Str(s) => self.expr(ExprKind::Str(s.clone())),
            ExprKind::Index { value } => {
                let inner = self.dup(value);
                self.expr(ExprKind::Index {
                    value: Box::new(inner),
                })
            }
            other => panic!("cannot duplicate non-primitive operand {other:?}"),
        }
    }

    fn dup_opt(&self, val: &Option<Expr>) -> Option<Expr> {
        val.as_ref().map(|e| self.dup(e))
    }

    // ---------- emission ----------

    /// Append a statement to the current block, wrapping it in a
    /// two-successor `Invoke` when an exception handler is active and
    /// the statement can raise. No-op in unreachable code.
    fn push(&mut self, stmt: Stmt) {
        let Some(cur) = self.curblock else { return };
        debug_assert!(!matches!(stmt.kind, StmtKind::Invoke { .. }));

        if self.exc_handlers.is_empty() {
            self.cfg.block_mut(cur).body.push(stmt);
            return;
        }

        let exempt = match &stmt.kind {
            StmtKind::Jump { .. } | StmtKind::Return { .. } => true,
            StmtKind::Branch { test, .. } => {
                assert!(
                    matches!(test.kind, ExprKind::Name { .. } | ExprKind::Num(_)),
                    "unflattened branch test under an active exception handler: {:?}",
                    test.kind
                );
                true
            }
            StmtKind::Assign { targets, value } => {
                assert_eq!(targets.len(), 1);
                if let ExprKind::Name { sym, .. } = &targets[0].kind {
                    let value_is_trivial = match &value.kind {
                        ExprKind::Name { sym: v, .. } => self.is_temp(*v),
                        ExprKind::Num(_) | ExprKind::Str(_) => true,
                        _ => false,
                    };
                    if !self.is_temp(*sym) {
                        // User-visible stores only ever receive
                        // already-computed operands.
                        debug_assert!(
                            value_is_trivial,
                            "non-trivial assignment to a user name under an active \
                             exception handler: {:?}",
                            value.kind
                        );
                        true
                    } else {
                        value_is_trivial
                    }
                } else {
                    false
                }
            }
            _ => false,
        };

        if exempt {
            self.cfg.block_mut(cur).body.push(stmt);
            return;
        }

        // A raise has no normal successor; aliasing both destinations
        // keeps every multi-successor edge on a single-predecessor
        // target.
        let is_raise = matches!(stmt.kind, StmtKind::Raise { .. });
        let normal_dest = self.cfg.add_block();
        let exc_dest = if is_raise {
            normal_dest
        } else {
            self.cfg.add_block()
        };

        let invoke = self.stmt(StmtKind::Invoke {
            stmt: Box::new(stmt),
            normal_dest,
            exc_dest,
        });
        self.cfg.block_mut(cur).body.push(invoke);
        self.cfg.connect(cur, normal_dest, false);
        if !is_raise {
            self.cfg.connect(cur, exc_dest, false);
        }

        let exc_info = *self.exc_handlers.last().unwrap();
        self.curblock = Some(exc_dest);
        let ty = self.make_name(exc_info.exc_type_name, ExprContext::Store);
        let val = self.make_name(exc_info.exc_value_name, ExprContext::Store);
        let tb = self.make_name(exc_info.exc_traceback_name, ExprContext::Store);
        let target = self.expr(ExprKind::Tuple {
            elts: vec![ty, val, tb],
            ctx: ExprContext::Store,
        });
        let pad = self.expr(ExprKind::LangPrimitive {
            op: PrimitiveOp::Landingpad,
            args: Vec::new(),
        });
        let capture = self.stmt(StmtKind::Assign {
            targets: vec![target],
            value: pad,
        });
        // The landing-pad capture is the one emission that bypasses
        // the rewriter; it cannot itself raise.
        self.cfg.block_mut(exc_dest).body.push(capture);
        self.push_jump(exc_info.exc_dest, false);

        self.curblock = if is_raise { None } else { Some(normal_dest) };
    }

    /// Emit a jump terminator and connect the edge; the cursor
    /// becomes absent.
    fn push_jump(&mut self, target: BlockId, allow_backedge: bool) {
        let jump = self.stmt(StmtKind::Jump { target });
        self.push(jump);
        let cur = self.curblock.expect("jump emitted from unreachable code");
        self.cfg.connect(cur, target, allow_backedge);
        self.curblock = None;
    }

    /// Emit a truth-tested branch to two *deferred* blocks. Deferral
    /// is required because flattening the test may itself generate
    /// blocks before the branch is emitted.
    fn push_branch(&mut self, test: Expr, iftrue: BlockId, iffalse: BlockId) {
        assert!(!self.cfg.block(iftrue).is_placed());
        assert!(!self.cfg.block(iffalse).is_placed());
        let test = self.call_nonzero(test);
        let cur = self.curblock.expect("branch emitted from unreachable code");
        self.cfg.connect(cur, iftrue, false);
        self.cfg.connect(cur, iffalse, false);
        let br = self.stmt(StmtKind::Branch {
            test,
            iftrue,
            iffalse,
        });
        self.push(br);
        self.curblock = None;
    }

    /// Wrap an expression in the truth-test primitive. With an active
    /// exception handler the test is flattened into a temporary so
    /// the eventual branch test is a bare name.
    fn call_nonzero(&mut self, e: Expr) -> Expr {
        let e_id = e.id;
        let call = self.expr(ExprKind::LangPrimitive {
            op: PrimitiveOp::Nonzero,
            args: vec![e],
        });
        if self.exc_handlers.is_empty() {
            return call;
        }
        let name = self.node_name(e_id);
        self.push_assign_name(name, call);
        self.make_load(name)
    }

    /// Emit an assignment to an arbitrary target, remapping the
    /// target's addressing sub-expressions and flattening compound
    /// targets into per-element temporaries.
    fn push_assign(&mut self, target: Expr, value: Expr) {
        let Expr {
            id: target_id,
            kind: target_kind,
        } = target;
        match target_kind {
            ExprKind::Name { sym, ctx } => {
                let t = Expr {
                    id: target_id,
                    kind: ExprKind::Name { sym, ctx },
                };
                let assign = self.stmt(StmtKind::Assign {
                    targets: vec![t],
                    value,
                });
                self.push(assign);
            }
            ExprKind::Subscript {
                value: obj, slice, ..
            } => {
                let obj = self.remap_expr(*obj, true);
                let slice = self.remap_expr(*slice, true);
                let t = self.expr(ExprKind::Subscript {
                    value: Box::new(obj),
                    slice: Box::new(slice),
                    ctx: ExprContext::Store,
                });
                let assign = self.stmt(StmtKind::Assign {
                    targets: vec![t],
                    value,
                });
                self.push(assign);
            }
            ExprKind::Attribute {
                value: obj, attr, ..
            } => {
                let obj = self.remap_expr(*obj, true);
                let attr = self.source.mangle_name(attr);
                let t = self.expr(ExprKind::Attribute {
                    value: Box::new(obj),
                    attr,
                    ctx: ExprContext::Store,
                });
                let assign = self.stmt(StmtKind::Assign {
                    targets: vec![t],
                    value,
                });
                self.push(assign);
            }
            ExprKind::Tuple { elts, .. } | ExprKind::List { elts, .. } => {
                let mut tmp_names = Vec::with_capacity(elts.len());
                let mut tmp_targets = Vec::with_capacity(elts.len());
                for i in 0..elts.len() {
                    let name = self.node_name_idx(target_id, "", i);
                    tmp_names.push(name);
                    tmp_targets.push(self.make_store(name));
                }
                let new_target = self.expr(ExprKind::Tuple {
                    elts: tmp_targets,
                    ctx: ExprContext::Store,
                });
                let assign = self.stmt(StmtKind::Assign {
                    targets: vec![new_target],
                    value,
                });
                self.push(assign);
                for (elt, name) in elts.into_iter().zip(tmp_names) {
                    let load = self.make_load(name);
                    self.push_assign(elt, load);
                }
            }
            other => panic!("unsupported assignment target {other:?}"),
        }
    }

    fn push_assign_name(&mut self, name: Symbol, value: Expr) {
        let target = self.make_store(name);
        self.push_assign(target, value);
    }

    // ---------- continuations ----------

    fn push_loop_continuation(&mut self, continue_dest: BlockId, break_dest: BlockId) {
        self.continuations
            .push(ContInfo::for_loop(continue_dest, break_dest));
    }

    fn push_finally_continuation(&mut self, finally_block: BlockId, why_name: Symbol) {
        self.continuations
            .push(ContInfo::for_finally(finally_block, why_name));
    }

    fn pop_continuation(&mut self) -> ContInfo {
        self.continuations.pop().expect("continuation stack underflow")
    }

    /// Jump to the nearest continuation that accepts a `return`,
    /// stashing the value in the conventional name; with none on the
    /// stack, emit a plain return terminator.
    fn do_return(&mut self, value: Expr) {
        for i in (0..self.continuations.len()).rev() {
            let cont = self.continuations[i];
            if let Some(dest) = cont.return_dest {
                if cont.say_why {
                    let why_name = cont.why_name.expect("say_why without a why name");
                    let num = self.make_num(Why::Return.as_i64());
                    self.push_assign_name(why_name, num);
                    self.continuations[i].did_why.insert(Why::Return);
                }
                let rtn = self.intern(RETURN_NAME);
                self.push_assign_name(rtn, value);
                self.push_jump(dest, false);
                return;
            }
        }
        let stmt = self.stmt(StmtKind::Return { value: Some(value) });
        self.push(stmt);
        self.curblock = None;
    }

    /// Jump to the nearest continuation that accepts a `continue`.
    fn do_continue(&mut self) -> LowerResult<()> {
        for i in (0..self.continuations.len()).rev() {
            let cont = self.continuations[i];
            if let Some(dest) = cont.continue_dest {
                if cont.say_why {
                    let why_name = cont.why_name.expect("say_why without a why name");
                    let num = self.make_num(Why::Continue.as_i64());
                    self.push_assign_name(why_name, num);
                    self.continuations[i].did_why.insert(Why::Continue);
                }
                self.push_jump(dest, true);
                return Ok(());
            }
        }
        Err(LowerError::ContinueOutsideLoop)
    }

    /// Jump to the nearest continuation that accepts a `break`.
    fn do_break(&mut self) -> LowerResult<()> {
        for i in (0..self.continuations.len()).rev() {
            let cont = self.continuations[i];
            if let Some(dest) = cont.break_dest {
                if cont.say_why {
                    let why_name = cont.why_name.expect("say_why without a why name");
                    let num = self.make_num(Why::Break.as_i64());
                    self.push_assign_name(why_name, num);
                    self.continuations[i].did_why.insert(Why::Break);
                }
                self.push_jump(dest, true);
                return Ok(());
            }
        }
        Err(LowerError::BreakOutsideLoop)
    }

    /// One arm of a finally dispatch cascade: branch on
    /// `why == reason` into `then_block`, and return the (placed)
    /// fall-through block for the next comparison.
    fn make_finally_cont(&mut self, reason: Why, why_name: Symbol, then_block: BlockId) -> BlockId {
        let otherwise = self.cfg.add_deferred_block();
        self.cfg.set_info(otherwise, "finally_otherwise");
        let why_load = self.make_load(why_name);
        let num = self.make_num(reason.as_i64());
        let cmp = self.make_compare_eq(why_load, num);
        self.push_branch(cmp, then_block, otherwise);
        self.cfg.place_block(otherwise);
        otherwise
    }
}

/// Lower a compilation unit's statement list into a fresh CFG.
///
/// Class bodies get the `__module__`/`__doc__` prologue and end with
/// `Return(LOCALS)`; every other root gets a synthesised value-less
/// return so downstream never sees a fall-off-the-end block. The
/// structural invariants are asserted (debug builds) and trivially
/// joinable blocks merged before the graph is handed back.
pub fn build_cfg(source: &mut SourceInfo, body: Vec<Stmt>) -> LowerResult<Cfg> {
    let root_kind = source.root_kind;
    let mut builder = CfgBuilder::new(source);
    let mut body = body;

    if root_kind == RootKind::ClassDef {
        // A class body always starts with `__module__ = __name__`.
        let module_sym = builder.intern("__module__");
        let module_name = builder.source.module_name.clone();
        let target = builder.make_store(module_sym);
        let value = builder.make_str(module_name);
        let assign = builder.stmt(StmtKind::Assign {
            targets: vec![target],
            value,
        });
        builder.push(assign);

        // A leading string expression becomes `__doc__`.
        let is_docstring = matches!(
            body.first().map(|s| &s.kind),
            Some(StmtKind::Expr {
                value: Expr {
                    kind: ExprKind::Str(_),
                    ..
                }
            })
        );
        if is_docstring {
            let first = body.remove(0);
            let StmtKind::Expr { value } = first.kind else {
                unreachable!()
            };
            let doc_sym = builder.intern("__doc__");
            let target = builder.make_store(doc_sym);
            let assign = builder.stmt(StmtKind::Assign {
                targets: vec![target],
                value,
            });
            builder.push(assign);
        }
    }

    for stmt in body {
        builder.lower_stmt(stmt)?;
    }

    // Class bodies evaluate to a mapping of their locals; everything
    // else gets a synthesised final return.
    if root_kind == RootKind::ClassDef {
        let locals = builder.expr(ExprKind::LangPrimitive {
            op: PrimitiveOp::Locals,
            args: Vec::new(),
        });
        let rtn = builder.stmt(StmtKind::Return {
            value: Some(locals),
        });
        builder.push(rtn);
    } else {
        let rtn = builder.stmt(StmtKind::Return { value: None });
        builder.push(rtn);
    }

    debug_assert!(builder.continuations.is_empty(), "unbalanced continuations");
    debug_assert!(builder.exc_handlers.is_empty(), "unbalanced exception handlers");

    let mut cfg = builder.cfg;
    if verbosity() >= 2 {
        eprintln!(
            "Before cfg checking and transformations:\n{}",
            cfg.pretty_print(&source.interner)
        );
    }
    if cfg!(debug_assertions) {
        if let Err(msg) = cfg.validate() {
            panic!("cfg invariant violated: {msg}");
        }
    }

    cfg.merge_trivial_blocks();
    if verbosity() >= 1 {
        eprintln!("Final cfg:\n{}", cfg.pretty_print(&source.interner));
    }
    Ok(cfg)
}
