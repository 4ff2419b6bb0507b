//! Statement lowering
//!
//! One strategy per statement kind. Structured control flow becomes
//! blocks joined by jumps and branches; `break`/`continue`/`return`
//! resolve through the continuation stack; `try`/`with` cooperate
//! with the exception-handler stack and the why-tag dispatch the
//! `finally` epilogues run.

use super::control_flow::{ExcBlockInfo, Why};
use super::{CfgBuilder, RETURN_NAME};
use crate::ast::{
    Alias, Arguments, ExceptHandler, Expr, ExprContext, ExprKind, NodeId, PrimitiveOp, Stmt,
    StmtKind,
};
use crate::error::{LowerError, LowerResult};
use crate::interner::Symbol;
use crate::source::{FutureFlags, RootKind};

impl CfgBuilder<'_> {
    /// Lower one statement into the current block, consuming it.
    pub(super) fn lower_stmt(&mut self, stmt: Stmt) -> LowerResult<()> {
        // `exec` is rejected outright, and a misplaced `return` is an
        // error even in unreachable code; everything else emitted
        // while the cursor is absent is silently discarded.
        match &stmt.kind {
            StmtKind::Exec { .. } => return Err(LowerError::ExecNotSupported),
            StmtKind::Return { .. } => {}
            _ if self.curblock.is_none() => return Ok(()),
            _ => {}
        }

        let Stmt { id, kind } = stmt;
        match kind {
            StmtKind::Assert { test, msg } => {
                self.lower_assert(test, msg);
                Ok(())
            }
            StmtKind::Assign { targets, value } => {
                self.lower_assign(targets, value);
                Ok(())
            }
            StmtKind::AugAssign { target, op, value } => {
                self.lower_aug_assign(id, target, op, value);
                Ok(())
            }
            StmtKind::Branch { .. } | StmtKind::Invoke { .. } | StmtKind::Jump { .. } => {
                panic!("lowering output fed back as input")
            }
            StmtKind::Break => self.do_break(),
            StmtKind::ClassDef {
                name,
                bases,
                decorator_list,
                body,
            } => {
                self.lower_class_def(id, name, bases, decorator_list, body);
                Ok(())
            }
            StmtKind::Continue => self.do_continue(),
            StmtKind::Delete { targets } => {
                self.lower_delete(targets);
                Ok(())
            }
            StmtKind::Exec { .. } => unreachable!(),
            StmtKind::Expr { value } => {
                let value = self.remap_expr(value, false);
                let stmt = self.make_expr_stmt(value);
                self.push(stmt);
                Ok(())
            }
            StmtKind::For {
                target,
                iter,
                body,
                orelse,
            } => self.lower_for(id, target, iter, body, orelse),
            StmtKind::FunctionDef {
                name,
                args,
                body,
                decorator_list,
            } => {
                self.lower_function_def(id, name, args, body, decorator_list);
                Ok(())
            }
            StmtKind::Global { names } => {
                self.push(Stmt {
                    id,
                    kind: StmtKind::Global { names },
                });
                Ok(())
            }
            StmtKind::If { test, body, orelse } => self.lower_if(test, body, orelse),
            StmtKind::Import { names } => {
                self.lower_import(names);
                Ok(())
            }
            StmtKind::ImportFrom {
                module,
                names,
                level,
            } => {
                self.lower_import_from(id, module, names, level);
                Ok(())
            }
            StmtKind::Pass => Ok(()),
            StmtKind::Print { dest, values, nl } => {
                self.lower_print(dest, values, nl);
                Ok(())
            }
            StmtKind::Raise { arg0, arg1, arg2 } => {
                self.lower_raise(arg0, arg1, arg2);
                Ok(())
            }
            StmtKind::Return { value } => self.lower_return(value),
            StmtKind::TryExcept {
                body,
                handlers,
                orelse,
            } => self.lower_try_except(id, body, handlers, orelse),
            StmtKind::TryFinally { body, finalbody } => {
                self.lower_try_finally(id, body, finalbody)
            }
            StmtKind::While { test, body, orelse } => self.lower_while(test, body, orelse),
            StmtKind::With {
                context_expr,
                optional_vars,
                body,
            } => self.lower_with(id, context_expr, optional_vars, body),
        }
    }

    fn lower_return(&mut self, value: Option<Expr>) -> LowerResult<()> {
        // Also legal in eval strings, which get an implicit return.
        match self.root_kind() {
            RootKind::FunctionDef | RootKind::Lambda | RootKind::Expression => {}
            RootKind::Module | RootKind::ClassDef => {
                return Err(LowerError::ReturnOutsideFunction)
            }
        }
        if self.curblock.is_none() {
            return Ok(());
        }
        let value = match value {
            Some(v) => self.remap_expr(v, true),
            None => {
                let none = self.intern("None");
                self.make_load(none)
            }
        };
        self.do_return(value);
        Ok(())
    }

    fn lower_assign(&mut self, targets: Vec<Expr>, value: Expr) {
        let remapped = self.remap_expr(value, true);
        for target in targets {
            let val = self.dup(&remapped);
            self.push_assign(target, val);
        }
    }

    /// `x OP= v`: evaluate the target's value once, evaluate the
    /// right-hand side, combine with an aug-binop, and store back
    /// re-evaluating only the target's addressing expressions.
    fn lower_aug_assign(
        &mut self,
        id: NodeId,
        target: Expr,
        op: crate::ast::BinaryOp,
        value: Expr,
    ) {
        let (remapped_target, remapped_lhs) = match target.kind {
            ExprKind::Name { sym, ctx } => {
                let n_name = self.node_name(target.id);
                let load = self.make_load(sym);
                self.push_assign_name(n_name, load);
                let t = Expr {
                    id: target.id,
                    kind: ExprKind::Name { sym, ctx },
                };
                (t, self.make_load(n_name))
            }
            ExprKind::Subscript { value, slice, .. } => {
                let obj = self.remap_expr(*value, true);
                let sub = self.remap_expr(*slice, true);
                let obj_dup = self.dup(&obj);
                let sub_dup = self.dup(&sub);
                let t = self.expr(ExprKind::Subscript {
                    value: Box::new(obj),
                    slice: Box::new(sub),
                    ctx: ExprContext::Store,
                });
                let lhs = self.expr(ExprKind::Subscript {
                    value: Box::new(obj_dup),
                    slice: Box::new(sub_dup),
                    ctx: ExprContext::Load,
                });
                let lhs = self.remap_expr(lhs, true);
                (t, lhs)
            }
            ExprKind::Attribute { value, attr, .. } => {
                let obj = self.remap_expr(*value, true);
                let obj_dup = self.dup(&obj);
                let t = self.expr(ExprKind::Attribute {
                    value: Box::new(obj),
                    attr,
                    ctx: ExprContext::Store,
                });
                let lhs = self.expr(ExprKind::Attribute {
                    value: Box::new(obj_dup),
                    attr,
                    ctx: ExprContext::Load,
                });
                let lhs = self.remap_expr(lhs, true);
                (t, lhs)
            }
            other => panic!("unsupported augmented-assignment target {other:?}"),
        };

        let rhs = self.remap_expr(value, true);
        let binop = self.expr(ExprKind::AugBinOp {
            op,
            left: Box::new(remapped_lhs),
            right: Box::new(rhs),
        });
        let name = self.node_name(id);
        self.push_assign_name(name, binop);
        let load = self.make_load(name);
        self.push_assign(remapped_target, load);
    }

    fn lower_delete(&mut self, targets: Vec<Expr>) {
        for t in targets {
            let Expr { id: t_id, kind } = t;
            match kind {
                ExprKind::Subscript { value, slice, .. } => {
                    let value = self.remap_expr(*value, true);
                    let slice = self.remap_expr(*slice, true);
                    let target = self.expr(ExprKind::Subscript {
                        value: Box::new(value),
                        slice: Box::new(slice),
                        ctx: ExprContext::Del,
                    });
                    let stmt = self.stmt(StmtKind::Delete {
                        targets: vec![target],
                    });
                    self.push(stmt);
                }
                ExprKind::Attribute { value, attr, .. } => {
                    let value = self.remap_expr(*value, true);
                    let attr = self.source.mangle_name(attr);
                    let target = self.expr(ExprKind::Attribute {
                        value: Box::new(value),
                        attr,
                        ctx: ExprContext::Del,
                    });
                    let stmt = self.stmt(StmtKind::Delete {
                        targets: vec![target],
                    });
                    self.push(stmt);
                }
                ExprKind::Name { sym, ctx } => {
                    let target = Expr {
                        id: t_id,
                        kind: ExprKind::Name { sym, ctx },
                    };
                    let stmt = self.stmt(StmtKind::Delete {
                        targets: vec![target],
                    });
                    self.push(stmt);
                }
                ExprKind::List { elts, .. } | ExprKind::Tuple { elts, .. } => {
                    self.lower_delete(elts);
                }
                other => panic!("unsupported del target {other:?}"),
            }
        }
    }

    /// One reduced `Print` per value; only the last one carries the
    /// original trailing-newline flag.
    fn lower_print(&mut self, dest: Option<Expr>, values: Vec<Expr>, nl: bool) {
        let dest = self.remap_expr_opt(dest, true);

        if values.is_empty() {
            debug_assert!(nl);
            let stmt = self.stmt(StmtKind::Print {
                dest,
                values: Vec::new(),
                nl,
            });
            self.push(stmt);
            return;
        }

        let n = values.len();
        for (i, v) in values.into_iter().enumerate() {
            let d = self.dup_opt(&dest);
            let nl_here = if i < n - 1 { false } else { nl };
            let value = self.remap_expr(v, true);
            let stmt = self.stmt(StmtKind::Print {
                dest: d,
                values: vec![value],
                nl: nl_here,
            });
            self.push(stmt);
        }
    }

    fn lower_raise(&mut self, arg0: Option<Expr>, arg1: Option<Expr>, arg2: Option<Expr>) {
        let arg0 = self.remap_expr_opt(arg0, true);
        let arg1 = self.remap_expr_opt(arg1, true);
        let arg2 = self.remap_expr_opt(arg2, true);
        let stmt = self.stmt(StmtKind::Raise { arg0, arg1, arg2 });
        self.push(stmt);
        self.curblock = None;
    }

    /// The fail arm re-raises through the runtime's assert path (a
    /// synthesised always-false test) and then parks in a self-looping
    /// unreachable block; the pass arm is where lowering resumes.
    fn lower_assert(&mut self, test: Expr, msg: Option<Expr>) {
        let remapped = self.remap_expr(test, true);
        let test = self.call_nonzero(remapped);
        let cur = self.curblock.expect("assert in unreachable code");

        let iffalse = self.cfg.add_block();
        self.cfg.set_info(iffalse, "assert_fail");
        self.cfg.connect(cur, iffalse, false);
        let iftrue = self.cfg.add_block();
        self.cfg.set_info(iftrue, "assert_pass");
        self.cfg.connect(cur, iftrue, false);
        let br = self.stmt(StmtKind::Branch {
            test,
            iftrue,
            iffalse,
        });
        self.push(br);

        self.curblock = Some(iffalse);
        let msg = self.remap_expr_opt(msg, true);
        let fake_test = self.make_num(0);
        let remapped_assert = self.stmt(StmtKind::Assert {
            test: fake_test,
            msg,
        });
        self.push(remapped_assert);

        let unreachable = self.cfg.add_block();
        self.cfg.set_info(unreachable, "unreachable");
        self.push_jump(unreachable, false);
        self.curblock = Some(unreachable);
        self.push_jump(unreachable, true);

        self.curblock = Some(iftrue);
    }

    fn lower_if(&mut self, test: Expr, body: Vec<Stmt>, orelse: Vec<Stmt>) -> LowerResult<()> {
        let remapped = self.remap_expr(test, true);
        let test = self.call_nonzero(remapped);
        let starting_block = self.curblock.expect("if in unreachable code");

        let exit = self.cfg.add_deferred_block();
        self.cfg.set_info(exit, "ifexit");

        let iftrue = self.cfg.add_block();
        self.cfg.set_info(iftrue, "iftrue");
        let iffalse = self.cfg.add_deferred_block();
        self.cfg.set_info(iffalse, "iffalse");

        let br = self.stmt(StmtKind::Branch {
            test,
            iftrue,
            iffalse,
        });
        self.push(br);
        self.cfg.connect(starting_block, iftrue, false);

        self.curblock = Some(iftrue);
        for s in body {
            self.lower_stmt(s)?;
        }
        if self.curblock.is_some() {
            self.push_jump(exit, false);
        }

        self.cfg.place_block(iffalse);
        self.cfg.connect(starting_block, iffalse, false);
        self.curblock = Some(iffalse);
        for s in orelse {
            self.lower_stmt(s)?;
        }
        if self.curblock.is_some() {
            self.push_jump(exit, false);
        }

        if self.cfg.block(exit).predecessors.is_empty() {
            self.cfg.discard_block(exit);
            self.curblock = None;
        } else {
            self.cfg.place_block(exit);
            self.curblock = Some(exit);
        }
        Ok(())
    }

    fn lower_while(&mut self, test: Expr, body: Vec<Stmt>, orelse: Vec<Stmt>) -> LowerResult<()> {
        let test_block = self.cfg.add_block();
        self.cfg.set_info(test_block, "while_test");
        self.push_jump(test_block, false);
        self.curblock = Some(test_block);

        // Flattening the test can spill into fresh blocks; the branch
        // is emitted wherever it ends up.
        let remapped = self.remap_expr(test, true);
        let test = self.call_nonzero(remapped);
        let test_block_end = self.curblock.expect("while in unreachable code");

        // Break targets this before it is placed; it lands after the
        // orelse.
        let end = self.cfg.add_deferred_block();
        self.cfg.set_info(end, "while_exit");
        self.push_loop_continuation(test_block, end);

        let body_block = self.cfg.add_block();
        self.cfg.set_info(body_block, "while_body_start");
        let orelse_block = self.cfg.add_deferred_block();
        self.cfg.set_info(orelse_block, "while_orelse_start");

        let br = self.stmt(StmtKind::Branch {
            test,
            iftrue: body_block,
            iffalse: orelse_block,
        });
        self.push(br);
        self.cfg.connect(test_block_end, body_block, false);

        self.curblock = Some(body_block);
        for s in body {
            self.lower_stmt(s)?;
        }
        if self.curblock.is_some() {
            self.push_jump(test_block, true);
        }
        self.pop_continuation();

        self.cfg.place_block(orelse_block);
        self.cfg.connect(test_block_end, orelse_block, false);
        self.curblock = Some(orelse_block);
        for s in orelse {
            self.lower_stmt(s)?;
        }
        if self.curblock.is_some() {
            self.push_jump(end, false);
        }

        // With no break and an orelse that never falls through, the
        // exit is unreachable.
        if self.cfg.block(end).predecessors.is_empty() {
            self.cfg.discard_block(end);
            self.curblock = None;
        } else {
            self.cfg.place_block(end);
            self.curblock = Some(end);
        }
        Ok(())
    }

    /// Loop-inversion shape: a pre-test decides entry, and each body
    /// iteration re-tests inline before jumping back, so no edge is
    /// critical. Iteration goes through the class-slot
    /// `__hasnext__`/`next` protocol.
    fn lower_for(
        &mut self,
        id: NodeId,
        target: Expr,
        iter: Expr,
        body: Vec<Stmt>,
        orelse: Vec<Stmt>,
    ) -> LowerResult<()> {
        let remapped_iter = self.remap_expr(iter, true);
        let iter_call = self.expr(ExprKind::LangPrimitive {
            op: PrimitiveOp::GetIter,
            args: vec![remapped_iter],
        });
        let itername = self.source.intern(&format!("#iter_{id}"));
        self.push_assign_name(itername, iter_call);

        let test_block = self.cfg.add_block();
        self.push_jump(test_block, false);
        self.curblock = Some(test_block);

        let test = self.make_hasnext_test(itername);
        let cur = self.curblock.expect("for in unreachable code");
        let test_true = self.cfg.add_block();
        let test_false = self.cfg.add_block();
        let br = self.stmt(StmtKind::Branch {
            test,
            iftrue: test_true,
            iffalse: test_false,
        });
        self.push(br);
        self.cfg.connect(cur, test_true, false);
        self.cfg.connect(cur, test_false, false);

        let loop_block = self.cfg.add_block();
        let end_block = self.cfg.add_deferred_block();
        let else_block = self.cfg.add_deferred_block();

        self.curblock = Some(test_true);
        self.push_jump(loop_block, false);
        self.curblock = Some(test_false);
        self.push_jump(else_block, false);

        self.push_loop_continuation(test_block, end_block);

        self.curblock = Some(loop_block);
        let next_sym = self.intern("next");
        let iter_load = self.make_load(itername);
        let next_attr = self.make_load_attribute(iter_load, next_sym, true);
        let next_attr_id = next_attr.id;
        let next_call = self.make_call(next_attr, Vec::new());
        let next_name = self.node_name(next_attr_id);
        self.push_assign_name(next_name, next_call);
        let next_load = self.make_load(next_name);
        self.push_assign(target, next_load);

        for s in body {
            self.lower_stmt(s)?;
        }
        self.pop_continuation();

        if self.curblock.is_some() {
            let test = self.make_hasnext_test(itername);
            let cur = self.curblock.expect("for body end in unreachable code");
            let end_true = self.cfg.add_block();
            let end_false = self.cfg.add_block();
            let br = self.stmt(StmtKind::Branch {
                test,
                iftrue: end_true,
                iffalse: end_false,
            });
            self.push(br);
            self.cfg.connect(cur, end_true, false);
            self.cfg.connect(cur, end_false, false);

            self.curblock = Some(end_true);
            self.push_jump(loop_block, true);
            self.curblock = Some(end_false);
            self.push_jump(else_block, false);
        }

        self.cfg.place_block(else_block);
        self.curblock = Some(else_block);
        for s in orelse {
            self.lower_stmt(s)?;
        }
        if self.curblock.is_some() {
            self.push_jump(end_block, false);
        }

        if self.cfg.block(end_block).predecessors.is_empty() {
            self.cfg.discard_block(end_block);
            self.curblock = None;
        } else {
            self.cfg.place_block(end_block);
            self.curblock = Some(end_block);
        }
        Ok(())
    }

    fn make_hasnext_test(&mut self, itername: Symbol) -> Expr {
        let hasnext_sym = self.intern("__hasnext__");
        let iter_load = self.make_load(itername);
        let attr = self.make_load_attribute(iter_load, hasnext_sym, true);
        let call = self.make_call(attr, Vec::new());
        let remapped = self.remap_expr(call, true);
        self.call_nonzero(remapped)
    }

    fn lower_try_except(
        &mut self,
        id: NodeId,
        body: Vec<Stmt>,
        handlers: Vec<ExceptHandler>,
        orelse: Vec<Stmt>,
    ) -> LowerResult<()> {
        // The alternate parser emits a handler-less try inside a
        // try/finally; it is just the body.
        if handlers.is_empty() {
            debug_assert!(orelse.is_empty());
            for s in body {
                self.lower_stmt(s)?;
            }
            return Ok(());
        }

        let exc_handler_block = self.cfg.add_deferred_block();
        let exc_type_name = self.node_name_sfx(id, "type");
        let exc_value_name = self.node_name_sfx(id, "value");
        let exc_traceback_name = self.node_name_sfx(id, "traceback");
        self.exc_handlers.push(ExcBlockInfo {
            exc_dest: exc_handler_block,
            exc_type_name,
            exc_value_name,
            exc_traceback_name,
        });

        for s in body {
            self.lower_stmt(s)?;
        }
        self.exc_handlers.pop();

        // The orelse runs on the exception-free tail only.
        for s in orelse {
            self.lower_stmt(s)?;
        }

        let join_block = self.cfg.add_deferred_block();
        if self.curblock.is_some() {
            self.push_jump(join_block, false);
        }

        if self.cfg.block(exc_handler_block).predecessors.is_empty() {
            // Nothing in the body could raise.
            self.cfg.discard_block(exc_handler_block);
        } else {
            self.cfg.place_block(exc_handler_block);
            self.curblock = Some(exc_handler_block);

            let mut caught_all = false;
            for handler in handlers {
                assert!(
                    !caught_all,
                    "bare except clause not the last one in the list?"
                );
                let ExceptHandler { ty, name, body } = handler;

                let exc_next = if let Some(ty) = ty {
                    let handled_type = self.remap_expr(ty, true);
                    let exc_obj = self.make_load(exc_value_name);
                    let flag = self.make_num(1);
                    let is_caught = self.expr(ExprKind::LangPrimitive {
                        op: PrimitiveOp::IsInstance,
                        args: vec![exc_obj, handled_type, flag],
                    });
                    let is_caught = self.remap_expr(is_caught, true);
                    let test = self.call_nonzero(is_caught);

                    let exc_handle = self.cfg.add_block();
                    let exc_next = self.cfg.add_deferred_block();
                    let cur = self.curblock.expect("handler chain in unreachable code");
                    self.cfg.connect(cur, exc_handle, false);
                    self.cfg.connect(cur, exc_next, false);
                    let br = self.stmt(StmtKind::Branch {
                        test,
                        iftrue: exc_handle,
                        iffalse: exc_next,
                    });
                    self.push(br);
                    self.curblock = Some(exc_handle);
                    Some(exc_next)
                } else {
                    caught_all = true;
                    None
                };

                let ty_load = self.make_load(exc_type_name);
                let val_load = self.make_load(exc_value_name);
                let tb_load = self.make_load(exc_traceback_name);
                let set_exc = self.expr(ExprKind::LangPrimitive {
                    op: PrimitiveOp::SetExcInfo,
                    args: vec![ty_load, val_load, tb_load],
                });
                let stmt = self.make_expr_stmt(set_exc);
                self.push(stmt);

                if let Some(name) = name {
                    let exc_obj = self.make_load(exc_value_name);
                    self.push_assign(name, exc_obj);
                }

                for s in body {
                    self.lower_stmt(s)?;
                }
                if self.curblock.is_some() {
                    self.push_jump(join_block, false);
                }

                match exc_next {
                    Some(next) => {
                        self.cfg.place_block(next);
                        self.curblock = Some(next);
                    }
                    None => self.curblock = None,
                }
            }

            if !caught_all {
                let ty_load = self.make_load(exc_type_name);
                let val_load = self.make_load(exc_value_name);
                let tb_load = self.make_load(exc_traceback_name);
                let raise = self.stmt(StmtKind::Raise {
                    arg0: Some(ty_load),
                    arg1: Some(val_load),
                    arg2: Some(tb_load),
                });
                self.push(raise);
                self.curblock = None;
            }
        }

        if self.cfg.block(join_block).predecessors.is_empty() {
            self.cfg.discard_block(join_block);
            self.curblock = None;
        } else {
            self.cfg.place_block(join_block);
            self.curblock = Some(join_block);
        }
        Ok(())
    }

    fn lower_try_finally(
        &mut self,
        id: NodeId,
        body: Vec<Stmt>,
        finalbody: Vec<Stmt>,
    ) -> LowerResult<()> {
        let exc_handler_block = self.cfg.add_deferred_block();
        let exc_type_name = self.node_name_sfx(id, "type");
        let exc_value_name = self.node_name_sfx(id, "value");
        let exc_traceback_name = self.node_name_sfx(id, "traceback");
        let exc_why_name = self.node_name_sfx(id, "why");
        self.exc_handlers.push(ExcBlockInfo {
            exc_dest: exc_handler_block,
            exc_type_name,
            exc_value_name,
            exc_traceback_name,
        });

        let finally_block = self.cfg.add_deferred_block();
        self.push_finally_continuation(finally_block, exc_why_name);

        for s in body {
            self.lower_stmt(s)?;
        }
        self.exc_handlers.pop();
        let did_why = self.pop_continuation().did_why;

        if self.curblock.is_some() {
            let num = self.make_num(Why::Fallthrough.as_i64());
            self.push_assign_name(exc_why_name, num);
            self.push_jump(finally_block, false);
        }

        if self.cfg.block(exc_handler_block).predecessors.is_empty() {
            self.cfg.discard_block(exc_handler_block);
        } else {
            self.cfg.place_block(exc_handler_block);
            self.curblock = Some(exc_handler_block);
            let num = self.make_num(Why::Exception.as_i64());
            self.push_assign_name(exc_why_name, num);
            self.push_jump(finally_block, false);
        }

        self.cfg.place_block(finally_block);
        self.curblock = Some(finally_block);
        for s in finalbody {
            self.lower_stmt(s)?;
        }

        if self.curblock.is_some() {
            // Dispatch only on reasons the body actually used, then
            // always check for a pending exception to re-raise.
            if did_why.contains(Why::Return) {
                let doreturn = self.cfg.add_deferred_block();
                let otherwise = self.make_finally_cont(Why::Return, exc_why_name, doreturn);
                self.cfg.place_block(doreturn);
                self.curblock = Some(doreturn);
                let rtn = self.intern(RETURN_NAME);
                let load = self.make_load(rtn);
                self.do_return(load);
                self.curblock = Some(otherwise);
            }

            if did_why.contains(Why::Break) {
                let dobreak = self.cfg.add_deferred_block();
                let otherwise = self.make_finally_cont(Why::Break, exc_why_name, dobreak);
                self.cfg.place_block(dobreak);
                self.curblock = Some(dobreak);
                self.do_break()?;
                self.curblock = Some(otherwise);
            }

            if did_why.contains(Why::Continue) {
                let docontinue = self.cfg.add_deferred_block();
                let otherwise = self.make_finally_cont(Why::Continue, exc_why_name, docontinue);
                self.cfg.place_block(docontinue);
                self.curblock = Some(docontinue);
                self.do_continue()?;
                self.curblock = Some(otherwise);
            }

            let reraise = self.cfg.add_deferred_block();
            let noexc = self.make_finally_cont(Why::Exception, exc_why_name, reraise);
            self.cfg.place_block(reraise);
            self.curblock = Some(reraise);
            let ty_load = self.make_load(exc_type_name);
            let val_load = self.make_load(exc_value_name);
            let tb_load = self.make_load(exc_traceback_name);
            let raise = self.stmt(StmtKind::Raise {
                arg0: Some(ty_load),
                arg1: Some(val_load),
                arg2: Some(tb_load),
            });
            self.push(raise);

            self.curblock = Some(noexc);
        }
        Ok(())
    }

    /// The context-manager protocol: look up `__exit__`/`__enter__`
    /// as class slots, run the body under both an exception handler
    /// (which calls exit with the triple and either suppresses or
    /// re-raises) and a finally continuation (which calls exit with
    /// nones and re-dispatches break/continue/return).
    fn lower_with(
        &mut self,
        id: NodeId,
        context_expr: Expr,
        optional_vars: Option<Expr>,
        body: Vec<Stmt>,
    ) -> LowerResult<()> {
        let ctxmgrname = self.node_name_sfx(id, "ctxmgr");
        let exitname = self.node_name_sfx(id, "exit");
        let whyname = self.node_name_sfx(id, "why");
        let exc_type_name = self.node_name_sfx(id, "exc_type");
        let exc_value_name = self.node_name_sfx(id, "exc_value");
        let exc_traceback_name = self.node_name_sfx(id, "exc_traceback");
        let nonename = self.intern("None");

        let exit_block = self.cfg.add_deferred_block();
        self.cfg.set_info(exit_block, "with_exit");

        let mgr = self.remap_expr(context_expr, true);
        self.push_assign_name(ctxmgrname, mgr);

        let exit_sym = self.intern("__exit__");
        let mgr_load = self.make_load(ctxmgrname);
        let exit_attr = self.make_load_attribute(mgr_load, exit_sym, true);
        self.push_assign_name(exitname, exit_attr);

        let enter_sym = self.intern("__enter__");
        let mgr_load = self.make_load(ctxmgrname);
        let enter_attr = self.make_load_attribute(mgr_load, enter_sym, true);
        let enter_call = self.make_call(enter_attr, Vec::new());
        let enter = self.remap_expr(enter_call, true);
        match optional_vars {
            Some(var) => self.push_assign(var, enter),
            None => {
                let stmt = self.make_expr_stmt(enter);
                self.push(stmt);
            }
        }

        let finally_block = self.cfg.add_deferred_block();
        self.cfg.set_info(finally_block, "with_finally");
        self.push_finally_continuation(finally_block, whyname);

        let exc_block = self.cfg.add_deferred_block();
        self.cfg.set_info(exc_block, "with_exc");
        self.exc_handlers.push(ExcBlockInfo {
            exc_dest: exc_block,
            exc_type_name,
            exc_value_name,
            exc_traceback_name,
        });

        for s in body {
            self.lower_stmt(s)?;
        }

        self.exc_handlers.pop();
        let finally_did_why = self.pop_continuation().did_why;

        if self.curblock.is_some() {
            // Body finished normally.
            let num = self.make_num(Why::Fallthrough.as_i64());
            self.push_assign_name(whyname, num);
            self.push_jump(finally_block, false);
        }

        if self.cfg.block(exc_block).predecessors.is_empty() {
            self.cfg.discard_block(exc_block);
        } else {
            self.cfg.place_block(exc_block);
            self.curblock = Some(exc_block);

            // A truthy result from exit(mgr, type, value, tb)
            // suppresses the exception.
            let suppressname = self.node_name_sfx(id, "suppress");
            let exit_load = self.make_load(exitname);
            let ty_load = self.make_load(exc_type_name);
            let val_load = self.make_load(exc_value_name);
            let tb_load = self.make_load(exc_traceback_name);
            let call = self.make_call(exit_load, vec![ty_load, val_load, tb_load]);
            self.push_assign_name(suppressname, call);

            let reraise_block = self.cfg.add_deferred_block();
            self.cfg.set_info(reraise_block, "with_reraise");
            // Branching straight into the shared exit block would
            // make a critical edge; go through a trampoline.
            let exiter = self.cfg.add_deferred_block();
            self.cfg.set_info(exiter, "with_exiter");
            let suppress_load = self.make_load(suppressname);
            self.push_branch(suppress_load, exiter, reraise_block);

            self.cfg.place_block(exiter);
            self.curblock = Some(exiter);
            self.push_jump(exit_block, false);

            self.cfg.place_block(reraise_block);
            self.curblock = Some(reraise_block);
            let ty_load = self.make_load(exc_type_name);
            let val_load = self.make_load(exc_value_name);
            let tb_load = self.make_load(exc_traceback_name);
            let raise = self.stmt(StmtKind::Raise {
                arg0: Some(ty_load),
                arg1: Some(val_load),
                arg2: Some(tb_load),
            });
            self.push(raise);
        }

        if self.cfg.block(finally_block).predecessors.is_empty() {
            self.cfg.discard_block(finally_block);
        } else {
            self.cfg.place_block(finally_block);
            self.curblock = Some(finally_block);

            // No exception pending on this path: exit(mgr, None x3),
            // result ignored.
            let exit_load = self.make_load(exitname);
            let n1 = self.make_load(nonename);
            let n2 = self.make_load(nonename);
            let n3 = self.make_load(nonename);
            let call = self.make_call(exit_load, vec![n1, n2, n3]);
            let stmt = self.make_expr_stmt(call);
            self.push(stmt);

            if finally_did_why.contains(Why::Return) {
                let doreturn = self.cfg.add_deferred_block();
                self.cfg.set_info(doreturn, "with_do_return");
                let otherwise = self.make_finally_cont(Why::Return, whyname, doreturn);
                self.cfg.place_block(doreturn);
                self.curblock = Some(doreturn);
                let rtn = self.intern(RETURN_NAME);
                let load = self.make_load(rtn);
                self.do_return(load);
                self.curblock = Some(otherwise);
            }

            if finally_did_why.contains(Why::Break) {
                let dobreak = self.cfg.add_deferred_block();
                self.cfg.set_info(dobreak, "with_do_break");
                let otherwise = self.make_finally_cont(Why::Break, whyname, dobreak);
                self.cfg.place_block(dobreak);
                self.curblock = Some(dobreak);
                self.do_break()?;
                self.curblock = Some(otherwise);
            }

            if finally_did_why.contains(Why::Continue) {
                let docontinue = self.cfg.add_deferred_block();
                self.cfg.set_info(docontinue, "with_do_continue");
                let otherwise = self.make_finally_cont(Why::Continue, whyname, docontinue);
                self.cfg.place_block(docontinue);
                self.curblock = Some(docontinue);
                self.do_continue()?;
                self.curblock = Some(otherwise);
            }

            // Both the exception path and this one reach the exit
            // block; break the critical edge with a trampoline.
            let blk = self.cfg.add_block();
            self.cfg.set_info(blk, "with_break_critical_edge_to_exit");
            self.push_jump(blk, false);
            self.curblock = Some(blk);
            self.push_jump(exit_block, false);
        }

        if self.cfg.block(exit_block).predecessors.is_empty() {
            self.cfg.discard_block(exit_block);
            self.curblock = None;
        } else {
            self.cfg.place_block(exit_block);
            self.curblock = Some(exit_block);
        }
        Ok(())
    }

    fn lower_import(&mut self, names: Vec<Alias>) {
        for a in names {
            let dotted = self.source.interner.resolve(a.name).to_owned();

            let level = self.make_num(-1);
            let none = self.expr(ExprKind::LangPrimitive {
                op: PrimitiveOp::None,
                args: Vec::new(),
            });
            let name_str = self.make_str(dotted.clone());
            let import = self.expr(ExprKind::LangPrimitive {
                op: PrimitiveOp::ImportName,
                args: vec![level, none, name_str],
            });
            let tmpname = self.node_name(a.id);
            self.push_assign_name(tmpname, import);

            match a.asname {
                None => {
                    // `import a.b` binds the top-level module `a`.
                    let top = dotted.split('.').next().unwrap().to_owned();
                    let top_sym = self.intern(&top);
                    let load = self.make_load(tmpname);
                    self.push_assign_name(top_sym, load);
                }
                Some(asname) => {
                    // `import a.b.c as x` chases down to the leaf.
                    for part in dotted.split('.').skip(1) {
                        let part_sym = self.source.interner.intern(part);
                        let base = self.make_load(tmpname);
                        let attr = self.expr(ExprKind::Attribute {
                            value: Box::new(base),
                            attr: part_sym,
                            ctx: ExprContext::Load,
                        });
                        self.push_assign_name(tmpname, attr);
                    }
                    let load = self.make_load(tmpname);
                    self.push_assign_name(asname, load);
                }
            }
        }
    }

    fn lower_import_from(&mut self, id: NodeId, module: Symbol, names: Vec<Alias>, level: i64) {
        // Without the absolute-import future flag, level 0 means
        // "relative then absolute", spelled -1 on the primitive.
        let level = if level == 0
            && !self
                .source
                .future_flags
                .contains(FutureFlags::ABSOLUTE_IMPORT)
        {
            -1
        } else {
            level
        };
        let level = self.make_num(level);

        let mut fromlist_elts = Vec::with_capacity(names.len());
        for a in &names {
            let s = self.source.interner.resolve(a.name).to_owned();
            fromlist_elts.push(self.make_str(s));
        }
        let fromlist = self.expr(ExprKind::Tuple {
            elts: fromlist_elts,
            ctx: ExprContext::Load,
        });
        let module_str = {
            let s = self.source.interner.resolve(module).to_owned();
            self.make_str(s)
        };
        let import = self.expr(ExprKind::LangPrimitive {
            op: PrimitiveOp::ImportName,
            args: vec![level, fromlist, module_str],
        });
        let tmp_module_name = self.node_name(id);
        self.push_assign_name(tmp_module_name, import);

        for a in names {
            let name_str = self.source.interner.resolve(a.name).to_owned();
            if name_str == "*" {
                let load = self.make_load(tmp_module_name);
                let star = self.expr(ExprKind::LangPrimitive {
                    op: PrimitiveOp::ImportStar,
                    args: vec![load],
                });
                let stmt = self.make_expr_stmt(star);
                self.push(stmt);
            } else {
                let load = self.make_load(tmp_module_name);
                let from_str = self.make_str(name_str);
                let import_from = self.expr(ExprKind::LangPrimitive {
                    op: PrimitiveOp::ImportFrom,
                    args: vec![load, from_str],
                });
                let tmp = self.node_name(a.id);
                self.push_assign_name(tmp, import_from);
                let bind = a.asname.unwrap_or(a.name);
                let load = self.make_load(tmp);
                self.push_assign_name(bind, load);
            }
        }
    }

    fn lower_function_def(
        &mut self,
        id: NodeId,
        name: Symbol,
        mut args: Arguments,
        body: Vec<Stmt>,
        decorator_list: Vec<Expr>,
    ) {
        // Sub-expressions are rewritten in place and the definition
        // keeps its node id: analyses that ran before lowering key
        // their results by node identity. Decorators evaluate before
        // defaults.
        let decorator_list = decorator_list
            .into_iter()
            .map(|d| self.remap_expr(d, true))
            .collect();
        args.defaults = args
            .defaults
            .into_iter()
            .map(|d| self.remap_expr(d, true))
            .collect();
        self.push(Stmt {
            id,
            kind: StmtKind::FunctionDef {
                name,
                args,
                body,
                decorator_list,
            },
        });
    }

    fn lower_class_def(
        &mut self,
        id: NodeId,
        name: Symbol,
        bases: Vec<Expr>,
        decorator_list: Vec<Expr>,
        body: Vec<Stmt>,
    ) {
        // Same in-place contract as function definitions.
        let decorator_list = decorator_list
            .into_iter()
            .map(|d| self.remap_expr(d, true))
            .collect();
        let bases = bases
            .into_iter()
            .map(|b| self.remap_expr(b, true))
            .collect();
        self.push(Stmt {
            id,
            kind: StmtKind::ClassDef {
                name,
                bases,
                decorator_list,
                body,
            },
        });
    }
}
