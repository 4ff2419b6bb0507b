//! Expression lowering
//!
//! `remap_expr` flattens nested expressions into three-address form:
//! the result of remapping is a temporary name, a literal, or a
//! literal index, with any auxiliary computation emitted into the
//! current block. Control-flow expressions (short-circuit operators,
//! chained comparisons, conditional expressions, comprehensions)
//! expand into sub-graphs here.

use super::CfgBuilder;
use crate::ast::{
    Arguments, BoolOpKind, CmpOp, Comprehension, Expr, ExprContext, ExprKind, Keyword, NodeId,
    PrimitiveOp, Stmt, StmtKind,
};

/// What the innermost comprehension level appends to the result
/// container.
enum CompBody {
    List { elt: Expr },
    Set { elt: Expr },
    Dict { key: Expr, value: Expr },
}

impl CfgBuilder<'_> {
    /// Flatten `node`. The result is a name, a literal `Num`/`Str`,
    /// or an `Index` over a `Num`. With `wrap`, any non-trivial
    /// result is first assigned to a fresh temporary and a load of
    /// that temporary returned.
    pub(super) fn remap_expr(&mut self, node: Expr, wrap: bool) -> Expr {
        let trivial = match &node.kind {
            ExprKind::Num(_) | ExprKind::Str(_) => true,
            ExprKind::Index { value } => matches!(value.kind, ExprKind::Num(_)),
            _ => false,
        };
        if trivial {
            return node;
        }

        let Expr { id: node_id, kind } = node;
        let rtn = match kind {
            ExprKind::Attribute { value, attr, ctx } => {
                let value = self.remap_expr(*value, true);
                let attr = self.source.mangle_name(attr);
                self.expr(ExprKind::Attribute {
                    value: Box::new(value),
                    attr,
                    ctx,
                })
            }
            ExprKind::AugBinOp { .. } => {
                panic!("aug-binop is produced by lowering, never consumed")
            }
            ExprKind::BinOp { op, left, right } => {
                let left = self.remap_expr(*left, true);
                let right = self.remap_expr(*right, true);
                self.expr(ExprKind::BinOp {
                    op,
                    left: Box::new(left),
                    right: Box::new(right),
                })
            }
            ExprKind::BoolOp { op, values } => self.remap_boolop(node_id, op, values),
            ExprKind::Call {
                func,
                args,
                keywords,
                starargs,
                kwargs,
            } => self.remap_call(func, args, keywords, starargs, kwargs),
            ExprKind::ClsAttribute { value, attr } => {
                let value = self.remap_expr(*value, true);
                self.expr(ExprKind::ClsAttribute {
                    value: Box::new(value),
                    attr,
                })
            }
            ExprKind::Compare {
                ops,
                left,
                comparators,
            } => self.remap_compare(node_id, ops, *left, comparators),
            ExprKind::Dict { keys, values } => {
                let keys = keys
                    .into_iter()
                    .map(|k| self.remap_expr(k, true))
                    .collect();
                let values = values
                    .into_iter()
                    .map(|v| self.remap_expr(v, true))
                    .collect();
                self.expr(ExprKind::Dict { keys, values })
            }
            ExprKind::DictComp {
                key,
                value,
                generators,
            } => self.remap_comprehension(
                node_id,
                generators,
                CompBody::Dict {
                    key: *key,
                    value: *value,
                },
            ),
            ExprKind::GeneratorExp { elt, generators } => {
                self.remap_generator_exp(node_id, *elt, generators)
            }
            ExprKind::IfExp { test, body, orelse } => {
                self.remap_if_exp(node_id, *test, *body, *orelse)
            }
            ExprKind::Index { value } => {
                let value = self.remap_expr(*value, true);
                self.expr(ExprKind::Index {
                    value: Box::new(value),
                })
            }
            ExprKind::Lambda { mut args, body } => {
                // Rewritten in place so analyses keyed by this node's
                // identity stay valid; see lower_function_def.
                args.defaults = args
                    .defaults
                    .into_iter()
                    .map(|d| self.remap_expr(d, true))
                    .collect();
                Expr {
                    id: node_id,
                    kind: ExprKind::Lambda { args, body },
                }
            }
            ExprKind::LangPrimitive { op, args } => {
                let args = args
                    .into_iter()
                    .map(|a| self.remap_expr(a, true))
                    .collect();
                self.expr(ExprKind::LangPrimitive { op, args })
            }
            ExprKind::List { elts, ctx } => {
                debug_assert!(matches!(ctx, ExprContext::Load));
                let elts = elts
                    .into_iter()
                    .map(|e| self.remap_expr(e, true))
                    .collect();
                self.expr(ExprKind::List { elts, ctx })
            }
            ExprKind::ListComp { elt, generators } => {
                self.remap_comprehension(node_id, generators, CompBody::List { elt: *elt })
            }
            ExprKind::Name { sym, ctx } => Expr {
                id: node_id,
                kind: ExprKind::Name { sym, ctx },
            },
            ExprKind::Repr { value } => {
                let value = self.remap_expr(*value, true);
                self.expr(ExprKind::Repr {
                    value: Box::new(value),
                })
            }
            ExprKind::Set { elts } => {
                let elts = elts
                    .into_iter()
                    .map(|e| self.remap_expr(e, true))
                    .collect();
                self.expr(ExprKind::Set { elts })
            }
            ExprKind::SetComp { elt, generators } => {
                self.remap_comprehension(node_id, generators, CompBody::Set { elt: *elt })
            }
            ExprKind::Slice { lower, upper, step } => {
                let lower = lower.map(|e| Box::new(self.remap_expr(*e, true)));
                let upper = upper.map(|e| Box::new(self.remap_expr(*e, true)));
                let step = step.map(|e| Box::new(self.remap_expr(*e, true)));
                self.expr(ExprKind::Slice { lower, upper, step })
            }
            ExprKind::Subscript { value, slice, ctx } => {
                let value = self.remap_expr(*value, true);
                let slice = self.remap_expr(*slice, true);
                self.expr(ExprKind::Subscript {
                    value: Box::new(value),
                    slice: Box::new(slice),
                    ctx,
                })
            }
            ExprKind::Tuple { elts, ctx } => {
                debug_assert!(matches!(ctx, ExprContext::Load));
                let elts = elts
                    .into_iter()
                    .map(|e| self.remap_expr(e, true))
                    .collect();
                self.expr(ExprKind::Tuple { elts, ctx })
            }
            ExprKind::UnaryOp { op, operand } => {
                let operand = self.remap_expr(*operand, true);
                self.expr(ExprKind::UnaryOp {
                    op,
                    operand: Box::new(operand),
                })
            }
            ExprKind::Yield { value } => self.remap_yield(value),
            ExprKind::Num(_) | ExprKind::Str(_) => unreachable!(),
        };

        // This is the part that actually generates temporaries.
        if wrap {
            let already_temp =
                matches!(&rtn.kind, ExprKind::Name { sym, .. } if self.is_temp(*sym));
            if !already_temp {
                let name = self.node_name(node_id);
                self.push_assign_name(name, rtn);
                return self.make_load(name);
            }
        }
        rtn
    }

    pub(super) fn remap_expr_opt(&mut self, node: Option<Expr>, wrap: bool) -> Option<Expr> {
        node.map(|e| self.remap_expr(e, wrap))
    }

    /// `a or b or …` / `a and b and …`: evaluate operands in turn
    /// into one shared temporary, short-circuiting to a deferred exit
    /// block. Every branch goes through its own single-predecessor
    /// break block so the exit has no critical edges.
    fn remap_boolop(&mut self, node_id: NodeId, op: BoolOpKind, values: Vec<Expr>) -> Expr {
        let name = self.node_name(node_id);
        let exit_block = self.cfg.add_deferred_block();

        let n = values.len();
        debug_assert!(n >= 2);
        let mut values = values.into_iter();
        for _ in 0..n - 1 {
            let val = self.remap_expr(values.next().unwrap(), true);
            let val_dup = self.dup(&val);
            self.push_assign_name(name, val);
            let test = self.call_nonzero(val_dup);

            let next_block = self.cfg.add_block();
            let crit_break_block = self.cfg.add_block();
            let (iftrue, iffalse) = match op {
                BoolOpKind::Or => (crit_break_block, next_block),
                BoolOpKind::And => (next_block, crit_break_block),
            };
            let cur = self.curblock.expect("short-circuit op in unreachable code");
            self.cfg.connect(cur, next_block, false);
            self.cfg.connect(cur, crit_break_block, false);
            let br = self.stmt(StmtKind::Branch {
                test,
                iftrue,
                iffalse,
            });
            self.push(br);

            self.curblock = Some(crit_break_block);
            self.push_jump(exit_block, false);
            self.curblock = Some(next_block);
        }

        let final_val = self.remap_expr(values.next().unwrap(), true);
        self.push_assign_name(name, final_val);
        self.push_jump(exit_block, false);

        self.cfg.place_block(exit_block);
        self.curblock = Some(exit_block);
        self.make_load(name)
    }

    fn remap_call(
        &mut self,
        func: Box<Expr>,
        args: Vec<Expr>,
        keywords: Vec<Keyword>,
        starargs: Option<Box<Expr>>,
        kwargs: Option<Box<Expr>>,
    ) -> Expr {
        // Keep attribute callees intact so the IR generator can emit
        // a fused call-attribute instead of a bound-method load.
        let func = *func;
        let func = match func.kind {
            ExprKind::Attribute { value, attr, ctx } => {
                let value = self.remap_expr(*value, true);
                let attr = self.source.mangle_name(attr);
                self.expr(ExprKind::Attribute {
                    value: Box::new(value),
                    attr,
                    ctx,
                })
            }
            ExprKind::ClsAttribute { value, attr } => {
                let value = self.remap_expr(*value, true);
                self.expr(ExprKind::ClsAttribute {
                    value: Box::new(value),
                    attr,
                })
            }
            kind => self.remap_expr(
                Expr {
                    id: func.id,
                    kind,
                },
                true,
            ),
        };

        let args = args
            .into_iter()
            .map(|a| self.remap_expr(a, true))
            .collect();
        let keywords = keywords
            .into_iter()
            .map(|kw| Keyword {
                arg: kw.arg,
                value: self.remap_expr(kw.value, true),
            })
            .collect();
        let starargs = starargs.map(|e| Box::new(self.remap_expr(*e, true)));
        let kwargs = kwargs.map(|e| Box::new(self.remap_expr(*e, true)));

        self.expr(ExprKind::Call {
            func: Box::new(func),
            args,
            keywords,
            starargs,
            kwargs,
        })
    }

    /// Unchained comparisons lower in place. A chain `a < b < c …`
    /// evaluates pairwise into one temporary, short-circuiting to the
    /// exit on the first false result; each right operand is
    /// evaluated at most once.
    fn remap_compare(
        &mut self,
        node_id: NodeId,
        ops: Vec<CmpOp>,
        left: Expr,
        comparators: Vec<Expr>,
    ) -> Expr {
        if ops.len() == 1 {
            let left = self.remap_expr(left, true);
            let comparators = comparators
                .into_iter()
                .map(|c| self.remap_expr(c, true))
                .collect();
            return self.expr(ExprKind::Compare {
                ops,
                left: Box::new(left),
                comparators,
            });
        }

        let name = self.node_name(node_id);
        let exit_block = self.cfg.add_deferred_block();
        let mut left = self.remap_expr(left, true);

        for (op, comparator) in ops.into_iter().zip(comparators) {
            let right = self.remap_expr(comparator, true);
            let next_left = self.dup(&right);

            let val = self.expr(ExprKind::Compare {
                ops: vec![op],
                left: Box::new(left),
                comparators: vec![right],
            });
            self.push_assign_name(name, val);
            let load = self.make_load(name);
            let test = self.call_nonzero(load);

            let next_block = self.cfg.add_block();
            let crit_break_block = self.cfg.add_block();
            let cur = self.curblock.expect("comparison chain in unreachable code");
            self.cfg.connect(cur, next_block, false);
            self.cfg.connect(cur, crit_break_block, false);
            let br = self.stmt(StmtKind::Branch {
                test,
                iftrue: next_block,
                iffalse: crit_break_block,
            });
            self.push(br);

            // The false path falls out preserving the falsy value.
            self.curblock = Some(crit_break_block);
            self.push_jump(exit_block, false);
            self.curblock = Some(next_block);

            left = next_left;
        }

        self.push_jump(exit_block, false);
        self.cfg.place_block(exit_block);
        self.curblock = Some(exit_block);
        self.make_load(name)
    }

    fn remap_if_exp(&mut self, node_id: NodeId, test: Expr, body: Expr, orelse: Expr) -> Expr {
        let rtn_name = self.node_name(node_id);
        let iftrue = self.cfg.add_deferred_block();
        let iffalse = self.cfg.add_deferred_block();
        let exit_block = self.cfg.add_deferred_block();

        let test = self.remap_expr(test, true);
        self.push_branch(test, iftrue, iffalse);

        self.cfg.place_block(iftrue);
        self.cfg.set_info(iftrue, "iftrue");
        self.curblock = Some(iftrue);
        let body = self.remap_expr(body, true);
        self.push_assign_name(rtn_name, body);
        self.push_jump(exit_block, false);

        self.cfg.place_block(iffalse);
        self.cfg.set_info(iffalse, "iffalse");
        self.curblock = Some(iffalse);
        let orelse = self.remap_expr(orelse, true);
        self.push_assign_name(rtn_name, orelse);
        self.push_jump(exit_block, false);

        self.cfg.place_block(exit_block);
        self.curblock = Some(exit_block);
        self.make_load(rtn_name)
    }

    /// Comprehensions expand inline into the nested-loop shape:
    /// outer generators evaluate their iterable here, inner ones
    /// re-evaluate per outer element inside the enclosing body.
    /// Iteration uses the class-slot `__hasnext__`/`next` protocol so
    /// instance attributes can't shadow it.
    fn remap_comprehension(
        &mut self,
        node_id: NodeId,
        generators: Vec<Comprehension>,
        body: CompBody,
    ) -> Expr {
        let rtn_name = self.node_name(node_id);
        let empty = match &body {
            CompBody::List { .. } => ExprKind::List {
                elts: Vec::new(),
                ctx: ExprContext::Load,
            },
            CompBody::Set { .. } => ExprKind::Set { elts: Vec::new() },
            CompBody::Dict { .. } => ExprKind::Dict {
                keys: Vec::new(),
                values: Vec::new(),
            },
        };
        let empty = self.expr(empty);
        self.push_assign_name(rtn_name, empty);

        let mut body = Some(body);
        let mut exit_blocks: Vec<crate::cfg::BlockId> = Vec::new();
        // Where each level jumps once it finishes iterating: inner
        // levels resume the enclosing level's test.
        let mut finished_block = None;

        let n = generators.len();
        for (i, c) in generators.into_iter().enumerate() {
            let is_innermost = i == n - 1;
            let Comprehension {
                id: _,
                target,
                iter,
                ifs,
            } = c;

            let remapped_iter = self.remap_expr(iter, true);
            let iter_call = self.expr(ExprKind::LangPrimitive {
                op: PrimitiveOp::GetIter,
                args: vec![remapped_iter],
            });
            let iter_name = self.node_name_idx(node_id, "lc_iter", i);
            self.push_assign_name(iter_name, iter_call);

            let hasnext_sym = self.intern("__hasnext__");
            let next_sym = self.intern("next");
            let iter_load = self.make_load(iter_name);
            let hasnext_attr = self.make_load_attribute(iter_load, hasnext_sym, true);
            let iter_load = self.make_load(iter_name);
            let next_attr = self.make_load_attribute(iter_load, next_sym, true);

            let test_block = self.cfg.add_block();
            self.cfg.set_info(test_block, "comprehension_test");
            self.push_jump(test_block, false);
            self.curblock = Some(test_block);
            let hasnext_call = self.make_call(hasnext_attr, Vec::new());
            let remapped = self.remap_expr(hasnext_call, true);
            let test_call = self.call_nonzero(remapped);

            let body_block = self.cfg.add_block();
            self.cfg.set_info(body_block, "comprehension_body");
            let exit_block = self.cfg.add_deferred_block();
            self.cfg.set_info(exit_block, "comprehension_exit");
            exit_blocks.push(exit_block);

            let cur = self.curblock.expect("comprehension in unreachable code");
            self.cfg.connect(cur, body_block, false);
            self.cfg.connect(cur, exit_block, false);
            let br = self.stmt(StmtKind::Branch {
                test: test_call,
                iftrue: body_block,
                iffalse: exit_block,
            });
            self.push(br);
            self.curblock = Some(body_block);

            let next_attr_id = next_attr.id;
            let next_call = self.make_call(next_attr, Vec::new());
            let next_name = self.node_name(next_attr_id);
            self.push_assign_name(next_name, next_call);
            let next_load = self.make_load(next_name);
            self.push_assign(target, next_load);

            for if_condition in ifs {
                let remapped = self.remap_expr(if_condition, true);
                let test = self.call_nonzero(remapped);

                let body_tramp = self.cfg.add_block();
                self.cfg.set_info(body_tramp, "comprehension_if_trampoline");
                let body_continue = self.cfg.add_block();
                self.cfg.set_info(body_continue, "comprehension_if_continue");

                let cur = self.curblock.expect("comprehension filter in unreachable code");
                self.cfg.connect(cur, body_tramp, false);
                self.cfg.connect(cur, body_continue, false);
                let br = self.stmt(StmtKind::Branch {
                    test,
                    iftrue: body_continue,
                    iffalse: body_tramp,
                });
                self.push(br);

                self.curblock = Some(body_tramp);
                self.push_jump(test_block, true);
                self.curblock = Some(body_continue);
            }

            let body_end = self.curblock;
            debug_assert_eq!(finished_block.is_some(), i != 0);
            if let Some(finished) = finished_block {
                self.curblock = Some(exit_block);
                self.push_jump(finished, true);
            }
            finished_block = Some(test_block);
            self.curblock = body_end;

            if is_innermost {
                let elem_call = match body.take().unwrap() {
                    CompBody::List { elt } => {
                        let elt = self.remap_expr(elt, true);
                        let append_sym = self.intern("append");
                        let rtn_load = self.make_load(rtn_name);
                        let attr = self.make_load_attribute(rtn_load, append_sym, true);
                        self.make_call(attr, vec![elt])
                    }
                    CompBody::Set { elt } => {
                        let elt = self.remap_expr(elt, true);
                        let add_sym = self.intern("add");
                        let rtn_load = self.make_load(rtn_name);
                        let attr = self.make_load_attribute(rtn_load, add_sym, true);
                        self.make_call(attr, vec![elt])
                    }
                    CompBody::Dict { key, value } => {
                        let key = self.remap_expr(key, true);
                        let value = self.remap_expr(value, true);
                        let setitem_sym = self.intern("__setitem__");
                        let rtn_load = self.make_load(rtn_name);
                        let attr = self.make_load_attribute(rtn_load, setitem_sym, true);
                        self.make_call(attr, vec![key, value])
                    }
                };
                let stmt = self.make_expr_stmt(elem_call);
                self.push(stmt);
                self.push_jump(test_block, true);
                self.curblock = Some(exit_blocks[0]);
            }
        }

        // Place the exit blocks at the end, innermost first, so the
        // layout mirrors a hand-written nested loop.
        for &eb in exit_blocks.iter().rev() {
            self.cfg.place_block(eb);
        }

        self.make_load(rtn_name)
    }

    /// A generator expression does not lower inline: it becomes a
    /// synthesised one-parameter function whose body is a `for`/`if`
    /// ladder ending in a yield, called with the outermost iterable
    /// (which is the only part evaluated in the enclosing scope). The
    /// scoping analysis is told the new function replaces the
    /// original node.
    fn remap_generator_exp(
        &mut self,
        node_id: NodeId,
        elt: Expr,
        generators: Vec<Comprehension>,
    ) -> Expr {
        debug_assert!(!generators.is_empty());
        let mut generators = generators;

        let first_generator_name = self.node_name(generators[0].id);
        let param_load = self.make_load(first_generator_name);
        let first_iter = std::mem::replace(&mut generators[0].iter, param_load);
        let first = self.remap_expr(first_iter, true);

        let func_id = self.source.nodes.next_id();
        let func_name = self.node_name(func_id);
        self.source
            .scoping
            .register_scope_replacement(node_id, func_id);

        // Note: the filter conditions are not truth-wrapped here; the
        // synthesised function goes through CFG construction itself.
        let yield_expr = self.expr(ExprKind::Yield {
            value: Some(Box::new(elt)),
        });
        let mut body: Vec<Stmt> = vec![self.make_expr_stmt(yield_expr)];
        for c in generators.into_iter().rev() {
            let Comprehension {
                id: _,
                target,
                iter,
                ifs,
            } = c;
            for if_condition in ifs.into_iter().rev() {
                let if_stmt = self.stmt(StmtKind::If {
                    test: if_condition,
                    body,
                    orelse: Vec::new(),
                });
                body = vec![if_stmt];
            }
            let for_stmt = self.stmt(StmtKind::For {
                target,
                iter,
                body,
                orelse: Vec::new(),
            });
            body = vec![for_stmt];
        }

        let param = self.make_name(first_generator_name, ExprContext::Param);
        let args = Arguments {
            args: vec![param],
            defaults: Vec::new(),
            vararg: None,
            kwarg: None,
        };
        let func = Stmt {
            id: func_id,
            kind: StmtKind::FunctionDef {
                name: func_name,
                args,
                body,
                decorator_list: Vec::new(),
            },
        };
        self.push(func);

        let func_load = self.make_load(func_name);
        self.make_call(func_load, vec![first])
    }

    /// `yield` lowers to an assignment so the suspension point is a
    /// statement, followed immediately by UNCACHE_EXC_INFO: cached
    /// exception info must not survive across a suspension.
    fn remap_yield(&mut self, value: Option<Box<Expr>>) -> Expr {
        let value = value.map(|v| Box::new(self.remap_expr(*v, true)));
        let rtn = self.expr(ExprKind::Yield { value });
        let name = self.node_name(rtn.id);
        self.push_assign_name(name, rtn);

        let uncache = self.expr(ExprKind::LangPrimitive {
            op: PrimitiveOp::UncacheExcInfo,
            args: Vec::new(),
        });
        let stmt = self.make_expr_stmt(uncache);
        self.push(stmt);

        self.make_load(name)
    }
}
