//! Opal front-end lowering
//!
//! This crate is the front end of the Opal JIT runtime's compilation
//! pipeline: it takes the high-level AST produced by the parser and
//! lowers it into a control-flow graph of basic blocks over a reduced,
//! canonicalised AST subset, ready for IR generation.
//!
//! The interesting work is structured-to-unstructured control-flow
//! lowering (`if`/`while`/`for`/`try`/`with`/short-circuit operators/
//! comprehensions become blocks joined by jumps and two-way branches)
//! and exception-aware block construction: while a `try` handler is
//! active, every statement that can raise is emitted as a two-successor
//! `Invoke` whose exception edge lands on a pad that captures the
//! thrown `(type, value, traceback)` triple.
//!
//! # Example
//!
//! ```rust,ignore
//! use opal_frontend::{build_cfg, RootKind, SourceInfo};
//!
//! let mut source = SourceInfo::new(RootKind::FunctionDef);
//! let body = parse(&mut source, "...");
//! let cfg = build_cfg(&mut source, body)?;
//! println!("{}", cfg.pretty_print(&source.interner));
//! ```

#![warn(rust_2018_idioms)]

/// String interning: `Symbol` and `Interner`
pub mod interner;

/// High-level and reduced AST node definitions
pub mod ast;

/// Per-compilation-unit context handed to the pass
pub mod source;

/// User-facing lowering errors
pub mod error;

/// Control-flow graph: blocks, edges, validation, block merging
pub mod cfg;

/// The lowering pass itself
pub mod lower;

pub use ast::{Expr, ExprKind, NodeFactory, NodeId, Stmt, StmtKind};
pub use cfg::{BlockId, Cfg, CfgBlock};
pub use error::{LowerError, LowerResult};
pub use interner::{Interner, Symbol};
pub use lower::build_cfg;
pub use source::{FutureFlags, RootKind, ScopingAnalysis, SourceInfo};
