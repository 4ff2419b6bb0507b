//! Per-compilation-unit context
//!
//! [`SourceInfo`] bundles everything the lowering pass needs from its
//! collaborators: the interning table, the node-id allocator shared
//! with the parser, the scoping-analysis handle, the root AST kind,
//! future flags, and the enclosing module's name (read when compiling
//! a class body).

use crate::ast::{NodeFactory, NodeId};
use crate::interner::{Interner, Symbol};
use rustc_hash::FxHashMap;

/// Kind of the root AST node a compilation unit was built from. A
/// `return` is only legal under `FunctionDef`, `Lambda` and
/// `Expression` (eval strings get an implicit return).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RootKind {
    /// Module top level
    Module,
    /// Function body
    FunctionDef,
    /// Lambda body
    Lambda,
    /// Class body
    ClassDef,
    /// Eval string
    Expression,
}

/// Compilation future-flag set. Only `ABSOLUTE_IMPORT` is consulted
/// by this pass (it selects the default import level).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FutureFlags(u32);

impl FutureFlags {
    /// `from __future__ import absolute_import` was in effect.
    pub const ABSOLUTE_IMPORT: FutureFlags = FutureFlags(1 << 0);

    /// No flags set.
    pub fn empty() -> Self {
        FutureFlags(0)
    }

    /// Set union.
    pub fn with(self, other: FutureFlags) -> Self {
        FutureFlags(self.0 | other.0)
    }

    /// True if every flag in `other` is set.
    pub fn contains(self, other: FutureFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

/// Handle onto the scoping analysis. The lowering registers the
/// functions it synthesises for generator expressions here, so scope
/// results keyed by the original node stay usable.
#[derive(Debug, Default)]
pub struct ScopingAnalysis {
    replacements: FxHashMap<NodeId, NodeId>,
}

impl ScopingAnalysis {
    /// Create an empty analysis handle.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `replacement` (a synthesised function definition)
    /// stands in for `original` (a generator expression) from now on.
    pub fn register_scope_replacement(&mut self, original: NodeId, replacement: NodeId) {
        let prev = self.replacements.insert(original, replacement);
        debug_assert!(prev.is_none(), "node {original} replaced twice");
    }

    /// Look up a previously-registered replacement.
    pub fn scope_replacement(&self, original: NodeId) -> Option<NodeId> {
        self.replacements.get(&original).copied()
    }
}

/// Everything the pass needs to know about the unit being compiled.
#[derive(Debug)]
pub struct SourceInfo {
    /// String table for the unit
    pub interner: Interner,
    /// Node-id allocator, shared with the parser
    pub nodes: NodeFactory,
    /// Scoping-analysis handle
    pub scoping: ScopingAnalysis,
    /// Kind of the root AST node
    pub root_kind: RootKind,
    /// Future flags the unit was compiled under
    pub future_flags: FutureFlags,
    /// `__name__` of the enclosing module (class-body prologue)
    pub module_name: String,
    /// Class name providing the private-name mangling context, when
    /// the unit is lexically inside a class
    pub private_class_name: Option<String>,
}

impl SourceInfo {
    /// Create a context for a unit of the given root kind, with an
    /// empty interner and default flags.
    pub fn new(root_kind: RootKind) -> Self {
        SourceInfo {
            interner: Interner::new(),
            nodes: NodeFactory::new(),
            scoping: ScopingAnalysis::new(),
            root_kind,
            future_flags: FutureFlags::empty(),
            module_name: "__main__".to_owned(),
            private_class_name: None,
        }
    }

    /// Intern a string.
    pub fn intern(&mut self, s: &str) -> Symbol {
        self.interner.intern(s)
    }

    /// Apply private-name mangling: inside class `C`, `__x` becomes
    /// `_C__x`. Names with a trailing double underscore (dunders) and
    /// names outside a class context are returned unchanged.
    pub fn mangle_name(&mut self, name: Symbol) -> Symbol {
        let Some(class_name) = self.private_class_name.as_deref() else {
            return name;
        };
        let s = self.interner.resolve(name);
        if !s.starts_with("__") || s.ends_with("__") {
            return name;
        }
        let class_name = class_name.trim_start_matches('_');
        if class_name.is_empty() {
            return name;
        }
        let mangled = format!("_{class_name}{s}");
        self.interner.intern(&mangled)
    }
}
