//! String interning for names and compiler temporaries
//!
//! Every identifier that flows through the lowering pass is interned
//! once and referred to by a small copyable symbol, so name equality
//! is an integer compare. Compiler-synthesised temporaries are
//! ordinary interned strings whose first byte is `#`, a character the
//! surface language reserves; the invoke rewriter relies on that
//! prefix to tell user-visible assignments from synthesised ones.

use rustc_hash::FxHashMap;
use std::num::NonZeroU32;

/// An interned string (32-bit index). Equates by identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Symbol(NonZeroU32);

impl Symbol {
    #[inline]
    fn from_raw(raw: u32) -> Self {
        // Offset by 1 so the niche stays available for Option<Symbol>.
        Symbol(NonZeroU32::new(raw + 1).unwrap())
    }

    #[inline]
    fn to_raw(self) -> usize {
        (self.0.get() - 1) as usize
    }
}

/// Deduplicating string table.
///
/// Owned by the compilation unit; the lowering pass interns the names
/// it synthesises (temporaries, protocol method names) through the
/// [`crate::source::SourceInfo`] it is handed.
#[derive(Debug, Default, Clone)]
pub struct Interner {
    map: FxHashMap<String, Symbol>,
    strings: Vec<String>,
}

impl Interner {
    /// Create an empty interner.
    pub fn new() -> Self {
        Self::default()
    }

    /// Intern a string, returning its symbol. Interning the same
    /// string twice returns the same symbol.
    pub fn intern(&mut self, s: &str) -> Symbol {
        if let Some(&sym) = self.map.get(s) {
            return sym;
        }
        let sym = Symbol::from_raw(self.strings.len() as u32);
        self.strings.push(s.to_owned());
        self.map.insert(s.to_owned(), sym);
        sym
    }

    /// Resolve a symbol back to its string.
    ///
    /// # Panics
    ///
    /// Panics if the symbol came from a different interner.
    #[inline]
    pub fn resolve(&self, sym: Symbol) -> &str {
        &self.strings[sym.to_raw()]
    }

    /// True if the symbol names a compiler-synthesised temporary
    /// (`#`-prefixed).
    #[inline]
    pub fn is_temporary(&self, sym: Symbol) -> bool {
        self.resolve(sym).starts_with('#')
    }

    /// Number of distinct interned strings.
    pub fn len(&self) -> usize {
        self.strings.len()
    }

    /// True if nothing has been interned yet.
    pub fn is_empty(&self) -> bool {
        self.strings.is_empty()
    }
}
