//! User-facing lowering errors
//!
//! Exactly the syntactic impossibilities the pass can detect. These
//! surface to the user as language-level `SyntaxError`s; the host
//! runtime owns the reporting. Internal invariant violations are not
//! errors — they are assertions and abort the pass.

use thiserror::Error;

/// A syntactic impossibility detected while lowering.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum LowerError {
    /// `continue` with no enclosing loop continuation
    #[error("'continue' not properly in loop")]
    ContinueOutsideLoop,

    /// `break` with no enclosing loop continuation
    #[error("'break' outside loop")]
    BreakOutsideLoop,

    /// `return` in a class body or at module scope
    #[error("'return' outside function")]
    ReturnOutsideFunction,

    /// `exec` statements are not supported
    #[error("'exec' currently not supported")]
    ExecNotSupported,
}

/// Result alias used throughout the statement lowering.
pub type LowerResult<T> = Result<T, LowerError>;
