//! The script language: a tree-walking interpreter for a JavaScript subset.
//!
//! Source flows `lexer` → `parser` → `interp`. Everything here is
//! single-threaded (`Rc`/`RefCell`) and lives on the worker thread that runs
//! one execution; only [`PortableValue`](crate::value::PortableValue)s leave it.
//!
//! # Modules
//!
//! - [`lexer`]    - tokens with line/column positions
//! - [`parser`]   - recursive descent into [`ast`]
//! - [`value`]    - runtime values, strings, arrays, objects, environments
//! - [`ops`]      - coercions, equality and number formatting
//! - [`interp`]   - statement/expression evaluation, calls, property access
//! - [`builtins`] - `Math`, `JSON`, `console` and the global functions
//! - [`host`]     - natively implemented host types (`host.util.ArrayList`, …)
//! - [`heap`]     - per-execution live-byte accounting

use std::fmt;

pub mod ast;
pub mod builtins;
pub mod heap;
pub mod host;
pub mod interp;
pub mod lexer;
pub mod ops;
pub mod parser;
pub mod value;

pub use heap::HeapMeter;
pub use interp::{Interpreter, Unwind, DEFAULT_MAX_CALL_DEPTH};
pub use parser::{parse_program, DEFAULT_MAX_NESTING};
pub use value::Value;

/// A lexing or parsing failure with its 1-based source position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    pub message: String,
    pub line: u32,
    pub column: u32,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (line {}, column {})", self.message, self.line, self.column)
    }
}

impl std::error::Error for ParseError {}

impl From<ParseError> for crate::sandbox::error::ScriptFailure {
    fn from(err: ParseError) -> Self {
        crate::sandbox::error::ScriptFailure::Syntax {
            message: err.message,
            line: err.line,
            column: err.column,
        }
    }
}
