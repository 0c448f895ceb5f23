//! Diagnostics produced by the pipeline.
//!
//! There are three disjoint kinds, each terminal for the module:
//! - [`ParseError`]: malformed encoding or a `ParserLimits` violation
//! - [`ValidationError`]: decodable but ill-typed input
//! - [`CompileError`]: an internal defect while lowering a validated function

use std::fmt;
use thiserror::Error;

/// Binary decoding failure, located at a byte offset of the input.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("parse error at offset {offset:#x}: {reason}")]
pub struct ParseError {
    pub offset: usize,
    pub reason: String,
}

impl ParseError {
    pub fn new(offset: usize, reason: impl Into<String>) -> Self {
        Self {
            offset,
            reason: reason.into(),
        }
    }
}

/// A static typing, index or nesting rule violation.
///
/// `func_idx` is `None` for module-level checks (exports, start function,
/// limits, constant expressions). `offset` is the byte offset in the input.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub struct ValidationError {
    pub func_idx: Option<u32>,
    pub offset: usize,
    pub message: String,
}

impl ValidationError {
    pub fn in_function(func_idx: u32, offset: usize, message: impl Into<String>) -> Self {
        Self {
            func_idx: Some(func_idx),
            offset,
            message: message.into(),
        }
    }

    pub fn in_module(offset: usize, message: impl Into<String>) -> Self {
        Self {
            func_idx: None,
            offset,
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.func_idx {
            Some(idx) => write!(
                f,
                "validation error in function {} at offset {:#x}: {}",
                idx, self.offset, self.message
            ),
            None => write!(
                f,
                "validation error at offset {:#x}: {}",
                self.offset, self.message
            ),
        }
    }
}

/// Every validation error found in a module, ordered by function index.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub struct ValidationErrors {
    pub errors: Vec<ValidationError>,
}

impl ValidationErrors {
    /// The first error, which is the one the CLI reports prominently.
    pub fn first(&self) -> Option<&ValidationError> {
        self.errors.first()
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for e in &self.errors {
            if !first {
                writeln!(f)?;
            }
            first = false;
            write!(f, "{}", e)?;
        }
        Ok(())
    }
}

/// An internal invariant failed while lowering a function that passed
/// validation. This is a compiler bug, never a user error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error(
    "internal compiler error in function {func_idx} ({func_name}) at offset {instr_offset:#x}: \
     {message} (this is a bug in wasm2qbe)"
)]
pub struct CompileError {
    pub func_idx: u32,
    pub instr_offset: usize,
    pub func_name: String,
    pub message: String,
}

/// Any failure of [`crate::compile`].
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Validation(#[from] ValidationErrors),
    #[error(transparent)]
    Compile(#[from] CompileError),
}

impl Error {
    /// Short category name used in CLI output.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Parse(_) => "parse",
            Error::Validation(_) => "validation",
            Error::Compile(_) => "internal",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_error_display_has_offset() {
        let e = ParseError::new(0x1f, "unexpected end");
        assert_eq!(e.to_string(), "parse error at offset 0x1f: unexpected end");
    }

    #[test]
    fn validation_error_display() {
        let e = ValidationError::in_function(3, 0x40, "type mismatch");
        assert_eq!(
            e.to_string(),
            "validation error in function 3 at offset 0x40: type mismatch"
        );
        let e = ValidationError::in_module(8, "duplicate export");
        assert_eq!(e.to_string(), "validation error at offset 0x8: duplicate export");
    }

    #[test]
    fn compile_error_is_flagged_as_bug() {
        let e = CompileError {
            func_idx: 1,
            instr_offset: 0x22,
            func_name: "fac".into(),
            message: "operand stack underflow".into(),
        };
        let s = e.to_string();
        assert!(s.contains("function 1 (fac)"));
        assert!(s.contains("bug"));
    }

    #[test]
    fn error_kind() {
        let e: Error = ParseError::new(0, "x").into();
        assert_eq!(e.kind(), "parse");
    }
}
