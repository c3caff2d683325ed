//! Top-level compile error type.
//!
//! Continues the teacher's `codegen/error.rs` `CodeGenError` pattern (a
//! plain enum with a hand-written `Display`/`Error` impl, no `thiserror`)
//! one level up, distinguishing "the pipeline ran and produced
//! diagnostics" from "the pipeline could not run at all".

use aria_core::Diagnostic;
use std::fmt;

#[derive(Debug)]
pub enum CompileError {
    /// One or more phases produced error-level diagnostics; compilation
    /// stops short of emitting IR (spec §7).
    Diagnostics(Vec<Diagnostic>),
    /// Could not read the source file, write output, or some other
    /// environment failure unrelated to the program's content.
    Io(String),
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompileError::Diagnostics(ds) => {
                write!(f, "compilation failed with {} diagnostic(s)", ds.len())
            }
            CompileError::Io(msg) => write!(f, "{msg}"),
        }
    }
}

impl std::error::Error for CompileError {}

impl From<std::io::Error> for CompileError {
    fn from(e: std::io::Error) -> Self {
        CompileError::Io(e.to_string())
    }
}
