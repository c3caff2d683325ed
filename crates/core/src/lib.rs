//! Aria Core: source positions and diagnostics shared by every compiler phase
//!
//! Every phase in the pipeline (preprocessor, lexer, parser, sema analyses,
//! const evaluator, monomorphizer, vtable layout, IR emitter) needs the same
//! two things: a stable way to point at a spot in the original source, and a
//! shared place to record errors/warnings without aborting early. Both live
//! here so no phase crate depends on another phase crate just to report a
//! diagnostic.
//!
//! # Modules
//!
//! - `source`: `SourceMap`, `FileId`, `SourcePosition` — the file:line:col
//!   triple every token and AST node carries.
//! - `diagnostics`: `Diagnostic`, `DiagnosticLevel`, `DiagnosticEngine` —
//!   multi-error collection with rendered source excerpts.

pub mod diagnostics;
pub mod source;

pub use diagnostics::{Diagnostic, DiagnosticEngine, DiagnosticLevel};
pub use source::{FileId, SourceMap, SourcePosition};
