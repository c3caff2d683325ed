//! LLVM textual IR generation (spec §4.11), the tenth and final compiler
//! phase. Walks the fully resolved, monomorphized program and produces a
//! `.ll` module: target header, runtime `declare`s, struct/vtable types,
//! then every function body. Linking that text into an executable is
//! explicitly out of scope (spec §1) and left to whatever drives `ariac`.

mod control_flow;
mod error;
mod expr;
mod globals;
mod infer;
mod platform;
mod program;
mod runtime;
mod state;
mod statements;
mod types;

pub use error::CodeGenError;
pub use state::{CodeGen, Local};

use crate::ast::Program;
use crate::monomorphize::Monomorphizer;
use crate::typechecker::Pass1;
use crate::vtable::VtableGenerator;

/// Generates the full LLVM IR text for a program that has already passed
/// every earlier phase (spec §2): type checking, borrow/escape analysis,
/// closure capture analysis, const evaluation, and monomorphization.
pub fn generate(
    program: &Program,
    mono: &mut Monomorphizer,
    vtables: &mut VtableGenerator,
    debug_info: bool,
) -> Result<String, CodeGenError> {
    let env = Pass1::collect(program);
    let mut cg = CodeGen::new(debug_info, &env, mono, vtables);
    platform::emit_module_header(&mut cg);
    runtime::declare_all(&mut cg);
    cg.codegen_program(program)?;
    Ok(cg.finish())
}
