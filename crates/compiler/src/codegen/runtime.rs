//! Runtime function declarations for LLVM IR.
//!
//! Walks `aria_runtime_abi::ABI_FUNCTIONS`, the data-driven table the
//! runtime crate owns, and emits one `declare` line per entry. Keeping the
//! table in `aria-runtime-abi` rather than duplicating it here means the
//! `extern "C"` signatures a driver links against and the `declare`s this
//! module emits can never drift apart.

use super::CodeGen;
use aria_runtime_abi::ABI_FUNCTIONS;
use std::fmt::Write as _;

pub(super) fn declare_all(cg: &mut CodeGen<'_>) {
    for f in ABI_FUNCTIONS {
        let params = f.params.join(", ");
        let mut line = String::new();
        let _ = write!(&mut line, "declare {} @{}({})", f.returns, f.name, params);
        cg.emit_header_line(line);
    }
    cg.emit_header_line("");
}

/// `true` if `name` names a runtime ABI function, for codegen sites that
/// need to tell an intrinsic call apart from a call to a user function.
pub(super) fn is_runtime_function(name: &str) -> bool {
    ABI_FUNCTIONS.iter().any(|f| f.name == name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn declare_all_emits_one_line_per_abi_function() {
        let env = crate::typechecker::GlobalEnv::default();
        let mut mono = crate::monomorphize::Monomorphizer::new();
        let mut vtables = crate::vtable::VtableGenerator::new();
        let mut cg = CodeGen::new(false, &env, &mut mono, &mut vtables);
        declare_all(&mut cg);
        for f in ABI_FUNCTIONS {
            assert!(cg.header.contains(&format!("declare {} @{}", f.returns, f.name)));
        }
    }
}
