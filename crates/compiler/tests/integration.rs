//! End-to-end pipeline tests: a `.aria` source file in, diagnostics or IR
//! text out. Complements the in-module unit tests for each phase (spec
//! §8's example scenarios), exercising the phases together the way a real
//! `ariac` invocation would.

use aria_compiler::{CompileError, CompilerConfig};
use std::fs;
use std::io::Write;

fn write_source(dir: &tempfile::TempDir, name: &str, src: &str) -> std::path::PathBuf {
    let path = dir.path().join(name);
    let mut f = fs::File::create(&path).unwrap();
    write!(f, "{src}").unwrap();
    path
}

fn compile_ok(src: &str) -> String {
    let dir = tempfile::tempdir().unwrap();
    let path = write_source(&dir, "main.aria", src);
    let mut pipeline = aria_compiler::Pipeline::new();
    match pipeline.compile(&path, &CompilerConfig::default()) {
        Ok(ir) => ir,
        Err(CompileError::Diagnostics(ds)) => panic!("unexpected diagnostics: {ds:?}"),
        Err(e) => panic!("unexpected error: {e}"),
    }
}

fn compile_err(src: &str) -> Vec<aria_core::Diagnostic> {
    let dir = tempfile::tempdir().unwrap();
    let path = write_source(&dir, "main.aria", src);
    let mut pipeline = aria_compiler::Pipeline::new();
    match pipeline.compile(&path, &CompilerConfig::default()) {
        Ok(ir) => panic!("expected compilation to fail, got IR:\n{ir}"),
        Err(CompileError::Diagnostics(ds)) => ds,
        Err(e) => panic!("unexpected error: {e}"),
    }
}

#[test]
fn hello_world_emits_a_main_definition() {
    let ir = compile_ok("func:main = int32() { return 0; }");
    assert!(ir.contains("define i32 @main()"));
    assert!(ir.contains("ret i32 0"));
}

#[test]
fn counted_loop_and_pick_compile_to_a_compare_chain() {
    let ir = compile_ok(
        "func:classify = int32(int32:n) { \
           pick(n) { 0: { return 0; } 1...9: { return 1; } (*): { return 2; } } \
         } \
         func:main = int32() { \
           int32:total = 0; \
           loop(0, 5, 1) { total = total + classify(total); } \
           return total; \
         }",
    );
    assert!(ir.contains("@classify"));
    assert!(ir.contains("icmp"));
}

#[test]
fn tbb_overflow_path_branches_to_the_err_sentinel() {
    let ir = compile_ok("func:main = tbb8() { tbb8:a = 100; tbb8:b = 100; return a + b; }");
    // tbb8's valid range is [-127, 127]; the add must guard against
    // wrapping past it and select the sentinel on overflow.
    assert!(ir.contains("-128"));
}

#[test]
fn tbb_sentinel_literal_is_rejected_before_codegen() {
    let diags = compile_err("func:main = tbb8() { tbb8:x = -128; return x; }");
    assert!(diags.iter().any(|d| d.message.contains("sentinel")));
}

#[test]
fn wildx_pointer_escaping_through_return_is_rejected() {
    let diags = compile_err("func:main = int32() { wildx int32:p = 0; return @p; }");
    assert!(diags.iter().any(|d| d.code == Some("E_WILDX_ESCAPE")));
}

#[test]
fn undefined_symbol_is_a_semantic_error() {
    let diags = compile_err("func:main = int32() { return undefined_name; }");
    assert!(!diags.is_empty());
}

#[test]
fn unclosed_preprocessor_conditional_aborts_compilation() {
    let diags = compile_err("%if 1\nfunc:main = int32() { return 0; }\n");
    assert!(diags.iter().any(|d| d.message.contains("unclosed")));
}

#[test]
fn defined_macro_constant_is_substituted_before_parsing() {
    let ir = compile_ok(
        "%define LIMIT 5\nfunc:main = int32() { int32:total = 0; loop(0, LIMIT, 1) { total = total + 1; } return total; }\n",
    );
    assert!(ir.contains("define i32 @main()"));
}

#[test]
fn missing_source_file_is_reported_as_io_error() {
    let mut pipeline = aria_compiler::Pipeline::new();
    let result = pipeline.compile(
        std::path::Path::new("/nonexistent/does/not/exist.aria"),
        &CompilerConfig::default(),
    );
    assert!(matches!(result, Err(CompileError::Io(_))));
}
