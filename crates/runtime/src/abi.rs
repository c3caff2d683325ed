//! `extern "C"` signatures for the runtime contract, plus the data-driven
//! declaration table codegen emits `declare` lines from.
//!
//! Grounded in `original_source/include/runtime/{allocators,gc,result,stdlib,strings,math,collections}.h`
//! — each function here corresponds to one declared-but-not-defined
//! function in one of those headers. Linking a concrete implementation of
//! these symbols (the GC, the wild/wildx allocators, the stdlib) is the
//! driver's job, not this crate's or the compiler's.

use std::ffi::{c_char, c_int, c_void};

unsafe extern "C" {
    // === Garbage-collected heap (AGCS — Aria Garbage Collection System) ===
    // A copying nursery + mark-sweep old generation; `type_id` lets the GC
    // find the allocation's field layout for tracing.
    pub fn aria_gc_alloc(size: usize, type_id: u32) -> *mut c_void;
    /// Pins a GC-managed object at a stable address so a `wild`/`wildx`
    /// pointer can safely observe it without the collector moving it
    /// (spec §4.6 rule 8 — the checker forbids moving a pinned value).
    pub fn aria_gc_pin(object: *mut c_void) -> *mut c_void;
    pub fn aria_gc_unpin(object: *mut c_void);

    // === Wild heap: manual malloc/free-style allocation ===
    pub fn aria_wild_alloc(size: usize) -> *mut c_void;
    pub fn aria_wild_free(ptr: *mut c_void);

    // === Wildx heap: executable memory under a W^X discipline ===
    // Only ever written before the first call through it; the runtime is
    // responsible for flipping the page from writable to executable.
    pub fn aria_wildx_alloc(size: usize) -> *mut c_void;
    pub fn aria_wildx_make_executable(ptr: *mut c_void, size: usize) -> c_int;
    pub fn aria_wildx_free(ptr: *mut c_void);

    // === result<T> support (spec §4.3 auto_wrap, §3.3 result type) ===
    pub fn aria_result_is_err(result: *const c_void) -> bool;

    // === future<T> / async executor handshake (spec §4.5 await, §4.11 spawn) ===
    pub fn aria_future_poll(future: *mut c_void) -> bool;
    pub fn aria_future_get(future: *mut c_void) -> *mut c_void;
    pub fn aria_executor_submit(coroutine_fn: *const c_void, env: *mut c_void) -> *mut c_void;

    // === Minimal stdlib entry points the emitter may call directly ===
    pub fn aria_string_concat(a: *const c_char, b: *const c_char) -> *mut c_char;
    pub fn aria_string_len(s: *const c_char) -> usize;
    pub fn aria_array_bounds_check(index: i64, len: i64) -> bool;
    pub fn aria_print(s: *const c_char);
}

/// One ABI function's name and LLVM-facing signature, used to emit a
/// `declare` line (see `aria_compiler::codegen::runtime`). Kept separate
/// from the `extern "C"` block above (which is for anyone linking a real or
/// mock implementation) because the emitter deals in LLVM type syntax, not
/// Rust types.
#[derive(Debug, Clone, Copy)]
pub struct AbiFunction {
    pub name: &'static str,
    /// LLVM parameter types, e.g. `&["i64", "i32"]`.
    pub params: &'static [&'static str],
    /// LLVM return type, e.g. `"ptr"` or `"void"`.
    pub returns: &'static str,
    pub category: &'static str,
}

/// The full ABI surface, grouped the way the originating headers group them.
/// `aria_compiler::codegen::runtime::declare_all` walks this to emit one
/// `declare` per entry.
pub static ABI_FUNCTIONS: &[AbiFunction] = &[
    AbiFunction { name: "aria_gc_alloc", params: &["i64", "i32"], returns: "ptr", category: "gc" },
    AbiFunction { name: "aria_gc_pin", params: &["ptr"], returns: "ptr", category: "gc" },
    AbiFunction { name: "aria_gc_unpin", params: &["ptr"], returns: "void", category: "gc" },
    AbiFunction { name: "aria_wild_alloc", params: &["i64"], returns: "ptr", category: "wild" },
    AbiFunction { name: "aria_wild_free", params: &["ptr"], returns: "void", category: "wild" },
    AbiFunction { name: "aria_wildx_alloc", params: &["i64"], returns: "ptr", category: "wildx" },
    AbiFunction {
        name: "aria_wildx_make_executable",
        params: &["ptr", "i64"],
        returns: "i32",
        category: "wildx",
    },
    AbiFunction { name: "aria_wildx_free", params: &["ptr"], returns: "void", category: "wildx" },
    AbiFunction { name: "aria_result_is_err", params: &["ptr"], returns: "i1", category: "result" },
    AbiFunction { name: "aria_future_poll", params: &["ptr"], returns: "i1", category: "async" },
    AbiFunction { name: "aria_future_get", params: &["ptr"], returns: "ptr", category: "async" },
    AbiFunction {
        name: "aria_executor_submit",
        params: &["ptr", "ptr"],
        returns: "ptr",
        category: "async",
    },
    AbiFunction {
        name: "aria_string_concat",
        params: &["ptr", "ptr"],
        returns: "ptr",
        category: "stdlib",
    },
    AbiFunction { name: "aria_string_len", params: &["ptr"], returns: "i64", category: "stdlib" },
    AbiFunction {
        name: "aria_array_bounds_check",
        params: &["i64", "i64"],
        returns: "i1",
        category: "stdlib",
    },
    AbiFunction { name: "aria_print", params: &["ptr"], returns: "void", category: "stdlib" },
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_function_has_a_category() {
        assert!(ABI_FUNCTIONS.iter().all(|f| !f.category.is_empty()));
    }

    #[test]
    fn names_are_unique() {
        let mut names: Vec<_> = ABI_FUNCTIONS.iter().map(|f| f.name).collect();
        names.sort_unstable();
        let before = names.len();
        names.dedup();
        assert_eq!(before, names.len());
    }
}
