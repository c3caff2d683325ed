//! Target triple detection.

/// Get the target triple for the current platform.
pub fn get_target_triple() -> &'static str {
    #[cfg(all(target_os = "macos", target_arch = "aarch64"))]
    {
        "arm64-apple-macosx14.0.0"
    }

    #[cfg(all(target_os = "macos", target_arch = "x86_64"))]
    {
        "x86_64-apple-darwin"
    }

    #[cfg(all(target_os = "linux", target_arch = "x86_64"))]
    {
        "x86_64-unknown-linux-gnu"
    }

    #[cfg(all(target_os = "linux", target_arch = "aarch64"))]
    {
        "aarch64-unknown-linux-gnu"
    }

    #[cfg(not(any(
        all(target_os = "macos", target_arch = "aarch64"),
        all(target_os = "macos", target_arch = "x86_64"),
        all(target_os = "linux", target_arch = "x86_64"),
        all(target_os = "linux", target_arch = "aarch64")
    )))]
    {
        "unknown"
    }
}

/// Emits the module-level `target datalayout`/`target triple` header lines
/// (spec §4.11). Datalayout is LLVM's generic little-endian default; Aria
/// doesn't need a platform-specific one since it has no packed-struct ABI
/// requirements beyond what `packed` structs already declare inline.
pub fn emit_module_header(cg: &mut super::CodeGen<'_>) {
    cg.emit_header_line("target datalayout = \"e-m:e-i64:64-f80:128-n8:16:32:64-S128\"");
    cg.emit_header_line(format!("target triple = \"{}\"", get_target_triple()));
    cg.emit_header_line("");
}
