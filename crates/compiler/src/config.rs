//! Compiler configuration (spec §6.3, §6.4).
//!
//! Continues the teacher's `CompilerConfig` builder pattern, generalized
//! from Seq's external-builtin-registration use case to Aria's CLI surface:
//! include search paths, preprocessor predefines, the `strict` parser flag,
//! and debug-info emission.

use std::path::PathBuf;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Predefine {
    pub name: String,
    pub value: Option<String>,
}

/// Configuration threaded through every phase of the pipeline.
///
/// Mirrors the teacher's `CompilerConfig::new().with_*(..)` builder style.
#[derive(Debug, Clone)]
pub struct CompilerConfig {
    /// Additional module/include search paths, in search order (spec §4.4,
    /// §4.1 `%include`). Populated from `-I` flags and `ARIA_PATH`.
    pub search_paths: Vec<PathBuf>,
    /// `-D NAME[=VAL]` preprocessor predefines.
    pub predefines: Vec<Predefine>,
    /// Strict parser mode (spec §4.3); defaults on per §6.3.
    pub strict: bool,
    /// Attach DWARF-style debug info to emitted IR (spec §4.11).
    pub debug_info: bool,
    /// Emit textual LLVM IR (`--emit-llvm`); this crate only ever emits
    /// text, so this toggles whether the IR is written out or discarded
    /// after an in-memory check.
    pub emit_llvm: bool,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        CompilerConfig {
            search_paths: Vec::new(),
            predefines: Vec::new(),
            strict: true,
            debug_info: false,
            emit_llvm: true,
        }
    }
}

impl CompilerConfig {
    pub fn new() -> Self {
        CompilerConfig::default()
    }

    pub fn with_search_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.search_paths.push(path.into());
        self
    }

    pub fn with_predefine(mut self, name: impl Into<String>, value: Option<String>) -> Self {
        self.predefines.push(Predefine {
            name: name.into(),
            value,
        });
        self
    }

    pub fn with_strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    pub fn with_debug_info(mut self, debug_info: bool) -> Self {
        self.debug_info = debug_info;
        self
    }

    /// Collects `ARIA_PATH` (spec §6.4) into search paths, platform
    /// separator (`:` on Unix, `;` on Windows).
    pub fn with_env_search_paths(mut self) -> Self {
        if let Ok(raw) = std::env::var("ARIA_PATH") {
            let sep = if cfg!(windows) { ';' } else { ':' };
            self.search_paths
                .extend(raw.split(sep).filter(|s| !s.is_empty()).map(PathBuf::from));
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strict_defaults_on() {
        assert!(CompilerConfig::default().strict);
    }

    #[test]
    fn builder_accumulates_search_paths() {
        let config = CompilerConfig::new()
            .with_search_path("/usr/lib/aria")
            .with_search_path("/usr/local/lib/aria");
        assert_eq!(config.search_paths.len(), 2);
    }
}
