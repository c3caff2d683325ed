//! Source positions and the file table every phase indexes into.
//!
//! Continues the teacher's `parser::Token { line, column }` (0-indexed, kept
//! that way here too since it's what the rest of the pipeline expects) and
//! `resolver::SourceLocation { file, line }`, merged into one triple so the
//! lexer and the module resolver don't carry two incompatible position types.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};

/// Interned handle to a source file. Cheap to copy, carried on every token
/// and AST node instead of a `PathBuf`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FileId(pub u32);

/// A file:line:column triple. Line and column are 0-indexed internally
/// (matches the teacher's LSP-friendly convention); `Display` renders
/// 1-indexed, matching what a human expects in a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourcePosition {
    pub file: FileId,
    pub line: usize,
    pub column: usize,
}

impl SourcePosition {
    pub fn new(file: FileId, line: usize, column: usize) -> Self {
        SourcePosition { file, line, column }
    }
}

/// Interns file paths and keeps their text around for diagnostic rendering
/// and the preprocessor's position back-annotation (every expanded line
/// remembers which original file:line it came from).
#[derive(Debug, Default)]
pub struct SourceMap {
    paths: Vec<PathBuf>,
    texts: Vec<String>,
    by_path: HashMap<PathBuf, FileId>,
}

impl SourceMap {
    pub fn new() -> Self {
        SourceMap::default()
    }

    /// Intern a file, storing its text. Re-adding the same canonical path
    /// returns the existing id rather than duplicating storage.
    pub fn add(&mut self, path: impl AsRef<Path>, text: String) -> FileId {
        let path = path.as_ref().to_path_buf();
        if let Some(id) = self.by_path.get(&path) {
            return *id;
        }
        let id = FileId(self.paths.len() as u32);
        self.paths.push(path.clone());
        self.texts.push(text);
        self.by_path.insert(path, id);
        id
    }

    pub fn path(&self, id: FileId) -> &Path {
        &self.paths[id.0 as usize]
    }

    pub fn text(&self, id: FileId) -> &str {
        &self.texts[id.0 as usize]
    }

    /// The text of a single (0-indexed) line, or `""` if out of bounds —
    /// diagnostics rendered against a truncated/synthetic buffer should
    /// degrade gracefully rather than panic.
    pub fn line(&self, id: FileId, line: usize) -> &str {
        self.text(id).lines().nth(line).unwrap_or("")
    }
}

impl fmt::Display for SourcePosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line + 1, self.column + 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interning_is_idempotent() {
        let mut map = SourceMap::new();
        let a = map.add("main.aria", "hello".to_string());
        let b = map.add("main.aria", "hello".to_string());
        assert_eq!(a, b);
    }

    #[test]
    fn line_out_of_bounds_is_empty() {
        let mut map = SourceMap::new();
        let id = map.add("main.aria", "one\ntwo".to_string());
        assert_eq!(map.line(id, 0), "one");
        assert_eq!(map.line(id, 5), "");
    }

    #[test]
    fn display_is_one_indexed() {
        let pos = SourcePosition::new(FileId(0), 4, 9);
        assert_eq!(pos.to_string(), "5:10");
    }
}
