//! Diagnostic engine: multi-error collection with rendered source excerpts.
//!
//! Continues `original_source/src/frontend/diagnostic.h`'s `DiagnosticEngine`
//! (collect without stopping, render with a `^` caret, track error/warning
//! counts) in the teacher's error-handling idiom: plain structs and
//! `Vec`-backed collections, no external error-handling crate, matching the
//! teacher's `lint::{Severity, LintDiagnostic}` for the severity enum shape.

use crate::source::{FileId, SourceMap, SourcePosition};
use std::fmt;

/// Severity of a single diagnostic. Ordered so a plain `level >= Error`
/// style comparison works for "deny warnings" style policies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum DiagnosticLevel {
    Note,
    Warning,
    Error,
}

impl fmt::Display for DiagnosticLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DiagnosticLevel::Note => "note",
            DiagnosticLevel::Warning => "warning",
            DiagnosticLevel::Error => "error",
        };
        write!(f, "{s}")
    }
}

/// A single diagnostic: where, what level, what message, and an optional
/// "did you mean X?" style hint.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub level: DiagnosticLevel,
    pub position: SourcePosition,
    pub message: String,
    pub help: Option<String>,
    /// Stable diagnostic code, e.g. `"E002"` for a visibility violation.
    /// `None` for diagnostics that don't have one assigned yet.
    pub code: Option<&'static str>,
}

impl Diagnostic {
    pub fn error(position: SourcePosition, message: impl Into<String>) -> Self {
        Diagnostic {
            level: DiagnosticLevel::Error,
            position,
            message: message.into(),
            help: None,
            code: None,
        }
    }

    pub fn warning(position: SourcePosition, message: impl Into<String>) -> Self {
        Diagnostic {
            level: DiagnosticLevel::Warning,
            position,
            message: message.into(),
            help: None,
            code: None,
        }
    }

    pub fn note(position: SourcePosition, message: impl Into<String>) -> Self {
        Diagnostic {
            level: DiagnosticLevel::Note,
            position,
            message: message.into(),
            help: None,
            code: None,
        }
    }

    pub fn with_help(mut self, help: impl Into<String>) -> Self {
        self.help = Some(help.into());
        self
    }

    pub fn with_code(mut self, code: &'static str) -> Self {
        self.code = Some(code);
        self
    }
}

/// Collects diagnostics for a whole compilation run and renders them
/// against a `SourceMap`. Phases append to the same engine; nothing in the
/// pipeline throws away a diagnostic just because a later phase also found
/// something wrong at the same site (except the `error`-type absorption
/// rule, which is enforced by the type checker itself, not here).
#[derive(Debug, Default)]
pub struct DiagnosticEngine {
    diagnostics: Vec<Diagnostic>,
}

impl DiagnosticEngine {
    pub fn new() -> Self {
        DiagnosticEngine::default()
    }

    pub fn push(&mut self, diagnostic: Diagnostic) {
        self.diagnostics.push(diagnostic);
    }

    pub fn error(&mut self, position: SourcePosition, message: impl Into<String>) {
        self.push(Diagnostic::error(position, message));
    }

    pub fn warning(&mut self, position: SourcePosition, message: impl Into<String>) {
        self.push(Diagnostic::warning(position, message));
    }

    pub fn error_count(&self) -> usize {
        self.diagnostics
            .iter()
            .filter(|d| d.level == DiagnosticLevel::Error)
            .count()
    }

    pub fn warning_count(&self) -> usize {
        self.diagnostics
            .iter()
            .filter(|d| d.level == DiagnosticLevel::Warning)
            .count()
    }

    /// Compilation fails iff the error count is non-zero (spec §6.5/§7).
    pub fn has_errors(&self) -> bool {
        self.error_count() > 0
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    pub fn append(&mut self, other: DiagnosticEngine) {
        self.diagnostics.extend(other.diagnostics);
    }

    /// Render every collected diagnostic plus a trailing summary line
    /// (spec §6.5). Diagnostics are rendered in the order they were
    /// appended, which for a single module is source order and across
    /// modules is import-topological order — the pipeline is responsible
    /// for appending in that order, not this engine.
    pub fn render(&self, sources: &SourceMap) -> String {
        let mut out = String::new();
        for d in &self.diagnostics {
            render_one(&mut out, d, sources);
        }
        out.push_str(&format!(
            "{} error(s), {} warning(s)\n",
            self.error_count(),
            self.warning_count()
        ));
        out
    }
}

fn render_one(out: &mut String, d: &Diagnostic, sources: &SourceMap) {
    let path = sources.path(d.position.file).display();
    out.push_str(&format!(
        "{}:{}: {}: {}\n",
        path, d.position, d.level, d.message
    ));
    let line_text = sources.line(d.position.file, d.position.line);
    if !line_text.is_empty() {
        out.push_str(&format!("  {line_text}\n"));
        out.push_str(&format!("  {}^\n", " ".repeat(d.position.column)));
    }
    if let Some(help) = &d.help {
        out.push_str(&format!("  help: {help}\n"));
    }
}

/// Levenshtein-ish "did you mean" suggestion: returns the closest candidate
/// within edit distance 2, or `None`. Used by symbol resolution (spec §4.5)
/// and the preprocessor's undefined-constant diagnostics.
pub fn suggest_closest<'a>(name: &str, candidates: impl Iterator<Item = &'a str>) -> Option<&'a str> {
    let mut best: Option<(&str, usize)> = None;
    for candidate in candidates {
        let dist = edit_distance(name, candidate);
        if dist <= 2 && best.map(|(_, d)| dist < d).unwrap_or(true) {
            best = Some((candidate, dist));
        }
    }
    best.map(|(c, _)| c)
}

fn edit_distance(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let mut row: Vec<usize> = (0..=b.len()).collect();
    for i in 1..=a.len() {
        let mut prev = row[0];
        row[0] = i;
        for j in 1..=b.len() {
            let cur = row[j];
            row[j] = if a[i - 1] == b[j - 1] {
                prev
            } else {
                1 + prev.min(row[j]).min(row[j - 1])
            };
            prev = cur;
        }
    }
    row[b.len()]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pos() -> SourcePosition {
        SourcePosition::new(FileId(0), 0, 0)
    }

    #[test]
    fn empty_engine_has_no_errors() {
        assert!(!DiagnosticEngine::new().has_errors());
    }

    #[test]
    fn error_increments_error_count_not_warning() {
        let mut engine = DiagnosticEngine::new();
        engine.error(pos(), "boom");
        assert_eq!(engine.error_count(), 1);
        assert_eq!(engine.warning_count(), 0);
        assert!(engine.has_errors());
    }

    #[test]
    fn suggest_closest_finds_typo() {
        let candidates = ["length", "width", "height"];
        assert_eq!(
            suggest_closest("lenght", candidates.iter().copied()),
            Some("length")
        );
    }

    #[test]
    fn suggest_closest_rejects_far_match() {
        let candidates = ["completely_different_name"];
        assert_eq!(suggest_closest("x", candidates.iter().copied()), None);
    }

    #[test]
    fn render_includes_caret_and_summary() {
        let mut map = SourceMap::new();
        let id = map.add("main.aria", "let x = 1;".to_string());
        let mut engine = DiagnosticEngine::new();
        engine.push(Diagnostic::error(SourcePosition::new(id, 0, 4), "bad token").with_help("try `x`"));
        let rendered = engine.render(&map);
        assert!(rendered.contains("error: bad token"));
        assert!(rendered.contains('^'));
        assert!(rendered.contains("1 error(s), 0 warning(s)"));
    }
}
