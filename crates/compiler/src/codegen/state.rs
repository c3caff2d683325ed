//! CodeGen state and core types (spec §4.11).
//!
//! Continues the teacher's `CodeGen` struct-with-counters approach, trimmed
//! down from Seq's stack-machine bookkeeping (virtual stack, word wrapper
//! pairs) to what a named-variable/struct/trait backend needs: a register
//! counter, a label counter, a scoped locals table, and the deferred-block
//! ledger `defer` needs (spec §3.2 "runs its statements in reverse
//! declaration order when the enclosing block exits").

use crate::ast::Stmt;
use crate::monomorphize::Monomorphizer;
use crate::typechecker::GlobalEnv;
use crate::types::Type;
use crate::vtable::VtableGenerator;
use std::collections::HashMap;

/// One local variable's LLVM register (an `alloca`'d pointer) and Aria type.
#[derive(Debug, Clone)]
pub struct Local {
    pub ptr_reg: String,
    pub ty: Type,
}

/// A `continue`/`break` target pair for one loop, plus its optional label
/// (spec §3.2 labeled loops).
#[derive(Debug, Clone)]
pub(super) struct LoopTarget {
    pub label: Option<String>,
    pub continue_label: String,
    pub break_label: String,
}

pub struct CodeGen<'a> {
    /// Function bodies, accumulated as they're generated.
    pub(super) body: String,
    /// Top-level declarations: struct types, vtable globals, string
    /// constants, `declare`d runtime functions.
    pub(super) header: String,
    reg_counter: u32,
    label_counter: u32,
    pub(super) string_counter: u32,
    pub(super) string_constants: HashMap<String, String>,
    pub(super) string_globals: String,
    locals: Vec<HashMap<String, Local>>,
    pub(super) defers: Vec<Vec<Stmt>>,
    pub(super) loops: Vec<LoopTarget>,
    pub debug_info: bool,
    /// Function/struct/trait signatures from Pass 1, consulted whenever
    /// codegen needs an expression's static type (the checker validates
    /// types but doesn't annotate the AST with them, spec §9 "one sum type
    /// per AST category" keeps nodes untyped; codegen re-derives as needed).
    pub(super) env: &'a GlobalEnv,
    pub(super) mono: &'a mut Monomorphizer,
    pub(super) vtables: &'a mut VtableGenerator,
}

impl<'a> CodeGen<'a> {
    pub fn new(
        debug_info: bool,
        env: &'a GlobalEnv,
        mono: &'a mut Monomorphizer,
        vtables: &'a mut VtableGenerator,
    ) -> Self {
        CodeGen {
            body: String::new(),
            header: String::new(),
            reg_counter: 0,
            label_counter: 0,
            string_counter: 0,
            string_constants: HashMap::new(),
            string_globals: String::new(),
            locals: vec![HashMap::new()],
            defers: vec![Vec::new()],
            loops: Vec::new(),
            debug_info,
            env,
            mono,
            vtables,
        }
    }

    pub(super) fn new_reg(&mut self) -> String {
        self.reg_counter += 1;
        format!("%r{}", self.reg_counter)
    }

    pub(super) fn new_label(&mut self, prefix: &str) -> String {
        self.label_counter += 1;
        format!("{prefix}.{}", self.label_counter)
    }

    pub(super) fn emit(&mut self, line: impl AsRef<str>) {
        self.body.push_str(line.as_ref());
        self.body.push('\n');
    }

    pub(super) fn emit_header_line(&mut self, line: impl AsRef<str>) {
        self.header.push_str(line.as_ref());
        self.header.push('\n');
    }

    pub(super) fn push_scope(&mut self) {
        self.locals.push(HashMap::new());
        self.defers.push(Vec::new());
    }

    pub(super) fn pop_scope(&mut self) {
        self.locals.pop();
        self.defers.pop();
    }

    pub(super) fn declare_local(&mut self, name: &str, ptr_reg: String, ty: Type) {
        self.locals
            .last_mut()
            .expect("at least one scope is always open")
            .insert(name.to_string(), Local { ptr_reg, ty });
    }

    pub(super) fn lookup_local(&self, name: &str) -> Option<&Local> {
        self.locals.iter().rev().find_map(|scope| scope.get(name))
    }

    pub(super) fn push_defer(&mut self, stmt: Stmt) {
        self.defers
            .last_mut()
            .expect("at least one scope is always open")
            .push(stmt);
    }

    /// Every pending `defer`, across every open scope, innermost and most
    /// recently pushed first (spec §3.2 LIFO order) — what a `return`
    /// statement must run before it actually returns.
    pub(super) fn all_pending_defers(&self) -> Vec<Stmt> {
        let mut out = Vec::new();
        for scope in self.defers.iter().rev() {
            for stmt in scope.iter().rev() {
                out.push(stmt.clone());
            }
        }
        out
    }

    /// Only the current scope's defers, in LIFO order — what a `{ }` block
    /// must run as it exits normally (not via `return`).
    pub(super) fn current_scope_defers(&self) -> Vec<Stmt> {
        self.defers
            .last()
            .map(|scope| scope.iter().rev().cloned().collect())
            .unwrap_or_default()
    }

    pub(super) fn finish(self) -> String {
        let mut out = self.header;
        out.push_str(&self.string_globals);
        out.push('\n');
        out.push_str(&self.body);
        out
    }
}
