//! Borrow & Escape Analysis (spec §4.6), "Appendage Theory": a safe
//! reference must not outlive the value it points into.
//!
//! Grounded on `original_source/src/frontend/sema/borrow_checker.cpp`'s
//! `BorrowContext` (scope-depth map, reference-origin map, wild-allocation
//! ledger) but rebuilt as an ordinary Rust walker producing diagnostics
//! instead of printing to stderr and flipping a `has_errors` bool, matching
//! this crate's `DiagnosticEngine` convention already established in
//! `resolver.rs` and `typechecker.rs`.

use crate::ast::{Expr, Stmt, UnOp, VarDecl};
use aria_core::{Diagnostic, DiagnosticEngine, SourcePosition};
use std::collections::HashMap;

const E_WILDX_ESCAPE: &str = "E_WILDX_ESCAPE";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Origin {
    /// Declared in this function at the given scope depth.
    Local(u32),
    /// Not tracked here — parameter or module-level symbol; assumed to
    /// outlive anything declared inside the function body.
    External,
}

struct FunctionScope {
    /// name -> declaration depth.
    depths: HashMap<String, u32>,
    /// safe-reference name -> the variable it was bound from.
    reference_origins: HashMap<String, String>,
    /// wild allocations not yet matched with a `defer free(name)`.
    wild_ledger: HashMap<String, SourcePosition>,
    pinned: HashMap<String, SourcePosition>,
    /// names declared with `wildx` storage — tracked for the escape rule
    /// (rule 5), which forbids these leaving the function any way at all.
    wildx_vars: std::collections::HashSet<String>,
    depth: u32,
}

impl FunctionScope {
    fn new() -> Self {
        FunctionScope {
            depths: HashMap::new(),
            reference_origins: HashMap::new(),
            wild_ledger: HashMap::new(),
            pinned: HashMap::new(),
            wildx_vars: std::collections::HashSet::new(),
            depth: 0,
        }
    }

    fn enter(&mut self) {
        self.depth += 1;
    }

    /// Drops bookkeeping for names declared at the scope being left (rule
    /// 6's ledger is checked by the caller before they're dropped here).
    fn leave(&mut self) {
        let depth = self.depth;
        self.depths.retain(|_, d| *d != depth);
        self.reference_origins.retain(|name, _| self.depths.contains_key(name));
        self.pinned.retain(|name, _| self.depths.contains_key(name));
        self.depth -= 1;
    }

    fn declare(&mut self, name: &str) {
        self.depths.insert(name.to_string(), self.depth);
    }

    fn origin_depth(&self, name: &str) -> Origin {
        self.depths
            .get(name)
            .copied()
            .map(Origin::Local)
            .unwrap_or(Origin::External)
    }

    /// Follows `reference_origins` transitively to the ultimate host (rule 3).
    fn ultimate_origin<'a>(&'a self, mut name: &'a str) -> &'a str {
        let mut seen = 0;
        while let Some(next) = self.reference_origins.get(name) {
            name = next;
            seen += 1;
            if seen > 64 {
                break; // defensive bound against a malformed cycle
            }
        }
        name
    }
}

pub struct BorrowChecker {
    diagnostics: DiagnosticEngine,
}

impl BorrowChecker {
    pub fn new() -> Self {
        BorrowChecker {
            diagnostics: DiagnosticEngine::new(),
        }
    }

    pub fn into_diagnostics(self) -> DiagnosticEngine {
        self.diagnostics
    }

    pub fn check_function_body(&mut self, params: &[String], body: &[Stmt]) {
        let mut scope = FunctionScope::new();
        for param in params {
            scope.declare(param);
        }
        self.check_block(body, &mut scope);
        for (name, pos) in &scope.wild_ledger {
            self.diagnostics.push(
                Diagnostic::warning(*pos, format!("wild allocation '{name}' may not be freed"))
                    .with_help(format!("add `defer free({name});` near its declaration")),
            );
        }
    }

    fn check_block(&mut self, body: &[Stmt], scope: &mut FunctionScope) {
        scope.enter();
        for stmt in body {
            self.check_stmt(stmt, scope);
        }
        scope.leave();
    }

    fn check_stmt(&mut self, stmt: &Stmt, scope: &mut FunctionScope) {
        match stmt {
            Stmt::VarDecl(v) => self.check_var_decl(v, scope),
            Stmt::Return(value, pos) => {
                if let Some(value) = value {
                    self.check_expr(value, scope);
                    self.check_escaping_return(value, scope, *pos);
                }
            }
            Stmt::Expr(e) => self.check_expr(e, scope),
            Stmt::Defer(inner, _) => {
                self.mark_deferred_frees(inner, scope);
                self.check_stmt(inner, scope);
            }
            Stmt::Block(stmts, _) => self.check_block(stmts, scope),
            Stmt::If { cond, then_branch, else_branch, .. } => {
                self.check_expr(cond, scope);
                self.check_block(then_branch, scope);
                if let Some(else_branch) = else_branch {
                    self.check_block(else_branch, scope);
                }
            }
            Stmt::While { cond, body, .. } => {
                self.check_expr(cond, scope);
                self.check_block(body, scope);
            }
            Stmt::ForIn { iterable, body, binding, .. } => {
                self.check_expr(iterable, scope);
                scope.enter();
                scope.declare(binding);
                for s in body {
                    self.check_stmt(s, scope);
                }
                scope.leave();
            }
            Stmt::Loop { start, limit, step, body, .. } => {
                self.check_expr(start, scope);
                self.check_expr(limit, scope);
                self.check_expr(step, scope);
                self.check_block(body, scope);
            }
            Stmt::Till { limit, step, body, .. } => {
                self.check_expr(limit, scope);
                self.check_expr(step, scope);
                self.check_block(body, scope);
            }
            Stmt::When { cond, body, then_branch, end_branch, .. } => {
                self.check_expr(cond, scope);
                self.check_block(body, scope);
                for branch in [then_branch, end_branch].into_iter().flatten() {
                    self.check_block(branch, scope);
                }
            }
            Stmt::Pick { selector, arms, .. } => {
                self.check_expr(selector, scope);
                for arm in arms {
                    self.check_block(&arm.body, scope);
                }
            }
            Stmt::FuncDecl(_) | Stmt::StructDecl(_) | Stmt::TraitDecl(_) | Stmt::ImplDecl(_) | Stmt::Use(_) => {}
            Stmt::Break(_, _) | Stmt::Continue(_, _) | Stmt::Error(_) => {}
        }
    }

    fn check_var_decl(&mut self, v: &VarDecl, scope: &mut FunctionScope) {
        scope.declare(&v.name);
        if v.storage == crate::ast::StorageClass::Wild {
            scope.wild_ledger.insert(v.name.clone(), v.pos);
        }
        if v.storage == crate::ast::StorageClass::Wildx {
            scope.wildx_vars.insert(v.name.clone());
        }
        let Some(init) = &v.init else { return };
        self.check_expr(init, scope);

        match init {
            Expr::Unary { op: UnOp::AddressOf, operand, .. } | Expr::Unary { op: UnOp::Pin, operand, .. } => {
                if let Expr::Identifier(host, _) = operand.as_ref() {
                    scope.reference_origins.insert(v.name.clone(), host.clone());
                    let host_origin = scope.ultimate_origin(host).to_string();
                    self.check_lifetime(&v.name, &host_origin, scope, v.pos);
                    if matches!(init, Expr::Unary { op: UnOp::Pin, .. }) {
                        scope.pinned.insert(host.clone(), v.pos);
                    }
                }
            }
            Expr::Identifier(rhs, _) if scope.reference_origins.contains_key(rhs) => {
                let origin = scope.ultimate_origin(rhs).to_string();
                scope.reference_origins.insert(v.name.clone(), origin.clone());
                self.check_lifetime(&v.name, &origin, scope, v.pos);
            }
            _ => {}
        }
    }

    /// Rule 2/3: `name1 = @name2` (or `#name2`, or transitively through an
    /// existing reference) requires `depth(host) <= depth(reference)`.
    fn check_lifetime(&mut self, reference: &str, host: &str, scope: &FunctionScope, pos: SourcePosition) {
        let host_depth = match scope.origin_depth(host) {
            Origin::External => return, // parameter or global: always safe
            Origin::Local(d) => d,
        };
        let ref_depth = match scope.origin_depth(reference) {
            Origin::External => scope.depth,
            Origin::Local(d) => d,
        };
        if host_depth > ref_depth {
            self.diagnostics.error(
                pos,
                format!(
                    "reference outlives host: '{reference}' (depth {ref_depth}) points into '{host}' (depth {host_depth})"
                ),
            );
        }
    }

    /// Rule 4: returning a stack-local, or a reference/pin of one, is an error.
    fn check_escaping_return(&mut self, value: &Expr, scope: &FunctionScope, pos: SourcePosition) {
        let name = match value {
            Expr::Identifier(name, _) => Some(name.as_str()),
            Expr::Unary { op: UnOp::AddressOf | UnOp::Pin, operand, .. } => match operand.as_ref() {
                Expr::Identifier(name, _) => Some(name.as_str()),
                _ => None,
            },
            _ => None,
        };
        let Some(name) = name else { return };
        let origin = scope.ultimate_origin(name);
        if scope.wildx_vars.contains(origin) {
            self.report_wildx_escape(pos, "return");
        } else if let Origin::Local(_) = scope.origin_depth(origin) {
            self.diagnostics.error(
                pos,
                format!("'{origin}' does not live long enough to be returned from this function"),
            );
        }
    }

    fn report_wildx_escape(&mut self, pos: SourcePosition, context: &str) {
        self.diagnostics.push(
            Diagnostic::error(pos, format!("wildx pointer escapes via {context}")).with_code(E_WILDX_ESCAPE),
        );
    }

    /// Rule 7: walks a `defer` body for `free(name)` calls to mark the
    /// wild-allocation ledger as satisfied.
    fn mark_deferred_frees(&mut self, deferred: &Stmt, scope: &mut FunctionScope) {
        if let Stmt::Expr(Expr::Call { callee, args, .. }) = deferred {
            if let Expr::Identifier(name, _) = callee.as_ref() {
                if name == "free" {
                    if let Some(Expr::Identifier(arg, _)) = args.first() {
                        scope.wild_ledger.remove(arg);
                    }
                }
            }
        }
    }

    fn check_expr(&mut self, expr: &Expr, scope: &mut FunctionScope) {
        match expr {
            Expr::Binary { lhs, rhs, .. } => {
                self.check_expr(lhs, scope);
                self.check_expr(rhs, scope);
            }
            Expr::Unary { operand, .. } => self.check_expr(operand, scope),
            Expr::Call { args, pos, .. } => {
                for arg in args {
                    self.check_expr(arg, scope);
                    if let Expr::Identifier(name, _) = arg {
                        let origin = scope.ultimate_origin(name).to_string();
                        if scope.wildx_vars.contains(&origin) {
                            self.report_wildx_escape(*pos, "argument passing");
                        }
                    }
                }
            }
            Expr::Index { base, index, .. } => {
                self.check_expr(base, scope);
                self.check_expr(index, scope);
            }
            Expr::Member { base, .. } => self.check_expr(base, scope),
            Expr::Ternary { cond, then_branch, else_branch, .. } => {
                self.check_expr(cond, scope);
                self.check_expr(then_branch, scope);
                self.check_expr(else_branch, scope);
            }
            Expr::Assign { target, value, pos, .. } => {
                self.check_expr(value, scope);
                let Expr::Identifier(name, _) = target.as_ref() else { return };
                if scope.pinned.contains_key(name) {
                    self.diagnostics.error(
                        *pos,
                        format!("'{name}' is pinned and cannot be reassigned while pinned"),
                    );
                }
                if let Expr::Unary { op: UnOp::AddressOf, operand, .. } | Expr::Unary { op: UnOp::Pin, operand, .. } = value.as_ref() {
                    if let Expr::Identifier(host, _) = operand.as_ref() {
                        scope.reference_origins.insert(name.clone(), host.clone());
                        let host_origin = scope.ultimate_origin(host).to_string();
                        self.check_lifetime(name, &host_origin, scope, *pos);
                    }
                }
            }
            Expr::Await(inner, _) | Expr::Spawn(inner, _) => self.check_expr(inner, scope),
            Expr::Unwrap { value, default, .. } => {
                self.check_expr(value, scope);
                if let Some(default) = default {
                    self.check_expr(default, scope);
                }
            }
            Expr::ArrayLiteral(elements, _) => {
                for e in elements {
                    self.check_expr(e, scope);
                }
            }
            Expr::ObjectLiteral(fields, _) => {
                for (_, e) in fields {
                    self.check_expr(e, scope);
                }
            }
            Expr::VectorLiteral { args, .. } => {
                for a in args {
                    self.check_expr(a, scope);
                }
            }
            Expr::RangeExclusive(a, b, _) | Expr::RangeInclusive(a, b, _) => {
                self.check_expr(a, scope);
                self.check_expr(b, scope);
            }
            Expr::TemplateString(parts, _) => {
                for part in parts {
                    if let Some(e) = &part.expr {
                        self.check_expr(e, scope);
                    }
                }
            }
            Expr::Lambda(_, _) | Expr::Literal(_, _) | Expr::Identifier(_, _) | Expr::Error(_) => {}
        }
    }
}

impl Default for BorrowChecker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::Parser;
    use aria_core::FileId;

    fn check_fn(src: &str) -> DiagnosticEngine {
        let mut parser = Parser::new(src, FileId(0), true);
        let program = parser.parse();
        let f = program.find_function("main").expect("expected a main function");
        let mut checker = BorrowChecker::new();
        checker.check_function_body(&f.params.iter().map(|p| p.name.clone()).collect::<Vec<_>>(), &f.body);
        checker.into_diagnostics()
    }

    #[test]
    fn reference_to_outer_scope_variable_is_safe() {
        let diags = check_fn(
            "func:main = int32() { int32:x = 1; { gc int32:r = @x; } return 0; }",
        );
        assert!(!diags.has_errors(), "{:?}", diags.diagnostics());
    }

    #[test]
    fn reference_outliving_its_host_is_an_error() {
        let diags = check_fn(
            "func:main = int32() { gc int32:r = null; { int32:x = 1; r = @x; } return 0; }",
        );
        assert!(diags.has_errors());
    }

    #[test]
    fn returning_address_of_a_stack_local_is_an_error() {
        let diags = check_fn("func:main = int32() { int32:x = 1; return @x; }");
        assert!(diags.has_errors());
    }

    #[test]
    fn wild_allocation_without_defer_free_warns() {
        let diags = check_fn("func:main = int32() { wild int32:p = 0; return 0; }");
        assert!(diags.warning_count() >= 1);
    }

    #[test]
    fn wild_allocation_with_defer_free_is_clean() {
        let diags = check_fn(
            "func:main = int32() { wild int32:p = 0; defer free(p); return 0; }",
        );
        assert_eq!(diags.warning_count(), 0);
    }

    #[test]
    fn returning_a_wildx_pointer_is_a_security_violation() {
        let diags = check_fn(
            "func:main = int32() { wildx int32:p = 0; return @p; }",
        );
        assert!(diags.diagnostics().iter().any(|d| d.code == Some(E_WILDX_ESCAPE)));
    }

    #[test]
    fn passing_a_wildx_pointer_as_an_argument_is_a_security_violation() {
        let diags = check_fn(
            "func:main = int32() { wildx int32:p = 0; run(p); return 0; }",
        );
        assert!(diags.diagnostics().iter().any(|d| d.code == Some(E_WILDX_ESCAPE)));
    }

    #[test]
    fn reassigning_a_pinned_value_is_an_error() {
        let diags = check_fn(
            "func:main = int32() { int32:x = 1; gc int32:r = #x; x = 2; return 0; }",
        );
        assert!(diags.has_errors());
    }
}
