//! Generic resolver & monomorphization (spec §4.9).
//!
//! Grounded on
//! `original_source/archive/v0.0.17_20251214_215757/backend/monomorphization.h`'s
//! `MonomorphizationContext`/`Monomorphizer`: a `(trait, type, method) ->
//! specialized name` map, a trait table, a multimap of trait to impls, and
//! a cache of already-cloned specialized functions. The header's
//! `cloneFuncDecl`/`cloneExpr`/`cloneStmt`/`cloneBlock` quartet exists only
//! because C++ ASTs are owned through `unique_ptr` with no structural
//! `Clone`; `ast::FuncDecl` already derives `Clone`, so deep-cloning is one
//! `.clone()` call and the substitution pass is the only new code needed.

use crate::ast::{Expr, FuncDecl, ImplDecl, Param, Stmt, TraitDecl, TypeExpr, VarDecl};
use std::collections::HashMap;

/// Name mangling (spec §6.2): `<trait>_<type>_<method>`.
pub fn mangle_method_name(trait_name: &str, type_name: &str, method_name: &str) -> String {
    format!("{trait_name}_{type_name}_{method_name}")
}

/// Name mangling for a monomorphized generic struct/function, e.g.
/// `List<int32>` -> `List_int32`.
pub fn mangle_generic_name(base_name: &str, type_args: &[String]) -> String {
    if type_args.is_empty() {
        return base_name.to_string();
    }
    format!("{base_name}_{}", type_args.join("_"))
}

#[derive(Default)]
pub struct Monomorphizer {
    /// `(trait, type, method) -> specialized name`, the engine's public
    /// cache key (spec §4.9 "the monomorphizer's public operation").
    specializations: HashMap<(String, String, String), String>,
    /// `(generic struct/function name, type-arg tuple) -> specialized name`.
    generic_specializations: HashMap<(String, Vec<String>), String>,
    specialized_functions: Vec<FuncDecl>,
    traits: HashMap<String, TraitDecl>,
    impls: HashMap<String, Vec<ImplDecl>>,
}

impl Monomorphizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_trait(&mut self, decl: TraitDecl) {
        self.traits.insert(decl.name.clone(), decl);
    }

    pub fn register_impl(&mut self, decl: ImplDecl) {
        self.impls.entry(decl.trait_name.clone()).or_default().push(decl);
    }

    pub fn specialized_functions(&self) -> &[FuncDecl] {
        &self.specialized_functions
    }

    fn find_impl_method(&self, trait_name: &str, type_name: &str, method_name: &str) -> Option<&FuncDecl> {
        self.impls
            .get(trait_name)?
            .iter()
            .find(|impl_decl| impl_decl.type_name == type_name)?
            .methods
            .iter()
            .find(|m| m.name == method_name)
    }

    /// The monomorphizer's public operation (spec §4.9): on first request,
    /// deep-clones the impl method, substitutes `Self` for the concrete
    /// type, renames it, and caches the clone; on every later request with
    /// the same key the cached name comes back with no further work.
    pub fn get_or_create(&mut self, trait_name: &str, type_name: &str, method_name: &str) -> Option<String> {
        let key = (trait_name.to_string(), type_name.to_string(), method_name.to_string());
        if let Some(existing) = self.specializations.get(&key) {
            return Some(existing.clone());
        }
        let original = self.find_impl_method(trait_name, type_name, method_name)?.clone();
        let specialized_name = mangle_method_name(trait_name, type_name, method_name);
        let mut specialized = original;
        specialized.name = specialized_name.clone();
        substitute_self_in_func(&mut specialized, type_name);
        self.specialized_functions.push(specialized);
        self.specializations.insert(key, specialized_name.clone());
        Some(specialized_name)
    }

    /// Monomorphizes every registered impl across every type it's
    /// implemented for (spec §4.9 "monomorphize all registered trait
    /// implementations"), skipping methods already materialized via
    /// `get_or_create`.
    pub fn monomorphize_all(&mut self) -> Vec<String> {
        let targets: Vec<(String, String, String)> = self
            .impls
            .values()
            .flatten()
            .flat_map(|impl_decl| {
                impl_decl
                    .methods
                    .iter()
                    .map(|m| (impl_decl.trait_name.clone(), impl_decl.type_name.clone(), m.name.clone()))
            })
            .collect();
        targets
            .into_iter()
            .filter_map(|(t, ty, m)| self.get_or_create(&t, &ty, &m))
            .collect()
    }

    /// Struct generics work the same way as trait methods (spec §4.9):
    /// `List<int32>` and `List<int64>` each get a specialized struct name,
    /// deduplicated by the `(name, type-args)` key.
    pub fn get_or_create_generic_struct(&mut self, base_name: &str, type_args: &[String]) -> String {
        let key = (base_name.to_string(), type_args.to_vec());
        if let Some(existing) = self.generic_specializations.get(&key) {
            return existing.clone();
        }
        let specialized_name = mangle_generic_name(base_name, type_args);
        self.generic_specializations.insert(key, specialized_name.clone());
        specialized_name
    }
}

/// Rewrites every occurrence of the type name `"Self"` in a cloned impl
/// method's parameter/return types to the concrete type it was
/// specialized for. The method body's expressions never carry a type
/// annotation of their own (spec §3.2's AST keeps types only on
/// declarations), so only signatures need rewriting here.
fn substitute_self_in_func(func: &mut FuncDecl, concrete_type: &str) {
    substitute_self_in_type(&mut func.return_ty, concrete_type);
    for param in &mut func.params {
        substitute_self_in_type(&mut param.ty, concrete_type);
    }
    for stmt in &mut func.body {
        substitute_self_in_stmt(stmt, concrete_type);
    }
}

fn substitute_self_in_type(ty: &mut TypeExpr, concrete_type: &str) {
    match ty {
        TypeExpr::Named(name) if name == "Self" => *name = concrete_type.to_string(),
        TypeExpr::Named(_) => {}
        TypeExpr::Pointer(inner, _) | TypeExpr::Array(inner, _) | TypeExpr::AutoWrap(inner) | TypeExpr::Result(inner) => {
            substitute_self_in_type(inner, concrete_type);
        }
        TypeExpr::Generic(_, args) => {
            for arg in args {
                substitute_self_in_type(arg, concrete_type);
            }
        }
        TypeExpr::Function(params, ret) => {
            for p in params {
                substitute_self_in_type(p, concrete_type);
            }
            substitute_self_in_type(ret, concrete_type);
        }
    }
}

fn substitute_self_in_param(param: &mut Param, concrete_type: &str) {
    substitute_self_in_type(&mut param.ty, concrete_type);
    if let Some(default) = &mut param.default {
        substitute_self_in_expr(default, concrete_type);
    }
}

fn substitute_self_in_var_decl(decl: &mut VarDecl, concrete_type: &str) {
    substitute_self_in_type(&mut decl.ty, concrete_type);
    if let Some(init) = &mut decl.init {
        substitute_self_in_expr(init, concrete_type);
    }
}

fn substitute_self_in_stmt(stmt: &mut Stmt, concrete_type: &str) {
    match stmt {
        Stmt::VarDecl(v) => substitute_self_in_var_decl(v, concrete_type),
        Stmt::FuncDecl(f) => substitute_self_in_func(f, concrete_type),
        Stmt::StructDecl(_) | Stmt::TraitDecl(_) | Stmt::ImplDecl(_) | Stmt::Use(_) => {}
        Stmt::Return(Some(e), _) => substitute_self_in_expr(e, concrete_type),
        Stmt::Return(None, _) | Stmt::Break(_, _) | Stmt::Continue(_, _) | Stmt::Error(_) => {}
        Stmt::Defer(inner, _) => substitute_self_in_stmt(inner, concrete_type),
        Stmt::Expr(e) => substitute_self_in_expr(e, concrete_type),
        Stmt::Block(stmts, _) => stmts.iter_mut().for_each(|s| substitute_self_in_stmt(s, concrete_type)),
        Stmt::If { cond, then_branch, else_branch, .. } => {
            substitute_self_in_expr(cond, concrete_type);
            then_branch.iter_mut().for_each(|s| substitute_self_in_stmt(s, concrete_type));
            if let Some(else_branch) = else_branch {
                else_branch.iter_mut().for_each(|s| substitute_self_in_stmt(s, concrete_type));
            }
        }
        Stmt::While { cond, body, .. } => {
            substitute_self_in_expr(cond, concrete_type);
            body.iter_mut().for_each(|s| substitute_self_in_stmt(s, concrete_type));
        }
        Stmt::ForIn { iterable, body, .. } => {
            substitute_self_in_expr(iterable, concrete_type);
            body.iter_mut().for_each(|s| substitute_self_in_stmt(s, concrete_type));
        }
        Stmt::Loop { start, limit, step, body, .. } => {
            substitute_self_in_expr(start, concrete_type);
            substitute_self_in_expr(limit, concrete_type);
            substitute_self_in_expr(step, concrete_type);
            body.iter_mut().for_each(|s| substitute_self_in_stmt(s, concrete_type));
        }
        Stmt::Till { limit, step, body, .. } => {
            substitute_self_in_expr(limit, concrete_type);
            substitute_self_in_expr(step, concrete_type);
            body.iter_mut().for_each(|s| substitute_self_in_stmt(s, concrete_type));
        }
        Stmt::When { cond, body, then_branch, end_branch, .. } => {
            substitute_self_in_expr(cond, concrete_type);
            body.iter_mut().for_each(|s| substitute_self_in_stmt(s, concrete_type));
            if let Some(t) = then_branch {
                t.iter_mut().for_each(|s| substitute_self_in_stmt(s, concrete_type));
            }
            if let Some(e) = end_branch {
                e.iter_mut().for_each(|s| substitute_self_in_stmt(s, concrete_type));
            }
        }
        Stmt::Pick { selector, arms, .. } => {
            substitute_self_in_expr(selector, concrete_type);
            for arm in arms {
                arm.body.iter_mut().for_each(|s| substitute_self_in_stmt(s, concrete_type));
            }
        }
    }
}

fn substitute_self_in_expr(expr: &mut Expr, concrete_type: &str) {
    match expr {
        Expr::Literal(_, _) | Expr::Identifier(_, _) | Expr::Error(_) => {}
        Expr::Binary { lhs, rhs, .. } => {
            substitute_self_in_expr(lhs, concrete_type);
            substitute_self_in_expr(rhs, concrete_type);
        }
        Expr::Unary { operand, .. } => substitute_self_in_expr(operand, concrete_type),
        Expr::Call { callee, type_args, args, .. } => {
            substitute_self_in_expr(callee, concrete_type);
            for t in type_args {
                substitute_self_in_type(t, concrete_type);
            }
            for a in args {
                substitute_self_in_expr(a, concrete_type);
            }
        }
        Expr::Index { base, index, .. } => {
            substitute_self_in_expr(base, concrete_type);
            substitute_self_in_expr(index, concrete_type);
        }
        Expr::Member { base, .. } => substitute_self_in_expr(base, concrete_type),
        Expr::Ternary { cond, then_branch, else_branch, .. } => {
            substitute_self_in_expr(cond, concrete_type);
            substitute_self_in_expr(then_branch, concrete_type);
            substitute_self_in_expr(else_branch, concrete_type);
        }
        Expr::Lambda(lambda, _) => {
            substitute_self_in_type(&mut lambda.return_ty, concrete_type);
            for param in &mut lambda.params {
                substitute_self_in_param(param, concrete_type);
            }
            for stmt in &mut lambda.body {
                substitute_self_in_stmt(stmt, concrete_type);
            }
        }
        Expr::TemplateString(parts, _) => {
            for part in parts {
                if let Some(e) = &mut part.expr {
                    substitute_self_in_expr(e, concrete_type);
                }
            }
        }
        Expr::RangeExclusive(lo, hi, _) | Expr::RangeInclusive(lo, hi, _) => {
            substitute_self_in_expr(lo, concrete_type);
            substitute_self_in_expr(hi, concrete_type);
        }
        Expr::ArrayLiteral(items, _) => items.iter_mut().for_each(|e| substitute_self_in_expr(e, concrete_type)),
        Expr::ObjectLiteral(fields, _) => {
            for (_, e) in fields {
                substitute_self_in_expr(e, concrete_type);
            }
        }
        Expr::VectorLiteral { args, .. } => args.iter_mut().for_each(|e| substitute_self_in_expr(e, concrete_type)),
        Expr::Unwrap { value, default, .. } => {
            substitute_self_in_expr(value, concrete_type);
            if let Some(d) = default {
                substitute_self_in_expr(d, concrete_type);
            }
        }
        Expr::Await(inner, _) | Expr::Spawn(inner, _) => substitute_self_in_expr(inner, concrete_type),
        Expr::Assign { target, value, .. } => {
            substitute_self_in_expr(target, concrete_type);
            substitute_self_in_expr(value, concrete_type);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::Parser;
    use aria_core::FileId;

    fn parse(src: &str) -> crate::ast::Program {
        let mut parser = Parser::new(src, FileId(0), true);
        parser.parse()
    }

    fn find_trait(program: &crate::ast::Program, name: &str) -> TraitDecl {
        program
            .items
            .iter()
            .find_map(|item| match item {
                Stmt::TraitDecl(t) if t.name == name => Some(t.clone()),
                _ => None,
            })
            .expect("trait not found")
    }

    fn find_impl(program: &crate::ast::Program, trait_name: &str) -> ImplDecl {
        program
            .items
            .iter()
            .find_map(|item| match item {
                Stmt::ImplDecl(i) if i.trait_name == trait_name => Some(i.clone()),
                _ => None,
            })
            .expect("impl not found")
    }

    #[test]
    fn mangled_name_follows_trait_type_method_scheme() {
        assert_eq!(mangle_method_name("Drawable", "Circle", "draw"), "Drawable_Circle_draw");
    }

    #[test]
    fn first_request_clones_and_renames_the_method() {
        let program = parse(
            "trait Drawable { func:draw = void(); } \
             impl Drawable for Circle { func:draw = void() { return; } }",
        );
        let mut mono = Monomorphizer::new();
        mono.register_trait(find_trait(&program, "Drawable"));
        mono.register_impl(find_impl(&program, "Drawable"));

        let name = mono.get_or_create("Drawable", "Circle", "draw").unwrap();
        assert_eq!(name, "Drawable_Circle_draw");
        assert_eq!(mono.specialized_functions().len(), 1);
        assert_eq!(mono.specialized_functions()[0].name, "Drawable_Circle_draw");
    }

    #[test]
    fn second_request_with_same_key_is_deduplicated() {
        let program = parse(
            "trait Drawable { func:draw = void(); } \
             impl Drawable for Circle { func:draw = void() { return; } }",
        );
        let mut mono = Monomorphizer::new();
        mono.register_trait(find_trait(&program, "Drawable"));
        mono.register_impl(find_impl(&program, "Drawable"));

        mono.get_or_create("Drawable", "Circle", "draw").unwrap();
        mono.get_or_create("Drawable", "Circle", "draw").unwrap();
        assert_eq!(mono.specialized_functions().len(), 1);
    }

    #[test]
    fn unknown_impl_returns_none() {
        let mut mono = Monomorphizer::new();
        assert!(mono.get_or_create("Drawable", "Square", "draw").is_none());
    }

    #[test]
    fn self_type_is_substituted_with_the_concrete_type_in_the_signature() {
        let program = parse(
            "trait Cloneable { func:clone_self = Self(); } \
             impl Cloneable for Widget { func:clone_self = Self() { return this; } }",
        );
        let mut mono = Monomorphizer::new();
        mono.register_trait(find_trait(&program, "Cloneable"));
        mono.register_impl(find_impl(&program, "Cloneable"));

        mono.get_or_create("Cloneable", "Widget", "clone_self").unwrap();
        let specialized = &mono.specialized_functions()[0];
        assert_eq!(specialized.return_ty, TypeExpr::Named("Widget".to_string()));
    }

    #[test]
    fn generic_struct_specializations_are_named_per_type_argument_and_deduplicated() {
        let mut mono = Monomorphizer::new();
        let a = mono.get_or_create_generic_struct("List", &["int32".to_string()]);
        let b = mono.get_or_create_generic_struct("List", &["int64".to_string()]);
        let c = mono.get_or_create_generic_struct("List", &["int32".to_string()]);
        assert_eq!(a, "List_int32");
        assert_eq!(b, "List_int64");
        assert_eq!(a, c);
    }

    #[test]
    fn monomorphize_all_covers_every_registered_impl_method() {
        let program = parse(
            "trait Drawable { func:draw = void(); } \
             impl Drawable for Circle { func:draw = void() { return; } } \
             impl Drawable for Square { func:draw = void() { return; } }",
        );
        let mut mono = Monomorphizer::new();
        mono.register_trait(find_trait(&program, "Drawable"));
        for item in &program.items {
            if let Stmt::ImplDecl(i) = item {
                mono.register_impl(i.clone());
            }
        }
        let names = mono.monomorphize_all();
        assert_eq!(names.len(), 2);
        assert!(names.contains(&"Drawable_Circle_draw".to_string()));
        assert!(names.contains(&"Drawable_Square_draw".to_string()));
    }
}
