//! Statement-level codegen (spec §3.2, §4.3 auto_wrap, §4.6 storage classes).

use super::types::llvm_type;
use super::CodeGen;
use crate::ast::{FuncDecl, Stmt, StorageClass};
use crate::codegen::error::CodeGenError;
use crate::types::Type;

impl CodeGen<'_> {
    pub(super) fn codegen_block(&mut self, stmts: &[Stmt]) -> Result<(), CodeGenError> {
        for stmt in stmts {
            self.codegen_stmt(stmt)?;
        }
        Ok(())
    }

    fn codegen_stmt(&mut self, stmt: &Stmt) -> Result<(), CodeGenError> {
        match stmt {
            Stmt::VarDecl(v) => self.codegen_var_decl(v),
            Stmt::Expr(e) => {
                self.codegen_expr(e)?;
                Ok(())
            }
            Stmt::Return(value, _) => self.codegen_return(value.as_ref()),
            Stmt::Break(label, _) => self.codegen_break(label.as_deref()),
            Stmt::Continue(label, _) => self.codegen_continue(label.as_deref()),
            Stmt::Defer(inner, _) => {
                self.push_defer((**inner).clone());
                Ok(())
            }
            Stmt::Block(body, _) => {
                self.push_scope();
                self.codegen_block(body)?;
                self.emit_block_exit_defers()?;
                self.pop_scope();
                Ok(())
            }
            Stmt::If { cond, then_branch, else_branch, .. } => {
                self.codegen_if(cond, then_branch, else_branch.as_deref())
            }
            Stmt::While { cond, body, label, .. } => self.codegen_while(cond, body, label.as_deref()),
            Stmt::ForIn { binding, iterable, body, label, .. } => {
                self.codegen_for_in(binding, iterable, body, label.as_deref())
            }
            Stmt::Loop { start, limit, step, body, label, .. } => {
                self.codegen_loop(start, limit, step, body, label.as_deref())
            }
            Stmt::Till { limit, step, body, label, .. } => self.codegen_till(limit, step, body, label.as_deref()),
            Stmt::When { cond, body, then_branch, end_branch, label, .. } => {
                self.codegen_when(cond, body, then_branch.as_deref(), end_branch.as_deref(), label.as_deref())
            }
            Stmt::Pick { selector, arms, .. } => self.codegen_pick(selector, arms),
            // Nested declarations inside a function body have no codegen
            // of their own here; `program.rs` walks top-level items.
            Stmt::FuncDecl(_) | Stmt::StructDecl(_) | Stmt::TraitDecl(_) | Stmt::ImplDecl(_) | Stmt::Use(_) => Ok(()),
            Stmt::Error(pos) => Err(CodeGenError::Logic(format!("parse error reached codegen at {pos:?}"))),
        }
    }

    /// Runs the innermost scope's pending `defer` statements in LIFO order,
    /// as the block they were registered in exits normally (spec §3.2).
    pub(super) fn emit_block_exit_defers(&mut self) -> Result<(), CodeGenError> {
        for stmt in self.current_scope_defers() {
            self.codegen_stmt(&stmt)?;
        }
        Ok(())
    }

    fn codegen_var_decl(&mut self, v: &crate::ast::VarDecl) -> Result<(), CodeGenError> {
        let ty = crate::typechecker::resolve_type_expr(&v.ty, self.env);
        let llty = llvm_type(&ty);
        let ptr = match v.storage {
            StorageClass::Stack => {
                let reg = self.new_reg();
                self.emit(format!("  {reg} = alloca {llty}"));
                reg
            }
            StorageClass::Gc => {
                let size = super::types::size_of(&ty);
                let raw = self.new_reg();
                self.emit(format!("  {raw} = call ptr @aria_gc_alloc(i64 {size}, i32 0)"));
                raw
            }
            StorageClass::Wild => {
                let size = super::types::size_of(&ty);
                let raw = self.new_reg();
                self.emit(format!("  {raw} = call ptr @aria_wild_alloc(i64 {size})"));
                raw
            }
            StorageClass::Wildx => {
                let size = super::types::size_of(&ty);
                let raw = self.new_reg();
                self.emit(format!("  {raw} = call ptr @aria_wildx_alloc(i64 {size})"));
                let made_executable = self.new_reg();
                self.emit(format!("  {made_executable} = call i32 @aria_wildx_make_executable(ptr {raw}, i64 {size})"));
                raw
            }
        };
        if let Some(init) = &v.init {
            let value = self.codegen_expr(init)?;
            self.emit(format!("  store {llty} {}, ptr {ptr}", value.reg));
        }
        self.declare_local(&v.name, ptr, ty);
        Ok(())
    }

    fn codegen_return(&mut self, value: Option<&crate::ast::Expr>) -> Result<(), CodeGenError> {
        let value_val = match value {
            Some(e) => Some(self.codegen_expr(e)?),
            None => None,
        };
        for stmt in self.all_pending_defers() {
            self.codegen_stmt(&stmt)?;
        }
        match value_val {
            None => self.emit("  ret void"),
            Some(v) => {
                let llty = llvm_type(&v.ty);
                self.emit(format!("  ret {llty} {}", v.reg));
            }
        }
        Ok(())
    }

    fn codegen_break(&mut self, label: Option<&str>) -> Result<(), CodeGenError> {
        let target = self.resolve_loop_target(label, |t| t.break_label.clone())?;
        self.emit(format!("  br label %{target}"));
        Ok(())
    }

    fn codegen_continue(&mut self, label: Option<&str>) -> Result<(), CodeGenError> {
        let target = self.resolve_loop_target(label, |t| t.continue_label.clone())?;
        self.emit(format!("  br label %{target}"));
        Ok(())
    }

    fn resolve_loop_target(
        &self,
        label: Option<&str>,
        pick: impl Fn(&super::state::LoopTarget) -> String,
    ) -> Result<String, CodeGenError> {
        match label {
            Some(name) => self
                .loops
                .iter()
                .rev()
                .find(|t| t.label.as_deref() == Some(name))
                .map(&pick)
                .ok_or_else(|| CodeGenError::Logic(format!("no enclosing loop labeled '{name}'"))),
            None => self
                .loops
                .last()
                .map(&pick)
                .ok_or_else(|| CodeGenError::Logic("break/continue outside any loop".to_string())),
        }
    }

    /// Emits one function's body, including the `auto_wrap` return-value
    /// wrapping into `%result.<suffix>` when the declared return type is a
    /// `result<T>` and the function's body yields a bare `T` (spec §4.3).
    pub(super) fn codegen_function_body(&mut self, f: &FuncDecl, mangled_name: &str) -> Result<(), CodeGenError> {
        let return_ty = crate::typechecker::resolve_type_expr(&f.return_ty, self.env);
        let ret_llvm = llvm_type(&return_ty);
        let params_sig: Vec<String> = f
            .params
            .iter()
            .map(|p| {
                let ty = crate::typechecker::resolve_type_expr(&p.ty, self.env);
                format!("{} %{}", llvm_type(&ty), p.name)
            })
            .collect();
        self.emit(format!(
            "define {ret_llvm} @{mangled_name}({}) {{",
            params_sig.join(", ")
        ));
        self.emit("entry:");
        self.push_scope();
        for p in &f.params {
            let ty = crate::typechecker::resolve_type_expr(&p.ty, self.env);
            let llty = llvm_type(&ty);
            let slot = self.new_reg();
            self.emit(format!("  {slot} = alloca {llty}"));
            self.emit(format!("  store {llty} %{}, ptr {slot}", p.name));
            self.declare_local(&p.name, slot, ty);
        }
        self.codegen_block(&f.body)?;
        self.emit_block_exit_defers()?;
        if matches!(return_ty, Type::Void) {
            self.emit("  ret void");
        } else {
            // A well-typed body always returns on every path; this default
            // only fires for an empty body and keeps the block terminated.
            self.emit(format!("  ret {ret_llvm} zeroinitializer"));
        }
        self.pop_scope();
        self.emit("}");
        self.emit("");
        Ok(())
    }
}
