//! Whole-program codegen driver (spec §4.11): struct types, vtable types
//! and instances, then every function body in turn.

use super::types::llvm_type;
use super::CodeGen;
use crate::ast::{Program, Stmt};
use crate::codegen::error::CodeGenError;
use crate::typechecker::resolve_type_expr;
use crate::vtable::{trait_object_struct_type_name, vtable_global_name, vtable_struct_type_name};

impl CodeGen<'_> {
    pub(super) fn codegen_program(&mut self, program: &Program) -> Result<(), CodeGenError> {
        self.emit_struct_types(program)?;
        self.emit_vtable_types_and_instances()?;

        for item in &program.items {
            if let Stmt::FuncDecl(f) = item {
                if f.is_extern || !f.generics.is_empty() {
                    continue;
                }
                self.codegen_function_body(f, &f.name)?;
            }
        }

        let specialized = self.mono.specialized_functions().to_vec();
        for f in &specialized {
            self.codegen_function_body(f, &f.name)?;
        }
        Ok(())
    }

    fn emit_struct_types(&mut self, program: &Program) -> Result<(), CodeGenError> {
        for item in &program.items {
            if let Stmt::StructDecl(s) = item {
                if !s.generics.is_empty() {
                    continue;
                }
                let field_tys: Vec<String> = s
                    .fields
                    .iter()
                    .map(|f| llvm_type(&resolve_type_expr(&f.ty, self.env)))
                    .collect();
                self.emit_header_line(format!(
                    "%struct.{} = type {{ {} }}",
                    s.name,
                    field_tys.join(", ")
                ));
            }
        }
        self.emit_header_line("");
        Ok(())
    }

    /// Emits, for every trait: its trait-object fat-pointer type and its
    /// vtable struct type; and for every `impl Trait for Type`: the
    /// concrete vtable global instance (spec §4.10).
    fn emit_vtable_types_and_instances(&mut self) -> Result<(), CodeGenError> {
        let trait_names: Vec<String> = self.vtables.trait_names().cloned().collect();
        for trait_name in &trait_names {
            self.emit_header_line(format!(
                "%{} = type {{ ptr, ptr }}",
                trait_object_struct_type_name(trait_name)
            ));
            let Some(layout) = self.vtables.layout_for(trait_name) else { continue };
            let slots = vec!["ptr".to_string(); layout.method_names.len()];
            self.emit_header_line(format!(
                "%{} = type {{ {} }}",
                vtable_struct_type_name(trait_name),
                slots.join(", ")
            ));
        }
        self.emit_header_line("");

        let impl_pairs: Vec<(String, String)> =
            self.vtables.impl_pairs().map(|(t, ty)| (t.clone(), ty.clone())).collect();
        for (trait_name, type_name) in &impl_pairs {
            let Some(instance) = self.vtables.vtable_instance(trait_name, type_name, self.mono).cloned() else {
                continue;
            };
            let entries: Vec<String> = instance.slots.iter().map(|f| format!("ptr @{f}")).collect();
            self.emit_header_line(format!(
                "@{} = global %{} {{ {} }}",
                vtable_global_name(trait_name, type_name),
                vtable_struct_type_name(trait_name),
                entries.join(", ")
            ));
        }
        self.emit_header_line("");
        Ok(())
    }
}
