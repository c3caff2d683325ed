//! Vtable layout & dynamic dispatch (spec §4.10).
//!
//! Grounded on `original_source/src/backend/vtable.h`'s `VtableLayout`/
//! `VtableGenerator`, with the LLVM-specific members (`llvm::StructType*`,
//! `llvm::GlobalVariable*`, `IRBuilder<>`) dropped — this module computes
//! the *layout*: slot order, vtable instance contents, and the naming
//! scheme codegen needs, the same separation the teacher draws between
//! its AST-level passes and `codegen/`'s LLVM emission. Actually emitting
//! the fat-pointer struct and the indexed call belongs to codegen (spec
//! §4.11), once that module exists; this one hands it a `DispatchSite`.

use crate::ast::{ImplDecl, TraitDecl};
use crate::monomorphize::Monomorphizer;
use std::collections::{HashMap, HashSet};

/// Slot order for one trait: the result of a depth-first super-trait walk
/// in declaration order, collecting each method name the first time it's
/// seen, then appending the trait's own methods (spec §4.10).
#[derive(Debug, Clone, PartialEq)]
pub struct VtableLayout {
    pub trait_name: String,
    pub method_names: Vec<String>,
    pub method_indices: HashMap<String, usize>,
}

impl VtableLayout {
    pub fn slot_of(&self, method_name: &str) -> Option<usize> {
        self.method_indices.get(method_name).copied()
    }
}

/// The concrete vtable for one `impl TraitName for TypeName`: one
/// specialized function name per slot, in layout order.
#[derive(Debug, Clone, PartialEq)]
pub struct VtableInstance {
    pub trait_name: String,
    pub type_name: String,
    pub slots: Vec<String>,
}

/// What a method call on a trait object needs from this module: the slot
/// to index into the vtable, plus the two struct type names codegen must
/// already have emitted (spec §6.2 naming scheme).
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchSite {
    pub slot_index: usize,
    pub vtable_struct_type: String,
    pub trait_object_struct_type: String,
}

/// Name mangling (spec §6.2).
pub fn vtable_global_name(trait_name: &str, type_name: &str) -> String {
    format!("vtable_{trait_name}_{type_name}")
}

pub fn vtable_struct_type_name(trait_name: &str) -> String {
    format!("vtable_{trait_name}")
}

pub fn trait_object_struct_type_name(trait_name: &str) -> String {
    format!("trait_object_{trait_name}")
}

#[derive(Default)]
pub struct VtableGenerator {
    traits: HashMap<String, TraitDecl>,
    impls: HashMap<(String, String), ImplDecl>,
    layouts: HashMap<String, VtableLayout>,
    instances: HashMap<(String, String), VtableInstance>,
}

impl VtableGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_trait(&mut self, decl: TraitDecl) {
        self.traits.insert(decl.name.clone(), decl);
    }

    pub fn register_impl(&mut self, decl: ImplDecl) {
        self.impls.insert((decl.trait_name.clone(), decl.type_name.clone()), decl);
    }

    /// Computes (and caches) the vtable layout for a trait: a depth-first
    /// walk of its super-traits in declaration order, then its own
    /// methods, skipping any method name already collected (spec §4.10).
    pub fn layout_for(&mut self, trait_name: &str) -> Option<&VtableLayout> {
        if !self.layouts.contains_key(trait_name) {
            let mut method_names = Vec::new();
            let mut seen = HashSet::new();
            let mut visiting = HashSet::new();
            self.collect_methods(trait_name, &mut method_names, &mut seen, &mut visiting)?;
            let method_indices = method_names
                .iter()
                .enumerate()
                .map(|(i, name)| (name.clone(), i))
                .collect();
            self.layouts.insert(
                trait_name.to_string(),
                VtableLayout { trait_name: trait_name.to_string(), method_names, method_indices },
            );
        }
        self.layouts.get(trait_name)
    }

    fn collect_methods(
        &self,
        trait_name: &str,
        out: &mut Vec<String>,
        seen: &mut HashSet<String>,
        visiting: &mut HashSet<String>,
    ) -> Option<()> {
        let decl = self.traits.get(trait_name)?;
        if !visiting.insert(trait_name.to_string()) {
            // Super-trait cycle; declaration order already stops this in
            // a well-formed program, but CTFE-style recursion elsewhere in
            // this crate always guards against malformed input the same
            // way (see resolver.rs's loading stack).
            return Some(());
        }
        for super_trait in &decl.super_traits {
            self.collect_methods(super_trait, out, seen, visiting)?;
        }
        for method in &decl.methods {
            if seen.insert(method.name.clone()) {
                out.push(method.name.clone());
            }
        }
        Some(())
    }

    pub fn method_slot_index(&mut self, trait_name: &str, method_name: &str) -> Option<usize> {
        self.layout_for(trait_name)?.slot_of(method_name)
    }

    /// Builds the vtable instance for one `impl TraitName for TypeName`:
    /// one monomorphized function name per slot, in layout order (spec
    /// §4.10 "an array of pointers to the specialized functions").
    pub fn vtable_instance(
        &mut self,
        trait_name: &str,
        type_name: &str,
        mono: &mut Monomorphizer,
    ) -> Option<&VtableInstance> {
        let key = (trait_name.to_string(), type_name.to_string());
        if !self.instances.contains_key(&key) {
            self.impls.get(&key)?;
            let layout = self.layout_for(trait_name)?.clone();
            let slots = layout
                .method_names
                .iter()
                .map(|method| mono.get_or_create(trait_name, type_name, method))
                .collect::<Option<Vec<_>>>()?;
            self.instances.insert(key.clone(), VtableInstance {
                trait_name: trait_name.to_string(),
                type_name: type_name.to_string(),
                slots,
            });
        }
        self.instances.get(&key)
    }

    /// The contract a dynamic method call needs (spec §4.10: "reads the
    /// slot at the method's index, then calls it with `data` as the
    /// first argument followed by the normal arguments").
    pub fn dispatch_site(&mut self, trait_name: &str, method_name: &str) -> Option<DispatchSite> {
        let slot_index = self.method_slot_index(trait_name, method_name)?;
        Some(DispatchSite {
            slot_index,
            vtable_struct_type: vtable_struct_type_name(trait_name),
            trait_object_struct_type: trait_object_struct_type_name(trait_name),
        })
    }

    /// Every registered trait name, for the codegen driver's struct/vtable
    /// type emission pass.
    pub fn trait_names(&self) -> impl Iterator<Item = &String> {
        self.traits.keys()
    }

    /// Every registered `(trait, type)` impl pair, for emitting one vtable
    /// global instance per implementation (spec §4.10).
    pub fn impl_pairs(&self) -> impl Iterator<Item = (&String, &String)> {
        self.impls.keys().map(|(t, ty)| (t, ty))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::Parser;
    use crate::ast::Stmt;
    use aria_core::FileId;

    fn parse(src: &str) -> crate::ast::Program {
        let mut parser = Parser::new(src, FileId(0), true);
        parser.parse()
    }

    fn register_all(gen: &mut VtableGenerator, program: &crate::ast::Program) {
        for item in &program.items {
            match item {
                Stmt::TraitDecl(t) => gen.register_trait(t.clone()),
                Stmt::ImplDecl(i) => gen.register_impl(i.clone()),
                _ => {}
            }
        }
    }

    #[test]
    fn own_methods_follow_super_trait_methods_in_declaration_order() {
        let program = parse(
            "trait A { func:m1 = void(); func:m2 = void(); } \
             trait B : A { func:m3 = void(); }",
        );
        let mut gen = VtableGenerator::new();
        register_all(&mut gen, &program);
        let layout = gen.layout_for("B").unwrap();
        assert_eq!(layout.method_names, vec!["m1", "m2", "m3"]);
    }

    #[test]
    fn diamond_super_traits_do_not_duplicate_a_method() {
        let program = parse(
            "trait A { func:m1 = void(); } \
             trait B : A { func:m2 = void(); } \
             trait C : A { func:m3 = void(); } \
             trait D : B, C { func:m4 = void(); }",
        );
        let mut gen = VtableGenerator::new();
        register_all(&mut gen, &program);
        let layout = gen.layout_for("D").unwrap();
        assert_eq!(layout.method_names, vec!["m1", "m2", "m3", "m4"]);
    }

    #[test]
    fn unknown_trait_has_no_layout() {
        let mut gen = VtableGenerator::new();
        assert!(gen.layout_for("Ghost").is_none());
    }

    #[test]
    fn vtable_instance_slots_hold_monomorphized_names_in_layout_order() {
        let program = parse(
            "trait Drawable { func:draw = void(); func:bounds = int32(); } \
             impl Drawable for Circle { func:draw = void() { return; } func:bounds = int32() { return 1; } }",
        );
        let mut gen = VtableGenerator::new();
        register_all(&mut gen, &program);
        let mut mono = Monomorphizer::new();
        mono.register_trait(
            program
                .items
                .iter()
                .find_map(|i| match i {
                    Stmt::TraitDecl(t) => Some(t.clone()),
                    _ => None,
                })
                .unwrap(),
        );
        mono.register_impl(
            program
                .items
                .iter()
                .find_map(|i| match i {
                    Stmt::ImplDecl(i) => Some(i.clone()),
                    _ => None,
                })
                .unwrap(),
        );
        let instance = gen.vtable_instance("Drawable", "Circle", &mut mono).unwrap();
        assert_eq!(instance.slots, vec!["Drawable_Circle_draw", "Drawable_Circle_bounds"]);
    }

    #[test]
    fn dispatch_site_reports_the_slot_index_and_mangled_type_names() {
        let program = parse(
            "trait Drawable { func:draw = void(); func:bounds = int32(); }",
        );
        let mut gen = VtableGenerator::new();
        register_all(&mut gen, &program);
        let site = gen.dispatch_site("Drawable", "bounds").unwrap();
        assert_eq!(site.slot_index, 1);
        assert_eq!(site.vtable_struct_type, "vtable_Drawable");
        assert_eq!(site.trait_object_struct_type, "trait_object_Drawable");
    }

    #[test]
    fn naming_helpers_follow_the_section_six_two_scheme() {
        assert_eq!(vtable_global_name("Drawable", "Circle"), "vtable_Drawable_Circle");
        assert_eq!(vtable_struct_type_name("Drawable"), "vtable_Drawable");
        assert_eq!(trait_object_struct_type_name("Drawable"), "trait_object_Drawable");
    }
}
