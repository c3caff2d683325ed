//! Module & Visibility Resolver (spec §4.4).
//!
//! Continues the teacher resolver's shape: a struct holding a loading
//! stack plus a `HashSet` for O(1) cycle detection, methods returning
//! `Result<_, String>` for hard (non-diagnostic) failures. Generalized
//! from Seq's flat `include std:name` / `include "path"` model to Aria's
//! `use a.b.c;` search-path table. The visibility lattice has no teacher
//! analogue (Seq has no visibility system) and is grounded directly in
//! `original_source/include/frontend/sema/module_resolver.h` and
//! `visibility_checker.h`.

use crate::ast::{ImportSelector, Program, Stmt, UseDecl, Visibility};
use aria_core::{Diagnostic, DiagnosticEngine, SourcePosition};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

/// An exported symbol: its visibility and which module defined it.
#[derive(Debug, Clone)]
pub struct Export {
    pub name: String,
    pub visibility: Visibility,
    pub defining_module: String,
}

/// A resolved module: its canonical dotted path, the merged program for
/// its own declarations, and the export table other modules import from.
#[derive(Debug, Clone)]
pub struct Module {
    pub path: String,
    pub file: PathBuf,
    pub program: Program,
    pub exports: HashMap<String, Export>,
    pub parent: Option<String>,
}

/// Resolves `use` imports to a module-graph edge and merges exported
/// symbols into the importing scope (spec §4.4).
pub struct Resolver {
    project_root: PathBuf,
    search_paths: Vec<PathBuf>,
    /// Canonical file paths currently being loaded; used for cycle
    /// detection the same way the teacher's `included_files` does, but
    /// ordered (a `Vec`) since a cycle report needs the whole stack, not
    /// just membership.
    loading_stack: Vec<PathBuf>,
    loaded: HashSet<PathBuf>,
    modules: HashMap<String, Module>,
    diagnostics: DiagnosticEngine,
}

impl Resolver {
    pub fn new(project_root: PathBuf, search_paths: Vec<PathBuf>) -> Self {
        Resolver {
            project_root,
            search_paths,
            loading_stack: Vec::new(),
            loaded: HashSet::new(),
            modules: HashMap::new(),
            diagnostics: DiagnosticEngine::new(),
        }
    }

    pub fn diagnostics(&self) -> &DiagnosticEngine {
        &self.diagnostics
    }

    pub fn into_diagnostics(self) -> DiagnosticEngine {
        self.diagnostics
    }

    pub fn modules(&self) -> &HashMap<String, Module> {
        &self.modules
    }

    /// Registers an already-parsed module under `module_path` (the caller
    /// — the pipeline — owns parsing; this resolver only wires up imports
    /// and visibility). Exports are collected from top-level declarations
    /// that the parser marked `pub`/etc.
    pub fn register_module(&mut self, module_path: &str, file: PathBuf, program: Program, parent: Option<String>) {
        let exports = collect_exports(module_path, &program);
        self.modules.insert(
            module_path.to_string(),
            Module {
                path: module_path.to_string(),
                file,
                program,
                exports,
                parent,
            },
        );
    }

    /// Resolves one `use` declaration's path string to a candidate file,
    /// per the path-form table (spec §4.4). Does not read or parse the
    /// file; that's the pipeline's job once it knows the path exists.
    pub fn resolve_path(&mut self, current_file: &Path, use_decl: &UseDecl) -> Result<PathBuf, String> {
        let path = &use_decl.path;
        let candidate = if path.starts_with("./") || path.starts_with("../") {
            current_file
                .parent()
                .unwrap_or(Path::new("."))
                .join(path)
        } else if path.starts_with('/') {
            PathBuf::from(path)
        } else {
            return self.search_dotted_path(path);
        };
        if candidate.exists() {
            Ok(candidate)
        } else {
            Err(format!("cannot find module file '{}' (resolved to {})", path, candidate.display()))
        }
    }

    fn search_dotted_path(&self, dotted: &str) -> Result<PathBuf, String> {
        let segments: Vec<&str> = dotted.split('.').collect();
        let rel_file: PathBuf = segments.iter().collect();
        let mut as_file = rel_file.clone();
        as_file.set_extension("aria");
        let as_mod = rel_file.join("mod.aria");

        let mut roots = vec![self.project_root.clone()];
        roots.extend(self.search_paths.iter().cloned());
        for root in &roots {
            let candidate = root.join(&as_file);
            if candidate.exists() {
                return Ok(candidate);
            }
            let candidate = root.join(&as_mod);
            if candidate.exists() {
                return Ok(candidate);
            }
        }
        Err(format!(
            "cannot find module '{dotted}' in project root or search paths {:?}",
            roots
        ))
    }

    /// Pushes a file onto the loading stack; on cycle, returns the full
    /// stack for the diagnostic (spec §4.4 "on cycle, the full stack is
    /// reported").
    pub fn enter(&mut self, file: &Path) -> Result<(), Vec<PathBuf>> {
        let canonical = file.canonicalize().unwrap_or_else(|_| file.to_path_buf());
        if self.loading_stack.contains(&canonical) {
            let mut cycle = self.loading_stack.clone();
            cycle.push(canonical);
            return Err(cycle);
        }
        self.loading_stack.push(canonical.clone());
        self.loaded.insert(canonical);
        Ok(())
    }

    pub fn leave(&mut self) {
        self.loading_stack.pop();
    }

    pub fn already_loaded(&self, file: &Path) -> bool {
        let canonical = file.canonicalize().unwrap_or_else(|_| file.to_path_buf());
        self.loaded.contains(&canonical)
    }

    /// Merges an imported module's exports into `accessor_module`'s import
    /// table, following the selector (full/selective/wildcard/alias).
    /// Returns the merged `(local_name, Export)` pairs. Does not check
    /// visibility yet — that happens per access site via
    /// [`Resolver::check_visibility`], since an import can bring a private
    /// symbol's *name* into scope textually without every use of it being
    /// legal (e.g. `pub(super)` imported by a sibling, never actually read).
    pub fn import(&self, imported_module: &str, selector: &ImportSelector, alias: Option<&str>) -> Vec<(String, Export)> {
        let Some(module) = self.modules.get(imported_module) else {
            return Vec::new();
        };
        match selector {
            ImportSelector::Full => {
                let local = alias.unwrap_or(imported_module);
                vec![(local.to_string(), Export {
                    name: imported_module.to_string(),
                    visibility: Visibility::Pub,
                    defining_module: imported_module.to_string(),
                })]
            }
            ImportSelector::Wildcard => module
                .exports
                .values()
                .map(|e| (e.name.clone(), e.clone()))
                .collect(),
            ImportSelector::Selective(names) => names
                .iter()
                .filter_map(|name| module.exports.get(name).map(|e| (name.clone(), e.clone())))
                .collect(),
        }
    }

    /// Checks whether `accessor_module` may use a symbol exported from
    /// `export.defining_module` with the given visibility (spec §4.4
    /// visibility table). Emits `E002` on violation.
    pub fn check_visibility(&mut self, export: &Export, accessor_module: &str, pos: SourcePosition) {
        let allowed = match export.visibility {
            Visibility::Pub => true,
            Visibility::Private => export.defining_module == accessor_module,
            Visibility::PubPackage => true, // same compilation unit: every module the pipeline compiles together
            Visibility::PubSuper => self
                .modules
                .get(&export.defining_module)
                .and_then(|m| m.parent.as_deref())
                == Some(accessor_module),
        };
        if !allowed {
            self.diagnostics.push(
                Diagnostic::error(
                    pos,
                    format!(
                        "'{}' (defined in module '{}') is not accessible from module '{}'",
                        export.name, export.defining_module, accessor_module
                    ),
                )
                .with_code("E002"),
            );
        }
    }
}

/// Walks a module's top-level items and builds its export table. Only
/// function, struct, and trait declarations can be exported; everything
/// else (statements at top level, which the grammar doesn't really allow
/// outside functions, modulo `Stmt::Error` recovery nodes) is skipped.
fn collect_exports(module_path: &str, program: &Program) -> HashMap<String, Export> {
    let mut exports = HashMap::new();
    for item in &program.items {
        let (name, visibility) = match item {
            Stmt::FuncDecl(f) => (f.name.clone(), if f.is_pub { Visibility::Pub } else { Visibility::Private }),
            Stmt::StructDecl(s) => (s.name.clone(), Visibility::Pub),
            Stmt::TraitDecl(t) => (t.name.clone(), Visibility::Pub),
            _ => continue,
        };
        exports.insert(
            name.clone(),
            Export {
                name,
                visibility,
                defining_module: module_path.to_string(),
            },
        );
    }
    exports
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{FuncDecl, GenericParam, TypeExpr};
    use aria_core::FileId;

    fn dummy_func(name: &str, is_pub: bool) -> FuncDecl {
        FuncDecl {
            is_pub,
            is_async: false,
            is_extern: false,
            auto_wrap: false,
            name: name.to_string(),
            generics: Vec::<GenericParam>::new(),
            return_ty: TypeExpr::Named("void".to_string()),
            params: Vec::new(),
            body: Vec::new(),
            pos: SourcePosition::new(FileId(0), 0, 0),
        }
    }

    #[test]
    fn private_export_blocked_from_other_module() {
        let mut program = Program::new();
        program.items.push(Stmt::FuncDecl(dummy_func("helper", false)));
        let mut resolver = Resolver::new(PathBuf::from("."), Vec::new());
        resolver.register_module("a", PathBuf::from("a.aria"), program, None);

        let export = resolver.modules()["a"].exports["helper"].clone();
        resolver.check_visibility(&export, "b", SourcePosition::new(FileId(0), 0, 0));
        assert!(resolver.diagnostics().has_errors());
    }

    #[test]
    fn pub_export_accessible_anywhere() {
        let mut program = Program::new();
        program.items.push(Stmt::FuncDecl(dummy_func("helper", true)));
        let mut resolver = Resolver::new(PathBuf::from("."), Vec::new());
        resolver.register_module("a", PathBuf::from("a.aria"), program, None);

        let export = resolver.modules()["a"].exports["helper"].clone();
        resolver.check_visibility(&export, "b", SourcePosition::new(FileId(0), 0, 0));
        assert!(!resolver.diagnostics().has_errors());
    }

    #[test]
    fn pub_super_only_allows_immediate_parent() {
        let program = Program::new();
        let mut exports = HashMap::new();
        exports.insert(
            "internal".to_string(),
            Export {
                name: "internal".to_string(),
                visibility: Visibility::PubSuper,
                defining_module: "a.b".to_string(),
            },
        );
        let mut resolver = Resolver::new(PathBuf::from("."), Vec::new());
        resolver.modules.insert(
            "a.b".to_string(),
            Module {
                path: "a.b".to_string(),
                file: PathBuf::from("a/b.aria"),
                program,
                exports,
                parent: Some("a".to_string()),
            },
        );

        let export = resolver.modules()["a.b"].exports["internal"].clone();
        resolver.check_visibility(&export, "a", SourcePosition::new(FileId(0), 0, 0));
        assert!(!resolver.diagnostics().has_errors());

        resolver.check_visibility(&export, "a.b.c", SourcePosition::new(FileId(0), 0, 0));
        assert!(resolver.diagnostics().has_errors());
    }

    #[test]
    fn cycle_detection_reports_full_stack() {
        let mut resolver = Resolver::new(PathBuf::from("."), Vec::new());
        let file = PathBuf::from(file!());
        resolver.enter(&file).unwrap();
        let err = resolver.enter(&file).unwrap_err();
        assert!(!err.is_empty());
    }
}
