//! Unit-level context: the builtins import, inheritance edges between
//! classes and imports of included files.

use tracing::debug;

use crate::syntax::SyntaxTree;
use crate::syntax::ast::{ClassDecl, ClassKind, Expr, ExprKind, Literal, NamePath};

use super::{BuildStage, BuildState, path_identifier};
use crate::hir::decl::{ClassModifier, ClassType, DeclData, Declaration};
use crate::hir::diagnostics::codes;
use crate::hir::ids::{DeclId, ScopeId};
use crate::hir::include::resolve_include_path;
use crate::hir::name::QualifiedIdentifier;
use crate::hir::resolve::{DeclarationType, import_unit};
use crate::hir::scope::ImportTarget;

pub(crate) struct ContextStage;

impl ContextStage {
    /// Resolve `path` and make it a base of `class`, unless that would close
    /// an inheritance cycle or the kinds do not fit.
    fn add_base_type(state: &mut BuildState<'_>, tree: &SyntaxTree, class: &ClassDecl, class_id: DeclId, path: &NamePath, implements: bool) {
        let class_scope = state.current_scope();
        let outer = state
            .unit
            .scope(class_scope)
            .and_then(|s| s.parent)
            .unwrap_or(ScopeId::ROOT);
        let id = path_identifier(tree, path);
        let Some(base) = state.resolve(outer, &id, DeclarationType::Class) else {
            state.had_unresolved = true;
            return;
        };

        let this = state.local(class_id);
        let lookup = state.lookup();
        let class_name = lookup.with_decl(this, |d| d.id.to_string()).unwrap_or_default();
        let base_name = lookup.with_decl(base, |d| d.id.to_string()).unwrap_or_default();
        if base == this || lookup.is_subclass_of(base, this) {
            state
                .diagnostics
                .circular_inheritance(path.range, &class_name, &base_name);
            return;
        }
        let Some((base_type, base_modifier)) = lookup
            .with_decl(base, |d| d.class().map(|c| (c.class_type, c.modifier)))
            .flatten()
        else {
            return;
        };

        let error = match (class.kind, implements) {
            (ClassKind::Class, false) => match (base_type, base_modifier) {
                (ClassType::Interface, _) => Some(format!("{class_name} cannot extend from interface {base_name}")),
                (ClassType::Trait, _) => Some(format!("{class_name} cannot extend from trait {base_name}")),
                (ClassType::Class, ClassModifier::Final) => {
                    Some(format!("Class {class_name} may not inherit from final class ({base_name})"))
                }
                _ => None,
            },
            _ if base_type != ClassType::Interface => {
                Some(format!("{class_name} cannot implement {base_name} - it is not an interface"))
            }
            _ => None,
        };
        if let Some(message) = error {
            state
                .diagnostics
                .error(path.range, codes::INVALID_CONSTRUCT, message);
            return;
        }

        state.add_scope_import(class_scope, ImportTarget::Class(base), false);
        if let Some(data) = state.declaration_mut(class_id).and_then(Declaration::class_mut) {
            if !data.bases.contains(&base) {
                data.bases.push(base);
            }
        }
    }

    /// Import the unit of a literal include path, when one is built.
    fn include(state: &mut BuildState<'_>, expr: &Expr, path: &Expr) {
        let ExprKind::Literal(Literal::String(literal)) = &path.kind else {
            return;
        };
        let Some(resolved) = resolve_include_path(state.env.projects(), &state.path, literal) else {
            debug!(%literal, "include path not resolved");
            return;
        };
        let Some(unit) = state
            .env
            .files()
            .lookup(&resolved)
            .and_then(|file| state.env.store().unit_for_file(file))
        else {
            debug!(path = %resolved.display(), "included file has no unit yet");
            return;
        };
        if !import_unit(state.env, state.unit_id, &mut state.unit, unit) {
            return;
        }
        if let Some(included) = state.env.store().get(unit) {
            state.unit.merge_revisions(included.revisions());
        }

        let key = QualifiedIdentifier::from_segments([literal.clone()]);
        let decl = Declaration::new(
            literal.clone(),
            key.clone(),
            key,
            path.range,
            state.current_scope(),
            DeclData::Import { unit },
        );
        let id = state.open_declaration(decl);
        state.encounter(id);
        state.include_decls.insert(expr.range, id);
    }
}

impl BuildStage for ContextStage {
    fn begin(&mut self, state: &mut BuildState<'_>, _tree: &SyntaxTree) {
        if state.is_builtins {
            return;
        }
        if let Some(builtins) = state.env.builtins_unit() {
            import_unit(state.env, state.unit_id, &mut state.unit, builtins);
        }
    }

    fn class_scope_opened(&mut self, state: &mut BuildState<'_>, tree: &SyntaxTree, class: &ClassDecl) {
        let Some(&class_id) = state.predeclared.types.get(&class.id) else {
            return;
        };
        let interface = class.kind == ClassKind::Interface;
        for path in &class.extends {
            Self::add_base_type(state, tree, class, class_id, path, interface);
        }
        for path in &class.implements {
            Self::add_base_type(state, tree, class, class_id, path, true);
        }
    }

    fn enter_expression(&mut self, state: &mut BuildState<'_>, _tree: &SyntaxTree, expr: &Expr) {
        if let ExprKind::Include { path, .. } = &expr.kind {
            Self::include(state, expr, path);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::sync::Arc;

    use crate::base::FileSet;
    use crate::hir::decl::{DeclData, DeclKind};
    use crate::hir::env::{AnalysisEnvironment, BuildConfig};
    use crate::hir::include::NoProjects;
    use crate::hir::name::QualifiedIdentifier;
    use crate::hir::{SemanticBuilder, SemanticUnit};

    fn environment() -> (Arc<FileSet>, AnalysisEnvironment) {
        let files = Arc::new(FileSet::new());
        let env = AnalysisEnvironment::new(BuildConfig::default(), files.clone(), Arc::new(NoProjects));
        (files, env)
    }

    fn build(env: &AnalysisEnvironment, files: &FileSet, path: &str, text: &str) -> (crate::hir::UnitId, SemanticUnit) {
        let file = files.file_id(Path::new(path));
        let tree = env.parser().parse(text).tree.expect("parses");
        let mut builder = SemanticBuilder::new(env, file);
        builder.build(&tree, None);
        builder.finish().expect("built")
    }

    fn bases(unit: &SemanticUnit, name: &str) -> Vec<String> {
        let id = unit.find_declarations(&QualifiedIdentifier::parse(name))[0];
        let class = unit.declaration(id).and_then(|d| d.class()).expect("class");
        class
            .bases
            .iter()
            .map(|b| unit.declaration(b.decl).map(|d| d.id.to_string()).unwrap_or_default())
            .collect()
    }

    #[test]
    fn test_forward_base_class() {
        let (files, env) = environment();
        let (_, unit) = build(&env, &files, "/src/a.php", "<?php class B extends A {} class A {}");
        assert_eq!(bases(&unit, "b"), vec!["A"]);
        assert!(unit.problems().is_empty());
    }

    #[test]
    fn test_circular_inheritance_adds_no_edge() {
        let (files, env) = environment();
        let (_, unit) = build(&env, &files, "/src/a.php", "<?php class A extends B {} class B extends A {}");
        let messages: Vec<_> = unit.problems().iter().map(|p| p.message.to_string()).collect();
        assert_eq!(messages, vec!["Circular inheritance of B and A"]);
        assert_eq!(bases(&unit, "a"), vec!["B"]);
        assert!(bases(&unit, "b").is_empty());
    }

    #[test]
    fn test_base_kind_errors() {
        let (files, env) = environment();
        let (_, unit) = build(
            &env,
            &files,
            "/src/a.php",
            "<?php interface I {} final class F {} class A extends I {} class B implements F {} class C extends F {}",
        );
        let messages: Vec<_> = unit.problems().iter().map(|p| p.message.to_string()).collect();
        assert_eq!(
            messages,
            vec![
                "A cannot extend from interface I",
                "B cannot implement F - it is not an interface",
                "Class C may not inherit from final class (F)",
            ]
        );
    }

    #[test]
    fn test_unresolved_base_sets_flag() {
        let (files, env) = environment();
        let file = files.file_id(Path::new("/src/a.php"));
        let tree = env.parser().parse("<?php class A extends Missing {}").tree.expect("parses");
        let mut builder = SemanticBuilder::new(&env, file);
        builder.build(&tree, None);
        assert!(builder.had_unresolved_identifiers());
    }

    #[test]
    fn test_builtins_imported_first() {
        let (files, env) = environment();
        env.ensure_builtins();
        let (_, unit) = build(&env, &files, "/src/a.php", "<?php");
        let imports: Vec<_> = unit.imported_parent_units().collect();
        assert_eq!(imports, vec![env.builtins_unit().expect("builtins")]);
    }

    #[test]
    fn test_include_imports_built_unit() {
        let dir = tempfile::tempdir().expect("tempdir");
        let lib = dir.path().join("lib.php");
        let main = dir.path().join("main.php");
        std::fs::write(&lib, "<?php function helper() {}").expect("write");

        let (files, env) = environment();
        let (lib_unit, lib_content) = build(&env, &files, lib.to_str().expect("utf-8"), "<?php function helper() {}");
        env.commit(lib_unit, lib_content);

        let (_, unit) = build(&env, &files, main.to_str().expect("utf-8"), "<?php include 'lib.php'; helper();");
        assert!(unit.imports_unit(lib_unit));
        let import = unit
            .local_declarations()
            .find(|(_, d)| d.kind() == DeclKind::Import)
            .map(|(_, d)| d.data.clone());
        assert_eq!(import, Some(DeclData::Import { unit: lib_unit }));
    }

    #[test]
    fn test_missing_include_is_skipped() {
        let (files, env) = environment();
        let (_, unit) = build(&env, &files, "/nowhere/main.php", "<?php require_once 'gone.php';");
        assert!(unit.problems().is_empty());
        assert_eq!(unit.imported_parent_units().count(), 0);
    }
}
