//! Reference resolution: every name that points at a declaration becomes a
//! [`Use`](crate::hir::Use).

use smol_str::SmolStr;

use crate::base::TextRange;
use crate::syntax::SyntaxTree;
use crate::syntax::ast::{
    AdaptationKind, ClassDecl, ClassMember, Expr, ExprKind, LexicalVar, NamePath, NamespaceDecl,
    Param, Stmt, TypeHint,
};

use super::types::{expr_type, scalar_type};
use super::{BuildStage, BuildState, FunctionLike, path_identifier};
use crate::hir::decl::{DeclKind, Declaration};
use crate::hir::ids::{DeclRef, ScopeId};
use crate::hir::name::{QualifiedIdentifier, fold};
use crate::hir::resolve::DeclarationType;

/// Calls that are language constructs, not functions.
const CONSTRUCTS: &[&str] = &[
    "isset", "empty", "unset", "list", "exit", "die", "print", "eval", "array",
];

pub(crate) struct UseStage;

impl UseStage {
    /// Resolve a class name from `scope` and record it, with a use of each
    /// namespace segment that leads to it.
    fn use_class(state: &mut BuildState<'_>, tree: &SyntaxTree, scope: ScopeId, path: &NamePath) -> Option<DeclRef> {
        let id = path_identifier(tree, path);
        for n in 1..id.len() {
            let prefix = id.prefix(n);
            if let Some(ns) = state.resolve(scope, &prefix, DeclarationType::Namespace) {
                state.new_use(path.segments[n - 1].range, ns);
            }
        }
        let found = state.resolve(scope, &id, DeclarationType::Class);
        state.new_checked_use(path.range, &id.to_string(), found);
        found
    }

    fn use_hint(state: &mut BuildState<'_>, tree: &SyntaxTree, scope: ScopeId, hint: &TypeHint) {
        let TypeHint::Named(path) = hint else {
            return;
        };
        let id = path_identifier(tree, path);
        let scalar = id.len() == 1 && id.last().is_some_and(|name| scalar_type(name).is_some());
        if !scalar {
            Self::use_class(state, tree, scope, path);
        }
    }

    /// A member of `class`, reported when missing.
    fn use_member(
        state: &mut BuildState<'_>,
        class: DeclRef,
        name: &SmolStr,
        display: &str,
        range: TextRange,
        accept: impl Fn(&Declaration) -> bool + Copy,
    ) {
        let found = state.lookup().find_member(class, name, accept);
        let class_name = state
            .lookup()
            .with_decl(class, |d| d.id.to_string())
            .unwrap_or_default();
        state.new_checked_use(range, &format!("{class_name}::{display}"), found);
    }

    /// A member reached through an object; recorded only when found.
    fn use_object_member(
        state: &mut BuildState<'_>,
        tree: &SyntaxTree,
        object: &Expr,
        name: &SmolStr,
        range: TextRange,
        accept: impl Fn(&Declaration) -> bool + Copy,
    ) {
        let class = match &object.kind {
            ExprKind::Variable(var) if tree.ident(&var.name) == "this" => {
                state.lookup().enclosing_class(state.current_scope())
            }
            _ => expr_type(state, tree, object).structure().map(|s| s.decl),
        };
        if let Some(found) = class.and_then(|class| state.lookup().find_member(class, name, accept)) {
            state.new_use(range, found);
        }
    }

    fn use_variable(state: &mut BuildState<'_>, name: &SmolStr, range: TextRange) {
        let scope = state.current_scope();
        if let Some(found) = state.lookup().find_variable(scope, name) {
            state.new_use(range, found);
            return;
        }
        let id = QualifiedIdentifier::from_segments([name.clone()]);
        let Some(global) = state.resolve(ScopeId::ROOT, &id, DeclarationType::GlobalVariable) else {
            return;
        };
        let visible = !state.in_function()
            || state
                .lookup()
                .with_decl(global, Declaration::is_superglobal)
                .unwrap_or(false);
        if visible {
            state.new_use(range, global);
        }
    }

    fn class_uses(state: &mut BuildState<'_>, tree: &SyntaxTree, class: &ClassDecl) {
        let scope = state.current_scope();
        let outer = state
            .unit
            .scope(scope)
            .and_then(|s| s.parent)
            .unwrap_or(ScopeId::ROOT);
        for path in class.extends.iter().chain(&class.implements) {
            Self::use_class(state, tree, outer, path);
        }

        let own = state.lookup().enclosing_class(scope);
        for member in &class.members {
            let ClassMember::TraitUse(tu) = member else {
                continue;
            };
            let mut traits = Vec::new();
            for path in &tu.traits {
                traits.extend(Self::use_class(state, tree, scope, path));
            }
            for adaptation in &tu.adaptations {
                let candidates = match &adaptation.trait_name {
                    Some(path) => Self::use_class(state, tree, scope, path).into_iter().collect(),
                    None => traits.clone(),
                };
                let method = tree.ident(&adaptation.method);
                let folded = fold(&method);
                let lookup = state.lookup();
                let found = candidates
                    .iter()
                    .find_map(|&t| lookup.find_member(t, &folded, Declaration::is_function_like));
                let class_name = own
                    .and_then(|own| lookup.with_decl(own, |d| d.id.to_string()))
                    .unwrap_or_default();
                state.new_checked_use(adaptation.method.range, &format!("{class_name}::{method}"), found);

                if let AdaptationKind::InsteadOf(others) = &adaptation.kind {
                    for other in others {
                        Self::use_class(state, tree, scope, other);
                    }
                }
            }
        }
    }
}

impl BuildStage for UseStage {
    fn enter_namespace(&mut self, state: &mut BuildState<'_>, _tree: &SyntaxTree, ns: &NamespaceDecl, index: usize) {
        let Some(&decl) = state.predeclared.namespaces.get(&(ns.id, index)) else {
            return;
        };
        if let Some(segment) = ns.name.as_ref().and_then(|name| name.segments.get(index)) {
            let decl = state.local(decl);
            state.new_use(segment.range, decl);
        }
    }

    fn class_scope_opened(&mut self, state: &mut BuildState<'_>, tree: &SyntaxTree, class: &ClassDecl) {
        Self::class_uses(state, tree, class);
    }

    fn enter_function(&mut self, state: &mut BuildState<'_>, tree: &SyntaxTree, function: FunctionLike<'_>) {
        if let Some(hint) = function.return_hint() {
            let scope = state.current_scope();
            Self::use_hint(state, tree, scope, hint);
        }
    }

    fn enter_parameter(&mut self, state: &mut BuildState<'_>, tree: &SyntaxTree, param: &Param, _index: usize) {
        if let Some(hint) = &param.hint {
            let scope = state.current_scope();
            Self::use_hint(state, tree, scope, hint);
        }
    }

    fn lexical_var(&mut self, state: &mut BuildState<'_>, tree: &SyntaxTree, var: &LexicalVar) {
        let name = tree.ident(&var.var.name);
        let outer = state
            .unit
            .scope(state.current_scope())
            .and_then(|s| s.parent)
            .unwrap_or(ScopeId::ROOT);
        if let Some(found) = state.lookup().find_variable(outer, &name) {
            state.new_use(var.var.range, found);
        }
    }

    fn enter_statement(&mut self, state: &mut BuildState<'_>, tree: &SyntaxTree, stmt: &Stmt) {
        match stmt {
            Stmt::Use(u) => {
                for item in &u.items {
                    let id = path_identifier(tree, &item.path);
                    let found = state
                        .resolve(ScopeId::ROOT, &id, DeclarationType::Class)
                        .or_else(|| state.resolve(ScopeId::ROOT, &id, DeclarationType::Namespace));
                    if let Some(found) = found {
                        state.new_use(item.path.range, found);
                    }
                }
            }
            Stmt::Try(t) => {
                let scope = state.current_scope();
                for catch in &t.catches {
                    for path in &catch.classes {
                        Self::use_class(state, tree, scope, path);
                    }
                }
            }
            Stmt::Global(g) => {
                for var in &g.vars {
                    let name = tree.ident(&var.name);
                    if let Some(found) = state.lookup().find_variable(ScopeId::ROOT, &name) {
                        state.new_use(var.range, found);
                    }
                }
            }
            _ => {}
        }
    }

    fn enter_expression(&mut self, state: &mut BuildState<'_>, tree: &SyntaxTree, expr: &Expr) {
        let scope = state.current_scope();
        match &expr.kind {
            ExprKind::Call { callee, .. } => {
                let id = path_identifier(tree, callee);
                let construct = id.len() == 1
                    && id
                        .last()
                        .is_some_and(|name| CONSTRUCTS.iter().any(|c| name.eq_ignore_ascii_case(c)));
                if construct {
                    return;
                }
                let found = state.resolve(scope, &id, DeclarationType::Function);
                state.new_checked_use(callee.range, &id.to_string(), found);
            }
            ExprKind::New { class, .. } | ExprKind::Instanceof { class, .. } => {
                Self::use_class(state, tree, scope, class);
            }
            ExprKind::StaticCall { class, name, .. } => {
                if let Some(class) = Self::use_class(state, tree, scope, class) {
                    let method = tree.ident(name);
                    Self::use_member(state, class, &fold(&method), &format!("{method}()"), name.range, Declaration::is_function_like);
                }
            }
            ExprKind::ClassConst { class, name } => {
                let Some(class) = Self::use_class(state, tree, scope, class) else {
                    return;
                };
                let constant = tree.ident(name);
                if constant.eq_ignore_ascii_case("class") {
                    return;
                }
                Self::use_member(state, class, &constant, &constant, name.range, |d| {
                    d.kind() == DeclKind::ClassConstant
                });
            }
            ExprKind::StaticProperty { class, var } => {
                if let Some(class) = Self::use_class(state, tree, scope, class) {
                    let property = tree.ident(&var.name);
                    Self::use_member(state, class, &property, &format!("${property}"), var.range, |d| {
                        d.kind() == DeclKind::ClassMember
                    });
                }
            }
            ExprKind::MethodCall { object, name, .. } => {
                let method = fold(&tree.ident(name));
                Self::use_object_member(state, tree, object, &method, name.range, Declaration::is_function_like);
            }
            ExprKind::Property { object, name } => {
                let property = tree.ident(name);
                Self::use_object_member(state, tree, object, &property, name.range, |d| {
                    d.kind() == DeclKind::ClassMember
                });
            }
            ExprKind::Name(path) => {
                let id = path_identifier(tree, path);
                let magic = id
                    .last()
                    .is_some_and(|name| name.len() > 4 && name.starts_with("__") && name.ends_with("__"));
                if magic {
                    return;
                }
                let found = state.resolve(scope, &id, DeclarationType::Constant);
                state.new_checked_use(path.range, &id.to_string(), found);
            }
            ExprKind::Variable(var) => {
                let name = tree.ident(&var.name);
                if name != "this" {
                    Self::use_variable(state, &name, var.range);
                }
            }
            ExprKind::Include { path, .. } => {
                if let Some(&id) = state.include_decls.get(&expr.range) {
                    let decl = state.local(id);
                    state.new_use(path.range, decl);
                }
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::sync::Arc;

    use crate::base::FileSet;
    use crate::hir::diagnostics::Severity;
    use crate::hir::env::{AnalysisEnvironment, BuildConfig};
    use crate::hir::ids::ScopeId;
    use crate::hir::include::NoProjects;
    use crate::hir::{SemanticBuilder, SemanticUnit};

    struct Built {
        unit: SemanticUnit,
        had_unresolved: bool,
    }

    fn build_with(config: BuildConfig, text: &str) -> Built {
        let files = Arc::new(FileSet::new());
        let env = AnalysisEnvironment::new(config, files.clone(), Arc::new(NoProjects));
        env.ensure_builtins();
        let file = files.file_id(Path::new("/src/uses.php"));
        let tree = env.parser().parse(text).tree.expect("parses");
        let mut builder = SemanticBuilder::new(&env, file);
        builder.build(&tree, None);
        builder.build_uses(&tree);
        let had_unresolved = builder.had_unresolved_identifiers();
        Built {
            unit: builder.finish().expect("built").1,
            had_unresolved,
        }
    }

    fn build(text: &str) -> Built {
        build_with(BuildConfig::default(), text)
    }

    fn messages(unit: &SemanticUnit) -> Vec<String> {
        unit.problems().iter().map(|p| p.message.to_string()).collect()
    }

    #[test]
    fn test_undefined_function_is_reported() {
        let built = build("<?php missing_function();");
        assert!(built.had_unresolved);
        assert_eq!(messages(&built.unit), vec!["Declaration not found: missing_function"]);
        assert_eq!(built.unit.problems()[0].severity, Severity::Error);
    }

    #[test]
    fn test_undefined_function_without_reporting() {
        let config = BuildConfig {
            report_errors: false,
            ..BuildConfig::default()
        };
        let built = build_with(config, "<?php missing_function();");
        assert!(built.had_unresolved);
        assert!(built.unit.problems().is_empty());
    }

    #[test]
    fn test_deprecated_builtin_warns() {
        let built = build("<?php ereg('a', 'b');");
        assert_eq!(messages(&built.unit), vec!["Usage of ereg is deprecated."]);
        assert_eq!(built.unit.problems()[0].severity, Severity::Warning);
    }

    #[test]
    fn test_forward_references_resolve() {
        let built = build("<?php $b = new B(); f(); class B extends A {} class A {} function f() {}");
        assert!(!built.had_unresolved);
        assert!(built.unit.problems().is_empty(), "{:?}", messages(&built.unit));
        assert!(built.unit.uses().iter().all(|u| u.decl.is_some()));
    }

    #[test]
    fn test_members_resolve_through_inheritance() {
        let built = build(
            "<?php class Base { const C = 1; public static $s; static function make() {} function run() {} }\n\
             class A extends Base { function m() { self::make(); parent::run(); static::$s; $this->run(); return A::C; } }",
        );
        assert!(built.unit.problems().is_empty(), "{:?}", messages(&built.unit));
        assert!(!built.had_unresolved);
    }

    #[test]
    fn test_missing_static_member_is_reported() {
        let built = build("<?php class A {} A::nothing();");
        assert_eq!(messages(&built.unit), vec!["Declaration not found: A::nothing()"]);
    }

    #[test]
    fn test_construct_calls_and_magic_constants_are_skipped() {
        let built = build("<?php $a = 1; isset($a); unset($a); echo __FILE__;");
        assert!(built.unit.problems().is_empty(), "{:?}", messages(&built.unit));
    }

    #[test]
    fn test_globals_inside_functions() {
        let built = build("<?php $g = 1; function f() { global $g; return $_GET; }");
        assert!(built.unit.problems().is_empty(), "{:?}", messages(&built.unit));
        let global_uses = built
            .unit
            .uses()
            .iter()
            .filter(|u| u.decl.is_some() && u.scope != ScopeId::ROOT)
            .count();
        // `global $g` and the superglobal `$_GET`
        assert_eq!(global_uses, 2);
    }

    #[test]
    fn test_namespaced_names() {
        let built = build(
            "<?php namespace App\\Model; class User {} function helper() {}\n\
             namespace App; use App\\Model\\User; $u = new User(); Model\\helper(); strlen('x');",
        );
        assert!(built.unit.problems().is_empty(), "{:?}", messages(&built.unit));
        assert!(!built.had_unresolved);
    }
}
