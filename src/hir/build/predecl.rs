//! Forward declarations of namespaces, classes and free functions.

use rustc_hash::{FxHashMap, FxHashSet};
use smol_str::SmolStr;

use crate::syntax::ast::{ClassDecl, ClassKind, ClassMember, ClassModifierKind, FunctionDecl, NamespaceDecl};
use crate::syntax::{NodeId, SyntaxTree};

use super::{BuildStage, BuildState, FunctionLike};
use crate::hir::decl::{ClassData, ClassModifier, ClassType, DeclData, DeclKind, Declaration};
use crate::hir::ids::DeclId;
use crate::hir::types::{StructureType, Type};

/// Declarations created ahead of the main walk, by syntax node.
#[derive(Debug, Default)]
pub(crate) struct PreDeclarations {
    pub types: FxHashMap<NodeId, DeclId>,
    pub functions: FxHashMap<NodeId, DeclId>,
    /// By namespace statement and segment index.
    pub namespaces: FxHashMap<(NodeId, usize), DeclId>,
}

pub(crate) struct PreDeclarationStage;

impl BuildStage for PreDeclarationStage {
    fn enter_namespace(&mut self, state: &mut BuildState<'_>, tree: &SyntaxTree, ns: &NamespaceDecl, index: usize) {
        if let Some(id) = declare_namespace_segment(state, tree, ns, index) {
            state.set_pending_owner(id);
        }
    }

    fn enter_class(&mut self, state: &mut BuildState<'_>, tree: &SyntaxTree, class: &ClassDecl) {
        let id = declare_class_shell(state, tree, class);
        state.set_pending_owner(id);

        let vars: FxHashSet<SmolStr> = class
            .members
            .iter()
            .filter_map(|member| match member {
                ClassMember::Property(property) => Some(property),
                _ => None,
            })
            .flat_map(|property| property.vars.iter())
            .map(|var| tree.ident(&var.var.name))
            .collect();
        state.upcoming_class_vars.insert(id, vars);
    }

    fn enter_function(&mut self, state: &mut BuildState<'_>, tree: &SyntaxTree, function: FunctionLike<'_>) {
        if let FunctionLike::Function(f) = function {
            declare_function_shell(state, tree, f);
        }
    }
}

/// The namespace declaration of segment `index`, created on first sight.
///
/// Namespaces reopened later in the file share one declaration.
pub(crate) fn declare_namespace_segment(
    state: &mut BuildState<'_>,
    tree: &SyntaxTree,
    ns: &NamespaceDecl,
    index: usize,
) -> Option<DeclId> {
    if let Some(&id) = state.predeclared.namespaces.get(&(ns.id, index)) {
        return Some(id);
    }
    let segment = ns.name.as_ref()?.segments.get(index)?;
    let name = tree.ident(segment);
    let (id, key) = state.qualify(&name, false);
    let scope = state.current_scope();

    let existing = state.unit.flat_lookup(&key).iter().copied().find(|&d| {
        state
            .unit
            .declaration(d)
            .is_some_and(|d| d.kind() == DeclKind::Namespace)
    });
    let decl_id = match existing {
        Some(existing) => existing,
        None => state.open_declaration(Declaration::new(
            name,
            id,
            key,
            segment.range,
            scope,
            DeclData::Namespace,
        )),
    };
    state.predeclared.namespaces.insert((ns.id, index), decl_id);
    Some(decl_id)
}

/// The class declaration of `class` with its structure type.
pub(crate) fn declare_class_shell(state: &mut BuildState<'_>, tree: &SyntaxTree, class: &ClassDecl) -> DeclId {
    if let Some(&id) = state.predeclared.types.get(&class.id) {
        return id;
    }
    let name = tree.ident(&class.name);
    let (id, key) = state.qualify(&name, false);
    let scope = state.declaration_scope();
    let class_type = match class.kind {
        ClassKind::Class => ClassType::Class,
        ClassKind::Interface => ClassType::Interface,
        ClassKind::Trait => ClassType::Trait,
    };
    let modifier = match class.modifier {
        ClassModifierKind::None => ClassModifier::None,
        ClassModifierKind::Abstract => ClassModifier::Abstract,
        ClassModifierKind::Final => ClassModifier::Final,
    };

    let mut decl = Declaration::new(
        name,
        id.clone(),
        key,
        class.name.range,
        scope,
        DeclData::Class(ClassData::new(class_type, modifier)),
    );
    decl.doc = class.doc.clone();
    let decl_id = state.open_declaration(decl);
    let ty = Type::Structure(StructureType {
        decl: state.local(decl_id),
        name: id,
    });
    if let Some(decl) = state.declaration_mut(decl_id) {
        decl.ty = Some(ty);
    }
    state.predeclared.types.insert(class.id, decl_id);
    decl_id
}

/// The declaration of a free function; its type is attached later.
pub(crate) fn declare_function_shell(state: &mut BuildState<'_>, tree: &SyntaxTree, function: &FunctionDecl) -> DeclId {
    if let Some(&id) = state.predeclared.functions.get(&function.id) {
        return id;
    }
    let name = tree.ident(&function.name);
    let (id, key) = state.qualify(&name, false);
    let scope = state.declaration_scope();
    let mut decl = Declaration::new(name, id, key, function.name.range, scope, DeclData::Function);
    decl.doc = function.doc.clone();
    let decl_id = state.open_declaration(decl);
    state.predeclared.functions.insert(function.id, decl_id);
    decl_id
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::base::FileSet;
    use crate::hir::decl::DeclKind;
    use crate::hir::env::{AnalysisEnvironment, BuildConfig};
    use crate::hir::include::NoProjects;
    use crate::hir::name::QualifiedIdentifier;
    use crate::hir::SemanticBuilder;

    fn build(text: &str) -> crate::hir::SemanticUnit {
        let files = Arc::new(FileSet::new());
        let env = AnalysisEnvironment::new(BuildConfig::default(), files.clone(), Arc::new(NoProjects));
        let file = files.file_id(std::path::Path::new("/src/a.php"));
        let tree = env.parser().parse(text).tree.expect("parses");
        let mut builder = SemanticBuilder::new(&env, file);
        builder.build(&tree, None);
        builder.finish().expect("built").1
    }

    #[test]
    fn test_namespace_segments_are_declared_once() {
        let unit = build("<?php namespace A\\B; class C {} namespace A\\B; function f() {}");
        let namespaces: Vec<_> = unit
            .local_declarations()
            .filter(|(_, d)| d.kind() == DeclKind::Namespace)
            .map(|(_, d)| d.id.to_string())
            .collect();
        assert_eq!(namespaces, vec!["A", "A\\B"]);
        assert_eq!(unit.find_declarations(&QualifiedIdentifier::parse("a\\b\\c")).len(), 1);
        assert_eq!(unit.find_declarations(&QualifiedIdentifier::parse("a\\b\\f")).len(), 1);
    }

    #[test]
    fn test_class_shell_carries_structure_type() {
        let unit = build("<?php class Foo {}");
        let ids = unit.find_declarations(&QualifiedIdentifier::parse("foo"));
        let decl = unit.declaration(ids[0]).expect("declared");
        let structure = decl.ty.as_ref().and_then(|t| t.structure()).expect("structure type");
        assert_eq!(structure.name.to_string(), "Foo");
        assert_eq!(structure.decl.decl, ids[0]);
    }
}
