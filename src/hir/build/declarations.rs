//! Declarations of every kind, with the redeclaration and override rules.

use std::sync::Arc;

use rustc_hash::{FxHashMap, FxHashSet};
use smol_str::SmolStr;

use crate::base::TextRange;
use crate::syntax::SyntaxTree;
use crate::syntax::ast::{
    AdaptationKind, ClassDecl, ClassKind, ClassMember, ClassModifierKind, ConstItem, ConstStmt,
    Expr, ExprKind, LexicalVar, Literal, MethodDecl, Modifiers, NamespaceDecl, Param, PropertyDecl,
    PropertyVar, Stmt, TraitUse, TypeHint, UseItem, Var,
};

use super::predecl::{declare_class_shell, declare_function_shell, declare_namespace_segment};
use super::types::{expr_type, scalar_type, structure_of};
use super::{BuildStage, BuildState, FunctionLike, path_identifier};
use crate::hir::decl::{
    Access, AliasKind, ClassType, DeclData, DeclKind, Declaration, MemberData, MethodData,
    TraitAliasData, VariableData,
};
use crate::hir::diagnostics::codes;
use crate::hir::doc_comment::has_tag;
use crate::hir::ids::{DeclId, DeclRef, ScopeId};
use crate::hir::name::{QualifiedIdentifier, fold};
use crate::hir::resolve::DeclarationType;
use crate::hir::scope::ScopeKind;
use crate::hir::types::Type;

fn access_of(modifiers: Modifiers) -> Access {
    if modifiers.contains(Modifiers::PRIVATE) {
        Access::Private
    } else if modifiers.contains(Modifiers::PROTECTED) {
        Access::Protected
    } else {
        Access::Public
    }
}

fn access_name(access: Access) -> &'static str {
    match access {
        Access::Public => "public",
        Access::Protected => "protected",
        Access::Private => "private",
    }
}

/// The target of an assignment, split into its parts.
#[derive(Debug)]
struct VariableIdentifier<'t> {
    name: SmolStr,
    range: TextRange,
    /// Object expression when the target is a property.
    parent: Option<&'t Expr>,
    /// The target or its parent ends in an index access.
    is_array: bool,
}

/// `$a`, `$a->b`, `$a[0]`, `$a->b[]`; anything else is not declarable.
fn variable_identifier<'t>(tree: &SyntaxTree, expr: &'t Expr) -> Option<VariableIdentifier<'t>> {
    match &expr.kind {
        ExprKind::Variable(var) => Some(VariableIdentifier {
            name: tree.ident(&var.name),
            range: var.range,
            parent: None,
            is_array: false,
        }),
        ExprKind::Property { object, name } => Some(VariableIdentifier {
            name: tree.ident(name),
            range: name.range,
            parent: Some(object),
            is_array: false,
        }),
        ExprKind::Index { base, .. } => {
            let mut id = variable_identifier(tree, base)?;
            id.is_array = true;
            Some(id)
        }
        _ => None,
    }
}

/// Values allowed for class constants.
fn is_constant_value(expr: &Expr) -> bool {
    match &expr.kind {
        ExprKind::Literal(_) | ExprKind::Name(_) | ExprKind::ClassConst { .. } => true,
        ExprKind::Unary { operand, .. } => is_constant_value(operand),
        ExprKind::Binary { lhs, rhs, .. } => is_constant_value(lhs) && is_constant_value(rhs),
        _ => false,
    }
}

fn is_class_hint(tree: &SyntaxTree, hint: &TypeHint) -> bool {
    match hint {
        TypeHint::Named(path) => {
            let id = path_identifier(tree, path);
            id.len() > 1 || id.last().is_some_and(|name| scalar_type(name).is_none())
        }
        TypeHint::Array(_) | TypeHint::Callable(_) => false,
    }
}

fn scope_identifier(state: &BuildState<'_>, scope: ScopeId) -> QualifiedIdentifier {
    state.unit.scope(scope).map(|s| s.id.clone()).unwrap_or_default()
}

fn decl_name(state: &BuildState<'_>, decl: DeclRef) -> String {
    state
        .lookup()
        .with_decl(decl, |d| d.id.to_string())
        .unwrap_or_default()
}

/// Whether `scope` already holds a declaration of `kind` under `key`.
fn declared_in(state: &BuildState<'_>, scope: ScopeId, key: &QualifiedIdentifier, kind: DeclKind) -> bool {
    state.unit.scope(scope).is_some_and(|s| {
        s.declarations().iter().any(|&d| {
            state
                .declaration(d)
                .is_some_and(|d| d.kind() == kind && d.key == *key)
        })
    })
}

/// Declare or update the variable `name` visible from the current scope.
///
/// Re-assigning the type a variable already has changes nothing; a better
/// type replaces `mixed`, anything else widens to a union.
pub(crate) fn declare_variable(state: &mut BuildState<'_>, name: SmolStr, range: TextRange, ty: Type) -> Option<DeclId> {
    let mut scope = state.current_scope();
    if state.scope_kind(scope) == ScopeKind::Namespace {
        scope = ScopeId::ROOT;
    }

    if let Some(existing) = state.lookup().find_variable(scope, &name) {
        if existing.unit != state.unit_id {
            return None;
        }
        let decl = state.declaration_mut(existing.decl)?;
        let current = decl.ty.clone();
        let DeclData::Variable(data) = &mut decl.data else {
            return Some(existing.decl);
        };
        let updated = match current {
            Some(current) if current == ty => None,
            Some(current) if !current.is_replaceable() => {
                let merged = current.clone().merge(ty);
                (merged != current).then_some(merged)
            }
            _ => Some(ty),
        };
        if let Some(updated) = updated {
            data.history.push(updated.clone());
            decl.ty = Some(updated);
        }
        return Some(existing.decl);
    }

    let key = scope_identifier(state, scope).child(name.clone());
    let mut decl = Declaration::new(
        name,
        key.clone(),
        key,
        range,
        scope,
        DeclData::Variable(VariableData {
            superglobal: false,
            history: vec![ty.clone()],
        }),
    );
    decl.ty = Some(ty);
    let id = state.open_declaration(decl);
    state.encounter(id);
    Some(id)
}

/// Creates declarations for the main walk and attaches the types the type
/// stage publishes.
#[derive(Debug, Default)]
pub(crate) struct DeclarationStage {
    /// Declarations waiting for their type, innermost last.
    stack: Vec<DeclId>,
    /// Per function: whether a parameter with a default value was seen.
    saw_default: Vec<bool>,
}

impl DeclarationStage {
    fn error(state: &mut BuildState<'_>, range: TextRange, code: &'static str, message: String) {
        state.diagnostics.error(range, code, message);
    }

    /// A second declaration of the same kind and key in this file, or a
    /// declaration shadowing a builtin.
    fn check_redeclaration(state: &mut BuildState<'_>, decl: DeclId, display: &str) {
        let Some(d) = state.declaration(decl) else {
            return;
        };
        let (key, kind, range) = (d.key.clone(), d.kind(), d.range);

        let previous = state.unit.flat_lookup(&key).iter().copied().find(|&other| {
            other != decl
                && state.is_encountered(state.local(other))
                && state.declaration(other).is_some_and(|o| o.kind() == kind)
        });
        if let Some(previous) = previous {
            let (path, line) = state.location_of(state.local(previous));
            let previous_range = state.declaration(previous).map(|d| (state.file, d.range));
            state
                .diagnostics
                .redeclaration(range, display, previous_range, &path, line);
            return;
        }

        if state.is_builtins {
            return;
        }
        let internal = state
            .env
            .builtins_unit()
            .and_then(|unit| state.env.store().get(unit))
            .is_some_and(|unit| {
                unit.flat_lookup(&key)
                    .iter()
                    .any(|&d| unit.declaration(d).is_some_and(|d| d.kind() == kind))
            });
        if internal {
            Self::error(
                state,
                range,
                codes::DUPLICATE_DEFINITION,
                format!("Cannot redeclare PHP internal {display}."),
            );
        }
    }

    fn check_method_modifiers(state: &mut BuildState<'_>, tree: &SyntaxTree, class: &ClassDecl, class_name: &str, method: &MethodDecl) {
        let name = tree.ident(&method.name);
        let range = method.name.range;
        let modifiers = method.modifiers;
        let has_body = method.body.is_some();

        if class.kind == ClassKind::Interface {
            if has_body {
                Self::error(
                    state,
                    range,
                    codes::INVALID_MODIFIER,
                    format!("Interface function {class_name}::{name}() cannot contain body"),
                );
            }
            if modifiers.intersects(Modifiers::PRIVATE | Modifiers::PROTECTED) {
                Self::error(
                    state,
                    range,
                    codes::INVALID_MODIFIER,
                    format!("Access type for interface method {class_name}::{name}() must be omitted"),
                );
            }
            return;
        }

        if modifiers.contains(Modifiers::ABSTRACT) {
            if class.kind == ClassKind::Class && class.modifier != ClassModifierKind::Abstract {
                Self::error(
                    state,
                    range,
                    codes::INVALID_MODIFIER,
                    format!("Class {class_name} contains abstract method {name} and must therefore be declared abstract"),
                );
            }
            if has_body {
                Self::error(
                    state,
                    range,
                    codes::INVALID_MODIFIER,
                    format!("Abstract function {class_name}::{name}() cannot contain body"),
                );
            }
            if modifiers.contains(Modifiers::FINAL) {
                Self::error(
                    state,
                    range,
                    codes::INVALID_MODIFIER,
                    "Cannot use the final modifier on an abstract class member".to_string(),
                );
            }
        } else if !has_body {
            Self::error(
                state,
                range,
                codes::INVALID_MODIFIER,
                format!("Non-abstract method {class_name}::{name}() must contain body"),
            );
        }
    }

    /// Final methods cannot be overridden; abstract methods cannot be
    /// declared abstract again.
    fn check_override(state: &mut BuildState<'_>, class: DeclId, class_name: &str, name: &SmolStr, data: MethodData, range: TextRange) {
        let bases = state
            .declaration(class)
            .and_then(Declaration::class)
            .map(|c| c.bases.clone())
            .unwrap_or_default();
        let folded = fold(name);
        for base in bases {
            let lookup = state.lookup();
            let Some(found) = lookup.find_member(base, &folded, Declaration::is_function_like) else {
                continue;
            };
            let Some(base_method) = lookup.with_decl(found, |d| d.method().copied()).flatten() else {
                continue;
            };
            let owner = lookup
                .owning_class(found)
                .map(|owner| decl_name(state, owner))
                .unwrap_or_default();
            if base_method.is_final {
                Self::error(
                    state,
                    range,
                    codes::INVALID_OVERRIDE,
                    format!("Cannot override final method {owner}::{name}()"),
                );
                return;
            }
            if base_method.is_abstract && data.is_abstract {
                Self::error(
                    state,
                    range,
                    codes::INVALID_OVERRIDE,
                    format!("Can't inherit abstract function {owner}::{name}() (previously declared abstract in {class_name})"),
                );
                return;
            }
        }
    }

    fn declare_method(&mut self, state: &mut BuildState<'_>, tree: &SyntaxTree, class: &ClassDecl, method: &MethodDecl) {
        let class_id = declare_class_shell(state, tree, class);
        let class_qid = state.declaration(class_id).map(|d| d.id.clone()).unwrap_or_default();
        let class_name = class_qid.to_string();
        let name = tree.ident(&method.name);
        let scope = state.current_scope();
        let key = scope_identifier(state, scope).child(fold(&name));
        let modifiers = method.modifiers;
        let data = MethodData {
            access: access_of(modifiers),
            is_static: modifiers.contains(Modifiers::STATIC),
            is_abstract: modifiers.contains(Modifiers::ABSTRACT) || class.kind == ClassKind::Interface,
            is_final: modifiers.contains(Modifiers::FINAL),
        };

        Self::check_method_modifiers(state, tree, class, &class_name, method);
        if declared_in(state, scope, &key, DeclKind::Method) {
            Self::error(
                state,
                method.name.range,
                codes::DUPLICATE_DEFINITION,
                format!("Cannot redeclare {class_name}::{name}()"),
            );
        }
        Self::check_override(state, class_id, &class_name, &name, data, method.name.range);

        let mut decl = Declaration::new(
            name.clone(),
            class_qid.child(name),
            key,
            method.name.range,
            scope,
            DeclData::Method(data),
        );
        decl.doc = method.doc.clone();
        let id = state.open_declaration(decl);
        state.encounter(id);
        state.set_pending_owner(id);
        self.stack.push(id);
    }

    // ========================================================================
    // TRAITS
    // ========================================================================

    fn declare_trait_alias(
        state: &mut BuildState<'_>,
        class_qid: &QualifiedIdentifier,
        name: SmolStr,
        range: TextRange,
        data: TraitAliasData,
    ) -> DeclId {
        let scope = state.current_scope();
        let key = scope_identifier(state, scope).child(fold(&name));
        let original = state.lookup().decl(data.aliased);
        let mut decl = Declaration::new(
            name.clone(),
            class_qid.child(name),
            key,
            range,
            scope,
            DeclData::TraitMethodAlias(data),
        );
        if let Some(original) = original {
            decl.ty = original.ty;
            decl.doc = original.doc;
        }
        let id = state.open_declaration(decl);
        state.encounter(id);
        id
    }

    /// Methods of a trait, wherever it is declared.
    fn trait_methods(state: &BuildState<'_>, trait_decl: DeclRef) -> Vec<(DeclRef, Declaration)> {
        let lookup = state.lookup();
        let Some(scope) = lookup.class_scope(trait_decl) else {
            return Vec::new();
        };
        let Some(view) = lookup.view(trait_decl.unit) else {
            return Vec::new();
        };
        let Some(s) = view.scope(scope) else {
            return Vec::new();
        };
        s.declarations()
            .iter()
            .filter_map(|&d| {
                let decl = view.declaration(d)?;
                decl.is_function_like()
                    .then(|| (DeclRef::new(trait_decl.unit, d), decl.clone()))
            })
            .collect()
    }

    fn import_traits(state: &mut BuildState<'_>, tree: &SyntaxTree, class: &ClassDecl, class_id: DeclId) {
        let uses: Vec<&TraitUse> = class
            .members
            .iter()
            .filter_map(|member| match member {
                ClassMember::TraitUse(tu) => Some(tu),
                _ => None,
            })
            .collect();
        if uses.is_empty() {
            return;
        }
        let scope = state.current_scope();
        let class_qid = state.declaration(class_id).map(|d| d.id.clone()).unwrap_or_default();

        let mut traits: Vec<DeclRef> = Vec::new();
        for path in uses.iter().flat_map(|tu| tu.traits.iter()) {
            let id = path_identifier(tree, path);
            let Some(found) = state.resolve(scope, &id, DeclarationType::Class) else {
                state.had_unresolved = true;
                continue;
            };
            let class_type = state
                .lookup()
                .with_decl(found, |d| d.class().map(|c| c.class_type))
                .flatten();
            if class_type != Some(ClassType::Trait) {
                Self::error(
                    state,
                    path.range,
                    codes::INVALID_CONSTRUCT,
                    format!("{class_qid} cannot use {id} - it is not a trait"),
                );
                continue;
            }
            if !traits.contains(&found) {
                traits.push(found);
            }
        }
        if let Some(data) = state.declaration_mut(class_id).and_then(Declaration::class_mut) {
            data.traits = traits.clone();
        }

        let mut excluded: FxHashSet<(DeclRef, SmolStr)> = FxHashSet::default();
        for adaptation in uses.iter().flat_map(|tu| tu.adaptations.iter()) {
            if let AdaptationKind::InsteadOf(others) = &adaptation.kind {
                let method = fold(&tree.ident(&adaptation.method));
                for other in others {
                    let id = path_identifier(tree, other);
                    if let Some(other) = state.resolve(scope, &id, DeclarationType::Class) {
                        excluded.insert((other, method.clone()));
                    }
                }
            }
        }

        let mut imported: FxHashMap<SmolStr, DeclId> = FxHashMap::default();
        for &trait_decl in &traits {
            for (method_ref, method) in Self::trait_methods(state, trait_decl) {
                let Some(folded) = method.key.last().cloned() else {
                    continue;
                };
                let key = scope_identifier(state, scope).child(folded.clone());
                if declared_in(state, scope, &key, DeclKind::Method)
                    || excluded.contains(&(trait_decl, folded.clone()))
                {
                    continue;
                }
                if imported.contains_key(&folded) {
                    Self::error(
                        state,
                        class.name.range,
                        codes::INVALID_CONSTRUCT,
                        format!(
                            "Trait method {} has not been applied, because there are collisions with other trait methods on {class_qid}",
                            method.name
                        ),
                    );
                    continue;
                }
                let data = TraitAliasData {
                    aliased: method_ref,
                    access: method.access(),
                    is_static: method.method().is_some_and(|m| m.is_static),
                };
                let id = Self::declare_trait_alias(state, &class_qid, method.name.clone(), class.name.range, data);
                imported.insert(folded, id);
            }
        }

        for adaptation in uses.iter().flat_map(|tu| tu.adaptations.iter()) {
            let AdaptationKind::Alias { modifiers, alias } = &adaptation.kind else {
                continue;
            };
            let folded = fold(&tree.ident(&adaptation.method));
            let candidates: Vec<DeclRef> = match &adaptation.trait_name {
                Some(path) => {
                    let id = path_identifier(tree, path);
                    state.resolve(scope, &id, DeclarationType::Class).into_iter().collect()
                }
                None => traits.clone(),
            };
            let lookup = state.lookup();
            let Some(found) = candidates
                .iter()
                .find_map(|&t| lookup.find_member(t, &folded, Declaration::is_function_like))
            else {
                continue;
            };
            let Some(original) = lookup.decl(found) else {
                continue;
            };
            let access = if modifiers.intersects(Modifiers::PUBLIC | Modifiers::PROTECTED | Modifiers::PRIVATE) {
                access_of(*modifiers)
            } else {
                original.access()
            };
            match alias {
                Some(alias) => {
                    let data = TraitAliasData {
                        aliased: found,
                        access,
                        is_static: original.method().is_some_and(|m| m.is_static),
                    };
                    Self::declare_trait_alias(state, &class_qid, tree.ident(alias), alias.range, data);
                }
                None => {
                    let Some(&id) = imported.get(&folded) else {
                        continue;
                    };
                    if let Some(DeclData::TraitMethodAlias(data)) = state.declaration_mut(id).map(|d| &mut d.data) {
                        data.access = access;
                    }
                }
            }
        }
    }

    // ========================================================================
    // STATEMENTS
    // ========================================================================

    fn declare_use(state: &mut BuildState<'_>, tree: &SyntaxTree, item: &UseItem) {
        let path = path_identifier(tree, &item.path);
        let Some(alias_name) = item
            .alias
            .as_ref()
            .map(|alias| tree.ident(alias))
            .or_else(|| path.last().cloned())
        else {
            return;
        };
        let range = item.alias.as_ref().map_or(item.path.range, |alias| alias.range);
        let scope = state.current_scope();

        if path.len() == 1 && item.alias.is_none() && state.scope_kind(scope) == ScopeKind::Global {
            state.diagnostics.warning(
                item.range,
                codes::NO_EFFECT,
                format!("The use statement with non-compound name '{path}' has no effect."),
            );
            return;
        }

        let (id, key) = state.qualify(&alias_name, false);
        let taken = [DeclKind::Alias, DeclKind::NamespaceAlias, DeclKind::Class]
            .into_iter()
            .any(|kind| declared_in(state, scope, &key, kind));
        if taken {
            Self::error(
                state,
                range,
                codes::INVALID_CONSTRUCT,
                format!("Cannot use '{path}' as '{alias_name}' because the name is already in use."),
            );
            return;
        }

        let target = state
            .resolve(ScopeId::ROOT, &path, DeclarationType::Class)
            .filter(|&t| state.lookup().with_decl(t, |d| d.kind() == DeclKind::Class) == Some(true));
        let data = match target {
            Some(target) => DeclData::Alias {
                kind: AliasKind::Class,
                target: Some(target),
            },
            None => DeclData::NamespaceAlias { imported: path },
        };
        let decl = Declaration::new(alias_name, id, key, range, scope, data);
        let id = state.open_declaration(decl);
        state.encounter(id);
    }

    fn declare_constant(state: &mut BuildState<'_>, name: SmolStr, id: Option<QualifiedIdentifier>, range: TextRange, ty: Type, doc: Option<Arc<str>>) {
        let (id, key) = match id {
            Some(id) if id.len() > 1 => {
                let key = id.folded(true);
                (id, key)
            }
            _ => state.qualify(&name, true),
        };
        let scope = state.declaration_scope();
        let mut decl = Declaration::new(name, id, key, range, scope, DeclData::Constant);
        decl.doc = doc;
        decl.ty = Some(ty);
        let id = state.open_declaration(decl);
        state.encounter(id);
    }

    /// `global $x`: an alias of the root variable, created when missing.
    fn declare_global(state: &mut BuildState<'_>, tree: &SyntaxTree, var: &Var) {
        let name = tree.ident(&var.name);
        let global = match state.lookup().find_variable(ScopeId::ROOT, &name) {
            Some(global) => Some(global),
            None => {
                let id = QualifiedIdentifier::from_segments([name.clone()]);
                state.resolve(ScopeId::ROOT, &id, DeclarationType::GlobalVariable)
            }
        };
        let global = match global {
            Some(global) => global,
            None => {
                let key = QualifiedIdentifier::from_segments([name.clone()]);
                let mut decl = Declaration::new(
                    name.clone(),
                    key.clone(),
                    key,
                    var.range,
                    ScopeId::ROOT,
                    DeclData::Variable(VariableData::default()),
                );
                decl.ty = Some(Type::MIXED);
                let id = state.open_declaration(decl);
                state.encounter(id);
                state.local(id)
            }
        };

        let scope = state.current_scope();
        let key = scope_identifier(state, scope).child(name.clone());
        let ty = state.lookup().with_decl(global, |d| d.ty.clone()).flatten();
        let mut decl = Declaration::new(
            name,
            key.clone(),
            key,
            var.range,
            scope,
            DeclData::Alias {
                kind: AliasKind::Variable,
                target: Some(global),
            },
        );
        decl.ty = ty;
        let id = state.open_declaration(decl);
        state.encounter(id);
    }

    // ========================================================================
    // ASSIGNMENTS
    // ========================================================================

    fn assign(state: &mut BuildState<'_>, tree: &SyntaxTree, target: &Expr, ty: Type) {
        let Some(id) = variable_identifier(tree, target) else {
            return;
        };
        let ty = if id.is_array { Type::array_of(Some(ty)) } else { ty };
        match id.parent {
            None => {
                if id.name == "this" {
                    Self::error(
                        state,
                        target.range,
                        codes::INVALID_CONSTRUCT,
                        "Cannot re-assign $this.".to_string(),
                    );
                    return;
                }
                declare_variable(state, id.name, id.range, ty);
            }
            Some(object) => {
                let class = match &object.kind {
                    ExprKind::Variable(var) if tree.ident(&var.name) == "this" => {
                        state.lookup().enclosing_class(state.current_scope())
                    }
                    _ => expr_type(state, tree, object).structure().map(|s| s.decl),
                };
                if let Some(class) = class {
                    Self::declare_class_member(state, class, id.name, id.range, ty);
                }
            }
        }
    }

    /// A property assigned through an object: checks access to an existing
    /// member, or declares a public one.
    fn declare_class_member(state: &mut BuildState<'_>, class: DeclRef, name: SmolStr, range: TextRange, ty: Type) {
        let lookup = state.lookup();
        if let Some(existing) = lookup.find_member(class, &name, |d| d.kind() == DeclKind::ClassMember) {
            let access = lookup.with_decl(existing, Declaration::access).unwrap_or_default();
            let owner = lookup.owning_class(existing);
            let context = lookup.enclosing_class(state.current_scope());
            let allowed = match (access, context, owner) {
                (Access::Public, _, _) => true,
                (Access::Private, context, owner) => context == owner,
                (Access::Protected, Some(context), Some(owner)) => {
                    lookup.is_subclass_of(context, owner) || lookup.is_subclass_of(owner, context)
                }
                (Access::Protected, _, _) => false,
            };
            if !allowed {
                let owner_name = owner.map(|o| decl_name(state, o)).unwrap_or_default();
                Self::error(
                    state,
                    range,
                    codes::INVALID_CONSTRUCT,
                    format!(
                        "Cannot redeclare {} property {owner_name}::${name} from this context.",
                        access_name(access)
                    ),
                );
            }
            return;
        }

        if class.unit != state.unit_id {
            return;
        }
        if state
            .upcoming_class_vars
            .get(&class.decl)
            .is_some_and(|vars| vars.contains(&name))
        {
            return;
        }
        let Some(scope) = lookup.class_scope(class) else {
            return;
        };
        let class_qid = lookup.with_decl(class, |d| d.id.clone()).unwrap_or_default();
        let key = scope_identifier(state, scope).child(name.clone());
        let mut decl = Declaration::new(
            name.clone(),
            class_qid.child(name),
            key,
            range,
            scope,
            DeclData::ClassMember(MemberData::default()),
        );
        decl.ty = Some(ty);
        let id = state.open_declaration(decl);
        state.encounter(id);
    }

    fn current_class(state: &BuildState<'_>) -> Option<(DeclRef, String, Option<ClassType>)> {
        let lookup = state.lookup();
        let class = lookup.enclosing_class(state.current_scope())?;
        let (name, class_type) = lookup.with_decl(class, |d| (d.id.to_string(), d.class().map(|c| c.class_type)))?;
        Some((class, name, class_type))
    }
}

impl BuildStage for DeclarationStage {
    fn enter_namespace(&mut self, state: &mut BuildState<'_>, tree: &SyntaxTree, ns: &NamespaceDecl, index: usize) {
        if let Some(id) = declare_namespace_segment(state, tree, ns, index) {
            state.encounter(id);
            state.set_pending_owner(id);
        }
    }

    fn enter_class(&mut self, state: &mut BuildState<'_>, tree: &SyntaxTree, class: &ClassDecl) {
        let id = declare_class_shell(state, tree, class);
        let display = state.declaration(id).map(|d| d.id.to_string()).unwrap_or_default();
        Self::check_redeclaration(state, id, &display);
        state.encounter(id);
        state.set_pending_owner(id);
        self.stack.push(id);
    }

    fn leave_class(&mut self, state: &mut BuildState<'_>, tree: &SyntaxTree, class: &ClassDecl) {
        if let Some(id) = self.stack.pop() {
            Self::import_traits(state, tree, class, id);
        }
    }

    fn enter_function(&mut self, state: &mut BuildState<'_>, tree: &SyntaxTree, function: FunctionLike<'_>) {
        self.saw_default.push(false);
        match function {
            FunctionLike::Function(f) => {
                let id = declare_function_shell(state, tree, f);
                let display = state.declaration(id).map(|d| format!("{}()", d.id)).unwrap_or_default();
                Self::check_redeclaration(state, id, &display);
                state.encounter(id);
                state.set_pending_owner(id);
                self.stack.push(id);
            }
            FunctionLike::Method(class, method) => self.declare_method(state, tree, class, method),
            FunctionLike::Closure(_) => {}
        }
    }

    fn leave_function(&mut self, _state: &mut BuildState<'_>, _tree: &SyntaxTree, function: FunctionLike<'_>) {
        self.saw_default.pop();
        if !function.is_closure() {
            self.stack.pop();
        }
    }

    fn enter_parameter(&mut self, state: &mut BuildState<'_>, tree: &SyntaxTree, param: &Param, _index: usize) {
        match &param.default {
            Some(default) => {
                let class_hint = param.hint.as_ref().is_some_and(|hint| is_class_hint(tree, hint));
                if class_hint && !matches!(default.kind, ExprKind::Literal(Literal::Null)) {
                    Self::error(
                        state,
                        default.range,
                        codes::INVALID_CONSTRUCT,
                        "Default value for parameters with a class type hint can only be NULL.".to_string(),
                    );
                }
                if let Some(seen) = self.saw_default.last_mut() {
                    *seen = true;
                }
            }
            None => {
                if self.saw_default.last() == Some(&true) && !param.variadic {
                    Self::error(
                        state,
                        param.range,
                        codes::INVALID_CONSTRUCT,
                        "Following parameters must have a default value, too.".to_string(),
                    );
                }
            }
        }

        let name = tree.ident(&param.var.name);
        let scope = state.current_scope();
        let key = scope_identifier(state, scope).child(name.clone());
        let decl = Declaration::new(
            name,
            key.clone(),
            key,
            param.var.range,
            scope,
            DeclData::Variable(VariableData::default()),
        );
        let id = state.open_declaration(decl);
        state.encounter(id);
        self.stack.push(id);
    }

    fn leave_parameter(&mut self, _state: &mut BuildState<'_>, _tree: &SyntaxTree, _param: &Param, _index: usize) {
        self.stack.pop();
    }

    /// Captured variables alias the variable of the enclosing scope.
    fn lexical_var(&mut self, state: &mut BuildState<'_>, tree: &SyntaxTree, var: &LexicalVar) {
        let name = tree.ident(&var.var.name);
        let scope = state.current_scope();
        let outer = state
            .unit
            .scope(scope)
            .and_then(|s| s.parent)
            .unwrap_or(ScopeId::ROOT);
        let lookup = state.lookup();
        let target = lookup.find_variable(outer, &name);
        let ty = target.and_then(|t| lookup.with_decl(t, |d| d.ty.clone()).flatten());

        let key = scope_identifier(state, scope).child(name.clone());
        let data = match target {
            Some(target) => DeclData::Alias {
                kind: AliasKind::Variable,
                target: Some(target),
            },
            None => DeclData::Variable(VariableData::default()),
        };
        let mut decl = Declaration::new(name, key.clone(), key, var.var.range, scope, data);
        decl.ty = ty;
        let id = state.open_declaration(decl);
        state.encounter(id);
    }

    fn enter_property(&mut self, state: &mut BuildState<'_>, tree: &SyntaxTree, decl: &PropertyDecl, var: &PropertyVar) {
        let name = tree.ident(&var.var.name);
        let range = var.var.range;
        let (class_name, class_type) = match Self::current_class(state) {
            Some((_, name, class_type)) => (name, class_type),
            None => (String::new(), None),
        };
        if class_type == Some(ClassType::Interface) {
            Self::error(
                state,
                range,
                codes::INVALID_CONSTRUCT,
                "Interfaces may not include member variables".to_string(),
            );
        }
        if decl.modifiers.contains(Modifiers::ABSTRACT) {
            Self::error(
                state,
                range,
                codes::INVALID_MODIFIER,
                "Properties cannot be declared abstract".to_string(),
            );
        }
        if decl.modifiers.contains(Modifiers::FINAL) {
            Self::error(
                state,
                range,
                codes::INVALID_MODIFIER,
                format!("Cannot declare property {class_name}::${name} final, the final modifier is allowed only for methods and classes"),
            );
        }

        let scope = state.current_scope();
        let key = scope_identifier(state, scope).child(name.clone());
        if declared_in(state, scope, &key, DeclKind::ClassMember) {
            Self::error(
                state,
                range,
                codes::DUPLICATE_DEFINITION,
                format!("Cannot redeclare {class_name}::${name}"),
            );
        }
        let data = MemberData {
            access: access_of(decl.modifiers),
            is_static: decl.modifiers.contains(Modifiers::STATIC),
        };
        let id = QualifiedIdentifier::parse(&class_name).child(name.clone());
        let mut member = Declaration::new(name, id, key, range, scope, DeclData::ClassMember(data));
        member.doc = decl.doc.clone();
        let id = state.open_declaration(member);
        state.encounter(id);
        self.stack.push(id);
    }

    fn leave_property(&mut self, _state: &mut BuildState<'_>, _tree: &SyntaxTree, _decl: &PropertyDecl, _var: &PropertyVar) {
        self.stack.pop();
    }

    fn enter_class_const(&mut self, state: &mut BuildState<'_>, tree: &SyntaxTree, stmt: &ConstStmt, item: &ConstItem) {
        let name = tree.ident(&item.name);
        let range = item.name.range;
        let (class_name, class_type) = match Self::current_class(state) {
            Some((_, name, class_type)) => (name, class_type),
            None => (String::new(), None),
        };
        if class_type == Some(ClassType::Trait) {
            Self::error(state, range, codes::INVALID_CONSTRUCT, "Traits cannot have constants.".to_string());
        }
        if !is_constant_value(&item.value) {
            Self::error(
                state,
                item.value.range,
                codes::INVALID_CONSTRUCT,
                "Only booleans, ints, floats and strings are allowed for class constants.".to_string(),
            );
        }

        let scope = state.current_scope();
        let key = scope_identifier(state, scope).child(name.clone());
        if declared_in(state, scope, &key, DeclKind::ClassConstant) {
            Self::error(
                state,
                range,
                codes::DUPLICATE_DEFINITION,
                format!("Cannot redefine class constant {class_name}::{name}"),
            );
        }
        let id = QualifiedIdentifier::parse(&class_name).child(name.clone());
        let mut constant = Declaration::new(name, id, key, range, scope, DeclData::ClassConstant);
        constant.doc = stmt.doc.clone();
        let id = state.open_declaration(constant);
        state.encounter(id);
        self.stack.push(id);
    }

    fn leave_class_const(&mut self, _state: &mut BuildState<'_>, _tree: &SyntaxTree, _stmt: &ConstStmt, _item: &ConstItem) {
        self.stack.pop();
    }

    fn enter_statement(&mut self, state: &mut BuildState<'_>, tree: &SyntaxTree, stmt: &Stmt) {
        match stmt {
            Stmt::Use(u) => {
                for item in &u.items {
                    Self::declare_use(state, tree, item);
                }
            }
            Stmt::Const(c) => {
                for item in &c.items {
                    let ty = expr_type(state, tree, &item.value);
                    Self::declare_constant(state, tree.ident(&item.name), None, item.name.range, ty, c.doc.clone());
                }
            }
            Stmt::Global(g) => {
                if state.in_function() {
                    for var in &g.vars {
                        Self::declare_global(state, tree, var);
                    }
                }
            }
            Stmt::StaticVar(s) => {
                for var in &s.vars {
                    let ty = match &var.value {
                        Some(value) => expr_type(state, tree, value),
                        None => Type::MIXED,
                    };
                    declare_variable(state, tree.ident(&var.var.name), var.var.range, ty);
                }
            }
            Stmt::Foreach(f) => {
                let element = expr_type(state, tree, &f.subject)
                    .element_type()
                    .cloned()
                    .unwrap_or(Type::MIXED);
                if let Some(key) = &f.key {
                    Self::assign(state, tree, key, Type::MIXED);
                }
                Self::assign(state, tree, &f.value, element);
            }
            Stmt::Try(t) => {
                for catch in &t.catches {
                    let scope = state.current_scope();
                    let class = catch
                        .classes
                        .first()
                        .and_then(|path| state.resolve(scope, &path_identifier(tree, path), DeclarationType::Class));
                    let ty = class
                        .and_then(|class| structure_of(state, class))
                        .unwrap_or(Type::MIXED);
                    declare_variable(state, tree.ident(&catch.var.name), catch.var.range, ty);
                }
            }
            _ => {}
        }
    }

    fn leave_statement(&mut self, state: &mut BuildState<'_>, tree: &SyntaxTree, stmt: &Stmt) {
        let Stmt::Expr(e) = stmt else {
            return;
        };
        if state.current_scope() != ScopeId::ROOT || !e.doc.as_deref().is_some_and(|doc| has_tag(doc, "superglobal")) {
            return;
        }
        let ExprKind::Assign { target, .. } = &e.expr.kind else {
            return;
        };
        let ExprKind::Variable(var) = &target.kind else {
            return;
        };
        let name = tree.ident(&var.name);
        let Some(global) = state.lookup().find_variable(ScopeId::ROOT, &name) else {
            return;
        };
        if global.unit != state.unit_id {
            return;
        }
        if let Some(DeclData::Variable(data)) = state.declaration_mut(global.decl).map(|d| &mut d.data) {
            data.superglobal = true;
        }
    }

    fn enter_expression(&mut self, state: &mut BuildState<'_>, tree: &SyntaxTree, expr: &Expr) {
        match &expr.kind {
            ExprKind::Assign { target, value, .. } => {
                let ty = match state.annotated_type.take() {
                    Some(ty) => ty,
                    None => expr_type(state, tree, value),
                };
                Self::assign(state, tree, target, ty);
            }
            ExprKind::CompoundAssign { target, .. } => {
                if let ExprKind::Variable(var) = &target.kind {
                    let name = tree.ident(&var.name);
                    if state.lookup().find_variable(state.current_scope(), &name).is_none() {
                        let ty = expr_type(state, tree, expr);
                        declare_variable(state, name, var.range, ty);
                    }
                }
            }
            ExprKind::Call { callee, args } => {
                let callee = path_identifier(tree, callee);
                let is_define = callee.len() == 1 && callee.last().is_some_and(|n| n.eq_ignore_ascii_case("define"));
                if !is_define {
                    return;
                }
                let Some(Expr {
                    kind: ExprKind::Literal(Literal::String(name)),
                    range,
                }) = args.first()
                else {
                    return;
                };
                let ty = match args.get(1) {
                    Some(value) => expr_type(state, tree, value),
                    None => Type::MIXED,
                };
                let id = QualifiedIdentifier::parse(name);
                let Some(short) = id.last().cloned() else {
                    return;
                };
                Self::declare_constant(state, short, Some(id), *range, ty, None);
            }
            _ => {}
        }
    }

    fn update_current_type(&mut self, state: &mut BuildState<'_>, ty: &Type) {
        if let Some(decl) = self.stack.last().and_then(|&top| state.declaration_mut(top)) {
            decl.ty = Some(ty.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use rstest::rstest;

    use crate::base::FileSet;
    use crate::hir::decl::{DeclData, DeclKind};
    use crate::hir::env::{AnalysisEnvironment, BuildConfig};
    use crate::hir::include::NoProjects;
    use crate::hir::name::QualifiedIdentifier;
    use crate::hir::types::Type;
    use crate::hir::{SemanticBuilder, SemanticUnit};

    fn build(text: &str) -> SemanticUnit {
        let files = Arc::new(FileSet::new());
        let env = AnalysisEnvironment::new(BuildConfig::default(), files.clone(), Arc::new(NoProjects));
        env.ensure_builtins();
        let file = files.file_id(std::path::Path::new("/src/decl.php"));
        let tree = env.parser().parse(text).tree.expect("parses");
        let mut builder = SemanticBuilder::new(&env, file);
        builder.build(&tree, None);
        builder.finish().expect("built").1
    }

    fn messages(unit: &SemanticUnit) -> Vec<String> {
        unit.problems().iter().map(|p| p.message.to_string()).collect()
    }

    fn count(unit: &SemanticUnit, id: &str, kind: DeclKind) -> usize {
        unit.find_declarations(&QualifiedIdentifier::parse(id))
            .into_iter()
            .filter(|&d| unit.declaration(d).is_some_and(|d| d.kind() == kind))
            .count()
    }

    #[test]
    fn test_class_redeclaration_reports_location() {
        let unit = build("<?php\nclass A {}\nclass A {}");
        assert_eq!(
            messages(&unit),
            vec!["Cannot redeclare A, already declared in /src/decl.php on line 2"]
        );
    }

    #[test]
    fn test_builtin_redeclaration() {
        let unit = build("<?php function strlen($s) { return 0; }");
        assert_eq!(messages(&unit), vec!["Cannot redeclare PHP internal strlen()."]);
    }

    #[rstest]
    #[case("class B { final function m() {} } class C extends B { function m() {} }", "Cannot override final method B::m()")]
    #[case(
        "abstract class B { abstract function m(); } abstract class C extends B { abstract function m(); }",
        "Can't inherit abstract function B::m() (previously declared abstract in C)"
    )]
    #[case("interface I { function m() {} }", "Interface function I::m() cannot contain body")]
    #[case("interface I { private function m(); }", "Access type for interface method I::m() must be omitted")]
    #[case("class A { abstract function m(); }", "Class A contains abstract method m and must therefore be declared abstract")]
    #[case("abstract class A { abstract function m() {} }", "Abstract function A::m() cannot contain body")]
    #[case("class A { function m(); }", "Non-abstract method A::m() must contain body")]
    #[case("class A { function m() {} function M() {} }", "Cannot redeclare A::M()")]
    #[case("class A { public $x; public $x; }", "Cannot redeclare A::$x")]
    #[case("interface I { public $x; }", "Interfaces may not include member variables")]
    #[case("trait T { const X = 1; }", "Traits cannot have constants.")]
    #[case("class A { const X = array(); }", "Only booleans, ints, floats and strings are allowed for class constants.")]
    #[case("class A {} function f(A $a = 1) {}", "Default value for parameters with a class type hint can only be NULL.")]
    #[case("function f($a = 1, $b) {}", "Following parameters must have a default value, too.")]
    #[case("class A { function m() { $this = 1; } }", "Cannot re-assign $this.")]
    #[case("class A {} class B { use A; }", "B cannot use A - it is not a trait")]
    #[case("use Foo;", "The use statement with non-compound name 'Foo' has no effect.")]
    #[case("use A\\B; use C\\B;", "Cannot use 'C\\B' as 'B' because the name is already in use.")]
    fn test_reported_problem(#[case] body: &str, #[case] expected: &str) {
        let unit = build(&format!("<?php {body}"));
        let messages = messages(&unit);
        assert!(
            messages.iter().any(|m| m == expected),
            "expected {expected:?} in {messages:?}"
        );
    }

    #[test]
    fn test_identical_reassignment_keeps_one_declaration() {
        let unit = build("<?php $a = 1; $a = 2; $a = 3;");
        assert_eq!(count(&unit, "a", DeclKind::Variable), 1);
        let ids = unit.find_declarations(&QualifiedIdentifier::parse("a"));
        let decl = unit.declaration(ids[0]).expect("declared");
        let DeclData::Variable(data) = &decl.data else {
            panic!("not a variable");
        };
        assert_eq!(data.history, vec![Type::INT]);
    }

    #[test]
    fn test_reassignment_widens_type() {
        let unit = build("<?php $a = 1; $a = 'x'; $a = 2;");
        let ids = unit.find_declarations(&QualifiedIdentifier::parse("a"));
        let decl = unit.declaration(ids[0]).expect("declared");
        assert_eq!(decl.ty, Some(Type::INT.merge(Type::STRING)));
    }

    #[test]
    fn test_this_member_assignment_declares_public_member() {
        let unit = build("<?php class A { function m() { $this->x = 1; $this->y = 2; } private $y; }");
        assert_eq!(count(&unit, "a\\x", DeclKind::ClassMember), 1);
        // `y` is declared by the class body, not by the assignment
        assert_eq!(count(&unit, "a\\y", DeclKind::ClassMember), 1);
    }

    #[test]
    fn test_private_member_from_outside() {
        let unit = build("<?php class A { private $x; } $a = new A(); $a->x = 1;");
        assert!(messages(&unit).contains(&"Cannot redeclare private property A::$x from this context.".to_string()));
    }

    #[test]
    fn test_trait_methods_are_imported_and_aliased() {
        let unit = build(
            "<?php trait T { function hello() {} function bye() {} }\n\
             class A { use T { hello as protected greet; bye as private; } }",
        );
        assert!(messages(&unit).is_empty(), "{:?}", messages(&unit));
        assert_eq!(count(&unit, "a\\hello", DeclKind::TraitMethodAlias), 1);
        assert_eq!(count(&unit, "a\\greet", DeclKind::TraitMethodAlias), 1);
        let bye = unit.find_declarations(&QualifiedIdentifier::parse("a\\bye"))[0];
        assert_eq!(
            unit.declaration(bye).map(|d| d.access()),
            Some(crate::hir::decl::Access::Private)
        );
    }

    #[test]
    fn test_trait_collision_and_insteadof() {
        let collision = build(
            "<?php trait T { function m() {} } trait U { function m() {} } class A { use T, U; }",
        );
        assert!(messages(&collision)[0].starts_with("Trait method m has not been applied"));

        let resolved = build(
            "<?php trait T { function m() {} } trait U { function m() {} } class A { use T, U { T::m insteadof U; } }",
        );
        assert!(messages(&resolved).is_empty(), "{:?}", messages(&resolved));
    }

    #[test]
    fn test_define_and_const() {
        let unit = build("<?php const A = 1; define('B', 'x');");
        assert_eq!(count(&unit, "A", DeclKind::Constant), 1);
        assert_eq!(count(&unit, "B", DeclKind::Constant), 1);
        let b = unit.find_declarations(&QualifiedIdentifier::parse("B"))[0];
        assert_eq!(unit.declaration(b).and_then(|d| d.ty.clone()), Some(Type::STRING));
    }

    #[test]
    fn test_closure_captures_alias_outer_variable() {
        let unit = build("<?php $x = 1; $f = function () use ($x) { return $x; };");
        let outer = unit.find_declarations(&QualifiedIdentifier::parse("x"))[0];
        let alias = unit
            .local_declarations()
            .find(|(_, d)| d.kind() == DeclKind::Alias && d.name == "x")
            .map(|(_, d)| d.clone())
            .expect("captured alias");
        let DeclData::Alias { target, .. } = alias.data else {
            unreachable!()
        };
        assert_eq!(target.map(|t| t.decl), Some(outer));
        assert_eq!(count(&unit, "x", DeclKind::Variable), 1);
    }

    #[test]
    fn test_superglobal_annotation() {
        let unit = build("<?php\n/** @superglobal */\n$config = array();");
        let ids = unit.find_declarations(&QualifiedIdentifier::parse("config"));
        assert!(unit.declaration(ids[0]).is_some_and(|d| d.is_superglobal()));
    }
}
