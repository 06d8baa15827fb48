//! Name resolution shared by every build stage.
//!
//! A lookup runs these steps in order and stops at the first match:
//!
//! 1. **Special forms** - `self`/`static` name the enclosing class,
//!    `parent` its base class.
//! 2. **Flat search** - the flat table of the current unit, then of every
//!    transitively imported unit.
//! 3. **Scope chain** - each enclosing scope and the scopes it imports.
//! 4. **Namespace retry** - the flat search again with the identifier
//!    qualified by the enclosing namespace.
//! 5. **Persistent index** - any other unit. A hit imports the owning unit
//!    into the current one, so repeated lookups stop at step 2.
//!
//! Read-only steps live on [`UnitLookup`], which can look at the unit being
//! built next to the published units of the store. [`NameResolver`] adds the
//! persistent-index step, which mutates the unit's import list.

use std::collections::VecDeque;
use std::ops::Deref;
use std::sync::Arc;

use rustc_hash::FxHashSet;
use smol_str::SmolStr;
use tracing::debug;

use super::decl::{AliasKind, ClassType, DeclData, DeclKind, Declaration};
use super::env::AnalysisEnvironment;
use super::ids::{DeclRef, ScopeId, UnitId};
use super::name::{QualifiedIdentifier, fold};
use super::scope::{ImportTarget, ScopeKind};
use super::unit::SemanticUnit;

/// Alias chains longer than this are treated as unresolved.
const MAX_ALIAS_DEPTH: usize = 16;

/// What kind of declaration a lookup asks for.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum DeclarationType {
    Class,
    Function,
    Constant,
    GlobalVariable,
    Namespace,
}

impl DeclarationType {
    /// The lookup key for `id`: constants and variables keep the case of
    /// their last segment.
    pub fn fold(self, id: &QualifiedIdentifier) -> QualifiedIdentifier {
        id.folded(matches!(
            self,
            DeclarationType::Constant | DeclarationType::GlobalVariable
        ))
    }

    pub fn accepts(self, decl: &Declaration) -> bool {
        match (self, &decl.data) {
            (DeclarationType::Class, DeclData::Class(_))
            | (DeclarationType::Class, DeclData::NamespaceAlias { .. }) => true,
            (DeclarationType::Class, DeclData::Alias { kind, .. }) => *kind == AliasKind::Class,
            (DeclarationType::Function, DeclData::Function) => true,
            (DeclarationType::Constant, DeclData::Constant) => true,
            (DeclarationType::GlobalVariable, DeclData::Variable(_)) => true,
            (DeclarationType::GlobalVariable, DeclData::Alias { kind, .. }) => {
                *kind == AliasKind::Variable
            }
            (DeclarationType::Namespace, DeclData::Namespace)
            | (DeclarationType::Namespace, DeclData::NamespaceAlias { .. })
            | (DeclarationType::Namespace, DeclData::Class(_)) => true,
            (DeclarationType::Namespace, DeclData::Alias { kind, .. }) => *kind == AliasKind::Class,
            _ => false,
        }
    }

    /// Kinds worth fetching from the persistent index.
    fn accepts_indexed(self, kind: DeclKind) -> bool {
        match self {
            DeclarationType::Class => kind == DeclKind::Class,
            DeclarationType::Function => kind == DeclKind::Function,
            DeclarationType::Constant => kind == DeclKind::Constant,
            DeclarationType::Namespace => matches!(kind, DeclKind::Namespace | DeclKind::Class),
            DeclarationType::GlobalVariable => false,
        }
    }
}

/// A unit as seen during a build: the one under construction, or a
/// published snapshot.
pub enum UnitView<'a> {
    Current(&'a SemanticUnit),
    Stored(Arc<SemanticUnit>),
}

impl Deref for UnitView<'_> {
    type Target = SemanticUnit;

    fn deref(&self) -> &SemanticUnit {
        match self {
            UnitView::Current(unit) => unit,
            UnitView::Stored(unit) => unit,
        }
    }
}

/// Where an alias chain ends.
enum Followed {
    Decl(DeclRef),
    /// A namespace alias whose imported name still has to be looked up.
    Imported(QualifiedIdentifier),
}

/// Read-only lookups over the unit being built and the unit store.
#[derive(Clone, Copy)]
pub struct UnitLookup<'a> {
    env: &'a AnalysisEnvironment,
    unit_id: UnitId,
    unit: &'a SemanticUnit,
}

impl<'a> UnitLookup<'a> {
    pub fn new(env: &'a AnalysisEnvironment, unit_id: UnitId, unit: &'a SemanticUnit) -> Self {
        Self { env, unit_id, unit }
    }

    pub fn unit_id(&self) -> UnitId {
        self.unit_id
    }

    pub fn unit(&self) -> &'a SemanticUnit {
        self.unit
    }

    pub fn view(&self, unit: UnitId) -> Option<UnitView<'a>> {
        if unit == self.unit_id {
            Some(UnitView::Current(self.unit))
        } else {
            self.env.store().get(unit).map(UnitView::Stored)
        }
    }

    pub fn with_decl<R>(&self, decl: DeclRef, f: impl FnOnce(&Declaration) -> R) -> Option<R> {
        let view = self.view(decl.unit)?;
        view.declaration(decl.decl).map(f)
    }

    pub fn decl(&self, decl: DeclRef) -> Option<Declaration> {
        self.with_decl(decl, Clone::clone)
    }

    // ========================================================================
    // CLASSES
    // ========================================================================

    /// Nearest enclosing class scope of `scope`, itself included.
    pub fn enclosing_class_scope(&self, scope: ScopeId) -> Option<ScopeId> {
        let mut current = Some(scope);
        while let Some(id) = current {
            let s = self.unit.scope(id)?;
            if s.kind == ScopeKind::Class {
                return Some(id);
            }
            current = s.parent;
        }
        None
    }

    pub fn enclosing_class(&self, scope: ScopeId) -> Option<DeclRef> {
        let class_scope = self.enclosing_class_scope(scope)?;
        let owner = self.unit.scope(class_scope)?.owner?;
        Some(DeclRef::new(self.unit_id, owner))
    }

    /// Base class of the enclosing class: the first imported class that is
    /// not an interface or trait, else the first import.
    pub fn parent_class(&self, scope: ScopeId) -> Option<DeclRef> {
        let class_scope = self.unit.scope(self.enclosing_class_scope(scope)?)?;
        let bases: Vec<DeclRef> = class_scope
            .imports()
            .iter()
            .filter_map(|import| match import.target {
                ImportTarget::Class(class) => Some(class),
                ImportTarget::Local(_) => None,
            })
            .collect();
        bases
            .iter()
            .copied()
            .find(|&base| {
                self.with_decl(base, |d| d.class().map(|c| c.class_type))
                    .flatten()
                    == Some(ClassType::Class)
            })
            .or_else(|| bases.first().copied())
    }

    pub fn class_scope(&self, class: DeclRef) -> Option<ScopeId> {
        self.with_decl(class, |d| d.internal_scope).flatten()
    }

    /// Whether `class` is `base` or inherits from it.
    pub fn is_subclass_of(&self, class: DeclRef, base: DeclRef) -> bool {
        let mut visited = FxHashSet::default();
        let mut queue = VecDeque::from([class]);
        while let Some(current) = queue.pop_front() {
            if current == base {
                return true;
            }
            if !visited.insert(current) {
                continue;
            }
            if let Some(Some(bases)) = self.with_decl(current, |d| d.class().map(|c| c.bases.clone())) {
                queue.extend(bases);
            }
        }
        false
    }

    /// A member named `name` (already folded for its kind) of `class` or
    /// of anything it imports.
    pub fn find_member(
        &self,
        class: DeclRef,
        name: &SmolStr,
        accept: impl Fn(&Declaration) -> bool + Copy,
    ) -> Option<DeclRef> {
        let scope = self.class_scope(class)?;
        let mut visited = FxHashSet::default();
        self.find_member_in(class.unit, scope, name, accept, &mut visited)
    }

    fn find_member_in(
        &self,
        unit: UnitId,
        scope: ScopeId,
        name: &SmolStr,
        accept: impl Fn(&Declaration) -> bool + Copy,
        visited: &mut FxHashSet<(UnitId, ScopeId)>,
    ) -> Option<DeclRef> {
        if !visited.insert((unit, scope)) {
            return None;
        }
        let view = self.view(unit)?;
        let s = view.scope(scope)?;
        for &decl in s.declarations() {
            if let Some(d) = view.declaration(decl) {
                if d.key.last() == Some(name) && accept(d) {
                    return Some(DeclRef::new(unit, decl));
                }
            }
        }
        for import in s.imports() {
            let found = match import.target {
                ImportTarget::Local(target) => self.find_member_in(unit, target, name, accept, visited),
                ImportTarget::Class(base) => match self.class_scope(base) {
                    Some(target) => self.find_member_in(base.unit, target, name, accept, visited),
                    None => None,
                },
            };
            if found.is_some() {
                return found;
            }
        }
        None
    }

    /// Class owning the scope `decl` was declared in.
    pub fn owning_class(&self, decl: DeclRef) -> Option<DeclRef> {
        let view = self.view(decl.unit)?;
        let scope = view.scope(view.declaration(decl.decl)?.scope)?;
        if scope.kind != ScopeKind::Class {
            return None;
        }
        scope.owner.map(|owner| DeclRef::new(decl.unit, owner))
    }

    // ========================================================================
    // UNITS
    // ========================================================================

    /// Whether `from` imports `target`, directly or transitively.
    pub fn unit_reaches(&self, from: UnitId, target: UnitId) -> bool {
        let mut visited = FxHashSet::default();
        let mut queue = VecDeque::from([from]);
        while let Some(current) = queue.pop_front() {
            if current == target {
                return true;
            }
            if !visited.insert(current) {
                continue;
            }
            if let Some(view) = self.view(current) {
                queue.extend(view.imported_parent_units());
            }
        }
        false
    }

    /// Flat tables of the current unit and its transitive imports.
    pub fn find_flat(&self, key: &QualifiedIdentifier, kind: DeclarationType) -> Option<DeclRef> {
        let mut visited = FxHashSet::default();
        let mut queue = VecDeque::from([self.unit_id]);
        while let Some(current) = queue.pop_front() {
            if !visited.insert(current) {
                continue;
            }
            let Some(view) = self.view(current) else {
                continue;
            };
            for &decl in view.flat_lookup(key) {
                if view.declaration(decl).is_some_and(|d| kind.accepts(d)) {
                    return Some(DeclRef::new(current, decl));
                }
            }
            queue.extend(view.imported_parent_units());
        }
        None
    }

    // ========================================================================
    // SCOPES
    // ========================================================================

    fn find_in_scope_chain(
        &self,
        scope: ScopeId,
        key: &QualifiedIdentifier,
        kind: DeclarationType,
    ) -> Option<DeclRef> {
        let mut visited = FxHashSet::default();
        let mut current = Some(scope);
        while let Some(id) = current {
            if let Some(found) = self.find_in_scope(self.unit_id, id, key, kind, &mut visited) {
                return Some(found);
            }
            current = self.unit.scope(id)?.parent;
        }
        None
    }

    fn find_in_scope(
        &self,
        unit: UnitId,
        scope: ScopeId,
        key: &QualifiedIdentifier,
        kind: DeclarationType,
        visited: &mut FxHashSet<(UnitId, ScopeId)>,
    ) -> Option<DeclRef> {
        if !visited.insert((unit, scope)) {
            return None;
        }
        let view = self.view(unit)?;
        let s = view.scope(scope)?;
        let full = s.id.join(key);
        for &decl in s.declarations() {
            if view
                .declaration(decl)
                .is_some_and(|d| d.key == full && kind.accepts(d))
            {
                return Some(DeclRef::new(unit, decl));
            }
        }
        for import in s.imports() {
            let found = match import.target {
                ImportTarget::Local(target) => self.find_in_scope(unit, target, key, kind, visited),
                ImportTarget::Class(class) => match self.class_scope(class) {
                    Some(target) => self.find_in_scope(class.unit, target, key, kind, visited),
                    None => None,
                },
            };
            if found.is_some() {
                return found;
            }
        }
        None
    }

    /// Nearest enclosing namespace scope.
    pub fn enclosing_namespace(&self, scope: ScopeId) -> Option<ScopeId> {
        let mut current = Some(scope);
        while let Some(id) = current {
            let s = self.unit.scope(id)?;
            if s.kind == ScopeKind::Namespace {
                return Some(id);
            }
            current = s.parent;
        }
        None
    }

    fn namespace_qualified(&self, scope: ScopeId, key: &QualifiedIdentifier) -> Option<QualifiedIdentifier> {
        let namespace = self.unit.scope(self.enclosing_namespace(scope)?)?;
        Some(namespace.id.join(key))
    }

    /// Replace an aliased first segment of a multi-segment identifier with
    /// the name it stands for.
    fn expand_alias_prefix(&self, scope: ScopeId, id: &QualifiedIdentifier) -> QualifiedIdentifier {
        if id.len() < 2 {
            return id.clone();
        }
        let Some(first) = id.first().map(fold) else {
            return id.clone();
        };
        let mut current = Some(scope);
        while let Some(scope_id) = current {
            let Some(s) = self.unit.scope(scope_id) else {
                break;
            };
            let key = s.id.child(first.clone());
            for &decl in s.declarations() {
                let Some(d) = self.unit.declaration(decl) else {
                    continue;
                };
                if d.key != key {
                    continue;
                }
                let replacement = match &d.data {
                    DeclData::NamespaceAlias { imported } => Some(imported.clone()),
                    DeclData::Alias {
                        kind: AliasKind::Class,
                        target: Some(target),
                    } => self.with_decl(*target, |t| t.id.clone()),
                    _ => None,
                };
                if let Some(replacement) = replacement {
                    return replacement.join(&id.suffix(1));
                }
            }
            current = s.parent;
        }
        id.clone()
    }

    fn follow(&self, mut decl: DeclRef, kind: DeclarationType) -> Option<Followed> {
        for _ in 0..MAX_ALIAS_DEPTH {
            let data = self.with_decl(decl, |d| d.data.clone())?;
            match data {
                DeclData::Alias {
                    target: Some(target),
                    ..
                } => decl = target,
                DeclData::NamespaceAlias { imported } if kind != DeclarationType::Namespace => {
                    return Some(Followed::Imported(imported));
                }
                _ => return Some(Followed::Decl(decl)),
            }
        }
        None
    }

    // ========================================================================
    // VARIABLES
    // ========================================================================

    /// The variable `name` visible from `scope` without leaving the
    /// enclosing function.
    pub fn find_variable(&self, scope: ScopeId, name: &str) -> Option<DeclRef> {
        let mut visited = FxHashSet::default();
        let s = self.unit.scope(scope)?;
        if let Some(found) = self.find_variable_in(scope, name, &mut visited) {
            return Some(found);
        }
        if s.kind == ScopeKind::Namespace {
            return self.find_variable_in(ScopeId::ROOT, name, &mut visited);
        }
        None
    }

    fn find_variable_in(
        &self,
        scope: ScopeId,
        name: &str,
        visited: &mut FxHashSet<ScopeId>,
    ) -> Option<DeclRef> {
        if !visited.insert(scope) {
            return None;
        }
        let s = self.unit.scope(scope)?;
        for &decl in s.declarations().iter().rev() {
            let is_variable = self.unit.declaration(decl).is_some_and(|d| {
                d.name == name
                    && matches!(
                        d.data,
                        DeclData::Variable(_)
                            | DeclData::Alias {
                                kind: AliasKind::Variable,
                                ..
                            }
                    )
            });
            if is_variable {
                return Some(DeclRef::new(self.unit_id, decl));
            }
        }
        for import in s.imports() {
            if let ImportTarget::Local(target) = import.target {
                if let Some(found) = self.find_variable_in(target, name, visited) {
                    return Some(found);
                }
            }
        }
        None
    }

    /// Steps 1 to 4. `Err` carries the keys left for the persistent index.
    fn resolve_local(
        &self,
        scope: ScopeId,
        id: &QualifiedIdentifier,
        kind: DeclarationType,
    ) -> Result<Option<DeclRef>, Vec<QualifiedIdentifier>> {
        if matches!(kind, DeclarationType::Class | DeclarationType::Namespace) && id.len() == 1 {
            if let Some(first) = id.first() {
                match fold(first).as_str() {
                    "self" | "static" => return Ok(self.enclosing_class(scope)),
                    "parent" => return Ok(self.parent_class(scope)),
                    _ => {}
                }
            }
        }

        let id = self.expand_alias_prefix(scope, id);
        let key = kind.fold(&id);
        let qualified = self.namespace_qualified(scope, &key);
        let found = self
            .find_flat(&key, kind)
            .or_else(|| self.find_in_scope_chain(scope, &key, kind))
            .or_else(|| qualified.as_ref().and_then(|q| self.find_flat(q, kind)));

        match found {
            Some(decl) => match self.follow(decl, kind) {
                Some(Followed::Decl(decl)) => Ok(Some(decl)),
                Some(Followed::Imported(imported)) => {
                    let key = kind.fold(&imported);
                    match self.find_flat(&key, kind).and_then(|d| self.follow(d, kind)) {
                        Some(Followed::Decl(decl)) => Ok(Some(decl)),
                        _ => Err(vec![key]),
                    }
                }
                None => Ok(None),
            },
            None => Err(qualified.into_iter().chain([key]).collect()),
        }
    }
}

/// Import `target` into `unit` unless the edge would close a cycle.
///
/// Returns whether `target` is imported afterwards.
pub(crate) fn import_unit(
    env: &AnalysisEnvironment,
    unit_id: UnitId,
    unit: &mut SemanticUnit,
    target: UnitId,
) -> bool {
    if target == unit_id {
        return false;
    }
    if unit.imports_unit(target) {
        return true;
    }
    if UnitLookup::new(env, unit_id, unit).unit_reaches(target, unit_id) {
        debug!(?unit_id, ?target, "rejected cyclic unit import");
        return false;
    }
    unit.add_import(target);
    true
}

/// Full name resolution, including the persistent-index fallback.
pub struct NameResolver<'a> {
    env: &'a AnalysisEnvironment,
    unit_id: UnitId,
    unit: &'a mut SemanticUnit,
}

impl<'a> NameResolver<'a> {
    pub fn new(env: &'a AnalysisEnvironment, unit_id: UnitId, unit: &'a mut SemanticUnit) -> Self {
        Self { env, unit_id, unit }
    }

    pub fn lookup(&self) -> UnitLookup<'_> {
        UnitLookup::new(self.env, self.unit_id, self.unit)
    }

    /// Resolve `id` as seen from `scope`.
    pub fn resolve(
        &mut self,
        scope: ScopeId,
        id: &QualifiedIdentifier,
        kind: DeclarationType,
    ) -> Option<DeclRef> {
        if id.is_empty() {
            return None;
        }
        match self.lookup().resolve_local(scope, id, kind) {
            Ok(found) => found,
            Err(keys) => self.find_in_index(&keys, kind),
        }
    }

    fn find_in_index(&mut self, keys: &[QualifiedIdentifier], kind: DeclarationType) -> Option<DeclRef> {
        if kind == DeclarationType::GlobalVariable || self.env.is_builtins_file(self.unit.file()) {
            return None;
        }
        let language = self.env.config().language.clone();
        for key in keys {
            let entries = self
                .env
                .index()
                .query(key, &language, |k| kind.accepts_indexed(k));
            for entry in entries {
                let owner = entry.decl.unit;
                if owner == self.unit_id {
                    continue;
                }
                let Some(owner_unit) = self.env.store().get(owner) else {
                    debug!(?owner, "skipping index entry of a removed unit");
                    continue;
                };
                let matches = owner_unit
                    .declaration(entry.decl.decl)
                    .is_some_and(|d| d.key == *key && kind.accepts(d));
                if !matches {
                    debug!(%key, ?owner, "skipping stale index entry");
                    continue;
                }
                import_unit(self.env, self.unit_id, self.unit, owner);
                self.unit.merge_revisions(owner_unit.revisions());
                self.unit.set_uses_import_cache();
                return Some(entry.decl);
            }
        }
        None
    }
}
