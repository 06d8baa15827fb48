//! Building a [`SemanticUnit`] from a syntax tree.
//!
//! One tree walker drives an ordered list of [`BuildStage`]s that share a
//! single [`BuildState`]. The walker opens and closes scopes; each stage adds
//! one responsibility:
//!
//! - [`predecl`] - forward declarations of namespaces, classes and functions
//! - [`declarations`] - every declaration, redeclaration and override rules
//! - [`types`] - function, class, parameter and variable types
//! - [`context`] - builtins import, inheritance edges and includes
//! - [`uses`] - reference resolution, deprecated and unresolved reports
//!
//! Three walker configurations run in sequence: pre-declaration (shallow),
//! declarations (declaration, type and context stages) and uses.

use std::path::PathBuf;
use std::sync::Arc;

use rustc_hash::{FxHashMap, FxHashSet};
use smol_str::SmolStr;

use crate::base::{FileId, TextRange};
use crate::syntax::ast::{
    ClassDecl, ConstItem, ConstStmt, Expr, LexicalVar, NamePath, NamespaceDecl, Param,
    PropertyDecl, PropertyVar, Stmt,
};
use crate::syntax::{NodeId, SyntaxTree};

use super::decl::{DeclKind, Declaration};
use super::diagnostics::DiagnosticCollector;
use super::env::AnalysisEnvironment;
use super::ids::{DeclId, DeclRef, ScopeId, UnitId};
use super::name::QualifiedIdentifier;
use super::resolve::{DeclarationType, NameResolver, UnitLookup};
use super::scope::{ImportTarget, Scope, ScopeImport, ScopeKind};
use super::types::Type;
use super::unit::SemanticUnit;

pub(crate) mod context;
pub(crate) mod declarations;
pub(crate) mod predecl;
pub(crate) mod types;
pub(crate) mod uses;
pub(crate) mod walker;

pub(crate) use predecl::PreDeclarations;
pub(crate) use walker::FunctionLike;

use context::ContextStage;
use declarations::DeclarationStage;
use predecl::PreDeclarationStage;
use types::TypeStage;
use uses::UseStage;
use walker::{WalkMode, Walker};

// ============================================================================
// STAGES
// ============================================================================

/// One responsibility of the tree walk.
///
/// Enter events reach the stages in registration order, leave events in
/// reverse order, so a stage registered first sees a construct first and
/// last.
#[allow(unused_variables)]
pub(crate) trait BuildStage {
    fn begin(&mut self, state: &mut BuildState<'_>, tree: &SyntaxTree) {}
    fn finish(&mut self, state: &mut BuildState<'_>, tree: &SyntaxTree) {}

    /// Segment `index` of a namespace name, before its scope opens.
    fn enter_namespace(&mut self, state: &mut BuildState<'_>, tree: &SyntaxTree, ns: &NamespaceDecl, index: usize) {}
    /// Segment `index`, after its scope closed.
    fn leave_namespace(&mut self, state: &mut BuildState<'_>, tree: &SyntaxTree, ns: &NamespaceDecl, index: usize) {}

    /// Before the class scope opens.
    fn enter_class(&mut self, state: &mut BuildState<'_>, tree: &SyntaxTree, class: &ClassDecl) {}
    /// The class scope is open and current.
    fn class_scope_opened(&mut self, state: &mut BuildState<'_>, tree: &SyntaxTree, class: &ClassDecl) {}
    /// After every member, while the class scope is still current.
    fn leave_class(&mut self, state: &mut BuildState<'_>, tree: &SyntaxTree, class: &ClassDecl) {}

    /// Before the parameter scope opens.
    fn enter_function(&mut self, state: &mut BuildState<'_>, tree: &SyntaxTree, function: FunctionLike<'_>) {}
    /// After the body scope closed.
    fn leave_function(&mut self, state: &mut BuildState<'_>, tree: &SyntaxTree, function: FunctionLike<'_>) {}

    fn enter_parameter(&mut self, state: &mut BuildState<'_>, tree: &SyntaxTree, param: &Param, index: usize) {}
    fn leave_parameter(&mut self, state: &mut BuildState<'_>, tree: &SyntaxTree, param: &Param, index: usize) {}

    /// A `use (...)` variable of a closure; the captured scope is current.
    fn lexical_var(&mut self, state: &mut BuildState<'_>, tree: &SyntaxTree, var: &LexicalVar) {}

    fn enter_property(&mut self, state: &mut BuildState<'_>, tree: &SyntaxTree, decl: &PropertyDecl, var: &PropertyVar) {}
    fn leave_property(&mut self, state: &mut BuildState<'_>, tree: &SyntaxTree, decl: &PropertyDecl, var: &PropertyVar) {}

    fn enter_class_const(&mut self, state: &mut BuildState<'_>, tree: &SyntaxTree, stmt: &ConstStmt, item: &ConstItem) {}
    fn leave_class_const(&mut self, state: &mut BuildState<'_>, tree: &SyntaxTree, stmt: &ConstStmt, item: &ConstItem) {}

    fn enter_statement(&mut self, state: &mut BuildState<'_>, tree: &SyntaxTree, stmt: &Stmt) {}
    fn leave_statement(&mut self, state: &mut BuildState<'_>, tree: &SyntaxTree, stmt: &Stmt) {}

    fn enter_expression(&mut self, state: &mut BuildState<'_>, tree: &SyntaxTree, expr: &Expr) {}
    fn leave_expression(&mut self, state: &mut BuildState<'_>, tree: &SyntaxTree, expr: &Expr) {}

    /// The type of the construct being visited is final.
    fn update_current_type(&mut self, state: &mut BuildState<'_>, ty: &Type) {}
}

/// A written name path as a qualified identifier.
pub(crate) fn path_identifier(tree: &SyntaxTree, path: &NamePath) -> QualifiedIdentifier {
    QualifiedIdentifier::from_segments(tree.path_segments(path))
}

// ============================================================================
// BUILD STATE
// ============================================================================

/// Role of a scope opened for a syntax node.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub(crate) enum ScopeRole {
    Own,
    Parameters,
    Captured,
    Body,
    NamespaceSegment(usize),
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub(crate) struct ScopeKey {
    pub node: NodeId,
    pub role: ScopeRole,
}

impl ScopeKey {
    pub fn new(node: NodeId, role: ScopeRole) -> Self {
        Self { node, role }
    }
}

/// What makes a declaration of the previous build reusable.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
struct ReuseKey {
    kind: DeclKind,
    scope: ScopeKind,
    key: QualifiedIdentifier,
}

/// Mutable record shared by the stages of one build.
pub(crate) struct BuildState<'env> {
    pub env: &'env AnalysisEnvironment,
    pub file: FileId,
    pub path: PathBuf,
    pub unit_id: UnitId,
    pub unit: SemanticUnit,
    pub is_builtins: bool,
    pub report_errors: bool,
    pub diagnostics: DiagnosticCollector,
    pub predeclared: PreDeclarations,
    /// Property names each class declares, collected before its methods run.
    pub upcoming_class_vars: FxHashMap<DeclId, FxHashSet<SmolStr>>,
    /// Import declarations by the range of their include expression.
    pub include_decls: FxHashMap<TextRange, DeclId>,
    /// Type given by a `@var` annotation of the statement being visited.
    pub annotated_type: Option<Type>,
    pub had_unresolved: bool,
    scope_stack: Vec<ScopeId>,
    scope_by_node: FxHashMap<ScopeKey, ScopeId>,
    old_decls: FxHashMap<ReuseKey, Vec<DeclId>>,
    claimed: FxHashSet<DeclId>,
    encountered: FxHashSet<DeclId>,
    pending_owner: Option<DeclId>,
    pending_type: Option<Type>,
}

impl<'env> BuildState<'env> {
    pub fn new(
        env: &'env AnalysisEnvironment,
        file: FileId,
        unit_id: UnitId,
        previous: Option<&SemanticUnit>,
        tree: &SyntaxTree,
    ) -> Self {
        let path = env.files().path(file).unwrap_or_default();
        let mut unit = match previous {
            Some(previous) => SemanticUnit::for_rebuild(previous),
            None => SemanticUnit::new(file, path.clone()),
        };
        unit.set_root_range(tree.file.range);
        unit.set_line_index(tree.line_index().clone());

        let mut old_decls: FxHashMap<ReuseKey, Vec<DeclId>> = FxHashMap::default();
        if let Some(previous) = previous {
            for (id, decl) in previous.local_declarations() {
                let scope = previous
                    .scope(decl.scope)
                    .map_or(ScopeKind::Global, |s| s.kind);
                old_decls
                    .entry(ReuseKey {
                        kind: decl.kind(),
                        scope,
                        key: decl.key.clone(),
                    })
                    .or_default()
                    .push(id);
            }
        }

        Self {
            env,
            file,
            path,
            unit_id,
            unit,
            is_builtins: env.is_builtins_file(file),
            report_errors: env.config().report_errors,
            diagnostics: DiagnosticCollector::new(file),
            predeclared: PreDeclarations::default(),
            upcoming_class_vars: FxHashMap::default(),
            include_decls: FxHashMap::default(),
            annotated_type: None,
            had_unresolved: false,
            scope_stack: Vec::new(),
            scope_by_node: FxHashMap::default(),
            old_decls,
            claimed: FxHashSet::default(),
            encountered: FxHashSet::default(),
            pending_owner: None,
            pending_type: None,
        }
    }

    pub fn lookup(&self) -> UnitLookup<'_> {
        UnitLookup::new(self.env, self.unit_id, &self.unit)
    }

    pub fn resolve(&mut self, scope: ScopeId, id: &QualifiedIdentifier, kind: DeclarationType) -> Option<DeclRef> {
        NameResolver::new(self.env, self.unit_id, &mut self.unit).resolve(scope, id, kind)
    }

    pub fn local(&self, decl: DeclId) -> DeclRef {
        DeclRef::new(self.unit_id, decl)
    }

    // ========================================================================
    // SCOPES
    // ========================================================================

    pub fn current_scope(&self) -> ScopeId {
        self.scope_stack.last().copied().unwrap_or(ScopeId::ROOT)
    }

    pub fn scope_kind(&self, scope: ScopeId) -> ScopeKind {
        self.unit.scope(scope).map_or(ScopeKind::Global, |s| s.kind)
    }

    /// Nearest namespace or root scope: where classes, functions and
    /// constants are declared.
    pub fn declaration_scope(&self) -> ScopeId {
        let mut current = Some(self.current_scope());
        while let Some(id) = current {
            match self.unit.scope(id) {
                Some(s) if matches!(s.kind, ScopeKind::Namespace | ScopeKind::Global) => return id,
                Some(s) => current = s.parent,
                None => break,
            }
        }
        ScopeId::ROOT
    }

    /// Whether the current scope belongs to a function, method or closure.
    pub fn in_function(&self) -> bool {
        self.scope_kind(self.current_scope()).is_function_local()
    }

    /// Written identifier and lookup key of `name` declared in the
    /// declaration scope.
    pub fn qualify(&self, name: &SmolStr, case_sensitive: bool) -> (QualifiedIdentifier, QualifiedIdentifier) {
        let scope = self.declaration_scope();
        let prefix = self
            .unit
            .scope(scope)
            .and_then(|s| s.owner)
            .and_then(|owner| self.unit.declaration(owner))
            .map(|d| d.id.clone())
            .unwrap_or_default();
        let id = prefix.child(name.clone());
        let key = id.folded(case_sensitive);
        (id, key)
    }

    /// Open (or, on a later walk, re-enter) the scope of `key`.
    ///
    /// A declaration marked with [`set_pending_owner`](Self::set_pending_owner)
    /// becomes the owner of the scope.
    pub fn open_scope(&mut self, key: ScopeKey, kind: ScopeKind, range: TextRange, id: QualifiedIdentifier) -> ScopeId {
        let scope = match self.scope_by_node.get(&key) {
            Some(&scope) => scope,
            None => {
                let parent = self.current_scope();
                let scope = self.unit.add_scope(Scope::new(kind, range, Some(parent), id));
                self.scope_by_node.insert(key, scope);
                scope
            }
        };
        if let Some(owner) = self.pending_owner.take() {
            if let Some(s) = self.unit.scope_mut(scope) {
                s.owner = Some(owner);
            }
            if let Some(decl) = self.unit.declaration_mut(owner) {
                decl.internal_scope = Some(scope);
            }
        }
        self.scope_stack.push(scope);
        scope
    }

    pub fn existing_scope(&self, key: ScopeKey) -> Option<ScopeId> {
        self.scope_by_node.get(&key).copied()
    }

    pub fn close_scope(&mut self) {
        self.scope_stack.pop();
    }

    /// Let `scope` see the declarations of `target`. Duplicate edges are
    /// ignored.
    pub fn add_scope_import(&mut self, scope: ScopeId, target: ImportTarget, propagate: bool) -> bool {
        if target == ImportTarget::Local(scope) {
            return false;
        }
        let Some(s) = self.unit.scope_mut(scope) else {
            return false;
        };
        if s.imports.iter().any(|import| import.target == target) {
            return false;
        }
        s.imports.push(ScopeImport { target, propagate });
        true
    }

    pub fn set_pending_owner(&mut self, decl: DeclId) {
        self.pending_owner = Some(decl);
    }

    // ========================================================================
    // DECLARATIONS
    // ========================================================================

    /// Add `decl`, taking over the id of an unclaimed declaration of the
    /// previous build with the same kind, scope kind and key.
    pub fn open_declaration(&mut self, decl: Declaration) -> DeclId {
        let reuse = ReuseKey {
            kind: decl.kind(),
            scope: self.scope_kind(decl.scope),
            key: decl.key.clone(),
        };
        let claimed = &self.claimed;
        let reused = self
            .old_decls
            .get(&reuse)
            .and_then(|ids| ids.iter().copied().find(|id| !claimed.contains(id)));
        let id = reused.unwrap_or_else(|| DeclId::new(self.unit.declaration_slots() as u32));
        self.claimed.insert(id);
        self.unit.insert_declaration(id, decl);
        id
    }

    pub fn declaration(&self, decl: DeclId) -> Option<&Declaration> {
        self.unit.declaration(decl)
    }

    pub fn declaration_mut(&mut self, decl: DeclId) -> Option<&mut Declaration> {
        self.unit.declaration_mut(decl)
    }

    /// Mark `decl` as reached by the declaration walk.
    pub fn encounter(&mut self, decl: DeclId) {
        self.encountered.insert(decl);
    }

    pub fn is_encountered(&self, decl: DeclRef) -> bool {
        decl.unit != self.unit_id || self.encountered.contains(&decl.decl)
    }

    // ========================================================================
    // TYPES
    // ========================================================================

    /// Publish the type of the construct being visited; the walker forwards
    /// it to every stage's [`BuildStage::update_current_type`].
    pub fn update_type(&mut self, ty: Type) {
        self.pending_type = Some(ty);
    }

    pub fn take_type_update(&mut self) -> Option<Type> {
        self.pending_type.take()
    }

    // ========================================================================
    // REPORTING
    // ========================================================================

    /// Record a reference. Unresolved references set the unresolved flag and
    /// are reported when reporting is on; deprecated targets always warn.
    /// The builtins unit never reports.
    pub fn new_checked_use(&mut self, range: TextRange, name: &str, decl: Option<DeclRef>) {
        let scope = self.current_scope();
        self.unit.add_use(super::unit::Use { range, decl, scope });
        if decl.is_none() {
            self.had_unresolved = true;
        }
        if self.is_builtins {
            return;
        }
        match decl {
            Some(decl) => {
                if self.lookup().with_decl(decl, Declaration::is_deprecated) == Some(true) {
                    self.diagnostics.deprecated(range, name);
                }
            }
            None => {
                if self.report_errors {
                    self.diagnostics.undefined_reference(range, name);
                }
            }
        }
    }

    /// Record a reference that is never reported.
    pub fn new_use(&mut self, range: TextRange, decl: DeclRef) {
        let scope = self.current_scope();
        self.unit.add_use(super::unit::Use {
            range,
            decl: Some(decl),
            scope,
        });
    }

    /// File path and one-based line of `decl`, for messages.
    pub fn location_of(&self, decl: DeclRef) -> (String, u32) {
        let Some(view) = self.lookup().view(decl.unit) else {
            return (String::new(), 0);
        };
        let Some(d) = view.declaration(decl.decl) else {
            return (view.path().display().to_string(), 0);
        };
        let line = view.line_index().line_col(d.range.start()).line_one_indexed();
        (view.path().display().to_string(), line)
    }

    fn into_unit(mut self) -> SemanticUnit {
        self.unit.add_problems(self.diagnostics.take());
        self.unit
    }
}

// ============================================================================
// BUILDER
// ============================================================================

/// Builds one file's unit: declarations first, uses on request.
///
/// The unit is built detached from the store and published by the caller,
/// so dropping a builder leaves the previous unit untouched.
pub struct SemanticBuilder<'env> {
    env: &'env AnalysisEnvironment,
    file: FileId,
    state: Option<BuildState<'env>>,
}

impl<'env> SemanticBuilder<'env> {
    pub fn new(env: &'env AnalysisEnvironment, file: FileId) -> Self {
        Self {
            env,
            file,
            state: None,
        }
    }

    /// Run the pre-declaration and declaration walks.
    ///
    /// Without `existing`, the unit registered for the file is rebuilt, or
    /// a new one is registered.
    pub fn build(&mut self, tree: &SyntaxTree, existing: Option<UnitId>) -> UnitId {
        let (unit_id, previous) = match existing {
            Some(unit_id) => (unit_id, self.env.store().get(unit_id)),
            None => {
                let path = self.env.files().path(self.file).unwrap_or_default();
                let (unit_id, previous) = self.env.store().reserve(self.file, &path);
                (unit_id, Some(previous))
            }
        };
        let previous: Option<Arc<SemanticUnit>> = previous.filter(|p| p.file() == self.file);

        let mut state = BuildState::new(self.env, self.file, unit_id, previous.as_deref(), tree);
        Walker::new(WalkMode::PreDeclaration, vec![Box::new(PreDeclarationStage)]).walk(&mut state, tree);
        Walker::new(
            WalkMode::Declarations,
            vec![
                Box::new(DeclarationStage::default()),
                Box::new(TypeStage::default()),
                Box::new(ContextStage),
            ],
        )
        .walk(&mut state, tree);
        self.state = Some(state);
        unit_id
    }

    /// Resolve every reference of `tree`. Requires [`build`](Self::build).
    pub fn build_uses(&mut self, tree: &SyntaxTree) {
        if let Some(state) = self.state.as_mut() {
            Walker::new(WalkMode::Uses, vec![Box::new(UseStage)]).walk(state, tree);
        }
    }

    pub fn had_unresolved_identifiers(&self) -> bool {
        self.state.as_ref().is_some_and(|s| s.had_unresolved)
    }

    pub fn unit_id(&self) -> Option<UnitId> {
        self.state.as_ref().map(|s| s.unit_id)
    }

    pub fn unit(&self) -> Option<&SemanticUnit> {
        self.state.as_ref().map(|s| &s.unit)
    }

    /// The built unit, ready to publish.
    pub fn finish(self) -> Option<(UnitId, SemanticUnit)> {
        self.state.map(|state| (state.unit_id, state.into_unit()))
    }
}
