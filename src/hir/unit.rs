//! Per-file symbol database.

use std::path::{Path, PathBuf};

use bitflags::bitflags;
use indexmap::{IndexMap, IndexSet};
use rustc_hash::FxHashMap;

use crate::base::{FileId, LineIndex, TextRange, TextSize};

use super::decl::Declaration;
use super::diagnostics::Diagnostic;
use super::ids::{DeclId, DeclRef, ScopeId, UnitId};
use super::name::QualifiedIdentifier;
use super::scope::{Scope, ScopeKind};

bitflags! {
    /// What a build of a unit produced, and what a request asks for.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Features: u8 {
        const VISIBLE_DECLARATIONS_AND_CONTEXTS = 1 << 0;
        const ALL_DECLARATIONS_AND_CONTEXTS = (1 << 0) | (1 << 1);
        const USES = 1 << 2;
        const ALL_DECLARATIONS_CONTEXTS_AND_USES = (1 << 0) | (1 << 1) | (1 << 2);
        /// The request is a retry after unresolved identifiers.
        const RESCHEDULED = 1 << 3;
    }
}

impl Features {
    /// The features that describe unit content, without request flags.
    pub fn content(self) -> Features {
        self - Features::RESCHEDULED
    }
}

/// A reference occurrence and the declaration it resolved to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Use {
    pub range: TextRange,
    /// `None` when the reference could not be resolved.
    pub decl: Option<DeclRef>,
    pub scope: ScopeId,
}

/// The semantic model of one file.
#[derive(Clone, Debug)]
pub struct SemanticUnit {
    file: FileId,
    path: PathBuf,
    scopes: Vec<Scope>,
    declarations: Vec<Option<Declaration>>,
    /// Declarations of searchable scopes by lookup key.
    flat: FxHashMap<QualifiedIdentifier, Vec<DeclId>>,
    uses: Vec<Use>,
    problems: Vec<Diagnostic>,
    imports: IndexSet<UnitId>,
    modification_revision: u64,
    /// Modification revisions of this file and of every included file.
    revisions: IndexMap<FileId, u64>,
    features: Features,
    line_index: LineIndex,
    build_sequence: u64,
    uses_import_cache: bool,
}

impl SemanticUnit {
    pub fn new(file: FileId, path: impl Into<PathBuf>) -> Self {
        Self {
            file,
            path: path.into(),
            scopes: vec![Scope::new(
                ScopeKind::Global,
                TextRange::default(),
                None,
                QualifiedIdentifier::new(),
            )],
            declarations: Vec::new(),
            flat: FxHashMap::default(),
            uses: Vec::new(),
            problems: Vec::new(),
            imports: IndexSet::new(),
            modification_revision: 0,
            revisions: IndexMap::new(),
            features: Features::empty(),
            line_index: LineIndex::default(),
            build_sequence: 0,
            uses_import_cache: false,
        }
    }

    /// A fresh unit for rebuilding `previous`: same file, empty content,
    /// with the declaration arena sized so old declaration ids stay free for
    /// re-encountered declarations.
    pub(crate) fn for_rebuild(previous: &SemanticUnit) -> Self {
        let mut unit = Self::new(previous.file, previous.path.clone());
        unit.declarations = vec![None; previous.declarations.len()];
        unit
    }

    pub fn file(&self) -> FileId {
        self.file
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    // ========================================================================
    // SCOPES
    // ========================================================================

    pub fn root_scope(&self) -> ScopeId {
        ScopeId::ROOT
    }

    pub fn scope(&self, id: ScopeId) -> Option<&Scope> {
        self.scopes.get(id.index() as usize)
    }

    pub(crate) fn scope_mut(&mut self, id: ScopeId) -> Option<&mut Scope> {
        self.scopes.get_mut(id.index() as usize)
    }

    pub fn scope_count(&self) -> usize {
        self.scopes.len()
    }

    pub fn scopes(&self) -> impl Iterator<Item = (ScopeId, &Scope)> {
        self.scopes
            .iter()
            .enumerate()
            .map(|(i, scope)| (ScopeId::new(i as u32), scope))
    }

    pub(crate) fn add_scope(&mut self, scope: Scope) -> ScopeId {
        let id = ScopeId::new(self.scopes.len() as u32);
        if let Some(parent) = scope.parent.and_then(|p| self.scope_mut(p)) {
            parent.children.push(id);
        }
        self.scopes.push(scope);
        id
    }

    pub(crate) fn set_root_range(&mut self, range: TextRange) {
        if let Some(root) = self.scopes.first_mut() {
            root.range = range;
        }
    }

    /// Innermost scope whose range contains `offset`.
    pub fn scope_at(&self, offset: TextSize) -> ScopeId {
        let mut current = ScopeId::ROOT;
        'descend: loop {
            let Some(scope) = self.scope(current) else {
                return current;
            };
            for &child in scope.children() {
                if self
                    .scope(child)
                    .is_some_and(|c| c.range.contains_inclusive(offset))
                {
                    current = child;
                    continue 'descend;
                }
            }
            return current;
        }
    }

    // ========================================================================
    // DECLARATIONS
    // ========================================================================

    pub fn declaration(&self, id: DeclId) -> Option<&Declaration> {
        self.declarations.get(id.index() as usize)?.as_ref()
    }

    pub(crate) fn declaration_mut(&mut self, id: DeclId) -> Option<&mut Declaration> {
        self.declarations.get_mut(id.index() as usize)?.as_mut()
    }

    /// Number of declaration slots, including vacated ones.
    pub(crate) fn declaration_slots(&self) -> usize {
        self.declarations.len()
    }

    /// All live declarations of this unit.
    pub fn local_declarations(&self) -> impl Iterator<Item = (DeclId, &Declaration)> {
        self.declarations
            .iter()
            .enumerate()
            .filter_map(|(i, decl)| decl.as_ref().map(|d| (DeclId::new(i as u32), d)))
    }

    pub fn declaration_count(&self) -> usize {
        self.declarations.iter().filter(|d| d.is_some()).count()
    }

    /// Place `decl` in slot `id`, registering it with its scope.
    pub(crate) fn insert_declaration(&mut self, id: DeclId, decl: Declaration) {
        let index = id.index() as usize;
        if index >= self.declarations.len() {
            self.declarations.resize(index + 1, None);
        }
        if let Some(previous) = self.declarations[index].take() {
            self.unregister(id, &previous);
        }

        let searchable = match self.scope_mut(decl.scope) {
            Some(scope) => {
                scope.declarations.push(id);
                scope.is_searchable()
            }
            None => false,
        };
        if searchable {
            self.flat.entry(decl.key.clone()).or_default().push(id);
        }
        self.declarations[index] = Some(decl);
    }

    fn unregister(&mut self, id: DeclId, decl: &Declaration) {
        if let Some(scope) = self.scope_mut(decl.scope) {
            scope.declarations.retain(|&d| d != id);
        }
        if let Some(ids) = self.flat.get_mut(&decl.key) {
            ids.retain(|&d| d != id);
        }
    }

    /// Declarations of searchable scopes with exactly this lookup key.
    pub(crate) fn flat_lookup(&self, key: &QualifiedIdentifier) -> &[DeclId] {
        self.flat.get(key).map(Vec::as_slice).unwrap_or_default()
    }

    /// Declarations visible by qualified identifier, trying the identifier
    /// as given and with class-style and constant-style case folding.
    pub fn find_declarations(&self, id: &QualifiedIdentifier) -> Vec<DeclId> {
        let mut found: Vec<DeclId> = Vec::new();
        for key in [id.clone(), id.folded(true), id.folded(false)] {
            for &decl in self.flat_lookup(&key) {
                if !found.contains(&decl) {
                    found.push(decl);
                }
            }
        }
        found
    }

    // ========================================================================
    // USES AND PROBLEMS
    // ========================================================================

    pub fn uses(&self) -> &[Use] {
        &self.uses
    }

    pub(crate) fn add_use(&mut self, use_: Use) {
        self.uses.push(use_);
    }

    pub fn problems(&self) -> &[Diagnostic] {
        &self.problems
    }

    pub(crate) fn add_problems(&mut self, problems: impl IntoIterator<Item = Diagnostic>) {
        self.problems.extend(problems);
    }

    // ========================================================================
    // IMPORTS AND REVISIONS
    // ========================================================================

    /// Units whose declarations are visible from this one, in import order.
    pub fn imported_parent_units(&self) -> impl Iterator<Item = UnitId> + '_ {
        self.imports.iter().copied()
    }

    pub fn imports_unit(&self, unit: UnitId) -> bool {
        self.imports.contains(&unit)
    }

    pub(crate) fn add_import(&mut self, unit: UnitId) -> bool {
        self.imports.insert(unit)
    }

    pub(crate) fn set_imports(&mut self, imports: impl IntoIterator<Item = UnitId>) {
        self.imports = imports.into_iter().collect();
    }

    pub fn modification_revision(&self) -> u64 {
        self.modification_revision
    }

    pub(crate) fn set_modification_revision(&mut self, revision: u64) {
        self.modification_revision = revision;
        self.revisions.insert(self.file, revision);
    }

    /// Revisions of this file and every file it (transitively) includes.
    pub fn revisions(&self) -> &IndexMap<FileId, u64> {
        &self.revisions
    }

    pub(crate) fn merge_revisions(&mut self, other: &IndexMap<FileId, u64>) {
        for (&file, &revision) in other {
            let entry = self.revisions.entry(file).or_insert(revision);
            *entry = (*entry).max(revision);
        }
    }

    pub fn features(&self) -> Features {
        self.features
    }

    pub(crate) fn set_features(&mut self, features: Features) {
        self.features = features.content();
    }

    pub fn line_index(&self) -> &LineIndex {
        &self.line_index
    }

    pub(crate) fn set_line_index(&mut self, line_index: LineIndex) {
        self.line_index = line_index;
    }

    /// Store-wide sequence number of the build that produced this content.
    pub fn build_sequence(&self) -> u64 {
        self.build_sequence
    }

    pub(crate) fn set_build_sequence(&mut self, sequence: u64) {
        self.build_sequence = sequence;
    }

    /// Set once lookups of this unit imported units found in the persistent
    /// index.
    pub fn uses_import_cache(&self) -> bool {
        self.uses_import_cache
    }

    pub(crate) fn set_uses_import_cache(&mut self) {
        self.uses_import_cache = true;
    }
}
