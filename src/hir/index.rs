//! Persistent index: qualified identifier → declaration, across all units.
//!
//! Used as the last resort of name resolution. It has its own lock so
//! concurrent pipelines can populate and query it independently of the unit
//! store.

use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use smol_str::SmolStr;

use super::decl::DeclKind;
use super::ids::{DeclRef, UnitId};
use super::name::QualifiedIdentifier;
use super::unit::SemanticUnit;

/// One indexed declaration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IndexEntry {
    pub decl: DeclRef,
    pub kind: DeclKind,
    pub language: SmolStr,
    /// Build sequence of the owning unit when the entry was recorded.
    pub build_sequence: u64,
}

#[derive(Debug, Default)]
pub struct PersistentIndex {
    inner: RwLock<IndexInner>,
    queries: AtomicUsize,
}

#[derive(Debug, Default)]
struct IndexInner {
    entries: FxHashMap<QualifiedIdentifier, Vec<IndexEntry>>,
    keys_by_unit: FxHashMap<UnitId, Vec<QualifiedIdentifier>>,
}

/// Kinds visible outside their unit.
fn is_indexed(kind: DeclKind) -> bool {
    matches!(
        kind,
        DeclKind::Class | DeclKind::Function | DeclKind::Constant | DeclKind::Namespace
    )
}

impl PersistentIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace every entry of `unit_id` with the global declarations of
    /// `unit`.
    pub fn update_unit(&self, unit_id: UnitId, unit: &SemanticUnit, language: &str) {
        let language = SmolStr::new(language);
        let mut inner = self.inner.write();
        inner.remove_unit(unit_id);

        let mut keys = Vec::new();
        for (decl, declaration) in unit.local_declarations() {
            let kind = declaration.kind();
            let searchable = unit
                .scope(declaration.scope)
                .is_some_and(|scope| scope.is_searchable());
            if !is_indexed(kind) || !searchable {
                continue;
            }
            inner
                .entries
                .entry(declaration.key.clone())
                .or_default()
                .push(IndexEntry {
                    decl: DeclRef::new(unit_id, decl),
                    kind,
                    language: language.clone(),
                    build_sequence: unit.build_sequence(),
                });
            keys.push(declaration.key.clone());
        }
        inner.keys_by_unit.insert(unit_id, keys);
    }

    pub fn remove_unit(&self, unit_id: UnitId) {
        self.inner.write().remove_unit(unit_id);
    }

    /// Entries for `key` in `language` accepted by `filter`, best first.
    ///
    /// Ties between several matches go to the most recently built unit,
    /// then to the lower unit id.
    pub fn query(
        &self,
        key: &QualifiedIdentifier,
        language: &str,
        filter: impl Fn(DeclKind) -> bool,
    ) -> Vec<IndexEntry> {
        self.queries.fetch_add(1, Ordering::Relaxed);
        let inner = self.inner.read();
        let mut found: Vec<IndexEntry> = inner
            .entries
            .get(key)
            .into_iter()
            .flatten()
            .filter(|entry| entry.language == language && filter(entry.kind))
            .cloned()
            .collect();
        found.sort_by(|a, b| {
            b.build_sequence
                .cmp(&a.build_sequence)
                .then(a.decl.unit.cmp(&b.decl.unit))
                .then(a.decl.decl.cmp(&b.decl.decl))
        });
        found
    }

    /// Number of [`query`](Self::query) calls so far.
    pub fn query_count(&self) -> usize {
        self.queries.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.inner.read().entries.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl IndexInner {
    fn remove_unit(&mut self, unit_id: UnitId) {
        let Some(keys) = self.keys_by_unit.remove(&unit_id) else {
            return;
        };
        for key in keys {
            if let Some(entries) = self.entries.get_mut(&key) {
                entries.retain(|entry| entry.decl.unit != unit_id);
                if entries.is_empty() {
                    self.entries.remove(&key);
                }
            }
        }
    }
}
