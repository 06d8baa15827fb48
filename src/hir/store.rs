//! The unit store: every [`SemanticUnit`] of the session, by file.
//!
//! Units are published as immutable `Arc` snapshots. A build works on a
//! detached unit and replaces the snapshot in one write, so readers never
//! observe a half-built unit and a cancelled build leaves the old one in
//! place.

use std::sync::Arc;
use std::path::Path;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use crate::base::FileId;

use super::ids::UnitId;
use super::unit::SemanticUnit;

#[derive(Debug, Default)]
pub struct UnitStore {
    inner: RwLock<StoreInner>,
}

#[derive(Debug, Default)]
struct StoreInner {
    units: Vec<Option<Arc<SemanticUnit>>>,
    by_file: FxHashMap<FileId, UnitId>,
    build_sequence: u64,
}

impl UnitStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn unit_for_file(&self, file: FileId) -> Option<UnitId> {
        self.inner.read().by_file.get(&file).copied()
    }

    pub fn get(&self, unit: UnitId) -> Option<Arc<SemanticUnit>> {
        self.inner.read().units.get(unit.index() as usize)?.clone()
    }

    pub fn get_by_file(&self, file: FileId) -> Option<Arc<SemanticUnit>> {
        let inner = self.inner.read();
        let unit = *inner.by_file.get(&file)?;
        inner.units.get(unit.index() as usize)?.clone()
    }

    /// The unit id of `file`, registering an empty unit on first use.
    ///
    /// Returns the current snapshot as well, so a rebuild can reuse its
    /// declaration ids.
    pub fn reserve(&self, file: FileId, path: &Path) -> (UnitId, Arc<SemanticUnit>) {
        {
            let inner = self.inner.read();
            if let Some(&unit) = inner.by_file.get(&file) {
                if let Some(Some(current)) = inner.units.get(unit.index() as usize) {
                    return (unit, current.clone());
                }
            }
        }

        let mut inner = self.inner.write();
        if let Some(&unit) = inner.by_file.get(&file) {
            if let Some(Some(current)) = inner.units.get(unit.index() as usize) {
                return (unit, current.clone());
            }
        }

        let unit = UnitId::new(inner.units.len() as u32);
        let empty = Arc::new(SemanticUnit::new(file, path));
        inner.units.push(Some(empty.clone()));
        inner.by_file.insert(file, unit);
        tracing::debug!(?unit, ?file, "registered unit");
        (unit, empty)
    }

    /// Publish new content for `unit`, stamping it with the next build
    /// sequence number.
    pub fn commit(&self, unit: UnitId, mut content: SemanticUnit) -> Arc<SemanticUnit> {
        let mut inner = self.inner.write();
        inner.build_sequence += 1;
        content.set_build_sequence(inner.build_sequence);
        let content = Arc::new(content);
        let index = unit.index() as usize;
        if index >= inner.units.len() {
            inner.units.resize(index + 1, None);
        }
        inner.units[index] = Some(content.clone());
        inner.by_file.insert(content.file(), unit);
        content
    }

    /// Drop the unit of `file`. Its id is never handed out again.
    pub fn remove(&self, file: FileId) -> Option<UnitId> {
        let mut inner = self.inner.write();
        let unit = inner.by_file.remove(&file)?;
        if let Some(slot) = inner.units.get_mut(unit.index() as usize) {
            *slot = None;
        }
        Some(unit)
    }

    pub fn len(&self) -> usize {
        self.inner.read().by_file.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reserve_is_stable() {
        let store = UnitStore::new();
        let (a, _) = store.reserve(FileId::new(7), Path::new("a.php"));
        let (b, _) = store.reserve(FileId::new(7), Path::new("a.php"));
        let (c, _) = store.reserve(FileId::new(8), Path::new("b.php"));

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_commit_replaces_snapshot() {
        let store = UnitStore::new();
        let (id, old) = store.reserve(FileId::new(1), Path::new("a.php"));
        let committed = store.commit(id, SemanticUnit::new(FileId::new(1), "a.php"));

        assert!(!Arc::ptr_eq(&old, &committed));
        assert_eq!(committed.build_sequence(), 1);
        let current = store.get(id).expect("unit");
        assert!(Arc::ptr_eq(&current, &committed));
        assert_eq!(store.unit_for_file(FileId::new(1)), Some(id));
    }

    #[test]
    fn test_remove_frees_file_not_id() {
        let store = UnitStore::new();
        let (first, _) = store.reserve(FileId::new(1), Path::new("a.php"));
        assert_eq!(store.remove(FileId::new(1)), Some(first));
        assert!(store.get(first).is_none());

        let (second, _) = store.reserve(FileId::new(1), Path::new("a.php"));
        assert_ne!(first, second);
    }
}
