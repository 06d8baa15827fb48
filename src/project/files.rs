//! Projects on disk.

use std::fs;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;

use super::JobError;
use crate::hir::{ProjectFileSet, normalize};

/// File extensions treated as PHP sources.
const SOURCE_EXTENSIONS: &[&str] = &["php", "inc", "phtml"];

/// Project roots on the local file system.
#[derive(Debug, Default)]
pub struct FsProjectSet {
    roots: RwLock<Vec<PathBuf>>,
}

impl FsProjectSet {
    pub fn new(roots: impl IntoIterator<Item = PathBuf>) -> Self {
        let set = Self::default();
        for root in roots {
            set.add_root(root);
        }
        set
    }

    /// Register `root`; returns `false` if it was already known.
    pub fn add_root(&self, root: PathBuf) -> bool {
        let root = normalize(&root);
        let mut roots = self.roots.write();
        if roots.contains(&root) {
            return false;
        }
        roots.push(root);
        true
    }

    pub fn remove_root(&self, root: &Path) -> bool {
        let root = normalize(root);
        let mut roots = self.roots.write();
        let before = roots.len();
        roots.retain(|r| *r != root);
        roots.len() != before
    }
}

impl ProjectFileSet for FsProjectSet {
    fn ancestor_projects_of(&self, path: &Path) -> Vec<PathBuf> {
        let path = normalize(path);
        let mut ancestors: Vec<PathBuf> = self
            .roots
            .read()
            .iter()
            .filter(|root| path.starts_with(root))
            .cloned()
            .collect();
        ancestors.sort_by_key(|root| std::cmp::Reverse(root.components().count()));
        ancestors
    }

    fn project_roots(&self) -> Vec<PathBuf> {
        self.roots.read().clone()
    }

    fn path_exists(&self, path: &Path) -> bool {
        path.is_file()
    }
}

/// Every PHP source below `dir`, sorted.
pub fn collect_file_paths(dir: &Path) -> Result<Vec<PathBuf>, JobError> {
    let mut paths = Vec::new();
    collect_into(dir, &mut paths)?;
    paths.sort();
    Ok(paths)
}

fn collect_into(dir: &Path, paths: &mut Vec<PathBuf>) -> Result<(), JobError> {
    let entries = fs::read_dir(dir).map_err(|source| JobError::ReadFailed {
        path: dir.to_path_buf(),
        source,
    })?;
    for entry in entries {
        let entry = entry.map_err(|source| JobError::ReadFailed {
            path: dir.to_path_buf(),
            source,
        })?;
        let path = entry.path();
        if path.is_dir() {
            collect_into(&path, paths)?;
        } else if is_source(&path) {
            paths.push(path);
        }
    }
    Ok(())
}

fn is_source(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| SOURCE_EXTENSIONS.iter().any(|s| ext.eq_ignore_ascii_case(s)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ancestors_innermost_first() {
        let set = FsProjectSet::new([PathBuf::from("/work"), PathBuf::from("/work/app"), PathBuf::from("/other")]);
        assert_eq!(
            set.ancestor_projects_of(Path::new("/work/app/src/a.php")),
            vec![PathBuf::from("/work/app"), PathBuf::from("/work")]
        );
        assert!(set.ancestor_projects_of(Path::new("/elsewhere/a.php")).is_empty());
    }

    #[test]
    fn test_roots_are_normalized_and_unique() {
        let set = FsProjectSet::default();
        assert!(set.add_root(PathBuf::from("/work/./app/../lib")));
        assert!(!set.add_root(PathBuf::from("/work/lib")));
        assert_eq!(set.project_roots(), vec![PathBuf::from("/work/lib")]);
        assert!(set.remove_root(Path::new("/work/lib")));
        assert!(set.project_roots().is_empty());
    }

    #[test]
    fn test_collect_sources() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::create_dir(dir.path().join("sub")).expect("mkdir");
        fs::write(dir.path().join("a.php"), "<?php").expect("write");
        fs::write(dir.path().join("sub/b.inc"), "<?php").expect("write");
        fs::write(dir.path().join("readme.md"), "# no").expect("write");

        let paths = collect_file_paths(dir.path()).expect("collect");
        assert_eq!(paths, vec![dir.path().join("a.php"), dir.path().join("sub/b.inc")]);
    }

    #[test]
    fn test_collect_missing_directory() {
        let err = collect_file_paths(Path::new("/definitely/not/here")).unwrap_err();
        assert!(matches!(err, JobError::ReadFailed { .. }));
    }
}
