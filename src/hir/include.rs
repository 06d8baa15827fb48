//! Include/require path resolution.
//!
//! Only literal paths are considered. A path is tried relative to the
//! including file, then relative to every project root that contains the
//! including file, then relative to every other known project root.

use std::path::{Component, Path, PathBuf};

/// The projects known to the host, used to resolve include paths.
pub trait ProjectFileSet: Send + Sync {
    /// Roots of the projects that contain `path`, innermost first.
    fn ancestor_projects_of(&self, path: &Path) -> Vec<PathBuf>;

    /// Every known project root.
    fn project_roots(&self) -> Vec<PathBuf>;

    fn path_exists(&self, path: &Path) -> bool;
}

/// A file set without projects; includes resolve relative to the including
/// file only.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProjects;

impl ProjectFileSet for NoProjects {
    fn ancestor_projects_of(&self, _path: &Path) -> Vec<PathBuf> {
        Vec::new()
    }

    fn project_roots(&self) -> Vec<PathBuf> {
        Vec::new()
    }

    fn path_exists(&self, path: &Path) -> bool {
        path.exists()
    }
}

/// Whether `literal` can name a file at all.
fn is_candidate(literal: &str) -> bool {
    !(literal.is_empty() || literal == "." || literal == ".." || literal.ends_with('/'))
}

/// Lexically normalize `path`: drop `.` and fold `..` into its parent.
pub fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Resolve the literal include argument `literal` written in `current`.
pub fn resolve_include_path(
    projects: &dyn ProjectFileSet,
    current: &Path,
    literal: &str,
) -> Option<PathBuf> {
    if !is_candidate(literal) {
        return None;
    }
    let relative = Path::new(literal);
    if relative.is_absolute() {
        let path = normalize(relative);
        return projects.path_exists(&path).then_some(path);
    }

    if let Some(dir) = current.parent() {
        let path = normalize(&dir.join(relative));
        if projects.path_exists(&path) {
            return Some(path);
        }
    }

    let ancestors = projects.ancestor_projects_of(current);
    for root in &ancestors {
        let path = normalize(&root.join(relative));
        if projects.path_exists(&path) {
            return Some(path);
        }
    }

    for root in projects.project_roots() {
        if ancestors.contains(&root) {
            continue;
        }
        let path = normalize(&root.join(relative));
        if projects.path_exists(&path) {
            return Some(path);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use rustc_hash::FxHashSet;

    struct FakeProjects {
        roots: Vec<PathBuf>,
        files: FxHashSet<PathBuf>,
    }

    impl ProjectFileSet for FakeProjects {
        fn ancestor_projects_of(&self, path: &Path) -> Vec<PathBuf> {
            self.roots
                .iter()
                .filter(|root| path.starts_with(root))
                .cloned()
                .collect()
        }

        fn project_roots(&self) -> Vec<PathBuf> {
            self.roots.clone()
        }

        fn path_exists(&self, path: &Path) -> bool {
            self.files.contains(path)
        }
    }

    fn projects(files: &[&str]) -> FakeProjects {
        FakeProjects {
            roots: vec![PathBuf::from("/app"), PathBuf::from("/lib")],
            files: files.iter().map(PathBuf::from).collect(),
        }
    }

    #[test]
    fn test_normalize_folds_parent_components() {
        assert_eq!(normalize(Path::new("/a/b/../c/./d.php")), PathBuf::from("/a/c/d.php"));
    }

    #[test]
    fn test_relative_to_current_file_first() {
        let set = projects(&["/app/src/util.php", "/app/util.php"]);
        let found = resolve_include_path(&set, Path::new("/app/src/main.php"), "util.php");
        assert_eq!(found, Some(PathBuf::from("/app/src/util.php")));
    }

    #[test]
    fn test_falls_back_to_ancestor_then_other_roots() {
        let set = projects(&["/app/config.php", "/lib/vendor.php"]);
        let main = Path::new("/app/src/main.php");
        assert_eq!(
            resolve_include_path(&set, main, "config.php"),
            Some(PathBuf::from("/app/config.php"))
        );
        assert_eq!(
            resolve_include_path(&set, main, "vendor.php"),
            Some(PathBuf::from("/lib/vendor.php"))
        );
    }

    #[test]
    fn test_skips_non_file_literals() {
        let set = projects(&["/app/src"]);
        let main = Path::new("/app/src/main.php");
        for literal in ["", ".", "..", "dir/"] {
            assert_eq!(resolve_include_path(&set, main, literal), None);
        }
        assert_eq!(resolve_include_path(&set, main, "missing.php"), None);
    }
}
