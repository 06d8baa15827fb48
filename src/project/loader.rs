use std::fs;
use std::io;
use std::path::Path;

use rayon::prelude::*;
use tracing::{debug, warn};

use super::{JobError, collect_file_paths};
use crate::base::{FileId, FileSet};

/// Reads every PHP source below `dir` into `files`.
///
/// Files are read in parallel; unreadable files are skipped with a warning.
/// Returns the ids of the loaded files in path order.
pub fn load_directory(files: &FileSet, dir: &Path) -> Result<Vec<FileId>, JobError> {
    if !dir.is_dir() {
        return Err(JobError::ReadFailed {
            path: dir.to_path_buf(),
            source: io::Error::new(io::ErrorKind::NotFound, "not a directory"),
        });
    }

    let paths = collect_file_paths(dir)?;
    let results: Vec<_> = paths
        .par_iter()
        .map(|path| (path, fs::read_to_string(path)))
        .collect();

    let mut loaded = Vec::with_capacity(results.len());
    for (path, result) in results {
        match result {
            Ok(text) => {
                let file = files.file_id(path);
                files.set_contents(file, text);
                loaded.push(file);
            }
            Err(error) => warn!(path = %path.display(), %error, "skipping unreadable file"),
        }
    }
    debug!(dir = %dir.display(), files = loaded.len(), "loaded directory");
    Ok(loaded)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_directory_sets_contents() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(dir.path().join("a.php"), "<?php class A {}").expect("write");
        fs::write(dir.path().join("b.php"), "<?php class B {}").expect("write");

        let files = FileSet::new();
        let loaded = load_directory(&files, dir.path()).expect("load");
        assert_eq!(loaded.len(), 2);
        let text = files.contents(loaded[0]).map(|c| c.text.to_string());
        assert_eq!(text.as_deref(), Some("<?php class A {}"));
    }

    #[test]
    fn test_load_missing_directory() {
        let files = FileSet::new();
        assert!(load_directory(&files, Path::new("/definitely/not/here")).is_err());
    }
}
