//! Analysis of projects on disk through the background host.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use phpmodel::hir::{AnalysisEnvironment, BuildConfig, Features, SemanticUnit, Severity};
use phpmodel::project::{AnalysisHost, FsProjectSet, ParseJob, Scheduler};
use phpmodel::{FileId, FileSet};
use rstest::rstest;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use walkdir::WalkDir;

struct Idle;

impl Scheduler for Idle {
    fn request_analysis(&self, _file: FileId, _features: Features, _priority: i32) {}

    fn queued_count(&self) -> usize {
        0
    }
}

fn write(root: &Path, relative: &str, text: &str) {
    let path = root.join(relative);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("mkdir");
    }
    fs::write(path, text).expect("write");
}

fn environment(root: &Path, worker_threads: usize) -> Arc<AnalysisEnvironment> {
    let config = BuildConfig {
        worker_threads,
        ..BuildConfig::default()
    };
    let projects = Arc::new(FsProjectSet::new([root.to_path_buf()]));
    Arc::new(AnalysisEnvironment::new(config, Arc::new(FileSet::new()), projects))
}

fn errors(unit: &SemanticUnit) -> Vec<String> {
    unit.problems()
        .iter()
        .filter(|p| p.severity == Severity::Error)
        .map(|p| p.message.to_string())
        .collect()
}

fn project(include: &str) -> TempDir {
    let dir = tempfile::tempdir().expect("tempdir");
    write(dir.path(), "lib/Base.php", "<?php class Base { public function run() {} }");
    write(
        dir.path(),
        "app/Child.php",
        &format!("<?php include '{include}'; class Child extends Base {{}}"),
    );
    write(dir.path(), "app/main.php", "<?php $c = new Child(); $c->run();");
    write(dir.path(), "README.md", "not php");
    dir
}

#[rstest]
#[case::relative_to_file("../lib/Base.php")]
#[case::relative_to_project("lib/Base.php")]
fn test_project_converges_after_retries(#[case] include: &str) {
    let dir = project(include);
    let env = environment(dir.path(), 1);
    let host = AnalysisHost::new(env.clone()).expect("pool");
    let loaded = host
        .load_directory(dir.path(), Features::ALL_DECLARATIONS_CONTEXTS_AND_USES, 0)
        .expect("load");
    assert_eq!(loaded.len(), 3);
    host.wait_until_idle();

    let sources = WalkDir::new(dir.path())
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.path().extension().is_some_and(|ext| ext == "php"));
    for entry in sources {
        let file = env.files().lookup(entry.path()).expect("registered");
        let unit = env.store().get_by_file(file).expect("analyzed");
        assert!(errors(&unit).is_empty(), "{}: {:?}", entry.path().display(), errors(&unit));
    }

    let base = env.files().lookup(&dir.path().join("lib/Base.php")).expect("base");
    let child = env.files().lookup(&dir.path().join("app/Child.php")).expect("child");
    let base_unit = env.store().unit_for_file(base).expect("base unit");
    let child_unit = env.store().get_by_file(child).expect("child unit");
    assert!(child_unit.imports_unit(base_unit));
    assert!(child_unit.revisions().contains_key(&base));
}

#[test]
fn test_include_of_unanalyzed_file_is_skipped() {
    let dir = project("../lib/Base.php");
    let env = environment(dir.path(), 1);
    let child = env.files().file_id(&dir.path().join("app/Child.php"));
    let outcome = ParseJob::new(child, Features::ALL_DECLARATIONS_AND_CONTEXTS, 0)
        .run(&env, &Idle, &CancellationToken::new())
        .expect("analysis runs");
    let unit = env.store().get(outcome.unit()).expect("published");
    assert_eq!(unit.imported_parent_units().count(), 1, "only the builtins");
    assert!(env.files().lookup(&dir.path().join("lib/Base.php")).is_none());
}

#[test]
fn test_removed_file_leaves_the_index() {
    let dir = project("../lib/Base.php");
    let env = environment(dir.path(), 1);
    let base = env.files().file_id(&dir.path().join("lib/Base.php"));
    ParseJob::new(base, Features::ALL_DECLARATIONS_AND_CONTEXTS, 0)
        .run(&env, &Idle, &CancellationToken::new())
        .expect("analysis runs");
    let indexed = env.index().len();
    assert!(indexed > 0);

    assert!(env.remove_file(base));
    assert!(env.store().get_by_file(base).is_none());
    assert!(env.index().len() < indexed);

    let main = env.files().file_id(&dir.path().join("app/main.php"));
    env.files().set_contents(main, "<?php new Base();");
    let outcome = ParseJob::new(main, Features::ALL_DECLARATIONS_CONTEXTS_AND_USES, 0)
        .run(&env, &Idle, &CancellationToken::new())
        .expect("analysis runs");
    let unit = env.store().get(outcome.unit()).expect("published");
    assert_eq!(errors(&unit).len(), 1);
}

#[test]
fn test_shutdown_stops_the_host() {
    let dir = project("../lib/Base.php");
    let env = environment(dir.path(), 2);
    let host = AnalysisHost::new(env.clone()).expect("pool");
    host.shutdown();
    let loaded = host
        .load_directory(dir.path(), Features::ALL_DECLARATIONS_CONTEXTS_AND_USES, 0)
        .expect("load");
    host.wait_until_idle();
    assert!(loaded.iter().all(|&file| env.store().get_by_file(file).is_none()));
    // contents were still loaded
    assert!(loaded.iter().all(|&file| env.files().contents(file).is_some()));
}
