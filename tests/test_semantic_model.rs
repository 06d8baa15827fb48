//! End-to-end checks of the semantic model through the analysis pipeline.

use std::path::Path;
use std::sync::Arc;

use once_cell::sync::Lazy;
use phpmodel::hir::{
    AnalysisEnvironment, BuildConfig, DeclKind, DeclRef, DeclarationType, Features, NoProjects,
    QualifiedIdentifier, SemanticBuilder, SemanticUnit, Severity, UnitId,
};
use phpmodel::project::{JobOutcome, ParseJob, Scheduler};
use phpmodel::{FileId, FileSet, TextSize};
use rstest::rstest;
use tokio_util::sync::CancellationToken;

/// A scheduler with nothing queued.
struct Idle;

impl Scheduler for Idle {
    fn request_analysis(&self, _file: FileId, _features: Features, _priority: i32) {}

    fn queued_count(&self) -> usize {
        0
    }
}

static INHERITANCE: Lazy<String> = Lazy::new(|| {
    [
        "<?php",
        "class Base { const LIMIT = 3; }",
        "class A extends Base {",
        "    function run() { return MARK; }",
        "}",
        "const MARK = 1;",
    ]
    .join("\n")
});

fn environment() -> AnalysisEnvironment {
    AnalysisEnvironment::new(BuildConfig::default(), Arc::new(FileSet::new()), Arc::new(NoProjects))
}

fn analyze(env: &AnalysisEnvironment, path: &str, text: &str) -> (UnitId, Arc<SemanticUnit>) {
    let file = env.files().file_id(Path::new(path));
    env.files().set_contents(file, text);
    let outcome = ParseJob::new(file, Features::ALL_DECLARATIONS_CONTEXTS_AND_USES, 0)
        .run(env, &Idle, &CancellationToken::new())
        .expect("analysis runs");
    let unit = env.store().get(outcome.unit()).expect("published");
    (outcome.unit(), unit)
}

fn class(env: &AnalysisEnvironment, unit_id: UnitId, unit: &SemanticUnit, name: &str) -> DeclRef {
    unit.find_declarations(&QualifiedIdentifier::parse(name))
        .into_iter()
        .find(|&d| unit.declaration(d).is_some_and(|d| d.kind() == DeclKind::Class))
        .map(|d| DeclRef::new(unit_id, d))
        .filter(|d| env.declaration(*d).is_some())
        .unwrap_or_else(|| panic!("class {name} not declared"))
}

fn errors(unit: &SemanticUnit) -> Vec<String> {
    unit.problems()
        .iter()
        .filter(|p| p.severity == Severity::Error)
        .map(|p| p.message.to_string())
        .collect()
}

#[test]
fn test_forward_base_class_resolves() {
    let env = environment();
    let (unit_id, unit) = analyze(&env, "/src/forward.php", "<?php class B extends A {} class A {}");
    let a = class(&env, unit_id, &unit, "A");
    let b = class(&env, unit_id, &unit, "B");
    let bases = env.declaration(b).and_then(|d| d.class().map(|c| c.bases.clone()));
    assert_eq!(bases, Some(vec![a]));
    assert!(errors(&unit).is_empty(), "{:?}", errors(&unit));
}

#[rstest]
#[case("self", "A")]
#[case("static", "A")]
#[case("parent", "Base")]
fn test_relative_class_names(#[case] name: &str, #[case] expected: &str) {
    let env = environment();
    let (unit_id, unit) = analyze(&env, "/src/relative.php", &INHERITANCE);
    let offset = INHERITANCE.find("return").expect("method body") as u32;
    let resolved = env.resolve_at(unit_id, TextSize::from(offset), name, DeclarationType::Class);
    assert_eq!(resolved, Some(class(&env, unit_id, &unit, expected)));
}

#[test]
fn test_constant_used_before_declaration() {
    let env = environment();
    let (_, unit) = analyze(&env, "/src/relative.php", &INHERITANCE);
    assert!(errors(&unit).is_empty(), "{:?}", errors(&unit));
    assert!(unit.uses().iter().all(|u| u.decl.is_some()));
}

#[test]
fn test_circular_inheritance_is_reported_once() {
    let env = environment();
    let (unit_id, unit) = analyze(&env, "/src/cycle.php", "<?php class A extends B {} class B extends A {}");
    let errors = errors(&unit);
    assert_eq!(errors.len(), 1, "{errors:?}");
    assert!(errors[0].starts_with("Circular inheritance"));

    let a = class(&env, unit_id, &unit, "A");
    let b = class(&env, unit_id, &unit, "B");
    let bases = |decl| env.declaration(decl).and_then(|d| d.class().map(|c| c.bases.clone()));
    assert_eq!(bases(a), Some(vec![b]));
    assert_eq!(bases(b), Some(vec![]));
    assert!(unit.imported_parent_units().count() <= 1);
}

#[test]
fn test_rebuild_keeps_unit_identity() {
    let env = environment();
    let (first_id, first) = analyze(&env, "/src/rebuild.php", "<?php missing();");
    assert!(!errors(&first).is_empty());

    let (second_id, second) = analyze(&env, "/src/rebuild.php", "<?php class Fine {}");
    assert_eq!(first_id, second_id);
    assert!(second.problems().is_empty());
    assert!(second.uses().is_empty());
    assert!(second.modification_revision() > first.modification_revision());
    // the old snapshot is untouched
    assert!(!errors(&first).is_empty());
}

#[test]
fn test_identical_reassignment_keeps_one_variable() {
    let env = environment();
    let (_, unit) = analyze(&env, "/src/vars.php", "<?php $a = 1; $a = 2;");
    let variables: Vec<_> = unit
        .find_declarations(&QualifiedIdentifier::parse("a"))
        .into_iter()
        .filter(|&d| unit.declaration(d).is_some_and(|d| d.kind() == DeclKind::Variable))
        .collect();
    assert_eq!(variables.len(), 1);
}

#[test]
fn test_persistent_fallback_caches_the_import() {
    let env = environment();
    let (helper_unit, _) = analyze(&env, "/lib/helpers.php", "<?php function helper() {}");

    let before = env.index().query_count();
    let (_, once) = analyze(&env, "/app/once.php", "<?php helper();");
    let single = env.index().query_count() - before;

    let before = env.index().query_count();
    let (_, twice) = analyze(&env, "/app/twice.php", "<?php helper(); helper(); helper();");
    let repeated = env.index().query_count() - before;

    assert!(single > 0);
    assert_eq!(single, repeated);
    for unit in [&once, &twice] {
        assert!(unit.imports_unit(helper_unit));
        assert!(unit.uses().iter().all(|u| u.decl.is_some_and(|d| d.unit == helper_unit)));
    }
}

#[test]
fn test_undefined_function_is_reported() {
    let env = environment();
    let file = env.files().file_id(Path::new("/src/undefined.php"));
    env.files().set_contents(file, "<?php nowhere();");
    let outcome = ParseJob::new(file, Features::ALL_DECLARATIONS_CONTEXTS_AND_USES, 0)
        .run(&env, &Idle, &CancellationToken::new())
        .expect("analysis runs");
    assert!(matches!(outcome, JobOutcome::Built { rescheduled: false, .. }));

    let unit = env.store().get(outcome.unit()).expect("published");
    assert_eq!(errors(&unit).len(), 1);
}

#[test]
fn test_builtins_unit_reports_nothing() {
    let env = environment();
    env.ensure_builtins();
    let builtins = env.builtins_unit().expect("builtins built");
    let unit = env.store().get(builtins).expect("published");
    assert!(unit.problems().is_empty());
    assert!(unit.uses().is_empty());
    assert!(!unit.features().contains(Features::USES));
}

#[test]
fn test_builtins_unit_tracks_but_never_reports_unresolved() {
    let env = environment();
    let file = env.builtins_file();
    env.files().set_contents(file, "<?php nowhere();");
    let tree = env.parser().parse("<?php nowhere();").tree.expect("parses");

    let mut builder = SemanticBuilder::new(&env, file);
    builder.build(&tree, None);
    builder.build_uses(&tree);
    assert!(builder.had_unresolved_identifiers());
    let (_, unit) = builder.finish().expect("built");
    assert!(unit.problems().is_empty(), "{:?}", unit.problems());
    assert_eq!(unit.uses().len(), 1);
}
