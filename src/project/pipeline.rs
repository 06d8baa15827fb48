//! One file's analysis: parse, build, resolve uses, publish.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, debug_span, warn};

use super::{JobError, Scheduler};
use crate::base::{FileContents, FileId};
use crate::hir::{AnalysisEnvironment, Diagnostic, Features, SemanticBuilder, SemanticUnit, UnitId};

/// What a finished job did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JobOutcome {
    /// The published unit already matched the contents and features.
    UpToDate(UnitId),
    /// A new unit was published.
    Built {
        unit: UnitId,
        /// A retry was requested because of unresolved identifiers.
        rescheduled: bool,
    },
}

impl JobOutcome {
    pub fn unit(&self) -> UnitId {
        match *self {
            JobOutcome::UpToDate(unit) | JobOutcome::Built { unit, .. } => unit,
        }
    }
}

/// A request to analyze one file.
#[derive(Clone, Debug)]
pub struct ParseJob {
    pub file: FileId,
    pub features: Features,
    /// Smaller is more urgent.
    pub priority: i32,
    pub cancel: CancellationToken,
}

impl ParseJob {
    pub fn new(file: FileId, features: Features, priority: i32) -> Self {
        Self {
            file,
            features,
            priority,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    fn checkpoint(&self, shutdown: &CancellationToken) -> Result<(), JobError> {
        if shutdown.is_cancelled() {
            return Err(JobError::ShuttingDown);
        }
        if self.cancel.is_cancelled() {
            return Err(JobError::Cancelled);
        }
        Ok(())
    }

    /// Run the pipeline.
    ///
    /// The published unit is replaced only at the very end, so an
    /// interrupted job leaves the previous unit of the file in place.
    pub fn run(
        &self,
        env: &AnalysisEnvironment,
        scheduler: &dyn Scheduler,
        shutdown: &CancellationToken,
    ) -> Result<JobOutcome, JobError> {
        let path = env
            .files()
            .path(self.file)
            .ok_or(JobError::UnknownFile(self.file))?;
        let _span = debug_span!("parse_job", file = %path.display()).entered();
        env.ensure_builtins();

        let contents = self.contents(env, &path)?;
        let wanted = self.features.content();
        let existing = env.store().get_by_file(self.file);
        if let Some(existing) = existing.as_deref() {
            let up_to_date = !self.features.contains(Features::RESCHEDULED)
                && existing.features().contains(wanted)
                && is_current(env, existing, contents.revision);
            if up_to_date {
                if let Some(unit) = env.store().unit_for_file(self.file) {
                    debug!(?unit, "unit is up to date");
                    return Ok(JobOutcome::UpToDate(unit));
                }
            }
        }
        // a rebuild never loses what the previous unit offered
        let requested = wanted | existing.map_or(Features::empty(), |e| e.features());

        let output = env.parser().parse(&contents.text);
        self.checkpoint(shutdown)?;

        let Some(tree) = output.tree else {
            debug!(problems = output.problems.len(), "parse failed");
            let (unit_id, previous) = env.store().reserve(self.file, &path);
            let mut unit = SemanticUnit::new(self.file, path.clone());
            unit.set_imports(previous.imported_parent_units().collect::<Vec<_>>());
            unit.add_problems(
                output
                    .problems
                    .iter()
                    .map(|p| Diagnostic::parse_error(self.file, p.range, p.message.as_str())),
            );
            unit.set_modification_revision(contents.revision);
            unit.set_features(requested);
            env.commit(unit_id, unit);
            return Ok(JobOutcome::Built {
                unit: unit_id,
                rescheduled: false,
            });
        };

        let mut builder = SemanticBuilder::new(env, self.file);
        builder.build(&tree, None);
        self.checkpoint(shutdown)?;

        if requested.contains(Features::USES) && !env.is_builtins_file(self.file) {
            builder.build_uses(&tree);
        }

        let mut rescheduled = false;
        if builder.had_unresolved_identifiers() {
            if self.features.contains(Features::RESCHEDULED) {
                debug!("unresolved identifiers after a retry");
            } else if scheduler.queued_count() > 0 {
                let config = env.config();
                let priority = self
                    .priority
                    .saturating_add(config.reschedule_step)
                    .min(config.worst_priority);
                scheduler.request_analysis(self.file, requested | Features::RESCHEDULED, priority);
                debug!(priority, "rescheduled after unresolved identifiers");
                rescheduled = true;
            } else {
                warn!("unresolved identifiers with nothing left to analyze");
            }
        }

        let (unit_id, mut unit) = builder.finish().ok_or(JobError::UnknownFile(self.file))?;
        unit.set_modification_revision(contents.revision);
        unit.set_features(requested);
        env.commit(unit_id, unit);
        Ok(JobOutcome::Built {
            unit: unit_id,
            rescheduled,
        })
    }

    /// Contents from the file set, read from disk on first use.
    fn contents(&self, env: &AnalysisEnvironment, path: &std::path::Path) -> Result<FileContents, JobError> {
        if let Some(contents) = env.files().contents(self.file) {
            return Ok(contents);
        }
        let text = std::fs::read_to_string(path).map_err(|source| JobError::ReadFailed {
            path: path.to_path_buf(),
            source,
        })?;
        let text: Arc<str> = text.into();
        let revision = env.files().set_contents(self.file, text.clone());
        Ok(FileContents { text, revision })
    }
}

/// Whether `unit` was built from `revision` of its file and from the
/// current revision of every file it depends on.
fn is_current(env: &AnalysisEnvironment, unit: &SemanticUnit, revision: u64) -> bool {
    unit.modification_revision() == revision
        && unit.revisions().iter().all(|(&file, &built)| {
            file == unit.file() || env.files().contents(file).is_some_and(|c| c.revision == built)
        })
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use parking_lot::Mutex;

    use super::*;
    use crate::base::FileSet;
    use crate::hir::{BuildConfig, NoProjects, Origin};

    /// Records requests instead of running them.
    #[derive(Default)]
    struct RecordingScheduler {
        queued: usize,
        requests: Mutex<Vec<(FileId, Features, i32)>>,
    }

    impl Scheduler for RecordingScheduler {
        fn request_analysis(&self, file: FileId, features: Features, priority: i32) {
            self.requests.lock().push((file, features, priority));
        }

        fn queued_count(&self) -> usize {
            self.queued
        }
    }

    fn environment() -> (Arc<FileSet>, AnalysisEnvironment) {
        let files = Arc::new(FileSet::new());
        let env = AnalysisEnvironment::new(BuildConfig::default(), files.clone(), Arc::new(NoProjects));
        (files, env)
    }

    #[test]
    fn test_builds_and_skips_up_to_date() {
        let (files, env) = environment();
        let file = files.file_id(Path::new("/src/a.php"));
        files.set_contents(file, "<?php function f() {} f();");
        let scheduler = RecordingScheduler::default();
        let shutdown = CancellationToken::new();

        let job = ParseJob::new(file, Features::ALL_DECLARATIONS_CONTEXTS_AND_USES, 0);
        let first = job.run(&env, &scheduler, &shutdown).expect("built");
        assert!(matches!(first, JobOutcome::Built { rescheduled: false, .. }));
        let unit = env.store().get(first.unit()).expect("published");
        assert_eq!(unit.uses().len(), 1);

        let second = job.run(&env, &scheduler, &shutdown).expect("checked");
        assert_eq!(second, JobOutcome::UpToDate(first.unit()));
    }

    #[test]
    fn test_parse_failure_keeps_imports() {
        let (files, env) = environment();
        let file = files.file_id(Path::new("/src/a.php"));
        files.set_contents(file, "<?php class A {}");
        let scheduler = RecordingScheduler::default();
        let shutdown = CancellationToken::new();
        let job = ParseJob::new(file, Features::ALL_DECLARATIONS_AND_CONTEXTS, 0);
        let built = job.run(&env, &scheduler, &shutdown).expect("built");
        let imports: Vec<_> = env
            .store()
            .get(built.unit())
            .expect("unit")
            .imported_parent_units()
            .collect();
        assert!(!imports.is_empty());

        files.set_contents(file, "<?php class {");
        let failed = job.run(&env, &scheduler, &shutdown).expect("still publishes");
        assert_eq!(failed.unit(), built.unit());
        let unit = env.store().get(failed.unit()).expect("unit");
        assert_eq!(unit.declaration_count(), 0);
        assert_eq!(unit.imported_parent_units().collect::<Vec<_>>(), imports);
        assert!(!unit.problems().is_empty());
        assert!(unit.problems().iter().all(|p| p.origin == Origin::Parser));
    }

    #[test]
    fn test_unresolved_reschedules_when_queue_is_busy() {
        let (files, env) = environment();
        let file = files.file_id(Path::new("/src/a.php"));
        files.set_contents(file, "<?php later();");
        let scheduler = RecordingScheduler {
            queued: 3,
            ..RecordingScheduler::default()
        };
        let shutdown = CancellationToken::new();

        let job = ParseJob::new(file, Features::ALL_DECLARATIONS_CONTEXTS_AND_USES, 50);
        let outcome = job.run(&env, &scheduler, &shutdown).expect("built");
        assert!(matches!(outcome, JobOutcome::Built { rescheduled: true, .. }));
        let requests = scheduler.requests.lock().clone();
        assert_eq!(
            requests,
            vec![(file, Features::ALL_DECLARATIONS_CONTEXTS_AND_USES | Features::RESCHEDULED, 150)]
        );

        // the retry itself never reschedules
        let retry = ParseJob::new(file, requests[0].1, requests[0].2);
        let outcome = retry.run(&env, &scheduler, &shutdown).expect("built");
        assert!(matches!(outcome, JobOutcome::Built { rescheduled: false, .. }));
        assert_eq!(scheduler.requests.lock().len(), 1);
    }

    #[test]
    fn test_unresolved_with_empty_queue_completes() {
        let (files, env) = environment();
        let file = files.file_id(Path::new("/src/a.php"));
        files.set_contents(file, "<?php later();");
        let scheduler = RecordingScheduler::default();
        let outcome = ParseJob::new(file, Features::ALL_DECLARATIONS_CONTEXTS_AND_USES, 0)
            .run(&env, &scheduler, &CancellationToken::new())
            .expect("built");
        assert!(matches!(outcome, JobOutcome::Built { rescheduled: false, .. }));
        assert!(scheduler.requests.lock().is_empty());
    }

    #[test]
    fn test_cancelled_job_leaves_previous_unit() {
        let (files, env) = environment();
        let file = files.file_id(Path::new("/src/a.php"));
        files.set_contents(file, "<?php class A {}");
        let scheduler = RecordingScheduler::default();
        let shutdown = CancellationToken::new();
        let built = ParseJob::new(file, Features::ALL_DECLARATIONS_AND_CONTEXTS, 0)
            .run(&env, &scheduler, &shutdown)
            .expect("built");
        let before = env.store().get(built.unit()).expect("unit");

        files.set_contents(file, "<?php class B {}");
        let cancel = CancellationToken::new();
        cancel.cancel();
        let job = ParseJob::new(file, Features::ALL_DECLARATIONS_AND_CONTEXTS, 0).with_cancellation(cancel);
        let err = job.run(&env, &scheduler, &shutdown).unwrap_err();
        assert!(matches!(err, JobError::Cancelled));

        let after = env.store().get(built.unit()).expect("unit");
        assert!(Arc::ptr_eq(&before, &after));
    }

    #[test]
    fn test_shutdown_wins_over_cancel() {
        let (files, env) = environment();
        let file = files.file_id(Path::new("/src/a.php"));
        files.set_contents(file, "<?php");
        let shutdown = CancellationToken::new();
        shutdown.cancel();
        let err = ParseJob::new(file, Features::ALL_DECLARATIONS_AND_CONTEXTS, 0)
            .run(&env, &RecordingScheduler::default(), &shutdown)
            .unwrap_err();
        assert!(matches!(err, JobError::ShuttingDown));
        assert!(err.is_interruption());
    }

    #[test]
    fn test_reads_from_disk_when_not_loaded() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("disk.php");
        std::fs::write(&path, "<?php const ANSWER = 42;").expect("write");

        let (files, env) = environment();
        let file = files.file_id(&path);
        let outcome = ParseJob::new(file, Features::ALL_DECLARATIONS_AND_CONTEXTS, 0)
            .run(&env, &RecordingScheduler::default(), &CancellationToken::new())
            .expect("built");
        let unit = env.store().get(outcome.unit()).expect("unit");
        assert!(unit.declaration_count() > 0);
        assert!(files.contents(file).is_some());
    }

    fn errors(unit: &SemanticUnit) -> usize {
        unit.problems()
            .iter()
            .filter(|p| p.severity == crate::hir::Severity::Error)
            .count()
    }

    #[test]
    fn test_edit_of_included_file_invalidates_includer() {
        let dir = tempfile::tempdir().expect("tempdir");
        let lib_path = dir.path().join("lib.php");
        let main_path = dir.path().join("main.php");
        std::fs::write(&lib_path, "<?php function a() {}").expect("write");
        std::fs::write(&main_path, "<?php include 'lib.php'; a();").expect("write");

        let files = Arc::new(FileSet::new());
        let projects = Arc::new(crate::project::FsProjectSet::new([dir.path().to_path_buf()]));
        let env = AnalysisEnvironment::new(BuildConfig::default(), files.clone(), projects);
        let lib = files.file_id(&lib_path);
        let main = files.file_id(&main_path);
        let scheduler = RecordingScheduler::default();
        let shutdown = CancellationToken::new();
        let features = Features::ALL_DECLARATIONS_CONTEXTS_AND_USES;

        ParseJob::new(lib, features, 0).run(&env, &scheduler, &shutdown).expect("lib");
        let built = ParseJob::new(main, features, 0).run(&env, &scheduler, &shutdown).expect("main");
        let unit = env.store().get(built.unit()).expect("unit");
        assert!(unit.revisions().contains_key(&lib));
        assert_eq!(errors(&unit), 0);
        let again = ParseJob::new(main, features, 0).run(&env, &scheduler, &shutdown).expect("main");
        assert_eq!(again, JobOutcome::UpToDate(built.unit()));

        files.set_contents(lib, "<?php function b() {}");
        ParseJob::new(lib, features, 0).run(&env, &scheduler, &shutdown).expect("lib");
        let rebuilt = ParseJob::new(main, features, 0).run(&env, &scheduler, &shutdown).expect("main");
        assert!(matches!(rebuilt, JobOutcome::Built { .. }));
        let unit = env.store().get(rebuilt.unit()).expect("unit");
        assert_eq!(errors(&unit), 1);
    }

    #[test]
    fn test_index_match_records_owner_revision() {
        let (files, env) = environment();
        let x = files.file_id(Path::new("/src/x.php"));
        let y = files.file_id(Path::new("/src/y.php"));
        files.set_contents(x, "<?php function helper() {}");
        files.set_contents(y, "<?php helper();");
        let scheduler = RecordingScheduler::default();
        let shutdown = CancellationToken::new();
        let features = Features::ALL_DECLARATIONS_CONTEXTS_AND_USES;

        let x_unit = ParseJob::new(x, features, 0).run(&env, &scheduler, &shutdown).expect("x").unit();
        let y_unit = ParseJob::new(y, features, 0).run(&env, &scheduler, &shutdown).expect("y").unit();
        let unit = env.store().get(y_unit).expect("unit");
        assert!(unit.imports_unit(x_unit));
        assert!(unit.revisions().contains_key(&x));

        files.set_contents(x, "<?php function helper() {} function other() {}");
        let outcome = ParseJob::new(y, features, 0).run(&env, &scheduler, &shutdown).expect("y");
        assert!(matches!(outcome, JobOutcome::Built { .. }));
    }

    #[test]
    fn test_narrower_request_keeps_previous_features() {
        let (files, env) = environment();
        let file = files.file_id(Path::new("/src/a.php"));
        files.set_contents(file, "<?php function f() {} f();");
        let scheduler = RecordingScheduler::default();
        let shutdown = CancellationToken::new();
        ParseJob::new(file, Features::ALL_DECLARATIONS_CONTEXTS_AND_USES, 0)
            .run(&env, &scheduler, &shutdown)
            .expect("built");

        files.set_contents(file, "<?php function f() {} f(); f();");
        let outcome = ParseJob::new(file, Features::ALL_DECLARATIONS_AND_CONTEXTS, 0)
            .run(&env, &scheduler, &shutdown)
            .expect("rebuilt");
        assert!(matches!(outcome, JobOutcome::Built { .. }));
        let unit = env.store().get(outcome.unit()).expect("unit");
        assert!(unit.features().contains(Features::USES));
        assert_eq!(unit.uses().len(), 2);
    }
}
