//! The analysis environment: everything a pipeline needs, constructed once
//! and shared by reference.

use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Once;
use smol_str::SmolStr;
use tracing::{debug, warn};

use crate::base::{FileId, FileSet, TextSize};
use crate::syntax::PhpParser;

use super::build::SemanticBuilder;
use super::decl::Declaration;
use super::ids::{DeclRef, UnitId};
use super::include::ProjectFileSet;
use super::index::PersistentIndex;
use super::name::QualifiedIdentifier;
use super::resolve::{DeclarationType, NameResolver};
use super::store::UnitStore;
use super::unit::{Features, SemanticUnit};

/// Source of the builtins unit when the host does not provide one.
pub const DEFAULT_BUILTINS: &str = include_str!("builtins.php");

/// Build settings.
#[derive(Clone, Debug)]
pub struct BuildConfig {
    /// Language tag of persistent index entries.
    pub language: SmolStr,
    /// Well-known path of the builtins file.
    pub builtins_path: PathBuf,
    /// Whether unresolved references are reported as errors.
    pub report_errors: bool,
    /// Priority penalty of a rescheduled analysis.
    pub reschedule_step: i32,
    /// Largest (least urgent) priority a request may get.
    pub worst_priority: i32,
    /// Worker threads of the analysis host; `0` picks the number of CPUs.
    pub worker_threads: usize,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            language: SmolStr::new_static("Php"),
            builtins_path: PathBuf::from("/phpmodel/builtins.php"),
            report_errors: true,
            reschedule_step: 100,
            worst_priority: 10_000,
            worker_threads: 0,
        }
    }
}

pub struct AnalysisEnvironment {
    config: BuildConfig,
    files: Arc<FileSet>,
    projects: Arc<dyn ProjectFileSet>,
    store: UnitStore,
    index: PersistentIndex,
    parser: PhpParser,
    builtins_file: FileId,
    builtins_once: Once,
}

impl std::fmt::Debug for AnalysisEnvironment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnalysisEnvironment")
            .field("config", &self.config)
            .field("builtins_file", &self.builtins_file)
            .field("units", &self.store.len())
            .finish()
    }
}

impl AnalysisEnvironment {
    /// Register the builtins file with `files`, giving it the bundled
    /// contents unless the host already set some.
    pub fn new(config: BuildConfig, files: Arc<FileSet>, projects: Arc<dyn ProjectFileSet>) -> Self {
        let builtins_file = files.file_id(&config.builtins_path);
        if files.contents(builtins_file).is_none() {
            files.set_contents(builtins_file, DEFAULT_BUILTINS);
        }
        Self {
            config,
            files,
            projects,
            store: UnitStore::new(),
            index: PersistentIndex::new(),
            parser: PhpParser::new(),
            builtins_file,
            builtins_once: Once::new(),
        }
    }

    pub fn config(&self) -> &BuildConfig {
        &self.config
    }

    pub fn files(&self) -> &Arc<FileSet> {
        &self.files
    }

    pub fn projects(&self) -> &dyn ProjectFileSet {
        self.projects.as_ref()
    }

    pub fn store(&self) -> &UnitStore {
        &self.store
    }

    pub fn index(&self) -> &PersistentIndex {
        &self.index
    }

    pub fn parser(&self) -> &PhpParser {
        &self.parser
    }

    pub fn builtins_file(&self) -> FileId {
        self.builtins_file
    }

    pub fn is_builtins_file(&self, file: FileId) -> bool {
        file == self.builtins_file
    }

    /// The builtins unit, once built.
    pub fn builtins_unit(&self) -> Option<UnitId> {
        self.store.unit_for_file(self.builtins_file)
    }

    /// Build the builtins unit on first call; later calls return at once,
    /// concurrent callers wait for the first one.
    pub fn ensure_builtins(&self) {
        self.builtins_once.call_once(|| {
            let _span = tracing::debug_span!("builtins").entered();
            let Some(contents) = self.files.contents(self.builtins_file) else {
                warn!("builtins file has no contents");
                return;
            };
            let output = self.parser.parse(&contents.text);
            let Some(tree) = output.tree else {
                warn!(problems = output.problems.len(), "builtins file failed to parse");
                return;
            };
            let mut builder = SemanticBuilder::new(self, self.builtins_file);
            builder.build(&tree, None);
            if let Some((unit_id, mut unit)) = builder.finish() {
                unit.set_features(Features::ALL_DECLARATIONS_AND_CONTEXTS);
                unit.set_modification_revision(contents.revision);
                self.commit(unit_id, unit);
                debug!(?unit_id, "built builtins unit");
            }
        });
    }

    /// Publish `unit` and refresh its persistent index entries.
    pub fn commit(&self, unit_id: UnitId, unit: SemanticUnit) -> Arc<SemanticUnit> {
        let unit = self.store.commit(unit_id, unit);
        self.index.update_unit(unit_id, &unit, &self.config.language);
        unit
    }

    /// Forget `file`: its unit and its persistent index entries.
    pub fn remove_file(&self, file: FileId) -> bool {
        match self.store.remove(file) {
            Some(unit) => {
                self.index.remove_unit(unit);
                debug!(?file, ?unit, "removed unit");
                true
            }
            None => false,
        }
    }

    pub fn declaration(&self, decl: DeclRef) -> Option<Declaration> {
        self.store.get(decl.unit)?.declaration(decl.decl).cloned()
    }

    /// Resolve `name` as written at `offset` of the published unit `unit`.
    ///
    /// Runs on a copy; a persistent-index hit does not change the
    /// published unit.
    pub fn resolve_at(
        &self,
        unit: UnitId,
        offset: TextSize,
        name: &str,
        kind: DeclarationType,
    ) -> Option<DeclRef> {
        let mut copy = SemanticUnit::clone(&*self.store.get(unit)?);
        let scope = copy.scope_at(offset);
        NameResolver::new(self, unit, &mut copy).resolve(scope, &QualifiedIdentifier::parse(name), kind)
    }
}
