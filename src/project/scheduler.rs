//! Prioritized background analysis.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::path::Path;
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};
use rustc_hash::FxHashMap;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{JobError, ParseJob, load_directory};
use crate::base::FileId;
use crate::hir::{AnalysisEnvironment, Features};

/// Accepts analysis requests from running jobs.
pub trait Scheduler: Send + Sync {
    /// Queue an analysis of `file`. Smaller priorities run first.
    fn request_analysis(&self, file: FileId, features: Features, priority: i32);

    /// Requests waiting to start.
    fn queued_count(&self) -> usize;
}

struct Request {
    file: FileId,
    features: Features,
    priority: i32,
    sequence: u64,
    cancel: CancellationToken,
}

impl PartialEq for Request {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.sequence == other.sequence
    }
}

impl Eq for Request {}

impl PartialOrd for Request {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Request {
    // `BinaryHeap` pops the largest: most urgent, then oldest.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .priority
            .cmp(&self.priority)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

#[derive(Default)]
struct Queue {
    heap: BinaryHeap<Request>,
    /// Latest request per file, by sequence.
    latest: FxHashMap<FileId, (u64, CancellationToken)>,
    /// Requests not yet finished, running or queued.
    outstanding: usize,
    sequence: u64,
}

struct Shared {
    env: Arc<AnalysisEnvironment>,
    pool: rayon::ThreadPool,
    queue: Mutex<Queue>,
    idle: Condvar,
    shutdown: CancellationToken,
}

/// Runs [`ParseJob`]s on a worker pool against one environment.
///
/// A new request for a file supersedes the queued or running one. Cloning
/// the host is cheap and every clone drives the same queue.
#[derive(Clone)]
pub struct AnalysisHost {
    shared: Arc<Shared>,
}

impl AnalysisHost {
    pub fn new(env: Arc<AnalysisEnvironment>) -> Result<Self, JobError> {
        let mut builder = rayon::ThreadPoolBuilder::new().thread_name(|i| format!("phpmodel-analysis-{i}"));
        if env.config().worker_threads > 0 {
            builder = builder.num_threads(env.config().worker_threads);
        }
        let pool = builder.build()?;
        Ok(Self {
            shared: Arc::new(Shared {
                env,
                pool,
                queue: Mutex::new(Queue::default()),
                idle: Condvar::new(),
                shutdown: CancellationToken::new(),
            }),
        })
    }

    pub fn env(&self) -> &Arc<AnalysisEnvironment> {
        &self.shared.env
    }

    /// Replace the text of `path` and queue its analysis.
    pub fn update_file(&self, path: &Path, text: &str, features: Features, priority: i32) -> FileId {
        let files = self.shared.env.files();
        let file = files.file_id(path);
        files.set_contents(file, text);
        self.request_analysis(file, features, priority);
        file
    }

    /// Load every source below `dir` and queue all of them at once.
    pub fn load_directory(&self, dir: &Path, features: Features, priority: i32) -> Result<Vec<FileId>, JobError> {
        let files = load_directory(self.shared.env.files(), dir)?;
        self.request_all(files.iter().map(|&file| (file, features, priority)));
        info!(dir = %dir.display(), files = files.len(), "queued directory");
        Ok(files)
    }

    /// Queue several requests before any of them can start.
    pub fn request_all(&self, requests: impl IntoIterator<Item = (FileId, Features, i32)>) {
        if self.shared.shutdown.is_cancelled() {
            debug!("ignoring requests after shutdown");
            return;
        }
        let mut spawned = 0;
        {
            let mut queue = self.shared.queue.lock();
            for (file, features, priority) in requests {
                Self::push(&mut queue, file, features, priority);
                spawned += 1;
            }
        }
        for _ in 0..spawned {
            self.spawn_worker();
        }
    }

    /// Block until every request has finished.
    pub fn wait_until_idle(&self) {
        let mut queue = self.shared.queue.lock();
        while queue.outstanding > 0 {
            self.shared.idle.wait(&mut queue);
        }
    }

    /// Stop accepting requests and interrupt running jobs.
    pub fn shutdown(&self) {
        self.shared.shutdown.cancel();
        let queue = self.shared.queue.lock();
        for (_, token) in queue.latest.values() {
            token.cancel();
        }
        debug!(queued = queue.heap.len(), "analysis host shutting down");
    }

    pub fn is_shut_down(&self) -> bool {
        self.shared.shutdown.is_cancelled()
    }

    fn push(queue: &mut Queue, file: FileId, features: Features, priority: i32) {
        let sequence = queue.sequence;
        queue.sequence += 1;
        let cancel = CancellationToken::new();
        if let Some((_, previous)) = queue.latest.insert(file, (sequence, cancel.clone())) {
            previous.cancel();
        }
        queue.heap.push(Request {
            file,
            features,
            priority,
            sequence,
            cancel,
        });
        queue.outstanding += 1;
    }

    fn spawn_worker(&self) {
        let host = self.clone();
        self.shared.pool.spawn(move || host.run_next());
    }

    fn run_next(&self) {
        let Some(request) = self.shared.queue.lock().heap.pop() else {
            return;
        };

        if request.cancel.is_cancelled() || self.shared.shutdown.is_cancelled() {
            debug!(file = ?request.file, "skipping superseded request");
        } else {
            let job = ParseJob::new(request.file, request.features, request.priority)
                .with_cancellation(request.cancel.clone());
            match job.run(&self.shared.env, self, &self.shared.shutdown) {
                Ok(outcome) => debug!(file = ?request.file, ?outcome, "analysis finished"),
                Err(error) if error.is_interruption() => debug!(file = ?request.file, %error, "analysis interrupted"),
                Err(error) => warn!(file = ?request.file, %error, "analysis failed"),
            }
        }

        let mut queue = self.shared.queue.lock();
        if queue
            .latest
            .get(&request.file)
            .is_some_and(|(sequence, _)| *sequence == request.sequence)
        {
            queue.latest.remove(&request.file);
        }
        queue.outstanding -= 1;
        if queue.outstanding == 0 {
            self.shared.idle.notify_all();
        }
    }
}

impl Scheduler for AnalysisHost {
    fn request_analysis(&self, file: FileId, features: Features, priority: i32) {
        self.request_all([(file, features, priority)]);
    }

    fn queued_count(&self) -> usize {
        self.shared.queue.lock().heap.len()
    }
}

impl std::fmt::Debug for AnalysisHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let queue = self.shared.queue.lock();
        f.debug_struct("AnalysisHost")
            .field("queued", &queue.heap.len())
            .field("outstanding", &queue.outstanding)
            .field("shut_down", &self.shared.shutdown.is_cancelled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::base::FileSet;
    use crate::hir::{BuildConfig, NoProjects, Severity};

    fn host() -> AnalysisHost {
        let config = BuildConfig {
            worker_threads: 1,
            ..BuildConfig::default()
        };
        let env = AnalysisEnvironment::new(config, Arc::new(FileSet::new()), Arc::new(NoProjects));
        AnalysisHost::new(Arc::new(env)).expect("pool")
    }

    fn request(priority: i32, sequence: u64) -> Request {
        Request {
            file: FileId::new(0),
            features: Features::empty(),
            priority,
            sequence,
            cancel: CancellationToken::new(),
        }
    }

    #[test]
    fn test_most_urgent_then_oldest_first() {
        let mut heap = BinaryHeap::new();
        heap.push(request(10, 0));
        heap.push(request(0, 2));
        heap.push(request(0, 1));
        let order: Vec<_> = std::iter::from_fn(|| heap.pop()).map(|r| (r.priority, r.sequence)).collect();
        assert_eq!(order, vec![(0, 1), (0, 2), (10, 0)]);
    }

    #[test]
    fn test_update_file_publishes_unit() {
        let host = host();
        let file = host.update_file(
            Path::new("/src/a.php"),
            "<?php class A {}",
            Features::ALL_DECLARATIONS_CONTEXTS_AND_USES,
            0,
        );
        host.wait_until_idle();
        let unit = host.env().store().get_by_file(file).expect("published");
        assert!(unit.problems().is_empty());
        assert_eq!(host.queued_count(), 0);
    }

    #[test]
    fn test_forward_reference_across_files_is_retried() {
        let host = host();
        let files = host.env().files().clone();
        let a = files.file_id(&PathBuf::from("/src/a.php"));
        let b = files.file_id(&PathBuf::from("/src/b.php"));
        files.set_contents(a, "<?php new B();");
        files.set_contents(b, "<?php class B {}");

        host.request_all([
            (a, Features::ALL_DECLARATIONS_CONTEXTS_AND_USES, 0),
            (b, Features::ALL_DECLARATIONS_CONTEXTS_AND_USES, 0),
        ]);
        host.wait_until_idle();

        let unit = host.env().store().get_by_file(a).expect("published");
        assert!(unit.problems().iter().all(|p| p.severity != Severity::Error));
        assert!(!unit.uses().is_empty());
        assert!(unit.uses().iter().all(|u| u.decl.is_some()));
    }

    #[test]
    fn test_requests_after_shutdown_are_ignored() {
        let host = host();
        host.shutdown();
        assert!(host.is_shut_down());
        let file = host.update_file(Path::new("/src/a.php"), "<?php", Features::ALL_DECLARATIONS_AND_CONTEXTS, 0);
        host.wait_until_idle();
        assert!(host.env().store().get_by_file(file).is_none());
    }

    #[test]
    fn test_superseded_request_still_publishes_latest() {
        let host = host();
        let files = host.env().files().clone();
        let a = files.file_id(Path::new("/src/a.php"));
        files.set_contents(a, "<?php class A {} class C {}");
        host.request_all([
            (a, Features::ALL_DECLARATIONS_AND_CONTEXTS, 5),
            (a, Features::ALL_DECLARATIONS_CONTEXTS_AND_USES, 5),
        ]);
        host.wait_until_idle();
        let unit = host.env().store().get_by_file(a).expect("published");
        assert!(unit.features().contains(Features::USES));
    }
}
