//! Running analyses over a project: loading files, parse jobs and the
//! worker pool that executes them.

mod error;
mod files;
mod loader;
mod pipeline;
mod scheduler;

pub use error::JobError;
pub use files::{FsProjectSet, collect_file_paths};
pub use loader::load_directory;
pub use pipeline::{JobOutcome, ParseJob};
pub use scheduler::{AnalysisHost, Scheduler};
