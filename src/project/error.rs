//! Operational failures of analysis jobs.
//!
//! Problems found in the analyzed code are never errors here; they are
//! [`Diagnostic`](crate::hir::Diagnostic)s attached to the unit.

use std::path::PathBuf;

use thiserror::Error;

use crate::base::FileId;

#[derive(Debug, Error)]
pub enum JobError {
    #[error("analysis was cancelled")]
    Cancelled,

    #[error("analysis host is shutting down")]
    ShuttingDown,

    #[error("failed to read {}: {source}", path.display())]
    ReadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("no path is registered for {0}")]
    UnknownFile(FileId),

    #[error("failed to start the worker pool")]
    Pool(#[from] rayon::ThreadPoolBuildError),
}

impl JobError {
    /// Whether the job stopped at a checkpoint rather than failing.
    pub fn is_interruption(&self) -> bool {
        matches!(self, JobError::Cancelled | JobError::ShuttingDown)
    }
}
