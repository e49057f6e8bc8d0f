//! Error kinds for the harness and its kernels.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Failures that belong to the coordinator and end the whole run.
#[derive(Debug, Error)]
pub enum HarnessError {
    /// An unrecognized selector or an out-of-range worker count.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Process replication or thread creation failed.
    #[error("failed to spawn worker {index}: {source}")]
    Spawn {
        /// Index of the worker that could not be created.
        index: usize,
        #[source]
        source: io::Error,
    },
}

/// Failures local to a single kernel invocation.
///
/// These are recorded in that worker's outcome and never abort siblings.
#[derive(Debug, Error)]
pub enum KernelError {
    #[error("failed to allocate {size} bytes")]
    Allocation { size: usize },

    #[error("{op} failed on {}: {source}", .path.display())]
    Io {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl KernelError {
    pub(crate) fn io(op: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            op,
            path: path.into(),
            source,
        }
    }
}
