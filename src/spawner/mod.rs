//! Worker spawners.
//!
//! Two backends create and join a batch of workers: [`process`] replicates the calling
//! process with `fork`, [`thread`] spawns threads that share its address space. They
//! expose the same shape, `(workload, count) -> outcomes`, but no common trait: the
//! caller always names the isolation model it gets.

use std::fmt;
use std::io;

use nix::sys::signal::Signal;
use nix::unistd::Pid;
use thiserror::Error;

use crate::error::HarnessError;
use crate::error::KernelError;

pub mod process;
pub mod thread;

pub use process::ProcessBatch;
pub use process::ProcessCount;
pub use process::spawn_processes;
pub use thread::ThreadBatch;
pub use thread::ThreadCount;
pub use thread::spawn_threads;

/// A worker count validated against the closed range `1..=MAX`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct WorkerCount<const MAX: usize>(usize);

impl<const MAX: usize> WorkerCount<MAX> {
    /// Validate `count`.
    ///
    /// Out-of-range values are rejected, never clamped.
    pub fn new(count: usize) -> Result<Self, HarnessError> {
        if (1..=MAX).contains(&count) {
            Ok(Self(count))
        } else {
            Err(HarnessError::Configuration(format!(
                "worker count must be between 1 and {MAX}, got {count}"
            )))
        }
    }

    pub fn get(self) -> usize {
        self.0
    }
}

impl<const MAX: usize> fmt::Display for WorkerCount<MAX> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Which spawned unit an outcome belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum WorkerId {
    Process(Pid),

    /// `tid` is unknown only if the thread died before reporting it.
    Thread { index: usize, tid: Option<Pid> },
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerId::Process(pid) => write!(f, "process {pid}"),
            WorkerId::Thread {
                index,
                tid: Some(tid),
            } => write!(f, "thread {index} (tid {tid})"),
            WorkerId::Thread { index, tid: None } => write!(f, "thread {index}"),
        }
    }
}

/// Why a worker did not succeed.
#[derive(Debug, Error)]
pub enum WorkerFailure {
    /// A replica exited with a non-zero status, or left a message on its result pipe.
    #[error("exited with status {status}: {message}")]
    Exited { status: i32, message: String },

    #[error("killed by signal {0}")]
    Signaled(Signal),

    /// A thread's kernel returned an error.
    #[error(transparent)]
    Kernel(#[from] KernelError),

    #[error("panicked: {0}")]
    Panicked(String),

    /// The coordinator could not reap the replica.
    #[error("could not be waited on: {0}")]
    Wait(#[source] io::Error),
}

/// The completion signal observed for one worker.
#[derive(Debug)]
pub struct WorkerOutcome {
    pub worker: WorkerId,
    pub result: Result<(), WorkerFailure>,
}

impl WorkerOutcome {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}
