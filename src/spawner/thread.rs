//! Thread-backed spawner.
//!
//! Workers are threads of the coordinator. They share its heap and file descriptor
//! table, so a worker's only per-worker state is what it owns: the tag computed for it
//! before it was spawned, and whatever its kernel allocates.

use std::io;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::thread::{self};

use nix::unistd::Pid;
use nix::unistd::gettid;
use tracing::debug;
use tracing::error;

use crate::error::HarnessError;
use crate::error::KernelError;
use crate::spawner::WorkerCount;
use crate::spawner::WorkerFailure;
use crate::spawner::WorkerId;
use crate::spawner::WorkerOutcome;
use crate::util::panic_message;
use crate::workloads::WorkerTag;
use crate::workloads::Workload;

/// The largest number of threads in one batch.
pub const MAX_WORKERS: usize = 256;

/// A worker count accepted by the thread backend.
pub type ThreadCount = WorkerCount<MAX_WORKERS>;

/// What a worker thread hands back when it finishes.
type Completion = (Pid, Result<(), KernelError>);

/// A launched batch of threads that has not been joined yet.
pub struct ThreadBatch {
    handles: Vec<(usize, JoinHandle<Completion>)>,
}

impl ThreadBatch {
    /// Spawn `count` threads, each running `f` once.
    ///
    /// # Returns
    ///
    /// The batch, or `HarnessError::Spawn` if a thread cannot be created. In that case
    /// no further threads are created and the ones already running are joined first.
    pub fn launch<F>(count: ThreadCount, f: F) -> Result<Self, HarnessError>
    where
        F: Fn(WorkerTag) -> Result<(), KernelError> + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        let pid = Pid::this();
        Self::launch_with(count, |index| {
            // Owned by this worker alone from here on.
            let tag = WorkerTag::Thread { pid, index };
            let f = Arc::clone(&f);
            thread::Builder::new()
                .name(format!("spawnbench-{index}"))
                .spawn(move || {
                    let tid = gettid();
                    println!("WORKER_TID: {tid} (worker {index})");
                    (tid, f(tag))
                })
        })
    }

    /// Create threads in index order with `spawn`, stopping at the first failure.
    fn launch_with<S>(count: ThreadCount, mut spawn: S) -> Result<Self, HarnessError>
    where
        S: FnMut(usize) -> io::Result<JoinHandle<Completion>>,
    {
        let mut handles = Vec::with_capacity(count.get());
        for index in 0..count.get() {
            match spawn(index) {
                Ok(handle) => {
                    debug!(index, "thread launched");
                    handles.push((index, handle));
                }
                Err(source) => {
                    error!(index, %source, "thread creation failed, joining {} threads", handles.len());
                    drop(Self { handles }.wait());
                    return Err(HarnessError::Spawn { index, source });
                }
            }
        }
        Ok(Self { handles })
    }

    /// Join every thread.
    ///
    /// # Returns
    ///
    /// One outcome per thread, in spawn order. A panicking worker is reported as
    /// `WorkerFailure::Panicked`; it does not disturb the others.
    pub fn wait(self) -> Vec<WorkerOutcome> {
        self.handles
            .into_iter()
            .map(|(index, handle)| {
                let outcome = match handle.join() {
                    Ok((tid, result)) => WorkerOutcome {
                        worker: WorkerId::Thread {
                            index,
                            tid: Some(tid),
                        },
                        result: result.map_err(WorkerFailure::Kernel),
                    },
                    Err(payload) => WorkerOutcome {
                        worker: WorkerId::Thread { index, tid: None },
                        result: Err(WorkerFailure::Panicked(panic_message(payload.as_ref()))),
                    },
                };
                debug!(worker = %outcome.worker, ok = outcome.is_success(), "thread joined");
                outcome
            })
            .collect()
    }
}

/// Run `workload` on `count` threads and join all of them.
pub fn spawn_threads(
    workload: &Workload,
    count: ThreadCount,
) -> Result<Vec<WorkerOutcome>, HarnessError> {
    let workload = workload.clone();
    let batch = ThreadBatch::launch(count, move |tag| workload.run(&tag))?;
    Ok(batch.wait())
}
