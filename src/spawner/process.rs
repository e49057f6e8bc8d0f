//! Process-backed spawner.
//!
//! Every worker is a `fork` of the coordinator: it starts from a private copy of the
//! coordinator's memory and shares nothing with it or its siblings afterwards, so a
//! crash or allocation failure in one replica cannot affect any other.

use std::io::Write;
use std::io::{self};

use nix::unistd::Pid;
use tracing::debug;
use tracing::error;

use crate::error::HarnessError;
use crate::error::KernelError;
use crate::spawner::WorkerCount;
use crate::spawner::WorkerFailure;
use crate::spawner::WorkerId;
use crate::spawner::WorkerOutcome;
use crate::util::child::Child;
use crate::util::child::ChildExit;
use crate::workloads::WorkerTag;
use crate::workloads::Workload;

/// The largest number of replicas in one batch.
pub const MAX_WORKERS: usize = 10;

/// A worker count accepted by the process backend.
pub type ProcessCount = WorkerCount<MAX_WORKERS>;

/// A launched batch of replicas that has not been waited on yet.
pub struct ProcessBatch {
    children: Vec<Child>,
}

impl ProcessBatch {
    /// Replicate the calling process `count` times, running `f` in each replica.
    ///
    /// Each replica prints its pid, calls `f` with its own tag and exits with status 0
    /// on success or non-zero on failure. The coordinator does not run `f`.
    ///
    /// # Returns
    ///
    /// The batch, or `HarnessError::Spawn` if a `fork` fails. In that case no further
    /// replicas are created and the ones already running are reaped before returning.
    pub fn launch<F>(count: ProcessCount, f: F) -> Result<Self, HarnessError>
    where
        F: Fn(WorkerTag) -> Result<(), KernelError>,
    {
        Self::launch_with(count, |index| {
            Child::run(|| {
                let pid = Pid::this();
                println!("WORKER_PID: {pid}");
                let _ = io::stdout().flush();
                f(WorkerTag::Process { pid, index })
            })
        })
    }

    /// Create replicas in index order with `spawn`, stopping at the first failure.
    fn launch_with<S>(count: ProcessCount, mut spawn: S) -> Result<Self, HarnessError>
    where
        S: FnMut(usize) -> io::Result<Child>,
    {
        let mut children = Vec::with_capacity(count.get());
        for index in 0..count.get() {
            match spawn(index) {
                Ok(child) => {
                    debug!(index, pid = %child.pid(), "replica launched");
                    children.push(child);
                }
                Err(source) => {
                    error!(index, %source, "fork failed, reaping {} replicas", children.len());
                    drop(Self { children }.wait());
                    return Err(HarnessError::Spawn { index, source });
                }
            }
        }
        Ok(Self { children })
    }

    /// Pids of the replicas, in launch order.
    pub fn pids(&self) -> Vec<Pid> {
        self.children.iter().map(Child::pid).collect()
    }

    /// Block until every replica has terminated.
    ///
    /// Each replica is reaped by its own pid, so outcomes stay attached to their
    /// handles whatever order the replicas finish in.
    ///
    /// # Returns
    ///
    /// One outcome per replica, in launch order.
    pub fn wait(self) -> Vec<WorkerOutcome> {
        self.children
            .into_iter()
            .map(|mut child| {
                let worker = WorkerId::Process(child.pid());
                let result = match child.wait() {
                    Ok(exit) if exit.success() => Ok(()),
                    Ok(ChildExit::Exited { status, message }) => {
                        Err(WorkerFailure::Exited { status, message })
                    }
                    Ok(ChildExit::Signaled(signal)) => Err(WorkerFailure::Signaled(signal)),
                    Err(e) => Err(WorkerFailure::Wait(e)),
                };
                debug!(%worker, ok = result.is_ok(), "replica reaped");
                WorkerOutcome { worker, result }
            })
            .collect()
    }
}

/// Run `workload` in `count` replicas and wait for all of them.
pub fn spawn_processes(
    workload: &Workload,
    count: ProcessCount,
) -> Result<Vec<WorkerOutcome>, HarnessError> {
    let batch = ProcessBatch::launch(count, |tag| workload.run(&tag))?;
    Ok(batch.wait())
}
