//! Harness driver: validates the command line, runs one batch, reports the outcome.

use std::io::Write;
use std::io::{self};
use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use anyhow::Result;
use anyhow::anyhow;
use clap::ArgAction;
use clap::Parser;
use clap::ValueEnum;
use nix::unistd::Pid;
use tracing::error;
use tracing::info;
use tracing::warn;

use crate::error::HarnessError;
use crate::error::KernelError;
use crate::spawner::ProcessBatch;
use crate::spawner::ProcessCount;
use crate::spawner::ThreadBatch;
use crate::spawner::ThreadCount;
use crate::spawner::WorkerOutcome;
use crate::workloads::DEFAULT_INTENSITY;
use crate::workloads::KernelParams;
use crate::workloads::WorkerTag;
use crate::workloads::Workload;
use crate::workloads::WorkloadKind;
use crate::workloads::io::DEFAULT_PREFIX;

const MIB: usize = 1024 * 1024;

/// How workers are realized.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum Model {
    /// One forked replica per worker; no memory is shared.
    #[value(alias = "proc", alias = "fork")]
    Process,

    /// One thread per worker, sharing the coordinator's address space.
    #[value(alias = "threads")]
    Thread,
}

/// Command line arguments for the spawnbench binary.
#[derive(Parser, Debug)]
#[command(
    name = "spawnbench",
    version,
    about = "Concurrent workload harness",
    long_about = "Concurrent workload harness.\n\n\
                  This program spawns a batch of concurrent workers, either as forked \
                  processes or as threads, and runs one synthetic kernel (cpu, mem or io) in \
                  each. The coordinator prints its own pid before spawning and each worker \
                  prints its pid or tid once it starts, so an external observer can \
                  correlate them."
)]
pub struct Args {
    /// Concurrency model.
    #[arg(value_enum)]
    pub model: Model,

    /// Kernel to run: cpu, mem or io.
    #[arg(value_parser = parse_kind)]
    pub kind: WorkloadKind,

    /// Number of workers.
    pub count: usize,

    /// Outer iterations (cpu), sweeps (mem) or 4 KiB blocks written (io).
    #[arg(long, env = "SPAWNBENCH_INTENSITY", default_value_t = DEFAULT_INTENSITY)]
    pub intensity: u32,

    /// Memory kernel buffer size in MiB.
    #[arg(long, default_value_t = 256)]
    pub mem_size_mib: usize,

    /// Seconds the memory kernel keeps its buffer after sweeping.
    #[arg(long, default_value_t = 0)]
    pub hold_secs: u64,

    /// Directory for io scratch files (default: the system temp dir).
    #[arg(long, env = "SPAWNBENCH_SCRATCH_DIR")]
    pub scratch_dir: Option<PathBuf>,

    /// Milliseconds to pause after printing the coordinator pid.
    #[arg(long, default_value_t = 0)]
    pub settle_ms: u64,

    /// The coordinator runs the kernel too, alongside its workers.
    #[arg(long, action = ArgAction::SetTrue)]
    pub coordinator_runs: bool,

    /// Exit non-zero if any worker fails.
    #[arg(long, action = ArgAction::SetTrue)]
    pub propagate_failures: bool,
}

fn parse_kind(s: &str) -> Result<WorkloadKind, HarnessError> {
    s.parse()
}

impl Args {
    /// The workload described by the arguments.
    pub fn workload(&self) -> Result<Workload, HarnessError> {
        let memory_size = self.mem_size_mib.checked_mul(MIB).ok_or_else(|| {
            HarnessError::Configuration(format!("--mem-size-mib {} is too large", self.mem_size_mib))
        })?;
        let params = KernelParams {
            intensity: self.intensity,
            memory_size,
            hold: Duration::from_secs(self.hold_secs),
            scratch_dir: self.scratch_dir.clone().unwrap_or_else(std::env::temp_dir),
            file_prefix: DEFAULT_PREFIX.to_string(),
        };
        Ok(Workload::new(self.kind, params))
    }
}

/// The result of one batch.
#[derive(Debug)]
pub struct BatchReport {
    pub model: Model,
    pub kind: WorkloadKind,

    /// Exactly one outcome per spawned worker.
    pub outcomes: Vec<WorkerOutcome>,

    /// The coordinator's own kernel result, when it ran one.
    pub coordinator: Option<Result<(), KernelError>>,
}

impl BatchReport {
    /// Number of workers (and coordinator, if it ran) that failed.
    pub fn failures(&self) -> usize {
        let workers = self.outcomes.iter().filter(|o| !o.is_success()).count();
        let coordinator = matches!(self.coordinator, Some(Err(_))) as usize;
        workers + coordinator
    }

    fn log(&self) {
        for outcome in &self.outcomes {
            if let Err(e) = &outcome.result {
                error!(worker = %outcome.worker, "worker failed: {e}");
            }
        }
        if let Some(Err(e)) = &self.coordinator {
            error!("coordinator kernel failed: {e}");
        }
        info!(
            model = ?self.model,
            kind = %self.kind,
            workers = self.outcomes.len(),
            failed = self.failures(),
            "batch complete"
        );
    }
}

/// Print the coordinator's pid, then give observers `settle` to pick it up.
fn announce_coordinator(settle: Duration) {
    println!("COORDINATOR_PID: {}", Pid::this());
    let _ = io::stdout().flush();
    if !settle.is_zero() {
        thread::sleep(settle);
    }
}

/// Validate `args` and run exactly one batch on the selected backend.
///
/// # Returns
///
/// The batch report once every worker has finished. Configuration and spawn failures
/// are returned as errors before (or instead of) any outcome.
pub fn run(args: &Args) -> Result<BatchReport> {
    let workload = workload_for(args)?;
    let settle = Duration::from_millis(args.settle_ms);
    let (outcomes, coordinator) = match args.model {
        Model::Process => {
            let count = ProcessCount::new(args.count)?;
            announce_coordinator(settle);
            let batch = ProcessBatch::launch(count, |tag| workload.run(&tag))?;
            let coordinator = args.coordinator_runs.then(|| {
                workload.run(&WorkerTag::Process {
                    pid: Pid::this(),
                    index: count.get(),
                })
            });
            (batch.wait(), coordinator)
        }
        Model::Thread => {
            let count = ThreadCount::new(args.count)?;
            announce_coordinator(settle);
            let shared = workload.clone();
            let batch = ThreadBatch::launch(count, move |tag| shared.run(&tag))?;
            let coordinator = args.coordinator_runs.then(|| {
                workload.run(&WorkerTag::Thread {
                    pid: Pid::this(),
                    index: count.get(),
                })
            });
            (batch.wait(), coordinator)
        }
    };

    let report = BatchReport {
        model: args.model,
        kind: args.kind,
        outcomes,
        coordinator,
    };
    report.log();
    Ok(report)
}

fn workload_for(args: &Args) -> Result<Workload> {
    let workload = args.workload()?;
    if workload.kind == WorkloadKind::Io && !workload.params.scratch_dir.is_dir() {
        warn!(
            dir = %workload.params.scratch_dir.display(),
            "scratch directory does not exist, io workers will fail"
        );
    }
    Ok(workload)
}

/// Run a batch and turn propagated worker failures into an error.
pub fn run_to_completion(args: &Args) -> Result<()> {
    let report = run(args)?;
    let failed = report.failures();
    if args.propagate_failures && failed > 0 {
        return Err(anyhow!(
            "{failed} of {} workers failed",
            report.outcomes.len() + report.coordinator.is_some() as usize
        ));
    }
    Ok(())
}
