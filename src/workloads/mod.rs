//! Workload kernels run by each worker.
//!
//! This module provides the three synthetic kernels (CPU, memory, IO) together with
//! the selector and parameters that choose and scale them. Kernels are independent of
//! each other and of the concurrency model that runs them.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use nix::unistd::Pid;

use crate::error::HarnessError;
use crate::error::KernelError;

pub mod cpu;
pub mod io;
pub mod memory;

/// Default kernel intensity.
pub const DEFAULT_INTENSITY: u32 = 5 * 1000;

/// Which kernel a worker runs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum WorkloadKind {
    Cpu,
    Memory,
    Io,
}

impl WorkloadKind {
    /// All recognized kinds.
    pub const ALL: [WorkloadKind; 3] = [
        WorkloadKind::Cpu,
        WorkloadKind::Memory,
        WorkloadKind::Io,
    ];

    /// The selector accepted on the command line.
    pub fn selector(self) -> &'static str {
        match self {
            WorkloadKind::Cpu => "cpu",
            WorkloadKind::Memory => "mem",
            WorkloadKind::Io => "io",
        }
    }
}

impl fmt::Display for WorkloadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.selector())
    }
}

impl FromStr for WorkloadKind {
    type Err = HarnessError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cpu" => Ok(WorkloadKind::Cpu),
            "mem" | "memory" => Ok(WorkloadKind::Memory),
            "io" => Ok(WorkloadKind::Io),
            other => Err(HarnessError::Configuration(format!(
                "unrecognized workload '{other}', expected one of cpu, mem, io"
            ))),
        }
    }
}

/// Identity of one worker, as seen by the kernel it runs.
///
/// The IO kernel derives its scratch file name from this, so two live workers never
/// carry the same tag.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum WorkerTag {
    /// A replicated process, identified by its own pid. `index` is its launch
    /// position, copied into the replica when it was forked.
    Process { pid: Pid, index: usize },

    /// A thread of process `pid`, identified by its spawn index.
    Thread { pid: Pid, index: usize },
}

impl WorkerTag {
    /// The tag as it appears in scratch file names.
    pub fn file_stem(&self) -> String {
        match self {
            WorkerTag::Process { pid, .. } => format!("p{pid}"),
            WorkerTag::Thread { pid, index } => format!("t{pid}-{index}"),
        }
    }
}

impl fmt::Display for WorkerTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerTag::Process { pid, .. } => write!(f, "pid={pid}"),
            WorkerTag::Thread { pid, index } => write!(f, "pid={pid} worker={index}"),
        }
    }
}

/// Parameters that scale the kernels.
#[derive(Clone, Debug)]
pub struct KernelParams {
    /// Outer iterations (CPU), sweeps (memory), or blocks written (IO).
    pub intensity: u32,

    /// Size of the memory kernel's buffer in bytes.
    pub memory_size: usize,

    /// How long the memory kernel keeps its buffer after the last sweep.
    pub hold: Duration,

    /// Directory for IO scratch files.
    pub scratch_dir: PathBuf,

    /// File name prefix for IO scratch files.
    pub file_prefix: String,
}

impl Default for KernelParams {
    fn default() -> Self {
        Self {
            intensity: DEFAULT_INTENSITY,
            memory_size: memory::DEFAULT_SIZE,
            hold: Duration::ZERO,
            scratch_dir: std::env::temp_dir(),
            file_prefix: io::DEFAULT_PREFIX.to_string(),
        }
    }
}

/// A selected kernel with its parameters.
#[derive(Clone, Debug)]
pub struct Workload {
    pub kind: WorkloadKind,
    pub params: KernelParams,
}

impl Workload {
    pub fn new(kind: WorkloadKind, params: KernelParams) -> Self {
        Self { kind, params }
    }

    /// The scratch file the IO kernel uses for `tag`.
    pub fn scratch_path(&self, tag: &WorkerTag) -> PathBuf {
        io::scratch_path(&self.params.scratch_dir, &self.params.file_prefix, tag)
    }

    /// Run exactly one kernel on behalf of `tag`, then print its completion line.
    pub fn run(&self, tag: &WorkerTag) -> Result<(), KernelError> {
        let params = &self.params;
        match self.kind {
            WorkloadKind::Cpu => {
                cpu::run(params.intensity);
                println!("cpu done ({tag})");
            }
            WorkloadKind::Memory => {
                memory::run(params.memory_size, params.intensity, params.hold)?;
                println!("mem done ({tag})");
            }
            WorkloadKind::Io => {
                let path = self.scratch_path(tag);
                io::run(&path, params.intensity)?;
                println!("io done ({tag}) -> {}", path.display());
            }
        }
        Ok(())
    }
}
