//! IO-bound write-and-sync kernel.

use std::fs::OpenOptions;
use std::io::Write;
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;
use std::path::PathBuf;

use crate::error::KernelError;
use crate::workloads::WorkerTag;

/// Size of each write.
pub const BLOCK_SIZE: usize = 4096;

/// Default scratch file prefix.
pub const DEFAULT_PREFIX: &str = "spawnbench_io";

/// Scratch file path for `tag` under `dir`.
pub fn scratch_path(dir: &Path, prefix: &str, tag: &WorkerTag) -> PathBuf {
    dir.join(format!("{prefix}_{}.bin", tag.file_stem()))
}

/// Truncate `path` and write `intensity` blocks to it, syncing after every block.
///
/// # Returns
///
/// The number of bytes written, or `KernelError::Io` naming the failed step. The file
/// is closed on every path.
pub fn run(path: &Path, intensity: u32) -> Result<u64, KernelError> {
    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o644)
        .open(path)
        .map_err(|e| KernelError::io("open", path, e))?;

    let block = [b'A'; BLOCK_SIZE];
    for _ in 0..intensity {
        file.write_all(&block)
            .map_err(|e| KernelError::io("write", path, e))?;
        file.sync_all()
            .map_err(|e| KernelError::io("fsync", path, e))?;
    }
    Ok(u64::from(intensity) * BLOCK_SIZE as u64)
}
