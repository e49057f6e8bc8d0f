//! End-to-end runs of the spawnbench binary.

use std::fs;
use std::path::Path;
use std::process::Command;
use std::process::Output;

use anyhow::Result;

fn spawnbench(args: &[&str]) -> Result<Output> {
    Ok(Command::new(env!("CARGO_BIN_EXE_spawnbench"))
        .args(args)
        .env("RUST_LOG", "info")
        .env_remove("SPAWNBENCH_INTENSITY")
        .env_remove("SPAWNBENCH_SCRATCH_DIR")
        .output()?)
}

fn lines_starting(output: &Output, prefix: &str) -> usize {
    String::from_utf8_lossy(&output.stdout)
        .lines()
        .filter(|line| line.starts_with(prefix))
        .count()
}

fn scratch_files(dir: &Path) -> Result<Vec<u64>> {
    let mut sizes = Vec::new();
    for entry in fs::read_dir(dir)? {
        sizes.push(entry?.metadata()?.len());
    }
    Ok(sizes)
}

#[test]
fn process_cpu_batch_reports_every_worker() -> Result<()> {
    let output = spawnbench(&["process", "cpu", "4", "--intensity", "1"])?;
    assert_eq!(output.status.code(), Some(0));
    assert_eq!(lines_starting(&output, "COORDINATOR_PID: "), 1);
    assert_eq!(lines_starting(&output, "WORKER_PID: "), 4);
    assert_eq!(lines_starting(&output, "cpu done "), 4);

    let stdout = String::from_utf8_lossy(&output.stdout);
    let first = stdout.lines().next().unwrap_or_default();
    assert!(first.starts_with("COORDINATOR_PID: "), "first line was {first:?}");
    Ok(())
}

#[test]
fn single_worker_goes_through_spawn_path() -> Result<()> {
    for model in ["process", "thread"] {
        let output = spawnbench(&[model, "cpu", "1", "--intensity", "0"])?;
        assert_eq!(output.status.code(), Some(0), "{model}");
        let workers =
            lines_starting(&output, "WORKER_PID: ") + lines_starting(&output, "WORKER_TID: ");
        assert_eq!(workers, 1, "{model}");
    }
    Ok(())
}

#[test]
fn count_above_maximum_is_rejected() -> Result<()> {
    for (model, count) in [("process", "11"), ("thread", "257"), ("process", "0")] {
        let output = spawnbench(&[model, "cpu", count, "--intensity", "0"])?;
        assert_eq!(output.status.code(), Some(1), "{model} {count}");
        assert_eq!(lines_starting(&output, "COORDINATOR_PID: "), 0);
        assert_eq!(lines_starting(&output, "WORKER_"), 0);
        let stderr = String::from_utf8_lossy(&output.stderr);
        assert!(stderr.contains("configuration error"), "{stderr}");
    }
    Ok(())
}

#[test]
fn bad_usage_exits_with_one() -> Result<()> {
    for args in [
        &["process", "gpu", "2"][..],
        &["process", "cpu"][..],
        &[][..],
        &["process", "cpu", "-3"][..],
    ] {
        let output = spawnbench(args)?;
        assert_eq!(output.status.code(), Some(1), "{args:?}");
        assert!(!output.stderr.is_empty());
        assert_eq!(lines_starting(&output, "WORKER_"), 0);
    }
    Ok(())
}

#[test]
fn help_exits_with_zero() -> Result<()> {
    let output = spawnbench(&["--help"])?;
    assert_eq!(output.status.code(), Some(0));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Concurrent workload harness"), "{stdout}");
    assert!(stdout.contains("Usage: spawnbench"), "{stdout}");
    Ok(())
}

#[test]
fn thread_io_workers_write_distinct_full_files() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let scratch = dir.path().to_string_lossy().into_owned();
    let output = spawnbench(&["thread", "io", "5", "--intensity", "3", "--scratch-dir", &scratch])?;
    assert_eq!(output.status.code(), Some(0));
    assert_eq!(lines_starting(&output, "WORKER_TID: "), 5);
    assert_eq!(lines_starting(&output, "io done "), 5);

    let sizes = scratch_files(dir.path())?;
    assert_eq!(sizes.len(), 5);
    assert!(sizes.iter().all(|&size| size == 3 * 4096), "{sizes:?}");
    Ok(())
}

#[test]
fn process_io_workers_write_distinct_full_files() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let scratch = dir.path().to_string_lossy().into_owned();
    let output = spawnbench(&["process", "io", "3", "--intensity", "2", "--scratch-dir", &scratch])?;
    assert_eq!(output.status.code(), Some(0));
    let sizes = scratch_files(dir.path())?;
    assert_eq!(sizes, vec![2 * 4096; 3]);
    Ok(())
}

#[test]
fn worker_failures_are_local_unless_propagated() -> Result<()> {
    let base = ["process", "mem", "3", "--intensity", "1", "--mem-size-mib", "0"];

    let output = spawnbench(&base)?;
    assert_eq!(output.status.code(), Some(0));
    assert_eq!(lines_starting(&output, "WORKER_PID: "), 3);
    assert_eq!(lines_starting(&output, "mem done "), 0);
    assert!(String::from_utf8_lossy(&output.stderr).contains("failed to allocate"));

    let mut propagated = base.to_vec();
    propagated.push("--propagate-failures");
    let output = spawnbench(&propagated)?;
    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("3 of 3 workers failed"));
    Ok(())
}

#[test]
fn repeated_runs_have_same_shape() -> Result<()> {
    let args = ["thread", "mem", "2", "--intensity", "1", "--mem-size-mib", "1"];
    let first = spawnbench(&args)?;
    let second = spawnbench(&args)?;
    assert_eq!(first.status.code(), Some(0));
    assert_eq!(second.status.code(), Some(0));
    assert_eq!(
        lines_starting(&first, "mem done "),
        lines_starting(&second, "mem done ")
    );
    assert_eq!(lines_starting(&first, "WORKER_TID: "), 2);
    Ok(())
}

#[test]
fn coordinator_runs_alongside_replicas() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let scratch = dir.path().to_string_lossy().into_owned();
    let output = spawnbench(&[
        "process",
        "io",
        "2",
        "--intensity",
        "1",
        "--scratch-dir",
        &scratch,
        "--coordinator-runs",
    ])?;
    assert_eq!(output.status.code(), Some(0));
    assert_eq!(lines_starting(&output, "WORKER_PID: "), 2);
    assert_eq!(lines_starting(&output, "io done "), 3);
    assert_eq!(scratch_files(dir.path())?.len(), 3);
    Ok(())
}
