use anyhow::Result;
use clap::Parser;
use spawnbench::driver::Args;
use spawnbench::driver::run_to_completion;
use tracing_subscriber::EnvFilter;

/// Usage errors exit with status 1; `--help` and `--version` exit with 0.
fn parse_args() -> Args {
    match Args::try_parse() {
        Ok(args) => args,
        Err(e) if !e.use_stderr() => e.exit(),
        Err(e) => {
            let _ = e.print();
            std::process::exit(1);
        }
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn main() -> Result<()> {
    // Parse command line arguments.
    let args = parse_args();
    init_logging();

    // Any error here is printed by the runtime and exits with status 1.
    run_to_completion(&args)
}
