use crate::cli::FtBenchmarkCli;
use clap::Parser;

/// Initialise the CLI and logging for the FT benchmark runner.
///
/// Logs at `info` unless `RUST_LOG` says otherwise.
pub fn init() -> FtBenchmarkCli {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    FtBenchmarkCli::parse()
}
