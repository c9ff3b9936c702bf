use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;

use crate::config::{
    parse_duration, parse_target_state, ControllerOptions, LoadGenRelease, RunConfig,
    TargetState, TeardownPolicy,
};
use crate::lock::DEFAULT_LOCK_FILE;
use crate::types::FtBenchResult;

#[derive(Debug, Parser)]
#[command(name = "ft-benchmark", about, long_about = None)]
pub struct FtBenchmarkCli {
    /// How long the load test runs, e.g. `1h`, `30m`, `45s` or bare seconds
    #[arg(value_parser = parse_duration)]
    pub duration: Duration,

    /// The number of simulated users
    pub user_count: u32,

    /// The state size to reach, a number optionally followed by `K`, `M` or `G`
    #[arg(value_parser = parse_target_state)]
    pub target_state: TargetState,

    /// The number of shards in the localnet
    pub shard_count: u32,

    /// The number of nodes in the localnet
    pub node_count: u32,

    /// The window over which users are spawned, e.g. `10s`
    #[arg(value_parser = parse_duration)]
    pub ramp_up: Duration,

    /// The user running the benchmark. Recorded in the lock file and the run summary
    pub funding_user: String,

    /// The nearcore checkout to build and run the benchmark from
    #[arg(long, env = "FT_REPO_DIR", default_value = ".")]
    pub repo_dir: PathBuf,

    /// Where the `neard` binary ends up after the build, relative to the repository
    #[arg(long, default_value = "target/release")]
    pub binary_path: PathBuf,

    /// The localnet home directory. Defaults to `~/.near/localnet`
    #[arg(long, env = "FT_LOCALNET_HOME")]
    pub localnet_home: Option<PathBuf>,

    /// The RPC address of the localnet that the load generator targets
    #[arg(long, default_value = "127.0.0.1:3030")]
    pub rpc_addr: String,

    /// The locust file, relative to the locust directory
    #[arg(long, default_value = "locustfiles/ft.py")]
    pub workload_file: PathBuf,

    /// Extra attempts for starting the cluster and preparing the environment
    #[arg(long, default_value_t = 0)]
    pub retries: u32,

    /// Delay between attempts
    #[arg(long, value_parser = parse_duration, default_value = "5s")]
    pub retry_delay: Duration,

    /// How long to wait for the cluster to become ready
    #[arg(long, value_parser = parse_duration, default_value = "120s")]
    pub cluster_ready_timeout: Duration,

    /// Added to the ramp-up to get the time waited before collecting data
    #[arg(long, value_parser = parse_duration, default_value = "30s")]
    pub ramp_margin: Duration,

    /// What to do with the cluster when the run fails or is cancelled
    #[arg(long, value_enum, default_value_t = TeardownPolicy::KeepCluster)]
    pub teardown: TeardownPolicy,

    /// Leave the load generator running after a successful run instead of waiting for it
    #[arg(long, default_value = "false")]
    pub detach_load_gen: bool,

    /// The lock file that stops two benchmarks running on the same machine
    #[arg(long, default_value = DEFAULT_LOCK_FILE)]
    pub lock_file: PathBuf,

    /// Append a JSON summary of the run to this file
    #[arg(long)]
    pub run_summary: Option<PathBuf>,

    /// Do not show a progress bar on the CLI.
    ///
    /// This is recommended for CI/CD environments where the progress bar isn't being looked at by anyone and is just adding noise to the logs.
    #[arg(long, default_value = "false")]
    pub no_progress: bool,
}

impl FtBenchmarkCli {
    pub fn run_config(&self) -> FtBenchResult<RunConfig> {
        RunConfig::builder()
            .with_duration(self.duration)
            .with_user_count(self.user_count)
            .with_target_state(self.target_state.clone())
            .with_shard_count(self.shard_count)
            .with_node_count(self.node_count)
            .with_ramp_up(self.ramp_up)
            .with_funding_user(self.funding_user.clone())
            .build()
    }

    pub fn controller_options(&self) -> ControllerOptions {
        ControllerOptions {
            retries: self.retries,
            retry_delay: self.retry_delay,
            cluster_ready_timeout: self.cluster_ready_timeout,
            ramp_margin: self.ramp_margin,
            teardown_policy: self.teardown,
            load_gen_release: if self.detach_load_gen {
                LoadGenRelease::Detach
            } else {
                LoadGenRelease::Wait
            },
            rpc_addr: self.rpc_addr.clone(),
            workload_file: self.workload_file.clone(),
            no_progress: self.no_progress,
            ..Default::default()
        }
    }

    pub fn localnet_home(&self) -> FtBenchResult<PathBuf> {
        match &self.localnet_home {
            Some(home) => Ok(home.clone()),
            None => Ok(dirs::home_dir()
                .context("Could not find the home directory, set --localnet-home")?
                .join(".near")
                .join("localnet")),
        }
    }
}
