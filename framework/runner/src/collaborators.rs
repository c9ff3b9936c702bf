//! The external tools the controller drives, abstracted so that the controller only deals with
//! their exit status, readiness and process handles.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;

use crate::types::FtBenchResult;

/// The localnet layout requested from the [ClusterManager].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterTopology {
    pub node_count: u32,
    pub shard_count: u32,
    /// Directory containing the built `neard` binary.
    pub binary_path: PathBuf,
}

/// The load generator environment resolved by the [EnvPreparer].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedEnv {
    /// Directory the load generator runs in, workload files are relative to it.
    pub work_dir: PathBuf,
    /// The isolated Python environment holding the load generator and its dependencies.
    pub venv_dir: PathBuf,
    pub locust_bin: PathBuf,
    /// Key of the account that funds the accounts created during the test.
    pub funding_key: PathBuf,
}

/// Parameters passed to the load generator on launch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadGenParams {
    /// The cluster's RPC endpoint as `host:port`.
    pub rpc_addr: String,
    pub workload_file: PathBuf,
    pub funding_key: PathBuf,
    pub duration: Duration,
    pub user_count: u32,
    pub ramp_up: Duration,
    pub process_count: u32,
    pub headless: bool,
}

#[async_trait]
pub trait Builder: Send + Sync {
    /// Build the node binary and return the directory that contains it.
    async fn build(&self) -> FtBenchResult<PathBuf>;
}

#[async_trait]
pub trait ClusterManager: Send + Sync {
    /// Stop any running localnet. Succeeds if none is running.
    async fn stop(&self) -> FtBenchResult<()>;

    /// Launch the localnet, replacing any previous topology.
    async fn run(&self, topology: &ClusterTopology) -> FtBenchResult<()>;

    /// Point in time check whether the cluster serves RPC requests.
    async fn probe_ready(&self) -> FtBenchResult<bool>;
}

#[async_trait]
pub trait EnvPreparer: Send + Sync {
    /// Make sure the load generator and its dependencies are installed and resolve the funding
    /// key.
    async fn prepare(&self) -> FtBenchResult<PreparedEnv>;
}

#[async_trait]
pub trait LoadGenerator: Send + Sync {
    /// Kill load generator processes left behind by a previous run. Returns how many were found,
    /// finding none is not an error.
    async fn stop_stale(&self) -> FtBenchResult<usize>;

    /// Spawn the load generator in the background. Only the spawn itself is checked, the
    /// returned handle is used to stop or wait for the process later.
    async fn launch(
        &self,
        env: &PreparedEnv,
        params: &LoadGenParams,
    ) -> FtBenchResult<Box<dyn LoadGenHandle>>;
}

/// Handle to a launched load generator process.
#[async_trait]
pub trait LoadGenHandle: Send {
    fn pid(&self) -> Option<u32>;

    /// Ask the process to stop with `SIGTERM`, killing it if it is still running after `grace`.
    async fn terminate(&mut self, grace: Duration) -> FtBenchResult<()>;

    /// Wait for the process to exit and return its exit code, `None` if killed by a signal.
    async fn wait(&mut self) -> FtBenchResult<Option<i32>>;
}

#[async_trait]
pub trait DataCollector: Send + Sync {
    /// Collect and send the benchmark data.
    async fn collect(&self) -> FtBenchResult<()>;
}

/// Everything the controller needs to run a benchmark.
pub struct Collaborators {
    pub builder: Box<dyn Builder>,
    pub cluster: Box<dyn ClusterManager>,
    pub env: Box<dyn EnvPreparer>,
    pub load_generator: Box<dyn LoadGenerator>,
    pub collector: Box<dyn DataCollector>,
}
