//! Builds `neard` and manages the localnet through `nearup`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use tokio::process::Command;

use crate::collaborators::{Builder, ClusterManager, ClusterTopology};
use crate::process::run_logged;
use crate::tool_binary::{tool_path, Tool};
use crate::types::FtBenchResult;

/// Timeout of a single readiness probe request.
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Builds `neard` with `make neard` in a nearcore checkout.
#[derive(Debug, Clone)]
pub struct MakeBuilder {
    repo_dir: PathBuf,
    binary_path: PathBuf,
}

impl MakeBuilder {
    /// `binary_path` is where the build leaves `neard`, relative paths are resolved against the
    /// repository.
    pub fn new(repo_dir: impl Into<PathBuf>, binary_path: impl Into<PathBuf>) -> Self {
        let repo_dir = repo_dir.into();
        let binary_path = repo_dir.join(binary_path.into());
        Self {
            repo_dir,
            binary_path,
        }
    }
}

#[async_trait]
impl Builder for MakeBuilder {
    async fn build(&self) -> FtBenchResult<PathBuf> {
        let make = tool_path(Tool::Make)?;

        log::info!("Building neard in '{}'", self.repo_dir.display());
        run_logged(make_command(&make, &self.repo_dir), "make").await?;

        Ok(self.binary_path.clone())
    }
}

/// Runs a localnet with `nearup` and probes its RPC `/status` endpoint for readiness.
#[derive(Debug, Clone)]
pub struct NearupCluster {
    repo_dir: PathBuf,
    localnet_home: PathBuf,
    status_url: String,
    client: reqwest::Client,
}

impl NearupCluster {
    pub fn new(
        repo_dir: impl Into<PathBuf>,
        localnet_home: impl Into<PathBuf>,
        rpc_addr: &str,
    ) -> FtBenchResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(PROBE_TIMEOUT)
            .build()
            .context("Failed to create the readiness probe client")?;

        Ok(Self {
            repo_dir: repo_dir.into(),
            localnet_home: localnet_home.into(),
            status_url: format!("http://{rpc_addr}/status"),
            client,
        })
    }
}

fn make_command(make: &Path, repo_dir: &Path) -> Command {
    let mut cmd = Command::new(make);
    cmd.current_dir(repo_dir).arg("neard");
    cmd
}

fn nearup_stop_command(nearup: &Path, repo_dir: &Path) -> Command {
    let mut cmd = Command::new(nearup);
    cmd.current_dir(repo_dir).arg("stop");
    cmd
}

/// `nearup run localnet` with `--override`, so that a previous topology is replaced.
fn nearup_run_command(
    nearup: &Path,
    repo_dir: &Path,
    localnet_home: &Path,
    topology: &ClusterTopology,
) -> Command {
    let mut cmd = Command::new(nearup);
    cmd.current_dir(repo_dir)
        .arg("run")
        .arg("localnet")
        .arg("--home")
        .arg(localnet_home)
        .arg("--binary-path")
        .arg(&topology.binary_path)
        .arg("--num-nodes")
        .arg(topology.node_count.to_string())
        .arg("--num-shards")
        .arg(topology.shard_count.to_string())
        .arg("--override");
    cmd
}

#[async_trait]
impl ClusterManager for NearupCluster {
    async fn stop(&self) -> FtBenchResult<()> {
        let nearup = tool_path(Tool::Nearup)?;
        run_logged(nearup_stop_command(&nearup, &self.repo_dir), "nearup").await
    }

    async fn run(&self, topology: &ClusterTopology) -> FtBenchResult<()> {
        log::info!(
            "Starting localnet with {} node(s) and {} shard(s)",
            topology.node_count,
            topology.shard_count
        );

        let nearup = tool_path(Tool::Nearup)?;
        let cmd = nearup_run_command(&nearup, &self.repo_dir, &self.localnet_home, topology);
        run_logged(cmd, "nearup").await
    }

    async fn probe_ready(&self) -> FtBenchResult<bool> {
        let response = self.client.get(&self.status_url).send().await?;
        log::trace!("{} responded with {}", self.status_url, response.status());
        Ok(response.status().is_success())
    }
}
