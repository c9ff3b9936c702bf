use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{anyhow, bail};

use crate::types::FtBenchResult;

/// Parse a time span: bare integer seconds (`5`) or a human readable span (`45s`, `30m`, `1h`).
pub fn parse_duration(s: &str) -> FtBenchResult<Duration> {
    let s = s.trim();
    if !s.is_empty() && s.chars().all(|c| c.is_ascii_digit()) {
        return Ok(Duration::from_secs(s.parse()?));
    }

    humantime::parse_duration(s).map_err(|e| {
        anyhow!("Invalid time format: '{s}' ({e}). Must be a number optionally followed by 'h', 'm' or 's'.")
    })
}

/// The benchmark state size, a number optionally followed by `K`, `M` or `G`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetState(String);

impl TargetState {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for TargetState {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits_end = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
        let (digits, suffix) = s.split_at(digits_end);
        if digits.is_empty() || !matches!(suffix, "" | "K" | "M" | "G") {
            bail!("Invalid state format: '{s}'. Must be a number optionally followed by 'K', 'M', or 'G'.");
        }
        Ok(Self(s.to_string()))
    }
}

impl fmt::Display for TargetState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

pub fn parse_target_state(s: &str) -> FtBenchResult<TargetState> {
    s.parse()
}

/// The parameters of a benchmark run. Immutable once built, see [RunConfigBuilder].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunConfig {
    duration: Duration,
    user_count: u32,
    target_state: TargetState,
    shard_count: u32,
    node_count: u32,
    ramp_up: Duration,
    funding_user: String,
}

impl RunConfig {
    pub fn builder() -> RunConfigBuilder {
        RunConfigBuilder::default()
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    pub fn user_count(&self) -> u32 {
        self.user_count
    }

    pub fn target_state(&self) -> &TargetState {
        &self.target_state
    }

    pub fn shard_count(&self) -> u32 {
        self.shard_count
    }

    pub fn node_count(&self) -> u32 {
        self.node_count
    }

    pub fn ramp_up(&self) -> Duration {
        self.ramp_up
    }

    pub fn funding_user(&self) -> &str {
        &self.funding_user
    }
}

/// Used to build a [RunConfig], which checks the invariants between the parameters in
/// [RunConfigBuilder::build].
#[derive(Debug, Clone, Default)]
pub struct RunConfigBuilder {
    duration: Option<Duration>,
    user_count: Option<u32>,
    target_state: Option<TargetState>,
    shard_count: Option<u32>,
    node_count: Option<u32>,
    ramp_up: Option<Duration>,
    funding_user: Option<String>,
}

impl RunConfigBuilder {
    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = Some(duration);
        self
    }

    pub fn with_user_count(mut self, user_count: u32) -> Self {
        self.user_count = Some(user_count);
        self
    }

    pub fn with_target_state(mut self, target_state: TargetState) -> Self {
        self.target_state = Some(target_state);
        self
    }

    pub fn with_shard_count(mut self, shard_count: u32) -> Self {
        self.shard_count = Some(shard_count);
        self
    }

    pub fn with_node_count(mut self, node_count: u32) -> Self {
        self.node_count = Some(node_count);
        self
    }

    pub fn with_ramp_up(mut self, ramp_up: Duration) -> Self {
        self.ramp_up = Some(ramp_up);
        self
    }

    pub fn with_funding_user(mut self, funding_user: impl Into<String>) -> Self {
        self.funding_user = Some(funding_user.into());
        self
    }

    /// Build the [RunConfig].
    ///
    /// Returns an error if a parameter is missing, the duration is zero, a duration is not a whole
    /// number of seconds, a count is zero, the funding user is empty or the ramp-up is longer than
    /// the test itself.
    pub fn build(self) -> FtBenchResult<RunConfig> {
        let duration = self.duration.ok_or(anyhow!("Duration not set"))?;
        let user_count = self.user_count.ok_or(anyhow!("User count not set"))?;
        let target_state = self.target_state.ok_or(anyhow!("Target state not set"))?;
        let shard_count = self.shard_count.ok_or(anyhow!("Shard count not set"))?;
        let node_count = self.node_count.ok_or(anyhow!("Node count not set"))?;
        let ramp_up = self.ramp_up.ok_or(anyhow!("Ramp-up not set"))?;
        let funding_user = self.funding_user.ok_or(anyhow!("Funding user not set"))?;

        if duration.is_zero() {
            bail!("Duration must be greater than 0");
        }
        for (name, value) in [("Duration", duration), ("Ramp-up", ramp_up)] {
            if value.subsec_nanos() != 0 {
                bail!(
                    "{name} ({}) must be a whole number of seconds",
                    humantime::format_duration(value)
                );
            }
        }
        if user_count == 0 {
            bail!("User count must be greater than 0");
        }
        if shard_count == 0 {
            bail!("Shard count must be greater than 0");
        }
        if node_count == 0 {
            bail!("Node count must be greater than 0");
        }
        if funding_user.trim().is_empty() {
            bail!("Funding user must not be empty");
        }
        if ramp_up > duration {
            bail!(
                "Ramp-up ({}) must not be longer than the duration ({})",
                humantime::format_duration(ramp_up),
                humantime::format_duration(duration)
            );
        }

        Ok(RunConfig {
            duration,
            user_count,
            target_state,
            shard_count,
            node_count,
            ramp_up,
            funding_user,
        })
    }
}

/// What to do with the localnet when a run fails or is cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum TeardownPolicy {
    /// Leave the cluster running so that an operator can inspect it.
    #[default]
    KeepCluster,
    /// Stop the cluster as part of teardown.
    StopCluster,
}

/// What to do with the load generator once data collection has succeeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoadGenRelease {
    /// Wait for the load generator to exit, terminating it if it runs past the configured
    /// duration plus the termination grace period.
    #[default]
    Wait,
    /// Leave the load generator running on its own.
    Detach,
}

/// Policy knobs of the controller, as opposed to the parameters of the benchmark itself.
#[derive(Debug, Clone)]
pub struct ControllerOptions {
    /// Extra attempts for the transient phases, `ClusterStart` and `EnvPrepare`.
    pub retries: u32,
    pub retry_delay: Duration,
    pub cluster_ready_timeout: Duration,
    pub ready_poll_interval: Duration,
    /// Added to the ramp-up to get the ramp wait.
    pub ramp_margin: Duration,
    pub teardown_policy: TeardownPolicy,
    pub load_gen_release: LoadGenRelease,
    /// How long the load generator gets to exit after `SIGTERM` before it is killed.
    pub termination_grace: Duration,
    /// The cluster's RPC endpoint targeted by the load generator, as `host:port`.
    pub rpc_addr: String,
    /// The locust file, relative to the locust working directory.
    pub workload_file: PathBuf,
    pub process_count: u32,
    pub no_progress: bool,
}

impl Default for ControllerOptions {
    fn default() -> Self {
        Self {
            retries: 0,
            retry_delay: Duration::from_secs(5),
            cluster_ready_timeout: Duration::from_secs(120),
            ready_poll_interval: Duration::from_secs(1),
            ramp_margin: Duration::from_secs(30),
            teardown_policy: TeardownPolicy::default(),
            load_gen_release: LoadGenRelease::default(),
            termination_grace: Duration::from_secs(10),
            rpc_addr: "127.0.0.1:3030".to_string(),
            workload_file: PathBuf::from("locustfiles/ft.py"),
            process_count: 8,
            no_progress: false,
        }
    }
}

impl ControllerOptions {
    /// How long the controller waits for the load generator to ramp up.
    pub fn ramp_wait(&self, ramp_up: Duration) -> Duration {
        ramp_up.saturating_add(self.ramp_margin)
    }

    /// Total attempts allowed for a phase.
    pub fn max_attempts(&self, transient: bool) -> u32 {
        if transient {
            self.retries.saturating_add(1)
        } else {
            1
        }
    }
}
