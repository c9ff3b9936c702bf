//! The benchmark run controller.
//!
//! Runs the phases of a benchmark strictly in order, racing each against the shutdown signal.
//! The first failure skips the remaining phases and runs teardown, which stops the load generator
//! and, depending on [TeardownPolicy], the cluster.

use std::future::Future;
use std::time::Duration;

use anyhow::anyhow;
use chrono::{DateTime, Utc};
use ft_bench_core::prelude::{ErrorKind, Phase, RunPhase, ShutdownHandle, ShutdownSignalError};
use tokio::time::Instant;

use crate::collaborators::{
    ClusterTopology, Collaborators, LoadGenHandle, LoadGenParams, PreparedEnv,
};
use crate::config::{ControllerOptions, LoadGenRelease, RunConfig, TeardownPolicy};
use crate::process::CommandError;
use crate::progress::RampProgress;
use crate::types::FtBenchResult;

/// Lower bound on the readiness poll interval, so a zero interval cannot starve the timeout.
const MIN_READY_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// A failed phase, classified by the controller.
#[derive(Debug, Clone, PartialEq, Eq, derive_more::Display, derive_more::Error)]
#[display("{phase} failed ({kind}): {reason}")]
pub struct PhaseError {
    pub phase: Phase,
    pub kind: ErrorKind,
    pub reason: String,
    /// The stderr tail of the subprocess that failed, if a subprocess failed.
    pub stderr_tail: Option<String>,
}

impl PhaseError {
    fn from_error(phase: Phase, err: anyhow::Error) -> Self {
        let kind = if is_cancellation(&err) {
            ErrorKind::Cancelled
        } else {
            // Cleanup and RampWait only fail when cancelled.
            phase.failure_kind().unwrap_or(ErrorKind::Cancelled)
        };
        let stderr_tail = err
            .chain()
            .find_map(|e| e.downcast_ref::<CommandError>())
            .map(|e| e.stderr_tail.clone())
            .filter(|tail| !tail.is_empty());

        Self {
            phase,
            kind,
            reason: format!("{err:#}"),
            stderr_tail,
        }
    }

    /// Report for the operator naming the phase, the error kind and the stderr tail of the
    /// failing subprocess.
    pub fn report(&self) -> String {
        let mut report = format!(
            "Phase: {}\nError: {}\nReason: {}",
            self.phase, self.kind, self.reason
        );
        if let Some(tail) = &self.stderr_tail {
            report.push_str("\nStderr (last lines):\n");
            report.push_str(tail);
        }
        report
    }
}

fn is_cancellation(err: &anyhow::Error) -> bool {
    err.chain().any(|e| e.is::<ShutdownSignalError>())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failed(PhaseError),
}

/// Timing of a phase that was entered.
#[derive(Debug, Clone)]
pub struct PhaseRecord {
    pub phase: Phase,
    pub started_at: DateTime<Utc>,
    pub duration: Duration,
    pub attempts: u32,
}

#[derive(Debug, Clone)]
pub struct RunResult {
    pub outcome: Outcome,
    /// The last phase that was entered.
    pub phase_reached: Phase,
    /// Either [RunPhase::Done] or [RunPhase::Failed].
    pub final_state: RunPhase,
    pub phases: Vec<PhaseRecord>,
}

impl RunResult {
    pub fn is_success(&self) -> bool {
        self.outcome == Outcome::Success
    }

    pub fn error(&self) -> Option<&PhaseError> {
        match &self.outcome {
            Outcome::Success => None,
            Outcome::Failed(err) => Some(err),
        }
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.error().map(|err| err.kind)
    }

    /// 0 on success, otherwise the exit code of the error kind.
    pub fn exit_code(&self) -> i32 {
        self.error_kind().map(ErrorKind::exit_code).unwrap_or(0)
    }

    /// The phases that were entered, in order.
    pub fn visited(&self) -> Vec<Phase> {
        self.phases.iter().map(|record| record.phase).collect()
    }
}

/// Mutable state of a single run, owned by [Controller::run].
struct RunState {
    current: RunPhase,
    phase_reached: Option<Phase>,
    load_gen: Option<Box<dyn LoadGenHandle>>,
    load_gen_launched_at: Option<Instant>,
    phases: Vec<PhaseRecord>,
}

impl RunState {
    fn new() -> Self {
        Self {
            current: RunPhase::Idle,
            phase_reached: None,
            load_gen: None,
            load_gen_launched_at: None,
            phases: Vec::new(),
        }
    }

    fn enter(&mut self, phase: Phase) {
        log::info!("== {phase} ==");
        self.current = phase.run_phase();
        self.phase_reached = Some(phase);
    }

    fn finish(mut self, outcome: Outcome) -> RunResult {
        if let Some(handle) = self.load_gen.take() {
            log::warn!(
                "Load generator (PID {:?}) was not released before the run finished",
                handle.pid()
            );
        }

        self.current = match outcome {
            Outcome::Success => RunPhase::Done,
            Outcome::Failed(_) => RunPhase::Failed,
        };
        log::debug!("Run state: {}", self.current);

        RunResult {
            outcome,
            phase_reached: self.phase_reached.unwrap_or(Phase::Cleanup),
            final_state: self.current,
            phases: self.phases,
        }
    }
}

pub struct Controller {
    collaborators: Collaborators,
    options: ControllerOptions,
    shutdown_handle: ShutdownHandle,
}

impl Controller {
    pub fn new(
        collaborators: Collaborators,
        options: ControllerOptions,
        shutdown_handle: ShutdownHandle,
    ) -> Self {
        Self {
            collaborators,
            options,
            shutdown_handle,
        }
    }

    /// Run the benchmark described by `config`.
    ///
    /// Never returns an error: failures, including cancellation, are reported in the
    /// [RunResult] after teardown has run.
    pub async fn run(&self, config: &RunConfig) -> RunResult {
        log::info!(
            "Running FT benchmark: duration {}, {} users, state {}, {} shard(s), {} node(s), ramp-up {}, funding user '{}'",
            humantime::format_duration(config.duration()),
            config.user_count(),
            config.target_state(),
            config.shard_count(),
            config.node_count(),
            humantime::format_duration(config.ramp_up()),
            config.funding_user()
        );

        let mut state = RunState::new();
        let outcome = match self.run_phases(config, &mut state).await {
            Ok(()) => {
                self.release_load_gen(config, &mut state).await;
                log::info!("Benchmark run succeeded");
                Outcome::Success
            }
            Err(err) => {
                log::error!("{err}");
                if let Some(tail) = &err.stderr_tail {
                    log::error!("Last lines of stderr:\n{tail}");
                }
                self.teardown(&mut state).await;
                Outcome::Failed(err)
            }
        };

        state.finish(outcome)
    }

    async fn run_phases(&self, config: &RunConfig, state: &mut RunState) -> Result<(), PhaseError> {
        self.execute(state, Phase::Cleanup, move |_| self.cleanup())
            .await?;

        let binary_path = self
            .execute(state, Phase::Build, move |_| {
                self.collaborators.builder.build()
            })
            .await?;

        let topology = ClusterTopology {
            node_count: config.node_count(),
            shard_count: config.shard_count(),
            binary_path,
        };
        let topology = &topology;
        self.execute(state, Phase::ClusterStart, move |attempt| {
            self.start_cluster(topology, attempt)
        })
        .await?;

        let env = self
            .execute(state, Phase::EnvPrepare, move |_| {
                self.collaborators.env.prepare()
            })
            .await?;

        let params = self.load_gen_params(config, &env);
        let (env, params) = (&env, &params);
        let handle = self
            .execute(state, Phase::LoadGenLaunch, move |_| {
                self.collaborators.load_generator.launch(env, params)
            })
            .await?;
        log::info!("Load generator started with PID {:?}", handle.pid());
        state.load_gen = Some(handle);
        state.load_gen_launched_at = Some(Instant::now());

        let wait = self.options.ramp_wait(config.ramp_up());
        self.execute(state, Phase::RampWait, move |_| self.ramp_wait(wait))
            .await?;

        self.execute(state, Phase::Collect, move |_| {
            self.collaborators.collector.collect()
        })
        .await
    }

    /// Run a phase, retrying transient phases up to the configured number of times.
    ///
    /// `attempt_fn` is called with the attempt number, starting at 1.
    async fn execute<T, F, Fut>(
        &self,
        state: &mut RunState,
        phase: Phase,
        mut attempt_fn: F,
    ) -> Result<T, PhaseError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = FtBenchResult<T>>,
    {
        state.enter(phase);
        let started_at = Utc::now();
        let start = Instant::now();
        let max_attempts = self.options.max_attempts(phase.is_transient());

        let mut attempt = 1;
        let result = loop {
            match self.cancellable(attempt_fn(attempt)).await {
                Ok(value) => break Ok(value),
                Err(e) if attempt < max_attempts && !is_cancellation(&e) => {
                    log::warn!(
                        "{phase} attempt {attempt}/{max_attempts} failed, retrying in {}: {e:#}",
                        humantime::format_duration(self.options.retry_delay)
                    );
                    let delay = self
                        .cancellable(async {
                            tokio::time::sleep(self.options.retry_delay).await;
                            Ok(())
                        })
                        .await;
                    if let Err(e) = delay {
                        break Err(e);
                    }
                    attempt += 1;
                }
                Err(e) => break Err(e),
            }
        };

        let duration = start.elapsed();
        state.phases.push(PhaseRecord {
            phase,
            started_at,
            duration,
            attempts: attempt,
        });

        match result {
            Ok(value) => {
                log::info!("{phase} finished in {duration:.1?}");
                Ok(value)
            }
            Err(e) => Err(PhaseError::from_error(phase, e)),
        }
    }

    /// Race `fut` against the shutdown signal.
    async fn cancellable<T>(
        &self,
        fut: impl Future<Output = FtBenchResult<T>>,
    ) -> FtBenchResult<T> {
        let mut shutdown_listener = self.shutdown_handle.new_listener();
        if shutdown_listener.should_shutdown() {
            return Err(anyhow!(ShutdownSignalError::default()));
        }

        tokio::select! {
            result = fut => result,
            _ = shutdown_listener.wait_for_shutdown() => {
                Err(anyhow!(ShutdownSignalError::default()))
            },
        }
    }

    async fn cleanup(&self) -> FtBenchResult<()> {
        match self.collaborators.load_generator.stop_stale().await {
            Ok(0) => log::info!("No stale load generator processes found"),
            Ok(count) => log::info!("Killed {count} stale load generator process(es)"),
            Err(e) => log::warn!("Failed to stop stale load generator processes: {e:#}"),
        }

        if let Err(e) = self.collaborators.cluster.stop().await {
            log::warn!("Failed to stop a previous cluster, continuing: {e:#}");
        }

        Ok(())
    }

    async fn start_cluster(&self, topology: &ClusterTopology, attempt: u32) -> FtBenchResult<()> {
        if attempt > 1 {
            if let Err(e) = self.collaborators.cluster.stop().await {
                log::warn!("Failed to stop the cluster before retrying: {e:#}");
            }
        }

        self.collaborators.cluster.run(topology).await?;
        self.wait_for_cluster_ready().await
    }

    async fn wait_for_cluster_ready(&self) -> FtBenchResult<()> {
        let timeout = self.options.cluster_ready_timeout;
        let poll_interval = self.options.ready_poll_interval.max(MIN_READY_POLL_INTERVAL);

        let poll = async {
            let mut probes = 0u32;
            loop {
                probes += 1;
                match self.collaborators.cluster.probe_ready().await {
                    Ok(true) => {
                        log::info!("Cluster ready after {probes} probe(s)");
                        return;
                    }
                    Ok(false) => log::debug!("Cluster not ready yet"),
                    Err(e) => log::debug!("Cluster readiness probe failed: {e:#}"),
                }
                tokio::time::sleep(poll_interval).await;
            }
        };

        tokio::time::timeout(timeout, poll).await.map_err(|_| {
            anyhow!(
                "Cluster was not ready within {}",
                humantime::format_duration(timeout)
            )
        })
    }

    fn load_gen_params(&self, config: &RunConfig, env: &PreparedEnv) -> LoadGenParams {
        LoadGenParams {
            rpc_addr: self.options.rpc_addr.clone(),
            workload_file: self.options.workload_file.clone(),
            funding_key: env.funding_key.clone(),
            duration: config.duration(),
            user_count: config.user_count(),
            ramp_up: config.ramp_up(),
            process_count: self.options.process_count,
            headless: true,
        }
    }

    async fn ramp_wait(&self, wait: Duration) -> FtBenchResult<()> {
        log::info!(
            "Waiting {} for the load generator to ramp up",
            humantime::format_duration(wait)
        );
        let _progress = (!self.options.no_progress).then(|| RampProgress::start(wait));
        tokio::time::sleep(wait).await;
        Ok(())
    }

    async fn teardown(&self, state: &mut RunState) {
        log::info!("Tearing down");

        if let Some(handle) = state.load_gen.take() {
            self.terminate_load_gen(handle).await;
        }

        let cluster_started = state
            .phase_reached
            .is_some_and(|phase| phase >= Phase::ClusterStart);
        match self.options.teardown_policy {
            TeardownPolicy::StopCluster if cluster_started => {
                log::info!("Stopping the cluster");
                if let Err(e) = self.collaborators.cluster.stop().await {
                    log::error!("Failed to stop the cluster: {e:#}");
                }
            }
            TeardownPolicy::KeepCluster if cluster_started => {
                log::info!("Leaving the cluster running for inspection");
            }
            _ => log::debug!("Cluster was never started, nothing to do"),
        }
    }

    async fn terminate_load_gen(&self, mut handle: Box<dyn LoadGenHandle>) {
        log::info!("Terminating the load generator (PID {:?})", handle.pid());
        if let Err(e) = handle.terminate(self.options.termination_grace).await {
            log::error!("Failed to terminate the load generator: {e:#}");
        }
    }

    /// Release the load generator after a successful run, see [LoadGenRelease].
    async fn release_load_gen(&self, config: &RunConfig, state: &mut RunState) {
        let Some(mut handle) = state.load_gen.take() else {
            return;
        };

        match self.options.load_gen_release {
            LoadGenRelease::Detach => {
                log::info!(
                    "Leaving the load generator running in the background (PID {:?})",
                    handle.pid()
                );
            }
            LoadGenRelease::Wait => {
                let elapsed = state
                    .load_gen_launched_at
                    .map(|launched_at| launched_at.elapsed())
                    .unwrap_or_default();
                let budget = config
                    .duration()
                    .saturating_sub(elapsed)
                    .saturating_add(self.options.termination_grace);
                log::info!(
                    "Waiting up to {} for the load generator to finish",
                    humantime::format_duration(budget)
                );

                let waited = self
                    .cancellable(async { Ok(tokio::time::timeout(budget, handle.wait()).await) })
                    .await;
                match waited {
                    Ok(Ok(Ok(code))) => log::info!("Load generator exited with code {code:?}"),
                    Ok(Ok(Err(e))) => log::warn!("Failed to wait for the load generator: {e:#}"),
                    Ok(Err(_)) => {
                        log::warn!("Load generator is still running past the test duration");
                        self.terminate_load_gen(handle).await;
                    }
                    Err(_) => {
                        log::warn!("Cancelled while waiting for the load generator");
                        self.terminate_load_gen(handle).await;
                    }
                }
            }
        }
    }
}
