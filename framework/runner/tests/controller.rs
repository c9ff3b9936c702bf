use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ft_bench_runner::prelude::{
    Builder, ClusterManager, ClusterTopology, Collaborators, CommandError, Controller,
    ControllerOptions, DataCollector, EnvPreparer, ErrorKind, FtBenchResult, LoadGenHandle,
    LoadGenParams, LoadGenRelease, LoadGenerator, Phase, PreparedEnv, RunConfig, RunPhase,
    ShutdownHandle, TeardownPolicy,
};
use parking_lot::Mutex;
use pretty_assertions::assert_eq;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Call {
    StopStale,
    StopCluster,
    Build,
    RunCluster(ClusterTopology),
    Prepare,
    Launch(LoadGenParams),
    Terminate(Duration),
    Wait,
    Collect,
}

/// How the fake tools behave. Everything succeeds by default.
#[derive(Debug, Clone, Default)]
struct Script {
    stale_fails: bool,
    stop_fails: bool,
    build_fails: bool,
    /// The first `n` cluster launches fail.
    cluster_run_failures: u32,
    never_ready: bool,
    /// The first `n` environment preparations fail.
    prepare_failures: u32,
    launch_fails: bool,
    collect_fails: bool,
    /// The load generator keeps running until it is terminated.
    load_gen_hangs: bool,
}

#[derive(Clone)]
struct FakeTools {
    script: Arc<Script>,
    calls: Arc<Mutex<Vec<Call>>>,
}

impl FakeTools {
    fn new(script: Script) -> Self {
        Self {
            script: Arc::new(script),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn record(&self, call: Call) {
        self.calls.lock().push(call);
    }

    fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.calls.lock().iter().filter(|c| pred(c)).count()
    }

    fn collaborators(&self) -> Collaborators {
        Collaborators {
            builder: Box::new(self.clone()),
            cluster: Box::new(self.clone()),
            env: Box::new(self.clone()),
            load_generator: Box::new(self.clone()),
            collector: Box::new(self.clone()),
        }
    }
}

fn command_failed(program: &str, stderr_tail: &str) -> anyhow::Error {
    CommandError {
        program: program.to_string(),
        code: Some(1),
        stderr_tail: stderr_tail.to_string(),
    }
    .into()
}

#[async_trait]
impl Builder for FakeTools {
    async fn build(&self) -> FtBenchResult<PathBuf> {
        self.record(Call::Build);
        if self.script.build_fails {
            return Err(command_failed("make", "error: could not compile `neard`"));
        }
        Ok(PathBuf::from("/nearcore/target/release"))
    }
}

#[async_trait]
impl ClusterManager for FakeTools {
    async fn stop(&self) -> FtBenchResult<()> {
        self.record(Call::StopCluster);
        if self.script.stop_fails {
            return Err(command_failed("nearup", "no localnet running"));
        }
        Ok(())
    }

    async fn run(&self, topology: &ClusterTopology) -> FtBenchResult<()> {
        let previous_runs = self.count(|c| matches!(c, Call::RunCluster(_)));
        self.record(Call::RunCluster(topology.clone()));
        if previous_runs < self.script.cluster_run_failures as usize {
            return Err(command_failed("nearup", "address already in use"));
        }
        Ok(())
    }

    async fn probe_ready(&self) -> FtBenchResult<bool> {
        Ok(!self.script.never_ready)
    }
}

#[async_trait]
impl EnvPreparer for FakeTools {
    async fn prepare(&self) -> FtBenchResult<PreparedEnv> {
        let previous = self.count(|c| *c == Call::Prepare);
        self.record(Call::Prepare);
        if previous < self.script.prepare_failures as usize {
            anyhow::bail!("pip install failed");
        }
        Ok(PreparedEnv {
            work_dir: PathBuf::from("/nearcore/pytest/tests/loadtest/locust"),
            venv_dir: PathBuf::from("/nearcore/pytest/tests/loadtest/locust/.venv"),
            locust_bin: PathBuf::from("/nearcore/pytest/tests/loadtest/locust/.venv/bin/locust"),
            funding_key: PathBuf::from("/home/alice/.near/localnet/node0/validator_key.json"),
        })
    }
}

#[async_trait]
impl LoadGenerator for FakeTools {
    async fn stop_stale(&self) -> FtBenchResult<usize> {
        self.record(Call::StopStale);
        if self.script.stale_fails {
            anyhow::bail!("Failed to list processes");
        }
        Ok(0)
    }

    async fn launch(
        &self,
        _env: &PreparedEnv,
        params: &LoadGenParams,
    ) -> FtBenchResult<Box<dyn LoadGenHandle>> {
        self.record(Call::Launch(params.clone()));
        if self.script.launch_fails {
            anyhow::bail!("Failed to spawn locust");
        }
        Ok(Box::new(FakeHandle {
            tools: self.clone(),
        }))
    }
}

#[async_trait]
impl DataCollector for FakeTools {
    async fn collect(&self) -> FtBenchResult<()> {
        self.record(Call::Collect);
        if self.script.collect_fails {
            return Err(command_failed("python3", "Traceback: connection refused"));
        }
        Ok(())
    }
}

struct FakeHandle {
    tools: FakeTools,
}

#[async_trait]
impl LoadGenHandle for FakeHandle {
    fn pid(&self) -> Option<u32> {
        Some(4242)
    }

    async fn terminate(&mut self, grace: Duration) -> FtBenchResult<()> {
        self.tools.record(Call::Terminate(grace));
        Ok(())
    }

    async fn wait(&mut self) -> FtBenchResult<Option<i32>> {
        self.tools.record(Call::Wait);
        if self.tools.script.load_gen_hangs {
            std::future::pending::<()>().await;
        }
        Ok(Some(0))
    }
}

fn sample_config() -> RunConfig {
    RunConfig::builder()
        .with_duration(Duration::from_secs(60))
        .with_user_count(100)
        .with_target_state("1G".parse().unwrap())
        .with_shard_count(1)
        .with_node_count(1)
        .with_ramp_up(Duration::from_secs(10))
        .with_funding_user("alice")
        .build()
        .unwrap()
}

fn test_options() -> ControllerOptions {
    ControllerOptions {
        no_progress: true,
        ..Default::default()
    }
}

fn controller(tools: &FakeTools, options: ControllerOptions) -> (Controller, ShutdownHandle) {
    let shutdown_handle = ShutdownHandle::new();
    let controller = Controller::new(tools.collaborators(), options, shutdown_handle.clone());
    (controller, shutdown_handle)
}

fn is_terminate(call: &Call) -> bool {
    matches!(call, Call::Terminate(_))
}

#[tokio::test(start_paused = true)]
async fn successful_run_visits_every_phase_in_order() {
    let tools = FakeTools::new(Script::default());
    let (controller, _) = controller(&tools, test_options());

    let result = controller.run(&sample_config()).await;

    assert!(result.is_success());
    assert_eq!(result.exit_code(), 0);
    assert_eq!(result.phase_reached, Phase::Collect);
    assert_eq!(result.final_state, RunPhase::Done);
    assert_eq!(result.visited(), Phase::ALL.to_vec());
    assert!(result.phases.iter().all(|record| record.attempts == 1));

    assert_eq!(
        tools.calls(),
        vec![
            Call::StopStale,
            Call::StopCluster,
            Call::Build,
            Call::RunCluster(ClusterTopology {
                node_count: 1,
                shard_count: 1,
                binary_path: PathBuf::from("/nearcore/target/release"),
            }),
            Call::Prepare,
            Call::Launch(LoadGenParams {
                rpc_addr: "127.0.0.1:3030".to_string(),
                workload_file: PathBuf::from("locustfiles/ft.py"),
                funding_key: PathBuf::from("/home/alice/.near/localnet/node0/validator_key.json"),
                duration: Duration::from_secs(60),
                user_count: 100,
                ramp_up: Duration::from_secs(10),
                process_count: 8,
                headless: true,
            }),
            Call::Collect,
            Call::Wait,
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn ramp_wait_is_ramp_up_plus_margin() {
    let tools = FakeTools::new(Script::default());
    let (controller, _) = controller(
        &tools,
        ControllerOptions {
            ramp_margin: Duration::from_secs(5),
            ..test_options()
        },
    );

    let result = controller.run(&sample_config()).await;

    let ramp_wait = result
        .phases
        .iter()
        .find(|record| record.phase == Phase::RampWait)
        .unwrap();
    assert!(ramp_wait.duration >= Duration::from_secs(15));
    assert!(ramp_wait.duration < Duration::from_secs(16));
}

#[tokio::test(start_paused = true)]
async fn cleanup_errors_do_not_fail_the_run() {
    let tools = FakeTools::new(Script {
        stale_fails: true,
        stop_fails: true,
        ..Default::default()
    });
    let (controller, _) = controller(&tools, test_options());

    let result = controller.run(&sample_config()).await;

    assert!(result.is_success());
    assert_eq!(result.visited(), Phase::ALL.to_vec());
}

#[tokio::test(start_paused = true)]
async fn build_failure_stops_the_run() {
    let tools = FakeTools::new(Script {
        build_fails: true,
        ..Default::default()
    });
    let (controller, _) = controller(
        &tools,
        ControllerOptions {
            retries: 3,
            ..test_options()
        },
    );

    let result = controller.run(&sample_config()).await;

    assert_eq!(result.error_kind(), Some(ErrorKind::BuildFailed));
    assert_eq!(result.exit_code(), 10);
    assert_eq!(result.phase_reached, Phase::Build);
    assert_eq!(result.final_state, RunPhase::Failed);
    assert_eq!(
        tools.calls(),
        vec![Call::StopStale, Call::StopCluster, Call::Build]
    );

    let err = result.error().unwrap();
    assert_eq!(
        err.stderr_tail.as_deref(),
        Some("error: could not compile `neard`")
    );
    assert!(err.report().contains("Error: BuildFailed"));
}

#[tokio::test(start_paused = true)]
async fn cluster_never_ready_fails_cluster_start() {
    let tools = FakeTools::new(Script {
        never_ready: true,
        ..Default::default()
    });
    let (controller, _) = controller(&tools, test_options());

    let result = controller.run(&sample_config()).await;

    assert_eq!(result.error_kind(), Some(ErrorKind::ClusterStartFailed));
    assert_eq!(result.exit_code(), 11);
    assert_eq!(result.phase_reached, Phase::ClusterStart);
    assert_eq!(
        result.error().unwrap().reason,
        "Cluster was not ready within 2m"
    );
    assert_eq!(tools.count(|c| matches!(c, Call::Launch(_))), 0);
    assert_eq!(tools.count(|c| *c == Call::Prepare), 0);
}

#[tokio::test(start_paused = true)]
async fn cluster_start_failure_never_launches_the_load_generator() {
    let tools = FakeTools::new(Script {
        cluster_run_failures: u32::MAX,
        ..Default::default()
    });
    let (controller, _) = controller(&tools, test_options());

    let result = controller.run(&sample_config()).await;

    assert_eq!(result.error_kind(), Some(ErrorKind::ClusterStartFailed));
    assert_eq!(
        result.error().unwrap().stderr_tail.as_deref(),
        Some("address already in use")
    );
    assert_eq!(tools.count(|c| matches!(c, Call::Launch(_))), 0);
    assert_eq!(tools.count(is_terminate), 0);
}

#[tokio::test(start_paused = true)]
async fn cluster_start_is_retried_after_stopping_the_cluster() {
    let tools = FakeTools::new(Script {
        cluster_run_failures: 1,
        ..Default::default()
    });
    let (controller, _) = controller(
        &tools,
        ControllerOptions {
            retries: 1,
            ..test_options()
        },
    );

    let result = controller.run(&sample_config()).await;

    assert!(result.is_success());
    let cluster_start = result
        .phases
        .iter()
        .find(|record| record.phase == Phase::ClusterStart)
        .unwrap();
    assert_eq!(cluster_start.attempts, 2);
    assert!(cluster_start.duration >= Duration::from_secs(5));

    let calls = tools.calls();
    let cluster_calls: Vec<&Call> = calls
        .iter()
        .skip_while(|c| **c != Call::Build)
        .skip(1)
        .take(3)
        .collect();
    assert!(matches!(cluster_calls[0], Call::RunCluster(_)));
    assert_eq!(*cluster_calls[1], Call::StopCluster);
    assert!(matches!(cluster_calls[2], Call::RunCluster(_)));
}

#[tokio::test(start_paused = true)]
async fn env_prepare_gives_up_after_retries() {
    let tools = FakeTools::new(Script {
        prepare_failures: 3,
        ..Default::default()
    });
    let (controller, _) = controller(
        &tools,
        ControllerOptions {
            retries: 2,
            ..test_options()
        },
    );

    let result = controller.run(&sample_config()).await;

    assert_eq!(result.error_kind(), Some(ErrorKind::EnvPrepareFailed));
    assert_eq!(result.exit_code(), 12);
    assert_eq!(tools.count(|c| *c == Call::Prepare), 3);
    assert_eq!(result.phases.last().unwrap().attempts, 3);
    assert_eq!(result.error().unwrap().reason, "pip install failed");
}

#[tokio::test(start_paused = true)]
async fn launch_failure_is_reported() {
    let tools = FakeTools::new(Script {
        launch_fails: true,
        ..Default::default()
    });
    let (controller, _) = controller(&tools, test_options());

    let result = controller.run(&sample_config()).await;

    assert_eq!(result.error_kind(), Some(ErrorKind::LoadGenLaunchFailed));
    assert_eq!(result.exit_code(), 13);
    assert_eq!(result.phase_reached, Phase::LoadGenLaunch);
    assert_eq!(tools.count(|c| *c == Call::Collect), 0);
    assert_eq!(tools.count(is_terminate), 0);
}

#[tokio::test(start_paused = true)]
async fn collect_failure_terminates_the_load_generator() {
    let tools = FakeTools::new(Script {
        collect_fails: true,
        ..Default::default()
    });
    let (controller, _) = controller(&tools, test_options());

    let result = controller.run(&sample_config()).await;

    assert_eq!(result.error_kind(), Some(ErrorKind::CollectionFailed));
    assert_eq!(result.exit_code(), 14);
    assert_eq!(
        tools.calls().last(),
        Some(&Call::Terminate(Duration::from_secs(10)))
    );
    assert_eq!(tools.count(|c| *c == Call::Wait), 0);
}

#[tokio::test(start_paused = true)]
async fn stop_cluster_policy_stops_the_cluster_on_failure() {
    let tools = FakeTools::new(Script {
        collect_fails: true,
        ..Default::default()
    });
    let (controller, _) = controller(
        &tools,
        ControllerOptions {
            teardown_policy: TeardownPolicy::StopCluster,
            ..test_options()
        },
    );

    controller.run(&sample_config()).await;

    let calls = tools.calls();
    assert_eq!(
        &calls[calls.len() - 2..],
        &[Call::Terminate(Duration::from_secs(10)), Call::StopCluster]
    );
}

#[tokio::test(start_paused = true)]
async fn keep_cluster_policy_leaves_the_cluster_running() {
    let tools = FakeTools::new(Script {
        collect_fails: true,
        ..Default::default()
    });
    let (controller, _) = controller(&tools, test_options());

    controller.run(&sample_config()).await;

    // Only the cleanup stop.
    assert_eq!(tools.count(|c| *c == Call::StopCluster), 1);
}

#[tokio::test(start_paused = true)]
async fn stop_cluster_policy_ignores_a_cluster_that_never_started() {
    let tools = FakeTools::new(Script {
        build_fails: true,
        ..Default::default()
    });
    let (controller, _) = controller(
        &tools,
        ControllerOptions {
            teardown_policy: TeardownPolicy::StopCluster,
            ..test_options()
        },
    );

    controller.run(&sample_config()).await;

    assert_eq!(tools.count(|c| *c == Call::StopCluster), 1);
}

#[tokio::test(start_paused = true)]
async fn cancel_during_ramp_wait_terminates_the_load_generator_once() {
    let tools = FakeTools::new(Script::default());
    let (controller, shutdown_handle) = controller(&tools, test_options());

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(20)).await;
        shutdown_handle.shutdown();
        // A second signal must not trigger a second teardown.
        shutdown_handle.shutdown();
    });

    let result = controller.run(&sample_config()).await;

    assert_eq!(result.error_kind(), Some(ErrorKind::Cancelled));
    assert_eq!(result.exit_code(), 130);
    assert_eq!(result.phase_reached, Phase::RampWait);
    assert_eq!(tools.count(is_terminate), 1);
    assert_eq!(tools.count(|c| *c == Call::Collect), 0);
}

#[tokio::test(start_paused = true)]
async fn cancel_before_the_run_invokes_nothing() {
    let tools = FakeTools::new(Script::default());
    let (controller, shutdown_handle) = controller(&tools, test_options());
    shutdown_handle.shutdown();

    let result = controller.run(&sample_config()).await;

    assert_eq!(result.error_kind(), Some(ErrorKind::Cancelled));
    assert_eq!(result.phase_reached, Phase::Cleanup);
    assert_eq!(tools.calls(), vec![]);
}

#[tokio::test(start_paused = true)]
async fn detached_load_generator_is_left_running() {
    let tools = FakeTools::new(Script {
        load_gen_hangs: true,
        ..Default::default()
    });
    let (controller, _) = controller(
        &tools,
        ControllerOptions {
            load_gen_release: LoadGenRelease::Detach,
            ..test_options()
        },
    );

    let result = controller.run(&sample_config()).await;

    assert!(result.is_success());
    assert_eq!(tools.calls().last(), Some(&Call::Collect));
}

#[tokio::test(start_paused = true)]
async fn overrunning_load_generator_is_terminated_after_success() {
    let tools = FakeTools::new(Script {
        load_gen_hangs: true,
        ..Default::default()
    });
    let (controller, _) = controller(&tools, test_options());

    let result = controller.run(&sample_config()).await;

    assert!(result.is_success());
    let calls = tools.calls();
    assert_eq!(
        &calls[calls.len() - 2..],
        &[Call::Wait, Call::Terminate(Duration::from_secs(10))]
    );
}

#[tokio::test(start_paused = true)]
async fn longest_possible_duration_does_not_overflow() {
    let tools = FakeTools::new(Script::default());
    let (controller, _) = controller(&tools, test_options());
    let config = RunConfig::builder()
        .with_duration(Duration::from_secs(u64::MAX))
        .with_user_count(100)
        .with_target_state("1G".parse().unwrap())
        .with_shard_count(1)
        .with_node_count(1)
        .with_ramp_up(Duration::from_secs(10))
        .with_funding_user("alice")
        .build()
        .unwrap();

    let result = controller.run(&config).await;

    assert!(result.is_success());
    assert_eq!(tools.calls().last(), Some(&Call::Wait));
}
