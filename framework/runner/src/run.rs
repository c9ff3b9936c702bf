use std::path::Path;

use anyhow::Context;
use chrono::{DateTime, Utc};
use ft_bench_summary_model::{append_run_summary, PhaseTiming, RunSummary};

use crate::cli::FtBenchmarkCli;
use crate::collaborators::Collaborators;
use crate::config::RunConfig;
use crate::controller::{Controller, RunResult};
use crate::data_sender::DataSender;
use crate::localnet::{MakeBuilder, NearupCluster};
use crate::lock::BenchmarkLock;
use crate::locust::{Locust, LocustEnv};
use crate::shutdown::start_shutdown_listener;
use crate::types::FtBenchResult;

/// Run the FT benchmark described by the command line against a nearcore checkout.
///
/// Returns an error if the benchmark could not be started at all. Failures of the run itself are
/// reported in the [RunResult].
pub fn run(cli: FtBenchmarkCli) -> FtBenchResult<RunResult> {
    let config = cli.run_config()?;
    let localnet_home = cli.localnet_home()?;
    let options = cli.controller_options();

    let _lock = BenchmarkLock::acquire(&cli.lock_file, config.funding_user())?;

    let runtime = tokio::runtime::Runtime::new().context("Failed to create Tokio runtime")?;
    let shutdown_handle = start_shutdown_listener(&runtime)?;

    let collaborators = Collaborators {
        builder: Box::new(MakeBuilder::new(&cli.repo_dir, &cli.binary_path)),
        cluster: Box::new(NearupCluster::new(
            &cli.repo_dir,
            &localnet_home,
            &options.rpc_addr,
        )?),
        env: Box::new(LocustEnv::new(&cli.repo_dir, &localnet_home)),
        load_generator: Box::new(Locust),
        collector: Box::new(DataSender::new(&cli.repo_dir)),
    };
    let controller = Controller::new(collaborators, options, shutdown_handle);

    let run_id = nanoid::nanoid!();
    log::info!("Starting run {run_id} from '{}'", cli.repo_dir.display());
    let started_at = Utc::now();

    let result = runtime.block_on(controller.run(&config));

    if let Some(path) = &cli.run_summary {
        let summary = run_summary(run_id, started_at, &config, &result);
        write_run_summary(&summary, path);
    }

    Ok(result)
}

fn run_summary(
    run_id: String,
    started_at: DateTime<Utc>,
    config: &RunConfig,
    result: &RunResult,
) -> RunSummary {
    let mut summary = RunSummary {
        run_id,
        target_state: config.target_state().to_string(),
        funding_user: config.funding_user().to_string(),
        started_at: started_at.timestamp(),
        duration_s: config.duration().as_secs(),
        ramp_up_s: config.ramp_up().as_secs(),
        user_count: config.user_count(),
        shard_count: config.shard_count(),
        node_count: config.node_count(),
        outcome: result
            .error_kind()
            .map(|kind| kind.to_string())
            .unwrap_or_else(|| "Success".to_string()),
        failure_reason: result.error().map(|err| err.reason.clone()),
        phase_reached: result.phase_reached.to_string(),
        phases: result
            .phases
            .iter()
            .map(|record| PhaseTiming {
                phase: record.phase.to_string(),
                started_at_ms: record.started_at.timestamp_millis(),
                duration_ms: u64::try_from(record.duration.as_millis()).unwrap_or(u64::MAX),
                attempts: record.attempts,
            })
            .collect(),
        runner_version: env!("CARGO_PKG_VERSION").to_string(),
        config_fingerprint: String::new(),
    };
    summary.config_fingerprint = summary.fingerprint();
    summary
}

fn write_run_summary(summary: &RunSummary, path: &Path) {
    match append_run_summary(summary, path) {
        Ok(()) => log::info!("Run summary written to '{}'", path.display()),
        // The run has already finished, so its outcome stands.
        Err(e) => log::error!(
            "Failed to write run summary to '{}': {e:?}",
            path.display()
        ),
    }
}
