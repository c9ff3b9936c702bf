use serde::{Deserialize, Serialize};
use sha3::Digest;
use std::io::{BufRead, Read, Write};
use std::path::Path;

/// Timing of a single pipeline phase
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PhaseTiming {
    /// Name of the phase, e.g. `ClusterStart`
    pub phase: String,
    /// Unix timestamp in milliseconds when the phase started
    pub started_at_ms: i64,
    /// How long the phase ran for, including all attempts
    pub duration_ms: u64,
    /// Number of attempts, greater than 1 only for retried phases
    pub attempts: u32,
}

/// Summary of a benchmark run
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunSummary {
    /// The unique run id
    ///
    /// Chosen by the runner. Unique for each run.
    pub run_id: String,
    /// The benchmark state size that was targeted, e.g. `1G`
    pub target_state: String,
    /// The user that funded and owned the run
    pub funding_user: String,
    /// The time the run started
    ///
    /// This is a Unix timestamp in seconds.
    pub started_at: i64,
    /// The configured load test duration, in seconds
    pub duration_s: u64,
    /// The configured ramp-up window, in seconds
    pub ramp_up_s: u64,
    /// The number of simulated users
    pub user_count: u32,
    /// The number of shards in the localnet
    pub shard_count: u32,
    /// The number of nodes in the localnet
    pub node_count: u32,
    /// `Success` or the error kind of the first failure
    pub outcome: String,
    /// Human-readable reason for a failure
    pub failure_reason: Option<String>,
    /// The last pipeline phase that was entered
    pub phase_reached: String,
    /// Timings of every phase that was entered, in order
    pub phases: Vec<PhaseTiming>,
    /// The version of the benchmark runner that produced this summary
    pub runner_version: String,
    /// See [RunSummary::fingerprint]
    #[serde(default)]
    pub config_fingerprint: String,
}

impl RunSummary {
    pub fn is_success(&self) -> bool {
        self.outcome == "Success"
    }

    /// Compute a fingerprint for this run summary
    ///
    /// The fingerprint identifies the configuration that was benchmarked so that results of runs
    /// with identical configuration can be grouped. It uses the
    ///     - Target state
    ///     - Duration and ramp-up
    ///     - User, shard and node counts
    ///     - Runner version
    ///
    /// The fingerprint is computed using [sha3::Sha3_256]. The stored `config_fingerprint` is not
    /// part of the input.
    pub fn fingerprint(&self) -> String {
        let mut hasher = sha3::Sha3_256::new();
        Digest::update(&mut hasher, self.target_state.as_bytes());
        Digest::update(&mut hasher, self.duration_s.to_le_bytes());
        Digest::update(&mut hasher, self.ramp_up_s.to_le_bytes());
        Digest::update(&mut hasher, self.user_count.to_le_bytes());
        Digest::update(&mut hasher, self.shard_count.to_le_bytes());
        Digest::update(&mut hasher, self.node_count.to_le_bytes());
        Digest::update(&mut hasher, self.runner_version.as_bytes());

        format!("{:x}", hasher.finalize())
    }
}

/// Append the run summary to a file
///
/// The summary will be serialized to JSON and output as a single line followed by a newline. The
/// recommended file extension is `.jsonl`.
pub fn append_run_summary(run_summary: &RunSummary, path: &Path) -> anyhow::Result<()> {
    let mut file = std::fs::OpenOptions::new()
        .append(true)
        .create(true)
        .open(path)?;
    store_run_summary(run_summary, &mut file)?;
    file.write_all(b"\n")?;
    Ok(())
}

/// Serialize the run summary to a writer
pub fn store_run_summary<W: Write>(run_summary: &RunSummary, writer: &mut W) -> anyhow::Result<()> {
    serde_json::to_writer(writer, run_summary)?;
    Ok(())
}

/// Load a run summary from a reader
pub fn load_run_summary<R: Read>(reader: R) -> anyhow::Result<RunSummary> {
    let reader = std::io::BufReader::new(reader);
    let run_summary: RunSummary = serde_json::from_reader(reader)?;
    Ok(run_summary)
}

/// Load run summaries from a file
///
/// The file should contain one JSON object per line. This is the format produced by
/// [append_run_summary]. Blank lines are skipped.
pub fn load_summary_runs(path: &Path) -> anyhow::Result<Vec<RunSummary>> {
    let file = std::fs::File::open(path)?;
    let reader = std::io::BufReader::new(file);
    let mut runs = Vec::new();
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let run: RunSummary = serde_json::from_str(&line)?;
        runs.push(run);
    }
    Ok(runs)
}
