mod cli;
mod collaborators;
mod config;
mod controller;
mod data_sender;
mod init;
mod localnet;
mod lock;
mod locust;
mod process;
mod progress;
mod run;
mod shutdown;
mod tool_binary;
mod types;

pub mod prelude {
    pub use crate::cli::FtBenchmarkCli;
    pub use crate::collaborators::{
        Builder, ClusterManager, ClusterTopology, Collaborators, DataCollector, EnvPreparer,
        LoadGenHandle, LoadGenParams, LoadGenerator, PreparedEnv,
    };
    pub use crate::config::{
        parse_duration, ControllerOptions, LoadGenRelease, RunConfig, RunConfigBuilder,
        TargetState, TeardownPolicy,
    };
    pub use crate::controller::{Controller, Outcome, PhaseError, PhaseRecord, RunResult};
    pub use crate::init::init;
    pub use crate::lock::BenchmarkLock;
    pub use crate::process::CommandError;
    pub use crate::run::run;
    pub use crate::types::FtBenchResult;
    pub use ft_bench_core::prelude::*;
}
