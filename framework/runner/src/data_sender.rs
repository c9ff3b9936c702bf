use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::process::Command;

use crate::collaborators::DataCollector;
use crate::process::run_logged;
use crate::tool_binary::{tool_path, Tool};
use crate::types::FtBenchResult;

/// The data sender script, relative to the nearcore checkout.
pub const DATA_SENDER_SCRIPT: &str = "scripts/ft-benchmark-data-sender.py";

/// Runs the FT benchmark data sender from a nearcore checkout.
#[derive(Debug, Clone)]
pub struct DataSender {
    repo_dir: PathBuf,
}

impl DataSender {
    pub fn new(repo_dir: impl Into<PathBuf>) -> Self {
        Self {
            repo_dir: repo_dir.into(),
        }
    }
}

fn data_sender_command(python: &Path, repo_dir: &Path) -> Command {
    let mut cmd = Command::new(python);
    cmd.current_dir(repo_dir).arg(DATA_SENDER_SCRIPT);
    cmd
}

#[async_trait]
impl DataCollector for DataSender {
    async fn collect(&self) -> FtBenchResult<()> {
        let python = tool_path(Tool::Python)?;

        log::info!("Sending benchmark data");
        run_logged(data_sender_command(&python, &self.repo_dir), "data-sender").await
    }
}
