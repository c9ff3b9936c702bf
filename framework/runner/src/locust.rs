//! The locust load generator and the Python virtualenv it runs from.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use anyhow::{bail, Context};
use async_trait::async_trait;
use sysinfo::Signal;
use tokio::process::{Child, Command};

use crate::collaborators::{EnvPreparer, LoadGenHandle, LoadGenParams, LoadGenerator, PreparedEnv};
use crate::process::{run_logged, signal_process_group, signal_processes_by_name};
use crate::tool_binary::{tool_path, Tool};
use crate::types::FtBenchResult;

/// Location of the locust setup inside a nearcore checkout.
pub const LOCUST_DIR: &str = "pytest/tests/loadtest/locust";

/// Process name used to find locust processes left over from an earlier run.
const LOCUST_PROCESS_NAME: &str = "locust";

/// Output of the background locust process, relative to the locust directory.
const LOCUST_LOG_FILE: &str = "locust.log";

/// Prepares a virtualenv with locust and resolves the funding key of the localnet.
#[derive(Debug, Clone)]
pub struct LocustEnv {
    locust_dir: PathBuf,
    localnet_home: PathBuf,
}

impl LocustEnv {
    pub fn new(repo_dir: &Path, localnet_home: impl Into<PathBuf>) -> Self {
        Self {
            locust_dir: repo_dir.join(LOCUST_DIR),
            localnet_home: localnet_home.into(),
        }
    }

    fn venv_dir(&self) -> PathBuf {
        self.locust_dir.join(".venv")
    }

    async fn install(&self, venv_dir: &Path) -> FtBenchResult<()> {
        let python = tool_path(Tool::Python)?;
        log::info!("Creating virtualenv in '{}'", venv_dir.display());
        let mut cmd = Command::new(python);
        cmd.current_dir(&self.locust_dir)
            .arg("-m")
            .arg("venv")
            .arg(venv_dir);
        run_logged(cmd, "venv").await?;

        let pip = venv_dir.join("bin").join("pip");
        let requirements = self.locust_dir.join("requirements.txt");
        if requirements.exists() {
            let mut cmd = Command::new(&pip);
            cmd.current_dir(&self.locust_dir)
                .arg("install")
                .arg("-r")
                .arg(&requirements);
            run_logged(cmd, "pip").await?;
        }

        let mut cmd = Command::new(&pip);
        cmd.current_dir(&self.locust_dir).arg("install").arg("locust");
        run_logged(cmd, "pip").await
    }
}

/// The key of the localnet's first validator, which funds the test accounts.
pub fn funding_key_path(localnet_home: &Path) -> PathBuf {
    localnet_home.join("node0").join("validator_key.json")
}

#[async_trait]
impl EnvPreparer for LocustEnv {
    async fn prepare(&self) -> FtBenchResult<PreparedEnv> {
        if !self.locust_dir.is_dir() {
            bail!("Locust directory '{}' not found", self.locust_dir.display());
        }

        let venv_dir = self.venv_dir();
        let locust_bin = venv_dir.join("bin").join("locust");
        if locust_bin.exists() {
            log::info!("Using locust from '{}'", locust_bin.display());
        } else {
            self.install(&venv_dir).await?;
            if !locust_bin.exists() {
                bail!(
                    "Installed locust but '{}' does not exist",
                    locust_bin.display()
                );
            }
        }

        let funding_key = funding_key_path(&self.localnet_home);
        if !funding_key.exists() {
            bail!("Funding key '{}' not found", funding_key.display());
        }

        Ok(PreparedEnv {
            work_dir: self.locust_dir.clone(),
            venv_dir,
            locust_bin,
            funding_key,
        })
    }
}

/// Users spawned per second so that all users are running once the ramp-up has elapsed.
pub fn spawn_rate(user_count: u32, ramp_up: Duration) -> f64 {
    if ramp_up.is_zero() {
        f64::from(user_count)
    } else {
        f64::from(user_count) / ramp_up.as_secs_f64()
    }
}

/// The locust arguments for a headless FT benchmark run.
pub fn locust_args(params: &LoadGenParams) -> Vec<String> {
    let mut args = vec![
        "-H".to_string(),
        params.rpc_addr.clone(),
        "-f".to_string(),
        params.workload_file.display().to_string(),
        "--funding-key".to_string(),
        params.funding_key.display().to_string(),
        "-t".to_string(),
        format!("{}s", params.duration.as_secs()),
        "-u".to_string(),
        params.user_count.to_string(),
        "-r".to_string(),
        spawn_rate(params.user_count, params.ramp_up).to_string(),
        "--processes".to_string(),
        params.process_count.to_string(),
    ];
    if params.headless {
        args.push("--headless".to_string());
    }
    args
}

/// Launches locust in the background.
#[derive(Debug, Clone, Default)]
pub struct Locust;

#[async_trait]
impl LoadGenerator for Locust {
    async fn stop_stale(&self) -> FtBenchResult<usize> {
        let killed =
            tokio::task::spawn_blocking(|| signal_processes_by_name(LOCUST_PROCESS_NAME, Signal::Kill))
                .await
                .context("Failed to look for stale locust processes")?;
        Ok(killed)
    }

    async fn launch(
        &self,
        env: &PreparedEnv,
        params: &LoadGenParams,
    ) -> FtBenchResult<Box<dyn LoadGenHandle>> {
        let log_path = env.work_dir.join(LOCUST_LOG_FILE);
        let log_file = File::create(&log_path)
            .with_context(|| format!("Failed to create '{}'", log_path.display()))?;
        let log_file_err = log_file
            .try_clone()
            .context("Failed to clone the locust log file handle")?;

        let path = match std::env::var_os("PATH") {
            Some(path) => {
                let mut paths = vec![env.venv_dir.join("bin")];
                paths.extend(std::env::split_paths(&path));
                std::env::join_paths(paths).context("Failed to build PATH for locust")?
            }
            None => env.venv_dir.join("bin").into_os_string(),
        };

        let mut cmd = Command::new(&env.locust_bin);
        cmd.current_dir(&env.work_dir)
            .env("VIRTUAL_ENV", &env.venv_dir)
            .env("PATH", path)
            .args(locust_args(params))
            .stdin(Stdio::null())
            .stdout(Stdio::from(log_file))
            .stderr(Stdio::from(log_file_err));
        // Own process group so that a Ctrl-C in the terminal reaches the controller only, which
        // then stops locust as part of teardown.
        #[cfg(unix)]
        cmd.process_group(0);

        let child = cmd.spawn().context("Failed to spawn locust")?;
        log::info!(
            "Locust running with PID {:?}, output in '{}'",
            child.id(),
            log_path.display()
        );

        Ok(Box::new(LocustProcess { child }))
    }
}

#[derive(Debug)]
pub struct LocustProcess {
    child: Child,
}

impl LocustProcess {
    async fn kill(&mut self, pgid: u32) -> FtBenchResult<()> {
        signal_process_group(pgid, Signal::Kill);
        self.child.kill().await.context("Failed to kill locust")
    }
}

#[async_trait]
impl LoadGenHandle for LocustProcess {
    fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    async fn terminate(&mut self, grace: Duration) -> FtBenchResult<()> {
        let Some(pid) = self.child.id() else {
            log::debug!("Locust has already exited");
            return Ok(());
        };

        // Locust leads its own process group, which also holds its worker processes.
        if !signal_process_group(pid, Signal::Term) {
            log::warn!("Could not send SIGTERM to locust process group {pid}, killing it");
            return self.kill(pid).await;
        }

        match tokio::time::timeout(grace, self.child.wait()).await {
            Ok(status) => {
                let status = status.context("Failed to wait for locust")?;
                log::info!("Locust stopped with status: {status}");
                Ok(())
            }
            Err(_) => {
                log::warn!(
                    "Locust did not stop within {}, killing it",
                    humantime::format_duration(grace)
                );
                self.kill(pid).await
            }
        }
    }

    async fn wait(&mut self) -> FtBenchResult<Option<i32>> {
        let status = self.child.wait().await.context("Failed to wait for locust")?;
        Ok(status.code())
    }
}
