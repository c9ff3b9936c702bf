use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context};

use crate::types::FtBenchResult;

/// Default location of the lock that prevents two benchmarks sharing a machine.
pub const DEFAULT_LOCK_FILE: &str = "/tmp/run-ft-benchmark.lock";

/// Exclusive claim on the benchmark machine, held for the duration of a run.
///
/// The lock file contains the name of the user running the benchmark and is removed on drop.
#[derive(Debug)]
pub struct BenchmarkLock {
    path: PathBuf,
}

impl BenchmarkLock {
    pub fn acquire(path: impl Into<PathBuf>, owner: &str) -> FtBenchResult<Self> {
        let path = path.into();
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(mut file) => {
                file.write_all(owner.as_bytes())
                    .with_context(|| format!("Failed to write lock file '{}'", path.display()))?;
                log::debug!("Acquired benchmark lock '{}'", path.display());
                Ok(Self { path })
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                let running_user = std::fs::read_to_string(&path).unwrap_or_default();
                bail!("{} already running benchmark", running_user.trim())
            }
            Err(e) => Err(e)
                .with_context(|| format!("Failed to create lock file '{}'", path.display())),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for BenchmarkLock {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            log::error!(
                "Failed to remove benchmark lock '{}': {e}",
                self.path.display()
            );
        } else {
            log::debug!("Released benchmark lock '{}'", self.path.display());
        }
    }
}
