use std::env;
use std::ffi::OsString;
use std::path::PathBuf;

use anyhow::bail;
use anyhow::Context;

use crate::types::FtBenchResult;

/// Environment variable to override the path to the `nearup` binary used to manage the localnet.
pub const FT_NEARUP_PATH_ENV: &str = "FT_NEARUP_PATH";

/// Environment variable to override the path to the Python interpreter used to create the locust
/// virtualenv and to run the data sender.
pub const FT_PYTHON_PATH_ENV: &str = "FT_PYTHON_PATH";

/// Environment variable to override the path to `make`, used to build `neard`.
pub const FT_MAKE_PATH_ENV: &str = "FT_MAKE_PATH";

/// An external tool that the benchmark drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tool {
    Nearup,
    Python,
    Make,
}

impl Tool {
    pub fn env_var(self) -> &'static str {
        match self {
            Tool::Nearup => FT_NEARUP_PATH_ENV,
            Tool::Python => FT_PYTHON_PATH_ENV,
            Tool::Make => FT_MAKE_PATH_ENV,
        }
    }

    pub fn default_name(self) -> &'static str {
        match self {
            Tool::Nearup => "nearup",
            Tool::Python => "python3",
            Tool::Make => "make",
        }
    }
}

/// Get the path to a tool.
///
/// If the tool's environment variable (see [Tool::env_var]) is set, its value is used as the
/// path. If it is not set, the tool's default name is looked up in the user's `PATH`.
pub fn tool_path(tool: Tool) -> FtBenchResult<PathBuf> {
    resolve_tool_path(tool, env::var(tool.env_var()).ok(), env::var_os("PATH"))
}

fn resolve_tool_path(
    tool: Tool,
    override_path: Option<String>,
    search_path: Option<OsString>,
) -> FtBenchResult<PathBuf> {
    let env_var = tool.env_var();
    let name = tool.default_name();

    match override_path.as_deref() {
        Some("") => {
            bail!("'{env_var}' set to empty string");
        }
        Some(path) if path == name => lookup_in_path(tool, search_path),
        None => lookup_in_path(tool, search_path),
        Some(path) => {
            let tool_path = PathBuf::from(path);
            if !tool_path.exists() {
                bail!(
                    "Path to {name} overwritten with '{env_var}={path}' but that path doesn't exist",
                    path = tool_path.display()
                );
            }
            Ok(tool_path)
        }
    }
}

fn lookup_in_path(tool: Tool, search_path: Option<OsString>) -> FtBenchResult<PathBuf> {
    let env_var = tool.env_var();
    let name = tool.default_name();
    log::debug!("'{env_var}' is not a path so looking for '{name}' in user's 'PATH'");

    let cwd = env::current_dir().context("Failed to get the current directory")?;
    which::which_in(name, search_path, cwd).with_context(|| {
        format!("'{name}' not found in PATH. Please install it or set '{env_var}' to the correct path.")
    })
}
