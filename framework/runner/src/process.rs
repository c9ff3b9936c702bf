//! Helpers for running the external tools as child processes.

use std::collections::VecDeque;
use std::ffi::OsStr;
use std::process::Stdio;

use anyhow::Context;
use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, Signal, System};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;

use crate::types::FtBenchResult;

/// How many lines of a failed command's stderr are kept for the failure report.
pub const STDERR_TAIL_LINES: usize = 20;

/// A command ran to completion but exited unsuccessfully.
#[derive(Debug, derive_more::Display, derive_more::Error)]
#[display("'{program}' {}", describe_exit(code))]
pub struct CommandError {
    pub program: String,
    /// Exit code, or `None` if the process was killed by a signal.
    pub code: Option<i32>,
    /// The last [STDERR_TAIL_LINES] lines the command wrote to stderr.
    pub stderr_tail: String,
}

fn describe_exit(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exited with code {code}"),
        None => "was terminated by a signal".to_string(),
    }
}

/// Run a command to completion, logging its output under the `ft_benchmark::<label>` target.
///
/// The command's stdin is closed and the process is killed if the returned future is dropped,
/// which is how a cancelled phase stops the tool it was running. A non-zero exit is reported as a
/// [CommandError] carrying the tail of stderr.
pub async fn run_logged(mut cmd: Command, label: &str) -> FtBenchResult<()> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    log::debug!("Running {label}: {cmd:?}");
    let mut child = cmd
        .spawn()
        .with_context(|| format!("Failed to run '{label}'"))?;

    let stdout = child
        .stdout
        .take()
        .context("Failed to get stdout handle")?;
    let stderr = child
        .stderr
        .take()
        .context("Failed to get stderr handle")?;

    let log_target = format!("ft_benchmark::{label}");
    let (_, stderr_tail, status) = tokio::join!(
        log_lines(stdout, &log_target, None),
        log_lines(stderr, &log_target, Some(STDERR_TAIL_LINES)),
        child.wait()
    );
    let status = status.with_context(|| format!("Failed to wait for '{label}'"))?;

    log::debug!("{label} finished with status: {status}");
    if status.success() {
        Ok(())
    } else {
        Err(CommandError {
            program: label.to_string(),
            code: status.code(),
            stderr_tail: stderr_tail.into_iter().collect::<Vec<_>>().join("\n"),
        }
        .into())
    }
}

/// Log every line read from `reader`, keeping the last `keep` lines if requested.
async fn log_lines<R>(reader: R, log_target: &str, keep: Option<usize>) -> VecDeque<String>
where
    R: AsyncRead + Unpin,
{
    let mut tail = VecDeque::new();
    let mut lines = BufReader::new(reader).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        log::info!(target: log_target, "{line}");
        if let Some(keep) = keep {
            push_tail(&mut tail, line, keep);
        }
    }
    tail
}

fn push_tail(tail: &mut VecDeque<String>, line: String, keep: usize) {
    if keep == 0 {
        return;
    }
    if tail.len() == keep {
        tail.pop_front();
    }
    tail.push_back(line);
}

/// Send `signal` to every process whose name is exactly `name`.
///
/// Returns how many processes were signalled. Finding no process is not an error.
pub fn signal_processes_by_name(name: &str, signal: Signal) -> usize {
    let mut sys = System::new();
    sys.refresh_processes_specifics(ProcessesToUpdate::All, true, ProcessRefreshKind::nothing());

    let own_pid = Pid::from_u32(std::process::id());
    let mut signalled = 0;
    for process in sys.processes_by_exact_name(OsStr::new(name)) {
        if process.pid() == own_pid {
            continue;
        }
        match process.kill_with(signal) {
            Some(true) => {
                log::debug!("Sent {signal:?} to '{name}' with PID {}", process.pid());
                signalled += 1;
            }
            Some(false) => log::warn!(
                "Failed to send {signal:?} to '{name}' with PID {}",
                process.pid()
            ),
            None => log::warn!("Signal {signal:?} is not supported on this platform"),
        }
    }
    signalled
}

/// Send `signal` to every process in the process group `pgid`.
///
/// Returns `false` if the group no longer exists or the signal could not be delivered.
#[cfg(unix)]
pub fn signal_process_group(pgid: u32, signal: Signal) -> bool {
    use nix::errno::Errno;
    use nix::sys::signal::{killpg, Signal as NixSignal};
    use nix::unistd::Pid as NixPid;

    let nix_signal = match signal {
        Signal::Term => NixSignal::SIGTERM,
        Signal::Kill => NixSignal::SIGKILL,
        Signal::Interrupt => NixSignal::SIGINT,
        other => {
            log::warn!("Signal {other:?} is not supported for process groups");
            return false;
        }
    };
    let Ok(raw_pgid) = i32::try_from(pgid) else {
        return false;
    };

    match killpg(NixPid::from_raw(raw_pgid), nix_signal) {
        Ok(()) => true,
        Err(Errno::ESRCH) => false,
        Err(e) => {
            log::warn!("Failed to send {signal:?} to process group {pgid}: {e}");
            false
        }
    }
}

#[cfg(not(unix))]
pub fn signal_process_group(pgid: u32, signal: Signal) -> bool {
    signal_pid(pgid, signal)
}

/// Send `signal` to the process with the given PID. Returns `false` if there is no such process
/// or the signal could not be delivered.
#[cfg(not(unix))]
pub fn signal_pid(pid: u32, signal: Signal) -> bool {
    let pid = Pid::from_u32(pid);
    let mut sys = System::new();
    sys.refresh_processes_specifics(
        ProcessesToUpdate::Some(&[pid]),
        true,
        ProcessRefreshKind::nothing(),
    );

    sys.process(pid)
        .and_then(|process| process.kill_with(signal))
        .unwrap_or(false)
}
