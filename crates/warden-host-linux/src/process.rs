//! Process lookup and termination

use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use std::path::Path;
use std::process::Output;
use tokio::process::Command;
use tracing::{debug, warn};
use warden_host_api::{HostError, HostResult};

/// Send SIGTERM to each pid; returns how many were signalled
///
/// A pid that no longer exists counts as already terminated.
pub fn terminate_pids(pids: &[i32]) -> HostResult<usize> {
    let mut signalled = 0;

    for &raw in pids {
        if raw <= 1 {
            warn!(pid = raw, "Refusing to signal pid");
            continue;
        }

        match signal::kill(Pid::from_raw(raw), Signal::SIGTERM) {
            Ok(()) => {
                debug!(pid = raw, "Sent SIGTERM");
                signalled += 1;
            }
            Err(nix::errno::Errno::ESRCH) => {
                debug!(pid = raw, "Process already gone");
            }
            Err(e) => {
                return Err(HostError::TerminateFailed(format!(
                    "Failed to send SIGTERM to {}: {}",
                    raw, e
                )));
            }
        }
    }

    Ok(signalled)
}

/// Pids under `proc_root` whose command name equals `name`
///
/// Fallback for apps that have no window left in the compositor tree.
pub fn pids_by_comm(proc_root: &Path, name: &str) -> Vec<i32> {
    let Ok(entries) = std::fs::read_dir(proc_root) else {
        return Vec::new();
    };

    let mut pids: Vec<i32> = entries
        .filter_map(Result::ok)
        .filter_map(|entry| {
            let pid: i32 = entry.file_name().to_str()?.parse().ok()?;
            let comm = std::fs::read_to_string(entry.path().join("comm")).ok()?;
            (comm.trim_end() == name).then_some(pid)
        })
        .collect();
    pids.sort_unstable();
    pids
}

/// Run a command to completion, failing on a non-zero exit
pub async fn run_command(argv: &[String]) -> HostResult<Output> {
    let (program, args) = argv
        .split_first()
        .ok_or_else(|| HostError::Internal("Empty command".into()))?;

    let output = Command::new(program)
        .args(args)
        .kill_on_drop(true)
        .output()
        .await?;

    if !output.status.success() {
        return Err(HostError::Internal(format!(
            "{} exited with {}: {}",
            program,
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }

    Ok(output)
}
