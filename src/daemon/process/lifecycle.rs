//! Spawning and stopping supervised instances.
//!
//! Children run in their own process group so a stop reaches everything a
//! wrapper script started, and so a terminal Ctrl+C is handled by keeper
//! rather than delivered straight to the children.

use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::process::{Child, Command};
use tracing::{debug, warn};

use super::types::SpawnConfig;
use crate::error::{Error, Result};

/// Spawn an instance with piped stdout/stderr.
///
/// The directive environment is layered over the inherited one, so directive
/// values win on collisions.
///
/// # Errors
///
/// Returns [`Error::Spawn`] when the program cannot be started (missing
/// binary, permission denied, missing working directory).
pub fn spawn_instance(config: &SpawnConfig) -> Result<Child> {
    let mut command = Command::new(&config.program);
    command
        .args(&config.args)
        .current_dir(&config.cwd)
        .envs(&config.env)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    #[cfg(unix)]
    command.process_group(0);

    let child = command.spawn().map_err(|e| {
        Error::spawn(
            &config.name,
            format!("{} (program: {})", e, config.program.display()),
        )
    })?;

    debug!(
        name = %config.name,
        instance = config.instance,
        pid = child.id(),
        program = %config.program.display(),
        "Spawned instance"
    );

    Ok(child)
}

/// Stop an instance: SIGTERM, wait up to `kill_timeout`, then SIGKILL.
///
/// Returns the exit status once the child is reaped.
///
/// # Errors
///
/// Returns [`Error::Io`] if waiting on the child fails.
pub async fn stop_instance(child: &mut Child, kill_timeout: Duration) -> Result<ExitStatus> {
    if let Some(status) = child
        .try_wait()
        .map_err(|e| Error::io("checking child status", e))?
    {
        return Ok(status);
    }

    if let Some(pid) = child.id() {
        terminate(pid);
    }

    match tokio::time::timeout(kill_timeout, child.wait()).await {
        Ok(status) => status.map_err(|e| Error::io("waiting for child", e)),
        Err(_) => {
            warn!(
                pid = child.id(),
                timeout_ms = kill_timeout.as_millis() as u64,
                "Instance ignored SIGTERM, sending SIGKILL"
            );
            if let Some(pid) = child.id() {
                force_kill(pid);
            }
            child.kill().await.ok();
            child.wait().await.map_err(|e| Error::io("waiting for child", e))
        },
    }
}

/// SIGTERM whatever is left in the process group of an instance that has
/// already exited and been reaped.
///
/// Only the group is signalled. The leader's pid may have been reused.
#[cfg(unix)]
pub fn terminate_orphans(pid: u32) {
    use nix::errno::Errno;
    use nix::sys::signal::{Signal, killpg};
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pid) else {
        return;
    };
    match killpg(Pid::from_raw(raw), Signal::SIGTERM) {
        Ok(()) => debug!(pid, "Terminated leftover process group"),
        Err(Errno::ESRCH) => {},
        Err(e) => debug!(pid, error = %e, "Failed to signal leftover process group"),
    }
}

#[cfg(not(unix))]
pub fn terminate_orphans(_pid: u32) {}

#[cfg(unix)]
fn terminate(pid: u32) {
    signal_group(pid, nix::sys::signal::Signal::SIGTERM);
}

#[cfg(unix)]
fn force_kill(pid: u32) {
    signal_group(pid, nix::sys::signal::Signal::SIGKILL);
}

/// Signal the child's process group, falling back to the child alone.
#[cfg(unix)]
fn signal_group(pid: u32, signal: nix::sys::signal::Signal) {
    use nix::sys::signal::{kill, killpg};
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pid) else {
        return;
    };
    let target = Pid::from_raw(raw);

    if killpg(target, signal).is_err()
        && let Err(e) = kill(target, signal)
    {
        debug!(pid, signal = ?signal, error = %e, "Failed to signal instance");
    }
}

#[cfg(not(unix))]
fn terminate(_pid: u32) {}

#[cfg(not(unix))]
fn force_kill(_pid: u32) {}
