//! Graceful shutdown of the server's process group with SIGTERM → SIGKILL escalation.

use std::io;
use std::process::ExitStatus;
use std::time::Duration;

use tokio::process::Child;

#[cfg(unix)]
use tokio::time::timeout;
#[cfg(unix)]
use tracing::{debug, warn};

#[cfg(unix)]
use nix::sys::signal::{self, Signal};
#[cfg(unix)]
use nix::unistd::Pid;

/// Shut down a child and everything in its process group, then reap it.
///
/// # Strategy
/// 1. SIGTERM to the process group, wait up to `grace`
/// 2. If still running, SIGKILL the group and the child
/// 3. Wait for reaping (required to avoid zombies)
///
/// The child must have been spawned as a group leader (`process_group(0)`).
/// A child that was already reaped returns its cached status.
///
/// # Platform behavior
/// - Unix: signals the group via `killpg`
/// - Other: immediately calls `.kill()` (no graceful shutdown available)
pub async fn shutdown_child(child: &mut Child, grace: Duration) -> io::Result<ExitStatus> {
    #[cfg(unix)]
    {
        shutdown_unix(child, grace).await
    }

    #[cfg(not(unix))]
    {
        let _ = grace;
        child.kill().await?;
        child.wait().await
    }
}

#[cfg(unix)]
async fn shutdown_unix(child: &mut Child, grace: Duration) -> io::Result<ExitStatus> {
    // No id means the child has already been reaped; wait() returns the cached status.
    let Some(raw) = child.id() else {
        return child.wait().await;
    };
    let pid = i32::try_from(raw).map_err(io::Error::other)?;
    let group = Pid::from_raw(pid);

    if let Err(e) = signal::killpg(group, Signal::SIGTERM) {
        if e == nix::errno::Errno::ESRCH {
            return child.wait().await;
        }
        warn!(pid = %pid, error = %e, "Failed to send SIGTERM to server process group");
    }

    if let Ok(result) = timeout(grace, child.wait()).await {
        return result;
    }

    debug!(pid = %pid, grace_ms = grace.as_millis(), "Server ignored SIGTERM, escalating to SIGKILL");
    match signal::killpg(group, Signal::SIGKILL) {
        Ok(()) | Err(nix::errno::Errno::ESRCH) => {}
        Err(e) => warn!(pid = %pid, error = %e, "Failed to send SIGKILL to server process group"),
    }
    if let Err(e) = child.start_kill() {
        debug!(pid = %pid, error = %e, "start_kill after SIGKILL failed");
    }

    child.wait().await
}
