//! Handle to a spawned server process.

use std::io;
use std::process::ExitStatus;
use std::time::{Duration, Instant};

use tokio::process::Child;
use tracing::debug;

use crate::shutdown::shutdown_child;

/// Non-blocking view of whether a process has exited.
///
/// The prober only needs this much of a process, which keeps it testable
/// without spawning anything.
#[cfg_attr(test, mockall::automock)]
pub trait ProcessLiveness: Send {
    /// Exit status if the process has exited, `None` if it is still running.
    fn try_exit(&mut self) -> io::Result<Option<ExitStatus>>;
}

/// A running (or recently exited) lume server.
///
/// Owned exclusively by the supervisor from launch until termination is
/// confirmed. Dropping it kills the child (`kill_on_drop`).
#[derive(Debug)]
pub struct ServerProcess {
    child: Child,
    pid: u32,
    port: u16,
    started_at: Instant,
    exit: Option<ExitStatus>,
}

impl ServerProcess {
    pub(crate) fn new(child: Child, pid: u32, port: u16) -> Self {
        Self {
            child,
            pid,
            port,
            started_at: Instant::now(),
            exit: None,
        }
    }

    pub const fn pid(&self) -> u32 {
        self.pid
    }

    pub const fn port(&self) -> u16 {
        self.port
    }

    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Exit status, polling the child without blocking.
    pub fn try_exit_status(&mut self) -> Option<ExitStatus> {
        match self.try_exit() {
            Ok(status) => status,
            Err(e) => {
                debug!(pid = %self.pid, error = %e, "Failed to poll server process");
                None
            }
        }
    }

    pub fn is_alive(&mut self) -> bool {
        self.try_exit_status().is_none()
    }

    /// Terminate the process group and reap the child.
    pub async fn shutdown(mut self, grace: Duration) -> io::Result<ExitStatus> {
        if let Some(status) = self.exit {
            return Ok(status);
        }
        shutdown_child(&mut self.child, grace).await
    }
}

impl ProcessLiveness for ServerProcess {
    fn try_exit(&mut self) -> io::Result<Option<ExitStatus>> {
        if self.exit.is_some() {
            return Ok(self.exit);
        }
        let status = self.child.try_wait()?;
        if let Some(status) = status {
            debug!(pid = %self.pid, status = %status, "Server process exited");
            self.exit = Some(status);
        }
        Ok(status)
    }
}
