//! Supervisor state and the port binding it owns.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of a server supervisor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "reason", rename_all = "lowercase")]
pub enum SupervisorState {
    /// No process; nothing in flight.
    Stopped,
    /// Allocating a port and spawning the process.
    Starting,
    /// Process spawned; waiting for the readiness probe.
    Probing,
    /// Probe succeeded since the last launch.
    Running,
    /// Terminating the process and releasing the output log.
    Stopping,
    /// Last start attempt failed; the next `ensure_running` retries.
    Failed(String),
}

impl SupervisorState {
    /// Returns true while a transition is in progress.
    #[must_use]
    pub const fn is_transitioning(&self) -> bool {
        matches!(self, Self::Starting | Self::Probing | Self::Stopping)
    }

    #[must_use]
    pub const fn is_running(&self) -> bool {
        matches!(self, Self::Running)
    }
}

impl fmt::Display for SupervisorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stopped => write!(f, "Stopped"),
            Self::Starting => write!(f, "Starting"),
            Self::Probing => write!(f, "Probing"),
            Self::Running => write!(f, "Running"),
            Self::Stopping => write!(f, "Stopping"),
            Self::Failed(reason) => write!(f, "Failed: {reason}"),
        }
    }
}

/// Port chosen for the server plus the API base URL derived from it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortBinding {
    pub port: u16,
    pub base_url: String,
}

impl PortBinding {
    /// Build a binding for `http://localhost:<port>/<api_root>`.
    #[must_use]
    pub fn local(port: u16, api_root: &str) -> Self {
        let root = api_root.trim_matches('/');
        let base_url = if root.is_empty() {
            format!("http://localhost:{port}")
        } else {
            format!("http://localhost:{port}/{root}")
        };
        Self { port, base_url }
    }

    /// URL of the readiness probe endpoint.
    #[must_use]
    pub fn probe_url(&self) -> String {
        format!("{}/vms", self.base_url)
    }
}
