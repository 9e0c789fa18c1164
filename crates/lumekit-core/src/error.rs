//! Error taxonomy for lumekit.
//!
//! Every failure surfaced to a caller is one of the [`LumeError`] variants.
//! The set is closed: callers decide retry-vs-abort by matching on
//! [`LumeError::kind`], so variants must not be added casually.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for lumekit operations.
pub type LumeResult<T> = Result<T, LumeError>;

/// Fieldless discriminant of [`LumeError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Connection,
    Timeout,
    NotFound,
    InvalidConfig,
    Server,
    Launch,
    Unknown,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Connection => "connection",
            Self::Timeout => "timeout",
            Self::NotFound => "not_found",
            Self::InvalidConfig => "invalid_config",
            Self::Server => "server",
            Self::Launch => "launch",
            Self::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// Errors produced by the supervisor, the HTTP client, and the facade.
///
/// The type is `Clone` so that every caller coalesced onto one startup
/// attempt can receive the same failure.
#[derive(Debug, Clone, Error)]
pub enum LumeError {
    /// The server could not be reached (refused, DNS, socket failure).
    #[error("Failed to connect to lume server: {message}")]
    Connection {
        /// Stringified transport error.
        message: String,
    },

    /// A client-side connect or read timeout elapsed.
    #[error("Request timed out: {message}")]
    Timeout {
        /// Stringified transport error.
        message: String,
    },

    /// HTTP 404, or a required local resource (the server binary) is absent.
    #[error("{message}")]
    NotFound {
        message: String,
        status: Option<u16>,
        body: Option<String>,
    },

    /// HTTP 400, or a fatal local configuration problem (port, paths, env).
    #[error("Invalid configuration: {message}")]
    InvalidConfig {
        message: String,
        status: Option<u16>,
        body: Option<String>,
    },

    /// HTTP 5xx or any other non-2xx status.
    #[error("{message} (status {status}): {body}")]
    Server {
        message: String,
        status: u16,
        body: String,
    },

    /// The server process could not be brought to a healthy state.
    #[error("{0}")]
    Launch(Box<LaunchDiagnostics>),

    /// A failure with no associated status or response.
    #[error("{message}: {cause}")]
    Unknown { message: String, cause: String },
}

impl LumeError {
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::Timeout {
            message: message.into(),
        }
    }

    /// A `NotFound` that did not come from an HTTP response.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound {
            message: message.into(),
            status: None,
            body: None,
        }
    }

    /// An `InvalidConfig` that did not come from an HTTP response.
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
            status: None,
            body: None,
        }
    }

    pub fn server(message: impl Into<String>, status: u16, body: impl Into<String>) -> Self {
        Self::Server {
            message: message.into(),
            status,
            body: body.into(),
        }
    }

    pub fn unknown(message: impl Into<String>, cause: impl fmt::Display) -> Self {
        Self::Unknown {
            message: message.into(),
            cause: cause.to_string(),
        }
    }

    pub fn launch(diagnostics: LaunchDiagnostics) -> Self {
        Self::Launch(Box::new(diagnostics))
    }

    /// The variant of this error without its payload.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Connection { .. } => ErrorKind::Connection,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::InvalidConfig { .. } => ErrorKind::InvalidConfig,
            Self::Server { .. } => ErrorKind::Server,
            Self::Launch(_) => ErrorKind::Launch,
            Self::Unknown { .. } => ErrorKind::Unknown,
        }
    }

    /// HTTP status code, when the error came from a response.
    #[must_use]
    pub const fn status(&self) -> Option<u16> {
        match self {
            Self::NotFound { status, .. } | Self::InvalidConfig { status, .. } => *status,
            Self::Server { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Raw response text, when the error came from a response.
    #[must_use]
    pub fn body(&self) -> Option<&str> {
        match self {
            Self::NotFound { body, .. } | Self::InvalidConfig { body, .. } => body.as_deref(),
            Self::Server { body, .. } => Some(body),
            _ => None,
        }
    }

    /// Launch diagnostics, for `Launch` errors.
    #[must_use]
    pub fn diagnostics(&self) -> Option<&LaunchDiagnostics> {
        match self {
            Self::Launch(diag) => Some(diag.as_ref()),
            _ => None,
        }
    }

    /// Returns true if the condition is likely temporary.
    ///
    /// Purely advisory; nothing in lumekit retries on its own.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        match self {
            Self::Connection { .. } | Self::Timeout { .. } => true,
            Self::Server { status, .. } => *status == 503,
            _ => false,
        }
    }
}

/// Why a launch did not reach `Running`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LaunchFailure {
    /// The OS refused to spawn the executable.
    Spawn { reason: String },
    /// The process exited before (or after) becoming ready.
    Exited { code: Option<i32> },
    /// The readiness deadline elapsed while the process was still alive.
    DeadlineElapsed,
}

/// Everything needed to diagnose a failed launch without re-running it.
#[derive(Debug, Clone)]
pub struct LaunchDiagnostics {
    pub failure: LaunchFailure,
    /// Port the server was asked to bind.
    pub port: u16,
    /// Combined stdout/stderr captured from the process.
    pub output: String,
    /// Time from spawn to giving up.
    pub elapsed: Duration,
    /// Preserved log file, only in diagnostics mode.
    pub log_path: Option<PathBuf>,
}

impl LaunchDiagnostics {
    /// Exit code of the process, if it exited with one.
    #[must_use]
    pub fn exit_code(&self) -> Option<i32> {
        match &self.failure {
            LaunchFailure::Exited { code } => *code,
            _ => None,
        }
    }
}

impl fmt::Display for LaunchDiagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.failure {
            LaunchFailure::Spawn { reason } => {
                write!(f, "Failed to start lume server process: {reason}")?;
            }
            LaunchFailure::Exited { code } => {
                f.write_str("Server process terminated unexpectedly.\n")?;
                match code {
                    Some(code) => write!(f, "Exit code: {code}")?,
                    None => f.write_str("Exit code: none (killed by signal)")?,
                }
            }
            LaunchFailure::DeadlineElapsed => {
                write!(
                    f,
                    "Server failed to start after {:.1}s on port {}",
                    self.elapsed.as_secs_f64(),
                    self.port
                )?;
            }
        }
        write!(f, "\nOutput: {}", self.output)?;
        if let Some(path) = &self.log_path {
            write!(f, "\nLog file: {}", path.display())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exited(code: Option<i32>, output: &str) -> LaunchDiagnostics {
        LaunchDiagnostics {
            failure: LaunchFailure::Exited { code },
            port: 7777,
            output: output.to_string(),
            elapsed: Duration::from_millis(250),
            log_path: None,
        }
    }

    #[test]
    fn test_kind_matches_variant() {
        assert_eq!(LumeError::connection("x").kind(), ErrorKind::Connection);
        assert_eq!(LumeError::timeout("x").kind(), ErrorKind::Timeout);
        assert_eq!(LumeError::not_found("x").kind(), ErrorKind::NotFound);
        assert_eq!(LumeError::invalid_config("x").kind(), ErrorKind::InvalidConfig);
        assert_eq!(LumeError::server("x", 500, "").kind(), ErrorKind::Server);
        assert_eq!(LumeError::unknown("x", "y").kind(), ErrorKind::Unknown);
        assert_eq!(
            LumeError::launch(exited(Some(1), "")).kind(),
            ErrorKind::Launch
        );
    }

    #[test]
    fn test_status_and_body_accessors() {
        let err = LumeError::server("Server error during list_vms", 503, "busy");
        assert_eq!(err.status(), Some(503));
        assert_eq!(err.body(), Some("busy"));

        let err = LumeError::connection("refused");
        assert_eq!(err.status(), None);
        assert_eq!(err.body(), None);
    }

    #[test]
    fn test_exit_diagnostics_message() {
        let err = LumeError::launch(exited(Some(1), "bind: address in use"));
        let msg = err.to_string();
        assert!(msg.contains("terminated unexpectedly"));
        assert!(msg.contains("Exit code: 1"));
        assert!(msg.contains("bind: address in use"));
        assert_eq!(err.diagnostics().and_then(LaunchDiagnostics::exit_code), Some(1));
    }

    #[test]
    fn test_deadline_diagnostics_mentions_port_and_log() {
        let diag = LaunchDiagnostics {
            failure: LaunchFailure::DeadlineElapsed,
            port: 7781,
            output: "still booting".to_string(),
            elapsed: Duration::from_secs(3),
            log_path: Some(PathBuf::from("/tmp/lume-server-7781.log")),
        };
        let msg = diag.to_string();
        assert!(msg.contains("7781"));
        assert!(msg.contains("3.0s"));
        assert!(msg.contains("still booting"));
        assert!(msg.contains("/tmp/lume-server-7781.log"));
        assert_eq!(diag.exit_code(), None);
    }

    #[test]
    fn test_transient_classification() {
        assert!(LumeError::connection("x").is_transient());
        assert!(LumeError::timeout("x").is_transient());
        assert!(LumeError::server("x", 503, "").is_transient());
        assert!(!LumeError::server("x", 500, "").is_transient());
        assert!(!LumeError::not_found("x").is_transient());
    }

    #[test]
    fn test_kind_display() {
        assert_eq!(ErrorKind::InvalidConfig.to_string(), "invalid_config");
        assert_eq!(ErrorKind::NotFound.to_string(), "not_found");
    }
}
