//! Configuration for the server supervisor and HTTP client.
//!
//! Values come from code (the `with_*` builders) and can be overridden from
//! the environment via [`SupervisorConfig::apply_env`].

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{LumeError, LumeResult};

/// First port tried when no explicit port is configured.
pub const DEFAULT_BASE_PORT: u16 = 7777;

/// Path segment every API route lives under.
pub const DEFAULT_API_ROOT: &str = "lume";

/// Environment variable naming the lume executable.
pub const ENV_SERVER_PATH: &str = "LUME_SERVER_PATH";
/// Environment variable with an explicit port.
pub const ENV_PORT: &str = "LUME_PORT";
/// Environment variable enabling verbose backend logging.
pub const ENV_DEBUG: &str = "LUME_DEBUG";
/// Environment variable naming a directory to keep server logs in.
pub const ENV_DIAGNOSTICS_DIR: &str = "LUME_DIAGNOSTICS_DIR";
/// Environment variable overriding the startup deadline, in seconds.
pub const ENV_START_TIMEOUT: &str = "LUME_START_TIMEOUT_SECS";

/// What to do when a previously running server is found dead.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryPolicy {
    /// Clean up and launch a fresh process on the next call.
    #[default]
    Relaunch,
    /// Clean up, enter `Failed`, and report the exit to the caller.
    Fail,
}

/// Whether the supervisor owns the server process.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerMode {
    /// Spawn and own the process.
    #[default]
    Managed,
    /// Talk to a server someone else started; never spawn or kill.
    External,
}

/// Supervisor configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupervisorConfig {
    /// Path to the lume executable.
    pub executable: PathBuf,
    pub mode: ServerMode,
    /// Explicit port. Required in external mode.
    pub port: Option<u16>,
    /// Start of the upward scan when `port` is `None`.
    pub base_port: u16,
    pub api_root: String,
    /// Hard ceiling on launch-to-ready time.
    pub start_timeout: Duration,
    /// Delay between readiness probes.
    pub poll_interval: Duration,
    /// Delay between probes once the readiness marker has been seen.
    pub marker_interval: Duration,
    /// Timeout of a single readiness probe.
    pub probe_timeout: Duration,
    /// Grace delay before the confirming probe.
    pub confirm_delay: Duration,
    /// How long to wait after SIGTERM before SIGKILL.
    pub stop_grace: Duration,
    pub recovery: RecoveryPolicy,
    /// Verbose backend logging.
    pub debug: bool,
    /// Keep server output in this directory instead of a temp file.
    pub diagnostics_dir: Option<PathBuf>,
    /// Extra environment for the server process.
    pub env: Vec<(String, String)>,
}

impl SupervisorConfig {
    /// Managed-mode configuration with defaults for everything but the binary.
    pub fn new(executable: impl Into<PathBuf>) -> Self {
        Self {
            executable: executable.into(),
            mode: ServerMode::Managed,
            port: None,
            base_port: DEFAULT_BASE_PORT,
            api_root: DEFAULT_API_ROOT.to_string(),
            start_timeout: Duration::from_secs(60),
            poll_interval: Duration::from_secs(1),
            marker_interval: Duration::from_millis(100),
            probe_timeout: Duration::from_secs(5),
            confirm_delay: Duration::from_millis(500),
            stop_grace: Duration::from_secs(5),
            recovery: RecoveryPolicy::Relaunch,
            debug: false,
            diagnostics_dir: None,
            env: Vec::new(),
        }
    }

    /// Configuration for a server that is already running on `port`.
    #[must_use]
    pub fn external(port: u16) -> Self {
        let mut config = Self::new(PathBuf::new());
        config.mode = ServerMode::External;
        config.port = Some(port);
        config
    }

    #[must_use]
    pub const fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    #[must_use]
    pub const fn with_base_port(mut self, base_port: u16) -> Self {
        self.base_port = base_port;
        self
    }

    #[must_use]
    pub fn with_api_root(mut self, api_root: impl Into<String>) -> Self {
        self.api_root = api_root.into();
        self
    }

    #[must_use]
    pub const fn with_start_timeout(mut self, timeout: Duration) -> Self {
        self.start_timeout = timeout;
        self
    }

    #[must_use]
    pub const fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    #[must_use]
    pub const fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    #[must_use]
    pub const fn with_confirm_delay(mut self, delay: Duration) -> Self {
        self.confirm_delay = delay;
        self
    }

    #[must_use]
    pub const fn with_stop_grace(mut self, grace: Duration) -> Self {
        self.stop_grace = grace;
        self
    }

    #[must_use]
    pub const fn with_recovery(mut self, recovery: RecoveryPolicy) -> Self {
        self.recovery = recovery;
        self
    }

    #[must_use]
    pub const fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    #[must_use]
    pub fn with_diagnostics_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.diagnostics_dir = Some(dir.into());
        self
    }

    #[must_use]
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Apply overrides from the process environment.
    pub fn apply_env(self) -> LumeResult<Self> {
        self.apply_lookup(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary key lookup.
    ///
    /// Recognized keys: `LUME_SERVER_PATH`, `LUME_PORT`, `LUME_DEBUG`,
    /// `LUME_DIAGNOSTICS_DIR`, `LUME_START_TIMEOUT_SECS`.
    pub fn apply_lookup<F>(mut self, lookup: F) -> LumeResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = lookup(ENV_SERVER_PATH).filter(|v| !v.trim().is_empty()) {
            self.executable = PathBuf::from(path);
        }

        if let Some(raw) = lookup(ENV_PORT) {
            let port = raw.trim().parse::<u16>().map_err(|_| {
                LumeError::invalid_config(format!("{ENV_PORT} is not a valid port: {raw:?}"))
            })?;
            self.port = Some(port);
        }

        if let Some(raw) = lookup(ENV_DEBUG) {
            self.debug = parse_flag(&raw).ok_or_else(|| {
                LumeError::invalid_config(format!("{ENV_DEBUG} is not a boolean: {raw:?}"))
            })?;
        }

        if let Some(dir) = lookup(ENV_DIAGNOSTICS_DIR).filter(|v| !v.trim().is_empty()) {
            self.diagnostics_dir = Some(PathBuf::from(dir));
        }

        if let Some(raw) = lookup(ENV_START_TIMEOUT) {
            let secs = raw.trim().parse::<u64>().map_err(|_| {
                LumeError::invalid_config(format!(
                    "{ENV_START_TIMEOUT} is not a number of seconds: {raw:?}"
                ))
            })?;
            self.start_timeout = Duration::from_secs(secs);
        }

        Ok(self)
    }

    /// Reject configurations that can never work.
    pub fn validate(&self) -> LumeResult<()> {
        if self.port == Some(0) {
            return Err(LumeError::invalid_config(
                "port 0 cannot be used; omit the port to pick a free one",
            ));
        }
        if self.mode == ServerMode::External && self.port.is_none() {
            return Err(LumeError::invalid_config(
                "external server mode requires an explicit port",
            ));
        }
        if self.mode == ServerMode::Managed && self.executable.as_os_str().is_empty() {
            return Err(LumeError::invalid_config("no lume executable configured"));
        }
        if self.start_timeout.is_zero() {
            return Err(LumeError::invalid_config("start timeout must be non-zero"));
        }
        if self.poll_interval.is_zero() || self.probe_timeout.is_zero() {
            return Err(LumeError::invalid_config(
                "poll interval and probe timeout must be non-zero",
            ));
        }
        Ok(())
    }

    /// Directory the server runs in: the executable's own directory.
    #[must_use]
    pub fn working_dir(&self) -> Option<&Path> {
        self.executable
            .parent()
            .filter(|dir| !dir.as_os_str().is_empty())
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" | "" => Some(false),
        _ => None,
    }
}

/// HTTP client timeouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfig {
    pub connect_timeout: Duration,
    /// Ceiling on a whole request, from connect through reading the body,
    /// unless a request overrides it. There is no separate read timeout.
    pub timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(30),
            timeout: Duration::from_secs(300),
        }
    }
}

impl ClientConfig {
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub const fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}
