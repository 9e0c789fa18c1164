//! Binary resolution and spawning of `lume serve`.

use std::path::{Path, PathBuf};

use lumekit_core::{LaunchDiagnostics, LaunchFailure, LumeError, LumeResult, SupervisorConfig};
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info};

use crate::process::ServerProcess;
use crate::sink::OutputSink;

/// Environment variable the backend reads for verbose logging.
pub const BACKEND_LOG_ENV: &str = "LUME_LOG";

/// Everything needed to spawn one server process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    pub executable: PathBuf,
    pub args: Vec<String>,
    pub port: u16,
    pub working_dir: Option<PathBuf>,
    /// Added on top of the inherited environment.
    pub env: Vec<(String, String)>,
}

impl LaunchSpec {
    /// `<exe> serve --port <port>` as configured.
    pub fn serve(config: &SupervisorConfig, port: u16) -> Self {
        let mut env = vec![("RUST_BACKTRACE".to_string(), "1".to_string())];
        if config.debug {
            env.push((BACKEND_LOG_ENV.to_string(), "debug".to_string()));
        }
        env.extend(config.env.iter().cloned());

        Self {
            executable: config.executable.clone(),
            args: vec!["serve".to_string(), "--port".to_string(), port.to_string()],
            port,
            working_dir: config.working_dir().map(Path::to_path_buf),
            env,
        }
    }
}

/// Check that the server binary exists.
pub fn resolve_executable(path: &Path) -> LumeResult<PathBuf> {
    if !path.is_file() {
        return Err(LumeError::not_found(format!(
            "lume server binary not found at: {}",
            path.display()
        )));
    }
    Ok(path.to_path_buf())
}

/// Make sure the owner, group and others can execute the binary.
#[cfg(unix)]
fn ensure_executable(path: &Path) -> LumeResult<()> {
    use std::os::unix::fs::PermissionsExt;

    let metadata = std::fs::metadata(path).map_err(|e| {
        LumeError::invalid_config(format!("Cannot read {}: {e}", path.display()))
    })?;
    let mode = metadata.permissions().mode();
    if mode & 0o111 == 0o111 {
        return Ok(());
    }

    debug!(path = %path.display(), mode = format!("{mode:o}"), "Adding execute permission");
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode | 0o755)).map_err(|e| {
        LumeError::invalid_config(format!(
            "Cannot make {} executable: {e}",
            path.display()
        ))
    })
}

#[cfg(not(unix))]
fn ensure_executable(_path: &Path) -> LumeResult<()> {
    Ok(())
}

/// Spawn the server with stdout and stderr going to `sink`.
///
/// The child gets its own process group so signals aimed at the caller's
/// terminal do not reach it, and is killed if the handle is dropped.
pub fn launch(spec: &LaunchSpec, sink: &OutputSink) -> LumeResult<ServerProcess> {
    let executable = resolve_executable(&spec.executable)?;
    ensure_executable(&executable)?;

    let spawn_failed = |reason: String| {
        LumeError::launch(LaunchDiagnostics {
            failure: LaunchFailure::Spawn { reason },
            port: spec.port,
            output: String::new(),
            elapsed: Duration::ZERO,
            log_path: None,
        })
    };

    let (stdout, stderr) = sink
        .stdio()
        .map_err(|e| spawn_failed(format!("cannot open output log: {e}")))?;

    let mut cmd = Command::new(&executable);
    cmd.args(&spec.args)
        .envs(spec.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .stdin(std::process::Stdio::null())
        .stdout(stdout)
        .stderr(stderr)
        .kill_on_drop(true);
    if let Some(dir) = &spec.working_dir {
        cmd.current_dir(dir);
    }
    #[cfg(unix)]
    cmd.process_group(0);

    debug!(
        executable = %executable.display(),
        args = ?spec.args,
        port = %spec.port,
        "Spawning lume server"
    );

    let child = cmd.spawn().map_err(|e| spawn_failed(e.to_string()))?;
    let pid = child
        .id()
        .ok_or_else(|| spawn_failed("process exited before its pid was read".to_string()))?;

    info!(pid = %pid, port = %spec.port, "Started lume server process");
    Ok(ServerProcess::new(child, pid, spec.port))
}
