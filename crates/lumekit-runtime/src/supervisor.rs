//! Lifecycle supervisor for one lume server.
//!
//! The supervisor owns the server process and its output log internally,
//! behind a `tokio::sync::Mutex`. Every transition (start, recovery, stop)
//! runs while holding that lock, so transitions are totally ordered and
//! concurrent `ensure_running` callers coalesce onto whichever one is in
//! flight.
//!
//! State is published through a `watch` channel so it can be read without
//! waiting for a transition to finish.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use lumekit_core::{
    LaunchDiagnostics, LaunchFailure, LumeError, LumeResult, PortBinding, RecoveryPolicy,
    ServerLogSink, ServerMode, SupervisorConfig, SupervisorState, TracingLogSink,
};
use tokio::sync::{Mutex, watch};
use tracing::{Instrument, Span, debug, info, info_span, warn};

use crate::launcher::{LaunchSpec, launch};
use crate::ports::{PortClaim, acquire, is_port_available};
use crate::probe::{HealthProber, ProbeSettings};
use crate::process::ServerProcess;
use crate::sink::OutputSink;

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Snapshot of what the supervisor is doing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupervisorStatus {
    pub state: SupervisorState,
    pub binding: Option<PortBinding>,
    pub pid: Option<u32>,
    /// Persistent output log, only in diagnostics mode.
    pub log_path: Option<PathBuf>,
}

impl Default for SupervisorStatus {
    fn default() -> Self {
        Self {
            state: SupervisorState::Stopped,
            binding: None,
            pid: None,
            log_path: None,
        }
    }
}

/// Process plus the log it writes to.
struct ManagedServer {
    process: ServerProcess,
    sink: OutputSink,
}

#[derive(Default)]
struct Slot {
    binding: Option<PortBinding>,
    /// Keeps other supervisors in this process off `binding`'s port.
    claim: Option<PortClaim>,
    /// Set once the binding has served a running process; it never changes after that.
    pinned: bool,
    server: Option<ManagedServer>,
    /// Failure of the most recent transition, handed to coalesced waiters.
    last_failure: Option<LumeError>,
}

struct Inner {
    id: u64,
    config: SupervisorConfig,
    log_sink: Arc<dyn ServerLogSink>,
    span: Span,
    slot: Mutex<Slot>,
    status: watch::Sender<SupervisorStatus>,
    /// Bumped after every completed transition.
    epoch: AtomicU64,
    launches: AtomicU64,
}

/// Resets the published state to `Stopped` if a transition is abandoned
/// (its future dropped) before it completes.
struct TransitionGuard<'a> {
    status: &'a watch::Sender<SupervisorStatus>,
    armed: bool,
}

impl<'a> TransitionGuard<'a> {
    fn new(status: &'a watch::Sender<SupervisorStatus>, state: SupervisorState) -> Self {
        status.send_modify(|s| s.state = state);
        Self {
            status,
            armed: true,
        }
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for TransitionGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.status.send_modify(|s| {
                s.state = SupervisorState::Stopped;
                s.pid = None;
            });
        }
    }
}

/// Supervises one lume server. Cheap to clone; clones share the server.
///
/// # Example
///
/// ```ignore
/// let supervisor = ServerSupervisor::new(SupervisorConfig::new("/usr/local/bin/lume"))?;
/// let binding = supervisor.ensure_running().await?;
/// println!("lume API at {}", binding.base_url);
/// supervisor.stop().await?;
/// ```
#[derive(Clone)]
pub struct ServerSupervisor {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for ServerSupervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerSupervisor")
            .field("id", &self.inner.id)
            .field("status", &*self.inner.status.borrow())
            .finish_non_exhaustive()
    }
}

impl ServerSupervisor {
    /// Create a supervisor that forwards server output to `tracing`.
    pub fn new(config: SupervisorConfig) -> LumeResult<Self> {
        Self::with_log_sink(config, Arc::new(TracingLogSink))
    }

    /// Create a supervisor that forwards server output to `log_sink`.
    pub fn with_log_sink(
        config: SupervisorConfig,
        log_sink: Arc<dyn ServerLogSink>,
    ) -> LumeResult<Self> {
        config.validate()?;

        let id = NEXT_ID.fetch_add(1, Ordering::Relaxed);
        let span = info_span!("lume_server", id = id, port = tracing::field::Empty);
        if let Some(port) = config.port {
            span.record("port", port);
        }
        let (status, _) = watch::channel(SupervisorStatus::default());

        Ok(Self {
            inner: Arc::new(Inner {
                id,
                config,
                log_sink,
                span,
                slot: Mutex::new(Slot::default()),
                status,
                epoch: AtomicU64::new(0),
                launches: AtomicU64::new(0),
            }),
        })
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.inner.config
    }

    pub fn state(&self) -> SupervisorState {
        self.inner.status.borrow().state.clone()
    }

    pub fn status(&self) -> SupervisorStatus {
        self.inner.status.borrow().clone()
    }

    /// Receive every status change.
    pub fn subscribe(&self) -> watch::Receiver<SupervisorStatus> {
        self.inner.status.subscribe()
    }

    pub fn binding(&self) -> Option<PortBinding> {
        self.inner.status.borrow().binding.clone()
    }

    pub fn pid(&self) -> Option<u32> {
        self.inner.status.borrow().pid
    }

    pub fn log_path(&self) -> Option<PathBuf> {
        self.inner.status.borrow().log_path.clone()
    }

    /// Number of processes spawned over this supervisor's lifetime.
    pub fn launch_count(&self) -> u64 {
        self.inner.launches.load(Ordering::SeqCst)
    }

    /// Make sure a healthy server is running and return where it listens.
    ///
    /// Concurrent callers share one startup: only one process is spawned and
    /// every caller waiting on it gets the same outcome.
    pub async fn ensure_running(&self) -> LumeResult<PortBinding> {
        let span = self.inner.span.clone();
        async {
            if self.inner.config.mode == ServerMode::External {
                return self.attach_external().await;
            }

            let observed = self.inner.epoch.load(Ordering::SeqCst);
            let mut slot = self.inner.slot.lock().await;

            if let Some(binding) = self.check_existing(&mut slot).await? {
                return Ok(binding);
            }

            if self.inner.epoch.load(Ordering::SeqCst) != observed {
                if let Some(err) = &slot.last_failure {
                    debug!("Reusing failure of the startup this call waited on");
                    return Err(err.clone());
                }
            }

            self.start(&mut slot).await
        }
        .instrument(span)
        .await
    }

    /// Stop the server. Does nothing if no server is running.
    ///
    /// Waits for an in-flight start to finish first.
    pub async fn stop(&self) -> LumeResult<()> {
        let span = self.inner.span.clone();
        async {
            let mut slot = self.inner.slot.lock().await;
            slot.last_failure = None;

            let Some(server) = slot.server.take() else {
                self.inner.status.send_modify(|s| {
                    s.state = SupervisorState::Stopped;
                    s.pid = None;
                });
                return Ok(());
            };

            let guard = TransitionGuard::new(&self.inner.status, SupervisorState::Stopping);
            let pid = server.process.pid();
            self.terminate(server).await;
            guard.disarm();

            self.inner.status.send_modify(|s| {
                s.state = SupervisorState::Stopped;
                s.pid = None;
            });
            self.inner.epoch.fetch_add(1, Ordering::SeqCst);
            info!(pid = %pid, "lume server stopped");
            Ok(())
        }
        .instrument(span)
        .await
    }

    /// Returns the binding if the current server is alive. Handles a dead
    /// server according to the recovery policy.
    async fn check_existing(&self, slot: &mut Slot) -> LumeResult<Option<PortBinding>> {
        let Some(server) = slot.server.as_mut() else {
            return Ok(None);
        };

        let Some(status) = server.process.try_exit_status() else {
            return Ok(slot.binding.clone());
        };

        let Some(server) = slot.server.take() else {
            return Ok(None);
        };
        let port = server.process.port();
        let uptime = server.process.uptime();
        let output = server.sink.read_all_lossy().await;
        let log_path = self.terminate(server).await;

        warn!(
            port = %port,
            status = %status,
            uptime_secs = uptime.as_secs(),
            "lume server exited unexpectedly"
        );

        match self.inner.config.recovery {
            RecoveryPolicy::Relaunch => {
                self.inner.status.send_modify(|s| {
                    s.state = SupervisorState::Stopped;
                    s.pid = None;
                });
                Ok(None)
            }
            RecoveryPolicy::Fail => {
                let err = LumeError::launch(LaunchDiagnostics {
                    failure: LaunchFailure::Exited {
                        code: status.code(),
                    },
                    port,
                    output,
                    elapsed: uptime,
                    log_path,
                });
                Err(self.fail(slot, err))
            }
        }
    }

    async fn start(&self, slot: &mut Slot) -> LumeResult<PortBinding> {
        let config = &self.inner.config;
        let guard = TransitionGuard::new(&self.inner.status, SupervisorState::Starting);

        let binding = match self.bind(slot) {
            Ok(binding) => binding,
            Err(err) => {
                guard.disarm();
                return Err(self.fail(slot, err));
            }
        };
        let port = binding.port;
        self.inner.span.record("port", port);

        let mut sink = match OutputSink::create(config.diagnostics_dir.as_deref(), port) {
            Ok(sink) => sink,
            Err(e) => {
                guard.disarm();
                let err = LumeError::launch(LaunchDiagnostics {
                    failure: LaunchFailure::Spawn {
                        reason: format!("cannot create output log: {e}"),
                    },
                    port,
                    output: String::new(),
                    elapsed: std::time::Duration::ZERO,
                    log_path: None,
                });
                return Err(self.fail(slot, err));
            }
        };

        let mut process = match launch(&LaunchSpec::serve(config, port), &sink) {
            Ok(process) => process,
            Err(err) => {
                self.dispose(sink);
                guard.disarm();
                return Err(self.fail(slot, err));
            }
        };
        self.inner.launches.fetch_add(1, Ordering::SeqCst);

        let pid = process.pid();
        let log_path = sink.is_persistent().then(|| sink.path().to_path_buf());
        self.inner.status.send_modify(|s| {
            s.state = SupervisorState::Probing;
            s.pid = Some(pid);
            s.log_path.clone_from(&log_path);
        });

        let probed = match HealthProber::new(
            binding.clone(),
            ProbeSettings::from(config),
            Arc::clone(&self.inner.log_sink),
        ) {
            Ok(prober) => {
                prober
                    .wait_until_ready(&mut process, &mut sink, config.start_timeout)
                    .await
            }
            Err(err) => Err(err),
        };

        match probed {
            Ok(report) => {
                slot.server = Some(ManagedServer { process, sink });
                slot.binding = Some(binding.clone());
                slot.pinned = true;
                slot.last_failure = None;
                guard.disarm();
                self.inner.status.send_modify(|s| {
                    s.state = SupervisorState::Running;
                    s.binding = Some(binding.clone());
                });
                self.inner.epoch.fetch_add(1, Ordering::SeqCst);
                info!(
                    pid = %pid,
                    port = %port,
                    attempts = report.attempts,
                    elapsed_ms = report.elapsed.as_millis(),
                    "lume server running"
                );
                Ok(binding)
            }
            Err(mut err) => {
                let preserved = self.terminate(ManagedServer { process, sink }).await;
                if let LumeError::Launch(diag) = &mut err {
                    diag.log_path = preserved;
                }
                guard.disarm();
                Err(self.fail(slot, err))
            }
        }
    }

    /// Port for the next launch. The first launch allocates; later launches
    /// reuse the binding after checking it is still free.
    fn bind(&self, slot: &mut Slot) -> LumeResult<PortBinding> {
        let config = &self.inner.config;
        if let Some(binding) = slot.binding.as_ref().filter(|_| slot.pinned) {
            if !is_port_available(binding.port) {
                return Err(LumeError::invalid_config(format!(
                    "Port {} is no longer available for relaunch",
                    binding.port
                )));
            }
            return Ok(binding.clone());
        }

        // An unpinned binding from an abandoned start is not reused.
        slot.claim = None;
        let claim = acquire(config.port, config.base_port)?;
        let binding = PortBinding::local(claim.port(), &config.api_root);
        slot.binding = Some(binding.clone());
        slot.claim = Some(claim);
        Ok(binding)
    }

    /// Record a failed transition and return the error for the caller.
    fn fail(&self, slot: &mut Slot, err: LumeError) -> LumeError {
        if !slot.pinned {
            slot.binding = None;
            slot.claim = None;
        }
        let reason = err.to_string().lines().next().unwrap_or_default().to_string();
        warn!(kind = %err.kind(), reason = %reason, "lume server failed to start");

        slot.last_failure = Some(err.clone());
        self.inner.status.send_modify(|s| {
            s.state = SupervisorState::Failed(reason);
            s.pid = None;
        });
        self.inner.epoch.fetch_add(1, Ordering::SeqCst);
        err
    }

    /// Terminate and reap the process, then release its log.
    ///
    /// Returns the log path when it was preserved.
    async fn terminate(&self, server: ManagedServer) -> Option<PathBuf> {
        let ManagedServer { process, sink } = server;
        let pid = process.pid();
        match process.shutdown(self.inner.config.stop_grace).await {
            Ok(status) => debug!(pid = %pid, status = %status, "lume server process reaped"),
            Err(e) => warn!(pid = %pid, error = %e, "Failed to stop lume server cleanly"),
        }
        self.dispose(sink)
    }

    fn dispose(&self, sink: OutputSink) -> Option<PathBuf> {
        let preserve = self.inner.config.diagnostics_dir.is_some();
        match sink.dispose(preserve) {
            Ok(path) => path,
            Err(e) => {
                warn!(error = %e, "Failed to release server output log");
                None
            }
        }
    }

    async fn attach_external(&self) -> LumeResult<PortBinding> {
        let config = &self.inner.config;
        let port = config
            .port
            .ok_or_else(|| LumeError::invalid_config("external server mode requires an explicit port"))?;
        let binding = PortBinding::local(port, &config.api_root);

        let prober = HealthProber::new(
            binding.clone(),
            ProbeSettings::from(config),
            Arc::clone(&self.inner.log_sink),
        )?;

        if prober.probe_once().await {
            debug!(port = %port, "Using existing lume server");
            self.inner.status.send_modify(|s| {
                s.state = SupervisorState::Running;
                s.binding = Some(binding.clone());
            });
            Ok(binding)
        } else {
            let err = LumeError::connection(format!(
                "No lume server answering at {}",
                binding.base_url
            ));
            self.inner.status.send_modify(|s| {
                s.state = SupervisorState::Failed(err.to_string());
            });
            Err(err)
        }
    }
}
