//! Readiness polling for a freshly launched lume server.
//!
//! A single loop watches the process, forwards its output, and probes the
//! API. The probe response is authoritative; the readiness marker in the
//! output only shortens the wait between probes.

use std::process::ExitStatus;
use std::sync::Arc;
use std::time::{Duration, Instant};

use lumekit_core::{
    COMBINED_STREAM, LaunchDiagnostics, LaunchFailure, LumeError, LumeResult, PortBinding,
    ServerLogSink, SupervisorConfig,
};
use tokio::time::{sleep, timeout};
use tracing::{debug, info};

use crate::process::ProcessLiveness;
use crate::sink::{LineSplitter, OutputSink};

/// Line the backend prints once its listener is up.
pub const READY_MARKER: &str = "Server started";

/// Timing knobs for [`HealthProber`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeSettings {
    pub poll_interval: Duration,
    pub marker_interval: Duration,
    pub probe_timeout: Duration,
    pub confirm_delay: Duration,
}

impl Default for ProbeSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            marker_interval: Duration::from_millis(100),
            probe_timeout: Duration::from_secs(5),
            confirm_delay: Duration::from_millis(500),
        }
    }
}

impl From<&SupervisorConfig> for ProbeSettings {
    fn from(config: &SupervisorConfig) -> Self {
        Self {
            poll_interval: config.poll_interval,
            marker_interval: config.marker_interval,
            probe_timeout: config.probe_timeout,
            confirm_delay: config.confirm_delay,
        }
    }
}

/// Outcome of a successful readiness wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeReport {
    /// Probe ticks until the server answered.
    pub attempts: u32,
    pub elapsed: Duration,
    /// Whether the readiness marker showed up in the output.
    pub marker_seen: bool,
}

/// Polls `GET <base_url>/vms` until the server answers or gives up.
pub struct HealthProber {
    client: reqwest::Client,
    binding: PortBinding,
    settings: ProbeSettings,
    log_sink: Arc<dyn ServerLogSink>,
}

#[derive(Default)]
struct Progress {
    attempts: u32,
    marker_seen: bool,
    splitter: LineSplitter,
}

impl HealthProber {
    pub fn new(
        binding: PortBinding,
        settings: ProbeSettings,
        log_sink: Arc<dyn ServerLogSink>,
    ) -> LumeResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(settings.probe_timeout)
            .no_proxy()
            .build()
            .map_err(|e| LumeError::unknown("Failed to build probe client", e))?;

        Ok(Self {
            client,
            binding,
            settings,
            log_sink,
        })
    }

    pub const fn binding(&self) -> &PortBinding {
        &self.binding
    }

    /// One probe. Any 2xx counts as ready; everything else does not.
    pub async fn probe_once(&self) -> bool {
        match self.client.get(self.binding.probe_url()).send().await {
            Ok(response) if response.status().is_success() => true,
            Ok(response) => {
                debug!(port = %self.binding.port, status = %response.status(), "Server not ready yet");
                false
            }
            Err(e) => {
                debug!(port = %self.binding.port, error = %e, "Server not ready yet");
                false
            }
        }
    }

    /// Wait until the server answers, exits, or `deadline` passes.
    ///
    /// The deadline is a hard ceiling: an in-flight probe is dropped when it
    /// expires.
    pub async fn wait_until_ready<P>(
        &self,
        process: &mut P,
        sink: &mut OutputSink,
        deadline: Duration,
    ) -> LumeResult<ProbeReport>
    where
        P: ProcessLiveness + ?Sized,
    {
        let started = Instant::now();
        let mut progress = Progress::default();

        let outcome = timeout(
            deadline,
            self.poll(process, sink, &mut progress, started),
        )
        .await;

        match outcome {
            Ok(result) => result,
            Err(_) => {
                self.forward_output(sink, &mut progress).await;
                let elapsed = started.elapsed();
                debug!(
                    port = %self.binding.port,
                    attempts = progress.attempts,
                    elapsed_ms = elapsed.as_millis(),
                    "Readiness deadline elapsed"
                );
                Err(LumeError::launch(LaunchDiagnostics {
                    failure: LaunchFailure::DeadlineElapsed,
                    port: self.binding.port,
                    output: sink.read_all_lossy().await,
                    elapsed,
                    log_path: None,
                }))
            }
        }
    }

    async fn poll<P>(
        &self,
        process: &mut P,
        sink: &mut OutputSink,
        progress: &mut Progress,
        started: Instant,
    ) -> LumeResult<ProbeReport>
    where
        P: ProcessLiveness + ?Sized,
    {
        loop {
            if let Some(status) = exit_status(process) {
                self.forward_output(sink, progress).await;
                return Err(self.exited(status, sink, started).await);
            }

            let marker_now = self.forward_output(sink, progress).await;
            progress.attempts += 1;

            if self.probe_once().await {
                // The process must survive the grace delay and answer again.
                sleep(self.settings.confirm_delay).await;
                if exit_status(process).is_none() && self.probe_once().await {
                    self.forward_output(sink, progress).await;
                    let elapsed = started.elapsed();
                    info!(
                        port = %self.binding.port,
                        attempts = progress.attempts,
                        elapsed_ms = elapsed.as_millis(),
                        "lume server is ready"
                    );
                    return Ok(ProbeReport {
                        attempts: progress.attempts,
                        elapsed,
                        marker_seen: progress.marker_seen,
                    });
                }
                continue;
            }

            let pause = if marker_now {
                self.settings.marker_interval
            } else {
                self.settings.poll_interval
            };
            sleep(pause).await;
        }
    }

    /// Forward new output lines; true if the marker appeared in them.
    async fn forward_output(&self, sink: &mut OutputSink, progress: &mut Progress) -> bool {
        let bytes = match sink.tail().await {
            Ok(bytes) => bytes,
            Err(e) => {
                debug!(error = %e, "Failed to read server output");
                return false;
            }
        };

        let mut marker = false;
        for line in progress.splitter.push(&bytes) {
            if line.contains(READY_MARKER) {
                marker = true;
            }
            self.log_sink
                .append(self.binding.port, COMBINED_STREAM, &line);
        }
        progress.marker_seen |= marker;
        marker
    }

    async fn exited(&self, status: ExitStatus, sink: &OutputSink, started: Instant) -> LumeError {
        debug!(port = %self.binding.port, status = %status, "Server exited during startup");
        LumeError::launch(LaunchDiagnostics {
            failure: LaunchFailure::Exited {
                code: status.code(),
            },
            port: self.binding.port,
            output: sink.read_all_lossy().await,
            elapsed: started.elapsed(),
            log_path: None,
        })
    }
}

fn exit_status<P: ProcessLiveness + ?Sized>(process: &mut P) -> Option<ExitStatus> {
    match process.try_exit() {
        Ok(status) => status,
        Err(e) => {
            debug!(error = %e, "Failed to poll server process");
            None
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::process::MockProcessLiveness;
    use axum::Router;
    use axum::routing::get;
    use lumekit_core::{ErrorKind, NoopLogSink};
    use std::io::Write;
    use std::os::unix::process::ExitStatusExt;
    use std::sync::Mutex;

    #[derive(Default)]
    struct CollectingSink {
        lines: Mutex<Vec<String>>,
    }

    impl ServerLogSink for CollectingSink {
        fn append(&self, _port: u16, stream_type: &str, line: &str) {
            self.lines
                .lock()
                .unwrap()
                .push(format!("{stream_type}: {line}"));
        }
    }

    fn fast() -> ProbeSettings {
        ProbeSettings {
            poll_interval: Duration::from_millis(200),
            marker_interval: Duration::from_millis(20),
            probe_timeout: Duration::from_secs(5),
            confirm_delay: Duration::from_millis(50),
        }
    }

    fn write(sink: &OutputSink, text: &str) {
        std::fs::OpenOptions::new()
            .append(true)
            .open(sink.path())
            .unwrap()
            .write_all(text.as_bytes())
            .unwrap();
    }

    fn alive() -> MockProcessLiveness {
        let mut process = MockProcessLiveness::new();
        process.expect_try_exit().returning(|| Ok(None));
        process
    }

    fn unused_port() -> u16 {
        let listener = std::net::TcpListener::bind(("127.0.0.1", 0)).unwrap();
        listener.local_addr().unwrap().port()
    }

    async fn serve(app: Router) -> u16 {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
        port
    }

    #[tokio::test]
    async fn test_exit_during_startup_reports_code_and_output() {
        let binding = PortBinding::local(unused_port(), "lume");
        let prober = HealthProber::new(binding, fast(), Arc::new(NoopLogSink)).unwrap();

        let mut process = MockProcessLiveness::new();
        process
            .expect_try_exit()
            .returning(|| Ok(Some(ExitStatus::from_raw(1 << 8))));

        let mut sink = OutputSink::temporary().unwrap();
        write(&sink, "error: address already in use\n");

        let err = prober
            .wait_until_ready(&mut process, &mut sink, Duration::from_secs(5))
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Launch);
        let diag = err.diagnostics().unwrap();
        assert_eq!(diag.exit_code(), Some(1));
        assert!(diag.output.contains("address already in use"));
        assert!(err.to_string().contains("Exit code: 1"));
    }

    #[tokio::test]
    async fn test_deadline_bounds_wait_when_nothing_listens() {
        let binding = PortBinding::local(unused_port(), "lume");
        let settings = fast();
        let prober = HealthProber::new(binding, settings, Arc::new(NoopLogSink)).unwrap();
        let mut process = alive();
        let mut sink = OutputSink::temporary().unwrap();
        write(&sink, "booting\n");

        let deadline = Duration::from_millis(600);
        let started = Instant::now();
        let err = prober
            .wait_until_ready(&mut process, &mut sink, deadline)
            .await
            .unwrap_err();

        assert!(started.elapsed() < deadline + settings.poll_interval);
        let diag = err.diagnostics().unwrap();
        assert_eq!(diag.failure, LaunchFailure::DeadlineElapsed);
        assert!(diag.output.contains("booting"));
    }

    #[tokio::test]
    async fn test_deadline_drops_hanging_probe() {
        let app = Router::new().route(
            "/lume/vms",
            get(|| async {
                tokio::time::sleep(Duration::from_secs(30)).await;
                "[]"
            }),
        );
        let port = serve(app).await;
        let settings = fast();
        let prober =
            HealthProber::new(PortBinding::local(port, "lume"), settings, Arc::new(NoopLogSink))
                .unwrap();
        let mut process = alive();
        let mut sink = OutputSink::temporary().unwrap();

        let deadline = Duration::from_millis(500);
        let started = Instant::now();
        let err = prober
            .wait_until_ready(&mut process, &mut sink, deadline)
            .await
            .unwrap_err();

        assert!(started.elapsed() < deadline + settings.poll_interval);
        assert_eq!(err.kind(), ErrorKind::Launch);
    }

    #[tokio::test]
    async fn test_ready_after_probe_and_marker() {
        let app = Router::new().route("/lume/vms", get(|| async { "[]" }));
        let port = serve(app).await;

        let lines = Arc::new(CollectingSink::default());
        let prober =
            HealthProber::new(PortBinding::local(port, "lume"), fast(), lines.clone()).unwrap();
        let mut process = alive();
        let mut sink = OutputSink::temporary().unwrap();
        write(&sink, "loading images\nServer started\n");

        let report = prober
            .wait_until_ready(&mut process, &mut sink, Duration::from_secs(5))
            .await
            .unwrap();

        assert!(report.marker_seen);
        assert!(report.attempts >= 1);
        assert_eq!(
            *lines.lines.lock().unwrap(),
            vec![
                "output: loading images".to_string(),
                "output: Server started".to_string()
            ]
        );
    }

    #[tokio::test]
    async fn test_non_success_status_is_not_ready() {
        let app = Router::new().route(
            "/lume/vms",
            get(|| async { (axum::http::StatusCode::SERVICE_UNAVAILABLE, "warming up") }),
        );
        let port = serve(app).await;
        let prober =
            HealthProber::new(PortBinding::local(port, "lume"), fast(), Arc::new(NoopLogSink))
                .unwrap();

        assert!(!prober.probe_once().await);
    }
}
