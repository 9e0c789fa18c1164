//! # lumekit
//!
//! Supervise a local `lume` server and talk to its HTTP API.
//!
//! [`Lume`] ties the two halves together: every call first makes sure the
//! server is running (launching and probing it if needed), then sends the
//! request through a lazily created [`LumeClient`].
//!
//! ```ignore
//! let lume = Lume::new(SupervisorConfig::new("/usr/local/bin/lume").apply_env()?)?;
//! let vms = lume.list_vms().await?;
//! lume.close().await?;
//! ```
//!
//! The workspace crates can also be used directly:
//!
//! - `lumekit_core` - Errors, configuration, request descriptors
//! - `lumekit_runtime` - Process supervision
//! - `lumekit_http` - HTTP client and error classification

pub mod endpoints;

use std::future::Future;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::OnceCell;
use tracing::{debug, warn};

pub use endpoints::{CloneSpec, ImageRef};
pub use lumekit_core::{
    ClientConfig, ErrorKind, LaunchDiagnostics, LaunchFailure, LumeError, LumeResult, Method,
    NoopLogSink, PortBinding, RecoveryPolicy, RequestDescriptor, Response, ServerLogSink,
    ServerMode, SupervisorConfig, SupervisorState, TracingLogSink,
};
pub use lumekit_http::LumeClient;
pub use lumekit_runtime::{ServerSupervisor, SupervisorStatus};

struct Inner {
    supervisor: ServerSupervisor,
    client: OnceCell<LumeClient>,
    client_config: ClientConfig,
}

/// Handle to a supervised lume server and its API. Cheap to clone.
#[derive(Clone)]
pub struct Lume {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Lume {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lume")
            .field("supervisor", &self.inner.supervisor)
            .field("client_config", &self.inner.client_config)
            .finish_non_exhaustive()
    }
}

impl Lume {
    pub fn new(config: SupervisorConfig) -> LumeResult<Self> {
        Self::with_options(config, ClientConfig::default(), Arc::new(TracingLogSink))
    }

    pub fn with_options(
        config: SupervisorConfig,
        client_config: ClientConfig,
        log_sink: Arc<dyn ServerLogSink>,
    ) -> LumeResult<Self> {
        let supervisor = ServerSupervisor::with_log_sink(config, log_sink)?;
        Ok(Self {
            inner: Arc::new(Inner {
                supervisor,
                client: OnceCell::new(),
                client_config,
            }),
        })
    }

    /// Run `f` against a started server and stop the server afterwards,
    /// whether or not `f` succeeded.
    pub async fn scope<F, Fut, T>(config: SupervisorConfig, f: F) -> LumeResult<T>
    where
        F: FnOnce(Self) -> Fut,
        Fut: Future<Output = LumeResult<T>>,
    {
        let lume = Self::new(config)?;
        if let Err(err) = lume.start().await {
            if let Err(stop_err) = lume.close().await {
                warn!(error = %stop_err, "Failed to stop lume server after failed start");
            }
            return Err(err);
        }

        let result = f(lume.clone()).await;
        let closed = lume.close().await;
        match (result, closed) {
            (Ok(value), Ok(())) => Ok(value),
            (Ok(_), Err(err)) => Err(err),
            (Err(err), closed) => {
                if let Err(stop_err) = closed {
                    warn!(error = %stop_err, "Failed to stop lume server");
                }
                Err(err)
            }
        }
    }

    pub fn supervisor(&self) -> &ServerSupervisor {
        &self.inner.supervisor
    }

    pub fn state(&self) -> SupervisorState {
        self.inner.supervisor.state()
    }

    /// Start the server now instead of on the first call.
    pub async fn start(&self) -> LumeResult<PortBinding> {
        let binding = self.inner.supervisor.ensure_running().await?;
        self.client(&binding).await?;
        Ok(binding)
    }

    /// Make sure the server is running, then send `req`.
    pub async fn call(&self, req: &RequestDescriptor) -> LumeResult<Response> {
        let binding = self.inner.supervisor.ensure_running().await?;
        let client = self.client(&binding).await?;
        client.request(req).await
    }

    /// Stop the server. Safe to call more than once.
    pub async fn close(&self) -> LumeResult<()> {
        self.inner.supervisor.stop().await
    }

    async fn client(&self, binding: &PortBinding) -> LumeResult<&LumeClient> {
        self.inner
            .client
            .get_or_try_init(|| async {
                debug!(base_url = %binding.base_url, "Creating lume API client");
                LumeClient::new(binding.base_url.clone(), self.inner.client_config)
            })
            .await
    }

    async fn call_json(&self, req: &RequestDescriptor) -> LumeResult<Value> {
        match self.call(req).await? {
            Response::Json(value) => Ok(value),
            Response::NoContent => Err(LumeError::unknown(
                format!("Empty response to {}", req.operation()),
                "expected a JSON body",
            )),
        }
    }

    async fn call_unit(&self, req: &RequestDescriptor) -> LumeResult<()> {
        self.call(req).await.map(|_| ())
    }

    pub async fn list_vms(&self) -> LumeResult<Value> {
        self.call_json(&endpoints::list_vms()).await
    }

    pub async fn get_vm(&self, name: &str) -> LumeResult<Value> {
        self.call_json(&endpoints::get_vm(name)).await
    }

    pub async fn create_vm(&self, spec: Value) -> LumeResult<()> {
        self.call_unit(&endpoints::create_vm(spec)).await
    }

    pub async fn run_vm(&self, name: &str, opts: Option<Value>) -> LumeResult<()> {
        self.call_unit(&endpoints::run_vm(name, opts)).await
    }

    pub async fn stop_vm(&self, name: &str) -> LumeResult<()> {
        self.call_unit(&endpoints::stop_vm(name)).await
    }

    pub async fn update_vm(&self, name: &str, params: Value) -> LumeResult<()> {
        self.call_unit(&endpoints::update_vm(name, params)).await
    }

    pub async fn delete_vm(&self, name: &str) -> LumeResult<()> {
        self.call_unit(&endpoints::delete_vm(name)).await
    }

    pub async fn clone_vm(&self, name: &str, new_name: &str) -> LumeResult<()> {
        self.call_unit(&endpoints::clone_vm(&CloneSpec::new(name, new_name)))
            .await
    }

    /// Pull an image. Accepts `"name"`, `"name:tag"`, or a full [`ImageRef`].
    pub async fn pull_image(
        &self,
        image: impl Into<ImageRef>,
        name: Option<&str>,
    ) -> LumeResult<Response> {
        self.call(&endpoints::pull_image(&image.into(), name)).await
    }

    pub async fn get_images(&self, organization: Option<&str>) -> LumeResult<Value> {
        self.call_json(&endpoints::images(organization)).await
    }

    /// URL of the latest macOS restore image.
    pub async fn latest_ipsw_url(&self) -> LumeResult<String> {
        let req = endpoints::latest_ipsw();
        let body = self.call_json(&req).await?;
        body.get("url")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| {
                LumeError::unknown(
                    format!("Unexpected response to {}", req.operation()),
                    format!("missing \"url\" in {body}"),
                )
            })
    }
}
