//! Core types shared by the lumekit crates.
//!
//! Nothing in here touches processes, sockets, or HTTP. The runtime and
//! client crates build on these types; callers pattern-match on
//! [`LumeError`] and [`ErrorKind`].

#![deny(unused_crate_dependencies)]

pub mod config;
pub mod error;
pub mod ports;
pub mod request;
pub mod state;

pub use config::{
    ClientConfig, DEFAULT_API_ROOT, DEFAULT_BASE_PORT, RecoveryPolicy, ServerMode,
    SupervisorConfig,
};
pub use error::{ErrorKind, LaunchDiagnostics, LaunchFailure, LumeError, LumeResult};
pub use ports::{COMBINED_STREAM, NoopLogSink, ServerLogSink, TracingLogSink};
pub use request::{Method, RequestDescriptor, Response};
pub use state::{PortBinding, SupervisorState};
