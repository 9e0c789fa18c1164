//! Lifecycle supervision for a locally spawned lume server.
//!
//! # Structure
//!
//! - [`ports`] - Port selection by bind-and-release checks
//! - [`launcher`] - Binary resolution and process spawning
//! - [`sink`] - File-backed capture of the server's combined output
//! - [`probe`] - Readiness polling against the HTTP API
//! - [`shutdown`] - SIGTERM → SIGKILL escalation for the process group
//! - [`supervisor`] - The state machine tying the above together

#![deny(unsafe_code)]

pub mod launcher;
pub mod ports;
pub mod probe;
pub mod process;
pub mod shutdown;
pub mod sink;
pub mod supervisor;

pub use launcher::{LaunchSpec, launch, resolve_executable};
pub use ports::{PortClaim, acquire, is_claimed, is_port_available};
pub use probe::{HealthProber, ProbeReport, ProbeSettings, READY_MARKER};
pub use process::{ProcessLiveness, ServerProcess};
pub use shutdown::shutdown_child;
pub use sink::{LineSplitter, OutputSink};
pub use supervisor::{ServerSupervisor, SupervisorStatus};
