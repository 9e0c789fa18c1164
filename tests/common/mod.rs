//! Common test utilities.
//!
//! Supervisor configurations pointing at the `lume-stub` binary, with
//! short timings so failures surface quickly.

#![allow(dead_code)]

use std::net::TcpListener;
use std::path::PathBuf;
use std::time::Duration;

use lumekit::{ClientConfig, LumeClient, PortBinding, SupervisorConfig};

/// Path to the stub backend built alongside the tests.
pub fn stub_path() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_lume-stub"))
}

/// A port nothing is listening on right now.
///
/// Tests scan upward from here instead of the shared default base port so
/// they do not race each other for the same port.
pub fn free_port() -> u16 {
    let listener = TcpListener::bind(("127.0.0.1", 0)).unwrap();
    listener.local_addr().unwrap().port()
}

/// Occupy a port for as long as the listener lives.
pub fn occupy() -> (TcpListener, u16) {
    let listener = TcpListener::bind(("127.0.0.1", 0)).unwrap();
    let port = listener.local_addr().unwrap().port();
    (listener, port)
}

pub fn stub_config() -> SupervisorConfig {
    SupervisorConfig::new(stub_path())
        .with_base_port(free_port())
        .with_start_timeout(Duration::from_secs(20))
        .with_poll_interval(Duration::from_millis(100))
        .with_confirm_delay(Duration::from_millis(50))
        .with_stop_grace(Duration::from_secs(2))
}

/// A direct client for poking the server behind a supervisor's back.
pub fn client_for(binding: &PortBinding) -> LumeClient {
    LumeClient::new(
        binding.base_url.clone(),
        ClientConfig::default()
            .with_timeout(Duration::from_secs(5))
            .with_connect_timeout(Duration::from_secs(2)),
    )
    .unwrap()
}
