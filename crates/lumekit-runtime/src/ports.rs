//! Port allocation for the lume server.
//!
//! Availability is checked by binding and immediately releasing the port.
//! Ports handed out to a supervisor are also recorded in a process-wide
//! claim set until the [`PortClaim`] is dropped, so two supervisors in the
//! same process never pick the same port while neither child has bound it
//! yet. Other processes can still take a port between the check and the
//! child's own bind; the child then exits and the supervisor reports a launch
//! failure. Retrying is up to the caller.

use std::collections::BTreeSet;
use std::net::TcpListener;
use std::sync::{Mutex, MutexGuard, PoisonError};

use lumekit_core::{LumeError, LumeResult};
use tracing::debug;

/// Highest port the upward scan will try.
pub const PORT_CEILING: u16 = u16::MAX;

/// Ports currently claimed by supervisors in this process.
static CLAIMED: Mutex<BTreeSet<u16>> = Mutex::new(BTreeSet::new());

fn claimed() -> MutexGuard<'static, BTreeSet<u16>> {
    CLAIMED.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Exclusive claim on a port within this process. Released on drop.
#[derive(Debug)]
pub struct PortClaim {
    port: u16,
}

impl PortClaim {
    fn try_new(port: u16) -> Option<Self> {
        // Build the claim only after the insert; dropping one releases the port.
        let inserted = claimed().insert(port);
        if inserted { Some(Self { port }) } else { None }
    }

    pub const fn port(&self) -> u16 {
        self.port
    }
}

impl Drop for PortClaim {
    fn drop(&mut self) {
        claimed().remove(&self.port);
        debug!(port = %self.port, "Released port claim");
    }
}

/// Whether a supervisor in this process holds `port`.
pub fn is_claimed(port: u16) -> bool {
    claimed().contains(&port)
}

/// Check if a port is available by attempting to bind to it.
/// The listener is dropped right away, which releases the port.
pub fn is_port_available(port: u16) -> bool {
    match TcpListener::bind(("127.0.0.1", port)) {
        Ok(listener) => listener.local_addr().is_ok(),
        Err(_) => false,
    }
}

/// Claim the port the server will bind.
///
/// An explicit port must be unclaimed and free right now; otherwise the
/// first such port at or above `base_port` is used.
pub fn acquire(requested: Option<u16>, base_port: u16) -> LumeResult<PortClaim> {
    match requested {
        Some(0) => Err(LumeError::invalid_config(
            "port 0 cannot be used; omit the port to pick a free one",
        )),
        Some(port) => {
            let claim = PortClaim::try_new(port).ok_or_else(|| {
                LumeError::invalid_config(format!(
                    "Requested port {port} is already in use by another lume server"
                ))
            })?;
            if !is_port_available(port) {
                return Err(LumeError::invalid_config(format!(
                    "Requested port {port} is not available"
                )));
            }
            debug!(port = %port, "Using requested port");
            Ok(claim)
        }
        None => scan(base_port, PORT_CEILING),
    }
}

/// Claim the first unclaimed, bindable port in `base..=ceiling`.
pub fn scan(base: u16, ceiling: u16) -> LumeResult<PortClaim> {
    // Binding port 0 asks the OS for any port, which says nothing about 0 itself.
    let start = base.max(1);
    for port in start..=ceiling {
        let Some(claim) = PortClaim::try_new(port) else {
            debug!(port = %port, "Port claimed by another supervisor, skipping");
            continue;
        };
        if is_port_available(port) {
            debug!(port = %port, base = %start, "Allocated available port");
            return Ok(claim);
        }
        debug!(port = %port, "Port unavailable on system, skipping");
    }

    Err(LumeError::invalid_config(format!(
        "No available ports in range {start}-{ceiling}"
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use lumekit_core::ErrorKind;

    fn occupied() -> (TcpListener, u16) {
        let listener = TcpListener::bind(("127.0.0.1", 0)).unwrap();
        let port = listener.local_addr().unwrap().port();
        (listener, port)
    }

    #[test]
    fn test_bound_port_is_unavailable() {
        let (_listener, port) = occupied();
        assert!(!is_port_available(port));
    }

    #[test]
    fn test_released_port_is_available() {
        let (listener, port) = occupied();
        drop(listener);
        assert!(is_port_available(port));
    }

    #[test]
    fn test_requested_port_in_use_is_config_error() {
        let (_listener, port) = occupied();
        let err = acquire(Some(port), 7777).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidConfig);
        assert!(err.to_string().contains(&port.to_string()));
    }

    #[test]
    fn test_requested_port_zero_is_rejected() {
        let err = acquire(Some(0), 7777).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidConfig);
    }

    #[test]
    fn test_scan_skips_occupied_base() {
        let (_listener, port) = occupied();
        let chosen = acquire(None, port).unwrap();
        assert!(chosen.port() > port);
    }

    #[test]
    fn test_scan_exhausted_range_fails() {
        let (_listener, port) = occupied();
        let err = scan(port, port).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidConfig);
        assert!(err.to_string().contains("No available ports"));
    }

    #[test]
    fn test_claimed_port_is_skipped_until_released() {
        let (listener, base) = occupied();
        drop(listener);

        let first = acquire(None, base).unwrap();
        let second = acquire(None, base).unwrap();
        assert_ne!(first.port(), second.port());
        assert!(is_claimed(first.port()));

        // Free at the OS level, but held by another claim.
        let err = acquire(Some(first.port()), base).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidConfig);

        let port = first.port();
        drop(first);
        assert!(!is_claimed(port));
        let again = acquire(Some(port), base).unwrap();
        assert_eq!(again.port(), port);
    }

    #[test]
    fn test_failed_request_releases_claim() {
        let (_listener, port) = occupied();
        assert!(acquire(Some(port), 7777).is_err());
        assert!(!is_claimed(port));
    }
}
