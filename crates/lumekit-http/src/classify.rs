//! Mapping from transport and protocol failures to [`LumeError`].
//!
//! Rules are applied in order; the first that matches wins:
//!
//! 1. connection refused, DNS, or socket failure → `Connection`
//! 2. client-side timeout (connect or read) → `Timeout`
//! 3. HTTP 404 → `NotFound`
//! 4. HTTP 400 → `InvalidConfig`, message includes the response text
//! 5. HTTP 5xx → `Server`
//! 6. any other non-2xx → `Server`
//! 7. anything else → `Unknown`

use std::error::Error as StdError;

use lumekit_core::LumeError;

/// A failed call, reduced to what classification needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Failure {
    /// The server could not be reached or the socket failed mid-request.
    Connect(String),
    /// A client-side timeout elapsed.
    Timeout(String),
    /// The server answered with a non-2xx status.
    Status { status: u16, body: String },
    /// No response and no recognizable transport error.
    Other(String),
}

/// Classify `failure` of `operation` (e.g. `GET /vms`).
pub fn classify(operation: &str, failure: Failure) -> LumeError {
    match failure {
        Failure::Connect(message) => LumeError::connection(message),
        Failure::Timeout(message) => LumeError::timeout(message),
        Failure::Status { status: 404, body } => LumeError::NotFound {
            message: format!("Resource not found during {operation}"),
            status: Some(404),
            body: Some(body),
        },
        Failure::Status { status: 400, body } => LumeError::InvalidConfig {
            message: format!("{operation} was rejected: {body}"),
            status: Some(400),
            body: Some(body),
        },
        Failure::Status { status, body } if status >= 500 => {
            LumeError::server(format!("Server error during {operation}"), status, body)
        }
        Failure::Status { status, body } => {
            LumeError::server(format!("Error during {operation}"), status, body)
        }
        Failure::Other(cause) => {
            LumeError::unknown(format!("Unknown error during {operation}"), cause)
        }
    }
}

/// Reduce a reqwest error to a [`Failure`].
///
/// Timeouts are checked first so a connect timeout counts as a timeout
/// rather than a connection failure.
pub fn failure_from_reqwest(err: &reqwest::Error) -> Failure {
    let message = describe(err);

    if err.is_timeout() {
        return Failure::Timeout(message);
    }
    if err.is_connect() || err.is_request() || err.is_body() {
        return Failure::Connect(message);
    }
    if let Some(status) = err.status() {
        return Failure::Status {
            status: status.as_u16(),
            body: message,
        };
    }
    Failure::Other(message)
}

/// The error and its source chain on one line.
fn describe(err: &reqwest::Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

#[cfg(test)]
mod tests {
    use super::*;
    use lumekit_core::ErrorKind;

    fn status(status: u16, body: &str) -> Failure {
        Failure::Status {
            status,
            body: body.to_string(),
        }
    }

    #[test]
    fn test_transport_failures() {
        let err = classify("GET /vms", Failure::Connect("connection refused".into()));
        assert_eq!(err.kind(), ErrorKind::Connection);
        assert!(err.to_string().contains("connection refused"));

        let err = classify("GET /vms", Failure::Timeout("operation timed out".into()));
        assert_eq!(err.kind(), ErrorKind::Timeout);
        assert_eq!(err.status(), None);
    }

    #[test]
    fn test_not_found() {
        let err = classify("GET /vms/ghost", status(404, "VM not found"));
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(err.status(), Some(404));
        assert_eq!(err.body(), Some("VM not found"));
        assert_eq!(err.to_string(), "Resource not found during GET /vms/ghost");
    }

    #[test]
    fn test_bad_request_includes_body() {
        let err = classify("POST /vms", status(400, "invalid disk size"));
        assert_eq!(err.kind(), ErrorKind::InvalidConfig);
        assert_eq!(err.status(), Some(400));
        assert!(err.to_string().contains("invalid disk size"));
        assert!(err.to_string().contains("POST /vms"));
    }

    #[test]
    fn test_server_errors() {
        for code in [500, 502, 503] {
            let err = classify("POST /pull", status(code, "registry unreachable"));
            assert_eq!(err.kind(), ErrorKind::Server);
            assert_eq!(err.status(), Some(code));
            assert_eq!(err.body(), Some("registry unreachable"));
            assert!(err.to_string().starts_with("Server error during POST /pull"));
        }
    }

    #[test]
    fn test_other_status_is_generic_server_error() {
        let err = classify("DELETE /vms/dev", status(409, "VM is running"));
        assert_eq!(err.kind(), ErrorKind::Server);
        assert_eq!(err.status(), Some(409));
        assert!(err.to_string().starts_with("Error during DELETE /vms/dev"));
    }

    #[test]
    fn test_unclassified_is_unknown() {
        let err = classify("GET /ipsw", Failure::Other("builder error".into()));
        assert_eq!(err.kind(), ErrorKind::Unknown);
        assert_eq!(err.status(), None);
        assert!(err.to_string().contains("builder error"));
    }
}
