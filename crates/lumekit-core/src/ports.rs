//! Server log sink port.
//!
//! Output captured from the server process is forwarded line by line to a
//! sink injected into each supervisor. This replaces process-wide logger
//! state: a sink lives exactly as long as the supervisor holding it.

use tracing::debug;

/// Stream label for lines read back from the capture log.
///
/// stdout and stderr are captured into one file, so lines cannot be told
/// apart after the fact.
pub const COMBINED_STREAM: &str = "output";

/// Port for receiving server output lines.
///
/// Implementations should be thread-safe and non-blocking where possible.
pub trait ServerLogSink: Send + Sync {
    /// Append a log line from the server process.
    ///
    /// # Arguments
    ///
    /// * `port` - Port the server is listening on
    /// * `stream_type` - Where the line came from, e.g. [`COMBINED_STREAM`]
    /// * `line` - The line content, without trailing newline
    fn append(&self, port: u16, stream_type: &str, line: &str);
}

/// Discards every line.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopLogSink;

impl ServerLogSink for NoopLogSink {
    fn append(&self, _port: u16, _stream_type: &str, _line: &str) {}
}

/// Emits every line as a `debug` tracing event.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingLogSink;

impl ServerLogSink for TracingLogSink {
    fn append(&self, port: u16, stream_type: &str, line: &str) {
        debug!(port = %port, stream = %stream_type, "SERVER: {}", line);
    }
}
