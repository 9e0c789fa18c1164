//! File-backed capture of the server's stdout and stderr.
//!
//! The child writes straight into the file through inherited descriptors
//! opened in append mode, so the sink never sits between the child and its
//! output and can never block it. Readers poll the file: [`OutputSink::tail`]
//! returns what was written since the last call, [`OutputSink::read_all`]
//! returns everything.

use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tempfile::NamedTempFile;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tracing::debug;

enum Backing {
    /// Deleted on dispose or drop.
    Temporary(NamedTempFile),
    /// Kept in a diagnostics directory.
    Persistent(PathBuf),
}

/// Append-only log of the server's combined output with a read cursor.
pub struct OutputSink {
    backing: Backing,
    cursor: u64,
}

impl OutputSink {
    /// Capture into a fresh temporary file.
    pub fn temporary() -> io::Result<Self> {
        let file = tempfile::Builder::new()
            .prefix("lume-server-")
            .suffix(".log")
            .tempfile()?;
        debug!(path = %file.path().display(), "Capturing server output in temporary file");
        Ok(Self {
            backing: Backing::Temporary(file),
            cursor: 0,
        })
    }

    /// Capture into `<dir>/lume-server-<port>.log`, truncating any old log.
    pub fn persistent(dir: &Path, port: u16) -> io::Result<Self> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(format!("lume-server-{port}.log"));
        File::create(&path)?;
        debug!(path = %path.display(), "Capturing server output in diagnostics log");
        Ok(Self {
            backing: Backing::Persistent(path),
            cursor: 0,
        })
    }

    /// Temporary capture unless a diagnostics directory is given.
    pub fn create(diagnostics_dir: Option<&Path>, port: u16) -> io::Result<Self> {
        match diagnostics_dir {
            Some(dir) => Self::persistent(dir, port),
            None => Self::temporary(),
        }
    }

    pub fn path(&self) -> &Path {
        match &self.backing {
            Backing::Temporary(file) => file.path(),
            Backing::Persistent(path) => path,
        }
    }

    pub const fn is_persistent(&self) -> bool {
        matches!(self.backing, Backing::Persistent(_))
    }

    /// Writers for the child's stdout and stderr.
    pub fn stdio(&self) -> io::Result<(Stdio, Stdio)> {
        let stdout = OpenOptions::new().append(true).open(self.path())?;
        let stderr = stdout.try_clone()?;
        Ok((Stdio::from(stdout), Stdio::from(stderr)))
    }

    /// Current read cursor.
    pub const fn position(&self) -> u64 {
        self.cursor
    }

    /// Bytes written so far.
    pub async fn len(&self) -> io::Result<u64> {
        Ok(tokio::fs::metadata(self.path()).await?.len())
    }

    /// Bytes written at or after `offset`, and the offset just past them.
    ///
    /// An offset beyond the end (the log was truncated) yields no bytes and
    /// the current end as the next offset.
    pub async fn read_from(&self, offset: u64) -> io::Result<(Vec<u8>, u64)> {
        let mut file = tokio::fs::File::open(self.path()).await?;
        let end = file.metadata().await?.len();
        if offset >= end {
            return Ok((Vec::new(), end));
        }

        file.seek(io::SeekFrom::Start(offset)).await?;
        let mut buf = Vec::new();
        file.take(end - offset).read_to_end(&mut buf).await?;
        let next = offset + buf.len() as u64;
        Ok((buf, next))
    }

    /// Bytes written since the previous call; advances the cursor.
    pub async fn tail(&mut self) -> io::Result<Vec<u8>> {
        let (bytes, next) = self.read_from(self.cursor).await?;
        self.cursor = next;
        Ok(bytes)
    }

    /// Everything written so far. Does not move the cursor.
    pub async fn read_all(&self) -> io::Result<Vec<u8>> {
        tokio::fs::read(self.path()).await
    }

    /// Everything written so far as text, for error diagnostics.
    pub async fn read_all_lossy(&self) -> String {
        match self.read_all().await {
            Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            Err(e) => {
                debug!(error = %e, "Failed to read server output");
                "No output available".to_string()
            }
        }
    }

    /// Discard captured output and reset the cursor.
    pub async fn truncate(&mut self) -> io::Result<()> {
        let file = tokio::fs::OpenOptions::new()
            .write(true)
            .open(self.path())
            .await?;
        file.set_len(0).await?;
        self.cursor = 0;
        Ok(())
    }

    /// Release the backing file.
    ///
    /// With `preserve`, the file is kept and its path returned.
    pub fn dispose(self, preserve: bool) -> io::Result<Option<PathBuf>> {
        match self.backing {
            Backing::Temporary(file) if preserve => {
                let (_, path) = file.keep()?;
                Ok(Some(path))
            }
            Backing::Temporary(file) => {
                file.close()?;
                Ok(None)
            }
            Backing::Persistent(path) if preserve => Ok(Some(path)),
            Backing::Persistent(path) => {
                std::fs::remove_file(&path)?;
                Ok(None)
            }
        }
    }
}

/// Splits a byte stream into lines across chunk boundaries.
///
/// Server output can contain invalid UTF-8, so lines are decoded lossily.
#[derive(Debug, Default)]
pub struct LineSplitter {
    pending: Vec<u8>,
}

impl LineSplitter {
    /// Feed a chunk; returns the lines it completed.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);

        let mut lines = Vec::new();
        while let Some(idx) = self.pending.iter().position(|&b| b == b'\n') {
            let mut line: Vec<u8> = self.pending.drain(..=idx).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            lines.push(String::from_utf8_lossy(&line).into_owned());
        }
        lines
    }

    /// Return any trailing partial line.
    pub fn flush(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let line = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        Some(line)
    }
}
