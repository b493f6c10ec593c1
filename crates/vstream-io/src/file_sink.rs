//! File-based byte sink for elementary streams and raw video.
//!
//! Bytes go through a 4 MiB [`BufWriter`]; [`FileByteSink::finish`] flushes
//! and logs the totals.  A sink dropped without `finish` still flushes via
//! `BufWriter`'s drop, but any error at that point is lost.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use vstream_core::error::{EngineError, Result};

/// Writes a byte stream to a file.
pub struct FileByteSink {
    writer: BufWriter<File>,
    bytes_written: u64,
    writes: u64,
    path: PathBuf,
}

impl FileByteSink {
    pub fn create(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let file = File::create(&path).map_err(|e| {
            EngineError::Sink(format!(
                "Failed to create output file {}: {}",
                path.display(),
                e
            ))
        })?;

        tracing::info!(path = %path.display(), "Output sink opened");

        Ok(Self {
            writer: BufWriter::with_capacity(4 * 1024 * 1024, file), // 4 MiB buffer
            bytes_written: 0,
            writes: 0,
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// Flush buffered bytes to disk and report totals.
    pub fn finish(mut self) -> Result<u64> {
        self.writer.flush().map_err(|e| {
            EngineError::Sink(format!("Failed to flush {}: {}", self.path.display(), e))
        })?;

        tracing::info!(
            path = %self.path.display(),
            writes = self.writes,
            bytes = self.bytes_written,
            bytes_mb = self.bytes_written / (1024 * 1024),
            "Sink flushed"
        );

        Ok(self.bytes_written)
    }

    fn context(&self, e: io::Error) -> io::Error {
        io::Error::new(
            e.kind(),
            format!("Failed to write to {}: {e}", self.path.display()),
        )
    }
}

impl Write for FileByteSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = match self.writer.write(buf) {
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => return Err(e),
            Err(e) => return Err(self.context(e)),
        };

        self.bytes_written += n as u64;
        self.writes += 1;

        if self.writes.is_multiple_of(100) {
            tracing::debug!(
                writes = self.writes,
                bytes_mb = self.bytes_written / (1024 * 1024),
                "Sink progress"
            );
        }

        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.writer.flush().map_err(|e| self.context(e))
    }
}
