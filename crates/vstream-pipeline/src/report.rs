//! Run reports and byte counting adapters.

use std::io::{self, Read, Write};
use std::time::Duration;

use serde::Serialize;

use crate::machine::{PipelineKind, PipelineState};

/// Summary of one pipeline run.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PipelineReport {
    pub kind: PipelineKind,
    /// Decode: frames written.  Encode: frames submitted.
    pub frames: u64,
    /// Encode: packets written.  Zero for decode.
    pub packets: u64,
    pub bytes_in: u64,
    pub bytes_out: u64,
    pub busy_retries: u64,
    pub polls: u64,
    pub buffer_grows: u64,
    pub params_changes: u64,
    pub cancelled: bool,
    pub elapsed_ms: u64,
}

impl PipelineReport {
    pub fn from_state(state: &PipelineState, bytes_in: u64, bytes_out: u64, elapsed: Duration) -> Self {
        Self {
            kind: state.kind,
            frames: state.frames,
            packets: state.packets,
            bytes_in,
            bytes_out,
            busy_retries: state.busy_retries,
            polls: state.polls,
            buffer_grows: state.buffer_grows,
            params_changes: state.params_changes,
            cancelled: state.cancelled,
            elapsed_ms: elapsed.as_millis() as u64,
        }
    }
}

/// Counts bytes passing through a reader or writer.
pub struct Counted<T> {
    inner: T,
    count: u64,
}

impl<T> Counted<T> {
    pub fn new(inner: T) -> Self {
        Self { inner, count: 0 }
    }

    #[inline]
    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn into_inner(self) -> T {
        self.inner
    }
}

impl<R: Read> Read for Counted<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.count += n as u64;
        Ok(n)
    }
}

impl<W: Write> Write for Counted<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.count += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}
