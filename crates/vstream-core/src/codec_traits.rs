//! Codec engine contracts shared across crate boundaries.
//!
//! Engines follow a submit-then-poll protocol: `submit` hands work to the
//! engine and, when output is on its way, returns a [`CompletionToken`] that
//! the caller polls with a bounded wait.  Every non-ready outcome is a
//! [`SubmitStatus`] value, never an `Err`; `Err` is reserved for contract
//! violations and I/O failures.

use std::time::Duration;

use crate::buffer::CompressedBuffer;
use crate::error::Result;
use crate::plane::{PlaneView, PlaneViewMut};
use crate::types::{EncodeConfig, FormatDescription, FrameInfo, MapAccess};

// ─── Completion ──────────────────────────────────────────────────────────

/// Opaque handle for in-flight engine work.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct CompletionToken(pub u64);

/// Result of one bounded poll.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PollStatus {
    Done,
    /// The timeout elapsed before the work finished.  Poll again.
    StillExecuting,
    /// The engine reported a failure code for this token.
    Failed(i32),
}

/// Outcome of a submission.
#[derive(Debug)]
pub enum SubmitStatus<T> {
    /// Output is in flight; poll `token` before touching `T`.
    Ready(T, CompletionToken),
    /// The engine needs more input before it can produce output.
    NeedMoreInput,
    /// Decoder: no free output surface.  Encoder: should never happen.
    NeedMoreSurface,
    /// Transient; resubmit the same work after a short backoff.
    DeviceBusy,
    DeviceLost,
    /// The stream parameters changed in a compatible way.
    ParamsChanged,
    /// The stream parameters changed in a way the session cannot follow.
    IncompatibleParams,
    /// Encoder: the output buffer cannot hold the next packet.
    BufferTooSmall,
    /// Raw status code the engine does not map to a known outcome.
    Unknown(i32),
}

impl<T> SubmitStatus<T> {
    /// Short name for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Ready(..) => "ready",
            Self::NeedMoreInput => "need_more_input",
            Self::NeedMoreSurface => "need_more_surface",
            Self::DeviceBusy => "device_busy",
            Self::DeviceLost => "device_lost",
            Self::ParamsChanged => "params_changed",
            Self::IncompatibleParams => "incompatible_params",
            Self::BufferTooSmall => "buffer_too_small",
            Self::Unknown(_) => "unknown",
        }
    }
}

/// Outcome of a header scan.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HeaderStatus {
    Found(FormatDescription),
    /// No complete sequence header in the buffered bytes yet.
    NeedMoreData,
}

// ─── Frames ──────────────────────────────────────────────────────────────

/// An engine-owned frame the pipeline borrows for a scoped transfer.
///
/// Plane access is only legal while the frame is mapped with a compatible
/// [`MapAccess`].  `release` consumes the handle and returns the surface to
/// its owner.
pub trait FrameSurface: Send {
    fn info(&self) -> FrameInfo;

    fn map(&mut self, access: MapAccess) -> Result<()>;

    fn unmap(&mut self) -> Result<()>;

    /// Read views of every plane.  Requires a read mapping.
    fn planes(&self) -> Result<Vec<PlaneView<'_>>>;

    /// Write views of every plane.  Requires a write mapping.
    fn planes_mut(&mut self) -> Result<Vec<PlaneViewMut<'_>>>;

    fn release(self) -> Result<()>
    where
        Self: Sized;
}

// ─── Engines ─────────────────────────────────────────────────────────────

/// Lifecycle shared by decode and encode sessions.
pub trait EngineSession: Send {
    /// Wait up to `timeout` for the work behind `token` to finish.
    fn poll(&mut self, token: CompletionToken, timeout: Duration) -> Result<PollStatus>;

    /// Tear the session down.  Called exactly once.
    fn close(&mut self) -> Result<()>;
}

/// Decoder session consuming a compressed elementary stream.
pub trait DecodeEngine: EngineSession {
    type Frame: FrameSurface;

    /// Scan the buffered bytes for a sequence header without consuming them.
    fn decode_header(&mut self, buffer: &CompressedBuffer) -> Result<HeaderStatus>;

    fn init(&mut self, format: &FormatDescription) -> Result<()>;

    /// Submit buffered bytes, or `None` to drain.  The engine advances the
    /// buffer's offset past every byte it consumed.
    fn submit(&mut self, input: Option<&mut CompressedBuffer>) -> Result<SubmitStatus<Self::Frame>>;
}

/// Encoder session producing a compressed elementary stream.
pub trait EncodeEngine: EngineSession {
    type Frame: FrameSurface;

    fn init(&mut self, config: &EncodeConfig) -> Result<()>;

    /// Hand out a writable input surface.
    fn acquire_frame(&mut self) -> Result<Self::Frame>;

    /// Submit a frame, or `None` to drain.  Coded bytes are appended to
    /// `output` and become valid once the returned token completes.
    fn submit(
        &mut self,
        frame: Option<&Self::Frame>,
        output: &mut CompressedBuffer,
    ) -> Result<SubmitStatus<()>>;
}
