//! Encode pipeline driver.
//!
//! ```text
//! source ─→ read_raw_frame ─→ engine.submit ─→ poll ─→ CompressedBuffer::write_to ─→ sink
//! ```
//!
//! At most one engine frame is alive per iteration.  A frame that could not
//! be filled completely is released without ever being submitted.

use std::io::{Read, Write};
use std::time::Instant;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use vstream_core::buffer::CompressedBuffer;
use vstream_core::codec_traits::{EncodeEngine, FrameSurface, SubmitStatus};
use vstream_core::error::Result;
use vstream_core::frame::FrameLease;
use vstream_core::transfer::{TransferStatus, read_raw_frame};
use vstream_core::types::{EncodeConfig, FrameInfo};

use crate::config::PipelineConfig;
use crate::machine::{Action, InputEvent, InputSignal, PipelineKind, PipelineState, SubmitOutcome};
use crate::report::{Counted, PipelineReport};
use crate::session::{SessionGuard, wait_for_completion};

/// Streams packed raw frames through an [`EncodeEngine`] and writes the
/// compressed elementary stream.
pub struct EncodePipeline {
    config: PipelineConfig,
    cancel: CancellationToken,
}

impl EncodePipeline {
    pub fn new(config: PipelineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            cancel: CancellationToken::new(),
        })
    }

    /// Use an externally owned cancellation token.
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Encode until the source runs out and the engine has drained.
    pub fn run<E, R, W>(
        &self,
        engine: &mut E,
        encode: &EncodeConfig,
        source: &mut R,
        sink: &mut W,
    ) -> Result<PipelineReport>
    where
        E: EncodeEngine + ?Sized,
        R: Read + ?Sized,
        W: Write + ?Sized,
    {
        encode.validate()?;
        let started = Instant::now();
        let mut source = Counted::new(source);
        let mut sink = Counted::new(sink);
        let mut output = CompressedBuffer::with_capacity(self.config.buffer_capacity);
        let mut state = PipelineState::new(PipelineKind::Encode);
        let mut session = SessionGuard::new(engine);

        session.init(encode)?;
        info!(
            width = encode.width,
            height = encode.height,
            layout = %encode.layout,
            quantizer = encode.quantizer,
            "Encode pipeline started"
        );

        let mut raw_frame_size = None;
        while !state.is_terminal() {
            let lease = if state.is_running() {
                self.next_frame(&mut *session, &mut source, &mut state, &mut raw_frame_size)?
            } else {
                None
            };

            loop {
                let frame = lease.as_ref().map(FrameLease::get);
                let status = session.submit(frame, &mut output)?;
                let outcome = SubmitOutcome::from(&status);
                match (state.step(outcome, InputSignal::Flowing), status) {
                    (Action::Emit, SubmitStatus::Ready((), token)) => {
                        wait_for_completion(
                            &mut *session,
                            token,
                            self.config.poll_timeout(),
                            &mut state,
                        )?;
                        let written = output.write_to(&mut sink)?;
                        state.packets += 1;
                        debug!(packet = state.packets, bytes = written, "Packet written");
                    }
                    (Action::Backoff, _) => {
                        state.note_busy(self.config.max_busy_retries)?;
                        std::thread::sleep(self.config.busy_backoff());
                        continue;
                    }
                    (Action::GrowBuffer, _) => {
                        let capacity = self.config.grow_buffer(&mut output)?;
                        state.buffer_grows += 1;
                        info!(capacity, "Grew encoder output buffer");
                        continue;
                    }
                    (Action::Abort(reason), _) => return Err(reason.into()),
                    _ => {}
                }
                break;
            }

            if let Some(lease) = lease {
                lease.release()?;
            }
        }

        if let Some(size) = raw_frame_size {
            let leftover = source.count() % size as u64;
            if leftover != 0 {
                warn!(
                    bytes = leftover,
                    frame_size = size,
                    "Discarded trailing partial frame"
                );
            }
        }

        sink.flush()?;
        session.close()?;

        let report = PipelineReport::from_state(
            &state,
            source.count(),
            sink.count(),
            started.elapsed(),
        );
        info!(
            frames = report.frames,
            packets = report.packets,
            bytes_in = report.bytes_in,
            bytes_out = report.bytes_out,
            busy_retries = report.busy_retries,
            buffer_grows = report.buffer_grows,
            cancelled = report.cancelled,
            elapsed_ms = report.elapsed_ms,
            "Encode pipeline finished"
        );
        Ok(report)
    }

    /// Acquire a frame and fill it from `source`.
    ///
    /// Returns `None` and moves the pipeline to draining when the source is
    /// done, fails, or the run is cancelled.  The frame is released on every
    /// such path.
    fn next_frame<E, R>(
        &self,
        engine: &mut E,
        source: &mut R,
        state: &mut PipelineState,
        raw_frame_size: &mut Option<usize>,
    ) -> Result<Option<FrameLease<E::Frame>>>
    where
        E: EncodeEngine + ?Sized,
        R: Read + ?Sized,
    {
        if self.cancel.is_cancelled() {
            state.end_input(InputEvent::Cancelled);
            return Ok(None);
        }

        let mut lease = FrameLease::new(engine.acquire_frame()?);
        let info: FrameInfo = lease.get().info();
        raw_frame_size.get_or_insert(info.raw_frame_size());

        match read_raw_frame(lease.get_mut(), source) {
            Ok(TransferStatus::Complete) => {
                state.frames += 1;
                Ok(Some(lease))
            }
            Ok(TransferStatus::Partial) => {
                lease.release()?;
                state.end_input(InputEvent::Partial);
                Ok(None)
            }
            Err(e) => {
                warn!(error = %e, "Raw frame read failed");
                lease.release()?;
                state.end_input(InputEvent::Failed);
                Ok(None)
            }
        }
    }
}
