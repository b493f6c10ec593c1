//! Decode pipeline driver.
//!
//! ```text
//! source ─→ CompressedBuffer::refill ─→ engine.submit ─→ poll ─→ write_raw_frame ─→ sink
//! ```
//!
//! One logical thread of control.  Cancellation stops refilling and drains
//! the engine; work already submitted always completes.

use std::io::{Read, Write};
use std::time::Instant;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use vstream_core::buffer::{CompressedBuffer, RefillStatus};
use vstream_core::codec_traits::{DecodeEngine, HeaderStatus, SubmitStatus};
use vstream_core::error::{EngineError, Result};
use vstream_core::frame::FrameLease;
use vstream_core::transfer::write_raw_frame;
use vstream_core::types::FormatDescription;

use crate::config::PipelineConfig;
use crate::machine::{Action, InputEvent, InputSignal, PipelineKind, PipelineState, SubmitOutcome};
use crate::report::{Counted, PipelineReport};
use crate::session::{SessionGuard, wait_for_completion};

/// Streams a compressed elementary stream through a [`DecodeEngine`] and
/// writes packed raw frames.
pub struct DecodePipeline {
    config: PipelineConfig,
    cancel: CancellationToken,
}

impl DecodePipeline {
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

    /// Decode until the engine has drained.
    ///
    /// The engine session is closed on every exit path.  The sink is flushed
    /// on success only.
    pub fn run<E, R, W>(&self, engine: &mut E, source: &mut R, sink: &mut W) -> Result<PipelineReport>
    where
        E: DecodeEngine + ?Sized,
        R: Read + ?Sized,
        W: Write + ?Sized,
    {
        let started = Instant::now();
        let mut source = Counted::new(source);
        let mut sink = Counted::new(sink);
        let mut buffer = CompressedBuffer::with_capacity(self.config.buffer_capacity);
        let mut state = PipelineState::new(PipelineKind::Decode);
        let mut session = SessionGuard::new(engine);

        let format = self.read_header(&mut *session, &mut buffer, &mut source, &mut state)?;
        session.init(&format)?;
        info!(
            width = format.width,
            height = format.height,
            layout = %format.layout,
            buffer_capacity = buffer.capacity(),
            "Decode pipeline started"
        );

        let mut source_dry = false;
        while !state.is_terminal() {
            if state.is_running() {
                if self.cancel.is_cancelled() {
                    state.end_input(InputEvent::Cancelled);
                } else {
                    match buffer.refill(&mut source)? {
                        RefillStatus::Exhausted => state.end_input(InputEvent::Exhausted),
                        // A full buffer reads nothing without the source being dry.
                        RefillStatus::Filled { read } => {
                            source_dry = read == 0 && buffer.free_tail() > 0;
                        }
                    }
                }
            }

            loop {
                let status = if state.is_running() {
                    session.submit(Some(&mut buffer))?
                } else {
                    session.submit(None)?
                };
                let outcome = SubmitOutcome::from(&status);
                let input = if buffer.data_length() == buffer.capacity() {
                    InputSignal::Full
                } else if source_dry {
                    InputSignal::Dry
                } else {
                    InputSignal::Flowing
                };
                match (state.step(outcome, input), status) {
                    (Action::Emit, SubmitStatus::Ready(frame, token)) => {
                        let lease = FrameLease::new(frame);
                        wait_for_completion(
                            &mut *session,
                            token,
                            self.config.poll_timeout(),
                            &mut state,
                        )?;
                        write_raw_frame(lease.into_inner(), &mut sink)?;
                        state.frames += 1;
                        debug!(frame = state.frames, "Frame decoded");
                    }
                    (Action::Backoff, _) => {
                        state.note_busy(self.config.max_busy_retries)?;
                        std::thread::sleep(self.config.busy_backoff());
                        continue;
                    }
                    (Action::GrowBuffer, _) => {
                        let capacity = self.config.grow_buffer(&mut buffer)?;
                        state.buffer_grows += 1;
                        debug!(capacity, "Grew input buffer for an oversized unit");
                    }
                    (Action::Abort(reason), _) => return Err(reason.into()),
                    _ => {}
                }
                break;
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
            bytes_in = report.bytes_in,
            bytes_out = report.bytes_out,
            busy_retries = report.busy_retries,
            cancelled = report.cancelled,
            elapsed_ms = report.elapsed_ms,
            "Decode pipeline finished"
        );
        Ok(report)
    }

    /// Refill until the engine finds a sequence header.  Nothing is consumed.
    fn read_header<E, R>(
        &self,
        engine: &mut E,
        buffer: &mut CompressedBuffer,
        source: &mut R,
        state: &mut PipelineState,
    ) -> Result<FormatDescription>
    where
        E: DecodeEngine + ?Sized,
        R: Read + ?Sized,
    {
        loop {
            let read = match buffer.refill(source)? {
                RefillStatus::Exhausted => return Err(EngineError::MissingHeader),
                RefillStatus::Filled { read } => read,
            };
            match engine.decode_header(buffer)? {
                HeaderStatus::Found(format) => return Ok(format),
                HeaderStatus::NeedMoreData if buffer.free_tail() == 0 => {
                    self.config.grow_buffer(buffer)?;
                    state.buffer_grows += 1;
                }
                HeaderStatus::NeedMoreData if read == 0 => return Err(EngineError::MissingHeader),
                HeaderStatus::NeedMoreData => {}
            }
        }
    }
}
