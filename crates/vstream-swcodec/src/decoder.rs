//! Software decoder session.
//!
//! # Pipeline
//!
//! ```text
//! CompressedBuffer ─→ next_unit ─→ sequence? ─→ ParamsChanged / IncompatibleParams
//!                                  picture?  ─→ pool surface ─→ reorder queue ─→ Ready
//! ```
//!
//! Decoded surfaces wait in a queue of `output_delay` pictures before they
//! are handed out, so the last pictures only appear while draining.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use tracing::{debug, info, warn};

use vstream_core::buffer::CompressedBuffer;
use vstream_core::codec_traits::{
    CompletionToken, DecodeEngine, EngineSession, FrameSurface, HeaderStatus, PollStatus,
    SubmitStatus,
};
use vstream_core::error::{EngineError, Result};
use vstream_core::types::{FormatDescription, FrameInfo};

use crate::config::SwEngineConfig;
use crate::surface::{SurfacePool, SwSurface};
use crate::syntax::{self, Scan, UNIT_PICTURE, UNIT_SEQUENCE};

/// Poll status for a token this session never issued.
pub const POLL_UNKNOWN_TOKEN: i32 = -22;

/// Completion tracking shared by the decoder and the encoder.
#[derive(Debug, Default)]
pub(crate) struct Completions {
    pending: HashMap<u64, u32>,
    next: u64,
    pub(crate) polls: u64,
}

impl Completions {
    pub(crate) fn issue(&mut self, latency: u32) -> CompletionToken {
        let token = CompletionToken(self.next);
        self.next += 1;
        self.pending.insert(token.0, latency);
        token
    }

    pub(crate) fn poll(&mut self, token: CompletionToken) -> PollStatus {
        self.polls += 1;
        match self.pending.get_mut(&token.0) {
            None => PollStatus::Failed(POLL_UNKNOWN_TOKEN),
            Some(0) => {
                self.pending.remove(&token.0);
                PollStatus::Done
            }
            Some(remaining) => {
                *remaining -= 1;
                PollStatus::StillExecuting
            }
        }
    }

    pub(crate) fn in_flight(&self) -> usize {
        self.pending.len()
    }
}

struct Session {
    format: FormatDescription,
    info: FrameInfo,
    pool: SurfacePool,
}

/// CPU decoder for the software bitstream.
pub struct SwDecoder {
    config: SwEngineConfig,
    session: Option<Session>,
    queue: VecDeque<SwSurface>,
    completions: Completions,
    pictures: u64,
    closed: bool,
}

impl SwDecoder {
    pub fn new(config: SwEngineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            session: None,
            queue: VecDeque::new(),
            completions: Completions::default(),
            pictures: 0,
            closed: false,
        })
    }

    /// Current stream format, once initialized.
    pub fn format(&self) -> Option<FormatDescription> {
        self.session.as_ref().map(|s| s.format)
    }

    /// Handle to the output surface pool, once initialized.
    pub fn pool(&self) -> Option<SurfacePool> {
        self.session.as_ref().map(|s| s.pool.clone())
    }

    /// Geometry of the surfaces this session hands out.
    pub fn frame_info(&self) -> Option<FrameInfo> {
        self.session.as_ref().map(|s| s.info)
    }

    /// Pictures decoded so far, including those still queued.
    pub fn pictures_decoded(&self) -> u64 {
        self.pictures
    }

    fn emit(&mut self) -> Option<SubmitStatus<SwSurface>> {
        let surface = self.queue.pop_front()?;
        let token = self.completions.issue(self.config.completion_latency);
        Some(SubmitStatus::Ready(surface, token))
    }

    fn decode_units(&mut self, input: &mut CompressedBuffer) -> Result<SubmitStatus<SwSurface>> {
        loop {
            if self.queue.len() > self.config.output_delay {
                if let Some(ready) = self.emit() {
                    return Ok(ready);
                }
            }

            let session = self.session.as_mut().ok_or(EngineError::NotInitialized)?;
            let unit = match syntax::next_unit(input.unconsumed()) {
                Scan::Incomplete { skip } => {
                    if skip > 0 {
                        debug!(bytes = skip, "Skipping bytes outside any unit");
                    }
                    input.consume(skip)?;
                    return Ok(SubmitStatus::NeedMoreInput);
                }
                Scan::Unit(unit) => unit,
            };
            let (start, end, kind) = (unit.start, unit.end, unit.kind);

            match kind {
                UNIT_SEQUENCE => {
                    let format = syntax::parse_sequence(unit.payload)?;
                    input.consume(start)?;
                    if !format.same_geometry(&session.format) {
                        warn!(
                            current = ?session.format,
                            incoming = ?format,
                            "Sequence header changes frame geometry"
                        );
                        return Ok(SubmitStatus::IncompatibleParams);
                    }
                    input.consume(end - start)?;
                    if format != session.format {
                        session.format = format;
                        return Ok(SubmitStatus::ParamsChanged);
                    }
                }
                UNIT_PICTURE => {
                    let Some(mut surface) = session.pool.acquire()? else {
                        input.consume(start)?;
                        return Ok(SubmitStatus::NeedMoreSurface);
                    };
                    let decoded = {
                        let mut planes = surface.host_mut().view_planes_mut()?;
                        syntax::decode_picture(unit.payload, session.format.quantizer, &mut planes)
                    };
                    if let Err(e) = decoded {
                        surface.release()?;
                        return Err(e);
                    }
                    input.consume(end)?;
                    self.queue.push_back(surface);
                    self.pictures += 1;
                    debug!(picture = self.pictures, queued = self.queue.len(), "Picture decoded");
                }
                other => {
                    debug!(kind = other, bytes = end - start, "Skipping unknown unit");
                    input.consume(end)?;
                }
            }
        }
    }
}

impl EngineSession for SwDecoder {
    fn poll(&mut self, token: CompletionToken, _timeout: Duration) -> Result<PollStatus> {
        Ok(self.completions.poll(token))
    }

    fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        for surface in self.queue.drain(..) {
            surface.release()?;
        }
        info!(
            pictures = self.pictures,
            polls = self.completions.polls,
            in_flight = self.completions.in_flight(),
            "Software decoder closed"
        );
        Ok(())
    }
}

impl DecodeEngine for SwDecoder {
    type Frame = SwSurface;

    fn decode_header(&mut self, buffer: &CompressedBuffer) -> Result<HeaderStatus> {
        let mut window = buffer.unconsumed();
        loop {
            match syntax::next_unit(window) {
                Scan::Incomplete { .. } => return Ok(HeaderStatus::NeedMoreData),
                Scan::Unit(unit) if unit.kind == UNIT_SEQUENCE => {
                    return Ok(HeaderStatus::Found(syntax::parse_sequence(unit.payload)?));
                }
                Scan::Unit(unit) => window = &window[unit.end..],
            }
        }
    }

    fn init(&mut self, format: &FormatDescription) -> Result<()> {
        let info = FrameInfo::aligned(
            format.width,
            format.height,
            format.layout,
            self.config.alignment,
        );
        let pool = SurfacePool::new(info, self.config.max_surfaces)?;
        info!(
            width = format.width,
            height = format.height,
            layout = %format.layout,
            pitch = info.pitch,
            fps = format!("{}/{}", format.fps_num, format.fps_den),
            quantizer = format.quantizer,
            output_delay = self.config.output_delay,
            "Software decoder initialized"
        );
        self.session = Some(Session {
            format: *format,
            info,
            pool,
        });
        Ok(())
    }

    fn submit(&mut self, input: Option<&mut CompressedBuffer>) -> Result<SubmitStatus<SwSurface>> {
        if self.session.is_none() {
            return Err(EngineError::NotInitialized);
        }
        match input {
            Some(buffer) => self.decode_units(buffer),
            None => Ok(self.emit().unwrap_or(SubmitStatus::NeedMoreInput)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vstream_core::types::PixelLayout;

    fn format(quantizer: u8) -> FormatDescription {
        FormatDescription {
            width: 8,
            height: 4,
            layout: PixelLayout::I420,
            fps_num: 25,
            fps_den: 1,
            quantizer,
        }
    }

    fn picture(value: u8, samples: usize) -> Vec<u8> {
        let mut payload = Vec::new();
        let mut left = samples;
        while left > 0 {
            let run = left.min(255);
            payload.push(run as u8);
            payload.push(value);
            left -= run;
        }
        let mut out = Vec::new();
        syntax::write_unit(UNIT_PICTURE, &payload, &mut out).unwrap();
        out
    }

    fn buffer_with(bytes: &[u8]) -> CompressedBuffer {
        let mut buf = CompressedBuffer::with_capacity(bytes.len().max(1) * 2);
        buf.append(bytes).unwrap();
        buf
    }

    fn decoder(output_delay: usize) -> SwDecoder {
        SwDecoder::new(SwEngineConfig {
            output_delay,
            completion_latency: 0,
            ..SwEngineConfig::default()
        })
        .unwrap()
    }

    const SAMPLES: usize = 8 * 4 * 3 / 2;

    #[test]
    fn header_scan_skips_garbage_and_pictures() {
        let mut bytes = vec![0xEE, 0x00];
        bytes.extend(picture(1, SAMPLES));
        syntax::write_sequence(&format(0), &mut bytes).unwrap();
        let mut dec = decoder(0);
        let buf = buffer_with(&bytes);
        assert_eq!(
            dec.decode_header(&buf).unwrap(),
            HeaderStatus::Found(format(0))
        );
        assert_eq!(buf.data_length(), bytes.len(), "scan must not consume");

        let truncated = buffer_with(&bytes[..bytes.len() - 1]);
        assert_eq!(
            dec.decode_header(&truncated).unwrap(),
            HeaderStatus::NeedMoreData
        );
    }

    #[test]
    fn submit_before_init_fails() {
        let mut dec = decoder(0);
        assert!(matches!(
            dec.submit(None),
            Err(EngineError::NotInitialized)
        ));
    }

    #[test]
    fn output_delay_holds_pictures_until_drain() {
        let mut bytes = Vec::new();
        syntax::write_sequence(&format(0), &mut bytes).unwrap();
        for v in 1..=3 {
            bytes.extend(picture(v, SAMPLES));
        }
        let mut dec = decoder(2);
        dec.init(&format(0)).unwrap();
        let mut buf = buffer_with(&bytes);

        let mut values = Vec::new();
        let take = |status: SubmitStatus<SwSurface>, values: &mut Vec<u8>| match status {
            SubmitStatus::Ready(surface, _) => {
                values.push(surface.host().as_bytes()[0]);
                surface.release().unwrap();
                true
            }
            SubmitStatus::NeedMoreInput => false,
            other => panic!("unexpected {}", other.name()),
        };

        assert!(take(dec.submit(Some(&mut buf)).unwrap(), &mut values));
        assert!(!take(dec.submit(Some(&mut buf)).unwrap(), &mut values));
        assert!(buf.is_empty());
        while take(dec.submit(None).unwrap(), &mut values) {}
        assert_eq!(values, vec![1, 2, 3]);
        assert_eq!(dec.pool().unwrap().outstanding(), 0);
    }

    #[test]
    fn close_releases_queued_pictures() {
        let mut bytes = picture(5, SAMPLES);
        bytes.extend(picture(6, SAMPLES));
        let mut dec = decoder(2);
        dec.init(&format(0)).unwrap();
        let mut buf = buffer_with(&bytes);

        assert!(matches!(
            dec.submit(Some(&mut buf)).unwrap(),
            SubmitStatus::NeedMoreInput
        ));
        assert!(buf.is_empty());
        assert_eq!(dec.pictures_decoded(), 2);
        let pool = dec.pool().unwrap();
        assert_eq!(pool.outstanding(), 2);

        dec.close().unwrap();
        assert_eq!(pool.outstanding(), 0);
        dec.close().unwrap();
    }

    #[test]
    fn geometry_change_is_incompatible_and_not_consumed() {
        let mut bytes = Vec::new();
        let other = FormatDescription {
            width: 16,
            ..format(0)
        };
        syntax::write_sequence(&other, &mut bytes).unwrap();
        let mut dec = decoder(0);
        dec.init(&format(0)).unwrap();
        let mut buf = buffer_with(&bytes);
        assert!(matches!(
            dec.submit(Some(&mut buf)).unwrap(),
            SubmitStatus::IncompatibleParams
        ));
        assert_eq!(buf.data_length(), bytes.len());
    }

    #[test]
    fn quantizer_change_is_reported_and_applied() {
        let mut bytes = Vec::new();
        syntax::write_sequence(&format(3), &mut bytes).unwrap();
        bytes.extend(picture(4, SAMPLES));
        let mut dec = decoder(0);
        dec.init(&format(0)).unwrap();
        let mut buf = buffer_with(&bytes);

        assert!(matches!(
            dec.submit(Some(&mut buf)).unwrap(),
            SubmitStatus::ParamsChanged
        ));
        assert_eq!(dec.format().unwrap().quantizer, 3);
        match dec.submit(Some(&mut buf)).unwrap() {
            SubmitStatus::Ready(surface, _) => {
                assert_eq!(surface.host().as_bytes()[0], (4 << 3) | 4);
                surface.release().unwrap();
            }
            other => panic!("unexpected {}", other.name()),
        }
    }

    #[test]
    fn exhausted_pool_reports_need_more_surface() {
        let mut bytes = Vec::new();
        for v in 1..=3 {
            bytes.extend(picture(v, SAMPLES));
        }
        let mut dec = SwDecoder::new(SwEngineConfig {
            output_delay: 0,
            completion_latency: 0,
            max_surfaces: 2,
            ..SwEngineConfig::default()
        })
        .unwrap();
        dec.init(&format(0)).unwrap();
        let mut buf = buffer_with(&bytes);

        let mut held = Vec::new();
        for _ in 0..2 {
            match dec.submit(Some(&mut buf)).unwrap() {
                SubmitStatus::Ready(surface, _) => held.push(surface),
                other => panic!("unexpected {}", other.name()),
            }
        }
        let before = buf.data_length();
        assert!(matches!(
            dec.submit(Some(&mut buf)).unwrap(),
            SubmitStatus::NeedMoreSurface
        ));
        assert_eq!(buf.data_length(), before);

        for surface in held {
            surface.release().unwrap();
        }
        assert!(matches!(
            dec.submit(Some(&mut buf)).unwrap(),
            SubmitStatus::Ready(..)
        ));
    }

    #[test]
    fn completion_latency_counts_polls() {
        let mut c = Completions::default();
        let token = c.issue(2);
        assert_eq!(c.poll(token), PollStatus::StillExecuting);
        assert_eq!(c.poll(token), PollStatus::StillExecuting);
        assert_eq!(c.poll(token), PollStatus::Done);
        assert_eq!(c.poll(token), PollStatus::Failed(POLL_UNKNOWN_TOKEN));
        assert_eq!(c.in_flight(), 0);
    }

    #[test]
    fn corrupt_picture_is_a_decode_error() {
        let bytes = picture(9, SAMPLES - 1);
        let mut dec = decoder(0);
        dec.init(&format(0)).unwrap();
        let mut buf = buffer_with(&bytes);
        assert!(matches!(
            dec.submit(Some(&mut buf)),
            Err(EngineError::Decode(_))
        ));
        assert_eq!(dec.pool().unwrap().outstanding(), 0);
    }
}
