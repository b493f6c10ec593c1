//! Software encoder session.
//!
//! Each submitted frame is coded immediately into a picture unit and queued.
//! Once more than `output_delay` units are queued the oldest one is appended
//! to the caller's output buffer, preceded by the sequence header on the
//! first packet.  If the output buffer cannot hold the packet the submission
//! is undone and [`SubmitStatus::BufferTooSmall`] is returned, so the caller
//! can grow the buffer and resubmit the same frame.

use std::collections::VecDeque;
use std::time::Duration;

use tracing::{debug, info};

use vstream_core::buffer::CompressedBuffer;
use vstream_core::codec_traits::{
    CompletionToken, EncodeEngine, EngineSession, FrameSurface, PollStatus, SubmitStatus,
};
use vstream_core::error::{EngineError, Result};
use vstream_core::types::{EncodeConfig, FrameInfo};

use crate::config::SwEngineConfig;
use crate::decoder::Completions;
use crate::surface::{SurfacePool, SwSurface};
use crate::syntax::{self, UNIT_PICTURE};

struct Session {
    config: EncodeConfig,
    info: FrameInfo,
    pool: SurfacePool,
    /// Coded sequence header, emitted in front of the first packet.
    header: Option<Vec<u8>>,
}

/// CPU encoder producing the software bitstream.
pub struct SwEncoder {
    config: SwEngineConfig,
    session: Option<Session>,
    queue: VecDeque<Vec<u8>>,
    completions: Completions,
    pictures: u64,
    packets: u64,
    closed: bool,
}

impl SwEncoder {
    pub fn new(config: SwEngineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            session: None,
            queue: VecDeque::new(),
            completions: Completions::default(),
            pictures: 0,
            packets: 0,
            closed: false,
        })
    }

    /// Handle to the input surface pool, once initialized.
    pub fn pool(&self) -> Option<SurfacePool> {
        self.session.as_ref().map(|s| s.pool.clone())
    }

    pub fn frame_info(&self) -> Option<FrameInfo> {
        self.session.as_ref().map(|s| s.info)
    }

    pub fn packets_emitted(&self) -> u64 {
        self.packets
    }

    /// Append the oldest queued packet to `output`.
    ///
    /// Leaves everything untouched and returns `None` if it does not fit.
    fn emit(&mut self, output: &mut CompressedBuffer) -> Result<Option<CompletionToken>> {
        let session = self.session.as_mut().ok_or(EngineError::NotInitialized)?;
        let Some(packet) = self.queue.front() else {
            return Ok(None);
        };
        let header_len = session.header.as_ref().map_or(0, Vec::len);
        if header_len + packet.len() > output.free_tail() {
            debug!(
                need = header_len + packet.len(),
                have = output.free_tail(),
                "Output buffer too small for packet"
            );
            return Ok(None);
        }
        if let Some(header) = session.header.take() {
            output.append(&header)?;
        }
        output.append(packet)?;
        self.queue.pop_front();
        self.packets += 1;
        Ok(Some(self.completions.issue(self.config.completion_latency)))
    }

    fn code_frame(&self, frame: &SwSurface) -> Result<Vec<u8>> {
        let session = self.session.as_ref().ok_or(EngineError::NotInitialized)?;
        let info = frame.info();
        if info.layout != session.info.layout {
            return Err(EngineError::LayoutMismatch {
                expected: session.info.layout,
                actual: info.layout,
            });
        }
        if info != session.info {
            return Err(EngineError::InvalidFrame(format!(
                "frame {}x{} pitch {} does not match session {}x{} pitch {}",
                info.width,
                info.height,
                info.pitch,
                session.info.width,
                session.info.height,
                session.info.pitch
            )));
        }

        let planes = frame.host().view_planes()?;
        let mut payload = Vec::with_capacity(info.raw_frame_size() / 4);
        syntax::encode_picture(&planes, session.config.quantizer, &mut payload);
        let mut unit = Vec::with_capacity(syntax::UNIT_HEADER_LEN + payload.len());
        syntax::write_unit(UNIT_PICTURE, &payload, &mut unit)?;
        Ok(unit)
    }
}

impl EngineSession for SwEncoder {
    fn poll(&mut self, token: CompletionToken, _timeout: Duration) -> Result<PollStatus> {
        Ok(self.completions.poll(token))
    }

    fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        if !self.queue.is_empty() {
            debug!(
                dropped = self.queue.len(),
                "Closing encoder with undrained packets"
            );
        }
        self.queue.clear();
        info!(
            pictures = self.pictures,
            packets = self.packets,
            polls = self.completions.polls,
            "Software encoder closed"
        );
        Ok(())
    }
}

impl EncodeEngine for SwEncoder {
    type Frame = SwSurface;

    fn init(&mut self, config: &EncodeConfig) -> Result<()> {
        config.validate()?;
        let info = FrameInfo::aligned(
            config.width,
            config.height,
            config.layout,
            self.config.alignment,
        );
        let pool = SurfacePool::new(info, self.config.max_surfaces)?;
        let mut header = Vec::new();
        syntax::write_sequence(&config.format(), &mut header)?;
        info!(
            width = config.width,
            height = config.height,
            layout = %config.layout,
            pitch = info.pitch,
            fps = format!("{}/{}", config.fps_num, config.fps_den),
            quantizer = config.quantizer,
            output_delay = self.config.output_delay,
            "Software encoder initialized"
        );
        self.session = Some(Session {
            config: config.clone(),
            info,
            pool,
            header: Some(header),
        });
        Ok(())
    }

    fn acquire_frame(&mut self) -> Result<SwSurface> {
        let session = self.session.as_ref().ok_or(EngineError::NotInitialized)?;
        session
            .pool
            .acquire()?
            .ok_or_else(|| EngineError::SurfacesExhausted {
                capacity: session.pool.capacity(),
            })
    }

    fn submit(
        &mut self,
        frame: Option<&SwSurface>,
        output: &mut CompressedBuffer,
    ) -> Result<SubmitStatus<()>> {
        if self.session.is_none() {
            return Err(EngineError::NotInitialized);
        }

        let Some(frame) = frame else {
            return Ok(match self.emit(output)? {
                Some(token) => SubmitStatus::Ready((), token),
                None if self.queue.is_empty() => SubmitStatus::NeedMoreInput,
                None => SubmitStatus::BufferTooSmall,
            });
        };

        let unit = self.code_frame(frame)?;
        self.queue.push_back(unit);
        if self.queue.len() <= self.config.output_delay {
            self.pictures += 1;
            return Ok(SubmitStatus::NeedMoreInput);
        }
        match self.emit(output)? {
            Some(token) => {
                self.pictures += 1;
                Ok(SubmitStatus::Ready((), token))
            }
            None => {
                // Undo so a resubmission of the same frame is not coded twice.
                self.queue.pop_back();
                Ok(SubmitStatus::BufferTooSmall)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::SwDecoder;
    use vstream_core::codec_traits::{DecodeEngine, HeaderStatus};
    use vstream_core::types::{MapAccess, PixelLayout};

    fn encode_config() -> EncodeConfig {
        EncodeConfig {
            width: 16,
            height: 16,
            layout: PixelLayout::I420,
            fps_num: 30,
            fps_den: 1,
            quantizer: 0,
        }
    }

    fn encoder(output_delay: usize) -> SwEncoder {
        let mut enc = SwEncoder::new(SwEngineConfig {
            output_delay,
            completion_latency: 0,
            ..SwEngineConfig::default()
        })
        .unwrap();
        enc.init(&encode_config()).unwrap();
        enc
    }

    fn filled_frame(enc: &mut SwEncoder, value: u8) -> SwSurface {
        let mut frame = enc.acquire_frame().unwrap();
        frame.map(MapAccess::Write).unwrap();
        for mut plane in frame.planes_mut().unwrap() {
            for row in 0..plane.rows() {
                plane.row_mut(row).fill(value);
            }
        }
        frame.unmap().unwrap();
        frame
    }

    #[test]
    fn first_packet_carries_sequence_header() {
        let mut enc = encoder(0);
        let frame = filled_frame(&mut enc, 42);
        let mut out = CompressedBuffer::with_capacity(1024);
        assert!(matches!(
            enc.submit(Some(&frame), &mut out).unwrap(),
            SubmitStatus::Ready(..)
        ));
        frame.release().unwrap();

        let mut dec = SwDecoder::new(SwEngineConfig::default()).unwrap();
        match dec.decode_header(&out).unwrap() {
            HeaderStatus::Found(format) => assert_eq!(format, encode_config().format()),
            HeaderStatus::NeedMoreData => panic!("header missing"),
        }
        assert_eq!(enc.pool().unwrap().outstanding(), 0);
    }

    #[test]
    fn output_delay_defers_packets_until_drain() {
        let mut enc = encoder(2);
        let mut out = CompressedBuffer::with_capacity(4096);
        let mut ready = 0;
        for v in 0..3 {
            let frame = filled_frame(&mut enc, v);
            if let SubmitStatus::Ready(..) = enc.submit(Some(&frame), &mut out).unwrap() {
                ready += 1;
            }
            frame.release().unwrap();
        }
        assert_eq!(ready, 1);
        while let SubmitStatus::Ready(..) = enc.submit(None, &mut out).unwrap() {
            ready += 1;
        }
        assert_eq!(ready, 3);
        assert_eq!(enc.packets_emitted(), 3);
    }

    #[test]
    fn small_output_is_rejected_without_side_effects() {
        let mut enc = encoder(0);
        let frame = filled_frame(&mut enc, 7);
        let mut out = CompressedBuffer::with_capacity(8);
        assert!(matches!(
            enc.submit(Some(&frame), &mut out).unwrap(),
            SubmitStatus::BufferTooSmall
        ));
        assert!(out.is_empty());

        out.grow(1024).unwrap();
        assert!(matches!(
            enc.submit(Some(&frame), &mut out).unwrap(),
            SubmitStatus::Ready(..)
        ));
        frame.release().unwrap();
        assert!(matches!(
            enc.submit(None, &mut out).unwrap(),
            SubmitStatus::NeedMoreInput
        ));
    }

    #[test]
    fn pool_exhaustion_is_an_error() {
        let mut enc = SwEncoder::new(SwEngineConfig {
            output_delay: 0,
            max_surfaces: 2,
            ..SwEngineConfig::default()
        })
        .unwrap();
        enc.init(&encode_config()).unwrap();
        let a = enc.acquire_frame().unwrap();
        let b = enc.acquire_frame().unwrap();
        let err = enc.acquire_frame().unwrap_err();
        assert!(err.is_recoverable());
        a.release().unwrap();
        b.release().unwrap();
    }

    #[test]
    fn foreign_geometry_is_rejected() {
        let mut enc = encoder(0);
        let mut other = SwEncoder::new(SwEngineConfig::default()).unwrap();
        other
            .init(&EncodeConfig {
                width: 32,
                ..encode_config()
            })
            .unwrap();
        let frame = other.acquire_frame().unwrap();
        let mut out = CompressedBuffer::with_capacity(4096);
        assert!(matches!(
            enc.submit(Some(&frame), &mut out),
            Err(EngineError::InvalidFrame(_))
        ));
        frame.release().unwrap();
    }
}
