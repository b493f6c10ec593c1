//! Bitstream syntax of the software codec.
//!
//! # Unit framing
//!
//! ```text
//! 00 00 01 | type (u8) | payload length (u32, big-endian) | payload
//! ```
//!
//! Bytes before a start code are not part of any unit and are skipped.
//!
//! # Sequence header (type 0x01, 17 bytes)
//!
//! | Field     | Type        |
//! |-----------|-------------|
//! | width     | u16 BE      |
//! | height    | u16 BE      |
//! | fourcc    | 4 ASCII     |
//! | fps_num   | u32 BE      |
//! | fps_den   | u32 BE      |
//! | quantizer | u8          |
//!
//! # Picture (type 0x02)
//!
//! `(run, value)` byte pairs, `run` in `1..=255`, covering the meaningful
//! bytes of every plane in raw-file order after a right shift by the
//! quantizer.  Runs may cross row and plane boundaries.

use vstream_core::error::{EngineError, Result};
use vstream_core::plane::{PlaneView, PlaneViewMut};
use vstream_core::types::{FormatDescription, PixelLayout};

pub const START_CODE: [u8; 3] = [0, 0, 1];
/// Start code, type byte and length field.
pub const UNIT_HEADER_LEN: usize = 8;
pub const SEQUENCE_PAYLOAD_LEN: usize = 17;

pub const UNIT_SEQUENCE: u8 = 0x01;
pub const UNIT_PICTURE: u8 = 0x02;

/// A complete unit found in a byte window.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Unit<'a> {
    pub kind: u8,
    pub payload: &'a [u8],
    /// Offset of the start code; bytes before it are garbage.
    pub start: usize,
    /// Offset one past the last payload byte.
    pub end: usize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Scan<'a> {
    Unit(Unit<'a>),
    /// No complete unit.  The first `skip` bytes can never belong to one.
    Incomplete { skip: usize },
}

/// Locate the first complete unit in `bytes`.
pub fn next_unit(bytes: &[u8]) -> Scan<'_> {
    let Some(start) = bytes.windows(START_CODE.len()).position(|w| w == START_CODE.as_slice()) else {
        // The tail may hold the first bytes of a start code.
        return Scan::Incomplete {
            skip: bytes.len().saturating_sub(START_CODE.len() - 1),
        };
    };
    let incomplete = Scan::Incomplete { skip: start };

    let Some(header) = bytes.get(start..start + UNIT_HEADER_LEN) else {
        return incomplete;
    };
    let kind = header[3];
    let len = u32::from_be_bytes([header[4], header[5], header[6], header[7]]) as usize;
    let body = start + UNIT_HEADER_LEN;
    let Some(end) = body.checked_add(len) else {
        return incomplete;
    };
    match bytes.get(body..end) {
        Some(payload) => Scan::Unit(Unit {
            kind,
            payload,
            start,
            end,
        }),
        None => incomplete,
    }
}

pub fn write_unit(kind: u8, payload: &[u8], out: &mut Vec<u8>) -> Result<()> {
    let len = u32::try_from(payload.len()).map_err(|_| {
        EngineError::Encode(format!("unit payload of {} bytes too large", payload.len()))
    })?;
    out.reserve(UNIT_HEADER_LEN + payload.len());
    out.extend_from_slice(&START_CODE);
    out.push(kind);
    out.extend_from_slice(&len.to_be_bytes());
    out.extend_from_slice(payload);
    Ok(())
}

// ─── Sequence header ─────────────────────────────────────────────────────

pub fn write_sequence(format: &FormatDescription, out: &mut Vec<u8>) -> Result<()> {
    let width = u16::try_from(format.width)
        .map_err(|_| EngineError::Encode(format!("width {} exceeds u16", format.width)))?;
    let height = u16::try_from(format.height)
        .map_err(|_| EngineError::Encode(format!("height {} exceeds u16", format.height)))?;

    let mut payload = Vec::with_capacity(SEQUENCE_PAYLOAD_LEN);
    payload.extend_from_slice(&width.to_be_bytes());
    payload.extend_from_slice(&height.to_be_bytes());
    payload.extend_from_slice(&format.layout.fourcc().to_le_bytes());
    payload.extend_from_slice(&format.fps_num.to_be_bytes());
    payload.extend_from_slice(&format.fps_den.to_be_bytes());
    payload.push(format.quantizer);
    write_unit(UNIT_SEQUENCE, &payload, out)
}

pub fn parse_sequence(payload: &[u8]) -> Result<FormatDescription> {
    let p: &[u8; SEQUENCE_PAYLOAD_LEN] = payload.try_into().map_err(|_| {
        EngineError::Decode(format!(
            "sequence header of {} bytes, expected {SEQUENCE_PAYLOAD_LEN}",
            payload.len()
        ))
    })?;
    let width = u16::from_be_bytes([p[0], p[1]]) as u32;
    let height = u16::from_be_bytes([p[2], p[3]]) as u32;
    let layout = PixelLayout::from_fourcc(u32::from_le_bytes([p[4], p[5], p[6], p[7]]))?;
    let fps_num = u32::from_be_bytes([p[8], p[9], p[10], p[11]]);
    let fps_den = u32::from_be_bytes([p[12], p[13], p[14], p[15]]);
    let quantizer = p[16];

    if width == 0 || height == 0 {
        return Err(EngineError::Decode(format!(
            "sequence header declares {width}x{height}"
        )));
    }
    if quantizer > 7 {
        return Err(EngineError::Decode(format!("quantizer {quantizer} out of range")));
    }
    Ok(FormatDescription {
        width,
        height,
        layout,
        fps_num,
        fps_den,
        quantizer,
    })
}

// ─── Picture payload ─────────────────────────────────────────────────────

/// Reconstruct a sample from its quantized value, centred in its bucket.
#[inline]
pub fn dequantize(value: u8, quantizer: u8) -> u8 {
    if quantizer == 0 {
        return value;
    }
    let v = ((value as u16) << quantizer) | (1 << (quantizer - 1));
    v.min(u8::MAX as u16) as u8
}

struct RunWriter<'a> {
    out: &'a mut Vec<u8>,
    value: u8,
    count: u8,
}

impl RunWriter<'_> {
    fn push(&mut self, value: u8) {
        if self.count > 0 && (value != self.value || self.count == u8::MAX) {
            self.flush();
        }
        self.value = value;
        self.count += 1;
    }

    fn flush(&mut self) {
        if self.count > 0 {
            self.out.push(self.count);
            self.out.push(self.value);
            self.count = 0;
        }
    }
}

/// Append the run-length coded picture payload for `planes` to `out`.
pub fn encode_picture(planes: &[PlaneView<'_>], quantizer: u8, out: &mut Vec<u8>) {
    let mut runs = RunWriter {
        out,
        value: 0,
        count: 0,
    };
    for plane in planes {
        for row in plane.iter_rows() {
            for &sample in row {
                runs.push(sample >> quantizer);
            }
        }
    }
    runs.flush();
}

/// Expand a picture payload into `planes`.
///
/// The payload must cover every meaningful byte exactly.
pub fn decode_picture(payload: &[u8], quantizer: u8, planes: &mut [PlaneViewMut<'_>]) -> Result<()> {
    if payload.len() % 2 != 0 {
        return Err(EngineError::Decode(format!(
            "picture payload of odd length {}",
            payload.len()
        )));
    }
    let mut pairs = payload.chunks_exact(2);
    let mut remaining = 0u8;
    let mut sample = 0u8;

    for plane in planes.iter_mut() {
        for row in 0..plane.rows() {
            for dst in plane.row_mut(row) {
                while remaining == 0 {
                    let pair = pairs.next().ok_or_else(|| {
                        EngineError::Decode("picture payload ends before the frame".into())
                    })?;
                    if pair[0] == 0 {
                        return Err(EngineError::Decode("zero-length run".into()));
                    }
                    remaining = pair[0];
                    sample = dequantize(pair[1], quantizer);
                }
                *dst = sample;
                remaining -= 1;
            }
        }
    }

    if remaining != 0 || pairs.next().is_some() {
        return Err(EngineError::Decode(
            "picture payload carries samples past the frame".into(),
        ));
    }
    Ok(())
}
