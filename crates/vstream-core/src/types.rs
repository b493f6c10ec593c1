//! Pixel layouts, frame geometry and stream format descriptions.
//!
//! # Plane rules
//!
//! Every layout documents which bytes of a plane are meaningful.  The raw
//! file format is exactly those bytes, row-major, top to bottom, with no
//! padding and no header.
//!
//! | Layout | Plane | Row bytes   | Rows   | Pitch     |
//! |--------|-------|-------------|--------|-----------|
//! | I420   | Y     | `width`     | `h`    | `pitch`   |
//! | I420   | U, V  | `width / 2` | `h / 2`| `pitch/2` |
//! | NV12   | Y     | `width`     | `h`    | `pitch`   |
//! | NV12   | UV    | `width`     | `h / 2`| `pitch`   |
//! | RGBA   | RGBA  | `pitch`     | `h`    | `pitch`   |
//!
//! For RGBA the whole padded row is meaningful.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};
use crate::plane::PlaneSpec;

// ─── Pixel layout ────────────────────────────────────────────────────────────

/// Pixel layout of an engine frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelLayout {
    /// Planar YUV 4:2:0 with separate U and V planes (aka yuv420p).
    I420,
    /// Semi-planar YUV 4:2:0 with one interleaved UV plane.
    Nv12,
    /// Packed 8-bit RGBA, one plane.
    Rgba,
}

impl PixelLayout {
    /// FourCC code as stored in bitstream headers (little-endian ASCII).
    pub const fn fourcc(self) -> u32 {
        match self {
            Self::I420 => u32::from_le_bytes(*b"I420"),
            Self::Nv12 => u32::from_le_bytes(*b"NV12"),
            Self::Rgba => u32::from_le_bytes(*b"RGB4"),
        }
    }

    /// Parse a FourCC code.  Anything outside the three recognized layouts
    /// fails with [`EngineError::UnsupportedFormat`].
    pub fn from_fourcc(code: u32) -> Result<Self> {
        match &code.to_le_bytes() {
            b"I420" | b"IYUV" => Ok(Self::I420),
            b"NV12" => Ok(Self::Nv12),
            b"RGB4" | b"RGBA" => Ok(Self::Rgba),
            other => Err(EngineError::UnsupportedFormat(format!(
                "fourcc {:?} ({code:#010x})",
                String::from_utf8_lossy(other)
            ))),
        }
    }

    /// Smallest legal row pitch in bytes for a frame of `width` pixels.
    pub const fn min_pitch(self, width: u32) -> usize {
        let w = width as usize;
        match self {
            // Chroma rows use pitch / 2, so keep the pitch even.
            Self::I420 => w + (w & 1),
            Self::Nv12 => w,
            Self::Rgba => w * 4,
        }
    }

    /// Transfer geometry of every plane for the given dimensions and pitch,
    /// in storage order.
    pub fn planes(self, width: u32, height: u32, pitch: usize) -> Vec<PlaneSpec> {
        let w = width as usize;
        let h = height as usize;
        let luma = PlaneSpec {
            offset: 0,
            pitch,
            row_bytes: w,
            rows: h,
        };
        let luma_size = pitch * h;
        match self {
            Self::I420 => {
                let chroma_pitch = pitch / 2;
                let chroma_size = chroma_pitch * h.div_ceil(2);
                let chroma = |offset| PlaneSpec {
                    offset,
                    pitch: chroma_pitch,
                    row_bytes: w / 2,
                    rows: h / 2,
                };
                vec![luma, chroma(luma_size), chroma(luma_size + chroma_size)]
            }
            Self::Nv12 => vec![
                luma,
                PlaneSpec {
                    offset: luma_size,
                    pitch,
                    row_bytes: w,
                    rows: h / 2,
                },
            ],
            Self::Rgba => vec![PlaneSpec {
                offset: 0,
                pitch,
                row_bytes: pitch,
                rows: h,
            }],
        }
    }

    /// Bytes an engine must allocate to back a frame.  Chroma planes round
    /// the row count up so odd heights still fit.
    pub const fn allocation_size(self, height: u32, pitch: usize) -> usize {
        let h = height as usize;
        match self {
            Self::I420 => pitch * h + 2 * (pitch / 2) * h.div_ceil(2),
            Self::Nv12 => pitch * h + pitch * h.div_ceil(2),
            Self::Rgba => pitch * h,
        }
    }
}

impl fmt::Display for PixelLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::I420 => "i420",
            Self::Nv12 => "nv12",
            Self::Rgba => "rgba",
        })
    }
}

impl FromStr for PixelLayout {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "i420" | "yuv420p" | "iyuv" => Ok(Self::I420),
            "nv12" => Ok(Self::Nv12),
            "rgba" | "rgb4" | "bgra" => Ok(Self::Rgba),
            other => Err(EngineError::UnsupportedFormat(format!(
                "'{other}'. Use i420, nv12 or rgba."
            ))),
        }
    }
}

// ─── Frame geometry ──────────────────────────────────────────────────────────

/// Geometry of one engine frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameInfo {
    /// Visible width in pixels.
    pub width: u32,
    /// Visible height in pixels.
    pub height: u32,
    /// Luma (or packed) row pitch in bytes.  May exceed the visible row.
    pub pitch: usize,
    pub layout: PixelLayout,
}

impl FrameInfo {
    /// Geometry with the pitch rounded up to `alignment` bytes.
    pub fn aligned(width: u32, height: u32, layout: PixelLayout, alignment: usize) -> Self {
        let alignment = alignment.max(2);
        Self {
            width,
            height,
            pitch: layout.min_pitch(width).next_multiple_of(alignment),
            layout,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.width == 0 || self.height == 0 {
            return Err(EngineError::InvalidFrame(format!(
                "zero-sized frame {}x{}",
                self.width, self.height
            )));
        }
        let min = self.layout.min_pitch(self.width);
        if self.pitch < min {
            return Err(EngineError::InvalidFrame(format!(
                "pitch {} below minimum {min} for {} width {}",
                self.pitch, self.layout, self.width
            )));
        }
        if self.layout == PixelLayout::I420 && self.pitch % 2 != 0 {
            return Err(EngineError::InvalidFrame(format!(
                "i420 pitch {} must be even",
                self.pitch
            )));
        }
        Ok(())
    }

    #[inline]
    pub fn planes(&self) -> Vec<PlaneSpec> {
        self.layout.planes(self.width, self.height, self.pitch)
    }

    #[inline]
    pub fn allocation_size(&self) -> usize {
        self.layout.allocation_size(self.height, self.pitch)
    }

    /// Size of one frame in the raw file format.
    pub fn raw_frame_size(&self) -> usize {
        self.planes().iter().map(PlaneSpec::packed_size).sum()
    }
}

// ─── Access modes ────────────────────────────────────────────────────────────

/// CPU access requested when mapping an engine frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MapAccess {
    Read,
    Write,
    ReadWrite,
}

impl MapAccess {
    pub const fn allows_read(self) -> bool {
        matches!(self, Self::Read | Self::ReadWrite)
    }

    pub const fn allows_write(self) -> bool {
        matches!(self, Self::Write | Self::ReadWrite)
    }
}

// ─── Stream formats ──────────────────────────────────────────────────────────

/// Stream format negotiated from a sequence header.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormatDescription {
    pub width: u32,
    pub height: u32,
    pub layout: PixelLayout,
    pub fps_num: u32,
    pub fps_den: u32,
    /// Quantizer shift the stream was coded with (0 = lossless).
    pub quantizer: u8,
}

impl FormatDescription {
    /// Whether a new header can replace this one without re-initializing.
    pub fn same_geometry(&self, other: &Self) -> bool {
        self.width == other.width && self.height == other.height && self.layout == other.layout
    }
}

/// Encoder session parameters.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EncodeConfig {
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Layout of the raw input frames.
    pub layout: PixelLayout,
    /// Framerate numerator.
    pub fps_num: u32,
    /// Framerate denominator.
    pub fps_den: u32,
    /// Quantizer shift (0 = lossless, each step halves sample precision).
    pub quantizer: u8,
}

impl Default for EncodeConfig {
    fn default() -> Self {
        Self {
            width: 1920,
            height: 1080,
            layout: PixelLayout::I420,
            fps_num: 30,
            fps_den: 1,
            quantizer: 0,
        }
    }
}

impl EncodeConfig {
    pub fn validate(&self) -> Result<()> {
        if self.width == 0 || self.height == 0 {
            return Err(EngineError::Config(format!(
                "frame size {}x{} must be non-zero",
                self.width, self.height
            )));
        }
        if self.width > u16::MAX as u32 || self.height > u16::MAX as u32 {
            return Err(EngineError::Config(format!(
                "frame size {}x{} exceeds {}x{}",
                self.width,
                self.height,
                u16::MAX,
                u16::MAX
            )));
        }
        if self.fps_num == 0 || self.fps_den == 0 {
            return Err(EngineError::Config("framerate must be non-zero".into()));
        }
        if self.quantizer > 7 {
            return Err(EngineError::Config(format!(
                "quantizer {} out of range 0..=7",
                self.quantizer
            )));
        }
        Ok(())
    }

    pub fn format(&self) -> FormatDescription {
        FormatDescription {
            width: self.width,
            height: self.height,
            layout: self.layout,
            fps_num: self.fps_num,
            fps_den: self.fps_den,
            quantizer: self.quantizer,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn i420_planes_follow_half_pitch_rule() {
        let planes = PixelLayout::I420.planes(1918, 1079, 1920);
        assert_eq!(planes.len(), 3);
        assert_eq!(planes[0].row_bytes, 1918);
        assert_eq!(planes[0].rows, 1079);
        assert_eq!(planes[1].pitch, 960);
        assert_eq!(planes[1].row_bytes, 959);
        assert_eq!(planes[1].rows, 539);
        assert_eq!(planes[1].offset, 1920 * 1079);
        assert_eq!(planes[2].offset, 1920 * 1079 + 960 * 540);
    }

    #[test]
    fn nv12_chroma_uses_full_pitch() {
        let planes = PixelLayout::Nv12.planes(16, 16, 32);
        assert_eq!(planes[1].pitch, 32);
        assert_eq!(planes[1].row_bytes, 16);
        assert_eq!(planes[1].rows, 8);
    }

    #[test]
    fn rgba_row_is_whole_pitch() {
        let info = FrameInfo::aligned(10, 4, PixelLayout::Rgba, 64);
        assert_eq!(info.pitch, 64);
        assert_eq!(info.raw_frame_size(), 64 * 4);
    }

    #[test]
    fn raw_frame_size_matches_w_h_3_over_2_for_even_i420() {
        let info = FrameInfo::aligned(16, 16, PixelLayout::I420, 32);
        assert_eq!(info.raw_frame_size(), 16 * 16 * 3 / 2);
    }

    #[test]
    fn allocation_covers_every_plane() {
        for layout in [PixelLayout::I420, PixelLayout::Nv12, PixelLayout::Rgba] {
            for (w, h) in [(16, 16), (1918, 1079), (3, 1)] {
                let info = FrameInfo::aligned(w, h, layout, 32);
                let size = info.allocation_size();
                for plane in info.planes() {
                    assert!(plane.offset + plane.span() <= size, "{layout} {w}x{h}");
                }
            }
        }
    }

    #[test]
    fn fourcc_round_trip_and_rejection() {
        for layout in [PixelLayout::I420, PixelLayout::Nv12, PixelLayout::Rgba] {
            assert_eq!(PixelLayout::from_fourcc(layout.fourcc()).unwrap(), layout);
        }
        let err = PixelLayout::from_fourcc(u32::from_le_bytes(*b"P010")).unwrap_err();
        assert!(matches!(err, EngineError::UnsupportedFormat(_)));
    }

    #[test]
    fn layout_names_parse() {
        assert_eq!("yuv420p".parse::<PixelLayout>().unwrap(), PixelLayout::I420);
        assert_eq!("NV12".parse::<PixelLayout>().unwrap(), PixelLayout::Nv12);
        assert!("yuyv".parse::<PixelLayout>().is_err());
    }

    #[test]
    fn validate_rejects_short_pitch() {
        let info = FrameInfo {
            width: 16,
            height: 2,
            pitch: 8,
            layout: PixelLayout::Nv12,
        };
        assert!(info.validate().is_err());
        let odd = FrameInfo {
            width: 15,
            height: 2,
            pitch: 15,
            layout: PixelLayout::I420,
        };
        assert!(odd.validate().is_err());
    }

    #[test]
    fn encode_config_bounds() {
        assert!(EncodeConfig::default().validate().is_ok());
        let cfg = EncodeConfig {
            quantizer: 9,
            ..EncodeConfig::default()
        };
        assert!(cfg.validate().is_err());
    }
}
