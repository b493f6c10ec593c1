//! Planar frame transfer between packed raw streams and strided surfaces.
//!
//! Raw frames on disk carry exactly the meaningful bytes of each plane, row
//! by row (see [`crate::types`]).  Engine surfaces may pad every row up to
//! their pitch; the padding is never read from or written to a stream.

use std::io::{Read, Write};

use tracing::trace;

use crate::buffer::read_full;
use crate::codec_traits::FrameSurface;
use crate::error::Result;
use crate::frame::{FrameLease, MapGuard};
use crate::plane::{PlaneView, PlaneViewMut};
use crate::types::MapAccess;

/// Outcome of filling a frame from a raw source.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransferStatus {
    Complete,
    /// The source ended mid-frame.  The frame content is undefined and must
    /// not be submitted.
    Partial,
}

/// Fill `planes` row by row from `source`.
///
/// Stops at the first row the source cannot fill completely.
pub fn transfer_in<R: Read + ?Sized>(
    planes: &mut [PlaneViewMut<'_>],
    source: &mut R,
) -> Result<TransferStatus> {
    for (index, plane) in planes.iter_mut().enumerate() {
        for row in 0..plane.rows() {
            let dst = plane.row_mut(row);
            let want = dst.len();
            let got = read_full(source, dst)?;
            if got < want {
                trace!(plane = index, row, got, want, "Short row read");
                return Ok(TransferStatus::Partial);
            }
        }
    }
    Ok(TransferStatus::Complete)
}

/// Write the meaningful bytes of `planes` to `sink`, row by row.
pub fn transfer_out<W: Write + ?Sized>(planes: &[PlaneView<'_>], sink: &mut W) -> Result<()> {
    for plane in planes {
        for row in plane.iter_rows() {
            sink.write_all(row)?;
        }
    }
    Ok(())
}

/// Map `frame` for writing, fill it from `source`, and unmap it.
///
/// The frame is unmapped on every path, including errors.
pub fn read_raw_frame<F, R>(frame: &mut F, source: &mut R) -> Result<TransferStatus>
where
    F: FrameSurface,
    R: Read + ?Sized,
{
    let mut guard = MapGuard::map(frame, MapAccess::Write)?;
    let status = {
        let mut planes = guard.frame_mut().planes_mut()?;
        transfer_in(&mut planes, source)?
    };
    guard.unmap()?;
    Ok(status)
}

/// Map `frame` for reading, write it to `sink`, unmap it and release it.
///
/// Consumes the frame: it is released exactly once whether or not the write
/// succeeds.
pub fn write_raw_frame<F, W>(frame: F, sink: &mut W) -> Result<()>
where
    F: FrameSurface,
    W: Write + ?Sized,
{
    let mut lease = FrameLease::new(frame);
    {
        let guard = MapGuard::map(lease.get_mut(), MapAccess::Read)?;
        let planes = guard.frame().planes()?;
        transfer_out(&planes, sink)?;
        drop(planes);
        guard.unmap()?;
    }
    lease.release()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EngineError;
    use crate::frame::HostFrame;
    use crate::types::{FrameInfo, PixelLayout};
    use std::io::{self, Cursor};

    fn raw_pattern(len: usize, seed: u8) -> Vec<u8> {
        (0..len)
            .map(|i| (i as u32).wrapping_mul(31).wrapping_add(seed as u32) as u8)
            .collect()
    }

    fn round_trip(width: u32, height: u32, layout: PixelLayout, alignment: usize) {
        let info = FrameInfo::aligned(width, height, layout, alignment);
        let raw = raw_pattern(info.raw_frame_size(), 7);

        let mut frame = HostFrame::new(info).unwrap();
        let status = read_raw_frame(&mut frame, &mut Cursor::new(&raw)).unwrap();
        assert_eq!(status, TransferStatus::Complete);
        assert!(!frame.is_mapped());

        let mut out = Vec::new();
        write_raw_frame(frame, &mut out).unwrap();
        assert_eq!(out.len(), raw.len(), "{layout} {width}x{height}");
        assert!(out == raw, "{layout} {width}x{height} bytes differ");
    }

    #[test]
    fn i420_round_trip_even_and_odd_sizes() {
        round_trip(1920, 1080, PixelLayout::I420, 64);
        round_trip(1918, 1079, PixelLayout::I420, 64);
    }

    #[test]
    fn nv12_and_rgba_round_trip() {
        round_trip(1920, 1080, PixelLayout::Nv12, 256);
        round_trip(33, 17, PixelLayout::Nv12, 32);
        round_trip(33, 17, PixelLayout::Rgba, 32);
    }

    #[test]
    fn i420_1918x1079_raw_size() {
        let info = FrameInfo::aligned(1918, 1079, PixelLayout::I420, 32);
        assert_eq!(info.raw_frame_size(), 1918 * 1079 + 2 * 959 * 539);
    }

    #[test]
    fn padding_is_not_touched() {
        let info = FrameInfo::aligned(4, 2, PixelLayout::Nv12, 8);
        let mut frame = HostFrame::new(info).unwrap();
        let raw = [0xFFu8; 12];
        read_raw_frame(&mut frame, &mut Cursor::new(&raw[..])).unwrap();
        // Row 0 of luma: 4 bytes of data then 4 bytes of untouched padding.
        assert_eq!(&frame.as_bytes()[..8], &[0xFF, 0xFF, 0xFF, 0xFF, 0, 0, 0, 0]);
    }

    #[test]
    fn short_source_is_partial() {
        let info = FrameInfo::aligned(16, 16, PixelLayout::I420, 32);
        let raw = raw_pattern(info.raw_frame_size() - 1, 0);
        let mut frame = HostFrame::new(info).unwrap();
        let status = read_raw_frame(&mut frame, &mut Cursor::new(&raw)).unwrap();
        assert_eq!(status, TransferStatus::Partial);
        assert!(!frame.is_mapped());

        let status = read_raw_frame(&mut frame, &mut io::empty()).unwrap();
        assert_eq!(status, TransferStatus::Partial);
    }

    struct FailingSink;

    impl Write for FailingSink {
        fn write(&mut self, _: &[u8]) -> io::Result<usize> {
            Err(io::Error::other("disk full"))
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn write_errors_propagate() {
        let info = FrameInfo::aligned(8, 8, PixelLayout::I420, 32);
        let frame = HostFrame::new(info).unwrap();
        let err = write_raw_frame(frame, &mut FailingSink).unwrap_err();
        assert!(matches!(err, EngineError::Io(_)));
    }

    #[test]
    fn read_errors_leave_frame_unmapped() {
        struct Broken;
        impl Read for Broken {
            fn read(&mut self, _: &mut [u8]) -> io::Result<usize> {
                Err(io::Error::other("cable unplugged"))
            }
        }
        let mut frame = HostFrame::new(FrameInfo::aligned(8, 8, PixelLayout::Nv12, 32)).unwrap();
        assert!(read_raw_frame(&mut frame, &mut Broken).is_err());
        assert!(!frame.is_mapped());
    }
}
