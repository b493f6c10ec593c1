//! Compressed bitstream buffer.
//!
//! # Window
//!
//! ```text
//! 0          data_offset            data_offset + data_length       capacity
//! ├──consumed──┼──────── valid, unconsumed ────────┼──────── free ───────┤
//! ```
//!
//! The decoder side refills the buffer from a byte source: the unconsumed
//! window is first moved down to offset 0 so a unit straddling two reads
//! survives intact, then the free tail is filled.  The engine advances
//! `data_offset` as it consumes units.
//!
//! The encoder side hands the same type to the engine as an output buffer:
//! the engine appends coded bytes and the driver drains them to a sink.

use std::io::{self, Read, Write};

use tracing::debug;

use crate::error::{EngineError, Result};

/// Default capacity of a decode input buffer and an encode output buffer.
pub const DEFAULT_CAPACITY: usize = 2_000_000;

/// Outcome of a [`CompressedBuffer::refill`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RefillStatus {
    /// The buffer holds data.  `read` is the number of fresh bytes appended
    /// by this call, which is zero once the source is dry.
    Filled { read: usize },
    /// The source returned nothing and the buffer is empty.
    Exhausted,
}

/// Fixed-capacity byte buffer with a consumed offset and a valid length.
#[derive(Clone)]
pub struct CompressedBuffer {
    data: Vec<u8>,
    offset: usize,
    length: usize,
}

impl std::fmt::Debug for CompressedBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompressedBuffer")
            .field("capacity", &self.data.len())
            .field("data_offset", &self.offset)
            .field("data_length", &self.length)
            .finish()
    }
}

impl CompressedBuffer {
    /// Allocate a zeroed buffer of `capacity` bytes.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: vec![0; capacity],
            offset: 0,
            length: 0,
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn data_offset(&self) -> usize {
        self.offset
    }

    #[inline]
    pub fn data_length(&self) -> usize {
        self.length
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// Free bytes after the valid window.
    #[inline]
    pub fn free_tail(&self) -> usize {
        self.capacity().saturating_sub(self.offset + self.length)
    }

    /// The valid, unconsumed bytes.
    pub fn unconsumed(&self) -> &[u8] {
        let end = (self.offset + self.length).min(self.data.len());
        let start = self.offset.min(end);
        &self.data[start..end]
    }

    /// Whole backing storage, including consumed and free regions.
    pub fn storage(&self) -> &[u8] {
        &self.data
    }

    /// Overwrite the window bookkeeping.
    ///
    /// Engines use this to publish how much they consumed or produced.  The
    /// window is not validated here; [`refill`](Self::refill) rejects an
    /// inconsistent window before touching any byte.
    pub fn set_window(&mut self, offset: usize, length: usize) {
        self.offset = offset;
        self.length = length;
    }

    fn check_window(&self) -> Result<()> {
        let capacity = self.capacity();
        let overflow = EngineError::BufferOverflow {
            offset: self.offset,
            length: self.length,
            capacity,
        };
        // offset > capacity - 1, written without underflow for capacity 0.
        if self.offset >= capacity {
            return Err(overflow);
        }
        match self.offset.checked_add(self.length) {
            Some(end) if end <= capacity => Ok(()),
            _ => Err(overflow),
        }
    }

    /// Compact the unconsumed window to offset 0 and top the buffer up from
    /// `source`.
    ///
    /// Fails with [`EngineError::BufferOverflow`] when the window does not
    /// fit the capacity; in that case nothing is mutated.
    pub fn refill<R: Read + ?Sized>(&mut self, source: &mut R) -> Result<RefillStatus> {
        self.check_window()?;

        if self.offset > 0 {
            self.data
                .copy_within(self.offset..self.offset + self.length, 0);
            self.offset = 0;
        }

        let start = self.length;
        let read = read_full(source, &mut self.data[start..])?;
        self.length += read;

        if read == 0 && self.length == 0 {
            return Ok(RefillStatus::Exhausted);
        }
        Ok(RefillStatus::Filled { read })
    }

    /// Mark `count` bytes at the head of the window as consumed.
    pub fn consume(&mut self, count: usize) -> Result<()> {
        if count > self.length {
            return Err(EngineError::BufferOverflow {
                offset: self.offset + count,
                length: self.length,
                capacity: self.capacity(),
            });
        }
        self.offset += count;
        self.length -= count;
        if self.length == 0 {
            // A fully consumed window restarts at the head of the storage.
            self.offset = 0;
        }
        Ok(())
    }

    /// Append `bytes` after the valid window.
    pub fn append(&mut self, bytes: &[u8]) -> Result<()> {
        let have = self.free_tail();
        if bytes.len() > have {
            return Err(EngineError::BufferTooSmall {
                need: bytes.len(),
                have,
            });
        }
        let end = self.offset + self.length;
        self.data[end..end + bytes.len()].copy_from_slice(bytes);
        self.length += bytes.len();
        Ok(())
    }

    /// Write the valid window to `sink` and reset the buffer to empty.
    ///
    /// Returns the number of bytes written.
    pub fn write_to<W: Write + ?Sized>(&mut self, sink: &mut W) -> Result<usize> {
        let written = self.length;
        sink.write_all(self.unconsumed())?;
        self.offset = 0;
        self.length = 0;
        Ok(written)
    }

    /// Enlarge the backing storage to `capacity` bytes, preserving the
    /// valid window at its current offset.
    pub fn grow(&mut self, capacity: usize) -> Result<()> {
        if capacity < self.capacity() {
            return Err(EngineError::Config(format!(
                "cannot shrink compressed buffer from {} to {capacity} bytes",
                self.capacity()
            )));
        }
        debug!(
            from = self.capacity(),
            to = capacity,
            "Growing compressed buffer"
        );
        self.data.resize(capacity, 0);
        Ok(())
    }
}

/// Read until `buf` is full or the reader reports end of stream.
///
/// Short reads are retried, so a return value below `buf.len()` always means
/// the source is dry.
pub fn read_full<R: Read + ?Sized>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        }
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    /// Reader that hands out at most `chunk` bytes per call.
    struct Trickle<'a> {
        data: &'a [u8],
        chunk: usize,
    }

    impl Read for Trickle<'_> {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let n = self.chunk.min(buf.len()).min(self.data.len());
            buf[..n].copy_from_slice(&self.data[..n]);
            self.data = &self.data[n..];
            Ok(n)
        }
    }

    fn pattern(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 7 + i / 251) as u8).collect()
    }

    #[test]
    fn compaction_preserves_unconsumed_window() {
        let cap = 32;
        for offset in 0..cap {
            for length in 0..=(cap - offset) {
                let mut buf = CompressedBuffer::with_capacity(cap);
                let seed = pattern(cap);
                buf.data.copy_from_slice(&seed);
                buf.set_window(offset, length);

                let status = buf.refill(&mut io::empty()).unwrap();
                assert_eq!(buf.data_offset(), 0);
                assert_eq!(buf.data_length(), length);
                assert_eq!(&buf.storage()[..length], &seed[offset..offset + length]);
                if length == 0 {
                    assert_eq!(status, RefillStatus::Exhausted);
                } else {
                    assert_eq!(status, RefillStatus::Filled { read: 0 });
                }
            }
        }
    }

    #[test]
    fn refill_appends_after_compacted_window() {
        let mut buf = CompressedBuffer::with_capacity(8);
        buf.append(b"abcdef").unwrap();
        buf.consume(4).unwrap();
        let status = buf.refill(&mut Cursor::new(b"XYZ0123".to_vec())).unwrap();
        assert_eq!(status, RefillStatus::Filled { read: 6 });
        assert_eq!(buf.unconsumed(), b"efXYZ012");
    }

    #[test]
    fn refill_loops_over_short_reads() {
        let data = pattern(100);
        let mut source = Trickle {
            data: &data,
            chunk: 3,
        };
        let mut buf = CompressedBuffer::with_capacity(64);
        assert_eq!(
            buf.refill(&mut source).unwrap(),
            RefillStatus::Filled { read: 64 }
        );
        assert_eq!(buf.unconsumed(), &data[..64]);
    }

    #[test]
    fn overflow_is_rejected_without_mutation() {
        let mut buf = CompressedBuffer::with_capacity(16);
        buf.append(&pattern(16)).unwrap();
        let before = buf.storage().to_vec();

        for (offset, length) in [(16, 0), (17, 0), (usize::MAX, 0), (10, 7), (1, usize::MAX)] {
            buf.set_window(offset, length);
            let mut source = Cursor::new(vec![0xAA; 32]);
            let err = buf.refill(&mut source).unwrap_err();
            assert!(matches!(err, EngineError::BufferOverflow { .. }));
            assert_eq!(buf.storage(), before.as_slice());
            assert_eq!(buf.data_offset(), offset);
            assert_eq!(buf.data_length(), length);
            assert_eq!(source.position(), 0, "source must not be read");
        }
    }

    #[test]
    fn fully_consumed_window_refills() {
        let data = pattern(48);
        let mut source = Cursor::new(data.clone());
        let mut buf = CompressedBuffer::with_capacity(16);
        let mut seen = Vec::new();
        loop {
            match buf.refill(&mut source).unwrap() {
                RefillStatus::Exhausted => break,
                RefillStatus::Filled { read } => {
                    assert_eq!(read, 16);
                    seen.extend_from_slice(buf.unconsumed());
                    buf.consume(buf.data_length()).unwrap();
                    assert_eq!(buf.data_offset(), 0);
                    assert_eq!(buf.free_tail(), buf.capacity());
                }
            }
        }
        assert_eq!(seen, data);
    }

    #[test]
    fn consuming_in_steps_to_the_end_resets_offset() {
        let mut buf = CompressedBuffer::with_capacity(8);
        buf.refill(&mut Cursor::new(pattern(8))).unwrap();
        buf.consume(5).unwrap();
        assert_eq!(buf.data_offset(), 5);
        buf.consume(3).unwrap();
        assert_eq!(buf.data_offset(), 0);
        assert_eq!(
            buf.refill(&mut Cursor::new(b"abc".to_vec())).unwrap(),
            RefillStatus::Filled { read: 3 }
        );
        assert_eq!(buf.unconsumed(), b"abc");
    }

    #[test]
    fn zero_capacity_always_overflows() {
        let mut buf = CompressedBuffer::with_capacity(0);
        assert!(matches!(
            buf.refill(&mut io::empty()),
            Err(EngineError::BufferOverflow { .. })
        ));
    }

    #[test]
    fn no_bytes_lost_across_refills() {
        for total in [0usize, 5, 63, 64, 65, 1000] {
            let data = pattern(total);
            let mut source = Trickle {
                data: &data,
                chunk: 13,
            };
            let mut buf = CompressedBuffer::with_capacity(64);
            let mut seen = Vec::new();
            let mut step = 1;
            loop {
                match buf.refill(&mut source).unwrap() {
                    RefillStatus::Exhausted => break,
                    RefillStatus::Filled { .. } => {
                        // Consume an uneven amount each round so windows straddle reads.
                        let take = step.min(buf.data_length());
                        seen.extend_from_slice(&buf.unconsumed()[..take]);
                        buf.consume(take).unwrap();
                        step = step % 29 + 7;
                    }
                }
            }
            assert_eq!(seen, data, "source of {total} bytes");
        }
    }

    #[test]
    fn append_and_drain_to_sink() {
        let mut buf = CompressedBuffer::with_capacity(4);
        buf.append(b"ab").unwrap();
        let err = buf.append(b"xyz").unwrap_err();
        assert!(matches!(
            err,
            EngineError::BufferTooSmall { need: 3, have: 2 }
        ));
        let mut sink = Vec::new();
        assert_eq!(buf.write_to(&mut sink).unwrap(), 2);
        assert_eq!(sink, b"ab");
        assert!(buf.is_empty());
        assert_eq!(buf.free_tail(), 4);
    }

    #[test]
    fn grow_keeps_window() {
        let mut buf = CompressedBuffer::with_capacity(4);
        buf.append(b"abcd").unwrap();
        buf.consume(1).unwrap();
        buf.grow(8).unwrap();
        assert_eq!(buf.unconsumed(), b"bcd");
        assert_eq!(buf.free_tail(), 4);
        assert!(buf.grow(2).is_err());
    }

    #[test]
    fn consume_past_window_fails() {
        let mut buf = CompressedBuffer::with_capacity(4);
        buf.append(b"ab").unwrap();
        assert!(buf.consume(3).is_err());
        assert_eq!(buf.data_length(), 2);
    }
}
