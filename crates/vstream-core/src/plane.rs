//! Stride-aware plane views.
//!
//! A plane is `rows` rows of `row_bytes` meaningful bytes, each row starting
//! `pitch` bytes after the previous one.  Views are bounds-checked once on
//! construction; row access afterwards cannot leave the backing slice.

use crate::error::{EngineError, Result};

/// Placement and shape of one plane inside a frame allocation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PlaneSpec {
    /// Byte offset of row 0 from the start of the frame allocation.
    pub offset: usize,
    /// Distance in bytes between consecutive rows.
    pub pitch: usize,
    /// Meaningful bytes per row.
    pub row_bytes: usize,
    pub rows: usize,
}

impl PlaneSpec {
    /// Bytes from the start of row 0 to the end of the last meaningful byte.
    #[inline]
    pub const fn span(&self) -> usize {
        if self.rows == 0 {
            0
        } else {
            self.pitch * (self.rows - 1) + self.row_bytes
        }
    }

    /// Bytes this plane occupies in the packed raw file format.
    #[inline]
    pub const fn packed_size(&self) -> usize {
        self.row_bytes * self.rows
    }

    fn check(&self, available: usize) -> Result<()> {
        if self.rows > 0 && self.row_bytes > self.pitch {
            return Err(EngineError::InvalidFrame(format!(
                "row of {} bytes does not fit pitch {}",
                self.row_bytes, self.pitch
            )));
        }
        if self.span() > available {
            return Err(EngineError::InvalidFrame(format!(
                "plane spans {} bytes, backing slice holds {available}",
                self.span()
            )));
        }
        Ok(())
    }
}

/// Read-only view over one plane.
#[derive(Clone, Copy, Debug)]
pub struct PlaneView<'a> {
    data: &'a [u8],
    pitch: usize,
    row_bytes: usize,
    rows: usize,
}

impl<'a> PlaneView<'a> {
    /// `data` starts at row 0 of the plane.
    pub fn new(data: &'a [u8], pitch: usize, row_bytes: usize, rows: usize) -> Result<Self> {
        let spec = PlaneSpec {
            offset: 0,
            pitch,
            row_bytes,
            rows,
        };
        spec.check(data.len())?;
        Ok(Self {
            data,
            pitch,
            row_bytes,
            rows,
        })
    }

    /// View of `spec` inside a whole-frame allocation.
    pub fn in_frame(frame: &'a [u8], spec: &PlaneSpec) -> Result<Self> {
        let data = frame.get(spec.offset..).ok_or_else(|| {
            EngineError::InvalidFrame(format!(
                "plane offset {} beyond frame of {} bytes",
                spec.offset,
                frame.len()
            ))
        })?;
        Self::new(data, spec.pitch, spec.row_bytes, spec.rows)
    }

    #[inline]
    pub fn rows(&self) -> usize {
        self.rows
    }

    #[inline]
    pub fn row_bytes(&self) -> usize {
        self.row_bytes
    }

    #[inline]
    pub fn pitch(&self) -> usize {
        self.pitch
    }

    /// Meaningful bytes of row `index`.  Panics if `index >= rows()`.
    #[inline]
    pub fn row(&self, index: usize) -> &'a [u8] {
        assert!(index < self.rows, "row {index} out of {}", self.rows);
        let start = index * self.pitch;
        &self.data[start..start + self.row_bytes]
    }

    pub fn iter_rows(&self) -> impl Iterator<Item = &'a [u8]> + '_ {
        (0..self.rows).map(|i| self.row(i))
    }
}

/// Mutable view over one plane.
#[derive(Debug)]
pub struct PlaneViewMut<'a> {
    data: &'a mut [u8],
    pitch: usize,
    row_bytes: usize,
    rows: usize,
}

impl<'a> PlaneViewMut<'a> {
    pub fn new(data: &'a mut [u8], pitch: usize, row_bytes: usize, rows: usize) -> Result<Self> {
        let spec = PlaneSpec {
            offset: 0,
            pitch,
            row_bytes,
            rows,
        };
        spec.check(data.len())?;
        Ok(Self {
            data,
            pitch,
            row_bytes,
            rows,
        })
    }

    #[inline]
    pub fn rows(&self) -> usize {
        self.rows
    }

    #[inline]
    pub fn row_bytes(&self) -> usize {
        self.row_bytes
    }

    #[inline]
    pub fn row_mut(&mut self, index: usize) -> &mut [u8] {
        assert!(index < self.rows, "row {index} out of {}", self.rows);
        let start = index * self.pitch;
        &mut self.data[start..start + self.row_bytes]
    }
}

/// Read-only views of every plane in `specs` over one frame allocation.
pub fn split_planes<'a>(frame: &'a [u8], specs: &[PlaneSpec]) -> Result<Vec<PlaneView<'a>>> {
    specs
        .iter()
        .map(|spec| PlaneView::in_frame(frame, spec))
        .collect()
}

/// Disjoint mutable views of every plane in `specs`.
///
/// `specs` must be in storage order and must not overlap.
pub fn split_planes_mut<'a>(
    frame: &'a mut [u8],
    specs: &[PlaneSpec],
) -> Result<Vec<PlaneViewMut<'a>>> {
    let mut views = Vec::with_capacity(specs.len());
    let mut rest = frame;
    let mut cursor = 0usize;
    for spec in specs {
        let gap = spec.offset.checked_sub(cursor).ok_or_else(|| {
            EngineError::InvalidFrame(format!(
                "plane at offset {} overlaps previous plane ending at {cursor}",
                spec.offset
            ))
        })?;
        if gap + spec.span() > rest.len() {
            return Err(EngineError::InvalidFrame(format!(
                "plane at offset {} spans {} bytes past end of frame",
                spec.offset,
                spec.span()
            )));
        }
        let (_, tail) = std::mem::take(&mut rest).split_at_mut(gap);
        let (head, tail) = tail.split_at_mut(spec.span());
        views.push(PlaneViewMut::new(head, spec.pitch, spec.row_bytes, spec.rows)?);
        rest = tail;
        cursor = spec.offset + spec.span();
    }
    Ok(views)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rows_skip_padding() {
        let data: Vec<u8> = (0..12).collect();
        let view = PlaneView::new(&data, 4, 3, 3).unwrap();
        assert_eq!(view.row(0), &[0, 1, 2]);
        assert_eq!(view.row(2), &[8, 9, 10]);
        assert_eq!(view.iter_rows().count(), 3);
    }

    #[test]
    fn last_row_needs_no_trailing_padding() {
        let data = [0u8; 11];
        assert!(PlaneView::new(&data, 4, 3, 3).is_ok());
        assert!(PlaneView::new(&data[..10], 4, 3, 3).is_err());
    }

    #[test]
    fn row_wider_than_pitch_is_rejected() {
        let data = [0u8; 64];
        let err = PlaneView::new(&data, 4, 5, 2).unwrap_err();
        assert!(matches!(err, EngineError::InvalidFrame(_)));
    }

    #[test]
    #[should_panic(expected = "out of")]
    fn row_index_is_bounds_checked() {
        let data = [0u8; 8];
        let view = PlaneView::new(&data, 4, 4, 2).unwrap();
        let _ = view.row(2);
    }

    #[test]
    fn split_mut_yields_disjoint_planes() {
        let mut frame = vec![0u8; 24];
        let specs = [
            PlaneSpec {
                offset: 0,
                pitch: 4,
                row_bytes: 4,
                rows: 4,
            },
            PlaneSpec {
                offset: 16,
                pitch: 2,
                row_bytes: 2,
                rows: 2,
            },
            PlaneSpec {
                offset: 20,
                pitch: 2,
                row_bytes: 2,
                rows: 2,
            },
        ];
        {
            let mut planes = split_planes_mut(&mut frame, &specs).unwrap();
            planes[0].row_mut(3).fill(1);
            planes[1].row_mut(1).fill(2);
            planes[2].row_mut(0).fill(3);
        }
        assert_eq!(&frame[12..16], &[1, 1, 1, 1]);
        assert_eq!(&frame[18..20], &[2, 2]);
        assert_eq!(&frame[20..22], &[3, 3]);
    }

    #[test]
    fn split_mut_rejects_overlap() {
        let mut frame = vec![0u8; 16];
        let specs = [
            PlaneSpec {
                offset: 0,
                pitch: 4,
                row_bytes: 4,
                rows: 2,
            },
            PlaneSpec {
                offset: 4,
                pitch: 4,
                row_bytes: 4,
                rows: 1,
            },
        ];
        assert!(split_planes_mut(&mut frame, &specs).is_err());
    }
}
