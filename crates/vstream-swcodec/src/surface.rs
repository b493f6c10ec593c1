//! Fixed-size surface pool shared by an engine and the frames it hands out.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use vstream_core::codec_traits::FrameSurface;
use vstream_core::error::Result;
use vstream_core::frame::HostFrame;
use vstream_core::plane::{PlaneView, PlaneViewMut};
use vstream_core::types::{FrameInfo, MapAccess};

#[derive(Debug)]
struct PoolInner {
    info: FrameInfo,
    free: Vec<HostFrame>,
    outstanding: usize,
    capacity: usize,
}

/// Bounded pool of host surfaces of one geometry.
///
/// Surfaces are allocated lazily up to `capacity` and recycled on release.
/// Clones share the same pool.
#[derive(Clone, Debug)]
pub struct SurfacePool {
    inner: Arc<Mutex<PoolInner>>,
}

impl SurfacePool {
    pub fn new(info: FrameInfo, capacity: usize) -> Result<Self> {
        info.validate()?;
        Ok(Self {
            inner: Arc::new(Mutex::new(PoolInner {
                info,
                free: Vec::with_capacity(capacity),
                outstanding: 0,
                capacity,
            })),
        })
    }

    fn lock(&self) -> MutexGuard<'_, PoolInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Take a surface, or `None` when every surface is in use.
    pub fn acquire(&self) -> Result<Option<SwSurface>> {
        let mut inner = self.lock();
        let frame = match inner.free.pop() {
            Some(frame) => frame,
            None if inner.outstanding < inner.capacity => HostFrame::new(inner.info)?,
            None => return Ok(None),
        };
        inner.outstanding += 1;
        Ok(Some(SwSurface {
            frame,
            pool: self.clone(),
        }))
    }

    fn put_back(&self, frame: HostFrame) {
        let mut inner = self.lock();
        inner.outstanding = inner.outstanding.saturating_sub(1);
        // Surfaces from before a geometry change are dropped, not recycled.
        if frame.info() == inner.info {
            inner.free.push(frame);
        }
    }

    /// Surfaces handed out and not yet released.
    pub fn outstanding(&self) -> usize {
        self.lock().outstanding
    }

    pub fn capacity(&self) -> usize {
        self.lock().capacity
    }

    pub fn info(&self) -> FrameInfo {
        self.lock().info
    }
}

/// A pooled surface.  Releasing it returns it to its pool; dropping it
/// without release keeps its pool slot occupied.
#[derive(Debug)]
pub struct SwSurface {
    frame: HostFrame,
    pool: SurfacePool,
}

impl SwSurface {
    /// Engine-side access, ignoring the CPU mapping.
    pub(crate) fn host(&self) -> &HostFrame {
        &self.frame
    }

    pub(crate) fn host_mut(&mut self) -> &mut HostFrame {
        &mut self.frame
    }
}

impl FrameSurface for SwSurface {
    fn info(&self) -> FrameInfo {
        self.frame.info()
    }

    fn map(&mut self, access: MapAccess) -> Result<()> {
        self.frame.map(access)
    }

    fn unmap(&mut self) -> Result<()> {
        self.frame.unmap()
    }

    fn planes(&self) -> Result<Vec<PlaneView<'_>>> {
        self.frame.planes()
    }

    fn planes_mut(&mut self) -> Result<Vec<PlaneViewMut<'_>>> {
        self.frame.planes_mut()
    }

    fn release(self) -> Result<()> {
        let Self { mut frame, pool } = self;
        if frame.is_mapped() {
            frame.unmap()?;
        }
        pool.put_back(frame);
        Ok(())
    }
}
