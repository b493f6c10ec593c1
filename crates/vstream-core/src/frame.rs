//! Host frame surfaces and scoped access guards.
//!
//! - [`HostFrame`]: a CPU-resident surface with the standard plane layout.
//! - [`MapGuard`]: maps a surface on construction, unmaps on every exit.
//! - [`FrameLease`]: owns a surface and releases it exactly once.

use tracing::warn;

use crate::codec_traits::FrameSurface;
use crate::error::{EngineError, Result};
use crate::plane::{PlaneView, PlaneViewMut, split_planes, split_planes_mut};
use crate::types::{FrameInfo, MapAccess};

// ─── HostFrame ───────────────────────────────────────────────────────────

/// Frame backed by a host allocation of `info.allocation_size()` bytes.
#[derive(Debug)]
pub struct HostFrame {
    info: FrameInfo,
    data: Vec<u8>,
    mapped: Option<MapAccess>,
}

impl HostFrame {
    pub fn new(info: FrameInfo) -> Result<Self> {
        info.validate()?;
        Ok(Self {
            data: vec![0; info.allocation_size()],
            info,
            mapped: None,
        })
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    #[inline]
    pub fn is_mapped(&self) -> bool {
        self.mapped.is_some()
    }

    /// Engine-side plane read, independent of the CPU mapping state.
    pub fn view_planes(&self) -> Result<Vec<PlaneView<'_>>> {
        split_planes(&self.data, &self.info.planes())
    }

    /// Engine-side plane write, independent of the CPU mapping state.
    pub fn view_planes_mut(&mut self) -> Result<Vec<PlaneViewMut<'_>>> {
        split_planes_mut(&mut self.data, &self.info.planes())
    }
}

impl FrameSurface for HostFrame {
    fn info(&self) -> FrameInfo {
        self.info
    }

    fn map(&mut self, access: MapAccess) -> Result<()> {
        if let Some(current) = self.mapped {
            return Err(EngineError::InvalidFrame(format!(
                "frame already mapped for {current:?}"
            )));
        }
        self.mapped = Some(access);
        Ok(())
    }

    fn unmap(&mut self) -> Result<()> {
        match self.mapped.take() {
            Some(_) => Ok(()),
            None => Err(EngineError::NotMapped("unmap")),
        }
    }

    fn planes(&self) -> Result<Vec<PlaneView<'_>>> {
        match self.mapped {
            Some(access) if access.allows_read() => self.view_planes(),
            _ => Err(EngineError::NotMapped("read")),
        }
    }

    fn planes_mut(&mut self) -> Result<Vec<PlaneViewMut<'_>>> {
        match self.mapped {
            Some(access) if access.allows_write() => self.view_planes_mut(),
            _ => Err(EngineError::NotMapped("write")),
        }
    }

    fn release(self) -> Result<()> {
        Ok(())
    }
}

// ─── MapGuard ────────────────────────────────────────────────────────────

/// Keeps a frame mapped for the guard's lifetime.
///
/// Prefer [`MapGuard::unmap`] on the success path so an unmap failure is
/// reported; the `Drop` impl only logs it.
pub struct MapGuard<'a, F: FrameSurface> {
    frame: &'a mut F,
    mapped: bool,
}

impl<'a, F: FrameSurface> MapGuard<'a, F> {
    pub fn map(frame: &'a mut F, access: MapAccess) -> Result<Self> {
        frame.map(access)?;
        Ok(Self {
            frame,
            mapped: true,
        })
    }

    #[inline]
    pub fn frame(&self) -> &F {
        self.frame
    }

    #[inline]
    pub fn frame_mut(&mut self) -> &mut F {
        self.frame
    }

    pub fn unmap(mut self) -> Result<()> {
        self.mapped = false;
        self.frame.unmap()
    }
}

impl<F: FrameSurface> Drop for MapGuard<'_, F> {
    fn drop(&mut self) {
        if self.mapped {
            if let Err(e) = self.frame.unmap() {
                warn!(error = %e, "Frame unmap failed during cleanup");
            }
        }
    }
}

// ─── FrameLease ──────────────────────────────────────────────────────────

/// Sole owner of an engine frame between acquire and release.
///
/// Dropping a lease that still holds its frame releases it, so an early
/// return can never leak a surface back to the engine's pool.
pub struct FrameLease<F: FrameSurface> {
    frame: Option<F>,
}

impl<F: FrameSurface> FrameLease<F> {
    pub fn new(frame: F) -> Self {
        Self { frame: Some(frame) }
    }

    #[inline]
    pub fn get(&self) -> &F {
        // Only `into_inner`/`release` empty the slot, and both consume `self`.
        self.frame.as_ref().unwrap_or_else(|| unreachable!())
    }

    #[inline]
    pub fn get_mut(&mut self) -> &mut F {
        self.frame.as_mut().unwrap_or_else(|| unreachable!())
    }

    /// Hand the frame back without releasing it.
    pub fn into_inner(mut self) -> F {
        self.frame.take().unwrap_or_else(|| unreachable!())
    }

    pub fn release(mut self) -> Result<()> {
        match self.frame.take() {
            Some(frame) => frame.release(),
            None => Ok(()),
        }
    }
}

impl<F: FrameSurface> Drop for FrameLease<F> {
    fn drop(&mut self) {
        if let Some(frame) = self.frame.take() {
            if let Err(e) = frame.release() {
                warn!(error = %e, "Frame release failed during cleanup");
            }
        }
    }
}
