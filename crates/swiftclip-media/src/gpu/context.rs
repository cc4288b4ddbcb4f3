// crates/swiftclip-media/src/gpu/context.rs
//
// GpuContextManager: the single GPU context for a batch (and, when the caller
// keeps it, for the process).
//
// Responsibilities:
//   • Create the device once, at construction. Failure here is a
//     GpuInitFailure and aborts the batch: it means the machine has no usable
//     adapter, so retrying per job would only fail slower.
//   • Create/destroy per-job window surfaces bound to encoder InputSurfaces.
//   • Track which surface pair is current. Only one session renders at a
//     time, so "current" is plain state here rather than a lock.
//   • Own the lazily-compiled shared TextureRenderer program.

use std::collections::HashSet;

use tracing::{debug, info, warn};

use swiftclip_core::error::{ExportError, Result};

use crate::gpu::{GpuDevice, SurfaceId, TextureRenderer};
use crate::platform::MediaPlatform;
use crate::surface::InputSurface;

pub struct GpuContextManager {
    device:   Box<dyn GpuDevice>,
    current:  Option<(SurfaceId, SurfaceId)>,
    surfaces: HashSet<SurfaceId>,
    renderer: Option<TextureRenderer>,
    released: bool,
}

impl GpuContextManager {
    /// Acquire the platform's GPU device. Errors propagate unchanged (no retry).
    pub fn new(platform: &dyn MediaPlatform) -> Result<Self> {
        let device = platform.create_gpu()?;
        info!(adapter = %device.describe(), "GPU context created");
        Ok(Self::with_device(device))
    }

    pub fn with_device(device: Box<dyn GpuDevice>) -> Self {
        Self {
            device,
            current:  None,
            surfaces: HashSet::new(),
            renderer: None,
            released: false,
        }
    }

    fn ensure_live(&self) -> Result<()> {
        if self.released {
            return Err(ExportError::GpuInit("GPU context already released".into()));
        }
        Ok(())
    }

    pub fn describe(&self) -> String {
        self.device.describe()
    }

    /// Bind a new window surface to an encoder's input surface.
    pub fn create_window_surface(&mut self, input: &InputSurface) -> Result<SurfaceId> {
        self.ensure_live()?;
        let id = self.device.create_window_surface(input)?;
        self.surfaces.insert(id);
        debug!(surface = id.0, input = ?input, "window surface created");
        Ok(id)
    }

    pub fn make_current(&mut self, draw: SurfaceId, read: SurfaceId) -> Result<()> {
        self.ensure_live()?;
        if !self.surfaces.contains(&draw) || !self.surfaces.contains(&read) {
            return Err(ExportError::step("gpu.make_current", format!("unknown surface {draw:?}/{read:?}")));
        }
        if self.current == Some((draw, read)) {
            return Ok(());
        }
        self.device.make_current(Some((draw, read)))?;
        self.current = Some((draw, read));
        Ok(())
    }

    pub fn make_nothing_current(&mut self) {
        if self.current.take().is_some() && !self.released {
            if let Err(e) = self.device.make_current(None) {
                warn!(kind = %ExportError::Teardown(e.to_string()).kind(), "detach context: {e}");
            }
        }
    }

    pub fn current(&self) -> Option<(SurfaceId, SurfaceId)> {
        self.current
    }

    pub fn swap_buffers(&mut self, surface: SurfaceId, pts_us: i64) -> Result<()> {
        self.ensure_live()?;
        self.device.swap_buffers(surface, pts_us)
    }

    pub fn destroy_surface(&mut self, surface: SurfaceId) {
        if !self.surfaces.remove(&surface) {
            return;
        }
        if matches!(self.current, Some((d, r)) if d == surface || r == surface) {
            self.make_nothing_current();
        }
        self.device.destroy_surface(surface);
        debug!(surface = surface.0, "window surface destroyed");
    }

    /// The shared renderer, compiled on first use.
    pub fn shared_renderer(&mut self) -> Result<TextureRenderer> {
        if let Some(r) = self.renderer {
            return Ok(r);
        }
        self.ensure_live()?;
        let r = TextureRenderer::new(self.device.as_mut())?;
        self.renderer = Some(r);
        Ok(r)
    }

    pub fn device(&mut self) -> &mut dyn GpuDevice {
        self.device.as_mut()
    }

    pub fn live_surfaces(&self) -> usize {
        self.surfaces.len()
    }

    /// Destroy every remaining surface and the device. Idempotent.
    pub fn release(&mut self) {
        if self.released {
            return;
        }
        self.make_nothing_current();
        for s in std::mem::take(&mut self.surfaces) {
            self.device.destroy_surface(s);
        }
        self.renderer = None;
        self.device.release();
        self.released = true;
        debug!("GPU context released");
    }
}

impl Drop for GpuContextManager {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit::{CpuGpu, MockPlatform};

    #[test]
    fn gpu_init_failure_propagates() {
        let platform = MockPlatform::new().with_gpu_failure();
        let err = GpuContextManager::new(&platform).err().expect("must fail");
        assert_eq!(err.kind().code(), "GPU_INIT_FAILURE");
    }

    #[test]
    fn make_current_requires_known_surface() {
        let mut ctx = GpuContextManager::with_device(Box::new(CpuGpu::new()));
        let input = InputSurface::new(8, 8);
        let s = ctx.create_window_surface(&input).unwrap();
        ctx.make_current(s, s).unwrap();
        assert_eq!(ctx.current(), Some((s, s)));
        assert!(ctx.make_current(SurfaceId(9_999), s).is_err());
    }

    #[test]
    fn destroying_current_surface_detaches() {
        let mut ctx = GpuContextManager::with_device(Box::new(CpuGpu::new()));
        let input = InputSurface::new(8, 8);
        let s = ctx.create_window_surface(&input).unwrap();
        ctx.make_current(s, s).unwrap();
        ctx.destroy_surface(s);
        assert_eq!(ctx.current(), None);
        assert_eq!(ctx.live_surfaces(), 0);
    }

    #[test]
    fn shared_renderer_is_compiled_once() {
        let gpu = CpuGpu::new();
        let programs = gpu.program_counter();
        let mut ctx = GpuContextManager::with_device(Box::new(gpu));
        let a = ctx.shared_renderer().unwrap();
        let b = ctx.shared_renderer().unwrap();
        assert_eq!(a, b);
        assert_eq!(programs.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[test]
    fn released_context_rejects_work() {
        let mut ctx = GpuContextManager::with_device(Box::new(CpuGpu::new()));
        ctx.release();
        assert!(ctx.create_window_surface(&InputSurface::new(8, 8)).is_err());
        ctx.release();
    }
}
