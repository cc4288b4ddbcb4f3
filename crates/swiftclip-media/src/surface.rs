// crates/swiftclip-media/src/surface.rs
//
// The two surfaces that connect the hardware codecs to the GPU.
//
//   decoder ──▶ FrameSurface ──▶ GPU texture          (frame producer)
//   GPU draw ──▶ InputSurface ──▶ encoder             (encoder input)
//
// FrameSurface:
//   A latest-wins slot plus a "frame available" flag and Condvar, shared as
//   Arc<(Mutex<Option<T>>, Condvar)>. The decoder thread (or the decoder step on the worker) queues a
//   frame and notifies; the render loop waits for the flag with a bounded,
//   polled wait and then latches the newest frame into its texture.
//
// InputSurface:
//   An ordered queue of presented frames. The GPU side pushes on every
//   swap_buffers; the encoder pops in presentation order. It is shared via Arc
//   so one InputSurface can outlive encoder resets; the pool relies on that
//   to hand back an encoder whose input surface is still bound to the GPU.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use swiftclip_core::helpers::geometry::Mat4;

static NEXT_SURFACE_ID: AtomicU64 = AtomicU64::new(1);

fn next_id() -> u64 {
    NEXT_SURFACE_ID.fetch_add(1, Ordering::Relaxed)
}

// ── Frame payloads ────────────────────────────────────────────────────────────

/// Tightly packed RGBA8 pixels (no row padding).
#[derive(Clone, PartialEq, Eq)]
pub struct RgbaImage {
    pub width:  u32,
    pub height: u32,
    pub data:   Vec<u8>,
}

impl RgbaImage {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height, data: vec![0; width as usize * height as usize * 4] }
    }

    pub fn filled(width: u32, height: u32, rgba: [u8; 4]) -> Self {
        Self { width, height, data: rgba.repeat(width as usize * height as usize) }
    }

    pub fn pixel(&self, x: u32, y: u32) -> [u8; 4] {
        let i = (y as usize * self.width as usize + x as usize) * 4;
        [self.data[i], self.data[i + 1], self.data[i + 2], self.data[i + 3]]
    }
}

impl std::fmt::Debug for RgbaImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "RgbaImage({}x{}, {} bytes)", self.width, self.height, self.data.len())
    }
}

/// One decoded picture handed from the decoder to the GPU.
#[derive(Debug, Clone)]
pub struct SurfaceFrame {
    pub image:     RgbaImage,
    pub pts_us:    i64,
    /// Orientation correction for this picture in texture space.
    pub transform: Mat4,
}

/// One rendered picture handed from the GPU to the encoder.
#[derive(Debug, Clone)]
pub struct PresentedFrame {
    pub image:  RgbaImage,
    pub pts_us: i64,
}

// ── FrameSurface ──────────────────────────────────────────────────────────────

struct FrameSlot {
    frame:     Option<SurfaceFrame>,
    available: bool,
}

#[derive(Clone)]
pub struct FrameSurface {
    id:    u64,
    inner: Arc<(Mutex<FrameSlot>, Condvar)>,
}

impl FrameSurface {
    pub fn new() -> Self {
        Self {
            id:    next_id(),
            inner: Arc::new((Mutex::new(FrameSlot { frame: None, available: false }), Condvar::new())),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Producer side: replace the pending frame and raise "available".
    pub fn queue(&self, frame: SurfaceFrame) {
        let (lock, cvar) = &*self.inner;
        let mut slot = lock.lock();
        slot.frame = Some(frame);
        slot.available = true;
        cvar.notify_all();
    }

    /// Wait until a frame has been queued, in `poll` slices, for at most
    /// `timeout`. Clears the flag and returns whether it was raised.
    ///
    /// Never blocks past `timeout`; a `false` return means the caller should
    /// proceed anyway.
    pub fn wait_frame_available(&self, timeout: Duration, poll: Duration) -> bool {
        let (lock, cvar) = &*self.inner;
        let deadline = Instant::now() + timeout;
        let mut slot = lock.lock();
        while !slot.available {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let slice = poll.min(deadline - now);
            cvar.wait_for(&mut slot, slice);
        }
        slot.available = false;
        true
    }

    /// Consumer side: take the newest frame, if any.
    pub fn latch(&self) -> Option<SurfaceFrame> {
        let (lock, _) = &*self.inner;
        let mut slot = lock.lock();
        slot.available = false;
        slot.frame.take()
    }

    /// Drop any pending frame (used when a decoder is rebound or flushed).
    pub fn discard(&self) {
        let (lock, _) = &*self.inner;
        let mut slot = lock.lock();
        slot.frame = None;
        slot.available = false;
    }
}

impl Default for FrameSurface {
    fn default() -> Self { Self::new() }
}

impl std::fmt::Debug for FrameSurface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "FrameSurface#{}", self.id)
    }
}

// ── InputSurface ──────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct InputSurface {
    id:     u64,
    width:  u32,
    height: u32,
    inner:  Arc<(Mutex<VecDeque<PresentedFrame>>, Condvar)>,
}

impl InputSurface {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            id: next_id(),
            width,
            height,
            inner: Arc::new((Mutex::new(VecDeque::new()), Condvar::new())),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// GPU side: present one rendered frame.
    pub fn submit(&self, image: RgbaImage, pts_us: i64) {
        let (lock, cvar) = &*self.inner;
        lock.lock().push_back(PresentedFrame { image, pts_us });
        cvar.notify_one();
    }

    /// Encoder side: next presented frame, waiting at most `timeout`.
    pub fn next_frame(&self, timeout: Duration) -> Option<PresentedFrame> {
        let (lock, cvar) = &*self.inner;
        let mut queue = lock.lock();
        if queue.is_empty() && !timeout.is_zero() {
            cvar.wait_for(&mut queue, timeout);
        }
        queue.pop_front()
    }

    pub fn pending(&self) -> usize {
        self.inner.0.lock().len()
    }

    /// Drop presented-but-unconsumed frames (encoder reset).
    pub fn clear(&self) {
        self.inner.0.lock().clear();
    }
}

impl std::fmt::Debug for InputSurface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "InputSurface#{}({}x{})", self.id, self.width, self.height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn frame(pts_us: i64) -> SurfaceFrame {
        SurfaceFrame { image: RgbaImage::new(2, 2), pts_us, transform: Mat4::IDENTITY }
    }

    #[test]
    fn wait_times_out_without_producer() {
        let s = FrameSurface::new();
        let t0 = Instant::now();
        assert!(!s.wait_frame_available(Duration::from_millis(30), Duration::from_millis(5)));
        assert!(t0.elapsed() >= Duration::from_millis(30));
        assert!(s.latch().is_none());
    }

    #[test]
    fn wait_wakes_on_queue_from_other_thread() {
        let s = FrameSurface::new();
        let producer = s.clone();
        let h = thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            producer.queue(frame(42));
        });
        assert!(s.wait_frame_available(Duration::from_secs(2), Duration::from_millis(5)));
        assert_eq!(s.latch().map(|f| f.pts_us), Some(42));
        h.join().unwrap();
    }

    #[test]
    fn latch_returns_newest_frame() {
        let s = FrameSurface::new();
        s.queue(frame(1));
        s.queue(frame(2));
        assert_eq!(s.latch().map(|f| f.pts_us), Some(2));
        assert!(s.latch().is_none());
    }

    #[test]
    fn input_surface_is_fifo() {
        let s = InputSurface::new(4, 4);
        s.submit(RgbaImage::new(4, 4), 0);
        s.submit(RgbaImage::new(4, 4), 33_333);
        assert_eq!(s.pending(), 2);
        assert_eq!(s.next_frame(Duration::ZERO).map(|f| f.pts_us), Some(0));
        assert_eq!(s.next_frame(Duration::ZERO).map(|f| f.pts_us), Some(33_333));
        assert!(s.next_frame(Duration::from_millis(1)).is_none());
    }

    #[test]
    fn clones_share_identity() {
        let s = InputSurface::new(4, 4);
        let c = s.clone();
        c.submit(RgbaImage::new(4, 4), 7);
        assert_eq!(s.id(), c.id());
        assert_eq!(s.pending(), 1);
    }
}
