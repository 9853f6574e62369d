//! Ordered capture fallback chain.
//!
//! Backends are probed once; the survivors form a fixed chain
//! (`DXGI → BitBlt → xcap`). A failing or empty grab falls through to the
//! next backend for that one capture only, so a transient driver hiccup
//! never demotes the fast path for the rest of the session.

use std::sync::{Arc, Mutex};

use tracing::{debug, trace, warn};

use crate::capture::dpi;
use crate::capture::dxgi::DxgiCapturer;
use crate::capture::gdi::GdiCapturer;
use crate::capture::grab::XcapCapturer;
use crate::capture::pool::BufferPool;
use crate::capture::types::{CaptureMethod, Frame, Region};
use crate::error::QrGateError;

// ── Traits ───────────────────────────────────────────────────────

/// One way of reading pixels off the screen.
///
/// `area` is in physical pixels. Implementations fill a buffer acquired
/// from `pool` and return a frame whose region is the physical rectangle
/// actually read (clipped to the display).
pub trait CaptureBackend: Send {
    fn method(&self) -> CaptureMethod;

    fn grab(&mut self, area: Region, pool: &Arc<BufferPool>) -> Result<Frame, QrGateError>;
}

/// What the scan orchestrator needs from the capture stage.
pub trait FrameCapture: Send + Sync {
    /// Capture `region` (logical coordinates). `None` skips the cycle.
    fn capture(&self, region: Region) -> Option<Frame>;
}

// ── FrameSource ──────────────────────────────────────────────────

/// The fallback chain plus the shared buffer pool and DPI scale.
pub struct FrameSource {
    backends: Vec<Mutex<Box<dyn CaptureBackend>>>,
    pool: Arc<BufferPool>,
    scale: f64,
}

impl FrameSource {
    /// Probe every backend once and keep those that initialise.
    ///
    /// `preferred` is moved to the front of the chain when it probes
    /// successfully.
    pub fn probe(preferred: Option<CaptureMethod>, pool: Arc<BufferPool>) -> Self {
        let scale = dpi::display_scale();
        let mut backends = Vec::new();
        for method in CaptureMethod::CHAIN {
            match open_backend(method) {
                Ok(backend) => {
                    debug!("capture backend {method} ready");
                    backends.push(backend);
                }
                Err(e) => warn!("capture backend {method} unavailable: {e}"),
            }
        }
        if let Some(preferred) = preferred {
            if let Some(pos) = backends.iter().position(|b| b.method() == preferred) {
                let backend = backends.remove(pos);
                backends.insert(0, backend);
            }
        }
        Self::from_backends(backends, pool, scale)
    }

    /// Build a chain from already-constructed backends, in order.
    pub fn from_backends(
        backends: Vec<Box<dyn CaptureBackend>>,
        pool: Arc<BufferPool>,
        scale: f64,
    ) -> Self {
        Self {
            backends: backends.into_iter().map(Mutex::new).collect(),
            pool,
            scale: if scale > 0.0 { scale } else { 1.0 },
        }
    }

    /// Backends in chain order.
    pub fn methods(&self) -> Vec<CaptureMethod> {
        self.backends
            .iter()
            .map(|b| lock_backend(b).method())
            .collect()
    }

    /// `true` when no backend survived probing.
    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }

    /// Display scale applied to incoming regions.
    pub fn scale(&self) -> f64 {
        self.scale
    }

    pub fn pool(&self) -> &Arc<BufferPool> {
        &self.pool
    }

    fn to_logical(&self, physical: Region) -> Region {
        physical.scaled(1.0 / self.scale)
    }
}

impl FrameCapture for FrameSource {
    fn capture(&self, region: Region) -> Option<Frame> {
        if region.is_empty() {
            return None;
        }
        let area = region.scaled(self.scale);

        for slot in &self.backends {
            let mut backend = lock_backend(slot);
            let method = backend.method();
            match backend.grab(area, &self.pool) {
                Ok(frame) if !frame.is_empty() => {
                    trace!("frame {}x{} served by {method}", frame.width(), frame.height());
                    let logical = self.to_logical(frame.region());
                    return Some(frame.with_region(logical).pooled(Arc::clone(&self.pool)));
                }
                Ok(_) => debug!("{method} returned an empty frame; trying next backend"),
                Err(e) => debug!("{method} capture failed: {e}; trying next backend"),
            }
        }

        debug!("all capture backends failed for {region}; skipping cycle");
        None
    }
}

// ── Helpers ──────────────────────────────────────────────────────

/// Construct one backend by method.
pub fn open_backend(method: CaptureMethod) -> Result<Box<dyn CaptureBackend>, QrGateError> {
    Ok(match method {
        CaptureMethod::Dxgi => Box::new(DxgiCapturer::new(0)?),
        CaptureMethod::BitBlt => Box::new(GdiCapturer::new()?),
        CaptureMethod::PixelGrab => Box::new(XcapCapturer::new()?),
    })
}

fn lock_backend(
    slot: &Mutex<Box<dyn CaptureBackend>>,
) -> std::sync::MutexGuard<'_, Box<dyn CaptureBackend>> {
    slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::pool::Shape;
    use crate::capture::types::PixelFormat;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Scripted {
        method: CaptureMethod,
        calls: Arc<AtomicUsize>,
        fail: bool,
        empty: bool,
    }

    impl CaptureBackend for Scripted {
        fn method(&self) -> CaptureMethod {
            self.method
        }

        fn grab(&mut self, area: Region, pool: &Arc<BufferPool>) -> Result<Frame, QrGateError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(QrGateError::Capture {
                    backend: self.method.name(),
                    reason: "driver hiccup".into(),
                });
            }
            let (w, h) = if self.empty { (0, 0) } else { (area.width, area.height) };
            let buffer = pool.acquire(h, w, 3);
            Ok(Frame::new(buffer, w, h, area, PixelFormat::Rgb8, self.method))
        }
    }

    fn scripted(method: CaptureMethod, fail: bool, empty: bool) -> (Box<dyn CaptureBackend>, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let backend = Scripted {
            method,
            calls: Arc::clone(&calls),
            fail,
            empty,
        };
        (Box::new(backend), calls)
    }

    #[test]
    fn falls_through_without_demoting() {
        let (dxgi, dxgi_calls) = scripted(CaptureMethod::Dxgi, true, false);
        let (gdi, gdi_calls) = scripted(CaptureMethod::BitBlt, false, false);
        let source = FrameSource::from_backends(vec![dxgi, gdi], Arc::new(BufferPool::new()), 1.0);

        for _ in 0..2 {
            let frame = source.capture(Region::new(0, 0, 8, 4)).expect("frame");
            assert_eq!(frame.method(), CaptureMethod::BitBlt);
        }
        // The failing backend is retried on every capture.
        assert_eq!(dxgi_calls.load(Ordering::SeqCst), 2);
        assert_eq!(gdi_calls.load(Ordering::SeqCst), 2);
        assert_eq!(source.methods(), vec![CaptureMethod::Dxgi, CaptureMethod::BitBlt]);
    }

    #[test]
    fn empty_frame_counts_as_failure() {
        let (dxgi, _) = scripted(CaptureMethod::Dxgi, false, true);
        let (grab, _) = scripted(CaptureMethod::PixelGrab, false, false);
        let source = FrameSource::from_backends(vec![dxgi, grab], Arc::new(BufferPool::new()), 1.0);
        let frame = source.capture(Region::new(0, 0, 4, 4)).expect("frame");
        assert_eq!(frame.method(), CaptureMethod::PixelGrab);
    }

    #[test]
    fn all_failing_skips_cycle() {
        let (a, _) = scripted(CaptureMethod::Dxgi, true, false);
        let (b, _) = scripted(CaptureMethod::PixelGrab, true, false);
        let source = FrameSource::from_backends(vec![a, b], Arc::new(BufferPool::new()), 1.0);
        assert!(source.capture(Region::new(0, 0, 4, 4)).is_none());
    }

    #[test]
    fn scales_to_physical_and_back() {
        let (grab, _) = scripted(CaptureMethod::PixelGrab, false, false);
        let source = FrameSource::from_backends(vec![grab], Arc::new(BufferPool::new()), 1.5);
        let frame = source.capture(Region::new(10, 20, 100, 40)).expect("frame");
        assert_eq!((frame.width(), frame.height()), (150, 60));
        assert_eq!(frame.region(), Region::new(10, 20, 100, 40));
    }

    #[test]
    fn dropped_frame_returns_buffer_to_pool() {
        let pool = Arc::new(BufferPool::new());
        let (grab, _) = scripted(CaptureMethod::PixelGrab, false, false);
        let source = FrameSource::from_backends(vec![grab], Arc::clone(&pool), 1.0);
        let frame = source.capture(Region::new(0, 0, 6, 5));
        assert!(frame.is_some());
        drop(frame);
        assert_eq!(pool.available(Shape::new(5, 6, 3)), 1);
    }
}
