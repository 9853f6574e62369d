//! Portable pixel-grab capture via `xcap`.
//!
//! The slowest backend: it captures the whole monitor that contains the
//! region and crops afterwards. It is the only backend available outside
//! Windows and the last resort on it.

use std::sync::Arc;

use xcap::Monitor;

use crate::capture::pool::BufferPool;
use crate::capture::source::CaptureBackend;
use crate::capture::types::{CaptureMethod, Frame, PixelFormat, Region, copy_window_to_rgb};
use crate::error::QrGateError;

fn grab_err(stage: &str, e: impl std::fmt::Display) -> QrGateError {
    QrGateError::Capture {
        backend: CaptureMethod::PixelGrab.name(),
        reason: format!("{stage}: {e}"),
    }
}

/// Monitor grabber. Holds nothing but the primary monitor's scale, read
/// once at probe time.
pub struct XcapCapturer {
    scale: f64,
}

impl XcapCapturer {
    /// Probe the display server. Fails when no monitor is reachable
    /// (headless session, missing permissions).
    pub fn new() -> Result<Self, QrGateError> {
        let monitors = Monitor::all().map_err(|e| grab_err("enumerate monitors", e))?;
        let primary = monitors
            .iter()
            .find(|m| m.is_primary().unwrap_or(false))
            .or_else(|| monitors.first())
            .ok_or(QrGateError::BackendUnavailable("xcap: no monitors"))?;
        let scale = primary.scale_factor().map(f64::from).unwrap_or(1.0);
        Ok(Self { scale })
    }

    /// Scale factor reported for the primary monitor.
    pub fn scale_factor(&self) -> f64 {
        self.scale
    }

    fn grab_monitor(&self, area: Region, pool: &Arc<BufferPool>) -> Result<Frame, QrGateError> {
        // The monitor is located in its own coordinate space, which may be
        // logical; convert the physical area back before looking it up.
        let probe_x = (area.x as f64 / self.scale) as i32;
        let probe_y = (area.y as f64 / self.scale) as i32;
        let monitor = Monitor::from_point(probe_x, probe_y)
            .map_err(|e| grab_err("locate monitor", e))?;

        let image = monitor.capture_image().map_err(|e| grab_err("capture", e))?;
        let (img_w, img_h) = (image.width(), image.height());
        if img_w == 0 || img_h == 0 {
            return Err(QrGateError::EmptyFrame(CaptureMethod::PixelGrab.name()));
        }

        let mon_w = monitor.width().map_err(|e| grab_err("monitor width", e))?.max(1);
        let ratio = img_w as f64 / mon_w as f64;
        let mon_x = monitor.x().map_err(|e| grab_err("monitor x", e))?;
        let mon_y = monitor.y().map_err(|e| grab_err("monitor y", e))?;
        let physical = Region::new(
            (mon_x as f64 * ratio).round() as i32,
            (mon_y as f64 * ratio).round() as i32,
            img_w,
            img_h,
        );

        let window = area
            .intersect(&physical)
            .ok_or_else(|| QrGateError::RegionOutOfBounds(area.to_string()))?;

        let mut buffer = pool.acquire(window.height, window.width, 3);
        copy_window_to_rgb(
            image.as_raw(),
            img_w as usize * 4,
            PixelFormat::Rgba8,
            (window.x - physical.x) as usize,
            (window.y - physical.y) as usize,
            window.width as usize,
            window.height as usize,
            buffer.as_mut_slice(),
        );

        Ok(Frame::new(
            buffer,
            window.width,
            window.height,
            window,
            PixelFormat::Rgb8,
            CaptureMethod::PixelGrab,
        ))
    }
}

impl CaptureBackend for XcapCapturer {
    fn method(&self) -> CaptureMethod {
        CaptureMethod::PixelGrab
    }

    fn grab(&mut self, area: Region, pool: &Arc<BufferPool>) -> Result<Frame, QrGateError> {
        self.grab_monitor(area, pool)
    }
}
