//! GDI `BitBlt` capture for Windows.
//!
//! Slower than desktop duplication but works on remote sessions and
//! drivers that refuse `DuplicateOutput`. Each grab blits only the
//! requested rectangle from the screen DC into a 32-bit DIB.

use std::sync::Arc;

use crate::capture::pool::BufferPool;
use crate::capture::source::CaptureBackend;
use crate::capture::types::{CaptureMethod, Frame, Region};
use crate::error::QrGateError;

/// Screen-DC blitter. Stateless apart from the virtual screen bounds read
/// at construction.
pub struct GdiCapturer {
    bounds: Region,
}

impl GdiCapturer {
    /// Virtual-screen bounds in physical pixels.
    pub fn bounds(&self) -> Region {
        self.bounds
    }
}

#[cfg(target_os = "windows")]
mod platform {
    use super::*;
    use crate::capture::types::{PixelFormat, copy_window_to_rgb};
    use windows::Win32::Foundation::HWND;
    use windows::Win32::Graphics::Gdi::{
        BI_RGB, BITMAPINFO, BITMAPINFOHEADER, BitBlt, CreateCompatibleBitmap, CreateCompatibleDC,
        DIB_RGB_COLORS, DeleteDC, DeleteObject, GetDC, GetDIBits, ReleaseDC, SRCCOPY,
        SelectObject,
    };
    use windows::Win32::UI::WindowsAndMessaging::{
        GetSystemMetrics, SM_CXVIRTUALSCREEN, SM_CYVIRTUALSCREEN, SM_XVIRTUALSCREEN,
        SM_YVIRTUALSCREEN,
    };

    fn gdi_err(stage: &str) -> QrGateError {
        QrGateError::Capture {
            backend: CaptureMethod::BitBlt.name(),
            reason: format!("{stage} failed"),
        }
    }

    impl GdiCapturer {
        pub fn new() -> Result<Self, QrGateError> {
            let bounds = unsafe {
                Region::new(
                    GetSystemMetrics(SM_XVIRTUALSCREEN),
                    GetSystemMetrics(SM_YVIRTUALSCREEN),
                    GetSystemMetrics(SM_CXVIRTUALSCREEN).max(0) as u32,
                    GetSystemMetrics(SM_CYVIRTUALSCREEN).max(0) as u32,
                )
            };
            if bounds.is_empty() {
                return Err(QrGateError::BackendUnavailable("BitBlt: no virtual screen"));
            }
            Ok(Self { bounds })
        }

        unsafe fn blit(&self, area: Region, pool: &Arc<BufferPool>) -> Result<Frame, QrGateError> {
            let window = area
                .intersect(&self.bounds)
                .ok_or_else(|| QrGateError::RegionOutOfBounds(area.to_string()))?;
            let (w, h) = (window.width as i32, window.height as i32);

            let screen_dc = unsafe { GetDC(HWND::default()) };
            if screen_dc.is_invalid() {
                return Err(gdi_err("GetDC"));
            }
            let mem_dc = unsafe { CreateCompatibleDC(screen_dc) };
            let bitmap = unsafe { CreateCompatibleBitmap(screen_dc, w, h) };
            let previous = unsafe { SelectObject(mem_dc, bitmap) };

            let mut bgra = vec![0u8; window.width as usize * window.height as usize * 4];
            let blitted = unsafe {
                BitBlt(mem_dc, 0, 0, w, h, screen_dc, window.x, window.y, SRCCOPY).is_ok()
            };

            let mut info = BITMAPINFO {
                bmiHeader: BITMAPINFOHEADER {
                    biSize: std::mem::size_of::<BITMAPINFOHEADER>() as u32,
                    biWidth: w,
                    // Negative height: top-down rows.
                    biHeight: -h,
                    biPlanes: 1,
                    biBitCount: 32,
                    biCompression: BI_RGB.0,
                    ..Default::default()
                },
                ..Default::default()
            };
            let lines = if blitted {
                unsafe {
                    GetDIBits(
                        mem_dc,
                        bitmap,
                        0,
                        h as u32,
                        Some(bgra.as_mut_ptr().cast()),
                        &mut info,
                        DIB_RGB_COLORS,
                    )
                }
            } else {
                0
            };

            unsafe {
                SelectObject(mem_dc, previous);
                let _ = DeleteObject(bitmap);
                let _ = DeleteDC(mem_dc);
                ReleaseDC(HWND::default(), screen_dc);
            }

            if !blitted {
                return Err(gdi_err("BitBlt"));
            }
            if lines != h {
                return Err(QrGateError::EmptyFrame(CaptureMethod::BitBlt.name()));
            }

            let mut buffer = pool.acquire(window.height, window.width, 3);
            copy_window_to_rgb(
                &bgra,
                window.width as usize * 4,
                PixelFormat::Bgra8,
                0,
                0,
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
                CaptureMethod::BitBlt,
            ))
        }
    }

    impl CaptureBackend for GdiCapturer {
        fn method(&self) -> CaptureMethod {
            CaptureMethod::BitBlt
        }

        fn grab(&mut self, area: Region, pool: &Arc<BufferPool>) -> Result<Frame, QrGateError> {
            unsafe { self.blit(area, pool) }
        }
    }
}

// ── Non-Windows stub ─────────────────────────────────────────────

#[cfg(not(target_os = "windows"))]
impl GdiCapturer {
    /// GDI is only available on Windows.
    pub fn new() -> Result<Self, QrGateError> {
        Err(QrGateError::BackendUnavailable(
            "GDI BitBlt is only available on Windows",
        ))
    }
}

#[cfg(not(target_os = "windows"))]
impl CaptureBackend for GdiCapturer {
    fn method(&self) -> CaptureMethod {
        CaptureMethod::BitBlt
    }

    fn grab(&mut self, _area: Region, _pool: &Arc<BufferPool>) -> Result<Frame, QrGateError> {
        Err(QrGateError::BackendUnavailable(CaptureMethod::BitBlt.name()))
    }
}
