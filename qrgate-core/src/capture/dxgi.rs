//! DXGI Desktop Duplication capture for Windows.
//!
//! Uses the Direct3D 11 Desktop Duplication API to obtain GPU-backed
//! desktop frames with minimal latency, then crops the requested region
//! into a pooled RGB buffer.
//!
//! # Platform
//!
//! This module is **Windows-only**. On other platforms the type is still
//! defined but construction fails, so the frame source skips it.

use std::sync::Arc;

use crate::capture::pool::BufferPool;
use crate::capture::source::CaptureBackend;
use crate::capture::types::{CaptureMethod, Frame, Region};
use crate::error::QrGateError;

/// How long `AcquireNextFrame` may block before we fall back to the last
/// staged desktop image.
const ACQUIRE_TIMEOUT_MS: u32 = 16;

/// DXGI-based screen capturer.
///
/// Wraps the `IDXGIOutputDuplication` pipeline:
///
/// 1. Create a D3D11 device.
/// 2. Enumerate outputs and duplicate the target monitor.
/// 3. Create a CPU-readable staging texture.
/// 4. On each [`grab`](CaptureBackend::grab):
///    - `AcquireNextFrame`; on timeout the desktop has not changed and the
///      staging texture still holds the previous image.
///    - Copy the desktop texture to the staging texture.
///    - Map, crop into a pooled buffer, unmap.
///
/// When the duplication is invalidated (UAC prompt, mode change,
/// fullscreen switch) the whole pipeline is rebuilt and only that one
/// grab fails.
///
/// # Safety
///
/// All unsafe FFI calls are confined to this struct.
pub struct DxgiCapturer {
    /// Desktop width in pixels.
    width: u32,
    /// Desktop height in pixels.
    height: u32,
    /// Desktop-space origin of the duplicated output.
    origin: (i32, i32),
    /// Whether the staging texture holds at least one desktop image.
    staged: bool,
    /// Output being duplicated, kept to rebuild after access loss.
    #[cfg(target_os = "windows")]
    monitor_index: u32,

    // ── Platform handles (Windows only) ──────────────────────
    #[cfg(target_os = "windows")]
    device: windows::Win32::Graphics::Direct3D11::ID3D11Device,
    #[cfg(target_os = "windows")]
    context: windows::Win32::Graphics::Direct3D11::ID3D11DeviceContext,
    #[cfg(target_os = "windows")]
    duplication: windows::Win32::Graphics::Dxgi::IDXGIOutputDuplication,
    #[cfg(target_os = "windows")]
    staging_texture: windows::Win32::Graphics::Direct3D11::ID3D11Texture2D,
}

impl DxgiCapturer {
    /// Desktop bounds of the duplicated output, in physical pixels.
    pub fn bounds(&self) -> Region {
        Region::new(self.origin.0, self.origin.1, self.width, self.height)
    }
}

// ── Windows implementation ───────────────────────────────────────

#[cfg(target_os = "windows")]
mod platform {
    use super::*;
    use crate::capture::types::{PixelFormat, copy_window_to_rgb};
    use windows::{
        Win32::Graphics::{
            Direct3D::D3D_DRIVER_TYPE_HARDWARE,
            Direct3D11::*,
            Dxgi::{Common::*, *},
        },
        core::Interface,
    };

    /// What a failed `AcquireNextFrame` means for this grab.
    #[derive(Debug, PartialEq, Eq)]
    enum AcquireFailure {
        /// Desktop unchanged; reuse the staged image.
        Unchanged,
        /// Duplication is dead and must be rebuilt.
        AccessLost,
        Other,
    }

    fn classify(code: windows::core::HRESULT, staged: bool) -> AcquireFailure {
        if code == DXGI_ERROR_WAIT_TIMEOUT && staged {
            AcquireFailure::Unchanged
        } else if code == DXGI_ERROR_ACCESS_LOST {
            AcquireFailure::AccessLost
        } else {
            AcquireFailure::Other
        }
    }

    fn dxgi_err(stage: &str, e: windows::core::Error) -> QrGateError {
        QrGateError::Capture {
            backend: CaptureMethod::Dxgi.name(),
            reason: format!("{stage} failed: {e}"),
        }
    }

    impl DxgiCapturer {
        /// Initialise the capturer for monitor `monitor_index` (0 = primary).
        pub fn new(monitor_index: u32) -> Result<Self, QrGateError> {
            unsafe { Self::init_dxgi(monitor_index) }
        }

        unsafe fn init_dxgi(monitor_index: u32) -> Result<Self, QrGateError> {
            // 1. Create D3D11 device + immediate context.
            let mut device = None;
            let mut context = None;
            unsafe {
                D3D11CreateDevice(
                    None,
                    D3D_DRIVER_TYPE_HARDWARE,
                    None,
                    D3D11_CREATE_DEVICE_BGRA_SUPPORT,
                    None,
                    D3D11_SDK_VERSION,
                    Some(&mut device),
                    None,
                    Some(&mut context),
                )
                .map_err(|e| dxgi_err("D3D11CreateDevice", e))?;
            }

            let device = device.ok_or(QrGateError::BackendUnavailable("DXGI: no D3D11 device"))?;
            let context =
                context.ok_or(QrGateError::BackendUnavailable("DXGI: no D3D11 context"))?;

            // 2. Traverse DXGI: Device → Adapter → Output.
            let dxgi_device: IDXGIDevice =
                device.cast().map_err(|e| dxgi_err("cast to IDXGIDevice", e))?;
            let adapter = unsafe { dxgi_device.GetAdapter() }.map_err(|e| dxgi_err("GetAdapter", e))?;
            let output: IDXGIOutput = unsafe { adapter.EnumOutputs(monitor_index) }
                .map_err(|e| dxgi_err("EnumOutputs", e))?;
            let output_desc = unsafe { output.GetDesc() }.map_err(|e| dxgi_err("GetDesc", e))?;
            let origin = (
                output_desc.DesktopCoordinates.left,
                output_desc.DesktopCoordinates.top,
            );

            // 3. Duplicate the output.
            let output1: IDXGIOutput1 =
                output.cast().map_err(|e| dxgi_err("cast to IDXGIOutput1", e))?;
            let duplication =
                unsafe { output1.DuplicateOutput(&device) }.map_err(|e| dxgi_err("DuplicateOutput", e))?;

            let dup_desc = unsafe { duplication.GetDesc() };
            let width = dup_desc.ModeDesc.Width;
            let height = dup_desc.ModeDesc.Height;

            // 4. Create a CPU-readable staging texture.
            let staging_desc = D3D11_TEXTURE2D_DESC {
                Width: width,
                Height: height,
                MipLevels: 1,
                ArraySize: 1,
                Format: DXGI_FORMAT_B8G8R8A8_UNORM,
                SampleDesc: DXGI_SAMPLE_DESC {
                    Count: 1,
                    Quality: 0,
                },
                Usage: D3D11_USAGE_STAGING,
                BindFlags: 0,
                CPUAccessFlags: D3D11_CPU_ACCESS_READ.0 as u32,
                MiscFlags: 0,
            };

            let mut staging_texture = None;
            unsafe {
                device
                    .CreateTexture2D(&staging_desc, None, Some(&mut staging_texture))
                    .map_err(|e| dxgi_err("CreateTexture2D (staging)", e))?;
            }
            let staging_texture =
                staging_texture.ok_or(QrGateError::BackendUnavailable("DXGI: no staging texture"))?;

            Ok(Self {
                width,
                height,
                origin,
                staged: false,
                monitor_index,
                device,
                context,
                duplication,
                staging_texture,
            })
        }

        /// Pull the newest desktop image into the staging texture.
        ///
        /// A wait timeout is not an error once something has been staged:
        /// the desktop simply has not changed since the last grab.
        unsafe fn refresh_staging(&mut self) -> Result<(), QrGateError> {
            let mut frame_info = DXGI_OUTDUPL_FRAME_INFO::default();
            let mut resource = None;

            match unsafe {
                self.duplication
                    .AcquireNextFrame(ACQUIRE_TIMEOUT_MS, &mut frame_info, &mut resource)
            } {
                Ok(()) => {}
                Err(e) => {
                    return match classify(e.code(), self.staged) {
                        AcquireFailure::Unchanged => Ok(()),
                        AcquireFailure::AccessLost => {
                            tracing::warn!("DXGI access lost; rebuilding desktop duplication");
                            *self = unsafe { Self::init_dxgi(self.monitor_index)? };
                            Err(dxgi_err("AcquireNextFrame", e))
                        }
                        AcquireFailure::Other => Err(dxgi_err("AcquireNextFrame", e)),
                    };
                }
            }

            let resource = match resource {
                Some(r) => r,
                None => {
                    let _ = unsafe { self.duplication.ReleaseFrame() };
                    return Err(QrGateError::EmptyFrame(CaptureMethod::Dxgi.name()));
                }
            };

            let texture: ID3D11Texture2D = resource.cast().map_err(|e| {
                let _ = unsafe { self.duplication.ReleaseFrame() };
                dxgi_err("cast to ID3D11Texture2D", e)
            })?;

            unsafe { self.context.CopyResource(&self.staging_texture, &texture) };

            // Release the DXGI frame as early as possible.
            let _ = unsafe { self.duplication.ReleaseFrame() };
            self.staged = true;
            Ok(())
        }

        unsafe fn grab_inner(
            &mut self,
            area: Region,
            pool: &Arc<BufferPool>,
        ) -> Result<Frame, QrGateError> {
            let window = area
                .intersect(&self.bounds())
                .ok_or_else(|| QrGateError::RegionOutOfBounds(area.to_string()))?;

            unsafe { self.refresh_staging()? };

            let mut mapped = D3D11_MAPPED_SUBRESOURCE::default();
            unsafe {
                self.context
                    .Map(&self.staging_texture, 0, D3D11_MAP_READ, 0, Some(&mut mapped))
                    .map_err(|e| dxgi_err("Map", e))?;
            }

            let stride = mapped.RowPitch as usize;
            let total_bytes = stride * self.height as usize;
            let src = unsafe { std::slice::from_raw_parts(mapped.pData as *const u8, total_bytes) };

            let mut buffer = pool.acquire(window.height, window.width, 3);
            copy_window_to_rgb(
                src,
                stride,
                PixelFormat::Bgra8,
                (window.x - self.origin.0) as usize,
                (window.y - self.origin.1) as usize,
                window.width as usize,
                window.height as usize,
                buffer.as_mut_slice(),
            );

            unsafe { self.context.Unmap(&self.staging_texture, 0) };

            Ok(Frame::new(
                buffer,
                window.width,
                window.height,
                window,
                PixelFormat::Rgb8,
                CaptureMethod::Dxgi,
            ))
        }
    }

    impl CaptureBackend for DxgiCapturer {
        fn method(&self) -> CaptureMethod {
            CaptureMethod::Dxgi
        }

        fn grab(&mut self, area: Region, pool: &Arc<BufferPool>) -> Result<Frame, QrGateError> {
            unsafe { self.grab_inner(area, pool) }
        }
    }

    // The COM interfaces are agile; the capturer is only ever used behind
    // the frame source's mutex.
    unsafe impl Send for DxgiCapturer {}

}

// ── Non-Windows stub ─────────────────────────────────────────────

#[cfg(not(target_os = "windows"))]
impl DxgiCapturer {
    /// DXGI is only available on Windows.
    pub fn new(_monitor_index: u32) -> Result<Self, QrGateError> {
        Err(QrGateError::BackendUnavailable(
            "DXGI Desktop Duplication is only available on Windows",
        ))
    }
}

#[cfg(not(target_os = "windows"))]
impl CaptureBackend for DxgiCapturer {
    fn method(&self) -> CaptureMethod {
        CaptureMethod::Dxgi
    }

    fn grab(&mut self, _area: Region, _pool: &Arc<BufferPool>) -> Result<Frame, QrGateError> {
        Err(QrGateError::BackendUnavailable(CaptureMethod::Dxgi.name()))
    }
}
