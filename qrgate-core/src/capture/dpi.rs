//! Display scale detection.
//!
//! Regions arrive in logical coordinates; every backend works in
//! physical pixels. The frame source multiplies by this factor once.

/// Scale factor of the primary display (1.0 = 96 DPI).
#[cfg(target_os = "windows")]
pub fn display_scale() -> f64 {
    use windows::Win32::UI::HiDpi::{
        GetDpiForSystem, PROCESS_PER_MONITOR_DPI_AWARE, SetProcessDpiAwareness,
    };

    // Without DPI awareness Windows virtualises coordinates and GDI/DXGI
    // disagree about sizes. Failure means awareness was already set.
    let _ = unsafe { SetProcessDpiAwareness(PROCESS_PER_MONITOR_DPI_AWARE) };
    let dpi = unsafe { GetDpiForSystem() };
    if dpi == 0 { 1.0 } else { dpi as f64 / 96.0 }
}

/// Scale factor of the primary display (1.0 = unscaled).
#[cfg(not(target_os = "windows"))]
pub fn display_scale() -> f64 {
    xcap::Monitor::all()
        .ok()
        .and_then(|monitors| {
            monitors
                .into_iter()
                .find(|m| m.is_primary().unwrap_or(false))
                .and_then(|m| m.scale_factor().ok())
        })
        .map(f64::from)
        .filter(|s| *s > 0.0)
        .unwrap_or(1.0)
}
