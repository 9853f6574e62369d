//! Shared types for the capture stage.
//!
//! [`Region`] is always expressed in **logical** screen coordinates (what
//! the user sees and drags). [`Frame`] dimensions are **physical** pixels;
//! the frame source applies the display scale factor in between.

use std::fmt;
use std::sync::Arc;

use image::GrayImage;
use serde::{Deserialize, Serialize};

use crate::capture::pool::{Buffer, BufferPool};

// ── Region ───────────────────────────────────────────────────────

/// A rectangle on screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Region {
    /// Left edge.
    pub x: i32,
    /// Top edge.
    pub y: i32,
    /// Width.
    pub width: u32,
    /// Height.
    pub height: u32,
}

impl Region {
    pub const fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// `true` when the rectangle covers no pixels.
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Number of pixels covered.
    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// Exclusive right edge.
    pub fn right(&self) -> i64 {
        self.x as i64 + self.width as i64
    }

    /// Exclusive bottom edge.
    pub fn bottom(&self) -> i64 {
        self.y as i64 + self.height as i64
    }

    /// Multiply every coordinate by `factor` (logical → physical).
    pub fn scaled(&self, factor: f64) -> Self {
        if (factor - 1.0).abs() < f64::EPSILON {
            return *self;
        }
        Self {
            x: (self.x as f64 * factor).round() as i32,
            y: (self.y as f64 * factor).round() as i32,
            width: (self.width as f64 * factor).round() as u32,
            height: (self.height as f64 * factor).round() as u32,
        }
    }

    /// Grow the rectangle by `margin` of its size on every side.
    ///
    /// A margin of `0.1` turns `w` into `1.2 w` and shifts the origin by
    /// `-0.1 w`.
    pub fn expanded(&self, margin: f64) -> Self {
        let dx = self.width as f64 * margin;
        let dy = self.height as f64 * margin;
        Self {
            x: (self.x as f64 - dx) as i32,
            y: (self.y as f64 - dy) as i32,
            width: (self.width as f64 * (1.0 + 2.0 * margin)) as u32,
            height: (self.height as f64 * (1.0 + 2.0 * margin)) as u32,
        }
    }

    /// Overlap of two rectangles, or `None` if they are disjoint.
    pub fn intersect(&self, other: &Region) -> Option<Region> {
        let left = (self.x as i64).max(other.x as i64);
        let top = (self.y as i64).max(other.y as i64);
        let right = self.right().min(other.right());
        let bottom = self.bottom().min(other.bottom());
        if right <= left || bottom <= top {
            return None;
        }
        Some(Region {
            x: left as i32,
            y: top as i32,
            width: (right - left) as u32,
            height: (bottom - top) as u32,
        })
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}+{}+{}", self.width, self.height, self.x, self.y)
    }
}

// ── PixelFormat ──────────────────────────────────────────────────

/// Pixel layout of captured frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    /// 4 bytes per pixel: Blue, Green, Red, Alpha (DXGI / GDI default).
    Bgra8,
    /// 4 bytes per pixel: Red, Green, Blue, Alpha.
    Rgba8,
    /// 3 bytes per pixel: Red, Green, Blue.
    Rgb8,
}

impl PixelFormat {
    /// Bytes consumed by a single pixel in this format.
    pub const fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Bgra8 | PixelFormat::Rgba8 => 4,
            PixelFormat::Rgb8 => 3,
        }
    }

    /// `(r, g, b)` byte offsets inside one pixel.
    const fn rgb_offsets(self) -> (usize, usize, usize) {
        match self {
            PixelFormat::Bgra8 => (2, 1, 0),
            PixelFormat::Rgba8 | PixelFormat::Rgb8 => (0, 1, 2),
        }
    }
}

// ── CaptureMethod ────────────────────────────────────────────────

/// Which backend produced a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureMethod {
    /// DXGI Desktop Duplication (GPU-backed).
    Dxgi,
    /// GDI `BitBlt` from the screen DC.
    BitBlt,
    /// Portable pixel grab via `xcap`.
    #[serde(rename = "xcap")]
    PixelGrab,
}

impl CaptureMethod {
    /// Fallback order, fastest first.
    pub const CHAIN: [CaptureMethod; 3] = [
        CaptureMethod::Dxgi,
        CaptureMethod::BitBlt,
        CaptureMethod::PixelGrab,
    ];

    pub const fn name(self) -> &'static str {
        match self {
            CaptureMethod::Dxgi => "DXGI",
            CaptureMethod::BitBlt => "BitBlt",
            CaptureMethod::PixelGrab => "xcap",
        }
    }
}

impl fmt::Display for CaptureMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl std::str::FromStr for CaptureMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "dxgi" => Ok(CaptureMethod::Dxgi),
            "bitblt" | "gdi" => Ok(CaptureMethod::BitBlt),
            "xcap" | "grab" => Ok(CaptureMethod::PixelGrab),
            other => Err(format!("unknown capture backend: {other}")),
        }
    }
}

// ── Frame ────────────────────────────────────────────────────────

/// One captured screen rectangle.
///
/// Pixels are tightly packed (`width * bytes_per_pixel` per row). The
/// backing buffer comes from a [`BufferPool`] and goes back to it when
/// the frame is dropped.
pub struct Frame {
    width: u32,
    height: u32,
    region: Region,
    format: PixelFormat,
    method: CaptureMethod,
    buffer: Buffer,
    pool: Option<Arc<BufferPool>>,
}

impl Frame {
    /// Wrap a filled buffer. Backends pass the physical desktop rectangle
    /// the pixels were taken from; the frame source relabels it with the
    /// logical region afterwards.
    pub fn new(
        buffer: Buffer,
        width: u32,
        height: u32,
        region: Region,
        format: PixelFormat,
        method: CaptureMethod,
    ) -> Self {
        Self {
            width,
            height,
            region,
            format,
            method,
            buffer,
            pool: None,
        }
    }

    /// Return the buffer to `pool` on drop.
    pub fn pooled(mut self, pool: Arc<BufferPool>) -> Self {
        self.pool = Some(pool);
        self
    }

    /// Replace the logical region (physical → logical relabel).
    pub(crate) fn with_region(mut self, region: Region) -> Self {
        self.region = region;
        self
    }

    /// Build an RGB frame from raw bytes (tests and single-shot tools).
    pub fn from_rgb(width: u32, height: u32, region: Region, data: Vec<u8>) -> Self {
        let buffer = Buffer::from_vec(height, width, 3, data);
        Self::new(buffer, width, height, region, PixelFormat::Rgb8, CaptureMethod::PixelGrab)
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Logical rectangle this frame covers.
    pub fn region(&self) -> Region {
        self.region
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    /// Backend that produced the frame.
    pub fn method(&self) -> CaptureMethod {
        self.method
    }

    pub fn data(&self) -> &[u8] {
        self.buffer.as_slice()
    }

    /// `true` when the frame carries no usable pixels.
    pub fn is_empty(&self) -> bool {
        self.width == 0
            || self.height == 0
            || self.buffer.len() < self.width as usize * self.height as usize * self.format.bytes_per_pixel()
    }

    /// BT.601 luminance copy of the frame.
    pub fn to_luma(&self) -> GrayImage {
        let (r_off, g_off, b_off) = self.format.rgb_offsets();
        let bpp = self.format.bytes_per_pixel();
        let pixels = self.width as usize * self.height as usize;
        let src = self.buffer.as_slice();
        let mut grey = Vec::with_capacity(pixels);
        for px in src.chunks_exact(bpp).take(pixels) {
            let r = px[r_off] as u32;
            let g = px[g_off] as u32;
            let b = px[b_off] as u32;
            // (77R + 150G + 29B) >> 8 ≈ 0.299R + 0.587G + 0.114B
            grey.push(((77 * r + 150 * g + 29 * b) >> 8) as u8);
        }
        grey.resize(pixels, 0);
        GrayImage::from_raw(self.width, self.height, grey).unwrap_or_else(|| GrayImage::new(0, 0))
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("region", &self.region)
            .field("format", &self.format)
            .field("method", &self.method)
            .finish()
    }
}

impl Drop for Frame {
    fn drop(&mut self) {
        if let Some(pool) = self.pool.take() {
            pool.release(std::mem::take(&mut self.buffer));
        }
    }
}

// ── Pixel copy helpers ───────────────────────────────────────────

/// Copy a `width × height` window starting at `(left, top)` out of a
/// strided 4-byte source into a packed RGB destination.
#[allow(clippy::too_many_arguments)]
pub(crate) fn copy_window_to_rgb(
    src: &[u8],
    src_stride: usize,
    src_format: PixelFormat,
    left: usize,
    top: usize,
    width: usize,
    height: usize,
    dst: &mut [u8],
) {
    let (r_off, g_off, b_off) = src_format.rgb_offsets();
    let bpp = src_format.bytes_per_pixel();
    for row in 0..height {
        let src_start = (top + row) * src_stride + left * bpp;
        let src_row = &src[src_start..src_start + width * bpp];
        let dst_row = &mut dst[row * width * 3..(row + 1) * width * 3];
        for (px, out) in src_row.chunks_exact(bpp).zip(dst_row.chunks_exact_mut(3)) {
            out[0] = px[r_off];
            out[1] = px[g_off];
            out[2] = px[b_off];
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expanded_adds_margin_on_each_side() {
        let r = Region::new(100, 200, 100, 50);
        let e = r.expanded(0.1);
        assert_eq!(e, Region::new(90, 195, 120, 60));
    }

    #[test]
    fn scaled_by_one_is_identity() {
        let r = Region::new(3, 4, 5, 6);
        assert_eq!(r.scaled(1.0), r);
        assert_eq!(r.scaled(1.5), Region::new(5, 6, 8, 9));
    }

    #[test]
    fn intersect_clips_and_rejects_disjoint() {
        let a = Region::new(0, 0, 100, 100);
        let b = Region::new(50, 80, 100, 100);
        assert_eq!(a.intersect(&b), Some(Region::new(50, 80, 50, 20)));
        assert_eq!(a.intersect(&Region::new(200, 0, 10, 10)), None);
    }

    #[test]
    fn capture_method_parses_settings_names() {
        assert_eq!("DXGI".parse::<CaptureMethod>(), Ok(CaptureMethod::Dxgi));
        assert_eq!("xcap".parse::<CaptureMethod>(), Ok(CaptureMethod::PixelGrab));
        assert!("vnc".parse::<CaptureMethod>().is_err());
    }

    #[test]
    fn luma_uses_channel_order() {
        let red_bgra = [0u8, 0, 255, 255];
        let buffer = Buffer::from_vec(1, 1, 4, red_bgra.to_vec());
        let frame = Frame::new(
            buffer,
            1,
            1,
            Region::new(0, 0, 1, 1),
            PixelFormat::Bgra8,
            CaptureMethod::Dxgi,
        );
        // 77 * 255 >> 8
        assert_eq!(frame.to_luma().get_pixel(0, 0).0[0], 76);
    }

    #[test]
    fn copy_window_skips_stride_padding() {
        // 2x2 BGRA with 4 bytes of row padding.
        let src = [
            1, 2, 3, 0, 4, 5, 6, 0, 9, 9, 9, 9, //
            7, 8, 9, 0, 10, 11, 12, 0, 9, 9, 9, 9,
        ];
        let mut dst = [0u8; 3];
        copy_window_to_rgb(&src, 12, PixelFormat::Bgra8, 1, 1, 1, 1, &mut dst);
        assert_eq!(dst, [12, 11, 10]);
    }
}
