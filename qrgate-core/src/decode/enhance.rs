//! Adaptive local binarization.
//!
//! Each pixel is compared against the mean of its `block × block`
//! neighbourhood minus `c`; pixels above become white, the rest black.
//! The neighbourhood sums come from an integral image so the cost is
//! independent of the block size.

use std::thread;

use image::GrayImage;

/// Neighbourhood edge length used by the enhancement pass.
pub const BLOCK_SIZE: u32 = 11;
/// Bias subtracted from the local mean.
pub const BIAS: i32 = 2;

/// Summed-area table with one row and column of zero padding.
struct Integral {
    sums: Vec<u64>,
    stride: usize,
}

impl Integral {
    fn build(img: &GrayImage) -> Self {
        let (w, h) = (img.width() as usize, img.height() as usize);
        let stride = w + 1;
        let mut sums = vec![0u64; stride * (h + 1)];
        let raw = img.as_raw();
        for y in 0..h {
            let mut row_sum = 0u64;
            for x in 0..w {
                row_sum += raw[y * w + x] as u64;
                sums[(y + 1) * stride + x + 1] = row_sum + sums[y * stride + x + 1];
            }
        }
        Self { sums, stride }
    }

    /// Sum over `[x0, x1) × [y0, y1)`.
    fn sum(&self, x0: usize, y0: usize, x1: usize, y1: usize) -> u64 {
        let s = self.stride;
        self.sums[y1 * s + x1] + self.sums[y0 * s + x0] - self.sums[y0 * s + x1] - self.sums[y1 * s + x0]
    }
}

fn threshold_rows(
    img: &GrayImage,
    integral: &Integral,
    half: usize,
    c: i32,
    first_row: usize,
    out: &mut [u8],
) {
    let (w, h) = (img.width() as usize, img.height() as usize);
    let raw = img.as_raw();
    for (i, row) in out.chunks_exact_mut(w).enumerate() {
        let y = first_row + i;
        let y0 = y.saturating_sub(half);
        let y1 = (y + half + 1).min(h);
        for (x, px) in row.iter_mut().enumerate() {
            let x0 = x.saturating_sub(half);
            let x1 = (x + half + 1).min(w);
            let area = ((y1 - y0) * (x1 - x0)) as i64;
            let mean = integral.sum(x0, y0, x1, y1) as i64 / area;
            *px = if raw[y * w + x] as i64 > mean - c as i64 { 255 } else { 0 };
        }
    }
}

/// Binarize `img` against its local mean.
pub fn adaptive_threshold(img: &GrayImage, block: u32, c: i32) -> GrayImage {
    let (w, h) = img.dimensions();
    if w == 0 || h == 0 {
        return GrayImage::new(w, h);
    }
    let integral = Integral::build(img);
    let mut out = vec![0u8; w as usize * h as usize];
    threshold_rows(img, &integral, (block / 2) as usize, c, 0, &mut out);
    GrayImage::from_raw(w, h, out).unwrap_or_else(|| GrayImage::new(w, h))
}

/// Same result as [`adaptive_threshold`], with the rows split into bands
/// processed on `threads` scoped threads.
pub fn adaptive_threshold_parallel(img: &GrayImage, block: u32, c: i32, threads: usize) -> GrayImage {
    let (w, h) = img.dimensions();
    let threads = threads.clamp(1, h.max(1) as usize);
    if threads == 1 || w == 0 {
        return adaptive_threshold(img, block, c);
    }

    let integral = Integral::build(img);
    let half = (block / 2) as usize;
    let rows_per_band = (h as usize).div_ceil(threads);
    let mut out = vec![0u8; w as usize * h as usize];

    thread::scope(|scope| {
        for (band, chunk) in out.chunks_mut(rows_per_band * w as usize).enumerate() {
            let integral = &integral;
            scope.spawn(move || threshold_rows(img, integral, half, c, band * rows_per_band, chunk));
        }
    });

    GrayImage::from_raw(w, h, out).unwrap_or_else(|| GrayImage::new(w, h))
}

/// Worker count for the parallel variant.
pub fn default_threads() -> usize {
    thread::available_parallelism().map_or(1, |n| n.get())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    fn gradient(w: u32, h: u32) -> GrayImage {
        GrayImage::from_fn(w, h, |x, y| Luma([((x * 7 + y * 13) % 256) as u8]))
    }

    #[test]
    fn output_is_binary_and_same_size() {
        let img = gradient(37, 23);
        let out = adaptive_threshold(&img, BLOCK_SIZE, BIAS);
        assert_eq!(out.dimensions(), (37, 23));
        assert!(out.pixels().all(|p| p.0[0] == 0 || p.0[0] == 255));
    }

    #[test]
    fn dark_module_on_light_background() {
        let mut img = GrayImage::from_pixel(21, 21, Luma([200]));
        for y in 8..13 {
            for x in 8..13 {
                img.put_pixel(x, y, Luma([30]));
            }
        }
        let out = adaptive_threshold(&img, BLOCK_SIZE, BIAS);
        assert_eq!(out.get_pixel(10, 10).0[0], 0);
        assert_eq!(out.get_pixel(0, 0).0[0], 255);
    }

    #[test]
    fn flat_image_stays_white() {
        let img = GrayImage::from_pixel(16, 16, Luma([90]));
        let out = adaptive_threshold(&img, BLOCK_SIZE, BIAS);
        assert!(out.pixels().all(|p| p.0[0] == 255));
    }

    #[test]
    fn parallel_matches_sequential() {
        let img = gradient(64, 51);
        let seq = adaptive_threshold(&img, BLOCK_SIZE, BIAS);
        for threads in [2, 3, 8, 100] {
            let par = adaptive_threshold_parallel(&img, BLOCK_SIZE, BIAS, threads);
            assert_eq!(seq.as_raw(), par.as_raw(), "threads = {threads}");
        }
    }

    #[test]
    fn empty_image() {
        let out = adaptive_threshold(&GrayImage::new(0, 0), BLOCK_SIZE, BIAS);
        assert_eq!(out.dimensions(), (0, 0));
    }
}
