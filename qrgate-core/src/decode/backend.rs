//! Decoder backends tried, in order, on every candidate.

use std::sync::Arc;

use image::GrayImage;
use rqrr::PreparedImage;

use crate::capture::Region;
use crate::decode::model::QrModel;

/// A code read from one candidate image, in that image's pixel space.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedCode {
    pub payload: String,
    pub bounds: Option<Region>,
}

/// Turns a greyscale image into zero or more decoded strings.
///
/// Implementations must be side-effect free: the decode race drops the
/// results of losing workers without stopping them.
pub trait QrDecoder: Send + Sync {
    fn name(&self) -> &'static str;

    fn decode(&self, image: &GrayImage) -> Vec<DecodedCode>;
}

// ── Classical ────────────────────────────────────────────────────

/// Finder-pattern decoder backed by `rqrr`.
#[derive(Debug, Default, Clone, Copy)]
pub struct RqrrDecoder;

impl QrDecoder for RqrrDecoder {
    fn name(&self) -> &'static str {
        "rqrr"
    }

    fn decode(&self, image: &GrayImage) -> Vec<DecodedCode> {
        let (w, h) = (image.width() as usize, image.height() as usize);
        if w == 0 || h == 0 {
            return Vec::new();
        }
        let raw = image.as_raw();
        let mut prepared = PreparedImage::prepare_from_greyscale(w, h, |x, y| raw[y * w + x]);
        prepared
            .detect_grids()
            .into_iter()
            .filter_map(|grid| {
                let (_, payload) = grid.decode().ok()?;
                let xs = grid.bounds.iter().map(|p| p.x);
                let ys = grid.bounds.iter().map(|p| p.y);
                let (min_x, max_x) = (xs.clone().min()?, xs.max()?);
                let (min_y, max_y) = (ys.clone().min()?, ys.max()?);
                let bounds = Region::new(
                    min_x.max(0),
                    min_y.max(0),
                    (max_x - min_x.max(0)).max(0) as u32,
                    (max_y - min_y.max(0)).max(0) as u32,
                );
                Some(DecodedCode {
                    payload,
                    bounds: (!bounds.is_empty()).then_some(bounds),
                })
            })
            .collect()
    }
}

// ── Model-based ──────────────────────────────────────────────────

/// Adapts a [`QrModel`] to the decoder interface.
#[derive(Clone)]
pub struct ModelDecoder {
    model: Arc<dyn QrModel>,
}

impl ModelDecoder {
    pub fn new(model: Arc<dyn QrModel>) -> Self {
        Self { model }
    }
}

impl QrDecoder for ModelDecoder {
    fn name(&self) -> &'static str {
        self.model.name()
    }

    fn decode(&self, image: &GrayImage) -> Vec<DecodedCode> {
        self.model
            .detect(image)
            .into_iter()
            .map(|d| DecodedCode {
                payload: d.payload,
                bounds: d.bounds,
            })
            .collect()
    }
}
