//! Seam for learned QR detectors.
//!
//! A model-based detector (CNN finder plus optional super-resolution
//! upscaler) is more accurate on blurry stream captures than the classical
//! decoder. Runtimes for such models are platform specific, so the engine
//! only depends on this trait; when no model is installed the classical
//! decoder handles every candidate alone.

use image::GrayImage;

use crate::capture::Region;

/// One code found by a model, in the pixel space of the image it was
/// given.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelDetection {
    pub payload: String,
    pub bounds: Option<Region>,
}

/// A learned detector/decoder. Must be free of observable side effects:
/// results of cancelled decodes are thrown away.
pub trait QrModel: Send + Sync {
    /// Short label used in logs and performance reports.
    fn name(&self) -> &'static str;

    /// Detect and decode every code in `image`.
    fn detect(&self, image: &GrayImage) -> Vec<ModelDetection>;

    /// Whether [`QrModel::super_resolve`] is backed by an upscaler.
    fn has_upscaler(&self) -> bool {
        false
    }

    /// Upscale `image`. `None` when no upscaler is loaded or it failed.
    fn super_resolve(&self, _image: &GrayImage) -> Option<GrayImage> {
        None
    }
}
