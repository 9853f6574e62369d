//! Image variants offered to the decode race.
//!
//! The cheap pass (original, analysis-size, downscaled) is built eagerly
//! for every frame. The enhancement pass is an iterator that computes
//! nothing until it is advanced, so binarization and super-resolution
//! only ever run after the cheap pass has failed.

use std::fmt;
use std::sync::Arc;

use image::GrayImage;
use image::imageops::{self, FilterType};

use crate::capture::Frame;
use crate::decode::enhance::{self, BIAS, BLOCK_SIZE};
use crate::decode::model::QrModel;

/// Which transformation produced a candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CandidateKind {
    /// The captured frame, converted to greyscale.
    Original,
    /// Fitted into the analysis resolution.
    Analysis,
    /// Reduced to a fraction of the frame.
    Downscaled,
    /// Adaptive local binarization of the analysis image.
    Binarized,
    /// Model upscaling of the analysis image.
    SuperResolved,
}

impl CandidateKind {
    pub const fn label(self) -> &'static str {
        match self {
            CandidateKind::Original => "original",
            CandidateKind::Analysis => "analysis",
            CandidateKind::Downscaled => "downscaled",
            CandidateKind::Binarized => "binarized",
            CandidateKind::SuperResolved => "super-resolved",
        }
    }

    /// `true` for the on-demand enhancement pass.
    pub const fn is_enhanced(self) -> bool {
        matches!(self, CandidateKind::Binarized | CandidateKind::SuperResolved)
    }
}

impl fmt::Display for CandidateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// One image variant.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub kind: CandidateKind,
    pub image: Arc<GrayImage>,
    /// Candidate pixels per frame pixel.
    pub scale: f32,
}

impl Candidate {
    pub fn new(kind: CandidateKind, image: GrayImage, scale: f32) -> Self {
        Self {
            kind,
            image: Arc::new(image),
            scale,
        }
    }
}

// ── Generator ────────────────────────────────────────────────────

/// Output of the cheap pass plus what the enhancement pass needs.
#[derive(Debug)]
pub struct FastCandidates {
    pub candidates: Vec<Candidate>,
    analysis: Candidate,
}

impl FastCandidates {
    /// The analysis-size image the enhancement pass starts from.
    pub fn analysis(&self) -> &Candidate {
        &self.analysis
    }
}

/// Builds candidates from frames.
#[derive(Clone)]
pub struct CandidateGenerator {
    analysis_size: (u32, u32),
    downscale: f32,
    model: Option<Arc<dyn QrModel>>,
    enhance_threads: usize,
}

impl CandidateGenerator {
    pub fn new(analysis_size: (u32, u32), downscale: f32) -> Self {
        Self {
            analysis_size: (analysis_size.0.max(1), analysis_size.1.max(1)),
            downscale: downscale.clamp(0.05, 1.0),
            model: None,
            enhance_threads: 1,
        }
    }

    /// Use `model` for the super-resolution candidate.
    pub fn with_model(mut self, model: Option<Arc<dyn QrModel>>) -> Self {
        self.model = model;
        self
    }

    /// Split binarization across `threads` (1 = sequential).
    pub fn with_enhance_threads(mut self, threads: usize) -> Self {
        self.enhance_threads = threads.max(1);
        self
    }

    /// Cheap pass for a captured frame.
    pub fn generate(&self, frame: &Frame) -> FastCandidates {
        self.generate_from_luma(frame.to_luma())
    }

    /// Cheap pass for an already-greyscale image.
    pub fn generate_from_luma(&self, luma: GrayImage) -> FastCandidates {
        let (w, h) = luma.dimensions();
        let (aw, ah) = self.analysis_size;

        let fit = if w == 0 || h == 0 {
            1.0
        } else {
            (aw as f64 / w as f64).min(ah as f64 / h as f64)
        };
        let analysis_dims = (
            ((w as f64 * fit).round() as u32).max(1),
            ((h as f64 * fit).round() as u32).max(1),
        );
        let analysis = if analysis_dims == (w, h) || w == 0 || h == 0 {
            luma.clone()
        } else {
            imageops::resize(&luma, analysis_dims.0, analysis_dims.1, FilterType::Lanczos3)
        };
        let analysis = Candidate::new(CandidateKind::Analysis, analysis, fit as f32);

        let down_dims = (
            (w as f32 * self.downscale) as u32,
            (h as f32 * self.downscale) as u32,
        );
        let downscaled = (down_dims.0 > 0 && down_dims.1 > 0).then(|| {
            Candidate::new(
                CandidateKind::Downscaled,
                imageops::resize(&luma, down_dims.0, down_dims.1, FilterType::Lanczos3),
                self.downscale,
            )
        });

        let mut candidates = vec![
            Candidate::new(CandidateKind::Original, luma, 1.0),
            analysis.clone(),
        ];
        candidates.extend(downscaled);
        FastCandidates {
            candidates,
            analysis,
        }
    }

    /// Lazy enhancement pass over the analysis image of `fast`.
    pub fn enhance(&self, fast: &FastCandidates) -> EnhancedCandidates {
        EnhancedCandidates {
            source: fast.analysis.clone(),
            model: self.model.clone(),
            threads: self.enhance_threads,
            step: 0,
        }
    }

    pub fn has_upscaler(&self) -> bool {
        self.model.as_ref().is_some_and(|m| m.has_upscaler())
    }
}

impl Default for CandidateGenerator {
    fn default() -> Self {
        Self::new((1280, 720), 0.4)
    }
}

// ── Enhancement pass ─────────────────────────────────────────────

/// Yields the binarized candidate, then the super-resolved one when an
/// upscaler is available. Each is computed on `next()`.
pub struct EnhancedCandidates {
    source: Candidate,
    model: Option<Arc<dyn QrModel>>,
    threads: usize,
    step: u8,
}

impl Iterator for EnhancedCandidates {
    type Item = Candidate;

    fn next(&mut self) -> Option<Candidate> {
        loop {
            let step = self.step;
            self.step = self.step.saturating_add(1);
            match step {
                0 => {
                    let img = &self.source.image;
                    let binary = if self.threads > 1 {
                        enhance::adaptive_threshold_parallel(img, BLOCK_SIZE, BIAS, self.threads)
                    } else {
                        enhance::adaptive_threshold(img, BLOCK_SIZE, BIAS)
                    };
                    return Some(Candidate::new(CandidateKind::Binarized, binary, self.source.scale));
                }
                1 => {
                    let Some(model) = self.model.as_ref().filter(|m| m.has_upscaler()) else {
                        continue;
                    };
                    let Some(upscaled) = model.super_resolve(&self.source.image) else {
                        continue;
                    };
                    let src_w = self.source.image.width().max(1) as f32;
                    let scale = self.source.scale * upscaled.width() as f32 / src_w;
                    return Some(Candidate::new(CandidateKind::SuperResolved, upscaled, scale));
                }
                _ => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::Region;
    use crate::decode::model::ModelDetection;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn frame(w: u32, h: u32) -> Frame {
        Frame::from_rgb(w, h, Region::new(0, 0, w, h), vec![128; (w * h * 3) as usize])
    }

    #[test]
    fn fast_pass_order_and_sizes() {
        let generator = CandidateGenerator::default();
        let fast = generator.generate(&frame(1920, 1080));
        let kinds: Vec<_> = fast.candidates.iter().map(|c| c.kind).collect();
        assert_eq!(
            kinds,
            [CandidateKind::Original, CandidateKind::Analysis, CandidateKind::Downscaled]
        );
        assert_eq!(fast.candidates[0].image.dimensions(), (1920, 1080));
        assert_eq!(fast.candidates[1].image.dimensions(), (1280, 720));
        assert_eq!(fast.candidates[2].image.dimensions(), (768, 432));
        assert!((fast.candidates[2].scale - 0.4).abs() < 1e-6);
    }

    #[test]
    fn analysis_preserves_aspect() {
        let generator = CandidateGenerator::default();
        let fast = generator.generate(&frame(800, 800));
        assert_eq!(fast.analysis().image.dimensions(), (720, 720));
    }

    #[test]
    fn tiny_frame_skips_downscale() {
        let generator = CandidateGenerator::default();
        let fast = generator.generate(&frame(2, 2));
        assert!(fast.candidates.iter().all(|c| c.kind != CandidateKind::Downscaled));
    }

    struct CountingUpscaler(AtomicUsize);

    impl QrModel for CountingUpscaler {
        fn name(&self) -> &'static str {
            "counting"
        }

        fn detect(&self, _image: &GrayImage) -> Vec<ModelDetection> {
            Vec::new()
        }

        fn has_upscaler(&self) -> bool {
            true
        }

        fn super_resolve(&self, image: &GrayImage) -> Option<GrayImage> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Some(GrayImage::new(image.width() * 2, image.height() * 2))
        }
    }

    #[test]
    fn enhancement_is_lazy() {
        let model = Arc::new(CountingUpscaler(AtomicUsize::new(0)));
        let shared: Arc<dyn QrModel> = model.clone();
        let generator = CandidateGenerator::new((64, 64), 0.5).with_model(Some(shared));
        let fast = generator.generate(&frame(32, 32));

        let mut pass = generator.enhance(&fast);
        let first = pass.next().expect("binarized");
        assert_eq!(first.kind, CandidateKind::Binarized);
        assert_eq!(model.0.load(Ordering::SeqCst), 0);

        let second = pass.next().expect("super-resolved");
        assert_eq!(second.kind, CandidateKind::SuperResolved);
        assert_eq!(second.image.dimensions(), (128, 128));
        assert!((second.scale - 4.0).abs() < 1e-6);
        assert!(pass.next().is_none());
    }

    #[test]
    fn no_upscaler_means_binarization_only() {
        let generator = CandidateGenerator::default().with_enhance_threads(4);
        let fast = generator.generate(&frame(40, 30));
        let kinds: Vec<_> = generator.enhance(&fast).map(|c| c.kind).collect();
        assert_eq!(kinds, [CandidateKind::Binarized]);
    }
}
