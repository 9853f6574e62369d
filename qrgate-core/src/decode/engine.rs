//! The decode race.
//!
//! ```text
//! Frame ─► CandidateGenerator ─► [original, analysis, downscaled]
//!                                     │ decode_first (3 workers, first hit wins)
//!                                     ▼
//!                                   miss ─► enhance() ─► decode_sequential
//! ```
//!
//! Cancellation is advisory. Candidates still waiting for a worker are
//! skipped once a winner is known; decodes already running finish on
//! their blocking thread and their results are dropped.

use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::capture::{Frame, Region};
use crate::decode::backend::{ModelDecoder, QrDecoder, RqrrDecoder};
use crate::decode::candidates::{Candidate, CandidateGenerator, CandidateKind};
use crate::decode::enhance;
use crate::decode::model::QrModel;

/// Marker every accepted payload must contain.
pub const DEFAULT_MARKER: &str = "G152#KURO";

/// Concurrent decode workers.
pub const DEFAULT_WORKERS: usize = 3;

// ── DecodeConfig ─────────────────────────────────────────────────

/// Tunables for candidate generation and the race.
#[derive(Debug, Clone)]
pub struct DecodeConfig {
    /// Concurrent decode workers.
    pub workers: usize,
    /// Substring identifying application payloads.
    pub marker: String,
    /// Analysis resolution the primary candidate is fitted into.
    pub analysis_size: (u32, u32),
    /// Factor for the downscaled candidate.
    pub downscale: f32,
    /// Split binarization across all cores.
    pub parallel_enhance: bool,
}

impl Default for DecodeConfig {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            marker: DEFAULT_MARKER.to_string(),
            analysis_size: (1280, 720),
            downscale: 0.4,
            parallel_enhance: false,
        }
    }
}

// ── DecodeHit ────────────────────────────────────────────────────

/// A payload that passed the marker filter.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodeHit {
    pub payload: String,
    /// Candidate that produced it.
    pub kind: CandidateKind,
    /// Decoder backend that produced it.
    pub decoder: &'static str,
    /// Code location in frame pixels, when the decoder reports one.
    pub bounds: Option<Region>,
}

// ── DecodeEngine ─────────────────────────────────────────────────

/// Candidate generator, decoder chain and worker permits.
///
/// Permits are shared by every call, so at most `workers` candidates are
/// being decoded at any moment across overlapping callers.
pub struct DecodeEngine {
    generator: CandidateGenerator,
    decoders: Arc<Vec<Arc<dyn QrDecoder>>>,
    marker: Arc<str>,
    permits: Arc<Semaphore>,
}

impl DecodeEngine {
    /// Engine with the model decoder first (when `model` is present) and
    /// `rqrr` as the fallback.
    pub fn new(config: &DecodeConfig, model: Option<Arc<dyn QrModel>>) -> Self {
        let mut decoders: Vec<Arc<dyn QrDecoder>> = Vec::new();
        if let Some(model) = &model {
            decoders.push(Arc::new(ModelDecoder::new(Arc::clone(model))));
        }
        decoders.push(Arc::new(RqrrDecoder));
        Self::with_decoders(config, decoders, model)
    }

    /// Engine with an explicit decoder chain.
    pub fn with_decoders(
        config: &DecodeConfig,
        decoders: Vec<Arc<dyn QrDecoder>>,
        model: Option<Arc<dyn QrModel>>,
    ) -> Self {
        let threads = if config.parallel_enhance {
            enhance::default_threads()
        } else {
            1
        };
        let generator = CandidateGenerator::new(config.analysis_size, config.downscale)
            .with_model(model)
            .with_enhance_threads(threads);
        Self {
            generator,
            decoders: Arc::new(decoders),
            marker: Arc::from(config.marker.as_str()),
            permits: Arc::new(Semaphore::new(config.workers.max(1))),
        }
    }

    pub fn generator(&self) -> &CandidateGenerator {
        &self.generator
    }

    pub fn marker(&self) -> &str {
        &self.marker
    }

    /// Names of the decoder backends, in the order they are tried.
    pub fn decoder_names(&self) -> Vec<&'static str> {
        self.decoders.iter().map(|d| d.name()).collect()
    }

    /// Full two-pass scan of one frame.
    pub async fn scan(&self, frame: Frame) -> Option<DecodeHit> {
        let generator = self.generator.clone();
        let fast = tokio::task::spawn_blocking(move || generator.generate(&frame))
            .await
            .ok()?;

        if let Some(hit) = self.decode_first(fast.candidates.clone()).await {
            return Some(hit);
        }

        trace!("fast pass missed; running enhancement pass");
        let pass = self.generator.enhance(&fast);
        let decoders = Arc::clone(&self.decoders);
        let marker = Arc::clone(&self.marker);
        tokio::task::spawn_blocking(move || {
            pass.into_iter()
                .find_map(|candidate| decode_candidate(&decoders, &marker, &candidate))
        })
        .await
        .ok()
        .flatten()
    }

    /// Race `candidates` across the worker permits; first marker match
    /// wins and the rest are cancelled.
    pub async fn decode_first(&self, candidates: Vec<Candidate>) -> Option<DecodeHit> {
        if candidates.is_empty() {
            return None;
        }
        let cancel = CancellationToken::new();
        let mut race = JoinSet::new();

        for candidate in candidates {
            let permits = Arc::clone(&self.permits);
            let decoders = Arc::clone(&self.decoders);
            let marker = Arc::clone(&self.marker);
            let cancel = cancel.clone();
            race.spawn(async move {
                let permit = tokio::select! {
                    _ = cancel.cancelled() => return None,
                    permit = permits.acquire_owned() => permit.ok()?,
                };
                if cancel.is_cancelled() {
                    return None;
                }
                // The permit travels into the blocking closure so a decode
                // keeps its slot until it really finishes.
                tokio::task::spawn_blocking(move || {
                    let _permit = permit;
                    decode_candidate(&decoders, &marker, &candidate)
                })
                .await
                .ok()
                .flatten()
            });
        }

        while let Some(joined) = race.join_next().await {
            match joined {
                Ok(Some(hit)) => {
                    cancel.cancel();
                    race.abort_all();
                    debug!("decoded via {} ({})", hit.kind, hit.decoder);
                    return Some(hit);
                }
                Ok(None) => {}
                Err(e) => debug!("decode worker failed: {e}"),
            }
        }
        None
    }

    /// Try `candidates` one at a time, stopping at the first hit. Lazy
    /// iterators are not advanced past it.
    pub fn decode_sequential<I>(&self, candidates: I) -> Option<DecodeHit>
    where
        I: IntoIterator<Item = Candidate>,
    {
        candidates
            .into_iter()
            .find_map(|candidate| decode_candidate(&self.decoders, &self.marker, &candidate))
    }
}

/// Run every decoder on one candidate and keep the first payload that
/// carries the marker. Bounds are mapped back to frame pixels.
fn decode_candidate(
    decoders: &[Arc<dyn QrDecoder>],
    marker: &str,
    candidate: &Candidate,
) -> Option<DecodeHit> {
    for decoder in decoders {
        let found = decoder
            .decode(&candidate.image)
            .into_iter()
            .find(|code| code.payload.contains(marker));
        if let Some(code) = found {
            let scale = if candidate.scale > 0.0 {
                1.0 / candidate.scale as f64
            } else {
                1.0
            };
            return Some(DecodeHit {
                payload: code.payload,
                kind: candidate.kind,
                decoder: decoder.name(),
                bounds: code.bounds.map(|b| b.scaled(scale)),
            });
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::backend::DecodedCode;
    use image::GrayImage;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Decodes only images of one width, always returning `payload`.
    struct WidthDecoder {
        width: u32,
        payload: &'static str,
        calls: AtomicUsize,
    }

    impl WidthDecoder {
        fn new(width: u32, payload: &'static str) -> Arc<Self> {
            Arc::new(Self {
                width,
                payload,
                calls: AtomicUsize::new(0),
            })
        }
    }

    impl QrDecoder for WidthDecoder {
        fn name(&self) -> &'static str {
            "width"
        }

        fn decode(&self, image: &GrayImage) -> Vec<DecodedCode> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if image.width() != self.width {
                return Vec::new();
            }
            vec![DecodedCode {
                payload: self.payload.to_string(),
                bounds: Some(Region::new(10, 10, 20, 20)),
            }]
        }
    }

    fn candidate(kind: CandidateKind, width: u32, scale: f32) -> Candidate {
        Candidate::new(kind, GrayImage::new(width, 4), scale)
    }

    fn engine(decoders: Vec<Arc<dyn QrDecoder>>) -> DecodeEngine {
        DecodeEngine::with_decoders(&DecodeConfig::default(), decoders, None)
    }

    #[tokio::test]
    async fn first_valid_hit_wins_and_bounds_map_to_frame() {
        let decoder = WidthDecoder::new(40, "x/G152#KURO/abcdefghijklmnopqrstuvwx");
        let engine = engine(vec![decoder]);
        let hit = engine
            .decode_first(vec![
                candidate(CandidateKind::Original, 100, 1.0),
                candidate(CandidateKind::Analysis, 64, 0.64),
                candidate(CandidateKind::Downscaled, 40, 0.4),
            ])
            .await
            .expect("hit");
        assert_eq!(hit.kind, CandidateKind::Downscaled);
        assert_eq!(hit.decoder, "width");
        assert_eq!(hit.bounds, Some(Region::new(25, 25, 50, 50)));
    }

    #[tokio::test]
    async fn payloads_without_marker_are_dropped() {
        let decoder = WidthDecoder::new(40, "https://example.invalid/other-app");
        let engine = engine(vec![decoder]);
        let hit = engine
            .decode_first(vec![candidate(CandidateKind::Original, 40, 1.0)])
            .await;
        assert_eq!(hit, None);
        assert_eq!(engine.decode_sequential(vec![candidate(CandidateKind::Binarized, 40, 1.0)]), None);
    }

    #[tokio::test]
    async fn falls_back_to_second_decoder() {
        let primary = WidthDecoder::new(999, "G152#KURO-primary");
        let fallback = WidthDecoder::new(40, "G152#KURO-fallback");
        let engine = engine(vec![primary.clone(), fallback]);
        let hit = engine
            .decode_first(vec![candidate(CandidateKind::Analysis, 40, 1.0)])
            .await
            .expect("hit");
        assert_eq!(hit.payload, "G152#KURO-fallback");
        assert_eq!(primary.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn sequential_stops_at_first_hit() {
        let decoder = WidthDecoder::new(40, "G152#KURO-seq");
        let engine = engine(vec![decoder.clone()]);
        let hit = engine.decode_sequential(vec![
            candidate(CandidateKind::Binarized, 40, 1.0),
            candidate(CandidateKind::SuperResolved, 40, 2.0),
        ]);
        assert_eq!(hit.map(|h| h.kind), Some(CandidateKind::Binarized));
        assert_eq!(decoder.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn empty_race_returns_none() {
        let engine = engine(vec![Arc::new(RqrrDecoder)]);
        assert_eq!(engine.decode_first(Vec::new()).await, None);
    }

    #[tokio::test]
    async fn scan_uses_enhancement_after_fast_miss() {
        // Only a binary image (pixels all 0 or 255) is "decodable".
        struct BinaryOnly;
        impl QrDecoder for BinaryOnly {
            fn name(&self) -> &'static str {
                "binary-only"
            }
            fn decode(&self, image: &GrayImage) -> Vec<DecodedCode> {
                if image.pixels().all(|p| p.0[0] == 0 || p.0[0] == 255)
                    && image.pixels().any(|p| p.0[0] == 255)
                {
                    vec![DecodedCode {
                        payload: "G152#KURO-binary".into(),
                        bounds: None,
                    }]
                } else {
                    Vec::new()
                }
            }
        }

        let engine = engine(vec![Arc::new(BinaryOnly)]);
        let frame = Frame::from_rgb(16, 16, Region::new(0, 0, 16, 16), vec![100; 16 * 16 * 3]);
        let hit = engine.scan(frame).await.expect("hit");
        assert_eq!(hit.kind, CandidateKind::Binarized);
        assert!(hit.kind.is_enhanced());
    }
}
