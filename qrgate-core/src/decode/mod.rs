//! # QR decoding
//!
//! | Module       | Purpose                                           |
//! |--------------|---------------------------------------------------|
//! | `candidates` | Original / analysis / downscaled variants, lazy enhancement pass |
//! | `enhance`    | Integral-image adaptive binarization              |
//! | `model`      | `QrModel` seam for learned detectors              |
//! | `backend`    | `QrDecoder` trait, `rqrr` and model adapters      |
//! | `engine`     | Bounded first-hit-wins decode race                |

pub mod backend;
pub mod candidates;
pub mod engine;
pub mod enhance;
pub mod model;

// ── Re-exports ───────────────────────────────────────────────────

pub use backend::{DecodedCode, ModelDecoder, QrDecoder, RqrrDecoder};
pub use candidates::{Candidate, CandidateGenerator, CandidateKind, EnhancedCandidates, FastCandidates};
pub use engine::{DEFAULT_MARKER, DEFAULT_WORKERS, DecodeConfig, DecodeEngine, DecodeHit};
pub use model::{ModelDetection, QrModel};
