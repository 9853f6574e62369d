//! # qrgate-core
//!
//! Screen-to-login pipeline for QR login tickets.
//!
//! This crate contains:
//! - **Capture**: `FrameSource` fallback chain (DXGI, BitBlt, xcap) over a `BufferPool`
//! - **ROI**: `RoiPredictor` narrowing captures to where codes keep appearing
//! - **Decode**: `CandidateGenerator` image variants raced by `DecodeEngine`
//! - **Ticket**: `TicketTracker` so a ticket is submitted once
//! - **Auth**: `AuthClient` two-step login with escalating timeouts
//! - **Scan**: `ScanOrchestrator` mailbox actor and its `ScanPhase` state machine
//! - **Perf**: `PerfMonitor` per-scan stage timing
//! - **Error**: `QrGateError` / `TransportError`, `thiserror`-based

pub mod auth;
pub mod capture;
pub mod decode;
pub mod error;
pub mod perf;
pub mod roi;
pub mod scan;
pub mod ticket;

// ── Re-exports for ergonomic usage ───────────────────────────────

pub use auth::{
    ApiResponse, AuthAttempt, AuthClient, AuthConfig, AuthTransport, HttpTransport, LoginOutcome,
    Session,
};
pub use capture::{BufferPool, CaptureMethod, Frame, FrameCapture, FrameSource, Region};
pub use decode::{CandidateKind, DecodeConfig, DecodeEngine, DecodeHit, QrDecoder, QrModel};
pub use error::{QrGateError, TransportError};
pub use perf::{PerfMonitor, PerfSummary, StageTimings};
pub use roi::RoiPredictor;
pub use scan::{ScanCommand, ScanConfig, ScanEvent, ScanHandle, ScanOrchestrator, ScanPhase, ScanServices};
pub use ticket::TicketTracker;
