//! Domain-specific error types for the scan-to-login pipeline.
//!
//! Library operations that can fail return `Result<T, QrGateError>`.
//! The network seam has its own [`TransportError`] because the auth
//! client must tell timeouts apart from every other failure.

use std::time::Duration;
use thiserror::Error;

/// The canonical error type for qrgate.
#[derive(Debug, Error)]
pub enum QrGateError {
    // ── Capture Errors ───────────────────────────────────────────
    /// A capture backend reported a failure.
    #[error("capture failed ({backend}): {reason}")]
    Capture {
        backend: &'static str,
        reason: String,
    },

    /// The backend cannot run on this machine or platform.
    #[error("capture backend unavailable: {0}")]
    BackendUnavailable(&'static str),

    /// A backend returned a frame with no pixels.
    #[error("empty frame from {0}")]
    EmptyFrame(&'static str),

    /// The requested region lies outside the captured surface.
    #[error("region {0} is outside the display")]
    RegionOutOfBounds(String),

    // ── Image Errors ─────────────────────────────────────────────
    /// Image buffer construction or processing failed.
    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    // ── IO / Serialization ───────────────────────────────────────
    /// Filesystem or OS-level I/O failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// A JSON body could not be parsed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    // ── Service Errors ───────────────────────────────────────────
    /// The login service answered with a non-success status.
    #[error("service rejected request ({code}): {msg}")]
    Rejected { code: i64, msg: String },

    // ── Orchestration Errors ─────────────────────────────────────
    /// An mpsc channel was closed unexpectedly.
    #[error("channel closed")]
    ChannelClosed,

    /// A scan phase transition was requested from the wrong phase.
    #[error("invalid transition: {0}")]
    InvalidTransition(&'static str),

    /// Catch-all for errors that do not fit another variant.
    #[error("{0}")]
    Other(String),
}

// ── TransportError ───────────────────────────────────────────────

/// Failure of a single HTTP exchange with the login service.
///
/// Only [`TransportError::Timeout`] advances a timeout ladder; every
/// other variant aborts it.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The request did not complete within its budget.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// Connection, TLS or protocol failure.
    #[error("request failed: {0}")]
    Http(String),

    /// The response body was not the expected JSON object.
    #[error("malformed response: {0}")]
    Decode(String),
}

impl TransportError {
    /// Returns `true` for the variant that should be retried with a
    /// longer budget.
    pub fn is_timeout(&self) -> bool {
        matches!(self, TransportError::Timeout(_))
    }
}

// ── Convenient From implementations ──────────────────────────────

impl From<String> for QrGateError {
    fn from(s: String) -> Self {
        QrGateError::Other(s)
    }
}

impl From<&str> for QrGateError {
    fn from(s: &str) -> Self {
        QrGateError::Other(s.to_string())
    }
}

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for QrGateError {
    fn from(_: tokio::sync::mpsc::error::SendError<T>) -> Self {
        QrGateError::ChannelClosed
    }
}
