//! # Login service client
//!
//! | Module      | Purpose                                            |
//! |-------------|----------------------------------------------------|
//! | `types`     | Response envelope, status codes, outcomes, attempts |
//! | `transport` | `AuthTransport` seam and the `reqwest` transport   |
//! | `client`    | Validate/confirm protocol with timeout ladders     |

pub mod client;
pub mod transport;
pub mod types;

// ── Re-exports ───────────────────────────────────────────────────

pub use client::{AuthClient, AuthConfig};
pub use transport::{AuthTransport, DEFAULT_BASE_URL, HttpTransport};
pub use types::{
    ApiResponse, AuthAttempt, CODE_NEEDS_VERIFICATION, CODE_OK, CODE_QR_EXPIRED,
    CODE_SESSION_EXPIRED, CODE_TRANSPORT, ConfirmOutcome, Endpoint, LoginOutcome, Session, Trial,
    TrialOutcome, ValidateOutcome,
};
