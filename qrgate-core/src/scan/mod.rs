//! # Scan orchestration
//!
//! ```text
//!  ticker ──Tick──►┐
//!  cycle  ──Done──►│  mailbox ──► ScanOrchestrator ──► ScanEvent ──► UI
//!  login  ──Done──►│
//!  UI ScanCommand─►┘
//! ```
//!
//! | Module         | Purpose                                        |
//! |----------------|------------------------------------------------|
//! | `phase`        | `ScanPhase` state machine                      |
//! | `events`       | `ScanEvent`, `ScanCommand`, `ScanHandle`       |
//! | `orchestrator` | Mailbox actor tying capture, decode and login  |

pub mod events;
pub mod orchestrator;
pub mod phase;

// ── Re-exports ───────────────────────────────────────────────────

pub use events::{ScanCommand, ScanEvent, ScanHandle};
pub use orchestrator::{ScanConfig, ScanOrchestrator, ScanServices, ScanSession};
pub use phase::ScanPhase;
