//! Channel protocol between the orchestrator and its front end.

use tokio::sync::{OwnedMutexGuard, mpsc};

use crate::auth::{AuthAttempt, LoginOutcome};
use crate::capture::{CaptureMethod, Region};
use crate::decode::DecodeHit;
use crate::error::QrGateError;
use crate::scan::phase::ScanPhase;

// ── Outbound ─────────────────────────────────────────────────────

/// Emitted by the orchestrator for the UI to render.
#[derive(Debug, Clone, PartialEq)]
pub enum ScanEvent {
    /// A new ticket was decoded and is about to be submitted.
    QrDetected(String),
    Log(String),
    StatusChanged(ScanPhase),
    Error(String),
    /// The service wants an SMS code. `sms_sent` tells whether the
    /// automatic SMS request went through.
    VerificationRequired { sms_sent: bool },
    LoginSucceeded,
}

// ── Inbound ──────────────────────────────────────────────────────

/// Requests from the UI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanCommand {
    Start,
    Stop,
    /// The user moved the capture rectangle.
    SetRegion(Region),
    SubmitVerificationCode(String),
    /// Give up on the pending verification and keep scanning.
    CancelVerification,
}

/// Everything the orchestrator mailbox accepts.
///
/// Internal messages carry the session id they were started under so
/// that work from a stopped session is dropped.
pub(crate) enum Message {
    Command(ScanCommand),
    Tick {
        session: u64,
    },
    CycleDone {
        session: u64,
        outcome: CycleOutcome,
        /// Held until the ticket found by this cycle is resolved.
        guard: OwnedMutexGuard<()>,
    },
    AuthDone {
        session: u64,
        attempt: AuthAttempt,
        outcome: LoginOutcome,
    },
    SmsSent {
        session: u64,
        sent: bool,
    },
    CooldownElapsed {
        session: u64,
    },
    Shutdown,
}

/// Result of one capture → decode cycle.
pub(crate) enum CycleOutcome {
    /// Every capture backend failed.
    NoFrame,
    Miss {
        predicted: bool,
    },
    Hit {
        hit: DecodeHit,
        /// Screen rectangle of the code (or of the whole capture when the
        /// decoder cannot locate it).
        located: Region,
        predicted: bool,
        method: CaptureMethod,
        capture: std::time::Duration,
        decode: std::time::Duration,
    },
}

// ── ScanHandle ───────────────────────────────────────────────────

/// Cloneable sender for [`ScanCommand`]s.
///
/// The orchestrator keeps running while at least one handle is alive.
#[derive(Clone)]
pub struct ScanHandle {
    tx: mpsc::Sender<Message>,
}

impl ScanHandle {
    pub(crate) fn new(tx: mpsc::Sender<Message>) -> Self {
        Self { tx }
    }

    pub async fn send(&self, command: ScanCommand) -> Result<(), QrGateError> {
        self.tx.send(Message::Command(command)).await?;
        Ok(())
    }

    pub async fn start(&self) -> Result<(), QrGateError> {
        self.send(ScanCommand::Start).await
    }

    pub async fn stop(&self) -> Result<(), QrGateError> {
        self.send(ScanCommand::Stop).await
    }

    pub async fn set_region(&self, region: Region) -> Result<(), QrGateError> {
        self.send(ScanCommand::SetRegion(region)).await
    }

    pub async fn submit_code(&self, code: impl Into<String>) -> Result<(), QrGateError> {
        self.send(ScanCommand::SubmitVerificationCode(code.into())).await
    }

    pub async fn cancel_verification(&self) -> Result<(), QrGateError> {
        self.send(ScanCommand::CancelVerification).await
    }

    /// Stop the session (if any) and end the mailbox task.
    pub async fn shutdown(&self) -> Result<(), QrGateError> {
        self.tx.send(Message::Shutdown).await?;
        Ok(())
    }

    /// `true` once the orchestrator task has exited.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}
