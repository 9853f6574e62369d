//! Scan lifecycle state machine.
//!
//! `ScanPhase` models one scanning session, with validated transitions
//! that return `Result` instead of panicking.

use std::time::Instant;

use serde::Serialize;

use crate::error::QrGateError;

// ── ScanPhase ────────────────────────────────────────────────────

/// The current phase of the scan orchestrator.
///
/// ```text
///  Idle ──► Scanning ──► Submitting ──► Stopped (success)
///              ▲  ▲          │   │
///              │  │          │   ▼
///              │  └─────── Cooldown
///              │             │
///              │             ▼
///              └──────── AwaitingCode ──► Submitting
/// ```
///
/// `Stopped` is reachable from every phase via [`ScanPhase::stop`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ScanPhase {
    /// No session. Initial state.
    #[default]
    Idle,

    /// Polling the capture region.
    Scanning,

    /// A ticket is being submitted to the login service.
    Submitting,

    /// The service wants an SMS code before it confirms the login.
    AwaitingCode,

    /// Pause after an expired code before scanning resumes.
    Cooldown {
        /// When the cooldown started.
        since: Instant,
    },

    /// Session over. Terminal until the next `start`.
    Stopped,
}

impl std::fmt::Display for ScanPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl Serialize for ScanPhase {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.name())
    }
}

impl ScanPhase {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Idle => "Idle",
            Self::Scanning => "Scanning",
            Self::Submitting => "Submitting",
            Self::AwaitingCode => "AwaitingCode",
            Self::Cooldown { .. } => "Cooldown",
            Self::Stopped => "Stopped",
        }
    }

    pub fn is_scanning(&self) -> bool {
        matches!(self, Self::Scanning)
    }

    /// A session exists and has not been stopped.
    pub fn is_active(&self) -> bool {
        !matches!(self, Self::Idle | Self::Stopped)
    }

    /// How long the current cooldown has been running.
    pub fn cooldown_elapsed(&self) -> Option<std::time::Duration> {
        match self {
            Self::Cooldown { since } => Some(since.elapsed()),
            _ => None,
        }
    }

    // ── Transitions ──────────────────────────────────────────────

    /// Transition to `Scanning` for a new session.
    ///
    /// Valid from: `Idle`, `Stopped`.
    pub fn start(&mut self) -> Result<(), QrGateError> {
        match self {
            Self::Idle | Self::Stopped => {
                *self = Self::Scanning;
                Ok(())
            }
            _ => Err(QrGateError::InvalidTransition(
                "cannot start: a session is already running",
            )),
        }
    }

    /// Transition to `Submitting` with a freshly decoded ticket.
    ///
    /// Valid from: `Scanning`.
    pub fn begin_submit(&mut self) -> Result<(), QrGateError> {
        match self {
            Self::Scanning => {
                *self = Self::Submitting;
                Ok(())
            }
            _ => Err(QrGateError::InvalidTransition(
                "cannot submit: not in Scanning state",
            )),
        }
    }

    /// Transition to `AwaitingCode`.
    ///
    /// Valid from: `Submitting`.
    pub fn await_code(&mut self) -> Result<(), QrGateError> {
        match self {
            Self::Submitting => {
                *self = Self::AwaitingCode;
                Ok(())
            }
            _ => Err(QrGateError::InvalidTransition(
                "cannot await code: not in Submitting state",
            )),
        }
    }

    /// Transition back to `Submitting` with a verification code.
    ///
    /// Valid from: `AwaitingCode`.
    pub fn resubmit(&mut self) -> Result<(), QrGateError> {
        match self {
            Self::AwaitingCode => {
                *self = Self::Submitting;
                Ok(())
            }
            _ => Err(QrGateError::InvalidTransition(
                "cannot resubmit: no verification code was requested",
            )),
        }
    }

    /// Transition to `Cooldown`.
    ///
    /// Valid from: `Submitting`.
    pub fn begin_cooldown(&mut self) -> Result<(), QrGateError> {
        match self {
            Self::Submitting => {
                *self = Self::Cooldown {
                    since: Instant::now(),
                };
                Ok(())
            }
            _ => Err(QrGateError::InvalidTransition(
                "cannot cool down: not in Submitting state",
            )),
        }
    }

    /// Transition back to `Scanning`.
    ///
    /// Valid from: `Submitting` (recoverable failure), `AwaitingCode`
    /// (verification cancelled), `Cooldown` (timer elapsed).
    pub fn resume_scanning(&mut self) -> Result<(), QrGateError> {
        match self {
            Self::Submitting | Self::AwaitingCode | Self::Cooldown { .. } => {
                *self = Self::Scanning;
                Ok(())
            }
            _ => Err(QrGateError::InvalidTransition(
                "cannot resume scanning from this state",
            )),
        }
    }

    /// Transition to `Stopped` from any phase.
    pub fn stop(&mut self) {
        *self = Self::Stopped;
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_lifecycle() {
        let mut phase = ScanPhase::default();
        assert_eq!(phase, ScanPhase::Idle);

        phase.start().unwrap();
        assert!(phase.is_scanning());

        phase.begin_submit().unwrap();
        assert_eq!(phase, ScanPhase::Submitting);

        phase.stop();
        assert_eq!(phase, ScanPhase::Stopped);
        assert!(!phase.is_active());
    }

    #[test]
    fn cooldown_loop() {
        let mut phase = ScanPhase::Scanning;
        phase.begin_submit().unwrap();
        phase.begin_cooldown().unwrap();
        assert!(phase.cooldown_elapsed().is_some());
        assert!(phase.is_active());
        phase.resume_scanning().unwrap();
        assert!(phase.is_scanning());
    }

    #[test]
    fn verification_branch() {
        let mut phase = ScanPhase::Submitting;
        phase.await_code().unwrap();
        assert_eq!(phase, ScanPhase::AwaitingCode);
        phase.resubmit().unwrap();
        assert_eq!(phase, ScanPhase::Submitting);

        phase.await_code().unwrap();
        phase.resume_scanning().unwrap();
        assert!(phase.is_scanning());
    }

    #[test]
    fn invalid_transitions() {
        assert!(ScanPhase::Idle.begin_submit().is_err());
        assert!(ScanPhase::Scanning.start().is_err());
        assert!(ScanPhase::Scanning.begin_cooldown().is_err());
        assert!(ScanPhase::Scanning.resubmit().is_err());
        assert!(ScanPhase::Idle.resume_scanning().is_err());
        assert!(ScanPhase::Stopped.resume_scanning().is_err());
    }

    #[test]
    fn restart_after_stop() {
        let mut phase = ScanPhase::Cooldown {
            since: Instant::now(),
        };
        phase.stop();
        phase.start().unwrap();
        assert!(phase.is_scanning());
    }

    #[test]
    fn display_format() {
        assert_eq!(ScanPhase::Idle.to_string(), "Idle");
        assert_eq!(ScanPhase::AwaitingCode.to_string(), "AwaitingCode");
        assert_eq!(
            ScanPhase::Cooldown {
                since: Instant::now()
            }
            .to_string(),
            "Cooldown"
        );
        assert_eq!(
            serde_json::to_string(&ScanPhase::Submitting).unwrap(),
            "\"Submitting\""
        );
    }
}
