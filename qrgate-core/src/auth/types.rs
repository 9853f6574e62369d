//! Wire and outcome types for the login service.
//!
//! Every endpoint answers with `{ code, msg, data }`. The status codes
//! below are a contract with the service and must not change.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ── Status codes ─────────────────────────────────────────────────

/// Request accepted.
pub const CODE_OK: i64 = 200;
/// The account token is no longer valid; the user must log in again.
pub const CODE_SESSION_EXPIRED: i64 = 220;
/// The QR ticket expired before it was validated.
pub const CODE_QR_EXPIRED: i64 = 2209;
/// First scan from this device; an SMS verification code is required.
pub const CODE_NEEDS_VERIFICATION: i64 = 2240;
/// Local code for transport failures that never reached the service.
pub const CODE_TRANSPORT: i64 = -1;

// ── ApiResponse ──────────────────────────────────────────────────

/// Envelope returned by every endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiResponse {
    #[serde(default = "transport_code")]
    pub code: i64,
    #[serde(default)]
    pub msg: String,
    #[serde(default)]
    pub data: Option<Value>,
}

fn transport_code() -> i64 {
    CODE_TRANSPORT
}

impl ApiResponse {
    pub fn new(code: i64, msg: impl Into<String>) -> Self {
        Self {
            code,
            msg: msg.into(),
            data: None,
        }
    }

    /// Normalised transport failure.
    pub fn transport_failure(msg: impl Into<String>) -> Self {
        Self::new(CODE_TRANSPORT, msg)
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn is_ok(&self) -> bool {
        self.code == CODE_OK
    }

    /// String field from `data`, if present.
    pub fn data_str(&self, key: &str) -> Option<&str> {
        self.data.as_ref()?.get(key)?.as_str()
    }

    /// `msg`, or `fallback` when the service sent none.
    pub fn message_or(&self, fallback: &str) -> String {
        if self.msg.is_empty() {
            fallback.to_string()
        } else {
            self.msg.clone()
        }
    }
}

// ── Outcomes ─────────────────────────────────────────────────────

/// Result of the validate step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidateOutcome {
    Valid,
    SessionExpired,
    CodeExpired,
    Failed(String),
}

impl ValidateOutcome {
    pub fn from_response(resp: &ApiResponse) -> Self {
        match resp.code {
            CODE_OK => Self::Valid,
            CODE_SESSION_EXPIRED => Self::SessionExpired,
            CODE_QR_EXPIRED => Self::CodeExpired,
            _ => Self::Failed(resp.message_or("validation failed")),
        }
    }
}

/// Result of the confirm step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfirmOutcome {
    Success,
    NeedsVerification,
    /// The ticket went stale between validate and confirm.
    CodeExpired,
    Failed(String),
}

impl ConfirmOutcome {
    pub fn from_response(resp: &ApiResponse) -> Self {
        match resp.code {
            CODE_OK => Self::Success,
            CODE_NEEDS_VERIFICATION => Self::NeedsVerification,
            CODE_QR_EXPIRED => Self::CodeExpired,
            _ => Self::Failed(resp.message_or("scan login failed")),
        }
    }
}

/// Result of a whole login attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginOutcome {
    Success,
    NeedsVerification,
    SessionExpired,
    CodeExpired,
    Failed(String),
}

impl fmt::Display for LoginOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => write!(f, "login confirmed"),
            Self::NeedsVerification => write!(f, "verification code required"),
            Self::SessionExpired => write!(f, "session token expired"),
            Self::CodeExpired => write!(f, "QR code expired"),
            Self::Failed(msg) => write!(f, "login failed: {msg}"),
        }
    }
}

// ── AuthAttempt ──────────────────────────────────────────────────

/// Which call a trial belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    Validate,
    Confirm,
}

impl Endpoint {
    pub const fn path(self) -> &'static str {
        match self {
            Endpoint::Validate => "/user/auth/roleInfos",
            Endpoint::Confirm => "/user/auth/scanLogin",
        }
    }
}

/// How one ladder rung ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrialOutcome {
    /// The service answered with this status code.
    Answered(i64),
    TimedOut,
    Error(String),
}

/// One HTTP exchange made on behalf of an attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Trial {
    pub endpoint: Endpoint,
    pub timeout: Duration,
    pub outcome: TrialOutcome,
    pub elapsed: Duration,
}

/// One login attempt: its input and every exchange it caused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthAttempt {
    pub qr_code: String,
    pub verify_code: Option<String>,
    /// Go straight to confirm (resubmission with a verification code).
    pub skip_validate: bool,
    pub trials: Vec<Trial>,
}

impl AuthAttempt {
    pub fn new(qr_code: impl Into<String>) -> Self {
        Self {
            qr_code: qr_code.into(),
            verify_code: None,
            skip_validate: false,
            trials: Vec::new(),
        }
    }

    /// Resubmission of the same code with a verification code, skipping
    /// validation so the ticket is not burned.
    pub fn with_verification(qr_code: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            qr_code: qr_code.into(),
            verify_code: Some(code.into()),
            skip_validate: true,
            trials: Vec::new(),
        }
    }

    /// Trials made against `endpoint`.
    pub fn trials_for(&self, endpoint: Endpoint) -> usize {
        self.trials.iter().filter(|t| t.endpoint == endpoint).count()
    }

    /// Wall time spent on `endpoint`.
    pub fn time_on(&self, endpoint: Endpoint) -> Duration {
        self.trials
            .iter()
            .filter(|t| t.endpoint == endpoint)
            .map(|t| t.elapsed)
            .sum()
    }
}

// ── Session ──────────────────────────────────────────────────────

/// Account session returned by SDK login.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Session {
    pub token: String,
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub user_name: String,
}

impl Session {
    /// Pull the session out of a successful login response.
    pub fn from_response(resp: &ApiResponse) -> Option<Self> {
        let token = resp.data_str("token")?.to_string();
        if token.is_empty() {
            return None;
        }
        let data = resp.data.as_ref()?;
        let field = |key: &str| match data.get(key) {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Number(n)) => n.to_string(),
            _ => String::new(),
        };
        Some(Self {
            token,
            user_id: field("userId"),
            user_name: field("userName"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn response_parses_with_missing_fields() {
        let resp: ApiResponse = serde_json::from_str(r#"{"code":2209}"#).unwrap();
        assert_eq!(resp.code, CODE_QR_EXPIRED);
        assert!(resp.msg.is_empty());
        assert_eq!(ValidateOutcome::from_response(&resp), ValidateOutcome::CodeExpired);

        let resp: ApiResponse = serde_json::from_str(r#"{"msg":"bad"}"#).unwrap();
        assert_eq!(resp.code, CODE_TRANSPORT);
    }

    #[test]
    fn status_codes_map_to_outcomes() {
        assert_eq!(
            ValidateOutcome::from_response(&ApiResponse::new(220, "")),
            ValidateOutcome::SessionExpired
        );
        assert_eq!(
            ValidateOutcome::from_response(&ApiResponse::new(500, "")),
            ValidateOutcome::Failed("validation failed".into())
        );
        assert_eq!(
            ConfirmOutcome::from_response(&ApiResponse::new(2240, "sms")),
            ConfirmOutcome::NeedsVerification
        );
        assert_eq!(
            ConfirmOutcome::from_response(&ApiResponse::new(2209, "expired")),
            ConfirmOutcome::CodeExpired
        );
        assert_eq!(
            ConfirmOutcome::from_response(&ApiResponse::new(500, "")),
            ConfirmOutcome::Failed("scan login failed".into())
        );
    }

    #[test]
    fn session_from_login_response() {
        let resp = ApiResponse::new(200, "ok")
            .with_data(json!({"token": "tkn", "userId": 12345, "userName": "rover"}));
        let session = Session::from_response(&resp).expect("session");
        assert_eq!(session.token, "tkn");
        assert_eq!(session.user_id, "12345");
        assert_eq!(session.user_name, "rover");

        assert_eq!(Session::from_response(&ApiResponse::new(200, "ok")), None);
    }

    #[test]
    fn attempt_accounting() {
        let mut attempt = AuthAttempt::with_verification("qr", "123456");
        assert!(attempt.skip_validate);
        attempt.trials.push(Trial {
            endpoint: Endpoint::Confirm,
            timeout: Duration::from_millis(800),
            outcome: TrialOutcome::Answered(200),
            elapsed: Duration::from_millis(120),
        });
        assert_eq!(attempt.trials_for(Endpoint::Confirm), 1);
        assert_eq!(attempt.trials_for(Endpoint::Validate), 0);
        assert_eq!(attempt.time_on(Endpoint::Confirm), Duration::from_millis(120));
    }
}
