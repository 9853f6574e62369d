//! Two-step scan login with escalating timeouts.
//!
//! 1. **Validate** the ticket (`roleInfos`).
//! 2. **Confirm** the login (`scanLogin`), optionally with an SMS code.
//!
//! Each call walks a timeout ladder: a timeout moves to the next, longer
//! budget; any other failure ends the call at once. Nothing escapes as an
//! error; transport failures become `ApiResponse { code: -1, .. }`.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::auth::transport::AuthTransport;
use crate::auth::types::{
    ApiResponse, AuthAttempt, ConfirmOutcome, Endpoint, LoginOutcome, Session, Trial,
    TrialOutcome, ValidateOutcome,
};
use crate::error::QrGateError;

const SDK_LOGIN_PATH: &str = "/user/sdkLogin";
const SMS_PATH: &str = "/user/sms/scanSms";
const WARM_UP_PATH: &str = "/user/role/roleInfos";

// ── AuthConfig ───────────────────────────────────────────────────

/// Timeout budgets for the login service.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// Validate ladder used when `smart_retry` is on.
    pub validate_ladder: Vec<Duration>,
    /// Confirm ladder used when `smart_retry` is on.
    pub confirm_ladder: Vec<Duration>,
    /// Walk the ladders; when off each call gets one fixed budget.
    pub smart_retry: bool,
    /// Ask the service to remember this device.
    pub auto_login: bool,
    /// Budget for SDK login and SMS requests.
    pub account_timeout: Duration,
    /// Budget for the connection warm-up HEAD.
    pub warm_up_timeout: Duration,
}

impl AuthConfig {
    /// Single-step validate budget when smart retry is off.
    pub const PLAIN_VALIDATE: Duration = Duration::from_millis(1000);
    /// Single-step confirm budget when smart retry is off.
    pub const PLAIN_CONFIRM: Duration = Duration::from_millis(1500);

    pub fn validate_timeouts(&self) -> Vec<Duration> {
        if self.smart_retry {
            self.validate_ladder.clone()
        } else {
            vec![Self::PLAIN_VALIDATE]
        }
    }

    pub fn confirm_timeouts(&self) -> Vec<Duration> {
        if self.smart_retry {
            self.confirm_ladder.clone()
        } else {
            vec![Self::PLAIN_CONFIRM]
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            validate_ladder: [600, 1200, 2000].map(Duration::from_millis).to_vec(),
            confirm_ladder: [800, 1500, 2500].map(Duration::from_millis).to_vec(),
            smart_retry: true,
            auto_login: false,
            account_timeout: Duration::from_secs(5),
            warm_up_timeout: Duration::from_millis(300),
        }
    }
}

// ── AuthClient ───────────────────────────────────────────────────

/// Login protocol driver over an [`AuthTransport`].
#[derive(Clone)]
pub struct AuthClient {
    transport: Arc<dyn AuthTransport>,
    config: AuthConfig,
}

impl AuthClient {
    pub fn new(transport: Arc<dyn AuthTransport>, config: AuthConfig) -> Self {
        Self { transport, config }
    }

    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    pub fn set_token(&self, token: &str) {
        self.transport.set_token(token);
    }

    pub fn has_token(&self) -> bool {
        !self.transport.token().is_empty()
    }

    // ── Protocol ─────────────────────────────────────────────────

    /// Run validate (unless skipped) then confirm.
    pub async fn login(&self, attempt: &mut AuthAttempt) -> LoginOutcome {
        if !attempt.skip_validate {
            match self.validate(attempt).await {
                ValidateOutcome::Valid => {}
                ValidateOutcome::SessionExpired => return LoginOutcome::SessionExpired,
                ValidateOutcome::CodeExpired => return LoginOutcome::CodeExpired,
                ValidateOutcome::Failed(msg) => return LoginOutcome::Failed(msg),
            }
        }
        match self.confirm(attempt).await {
            ConfirmOutcome::Success => LoginOutcome::Success,
            ConfirmOutcome::NeedsVerification => LoginOutcome::NeedsVerification,
            ConfirmOutcome::CodeExpired => LoginOutcome::CodeExpired,
            ConfirmOutcome::Failed(msg) => LoginOutcome::Failed(msg),
        }
    }

    /// Step 1: check the ticket against the account.
    pub async fn validate(&self, attempt: &mut AuthAttempt) -> ValidateOutcome {
        let qr = attempt.qr_code.clone();
        let form = [("qrCode", qr.as_str())];
        let ladder = self.config.validate_timeouts();
        let resp = self.call(Endpoint::Validate, &form, &ladder, attempt).await;
        ValidateOutcome::from_response(&resp)
    }

    /// Step 2: confirm the login. A rejected verification code gets one
    /// retry with an empty code before the failure is reported.
    pub async fn confirm(&self, attempt: &mut AuthAttempt) -> ConfirmOutcome {
        let code = attempt.verify_code.clone().unwrap_or_default();
        let resp = self.confirm_once(&code, attempt).await;
        match ConfirmOutcome::from_response(&resp) {
            ConfirmOutcome::Failed(msg) if !code.is_empty() => {
                info!("confirm with verification code failed ({msg}); retrying without it");
                let retry = self.confirm_once("", attempt).await;
                match ConfirmOutcome::from_response(&retry) {
                    ConfirmOutcome::Success => ConfirmOutcome::Success,
                    ConfirmOutcome::CodeExpired => ConfirmOutcome::CodeExpired,
                    _ => ConfirmOutcome::Failed(retry.message_or(&msg)),
                }
            }
            outcome => outcome,
        }
    }

    async fn confirm_once(&self, verify_code: &str, attempt: &mut AuthAttempt) -> ApiResponse {
        let qr = attempt.qr_code.clone();
        let auto_login = if self.config.auto_login { "true" } else { "false" };
        let form = [
            ("autoLogin", auto_login),
            ("qrCode", qr.as_str()),
            ("id", ""),
            ("verifyCode", verify_code),
        ];
        let ladder = self.config.confirm_timeouts();
        self.call(Endpoint::Confirm, &form, &ladder, attempt).await
    }

    /// Walk `ladder` for one logical call.
    async fn call(
        &self,
        endpoint: Endpoint,
        form: &[(&str, &str)],
        ladder: &[Duration],
        attempt: &mut AuthAttempt,
    ) -> ApiResponse {
        let mut last_error = None;
        for (rung, &timeout) in ladder.iter().enumerate() {
            let started = Instant::now();
            let result = self.transport.post_form(endpoint.path(), form, timeout).await;
            let elapsed = started.elapsed();
            match result {
                Ok(resp) => {
                    attempt.trials.push(Trial {
                        endpoint,
                        timeout,
                        outcome: TrialOutcome::Answered(resp.code),
                        elapsed,
                    });
                    return resp;
                }
                Err(e) if e.is_timeout() => {
                    debug!("{endpoint:?} rung {} timed out after {timeout:?}", rung + 1);
                    attempt.trials.push(Trial {
                        endpoint,
                        timeout,
                        outcome: TrialOutcome::TimedOut,
                        elapsed,
                    });
                    last_error = Some(e.to_string());
                }
                Err(e) => {
                    warn!("{endpoint:?} failed: {e}");
                    attempt.trials.push(Trial {
                        endpoint,
                        timeout,
                        outcome: TrialOutcome::Error(e.to_string()),
                        elapsed,
                    });
                    return ApiResponse::transport_failure(e.to_string());
                }
            }
        }
        ApiResponse::transport_failure(last_error.unwrap_or_else(|| "no timeout budget configured".into()))
    }

    // ── Account operations ───────────────────────────────────────

    /// Phone-number login. On success the token is installed in the
    /// transport.
    pub async fn sdk_login(&self, mobile: &str, code: &str) -> Result<Session, QrGateError> {
        let resp = self
            .post_once(SDK_LOGIN_PATH, &[("mobile", mobile), ("code", code)])
            .await;
        if !resp.is_ok() {
            return Err(QrGateError::Rejected {
                code: resp.code,
                msg: resp.message_or("login failed"),
            });
        }
        let session = Session::from_response(&resp).ok_or(QrGateError::Rejected {
            code: resp.code,
            msg: "login response carried no token".into(),
        })?;
        self.transport.set_token(&session.token);
        info!("account login succeeded");
        Ok(session)
    }

    /// Ask the service to text a verification code to the account phone.
    pub async fn send_sms(&self) -> ApiResponse {
        self.post_once(SMS_PATH, &[("geeTestData", "")]).await
    }

    /// Open the pooled connection before the first scan. Failures are
    /// ignored.
    pub async fn warm_up(&self) -> bool {
        match self
            .transport
            .head(WARM_UP_PATH, self.config.warm_up_timeout)
            .await
        {
            Ok(rtt) => {
                debug!("connection warmed up in {rtt:?}");
                true
            }
            Err(e) => {
                debug!("warm-up skipped: {e}");
                false
            }
        }
    }

    /// Round trip of a HEAD to the service root.
    pub async fn measure_latency(&self) -> Option<Duration> {
        self.transport.head("/", Duration::from_secs(2)).await.ok()
    }

    async fn post_once(&self, path: &str, form: &[(&str, &str)]) -> ApiResponse {
        match self
            .transport
            .post_form(path, form, self.config.account_timeout)
            .await
        {
            Ok(resp) => resp,
            Err(e) => ApiResponse::transport_failure(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::types::{CODE_NEEDS_VERIFICATION, CODE_OK, CODE_QR_EXPIRED};
    use crate::error::TransportError;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;

    type Reply = Box<dyn Fn(&str, &[(&str, &str)]) -> Result<ApiResponse, TransportError> + Send + Sync>;

    /// Answers every POST through `reply` and records what was sent.
    struct Scripted {
        reply: Reply,
        sent: Mutex<Vec<(String, Vec<(String, String)>, Duration)>>,
        token: Mutex<String>,
    }

    impl Scripted {
        fn new(
            reply: impl Fn(&str, &[(&str, &str)]) -> Result<ApiResponse, TransportError> + Send + Sync + 'static,
        ) -> Arc<Self> {
            Arc::new(Self {
                reply: Box::new(reply),
                sent: Mutex::new(Vec::new()),
                token: Mutex::new(String::new()),
            })
        }

        fn sent(&self) -> Vec<(String, Vec<(String, String)>, Duration)> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl AuthTransport for Scripted {
        async fn post_form(
            &self,
            path: &str,
            form: &[(&str, &str)],
            timeout: Duration,
        ) -> Result<ApiResponse, TransportError> {
            let owned = form.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
            self.sent.lock().unwrap().push((path.to_string(), owned, timeout));
            (self.reply)(path, form)
        }

        async fn head(&self, _path: &str, timeout: Duration) -> Result<Duration, TransportError> {
            Err(TransportError::Timeout(timeout))
        }

        fn set_token(&self, token: &str) {
            *self.token.lock().unwrap() = token.to_string();
        }

        fn token(&self) -> String {
            self.token.lock().unwrap().clone()
        }
    }

    fn field<'a>(form: &'a [(String, String)], key: &str) -> &'a str {
        form.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str()).unwrap_or("")
    }

    #[tokio::test]
    async fn always_timing_out_validate_walks_the_whole_ladder() {
        let transport = Scripted::new(|_, _| Err(TransportError::Timeout(Duration::ZERO)));
        let client = AuthClient::new(transport.clone(), AuthConfig::default());
        let mut attempt = AuthAttempt::new("G152#KURO-ticket");

        let outcome = client.validate(&mut attempt).await;
        assert!(matches!(outcome, ValidateOutcome::Failed(_)));
        let budgets: Vec<_> = transport.sent().into_iter().map(|(_, _, t)| t).collect();
        assert_eq!(budgets, AuthConfig::default().validate_ladder);
        assert_eq!(attempt.trials_for(Endpoint::Validate), 3);
        assert!(attempt.trials.iter().all(|t| t.outcome == TrialOutcome::TimedOut));
    }

    #[tokio::test]
    async fn non_timeout_error_is_tried_once() {
        let transport = Scripted::new(|_, _| Err(TransportError::Http("connection reset".into())));
        let client = AuthClient::new(transport.clone(), AuthConfig::default());
        let mut attempt = AuthAttempt::new("qr");

        let outcome = client.validate(&mut attempt).await;
        assert_eq!(outcome, ValidateOutcome::Failed("request failed: connection reset".into()));
        assert_eq!(transport.sent().len(), 1);
    }

    #[tokio::test]
    async fn timeout_then_answer_stops_the_ladder() {
        let calls = Arc::new(Mutex::new(0));
        let counter = Arc::clone(&calls);
        let transport = Scripted::new(move |_, _| {
            let mut n = counter.lock().unwrap();
            *n += 1;
            if *n == 1 {
                Err(TransportError::Timeout(Duration::ZERO))
            } else {
                Ok(ApiResponse::new(CODE_OK, "ok"))
            }
        });
        let client = AuthClient::new(transport.clone(), AuthConfig::default());
        let mut attempt = AuthAttempt::new("qr");
        assert_eq!(client.validate(&mut attempt).await, ValidateOutcome::Valid);
        assert_eq!(transport.sent().len(), 2);
    }

    #[tokio::test]
    async fn plain_mode_uses_one_fixed_budget() {
        let transport = Scripted::new(|_, _| Err(TransportError::Timeout(Duration::ZERO)));
        let config = AuthConfig {
            smart_retry: false,
            ..AuthConfig::default()
        };
        let client = AuthClient::new(transport.clone(), config);
        let mut attempt = AuthAttempt::new("qr");
        client.login(&mut attempt).await;
        let sent = transport.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].2, AuthConfig::PLAIN_VALIDATE);
    }

    #[tokio::test]
    async fn expired_code_stops_before_confirm() {
        let transport = Scripted::new(|_, _| Ok(ApiResponse::new(CODE_QR_EXPIRED, "expired")));
        let client = AuthClient::new(transport.clone(), AuthConfig::default());
        let mut attempt = AuthAttempt::new("qr");
        assert_eq!(client.login(&mut attempt).await, LoginOutcome::CodeExpired);
        assert_eq!(attempt.trials_for(Endpoint::Confirm), 0);
    }

    #[tokio::test]
    async fn expired_code_at_confirm_is_reported_as_expired() {
        let transport = Scripted::new(|path, _| {
            Ok(if path == Endpoint::Confirm.path() {
                ApiResponse::new(CODE_QR_EXPIRED, "expired")
            } else {
                ApiResponse::new(CODE_OK, "ok")
            })
        });
        let client = AuthClient::new(transport.clone(), AuthConfig::default());
        let mut attempt = AuthAttempt::new("qr");
        assert_eq!(client.login(&mut attempt).await, LoginOutcome::CodeExpired);
        assert_eq!(attempt.trials_for(Endpoint::Validate), 1);
        assert_eq!(attempt.trials_for(Endpoint::Confirm), 1);

        // A stale ticket is not worth a soft retry.
        let mut attempt = AuthAttempt::with_verification("qr", "123456");
        assert_eq!(client.login(&mut attempt).await, LoginOutcome::CodeExpired);
        assert_eq!(attempt.trials_for(Endpoint::Confirm), 1);
    }

    #[tokio::test]
    async fn confirm_sends_the_expected_form() {
        let transport = Scripted::new(|path, _| {
            Ok(if path == Endpoint::Confirm.path() {
                ApiResponse::new(CODE_NEEDS_VERIFICATION, "sms")
            } else {
                ApiResponse::new(CODE_OK, "ok")
            })
        });
        let client = AuthClient::new(transport.clone(), AuthConfig::default());
        let mut attempt = AuthAttempt::new("G152#KURO-abc");
        assert_eq!(client.login(&mut attempt).await, LoginOutcome::NeedsVerification);

        let sent = transport.sent();
        let (path, form, _) = &sent[1];
        assert_eq!(path, "/user/auth/scanLogin");
        assert_eq!(field(form, "autoLogin"), "false");
        assert_eq!(field(form, "qrCode"), "G152#KURO-abc");
        assert_eq!(field(form, "id"), "");
        assert_eq!(field(form, "verifyCode"), "");
    }

    #[tokio::test]
    async fn rejected_code_gets_one_soft_retry_without_it() {
        let transport = Scripted::new(|_, form| {
            let code = form.iter().find(|(k, _)| *k == "verifyCode").map(|(_, v)| *v);
            Ok(match code {
                Some("") => ApiResponse::new(CODE_OK, "ok"),
                _ => ApiResponse::new(500, "bad code"),
            })
        });
        let client = AuthClient::new(transport.clone(), AuthConfig::default());
        let mut attempt = AuthAttempt::with_verification("qr", "123456");

        assert_eq!(client.login(&mut attempt).await, LoginOutcome::Success);
        let codes: Vec<_> = transport
            .sent()
            .iter()
            .map(|(_, form, _)| field(form, "verifyCode").to_string())
            .collect();
        assert_eq!(codes, ["123456", ""]);
        assert_eq!(attempt.trials_for(Endpoint::Validate), 0);
    }

    #[tokio::test]
    async fn sdk_login_installs_token() {
        let transport = Scripted::new(|path, _| {
            assert_eq!(path, SDK_LOGIN_PATH);
            Ok(ApiResponse::new(CODE_OK, "ok").with_data(json!({"token": "t-1", "userId": "7"})))
        });
        let client = AuthClient::new(transport.clone(), AuthConfig::default());
        assert!(!client.has_token());
        let session = client.sdk_login("13800000000", "1234").await.unwrap();
        assert_eq!(session.user_id, "7");
        assert_eq!(transport.token(), "t-1");
        assert_eq!(transport.sent()[0].2, Duration::from_secs(5));
    }

    #[tokio::test]
    async fn sdk_login_failure_is_reported() {
        let transport = Scripted::new(|_, _| Ok(ApiResponse::new(400, "wrong code")));
        let client = AuthClient::new(transport, AuthConfig::default());
        let err = client.sdk_login("1", "2").await.unwrap_err();
        assert!(matches!(err, QrGateError::Rejected { code: 400, .. }));
    }

    #[tokio::test]
    async fn sms_and_warm_up_never_fail_loudly() {
        let transport = Scripted::new(|_, _| Err(TransportError::Http("offline".into())));
        let client = AuthClient::new(transport.clone(), AuthConfig::default());
        let resp = client.send_sms().await;
        assert_eq!(resp.code, -1);
        assert_eq!(field(&transport.sent()[0].1, "geeTestData"), "");
        assert!(!client.warm_up().await);
        assert_eq!(client.measure_latency().await, None);
    }
}
