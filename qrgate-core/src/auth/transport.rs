//! HTTP seam for the login service.
//!
//! [`AuthClient`](crate::auth::AuthClient) only talks to an
//! [`AuthTransport`]; the production implementation is [`HttpTransport`]
//! over a pooled `reqwest` client, tests plug in scripted fakes.

use std::sync::RwLock;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::header::{ACCEPT, CONTENT_TYPE, HeaderMap, HeaderValue, USER_AGENT};
use tracing::trace;

use crate::auth::types::ApiResponse;
use crate::error::TransportError;

/// Production service root.
pub const DEFAULT_BASE_URL: &str = "https://api.kurobbs.com";

const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded; charset=utf-8";

/// One request/response exchange with a per-call time budget.
#[async_trait]
pub trait AuthTransport: Send + Sync {
    /// POST a form-encoded body to `path` and parse the JSON envelope.
    async fn post_form(
        &self,
        path: &str,
        form: &[(&str, &str)],
        timeout: Duration,
    ) -> Result<ApiResponse, TransportError>;

    /// HEAD `path`, returning the round-trip time. Used to open the
    /// connection ahead of the first real request.
    async fn head(&self, path: &str, timeout: Duration) -> Result<Duration, TransportError>;

    /// Install the account token sent with every request.
    fn set_token(&self, token: &str);

    fn token(&self) -> String;
}

// ── HttpTransport ────────────────────────────────────────────────

/// `reqwest`-backed transport. Connections are pooled and kept alive so
/// the warm-up request pays the TCP and TLS handshakes once.
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
    token: RwLock<String>,
}

impl HttpTransport {
    pub fn new(base_url: impl Into<String>) -> Result<Self, TransportError> {
        // Header names are case-insensitive and must be given in lowercase.
        let mut headers = HeaderMap::new();
        headers.insert("devcode", HeaderValue::from_static(""));
        headers.insert("source", HeaderValue::from_static("android"));
        headers.insert("version", HeaderValue::from_static("2.5.0"));
        headers.insert("versioncode", HeaderValue::from_static("2500"));
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(USER_AGENT, HeaderValue::from_static("okhttp/4.9.0"));

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .tcp_nodelay(true)
            .tcp_keepalive(Duration::from_secs(30))
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .map_err(|e| TransportError::Http(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: RwLock::new(String::new()),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn classify(e: reqwest::Error, timeout: Duration) -> TransportError {
        if e.is_timeout() {
            TransportError::Timeout(timeout)
        } else if e.is_decode() {
            TransportError::Decode(e.to_string())
        } else {
            TransportError::Http(e.to_string())
        }
    }
}

#[async_trait]
impl AuthTransport for HttpTransport {
    async fn post_form(
        &self,
        path: &str,
        form: &[(&str, &str)],
        timeout: Duration,
    ) -> Result<ApiResponse, TransportError> {
        let started = Instant::now();
        let response = self
            .client
            .post(self.url(path))
            .header(CONTENT_TYPE, FORM_CONTENT_TYPE)
            .header("token", self.token())
            .form(form)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| Self::classify(e, timeout))?;

        let status = response.status();
        let body = response.json::<ApiResponse>().await.map_err(|e| {
            if e.is_timeout() {
                TransportError::Timeout(timeout)
            } else {
                TransportError::Decode(format!("HTTP {status}: {e}"))
            }
        })?;
        trace!("POST {path} -> {} in {:?}", body.code, started.elapsed());
        Ok(body)
    }

    async fn head(&self, path: &str, timeout: Duration) -> Result<Duration, TransportError> {
        let started = Instant::now();
        self.client
            .head(self.url(path))
            .header("token", self.token())
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| Self::classify(e, timeout))?;
        Ok(started.elapsed())
    }

    fn set_token(&self, token: &str) {
        let mut slot = self.token.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        *slot = token.to_string();
    }

    fn token(&self) -> String {
        self.token
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}
