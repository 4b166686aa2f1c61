//! HTTP session layer for the Upstox candle endpoints.
//!
//! [`HttpSession`] wraps [`reqwest::Client`] with the bearer credential
//! produced by the host's login flow and a cookie store the upstream uses
//! for session-based rate accounting. The whole client is replaced — not
//! mutated — on [`rotate`](Transport::rotate), which discards every cookie.
//!
//! The [`Transport`] trait is the seam between the fetcher state machine
//! and the network; tests drive the fetcher with a scripted transport.

use std::time::Duration;

use reqwest::header::{self, HeaderMap, HeaderValue};

use crate::constants::fetcher::REQUEST_TIMEOUT_SECS;
use crate::error::{BackfillError, Result};

/// A completed HTTP exchange: status code plus raw body text.
///
/// Transport-level failures (DNS, reset, timeout) surface as `Err` from
/// [`Transport::get`] instead; a reply always means the server answered.
#[derive(Debug, Clone)]
pub struct HttpReply {
    pub status: u16,
    pub body: String,
}

/// The network seam used by [`RateLimitFetcher`](crate::fetch::RateLimitFetcher).
///
/// One live implementation ([`HttpSession`]); tests substitute a scripted
/// mock to exercise retry, rate-limit, and rotation behavior.
#[allow(async_fn_in_trait)]
pub trait Transport {
    /// Issue one GET request.
    async fn get(&self, url: &str) -> Result<HttpReply>;

    /// Discard the session context (cookies) and start a fresh one.
    fn rotate(&mut self) -> Result<()>;
}

/// Live HTTP session with cookie jar and cached bearer header.
#[derive(Debug)]
pub struct HttpSession {
    http: reqwest::Client,
    /// Pre-built `Authorization` value, cached to avoid per-request parsing.
    auth_header: HeaderValue,
    timeout: Duration,
}

impl HttpSession {
    /// Create a session authenticated with `access_token`.
    pub fn new(access_token: &str) -> Result<Self> {
        Self::with_timeout(access_token, Duration::from_secs(REQUEST_TIMEOUT_SECS))
    }

    /// Create a session with a custom per-request timeout.
    pub fn with_timeout(access_token: &str, timeout: Duration) -> Result<Self> {
        let auth_header = HeaderValue::from_str(&format!("Bearer {access_token}"))
            .map_err(|_| BackfillError::Setup("access token contains invalid header characters".into()))?;
        Ok(Self {
            http: Self::build_client(timeout)?,
            auth_header,
            timeout,
        })
    }

    fn build_client(timeout: Duration) -> Result<reqwest::Client> {
        let mut headers = HeaderMap::new();
        headers.insert(header::ACCEPT, HeaderValue::from_static("application/json"));
        reqwest::Client::builder()
            .default_headers(headers)
            .cookie_store(true)
            .timeout(timeout)
            .build()
            .map_err(BackfillError::Http)
    }
}

impl Transport for HttpSession {
    async fn get(&self, url: &str) -> Result<HttpReply> {
        tracing::debug!(%url, "GET");
        let resp = self
            .http
            .get(url)
            .header(header::AUTHORIZATION, self.auth_header.clone())
            .send()
            .await?;
        let status = resp.status().as_u16();
        // A body that dies mid-stream is a transport failure, not a reply;
        // callers retry it like any other connection error.
        let body = resp.text().await?;
        Ok(HttpReply { status, body })
    }

    fn rotate(&mut self) -> Result<()> {
        // Wholesale replacement: the fresh client starts with an empty
        // cookie jar, which is the point of the rotation.
        self.http = Self::build_client(self.timeout)?;
        tracing::debug!("HTTP session rotated");
        Ok(())
    }
}
