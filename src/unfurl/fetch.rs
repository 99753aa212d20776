//! Bounded HTTP fetching with per-hop SSRF validation.
//!
//! Redirects are never followed by the HTTP client. Each hop walks the
//! [`Hop`] states explicitly so the [`HostGuard`] runs before every
//! connection, including connections to redirect targets.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use reqwest::header::{ACCEPT, CONTENT_TYPE, LOCATION};
use reqwest::redirect::Policy as RedirectPolicy;
use reqwest::{Client, Response};
use url::{Host, Url};

use super::error::{FetchError, SsrfError, UnfurlError};
use super::guard::HostGuard;

/// Maximum number of redirects followed before giving up.
pub const MAX_REDIRECTS: u32 = 3;

/// Hard cap on bytes read from a response body.
pub const MAX_BODY_BYTES: usize = 50 * 1024;

/// Per-request timeout, covering connect, headers and body.
pub const FETCH_TIMEOUT: Duration = Duration::from_secs(5);

pub const DEFAULT_USER_AGENT: &str = "LinkPreview/1.0 bot";

const REDIRECT_STATUSES: [u16; 5] = [301, 302, 303, 307, 308];

/// Limits applied to every fetch.
#[derive(Debug, Clone)]
pub struct FetchPolicy {
    pub timeout: Duration,
    pub max_redirects: u32,
    pub max_body_bytes: usize,
    pub user_agent: String,
}

impl Default for FetchPolicy {
    fn default() -> Self {
        Self {
            timeout: FETCH_TIMEOUT,
            max_redirects: MAX_REDIRECTS,
            max_body_bytes: MAX_BODY_BYTES,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

/// Body and final location of a successful fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchOutcome {
    /// Decoded body, at most `max_body_bytes` of the original bytes.
    pub body: String,

    /// The URL the body was actually read from, after redirects.
    pub final_url: Url,
}

/// One step of the redirect walk. Failure leaves the loop as `Err`.
enum Hop {
    Resolving(Url),
    Connecting { url: Url, ip: IpAddr },
    Redirected { from: Url, location: String },
    Reading { url: Url, response: Response },
    Done(FetchOutcome),
}

pub(crate) fn is_allowed_scheme(scheme: &str) -> bool {
    matches!(scheme, "http" | "https")
}

/// HTTP GET with SSRF validation on every hop.
#[derive(Clone)]
pub struct SafeFetcher {
    guard: Arc<dyn HostGuard>,
    policy: FetchPolicy,
}

impl SafeFetcher {
    pub fn new(guard: Arc<dyn HostGuard>, policy: FetchPolicy) -> Self {
        Self { guard, policy }
    }

    pub fn policy(&self) -> &FetchPolicy {
        &self.policy
    }

    /// Fetch `url`, following at most `max_redirects` redirects.
    pub async fn fetch(&self, url: &Url) -> Result<FetchOutcome, UnfurlError> {
        if !is_allowed_scheme(url.scheme()) {
            return Err(FetchError::UnsupportedScheme.into());
        }

        let mut redirects = 0;
        let mut state = Hop::Resolving(url.clone());

        loop {
            state = match state {
                Hop::Resolving(url) => {
                    // DNS 查询同样受单次请求超时约束
                    let ip = tokio::time::timeout(self.policy.timeout, self.guard.admit(&url))
                        .await
                        .map_err(|_| {
                            tracing::warn!(url = %url, "host check timed out");
                            SsrfError::DnsFailed
                        })??;
                    Hop::Connecting { url, ip }
                }
                Hop::Connecting { url, ip } => {
                    let response = self.send(&url, ip).await?;
                    let status = response.status();
                    tracing::debug!(url = %url, %ip, status = status.as_u16(), hop = redirects, "fetched");

                    if REDIRECT_STATUSES.contains(&status.as_u16()) {
                        let location = response
                            .headers()
                            .get(LOCATION)
                            .map(|value| String::from_utf8_lossy(value.as_bytes()).into_owned())
                            .ok_or(FetchError::MissingLocation)?;
                        Hop::Redirected { from: url, location }
                    } else if !status.is_success() {
                        return Err(FetchError::BadStatus(status.as_u16()).into());
                    } else {
                        ensure_html(&response)?;
                        Hop::Reading { url, response }
                    }
                }
                Hop::Redirected { from, location } => {
                    // Ceiling first, then the target itself.
                    redirects += 1;
                    if redirects > self.policy.max_redirects {
                        return Err(FetchError::TooManyRedirects.into());
                    }
                    let next = from.join(&location).map_err(|_| FetchError::InvalidRedirect)?;
                    if !is_allowed_scheme(next.scheme()) {
                        tracing::debug!(from = %from, to = %next, "redirect to disallowed scheme");
                        return Err(FetchError::UnsupportedScheme.into());
                    }
                    Hop::Resolving(next)
                }
                Hop::Reading { url, response } => {
                    let body = self.read_body(response).await?;
                    Hop::Done(FetchOutcome { body, final_url: url })
                }
                Hop::Done(outcome) => return Ok(outcome),
            };
        }
    }

    /// Issue one GET pinned to the guard-approved address.
    ///
    /// `resolve` overrides live on the client, so each hop builds its own
    /// client for the address the guard just approved.
    async fn send(&self, url: &Url, ip: IpAddr) -> Result<Response, FetchError> {
        let mut builder = Client::builder()
            .redirect(RedirectPolicy::none())
            .no_proxy()
            .timeout(self.policy.timeout)
            .user_agent(self.policy.user_agent.as_str());

        // Port 0 keeps the URL's own port.
        if let Some(Host::Domain(domain)) = url.host() {
            builder = builder.resolve(domain, SocketAddr::new(ip, 0));
        }

        let client = builder.build().map_err(|e| {
            tracing::error!(error = %e, "failed to build HTTP client");
            FetchError::Network
        })?;

        client
            .get(url.as_str())
            .header(ACCEPT, "text/html")
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    FetchError::Timeout
                } else {
                    tracing::debug!(url = %url, error = %e, "request failed");
                    FetchError::Network
                }
            })
    }

    /// Read at most `max_body_bytes`, then drop the response so the rest of
    /// the body is never buffered.
    async fn read_body(&self, mut response: Response) -> Result<String, FetchError> {
        let limit = self.policy.max_body_bytes;
        let mut buf: Vec<u8> = Vec::with_capacity(limit.min(16 * 1024));

        while buf.len() < limit {
            match response.chunk().await {
                Ok(Some(chunk)) => buf.extend_from_slice(&chunk),
                Ok(None) => break,
                Err(e) if e.is_timeout() => return Err(FetchError::Timeout),
                Err(e) => {
                    tracing::debug!(error = %e, "body read failed");
                    return Err(FetchError::UnreadableBody);
                }
            }
        }
        // 丢弃剩余响应体并关闭连接
        drop(response);

        buf.truncate(limit);
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }
}

fn ensure_html(response: &Response) -> Result<(), FetchError> {
    let content_type = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_ascii_lowercase();

    if content_type.contains("text/html") || content_type.contains("application/xhtml") {
        Ok(())
    } else {
        Err(FetchError::NotHtml)
    }
}
