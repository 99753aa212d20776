//! Link unfurling: validate a user-supplied URL, fetch it without letting the
//! server be pointed at internal infrastructure, and extract a preview.

mod classify;
mod error;
mod extract;
mod fetch;
mod guard;

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use url::Url;

pub use classify::is_private;
pub use error::{FetchError, SsrfError, UnfurlError, ValidationError};
pub use extract::{Metadata, extract_metadata};
pub use fetch::{
    DEFAULT_USER_AGENT, FETCH_TIMEOUT, FetchOutcome, FetchPolicy, MAX_BODY_BYTES, MAX_REDIRECTS,
    SafeFetcher,
};
pub use guard::{DnsHostGuard, HickoryResolver, HostGuard, Resolve};

/// Link preview for one URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnfurlResult {
    pub title: Option<String>,
    pub description: Option<String>,
    pub image_url: Option<String>,
    pub site_name: Option<String>,

    /// Where the preview was actually read from, after redirects.
    pub url: String,
}

/// Trim and parse a user-supplied URL, accepting only http and https.
pub fn validate_url(raw: &str) -> Result<Url, ValidationError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::Required);
    }

    let parsed = Url::parse(trimmed).map_err(|_| ValidationError::InvalidFormat)?;
    if !fetch::is_allowed_scheme(parsed.scheme()) {
        return Err(ValidationError::UnsupportedScheme);
    }

    Ok(parsed)
}

/// Entry point for callers: validate, fetch, extract.
#[derive(Clone)]
pub struct UnfurlEngine {
    fetcher: SafeFetcher,
}

impl UnfurlEngine {
    pub fn new(fetcher: SafeFetcher) -> Self {
        Self { fetcher }
    }

    pub fn with_guard(guard: Arc<dyn HostGuard>, policy: FetchPolicy) -> Self {
        Self::new(SafeFetcher::new(guard, policy))
    }

    /// Produce a preview for `raw_url`, or the reason none could be made.
    ///
    /// Validation happens before any network access. There is no partial
    /// result: any fetch-stage failure fails the whole call.
    pub async fn unfurl(&self, raw_url: &str) -> Result<UnfurlResult, UnfurlError> {
        let url = validate_url(raw_url)?;
        let FetchOutcome { body, final_url } = self.fetcher.fetch(&url).await?;

        let Metadata {
            title,
            description,
            image_url,
            site_name,
        } = extract_metadata(&body, &final_url);

        Ok(UnfurlResult {
            title,
            description,
            image_url,
            site_name,
            url: final_url.to_string(),
        })
    }
}
