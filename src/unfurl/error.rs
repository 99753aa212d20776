//! Error types for the unfurl pipeline.

use thiserror::Error;

/// Bad caller input. Always safe to show verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("URL is required.")]
    Required,

    #[error("Invalid URL format.")]
    InvalidFormat,

    #[error("Only http and https URLs are allowed.")]
    UnsupportedScheme,
}

/// The target host was refused before any connection was made.
///
/// The variants are for logs only; callers see one opaque outcome.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SsrfError {
    #[error("Blocked host")]
    BlockedHost,

    #[error("DNS resolution failed")]
    DnsFailed,
}

/// The remote server or the network misbehaved.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    #[error("The page took too long to respond.")]
    Timeout,

    #[error("Could not fetch URL.")]
    Network,

    #[error("Redirect without location header.")]
    MissingLocation,

    #[error("Too many redirects.")]
    TooManyRedirects,

    #[error("Invalid redirect URL.")]
    InvalidRedirect,

    /// The fetch target, or a redirect, uses a scheme other than http(s).
    #[error("Could not fetch URL.")]
    UnsupportedScheme,

    #[error("The page returned an error.")]
    BadStatus(u16),

    #[error("URL does not point to an HTML page.")]
    NotHtml,

    #[error("Could not read response body.")]
    UnreadableBody,
}

/// Every way an unfurl attempt can fail.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UnfurlError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Ssrf(#[from] SsrfError),

    #[error(transparent)]
    Fetch(#[from] FetchError),
}
