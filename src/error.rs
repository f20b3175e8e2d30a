//! Error types for feed fetching and media loading.

use thiserror::Error;

/// The media list could not be fetched.
#[derive(Debug, Error)]
pub enum FetchError {
    /// The request never produced a response.
    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    /// The server answered with a non-success status.
    #[error("{url} returned status {status}")]
    InvalidResponse {
        url: String,
        status: reqwest::StatusCode,
    },
    /// The body was not a valid manifest.
    #[error("manifest from {url} is malformed: {reason}")]
    BadData { url: String, reason: String },
}

/// A handle could not start loading its source.
///
/// Failures that happen after loading has started are reported through the
/// handle's readiness instead.
#[derive(Debug, Error)]
pub enum LoadError {
    /// The backend does not understand the address.
    #[error("unsupported source {0}")]
    Rejected(String),
    /// Loading needs a tokio runtime and none is running on this thread.
    #[error("no async runtime available to load {0}")]
    NoRuntime(String),
    /// The media layer refused the source.
    #[error("media backend error: {0}")]
    Backend(#[from] anyhow::Error),
}
