//! Error types for upstream fetches.

#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    /// Transport failure. The URL is stripped because it carries the service key.
    #[error("upstream request failed: {0}")]
    RequestFailed(#[source] reqwest::Error),
    #[error("upstream returned HTTP {status} for page {page}")]
    Status { status: u16, page: u32 },
    #[error("failed to parse upstream response for page {page}")]
    ParseFailed {
        page: u32,
        #[source]
        source: anyhow::Error,
    },
    #[error("upstream rejected the request: {code} ({message})")]
    Api { code: String, message: String },
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<reqwest::Error> for UpstreamError {
    fn from(err: reqwest::Error) -> Self {
        UpstreamError::RequestFailed(err.without_url())
    }
}
