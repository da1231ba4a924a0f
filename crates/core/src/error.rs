use std::time::Duration;
use thiserror::Error;

/// Failure of an external capability call (extraction or embedding).
///
/// The dispatcher retries `RateLimited` and `Timeout` failures; everything
/// else propagates on the first attempt.
#[derive(Debug, Error)]
pub enum CapabilityError {
    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("call timed out after {0:?}")]
    Timeout(Duration),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("malformed response: {0}")]
    MalformedResponse(String),

    #[error("request failed: {0}")]
    Request(String),
}

impl CapabilityError {
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::RateLimited(_) | Self::Timeout(_) => true,
            Self::Http(error) => error.is_timeout(),
            Self::MalformedResponse(_) | Self::Request(_) => false,
        }
    }
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("invalid pipeline config: {0}")]
    InvalidConfig(String),

    #[error("document too large: {0}")]
    DocumentTooLarge(String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("regex error: {0}")]
    Regex(#[from] regex::Error),

    #[error("extraction failed for chunk {chunk_index}: {source}")]
    Extraction {
        chunk_index: usize,
        #[source]
        source: CapabilityError,
    },

    #[error("embedding failed: {0}")]
    Embedding(#[source] CapabilityError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("invalid response from {backend}: {details}")]
    BackendResponse { backend: String, details: String },

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T, E = PipelineError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limits_and_timeouts_are_retryable() {
        assert!(CapabilityError::RateLimited("429".to_string()).is_retryable());
        assert!(CapabilityError::Timeout(Duration::from_secs(1)).is_retryable());
    }

    #[test]
    fn other_failures_are_not_retryable() {
        assert!(!CapabilityError::Request("boom".to_string()).is_retryable());
        assert!(!CapabilityError::MalformedResponse("not json".to_string()).is_retryable());
    }
}
