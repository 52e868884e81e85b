use std::time::Duration;
use thiserror::Error;

/// Failures observed when talking to an upstream model endpoint.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BackendError {
    #[error("failed to reach backend: {0}")]
    Connect(String),
    #[error("backend request timed out after {0:?}")]
    Timeout(Duration),
    #[error("backend returned status {status}: {body}")]
    UpstreamStatus { status: u16, body: String },
    #[error("backend response could not be decoded: {0}")]
    Decode(String),
    #[error("backend stream failed: {0}")]
    Stream(String),
}

impl BackendError {
    /// Connection errors, timeouts, 5xx, 408, and 429 are worth retrying;
    /// every other status is a caller mistake and is returned as-is.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Connect(_) | Self::Timeout(_) => true,
            Self::UpstreamStatus { status, .. } => {
                *status >= 500 || *status == 408 || *status == 429
            }
            Self::Decode(_) | Self::Stream(_) => false,
        }
    }

    /// Upstream HTTP status, when one was observed.
    pub fn upstream_status(&self) -> Option<u16> {
        match self {
            Self::UpstreamStatus { status, .. } => Some(*status),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_classification_follows_status_ranges() {
        assert!(BackendError::Connect("refused".to_string()).is_retryable());
        assert!(BackendError::Timeout(Duration::from_secs(1)).is_retryable());
        for status in [500, 502, 503, 408, 429] {
            assert!(
                BackendError::UpstreamStatus {
                    status,
                    body: String::new()
                }
                .is_retryable(),
                "status {status} should retry"
            );
        }
        for status in [400, 401, 404, 422] {
            assert!(
                !BackendError::UpstreamStatus {
                    status,
                    body: String::new()
                }
                .is_retryable(),
                "status {status} should not retry"
            );
        }
    }
}
