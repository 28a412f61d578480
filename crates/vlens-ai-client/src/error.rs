//! Remote analysis error types.

use thiserror::Error;
use vlens_models::ErrorClass;

/// Result type for remote analysis operations.
pub type AnalysisResult<T> = Result<T, AnalysisError>;

/// Errors returned by the remote analysis and synthesis calls.
#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("Rate limited by provider")]
    RateLimited {
        /// Provider-requested wait, when it sent one
        retry_after_ms: Option<u64>,
    },

    #[error("Model is warming up or overloaded: {0}")]
    ModelWarming(String),

    #[error("Call timed out: {0}")]
    Timeout(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    #[error("Unknown provider error: {0}")]
    Unknown(String),
}

impl AnalysisError {
    pub fn invalid_request(msg: impl Into<String>) -> Self {
        Self::InvalidRequest(msg.into())
    }

    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::MalformedResponse(msg.into())
    }

    pub fn unknown(msg: impl Into<String>) -> Self {
        Self::Unknown(msg.into())
    }

    /// Map an HTTP error status to the remote taxonomy.
    pub fn from_http_status(status: u16, body: &str, retry_after_ms: Option<u64>) -> Self {
        let body = body.trim().to_string();
        match status {
            429 => Self::RateLimited { retry_after_ms },
            503 => Self::ModelWarming(body),
            400 | 404 | 413 | 422 => Self::InvalidRequest(body),
            401 | 403 => Self::Unauthorized(body),
            _ => Self::Unknown(format!("HTTP {}: {}", status, body)),
        }
    }

    pub fn class(&self) -> ErrorClass {
        match self {
            AnalysisError::RateLimited { .. } => ErrorClass::RateLimited,
            AnalysisError::ModelWarming(_) => ErrorClass::ModelWarming,
            AnalysisError::Timeout(_) => ErrorClass::Timeout,
            AnalysisError::InvalidRequest(_) => ErrorClass::InvalidRequest,
            AnalysisError::Unauthorized(_) => ErrorClass::Unauthorized,
            AnalysisError::MalformedResponse(_) => ErrorClass::MalformedResponse,
            AnalysisError::Unknown(_) => ErrorClass::Unknown,
        }
    }

    /// Check if error is worth retrying with backoff.
    pub fn is_transient(&self) -> bool {
        self.class().is_transient()
    }

    /// Provider-requested delay before the next attempt.
    pub fn retry_after_ms(&self) -> Option<u64> {
        match self {
            AnalysisError::RateLimited { retry_after_ms } => *retry_after_ms,
            _ => None,
        }
    }
}

impl From<reqwest::Error> for AnalysisError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            AnalysisError::Timeout(err.to_string())
        } else if err.is_decode() {
            AnalysisError::MalformedResponse(err.to_string())
        } else if let Some(status) = err.status() {
            AnalysisError::from_http_status(status.as_u16(), &err.to_string(), None)
        } else {
            AnalysisError::Unknown(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_http_status_429() {
        let err = AnalysisError::from_http_status(429, "quota", Some(3000));
        assert!(matches!(
            err,
            AnalysisError::RateLimited {
                retry_after_ms: Some(3000)
            }
        ));
        assert!(err.is_transient());
        assert_eq!(err.retry_after_ms(), Some(3000));
    }

    #[test]
    fn test_from_http_status_503() {
        let err = AnalysisError::from_http_status(503, "The model is overloaded", None);
        assert_eq!(err.class(), ErrorClass::ModelWarming);
        assert!(err.is_transient());
    }

    #[test]
    fn test_from_http_status_permanent() {
        let bad = AnalysisError::from_http_status(400, "bad request", None);
        assert_eq!(bad.class(), ErrorClass::InvalidRequest);
        assert!(!bad.is_transient());

        let denied = AnalysisError::from_http_status(403, "PERMISSION_DENIED", None);
        assert_eq!(denied.class(), ErrorClass::Unauthorized);
        assert!(!denied.is_transient());

        let other = AnalysisError::from_http_status(500, "internal", None);
        assert_eq!(other.class(), ErrorClass::Unknown);
        assert!(!other.is_transient());
    }

    #[test]
    fn test_timeout_is_transient() {
        let err = AnalysisError::Timeout("no response within 600s".into());
        assert!(err.is_transient());
        assert_eq!(err.to_string(), "Call timed out: no response within 600s");
    }
}
