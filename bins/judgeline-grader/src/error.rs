use judgeline_common::language::UnsupportedLanguage;
use judgeline_common::store::StoreError;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

/// Failures talking to the execution backend
#[derive(Debug, Error)]
pub enum BackendError {
    /// Transport failure or request timeout
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("backend returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// Response parsed but did not match the request (wrong length, missing token, ...)
    #[error("malformed backend response: {0}")]
    Malformed(String),

    #[error("failed to decode backend response: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Terminal failure of a grading call. None of these are retried.
#[derive(Debug, Error)]
pub enum GradingError {
    #[error(transparent)]
    UnsupportedLanguage(#[from] UnsupportedLanguage),

    #[error("execution backend submit failed: {0}")]
    ExecutionBackend(#[source] BackendError),

    #[error("polling execution results failed: {0}")]
    PollingFailed(#[source] BackendError),

    #[error("gave up waiting after {waited:?} with {pending} run(s) still pending")]
    PollingTimedOut { waited: Duration, pending: usize },

    #[error("grading call was cancelled")]
    Cancelled,

    #[error("reference solution for {language}: submission {case} failed ({status})")]
    ReferenceValidationFailed {
        language: String,
        /// 1-based test case index
        case: usize,
        status: String,
    },

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("problem {0} not found")]
    ProblemNotFound(Uuid),

    #[error("persistence error: {0}")]
    Persistence(#[from] StoreError),
}

impl GradingError {
    /// Caller-side (4xx-equivalent) failures as opposed to backend/infrastructure ones
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            GradingError::UnsupportedLanguage(_)
                | GradingError::ReferenceValidationFailed { .. }
                | GradingError::InvalidRequest(_)
                | GradingError::ProblemNotFound(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_error_classification() {
        assert!(GradingError::from(UnsupportedLanguage("COBOL".into())).is_client_error());
        assert!(GradingError::InvalidRequest("empty".into()).is_client_error());
        assert!(!GradingError::Cancelled.is_client_error());
        assert!(!GradingError::PollingFailed(BackendError::Malformed("x".into())).is_client_error());
    }

    #[test]
    fn test_reference_failure_message() {
        let err = GradingError::ReferenceValidationFailed {
            language: "PYTHON".to_string(),
            case: 2,
            status: "Runtime Error (NZEC)".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "reference solution for PYTHON: submission 2 failed (Runtime Error (NZEC))"
        );
    }
}
