use axum::http::StatusCode;
use serde::Serialize;
use thiserror::Error;

/// Standard error type for Sentinel.
///
/// Variants carry a detailed reason for logs. The rendered response only
/// exposes the detail for caller-correctable errors (`Validation`,
/// `Conflict`, `NotFound`); authentication, authorization and dependency
/// failures render a fixed message.
#[derive(Debug, Error)]
pub enum SentinelError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Too many requests")]
    TooManyRequests,

    /// A store or cache collaborator failed. Retryable by the caller.
    #[error("Dependency unavailable: {0}")]
    Unavailable(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl SentinelError {
    /// Get the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            SentinelError::NotFound(_) => StatusCode::NOT_FOUND,
            SentinelError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            SentinelError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            SentinelError::Forbidden(_) => StatusCode::FORBIDDEN,
            SentinelError::Conflict(_) => StatusCode::CONFLICT,
            SentinelError::TooManyRequests => StatusCode::TOO_MANY_REQUESTS,
            SentinelError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            SentinelError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get the error code string for this error.
    pub fn error_code(&self) -> &'static str {
        match self {
            SentinelError::NotFound(_) => "NOT_FOUND",
            SentinelError::Validation(_) => "VALIDATION_ERROR",
            SentinelError::Unauthorized(_) => "UNAUTHORIZED",
            SentinelError::Forbidden(_) => "FORBIDDEN",
            SentinelError::Conflict(_) => "CONFLICT",
            SentinelError::TooManyRequests => "TOO_MANY_REQUESTS",
            SentinelError::Unavailable(_) => "SERVICE_UNAVAILABLE",
            SentinelError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Message safe to show to the caller.
    ///
    /// Never distinguishes which authentication check failed.
    pub fn public_message(&self) -> String {
        match self {
            SentinelError::NotFound(msg)
            | SentinelError::Validation(msg)
            | SentinelError::Conflict(msg) => msg.clone(),
            SentinelError::Unauthorized(_) => "Unauthorized".to_string(),
            SentinelError::Forbidden(_) => "Forbidden".to_string(),
            SentinelError::TooManyRequests => "Too many requests, slow down".to_string(),
            SentinelError::Unavailable(_) => "Service temporarily unavailable".to_string(),
            SentinelError::Internal(_) => "Internal server error".to_string(),
        }
    }

    /// Whether retrying the same call later may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SentinelError::Unavailable(_) | SentinelError::TooManyRequests
        )
    }
}

/// Error detail for API responses.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
}

/// JSON body of every error response:
///
/// ```json
/// { "success": false, "error": { "code": "UNAUTHORIZED", "message": "Unauthorized" } }
/// ```
#[derive(Debug, Clone, Serialize)]
pub struct ErrorBody {
    pub success: bool,
    pub error: ErrorDetail,
}

impl From<&SentinelError> for ErrorBody {
    fn from(err: &SentinelError) -> Self {
        ErrorBody {
            success: false,
            error: ErrorDetail {
                code: err.error_code().to_string(),
                message: err.public_message(),
            },
        }
    }
}

impl From<serde_json::Error> for SentinelError {
    fn from(err: serde_json::Error) -> Self {
        SentinelError::Internal(format!("Serialization error: {}", err))
    }
}

impl axum::response::IntoResponse for SentinelError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status_code();
        match &self {
            SentinelError::Internal(reason) => tracing::error!(%reason, "internal error"),
            SentinelError::Unavailable(reason) => tracing::warn!(%reason, "dependency unavailable"),
            other => tracing::debug!(error = %other, "request rejected"),
        }
        (status, axum::Json(ErrorBody::from(&self))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_failures_do_not_leak_reason() {
        let err = SentinelError::Unauthorized("password mismatch for a@x.com".to_string());
        assert_eq!(err.public_message(), "Unauthorized");
        assert_eq!(err.status_code(), StatusCode::UNAUTHORIZED);

        let err = SentinelError::Forbidden("role user lacks user:block".to_string());
        assert_eq!(err.public_message(), "Forbidden");
    }

    #[test]
    fn dependency_failures_are_distinct_from_auth_failures() {
        let err = SentinelError::Unavailable("redis: connection refused".to_string());
        assert_eq!(err.status_code(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(err.public_message(), "Service temporarily unavailable");
        assert!(err.is_retryable());
        assert!(!SentinelError::Unauthorized(String::new()).is_retryable());
    }

    #[test]
    fn conflict_keeps_its_message() {
        let err = SentinelError::Conflict("Email already registered".to_string());
        assert_eq!(err.error_code(), "CONFLICT");
        assert_eq!(err.public_message(), "Email already registered");
    }
}
