/// Unified error types for iam-sync
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failure while fetching a profile from the remote IAM API
///
/// The reconciler never touches the membership cache when one of these
/// is returned.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProfileFetchError {
    /// Connection refused, DNS failure, reset, etc.
    #[error("network error talking to profile API: {0}")]
    Network(String),

    /// The request did not complete within the configured timeout
    #[error("profile API request timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// Non-2xx response
    #[error("profile API returned status {0}")]
    Status(u16),

    /// 2xx response whose body is not a profile document
    #[error("malformed profile payload: {0}")]
    Payload(String),
}

impl ProfileFetchError {
    /// Whether a retry could plausibly succeed
    pub fn is_transient(&self) -> bool {
        match self {
            ProfileFetchError::Network(_) | ProfileFetchError::Timeout(_) => true,
            ProfileFetchError::Status(code) => *code >= 500,
            ProfileFetchError::Payload(_) => false,
        }
    }
}

/// Main error type for iam-sync
#[derive(Error, Debug)]
pub enum SyncError {
    /// Database errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Remote profile fetch failed
    #[error("Profile fetch failed: {0}")]
    ProfileFetch(#[from] ProfileFetchError),

    /// Authentication errors (admin API)
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Validation errors
    #[error("Validation error: {0}")]
    Validation(String),

    /// Not found errors
    #[error("Not found: {0}")]
    NotFound(String),

    /// Conflict errors (e.g., group already mapped)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Internal errors
    #[error("Internal error: {0}")]
    Internal(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// JSON error body
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

impl IntoResponse for SyncError {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match self {
            SyncError::Authentication(_) => (
                StatusCode::UNAUTHORIZED,
                "AuthenticationRequired",
                self.to_string(),
            ),
            SyncError::Validation(_) => (
                StatusCode::BAD_REQUEST,
                "InvalidRequest",
                self.to_string(),
            ),
            SyncError::NotFound(_) => (StatusCode::NOT_FOUND, "NotFound", self.to_string()),
            SyncError::Conflict(_) => (StatusCode::CONFLICT, "Conflict", self.to_string()),
            SyncError::ProfileFetch(_) => (
                StatusCode::BAD_GATEWAY,
                "ProfileFetchFailed",
                self.to_string(),
            ),
            SyncError::Database(_) | SyncError::Internal(_) | SyncError::Io(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "InternalServerError",
                "Internal server error".to_string(), // Don't leak details
            ),
        };

        let body = Json(ErrorResponse {
            error: error_code.to_string(),
            message,
        });

        (status, body).into_response()
    }
}

/// Result type alias for iam-sync operations
pub type SyncResult<T> = Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_transient_classification() {
        assert!(ProfileFetchError::Network("reset".into()).is_transient());
        assert!(ProfileFetchError::Timeout(Duration::from_secs(1)).is_transient());
        assert!(ProfileFetchError::Status(503).is_transient());
        assert!(!ProfileFetchError::Status(404).is_transient());
        assert!(!ProfileFetchError::Payload("eof".into()).is_transient());
    }

    #[test]
    fn test_status_mapping() {
        let resp = SyncError::ProfileFetch(ProfileFetchError::Status(500)).into_response();
        assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);

        let resp = SyncError::NotFound("mapping".into()).into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        let resp = SyncError::Internal("boom".into()).into_response();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
