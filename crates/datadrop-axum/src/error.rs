//! Axum-specific error types and mappings.
//!
//! Every `DownloadError` maps to a status code and a JSON body carrying the
//! stable machine code, a user-facing message, the details bag and recovery
//! suggestions.

use axum::http::header::RETRY_AFTER;
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use thiserror::Error;

use datadrop_core::DownloadError;
use datadrop_download::progress::retry_endpoint;

/// Axum-specific error type.
#[derive(Debug, Error)]
pub enum HttpError {
    /// A download operation failed.
    #[error("{error}")]
    Download {
        error: DownloadError,
        /// Where the caller can retry, for failures a retry may fix.
        retry_endpoint: Option<String>,
    },

    /// Bad request (invalid input).
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Internal server error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl HttpError {
    /// Wrap a failure of an operation on `token`, pointing recoverable
    /// failures at the retry endpoint.
    pub fn for_token(error: DownloadError, token: &str) -> Self {
        let retry_endpoint = (error.is_recoverable()
            || matches!(error, DownloadError::DownloadFailed { .. }))
        .then(|| retry_endpoint(token));
        Self::Download {
            error,
            retry_endpoint,
        }
    }

    /// Status code for a download error.
    pub const fn download_status(error: &DownloadError) -> StatusCode {
        match error {
            DownloadError::DatasetNotFound { .. } | DownloadError::DownloadNotFound => {
                StatusCode::NOT_FOUND
            }
            DownloadError::DatasetDeleted { .. } | DownloadError::TokenExpired { .. } => {
                StatusCode::GONE
            }
            DownloadError::AccessDenied { .. } | DownloadError::DownloadPermissionDenied { .. } => {
                StatusCode::FORBIDDEN
            }
            DownloadError::DatasetInactive { .. }
            | DownloadError::AlreadyCompleted { .. }
            | DownloadError::TransferInProgress
            | DownloadError::NotRetryable { .. } => StatusCode::CONFLICT,
            DownloadError::RateLimitExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
            DownloadError::InvalidFileFormat { .. } | DownloadError::InvalidCompression { .. } => {
                StatusCode::BAD_REQUEST
            }
            DownloadError::FileSizeExceeded { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            DownloadError::TokenInvalid { .. } => StatusCode::UNAUTHORIZED,
            DownloadError::NetworkInterrupted { .. } => StatusCode::SERVICE_UNAVAILABLE,
            DownloadError::Validation { .. }
            | DownloadError::Storage { .. }
            | DownloadError::FileCorrupted { .. }
            | DownloadError::DownloadFailed { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<DownloadError> for HttpError {
    fn from(error: DownloadError) -> Self {
        Self::Download {
            error,
            retry_endpoint: None,
        }
    }
}

/// JSON error response body.
#[derive(Serialize)]
struct ErrorBody {
    error: String,
    code: &'static str,
    status: u16,
    details: serde_json::Value,
    suggestions: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    retry_endpoint: Option<String>,
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        let (status, body, retry_after) = match self {
            Self::Download {
                error,
                retry_endpoint,
            } => {
                let status = Self::download_status(&error);
                let retry_after = match &error {
                    DownloadError::RateLimitExceeded {
                        retry_after_secs, ..
                    } => Some(*retry_after_secs),
                    _ => None,
                };
                if status.is_server_error() {
                    tracing::error!(target: "datadrop.http", code = error.code(), error = %error, "request failed");
                } else {
                    tracing::debug!(target: "datadrop.http", code = error.code(), error = %error, "request rejected");
                }
                let body = ErrorBody {
                    error: error.user_message(),
                    code: error.code(),
                    status: status.as_u16(),
                    details: error.details(),
                    suggestions: error.suggestions(),
                    retry_endpoint,
                };
                (status, body, retry_after)
            }
            Self::BadRequest(msg) => {
                let status = StatusCode::BAD_REQUEST;
                let body = ErrorBody {
                    error: msg,
                    code: "BAD_REQUEST",
                    status: status.as_u16(),
                    details: serde_json::json!({}),
                    suggestions: Vec::new(),
                    retry_endpoint: None,
                };
                (status, body, None)
            }
            Self::Internal(msg) => {
                tracing::error!(target: "datadrop.http", error = %msg, "internal error");
                let status = StatusCode::INTERNAL_SERVER_ERROR;
                let body = ErrorBody {
                    error: "Internal server error".to_string(),
                    code: "INTERNAL_ERROR",
                    status: status.as_u16(),
                    details: serde_json::json!({}),
                    suggestions: Vec::new(),
                    retry_endpoint: None,
                };
                (status, body, None)
            }
        };

        let mut response = (status, axum::Json(body)).into_response();
        if let Some(secs) = retry_after {
            response
                .headers_mut()
                .insert(RETRY_AFTER, HeaderValue::from(secs));
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use datadrop_core::RateWindow;

    #[test]
    fn rate_limit_sets_retry_after() {
        let err = HttpError::from(DownloadError::RateLimitExceeded {
            window: RateWindow::Hour,
            limit: 50,
            used: 50,
            retry_after_secs: 1_200,
        });
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[RETRY_AFTER], "1200");
    }

    #[test]
    fn recoverable_failures_point_at_retry() {
        let HttpError::Download { retry_endpoint, .. } =
            HttpError::for_token(DownloadError::storage("disk gone"), "tok")
        else {
            panic!("expected a download error");
        };
        assert_eq!(retry_endpoint.as_deref(), Some("/api/downloads/tok/retry"));

        let HttpError::Download { retry_endpoint, .. } =
            HttpError::for_token(DownloadError::DownloadNotFound, "tok")
        else {
            panic!("expected a download error");
        };
        assert!(retry_endpoint.is_none());
    }

    #[test]
    fn status_codes_follow_the_error_kind() {
        assert_eq!(
            HttpError::download_status(&DownloadError::DownloadNotFound),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            HttpError::download_status(&DownloadError::TransferInProgress),
            StatusCode::CONFLICT
        );
        assert_eq!(
            HttpError::download_status(&DownloadError::token_invalid("bad")),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            HttpError::download_status(&DownloadError::validation("db down")),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
