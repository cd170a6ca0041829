//! Error types for medeval-ev

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use tracing::{error, warn};

use crate::gateway::{FetchError, SubmissionError};
use crate::ledger::LedgerError;
use crate::reconcile::RecoveryError;
use crate::record::RecordError;

/// API error type
#[derive(Debug, Error)]
pub enum ApiError {
    /// Resource not found (404)
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Invalid request (400)
    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// Triple exists but belongs to someone else (409)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Evaluation failed local validation (422)
    #[error("Invalid evaluation: {0}")]
    Unprocessable(String),

    /// Remote store failed or rejected the call (502)
    #[error("Remote store error: {0}")]
    BadGateway(String),

    /// No remote store configured (503)
    #[error("Unavailable: {0}")]
    Unavailable(String),

    /// Internal server error (500)
    #[error("Internal server error: {0}")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg),
            ApiError::Unprocessable(msg) => {
                (StatusCode::UNPROCESSABLE_ENTITY, "VALIDATION_FAILED", msg)
            }
            ApiError::BadGateway(msg) => (StatusCode::BAD_GATEWAY, "REMOTE_STORE_ERROR", msg),
            ApiError::Unavailable(msg) => {
                (StatusCode::SERVICE_UNAVAILABLE, "NOT_CONFIGURED", msg)
            }
            ApiError::Internal(msg) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", msg)
            }
        };

        let body = Json(json!({
            "error": {
                "code": error_code,
                "message": message,
            }
        }));

        (status, body).into_response()
    }
}

impl From<LedgerError> for ApiError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::UnknownEvaluator(_) | LedgerError::UnknownQuery { .. } => {
                ApiError::NotFound(err.to_string())
            }
            LedgerError::NotAssigned { .. } => ApiError::Conflict(err.to_string()),
            other => {
                error!("Ledger error: {}", other);
                ApiError::Internal(other.to_string())
            }
        }
    }
}

impl From<RecordError> for ApiError {
    fn from(err: RecordError) -> Self {
        ApiError::Unprocessable(err.to_string())
    }
}

impl From<SubmissionError> for ApiError {
    fn from(err: SubmissionError) -> Self {
        match err {
            SubmissionError::Invalid(e) => e.into(),
            SubmissionError::NotConfigured => ApiError::Unavailable(err.to_string()),
            other => {
                warn!("Submission failed: {}", other);
                ApiError::BadGateway(other.to_string())
            }
        }
    }
}

impl From<FetchError> for ApiError {
    fn from(err: FetchError) -> Self {
        match err {
            FetchError::NotConfigured => ApiError::Unavailable(err.to_string()),
            other => {
                warn!("Fetch failed: {}", other);
                ApiError::BadGateway(other.to_string())
            }
        }
    }
}

impl From<RecoveryError> for ApiError {
    fn from(err: RecoveryError) -> Self {
        match err {
            RecoveryError::Fetch(e) => e.into(),
            RecoveryError::Ledger(e) => e.into(),
        }
    }
}

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ledger_error_status() {
        let resp = ApiError::from(LedgerError::UnknownEvaluator("x".to_string())).into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        let resp = ApiError::from(LedgerError::NotAssigned {
            evaluator: "Evaluator 1".to_string(),
            patient_id: "P9".to_string(),
        })
        .into_response();
        assert_eq!(resp.status(), StatusCode::CONFLICT);
    }

    #[test]
    fn test_submission_error_status() {
        let resp = ApiError::from(SubmissionError::Invalid(RecordError::MissingPreferenceReasons))
            .into_response();
        assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);

        let resp = ApiError::from(SubmissionError::Status {
            status: 500,
            body: "boom".to_string(),
        })
        .into_response();
        assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);

        let resp = ApiError::from(SubmissionError::NotConfigured).into_response();
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
