use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::analysis::controller::AnalysisError;

/// Application-level error type.
/// Implements `IntoResponse` so Axum handlers can return `Result<T, AppError>`.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("{message}")]
    Precondition { code: &'static str, message: String },

    #[error("Service unavailable: {0}")]
    Unavailable(String),

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl From<AnalysisError> for AppError {
    fn from(e: AnalysisError) -> Self {
        match e {
            AnalysisError::NotFound(_) => AppError::NotFound(e.to_string()),
            AnalysisError::AlreadyRunning(_) => AppError::Conflict(e.to_string()),
            AnalysisError::JobStillActive(_) => AppError::Precondition {
                code: "job_still_active",
                message: e.to_string(),
            },
            AnalysisError::NoApplicants(_) => AppError::Precondition {
                code: "no_applicants",
                message: e.to_string(),
            },
            AnalysisError::Lease(_) => AppError::Unavailable(e.to_string()),
            AnalysisError::Store(_) | AnalysisError::Source(_) => {
                AppError::Internal(anyhow::Error::new(e))
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg.clone()),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, "already_running", msg.clone()),
            AppError::Precondition { code, message } => {
                (StatusCode::UNPROCESSABLE_ENTITY, *code, message.clone())
            }
            AppError::Unavailable(msg) => {
                tracing::error!("Dependency unavailable: {msg}");
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "unavailable",
                    "A required service is unavailable".to_string(),
                )
            }
            AppError::Internal(e) => {
                tracing::error!("Internal error: {e:?}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "An internal server error occurred".to_string(),
                )
            }
        };

        let body = Json(json!({
            "error": {
                "code": code,
                "message": message
            }
        }));

        (status, body).into_response()
    }
}
