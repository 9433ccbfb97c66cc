use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use crate::domain::error::BulkUpdateError;

/// Errors the `/execute` handler reports with a non-200 status.
///
/// Job failures are not in here: those end up in the job log of a normal response.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// A form-level problem the client has to fix.
    #[error("Bad request: {0}")]
    BadRequest(String),
}

pub type AppResult<T> = Result<T, AppError>;

impl From<BulkUpdateError> for AppError {
    fn from(err: BulkUpdateError) -> Self {
        match err {
            BulkUpdateError::Validation(msg) => AppError::BadRequest(msg),
            other => AppError::BadRequest(other.to_string()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.clone()),
        };
        tracing::warn!(error = %message, "Rejected /execute form");

        let body = json!({
            "error": message,
            "code": code,
        });

        (status, axum::Json(body)).into_response()
    }
}
