use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::api::validation::FieldErrors;
use crate::services::exam_workflow::WorkflowError;
use crate::services::job_queue::PublishError;

pub(crate) const EXAM_NOT_FOUND: &str = "Exam not found";
pub(crate) const NOT_ENOUGH_IMAGES: &str = "Not enough images uploaded.";
pub(crate) const QUEUE_UNAVAILABLE: &str = "Job queue unavailable, try again later";
const INVALID_DATA: &str = "The given data was invalid.";

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    errors: Option<FieldErrors>,
}

#[derive(Debug)]
pub(crate) enum ApiError {
    Validation(FieldErrors),
    BadRequest(String),
    NotFound(String),
    ServiceUnavailable(String),
    Internal(String),
}

impl ApiError {
    /// Log the underlying error with context and return an `Internal` variant.
    pub(crate) fn internal(err: impl std::fmt::Display, context: &str) -> Self {
        tracing::error!(error = %err, "{context}");
        Self::Internal(context.to_string())
    }
}

impl From<WorkflowError> for ApiError {
    fn from(err: WorkflowError) -> Self {
        match err {
            WorkflowError::ExamNotFound(_) => ApiError::NotFound(EXAM_NOT_FOUND.to_string()),
            WorkflowError::NotEnoughImages { .. } => {
                ApiError::BadRequest(NOT_ENOUGH_IMAGES.to_string())
            }
            WorkflowError::Repository(err) => ApiError::internal(err, "Failed to persist exam"),
            WorkflowError::Storage(err) => ApiError::internal(err, "Failed to store image"),
            WorkflowError::Publish(PublishError::Unreachable(err)) => {
                tracing::warn!(error = %err, "Job queue unreachable");
                ApiError::ServiceUnavailable(QUEUE_UNAVAILABLE.to_string())
            }
            WorkflowError::Publish(err) => ApiError::internal(err, "Failed to publish exam job"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error, errors) = match self {
            ApiError::Validation(fields) => {
                (StatusCode::UNPROCESSABLE_ENTITY, INVALID_DATA.to_string(), Some(fields))
            }
            ApiError::BadRequest(message) => (StatusCode::BAD_REQUEST, message, None),
            ApiError::NotFound(message) => (StatusCode::NOT_FOUND, message, None),
            ApiError::ServiceUnavailable(message) => {
                (StatusCode::SERVICE_UNAVAILABLE, message, None)
            }
            ApiError::Internal(message) => {
                tracing::error!(error = %message, "Internal server error");
                (StatusCode::INTERNAL_SERVER_ERROR, message, None)
            }
        };

        (status, Json(ErrorResponse { error, errors })).into_response()
    }
}
