use axum::{response::{IntoResponse, Response}, Json, http::StatusCode};
use serde::Serialize;
use utoipa::ToSchema;
use std::fmt::{Display, Formatter};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ApiErrorBody { pub code: &'static str, pub message: String }

#[derive(Debug, Clone)]
pub struct ApiError { pub status: StatusCode, pub code: &'static str, pub message: String }

impl ApiError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self { status, code, message: message.into() }
    }
    pub fn not_found(msg: impl Into<String>) -> Self { Self::new(StatusCode::NOT_FOUND, "not_found", msg) }
    pub fn conflict(msg: impl Into<String>) -> Self { Self::new(StatusCode::CONFLICT, "conflict", msg) }
    pub fn internal(msg: impl Into<String>) -> Self { Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal", msg) }
    pub fn bad_request(msg: impl Into<String>) -> Self { Self::new(StatusCode::BAD_REQUEST, "bad_request", msg) }
}

impl Display for ApiError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result { write!(f, "{}: {}", self.code, self.message) }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ApiErrorBody { code: self.code, message: self.message };
        (self.status, Json(body)).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

/// Failures of a lifecycle operation. Everything except `Dispatch` is raised
/// before any write; `Dispatch` means the task row exists but no workflow runs.
#[derive(Debug, Error)]
pub enum AppServeError {
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Precondition(String),
    #[error("{0}")]
    Conflict(String),
    #[error("storage failure: {0}")]
    Persistence(#[source] anyhow::Error),
    #[error("failed to submit workflow '{workflow}': {source}{}", .task_id.map(|id| format!(" (task {id} left in flight)")).unwrap_or_default())]
    Dispatch { workflow: &'static str, task_id: Option<Uuid>, #[source] source: anyhow::Error },
}

impl AppServeError {
    pub fn validation(msg: impl Into<String>) -> Self { Self::Validation(msg.into()) }
    pub fn not_found(msg: impl Into<String>) -> Self { Self::NotFound(msg.into()) }
    pub fn precondition(msg: impl Into<String>) -> Self { Self::Precondition(msg.into()) }
}

impl From<AppServeError> for ApiError {
    fn from(e: AppServeError) -> Self {
        let message = e.to_string();
        match e {
            AppServeError::Validation(_) => ApiError::bad_request(message),
            AppServeError::NotFound(_) => ApiError::not_found(message),
            AppServeError::Precondition(_) => ApiError::new(StatusCode::CONFLICT, "precondition_failed", message),
            AppServeError::Conflict(_) => ApiError::conflict(message),
            AppServeError::Persistence(_) => ApiError::internal(message),
            AppServeError::Dispatch { .. } => ApiError::new(StatusCode::BAD_GATEWAY, "workflow_dispatch_failed", message),
        }
    }
}

impl IntoResponse for AppServeError {
    fn into_response(self) -> Response { ApiError::from(self).into_response() }
}
