//! Mapping of crate errors onto HTTP responses.
//!
//! Body: `{ "error": "<message>", "code": "<CODE>" }`

use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use opsdesk_core::OpsdeskError;
use opsdesk_scheduler::SchedulerError;
use opsdesk_tasks::TaskError;
use serde_json::json;
use tracing::error;

#[derive(Debug)]
pub struct ApiError(pub OpsdeskError);

impl From<OpsdeskError> for ApiError {
    fn from(e: OpsdeskError) -> Self {
        Self(e)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self(OpsdeskError::BadRequest(rejection.body_text()))
    }
}

impl From<SchedulerError> for ApiError {
    fn from(e: SchedulerError) -> Self {
        Self(match e {
            SchedulerError::InvalidArgument(msg) => OpsdeskError::BadRequest(msg),
            SchedulerError::DefinitionNotFound { id } => OpsdeskError::NotFound {
                what: format!("recurrence {id}"),
            },
            SchedulerError::Database(e) => OpsdeskError::Database(e.to_string()),
            SchedulerError::Serialization(e) => OpsdeskError::Serialization(e),
            other => OpsdeskError::Scheduler(other.to_string()),
        })
    }
}

impl From<TaskError> for ApiError {
    fn from(e: TaskError) -> Self {
        Self(match e {
            TaskError::NotFound { id } => OpsdeskError::NotFound {
                what: format!("task {id}"),
            },
            TaskError::InvalidContext(msg) => OpsdeskError::BadRequest(msg),
            TaskError::Database(e) => OpsdeskError::Database(e.to_string()),
        })
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            OpsdeskError::BadRequest(_) => StatusCode::BAD_REQUEST,
            OpsdeskError::NotFound { .. } => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            error!(code = self.0.code(), "request failed: {}", self.0);
        }
        (
            status,
            Json(json!({ "error": self.0.to_string(), "code": self.0.code() })),
        )
            .into_response()
    }
}
