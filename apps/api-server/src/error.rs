use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use caption_engine::CaptionError;
use caption_task::TaskError;
use serde_json::json;
use storage::StorageError;

#[derive(thiserror::Error, Debug)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    PayloadTooLarge(String),
    #[error(transparent)]
    Task(#[from] TaskError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

pub type ApiResult<T> = Result<T, ApiError>;

impl From<CaptionError> for ApiError {
    fn from(e: CaptionError) -> Self {
        Self::Task(e.into())
    }
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::Task(e) => match e {
                TaskError::TaskNotFound(_) | TaskError::ImageNotFound(_) => StatusCode::NOT_FOUND,
                TaskError::EmptyBatch | TaskError::Engine(CaptionError::UnknownEngine(_)) => {
                    StatusCode::BAD_REQUEST
                }
                TaskError::Storage(e) => storage_status(e),
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
            ApiError::Storage(e) => storage_status(e),
        }
    }
}

fn storage_status(e: &StorageError) -> StatusCode {
    match e {
        e if e.is_not_found() => StatusCode::NOT_FOUND,
        StorageError::InvalidPath(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!("request failed: {}", self);
        } else {
            tracing::debug!("request rejected ({}): {}", status, self);
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}
