use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("Model not loaded")]
    NotReady,
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("{0}")]
    Generation(String),
}

impl ServiceError {
    pub fn status(&self) -> StatusCode {
        match self {
            ServiceError::NotReady => StatusCode::SERVICE_UNAVAILABLE,
            ServiceError::InvalidRequest(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ServiceError::Generation(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "detail": self.to_string(),
        });

        (self.status(), axum::Json(body)).into_response()
    }
}

/// Failure while mirroring model artifacts from object storage.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("object store error: {0}")]
    Store(#[from] object_store::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("refusing to write object {0:?} outside the model directory")]
    InvalidKey(String),
}
