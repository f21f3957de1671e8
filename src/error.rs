use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

/// Failures of registry and buffer operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Forbidden(String),
}

impl StoreError {
    pub fn webhook_not_found(id: u64) -> Self {
        StoreError::NotFound(format!("webhook not found: {id}"))
    }

    pub fn event_not_found(id: u64) -> Self {
        StoreError::NotFound(format!("event not found: {id}"))
    }
}

#[derive(Debug)]
pub enum ApiError {
    Store(StoreError),
    BadRequest(String),
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        ApiError::Store(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::Store(StoreError::Validation(msg)) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Store(StoreError::NotFound(msg)) => (StatusCode::NOT_FOUND, msg),
            ApiError::Store(StoreError::Forbidden(msg)) => (StatusCode::FORBIDDEN, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
        };

        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}
