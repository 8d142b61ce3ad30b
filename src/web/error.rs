use crate::core::ReproError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

/// HTTP-facing failure. Bodies are plain text.
#[derive(Debug)]
pub enum WebError {
    NotFound,
    BadRequest(String),
    Internal(String),
}

impl From<ReproError> for WebError {
    fn from(err: ReproError) -> Self {
        match err {
            ReproError::InvalidFanOutWidth(..) => Self::BadRequest(err.to_string()),
            ReproError::UnsupportedOperation(_) => Self::NotFound,
            other => Self::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for WebError {
    fn into_response(self) -> Response {
        match self {
            WebError::NotFound => (StatusCode::NOT_FOUND, "404".to_string()).into_response(),
            WebError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg).into_response(),
            WebError::Internal(msg) => {
                tracing::error!(error = %msg, "request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, msg).into_response()
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, WebError>;
