use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WebError {
    #[error("Bad request: {0}")]
    BadRequest(String),
    #[error("Room not found: {0}")]
    RoomNotFound(String),
    #[error("Internal server error: {0}")]
    InternalServerError(String),
    #[error("Rate limiter configuration error: {0}")]
    RateLimiterConfig(String),
}

impl WebError {
    /// Stable machine-readable code, shared with the WebSocket protocol
    /// where one exists.
    fn code(&self) -> &'static str {
        match self {
            WebError::BadRequest(_) => "invalid_payload",
            WebError::RoomNotFound(_) => "room_not_found",
            WebError::InternalServerError(_) | WebError::RateLimiterConfig(_) => "internal_error",
        }
    }
}

impl IntoResponse for WebError {
    fn into_response(self) -> Response {
        let status = match &self {
            WebError::BadRequest(_) => StatusCode::BAD_REQUEST,
            WebError::RoomNotFound(_) => StatusCode::NOT_FOUND,
            WebError::InternalServerError(_) | WebError::RateLimiterConfig(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        let body = Json(json!({
            "error": self.code(),
            "message": self.to_string(),
            "status": status.as_u16()
        }));

        (status, body).into_response()
    }
}

pub type Result<T, E = WebError> = std::result::Result<T, E>;
