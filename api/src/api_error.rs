use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chat_core::{ChatError, ErrorResponse};

/// Turns a `ChatError` into a JSON error response.
///
/// Only used for failures that happen before a stream has started.
#[derive(Debug)]
pub struct ApiError(pub ChatError);

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            ChatError::Input(_) => StatusCode::BAD_REQUEST,
            ChatError::NotFound(_) => StatusCode::NOT_FOUND,
            ChatError::Extraction(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ChatError::Upstream(_) | ChatError::Transport(_) => StatusCode::BAD_GATEWAY,
            ChatError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            ChatError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<ChatError> for ApiError {
    fn from(err: ChatError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            log::error!("Error processing request: {}", self.0);
        } else {
            log::warn!("Rejected request: {}", self.0);
        }

        let body = ErrorResponse {
            status: "error".to_string(),
            error: self.0.kind().to_string(),
            details: self.0.to_string(),
        };
        (status, Json(body)).into_response()
    }
}
