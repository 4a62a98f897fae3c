use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use ghostshare_shared::{ProtocolError, RoomId};

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Room {0} is full")]
    RoomFull(RoomId),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Room not found: {0}")]
    RoomNotFound(RoomId),
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ServerError::RoomFull(_) => (StatusCode::CONFLICT, self.to_string()),
            ServerError::RoomNotFound(_) => (StatusCode::NOT_FOUND, self.to_string()),
            ServerError::Protocol(_) => (StatusCode::BAD_REQUEST, self.to_string()),
        };

        let body = serde_json::json!({
            "error": message,
        });

        (status, axum::Json(body)).into_response()
    }
}
