// crates/relay-lib/src/error.rs

//! Central error type + Axum integration.
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use chatrelay_common::{ErrorCode, ServerEvent};
use thiserror::Error;

/// Application error types
#[derive(Error, Debug)]
pub enum RelayError {
    #[error("missing, invalid or expired bearer token")]
    Unauthorized,

    #[error("connection has not joined room {0}")]
    NotMember(String),

    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    #[error("unknown room: {0}")]
    RoomUnknown(String),

    #[error("delivery to member exceeded {0} ms budget")]
    DeliveryTimeout(u64),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl RelayError {
    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            RelayError::Unauthorized => StatusCode::UNAUTHORIZED,
            RelayError::NotMember(_) => StatusCode::FORBIDDEN,
            RelayError::InvalidPayload(_) => StatusCode::BAD_REQUEST,
            RelayError::RoomUnknown(_) => StatusCode::NOT_FOUND,
            RelayError::DeliveryTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Wire code for errors that are reported back to the originating
    /// connection. Ambient errors (storage, IO) have no wire code and
    /// are never surfaced to clients.
    pub fn wire_code(&self) -> Option<ErrorCode> {
        match self {
            RelayError::Unauthorized => Some(ErrorCode::Unauthorized),
            RelayError::NotMember(_) => Some(ErrorCode::NotMember),
            RelayError::InvalidPayload(_) => Some(ErrorCode::InvalidPayload),
            RelayError::RoomUnknown(_) => Some(ErrorCode::RoomUnknown),
            _ => None,
        }
    }

    /// Build the `error` event sent to the originating connection, where
    /// the variant has a wire code.
    pub fn to_event(&self) -> Option<ServerEvent> {
        self.wire_code().map(|code| ServerEvent::Error {
            code,
            message: self.to_string(),
        })
    }

    /// Get a sanitized message suitable for production use
    pub fn sanitized_message(&self) -> String {
        match self {
            RelayError::Unauthorized => "Authentication failed".to_string(),
            RelayError::NotMember(_) => "Not a member of this room".to_string(),
            RelayError::InvalidPayload(_) => "Invalid payload".to_string(),
            RelayError::RoomUnknown(_) => "Room not found".to_string(),
            RelayError::DeliveryTimeout(_) => "Delivery timed out".to_string(),
            RelayError::Storage(_) | RelayError::Io(_) | RelayError::Internal(_) => {
                "An internal server error occurred".to_string()
            },
            RelayError::Json(_) => "Invalid request format".to_string(),
        }
    }
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        // Detailed messages in development, sanitized in production
        let message = if cfg!(debug_assertions) {
            self.to_string()
        } else {
            self.sanitized_message()
        };

        let code = self
            .wire_code()
            .and_then(|c| serde_json::to_value(c).ok())
            .unwrap_or_else(|| "INTERNAL".into());

        let body = serde_json::json!({
            "error": {
                "code": code,
                "message": message,
            }
        });

        (status, axum::Json(body)).into_response()
    }
}

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for RelayError {
    fn from(_: tokio::sync::mpsc::error::SendError<T>) -> Self {
        RelayError::Internal("Failed to send message".to_string())
    }
}
