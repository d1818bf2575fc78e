use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use courier_core::SendError;

/// Failures surfaced by the HTTP handlers.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Missing jid or message")]
    MissingFields,

    #[error("WhatsApp client not connected")]
    NotConnected,

    #[error("Failed to send message: {0}")]
    DeliveryFailed(String),

    #[error("{0}")]
    Internal(String),
}

impl From<SendError> for ApiError {
    fn from(e: SendError) -> Self {
        match e {
            SendError::NotConnected => Self::NotConnected,
            SendError::DeliveryFailed { detail } => Self::DeliveryFailed(detail),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            Self::MissingFields => (
                StatusCode::BAD_REQUEST,
                Json(json!({"error": "Missing jid or message"})),
            ),
            Self::NotConnected => (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({"error": "WhatsApp client not connected"})),
            ),
            Self::DeliveryFailed(details) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": "Failed to send message", "details": details})),
            ),
            Self::Internal(message) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": message})),
            ),
        }
        .into_response()
    }
}
