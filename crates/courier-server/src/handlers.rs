//! Route handlers.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{error, info};

use crate::error::ApiError;
use crate::facade::{GatewayStatus, HealthReport};
use crate::qr;
use crate::server::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct SendMessageRequest {
    #[serde(default)]
    pub jid: Option<String>,
    #[serde(default)]
    pub message: Option<Value>,
}

/// POST /api/send-message
///
/// The body is parsed by hand so that a missing content type, broken JSON
/// and mistyped fields all answer with the same 400.
pub async fn send_message(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let request = serde_json::from_slice::<SendMessageRequest>(&body).unwrap_or_default();
    let jid = request.jid.filter(|j| !j.trim().is_empty());
    let message = request.message.filter(|m| !m.is_null());
    let (Some(jid), Some(message)) = (jid, message) else {
        return Err(ApiError::MissingFields);
    };

    let result = state.facade.send(&jid, &message).await?;
    Ok(Json(json!({"success": true, "result": result})))
}

/// GET /api/status
pub async fn status(State(state): State<AppState>) -> Json<GatewayStatus> {
    Json(state.facade.status())
}

/// GET /api/qr
pub async fn qr_page(State(state): State<AppState>) -> Response {
    match qr::page(&state.facade.qr()) {
        Ok(page) => page.into_response(),
        Err(e) => {
            error!(error = %e, "failed to render pairing QR");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Html("Error generating QR code".to_string()),
            )
                .into_response()
        }
    }
}

/// POST /api/reinitialize
pub async fn reinitialize(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    state
        .facade
        .reinitialize()
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    Ok(Json(json!({"success": true, "status": "reinitializing"})))
}

/// POST /webhook-test
///
/// Loopback receiver for trying the relay against this same process.
pub async fn webhook_test(body: Bytes) -> StatusCode {
    match serde_json::from_slice::<Value>(&body) {
        Ok(payload) => info!(%payload, "webhook test received"),
        Err(_) => info!(payload = %String::from_utf8_lossy(&body), "webhook test received"),
    }
    StatusCode::OK
}

/// GET /health
pub async fn health(State(state): State<AppState>) -> Json<HealthReport> {
    Json(state.facade.health())
}
