use std::time::Duration;

use courier_core::TransportError;
use courier_store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("connection manager stopped")]
    Stopped,
}

/// Why one webhook delivery did not succeed. Logged and counted, never raised
/// past the dispatcher.
#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    #[error("webhook returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("webhook timed out after {0:?}")]
    Timeout(Duration),

    #[error("webhook request failed: {0}")]
    Request(String),

    #[error("webhook payload could not be encoded: {0}")]
    Encode(String),
}

impl WebhookError {
    /// Short classification string for logging/metrics.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Status { .. } => "status",
            Self::Timeout(_) => "timeout",
            Self::Request(_) => "request",
            Self::Encode(_) => "encode",
        }
    }

    pub fn from_reqwest(e: reqwest::Error, timeout: Duration) -> Self {
        if e.is_timeout() {
            Self::Timeout(timeout)
        } else {
            Self::Request(e.to_string())
        }
    }
}
